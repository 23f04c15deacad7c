//! 打印页表，调试用

use core::fmt::{self, Write};

use crate::address::{PhysAddr, PhysPageNum};
use crate::frame_allocator::FrameAllocator;
use crate::page_table::{PageTable, Pte, Slot};

impl PageTable {
    /// 逐级打印所有有效表项
    ///
    /// ```text
    /// page table 0x0000000087f6b000
    ///  ..0: pte 0x0000000021fd9c01 pa 0x0000000087f67000
    ///  .. ..0: pte 0x0000000021fd9801 pa 0x0000000087f66000
    ///  .. .. ..0: pte 0x0000000021fda01b pa 0x0000000087f68000
    /// ```
    pub fn dump(&self, frames: &impl FrameAllocator, out: &mut impl Write) -> fmt::Result {
        writeln!(out, "page table {:#018x}", usize::from(PhysAddr::from(self.root())))?;
        dump_table(frames, self.root(), Self::LEVELS - 1, out)
    }
}

fn dump_table(
    frames: &impl FrameAllocator,
    table: PhysPageNum,
    level: usize,
    out: &mut impl Write,
) -> fmt::Result {
    for index in 0..PageTable::CAPACITY {
        let entry = Slot::new(table, index).read(frames);
        if !entry.is_valid() {
            continue;
        }

        for _ in level..PageTable::LEVELS {
            out.write_str(" ..")?;
        }
        writeln!(
            out,
            "{index}: pte {:#018x} pa {:#018x}",
            entry.bits(),
            usize::from(PhysAddr::from(entry.ppn()))
        )?;

        if let Pte::Branch(child) = entry.decode() {
            if level > 0 {
                dump_table(frames, child, level - 1, out)?;
            }
        }
    }
    Ok(())
}
