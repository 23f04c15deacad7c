//! 内核地址空间
//!
//! 在开启分页之前构建，此时地址即物理地址，故而绝大部分采用恒等映射：
//! 切换satp的指令与其下一条指令，两者的虚拟地址相邻，物理地址也必须相邻。
//!
//! 内核页表只在启动核上构建一次，其余核等待构建完成后再开启分页，
//! 此后它只读不写，无须加锁。

use enumflags2::BitFlags;
use log::{debug, info};
use spin::Once;

use crate::address::{PhysAddr, VirtAddr};
use crate::arch::Mmu;
use crate::board::MemoryLayout;
use crate::config::{KERNEL_STACK_SIZE, PAGE_SIZE, TRAMPOLINE};
use crate::frame_allocator::FrameAllocator;
use crate::page_table::{PTEFlag, PageTable};

static KERNEL_SPACE: Once<KernelSpace> = Once::new();

#[derive(Debug)]
pub struct KernelSpace {
    page_table: PageTable,
    /// 映射了内核栈的进程槽位数
    stacks: usize,
}

/// 在启动核上构建内核页表，只可调用一次
pub fn init(
    frames: &mut impl FrameAllocator,
    layout: &MemoryLayout,
    nproc: usize,
) -> &'static KernelSpace {
    let mut built = false;
    let space = KERNEL_SPACE.call_once(|| {
        built = true;
        KernelSpace::new(frames, layout, nproc)
    });
    if !built {
        panic!("kernel space initialized twice");
    }
    space
}

/// 在当前核上开启分页，内核页表尚未构建好时原地等待
pub fn init_hart(mmu: &mut impl Mmu) {
    KERNEL_SPACE.wait().activate(mmu);
}

pub fn kernel_space() -> Option<&'static KernelSpace> {
    KERNEL_SPACE.get()
}

/// 第`kid`个内核栈的 (栈底, 栈顶)
///
/// 内核空间的高处，跳板之下存放着所有进程的内核栈，
/// 每个栈之下都空出一个保护页，跳板与第一个栈之间亦然。
pub fn kernel_stack(kid: usize) -> (usize, usize) {
    let top = TRAMPOLINE - PAGE_SIZE - kid * (KERNEL_STACK_SIZE + PAGE_SIZE);
    let bottom = top - KERNEL_STACK_SIZE;
    (bottom, top)
}

impl KernelSpace {
    /// 创建内核的地址空间
    ///
    /// 启动阶段无从回退，页帧不够即告失败。
    pub fn new(frames: &mut impl FrameAllocator, layout: &MemoryLayout, nproc: usize) -> Self {
        debug!("creating kernel address space");
        let Ok(mut page_table) = PageTable::new(frames) else {
            panic!("kvmmake: out of memory");
        };

        debug!("mapping memory-mapped registers");
        for region in layout.mmio {
            kvmmap(
                &mut page_table,
                frames,
                region.addr,
                region.addr,
                region.size,
                PTEFlag::R | PTEFlag::W,
            );
        }

        info!(".text [{:#x}, {:#x})", layout.kernel_base, layout.text_end);
        kvmmap(
            &mut page_table,
            frames,
            layout.kernel_base,
            layout.kernel_base,
            layout.text_end - layout.kernel_base,
            PTEFlag::R | PTEFlag::X,
        );

        // 内核数据以及交给物理页帧分配器的内存
        info!("data & memory [{:#x}, {:#x})", layout.text_end, layout.memory_end);
        kvmmap(
            &mut page_table,
            frames,
            layout.text_end,
            layout.text_end,
            layout.memory_end - layout.text_end,
            PTEFlag::R | PTEFlag::W,
        );

        debug!("mapping trampoline");
        kvmmap(
            &mut page_table,
            frames,
            TRAMPOLINE,
            layout.trampoline,
            PAGE_SIZE,
            PTEFlag::R | PTEFlag::X,
        );

        debug!("mapping {nproc} kernel stacks");
        for kid in 0..nproc {
            let (bottom, top) = kernel_stack(kid);
            for va in (bottom..top).step_by(PAGE_SIZE) {
                let Some(ppn) = frames.alloc_zeroed() else {
                    panic!("kvmmake: out of memory for kernel stack {kid}");
                };
                kvmmap(
                    &mut page_table,
                    frames,
                    va,
                    usize::from(PhysAddr::from(ppn)),
                    PAGE_SIZE,
                    PTEFlag::R | PTEFlag::W,
                );
            }
        }

        Self {
            page_table,
            stacks: nproc,
        }
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn token(&self) -> usize {
        self.page_table.token()
    }

    pub fn stacks(&self) -> usize {
        self.stacks
    }

    /// 切换到内核页表
    pub fn activate(&self, mmu: &mut impl Mmu) {
        // 等待此前对页表的写入完成
        mmu.flush_tlb();
        mmu.set_root(self.page_table.root());
        // 清除旧的快表项
        mmu.flush_tlb();
    }
}

fn kvmmap(
    page_table: &mut PageTable,
    frames: &mut impl FrameAllocator,
    va: usize,
    pa: usize,
    size: usize,
    flags: BitFlags<PTEFlag>,
) {
    if page_table
        .map(frames, VirtAddr::new(va), size, PhysAddr::from(pa), flags)
        .is_err()
    {
        panic!("kvmmap: out of memory at {va:#x}");
    }
}
