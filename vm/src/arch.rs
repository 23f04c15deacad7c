//! 地址翻译硬件

use crate::address::PhysPageNum;

/// 处理器的地址翻译单元
pub trait Mmu {
    /// 把根页表写入地址翻译的根寄存器
    fn set_root(&mut self, root: PhysPageNum);

    /// 清空快表
    fn flush_tlb(&mut self);
}

/// RISC-V 的 satp 寄存器与 `sfence.vma` 指令
#[cfg(target_arch = "riscv64")]
#[derive(Debug, Default)]
pub struct Sv39Mmu;

#[cfg(target_arch = "riscv64")]
impl Mmu for Sv39Mmu {
    fn set_root(&mut self, root: PhysPageNum) {
        use riscv::register::satp;
        unsafe { satp::set(satp::Mode::Sv39, 0, root.into()) };
    }

    fn flush_tlb(&mut self) {
        // 快表 TLB 会缓存虚拟页号到页表项的映射，
        // 但它与地址空间耦合，切换地址空间会令其失效
        unsafe { riscv::asm::sfence_vma_all() };
    }
}
