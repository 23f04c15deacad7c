//! QEMU `virt` 机器的物理内存布局
//!
//! 见 <https://github.com/qemu/qemu/blob/master/hw/riscv/virt.c>

/// 一段设备寄存器所占的物理地址区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemMapEntity {
    pub addr: usize,
    pub size: usize,
}

impl MemMapEntity {
    pub const UART0: MemMapEntity = Self::new(0x1000_0000, 0x100);
    pub const VIRTIO0: MemMapEntity = Self::new(0x1000_1000, 0x1000);
    pub const PLIC: MemMapEntity = Self::new(0x0c00_0000, 0x40_0000);

    pub const fn new(addr: usize, size: usize) -> Self {
        Self { addr, size }
    }

    pub const fn end(&self) -> usize {
        self.addr + self.size
    }
}

/// 物理地址起始于`0x8000_0000`，内核从此处开始加载
pub const KERNEL_BASE: usize = 0x8000_0000;
/// 我们有128M内存
pub const MEMORY_END: usize = KERNEL_BASE + 128 * 1024 * 1024;

/// 需要由内核页表恒等映射的设备寄存器
pub static MMIO: [MemMapEntity; 3] = [
    MemMapEntity::UART0,
    MemMapEntity::VIRTIO0,
    MemMapEntity::PLIC,
];

/// 平台提供的物理内存布局，内核页表据此构建
///
/// `text_end`与`trampoline`来自链接脚本导出的符号，
/// 故而只能由内核在运行时填入。
#[derive(Debug, Clone, Copy)]
pub struct MemoryLayout {
    pub mmio: &'static [MemMapEntity],
    /// 内核代码段起始
    pub kernel_base: usize,
    /// 内核代码段结束，此后是数据段与可用物理内存
    pub text_end: usize,
    pub memory_end: usize,
    /// 跳板代码所在物理页
    pub trampoline: usize,
}

impl MemoryLayout {
    pub const fn qemu_virt(text_end: usize, trampoline: usize) -> Self {
        Self {
            mmio: &MMIO,
            kernel_base: KERNEL_BASE,
            text_end,
            memory_end: MEMORY_END,
            trampoline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;

    #[test]
    fn qemu_virt() {
        let layout = MemoryLayout::qemu_virt(KERNEL_BASE + 0x2_0000, KERNEL_BASE + 0x1_f000);
        assert_eq!(layout.mmio.len(), 3);
        assert_eq!(layout.memory_end - layout.kernel_base, 0x800_0000);
        for region in layout.mmio {
            assert_eq!(region.addr % PAGE_SIZE, 0);
            assert!(region.addr + region.size <= layout.kernel_base);
        }
    }
}
