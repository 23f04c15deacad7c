//! 虚拟内存子系统的常量

/// 物理页大小，十六进制表示方便地址转页号的计算
pub const PAGE_SIZE: usize = 0x1000;
/// 物理页内寻址的位数
pub const PAGE_SIZE_BITS: usize = 12;

/// 虚拟地址上界（不含）。
///
/// SV39 的虚拟地址共39位，但第38位为1的地址须做符号扩展，
/// 为省去这些麻烦，只使用低256G，即第38位恒为0。
pub const MAX_VA: usize = 1 << (9 + 9 + 9 + PAGE_SIZE_BITS - 1);

/// 跳板地址，位于最高的可用虚拟页
pub const TRAMPOLINE: usize = MAX_VA - PAGE_SIZE;
/// Trap上下文地址，紧贴跳板之下，用户地址空间不可越过此处
pub const TRAP_CONTEXT: usize = TRAMPOLINE - PAGE_SIZE;

pub const KERNEL_STACK_SIZE: usize = PAGE_SIZE * 2;
pub const USER_STACK_PAGES: usize = 1;

/// 进程槽位数，每个槽位在内核空间内有一个内核栈
pub const NPROC: usize = 64;
