//! SV39 虚拟内存：页表、内核与用户地址空间、跨特权级拷贝
//!
//! 错误分两类：
//! - 页帧耗尽、用户地址非法等可恢复的错误，以 [`Error`] 返回；
//! - 重复映射、缺失应有的映射、回收仍有叶子的页表等内部错误，
//!   说明内核自身有缺陷，直接 panic，由内核的 panic 处理函数打印并停机。
//!   单凭用户输入绝不会触发此类错误。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod address;
mod address_space;
pub mod arch;
pub mod board;
pub mod config;
mod dump;
mod error;
pub mod frame_allocator;
pub mod kernel_space;
mod page_table;
#[cfg(test)]
mod test_utils;
mod user_copy;

pub use self::{
    address::{PhysAddr, PhysPageNum, VirtAddr, VirtPageNum},
    address_space::AddressSpace,
    arch::Mmu,
    error::Error,
    frame_allocator::{FrameAllocator, StackFrameAllocator},
    kernel_space::KernelSpace,
    page_table::{Entry, PTEFlag, PageTable, Pte, Slot},
};
