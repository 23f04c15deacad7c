use std::alloc::{self, Layout};

use crate::address::PhysAddr;
use crate::config::PAGE_SIZE;
use crate::frame_allocator::StackFrameAllocator;

/// 在宿主机堆上划出按页对齐的一段内存，充当物理内存
pub fn frames(pages: usize) -> StackFrameAllocator {
    init_logger();

    let layout = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).unwrap();
    // 有意泄漏：测试中的页表可能比分配器活得更久
    let start = unsafe { alloc::alloc_zeroed(layout) } as usize;
    assert_ne!(start, 0);

    unsafe {
        StackFrameAllocator::new(
            PhysAddr::from(start),
            PhysAddr::from(start + pages * PAGE_SIZE),
        )
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
