//! 物理页帧分配器

use alloc::vec::Vec;
use core::slice;

use crate::address::{PhysAddr, PhysPageNum};
use crate::config::PAGE_SIZE;

/// 物理页帧的来源
///
/// 页表与用户页都经由本接口按物理页号访问，
/// 虚存子系统自身从不解引用裸指针。
pub trait FrameAllocator {
    /// 分配一页，不保证内容为零
    fn alloc(&mut self) -> Option<PhysPageNum>;

    fn dealloc(&mut self, ppn: PhysPageNum);

    /// 读出指定物理页的数据
    fn page_bytes(&self, ppn: PhysPageNum) -> &[u8];

    /// 读出指定物理页的数据以供修改
    fn page_bytes_mut(&mut self, ppn: PhysPageNum) -> &mut [u8];

    /// 分配一页并清零
    fn alloc_zeroed(&mut self) -> Option<PhysPageNum> {
        let ppn = self.alloc()?;
        self.page_bytes_mut(ppn).fill(0);
        Some(ppn)
    }

    /// 把`src`页的内容整页复制到`dst`页
    fn copy_page(&mut self, dst: PhysPageNum, src: PhysPageNum);
}

/// 栈式物理页帧分配器
///
/// 管理一段直接映射的物理内存。
/// 页号区间 [current, end) 的物理内存**从未**被分配，
/// 被回收的页号压入`recycled`，优先分配。
#[derive(Debug)]
pub struct StackFrameAllocator {
    start: usize,
    current: usize,
    end: usize,
    /// 被回收的物理页号之栈，栈顶位于尾部
    recycled: Vec<usize>,
}

impl StackFrameAllocator {
    /// # Safety
    ///
    /// `[start, end)`必须是可直接访问的物理内存，且不为他人所用。
    pub unsafe fn new(start: PhysAddr, end: PhysAddr) -> Self {
        let start: usize = start.ceil().into();
        let end: usize = end.floor().into();
        log::debug!("frame allocator manages ppn [{start:#x}, {end:#x})");
        Self {
            start,
            current: start,
            end: end.max(start),
            recycled: Vec::new(),
        }
    }

    /// 已分配而未回收的页数
    pub fn allocated(&self) -> usize {
        self.current - self.start - self.recycled.len()
    }

    /// 尚可分配的页数
    pub fn available(&self) -> usize {
        self.end - self.current + self.recycled.len()
    }

    fn check(&self, ppn: PhysPageNum) -> usize {
        let ppn: usize = ppn.into();
        if ppn < self.start || ppn >= self.current {
            panic!("Frame ppn={ppn:#x} is not managed by this allocator");
        }
        ppn
    }
}

impl FrameAllocator for StackFrameAllocator {
    /// 分配新页面
    fn alloc(&mut self) -> Option<PhysPageNum> {
        match self.recycled.pop() {
            // 尝试分配以前的回收的物理页号
            Some(ppn) => Some(PhysPageNum::from_raw(ppn)),
            None => (self.current < self.end).then(|| {
                // 若内存尚未用尽，则分配其左端点`current`，并缩短页号区间
                let current = self.current;
                self.current += 1;
                PhysPageNum::from_raw(current)
            }),
        }
    }

    /// 回收页面
    ///
    /// 合法的被回收页面
    /// - 之前一定被分配出去过，因此其物理页号位于`[start, current)`
    /// - 它不是回收状态，即`recycled`中不包含此物理页号
    fn dealloc(&mut self, ppn: PhysPageNum) {
        let ppn = self.check(ppn);
        if self.recycled.contains(&ppn) {
            panic!("Frame ppn={ppn:#x} has not been allocated!");
        }
        self.recycled.push(ppn);
    }

    fn page_bytes(&self, ppn: PhysPageNum) -> &[u8] {
        self.check(ppn);
        let pa = usize::from(PhysAddr::from(ppn));
        unsafe { slice::from_raw_parts(pa as *const u8, PAGE_SIZE) }
    }

    fn page_bytes_mut(&mut self, ppn: PhysPageNum) -> &mut [u8] {
        // 可见，[物理页号 0000_0000_0000] 即物理页的地址
        self.check(ppn);
        let pa = usize::from(PhysAddr::from(ppn));
        unsafe { slice::from_raw_parts_mut(pa as *mut u8, PAGE_SIZE) }
    }

    fn copy_page(&mut self, dst: PhysPageNum, src: PhysPageNum) {
        let dst = usize::from(PhysAddr::from(PhysPageNum::from_raw(self.check(dst))));
        let src = usize::from(PhysAddr::from(PhysPageNum::from_raw(self.check(src))));
        if dst != src {
            unsafe {
                core::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, PAGE_SIZE);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn alloc_and_recycle() {
        let mut frames = test_utils::frames(2);
        let a = frames.alloc().unwrap();
        let b = frames.alloc().unwrap();
        assert_ne!(a, b);
        assert!(frames.alloc().is_none());
        assert_eq!(frames.allocated(), 2);

        frames.dealloc(a);
        assert_eq!(frames.allocated(), 1);
        assert_eq!(frames.available(), 1);
        // 回收的页号优先分配
        assert_eq!(frames.alloc(), Some(a));
    }

    #[test]
    fn zeroed_and_copied() {
        let mut frames = test_utils::frames(2);
        let a = frames.alloc_zeroed().unwrap();
        frames.page_bytes_mut(a)[..3].copy_from_slice(b"abc");
        let b = frames.alloc_zeroed().unwrap();
        frames.copy_page(b, a);
        assert_eq!(&frames.page_bytes(b)[..4], b"abc\0");

        frames.dealloc(a);
        let a = frames.alloc_zeroed().unwrap();
        assert!(frames.page_bytes(a).iter().all(|&byte| byte == 0));
    }

    #[test]
    #[should_panic(expected = "has not been allocated")]
    fn double_free() {
        let mut frames = test_utils::frames(1);
        let a = frames.alloc().unwrap();
        frames.dealloc(a);
        frames.dealloc(a);
    }
}
