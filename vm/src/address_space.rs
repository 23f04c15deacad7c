//! 用户地址空间
//!
//! 用户空间自虚拟地址0起连续分布，`size`之下的每一页均已映射，
//! 每个物理页只属于一个地址空间。唯一的例外是跳板页：
//! 它在所有地址空间中映射到同一物理页，却不归任何地址空间所有，
//! 销毁地址空间时只撤销映射而不回收。

use enumflags2::BitFlags;
use log::debug;

use crate::address::{page_round_up, PhysAddr, VirtAddr};
use crate::config::{PAGE_SIZE, TRAMPOLINE, TRAP_CONTEXT};
use crate::error::Error;
use crate::frame_allocator::FrameAllocator;
use crate::page_table::{PTEFlag, PageTable};

const LEAF_TABLE_SPAN: usize = PageTable::CAPACITY * PAGE_SIZE;

#[derive(Debug)]
pub struct AddressSpace {
    page_table: PageTable,
    /// 用户空间的大小，`[0, size)`视为已使用
    size: usize,
    /// 是否映射了跳板
    trampoline: bool,
}

impl AddressSpace {
    /// 创建空的用户地址空间
    pub fn new(frames: &mut impl FrameAllocator) -> Result<Self, Error> {
        Ok(Self {
            page_table: PageTable::new(frames)?,
            size: 0,
            trampoline: false,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn token(&self) -> usize {
        self.page_table.token()
    }

    /// 在最高的虚拟页映射跳板，用户态不可访问
    pub fn map_trampoline(
        &mut self,
        frames: &mut impl FrameAllocator,
        trampoline: PhysAddr,
    ) -> Result<(), Error> {
        self.page_table.map(
            frames,
            VirtAddr::new(TRAMPOLINE),
            PAGE_SIZE,
            trampoline,
            PTEFlag::R | PTEFlag::X,
        )?;
        self.trampoline = true;
        Ok(())
    }

    /// 把始祖进程的代码装入虚拟地址0处的一页
    pub fn load_initial(
        &mut self,
        frames: &mut impl FrameAllocator,
        image: &[u8],
    ) -> Result<(), Error> {
        if image.len() > PAGE_SIZE {
            panic!("load_initial: image of {} bytes exceeds a page", image.len());
        }

        let ppn = frames.alloc_zeroed().ok_or(Error::OutOfMemory)?;
        if let Err(e) = self.page_table.map(
            frames,
            VirtAddr::new(0),
            PAGE_SIZE,
            ppn.into(),
            PTEFlag::R | PTEFlag::W | PTEFlag::X | PTEFlag::U,
        ) {
            frames.dealloc(ppn);
            return Err(e);
        }
        frames.page_bytes_mut(ppn)[..image.len()].copy_from_slice(image);

        self.size = PAGE_SIZE;
        Ok(())
    }

    /// 扩张至`new_size`，新页可读、用户可访问，另加`extra`权限
    ///
    /// 失败时撤销本次分配的一切，空间大小不变。
    pub fn grow(
        &mut self,
        frames: &mut impl FrameAllocator,
        new_size: usize,
        extra: impl Into<BitFlags<PTEFlag>>,
    ) -> Result<usize, Error> {
        let old_size = self.size;
        if new_size <= old_size {
            return Ok(old_size);
        }
        // 不得侵入Trap上下文与跳板
        if new_size > TRAP_CONTEXT {
            return Err(Error::OutOfMemory);
        }

        let flags = PTEFlag::R | PTEFlag::U | extra.into();
        let mut va = page_round_up(old_size);

        while va < new_size {
            let result = match frames.alloc_zeroed() {
                Some(ppn) => self
                    .page_table
                    .map(frames, VirtAddr::new(va), PAGE_SIZE, ppn.into(), flags)
                    .inspect_err(|_| frames.dealloc(ppn)),
                None => Err(Error::OutOfMemory),
            };
            if let Err(e) = result {
                debug!("grow to {new_size:#x} failed at {va:#x}, rolling back");
                self.release(frames, va, old_size);
                return Err(e);
            }
            va += PAGE_SIZE;
        }

        self.size = new_size;
        Ok(new_size)
    }

    /// 收缩至`new_size`，回收其上的整页
    pub fn shrink(&mut self, frames: &mut impl FrameAllocator, new_size: usize) -> usize {
        let old_size = self.size;
        if new_size >= old_size {
            return old_size;
        }

        self.release(frames, old_size, new_size);
        self.size = new_size;
        new_size
    }

    /// 按有符号增量调整大小，返回调整前的大小
    pub fn resize(
        &mut self,
        frames: &mut impl FrameAllocator,
        delta: isize,
        extra: impl Into<BitFlags<PTEFlag>>,
    ) -> Result<usize, Error> {
        let old_size = self.size;
        if delta >= 0 {
            let new_size = old_size
                .checked_add(delta.unsigned_abs())
                .ok_or(Error::OutOfMemory)?;
            self.grow(frames, new_size, extra)?;
        } else {
            self.shrink(frames, old_size.saturating_sub(delta.unsigned_abs()));
        }
        Ok(old_size)
    }

    /// 在空间顶端分配`pages`页的栈，栈下留一页去掉U位的保护页
    ///
    /// 返回栈顶地址
    pub fn push_stack(
        &mut self,
        frames: &mut impl FrameAllocator,
        pages: usize,
    ) -> Result<usize, Error> {
        let guard = page_round_up(self.size);
        let top = pages
            .checked_add(1)
            .and_then(|n| n.checked_mul(PAGE_SIZE))
            .and_then(|len| len.checked_add(guard))
            .ok_or(Error::OutOfMemory)?;
        self.grow(frames, top, PTEFlag::W)?;
        self.page_table.clear_user(frames, VirtAddr::new(guard));
        Ok(top)
    }

    /// 去掉`va`所在页的U位
    pub fn clear_user_access(&mut self, frames: &mut impl FrameAllocator, va: VirtAddr) {
        self.page_table.clear_user(frames, va);
    }

    /// 将本空间`[0, size)`的内容逐页复制到`dst`，物理页各自独立
    ///
    /// 失败时`dst`中已建立的映射全部撤销并回收。
    pub fn duplicate(
        &self,
        frames: &mut impl FrameAllocator,
        dst: &mut AddressSpace,
    ) -> Result<(), Error> {
        let mut va = 0;

        while va < self.size {
            let Some((src_ppn, flags)) = self.page_table.translate(frames, VirtAddr::new(va))
            else {
                panic!("duplicate: page {va:#x} not present");
            };

            let result = match frames.alloc() {
                Some(ppn) => {
                    frames.copy_page(ppn, src_ppn);
                    dst.page_table
                        .map(frames, VirtAddr::new(va), PAGE_SIZE, ppn.into(), flags)
                        .inspect_err(|_| frames.dealloc(ppn))
                }
                None => Err(Error::OutOfMemory),
            };
            if let Err(e) = result {
                debug!("duplicate failed at {va:#x}, rolling back");
                dst.release(frames, va, 0);
                return Err(e);
            }
            va += PAGE_SIZE;
        }

        dst.size = self.size;
        Ok(())
    }

    /// fork：创建新地址空间并复制本空间的内容
    ///
    /// 跳板不随之复制，由调用者另行映射。
    pub fn try_clone(&self, frames: &mut impl FrameAllocator) -> Result<Self, Error> {
        let mut child = Self::new(frames)?;
        if let Err(e) = self.duplicate(frames, &mut child) {
            child.destroy(frames);
            return Err(e);
        }
        Ok(child)
    }

    /// 销毁地址空间，回收所有用户页与页表页
    pub fn destroy(mut self, frames: &mut impl FrameAllocator) {
        if self.trampoline {
            self.page_table
                .unmap(frames, VirtAddr::new(TRAMPOLINE), 1, false);
        }
        if self.size > 0 {
            self.page_table.unmap(
                frames,
                VirtAddr::new(0),
                page_round_up(self.size) / PAGE_SIZE,
                true,
            );
        }
        self.page_table.free(frames);
    }
}

impl AddressSpace {
    /// 回收`[round_up(to), round_up(from))`内的页，跳过未映射者，
    /// 再回收因此变空的次级页表
    fn release(&mut self, frames: &mut impl FrameAllocator, from: usize, to: usize) {
        let (start, end) = (page_round_up(to), page_round_up(from));
        for va in (start..end).step_by(PAGE_SIZE) {
            let va = VirtAddr::new(va);
            if self.page_table.translate(frames, va).is_some() {
                self.page_table.unmap(frames, va, 1, true);
            }
        }

        // 每张末级页表覆盖 2M
        let mut va = start;
        while va < end {
            self.page_table.prune(frames, VirtAddr::new(va));
            va = (va | (LEAF_TABLE_SPAN - 1)) + 1;
        }
    }
}
