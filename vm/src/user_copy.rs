//! 跨越特权边界的数据搬运
//!
//! 用户给出的地址一律经由页表翻译，且只认带U位的叶子，
//! 因此用户无法借内核之手读写内核页或跳板页。
//! 拷贝按页切分：相邻的虚拟页可能落在毫不相干的物理页上。

use crate::address::{page_round_down, PhysPageNum, VirtAddr};
use crate::config::PAGE_SIZE;
use crate::error::Error;
use crate::frame_allocator::FrameAllocator;
use crate::page_table::PageTable;

impl PageTable {
    /// 内核 -> 用户：把`src`写到用户地址`dst_va`处
    pub fn copy_out(
        &self,
        frames: &mut impl FrameAllocator,
        dst_va: VirtAddr,
        mut src: &[u8],
    ) -> Result<(), Error> {
        let mut va = usize::from(dst_va);

        while !src.is_empty() {
            let (ppn, offset, n) = self.user_segment(frames, va, src.len())?;
            frames.page_bytes_mut(ppn)[offset..offset + n].copy_from_slice(&src[..n]);

            src = &src[n..];
            va = page_round_down(va) + PAGE_SIZE;
        }

        Ok(())
    }

    /// 用户 -> 内核：从用户地址`src_va`处读满`dst`
    pub fn copy_in(
        &self,
        frames: &impl FrameAllocator,
        dst: &mut [u8],
        src_va: VirtAddr,
    ) -> Result<(), Error> {
        let mut va = usize::from(src_va);
        let mut copied = 0;

        while copied < dst.len() {
            let (ppn, offset, n) = self.user_segment(frames, va, dst.len() - copied)?;
            dst[copied..copied + n].copy_from_slice(&frames.page_bytes(ppn)[offset..offset + n]);

            copied += n;
            va = page_round_down(va) + PAGE_SIZE;
        }

        Ok(())
    }

    /// 用户 -> 内核：读入以`\0`结尾的字符串，至多读`dst.len()`字节
    ///
    /// 成功时`dst`以`\0`结尾，返回字符串长度（不含`\0`）。
    pub fn copy_in_str(
        &self,
        frames: &impl FrameAllocator,
        dst: &mut [u8],
        src_va: VirtAddr,
    ) -> Result<usize, Error> {
        let max = dst.len();
        let mut va = usize::from(src_va);
        let mut copied = 0;

        while copied < max {
            let (ppn, offset, n) = self.user_segment(frames, va, max - copied)?;
            let bytes = &frames.page_bytes(ppn)[offset..offset + n];

            if let Some(len) = bytes.iter().position(|&byte| byte == b'\0') {
                dst[copied..copied + len].copy_from_slice(&bytes[..len]);
                dst[copied + len] = b'\0';
                return Ok(copied + len);
            }
            dst[copied..copied + n].copy_from_slice(bytes);

            copied += n;
            va = page_round_down(va) + PAGE_SIZE;
        }

        Err(Error::NoTerminator)
    }

    /// 翻译`va`所在的用户页，得到 (物理页号, 页内偏移, 本页内可搬运的字节数)
    fn user_segment(
        &self,
        frames: &impl FrameAllocator,
        va: usize,
        remaining: usize,
    ) -> Result<(PhysPageNum, usize, usize), Error> {
        let base = VirtAddr::new(page_round_down(va));
        let ppn = self
            .translate_user(frames, base)
            .ok_or(Error::BadAddress(VirtAddr::new(va)))?;
        let offset = va - usize::from(base);
        Ok((ppn, offset, (PAGE_SIZE - offset).min(remaining)))
    }
}
