use enumflags2::{bitflags, BitFlags};

use crate::address::{PhysAddr, PhysPageNum, VirtAddr, VirtPageNum};
use crate::config::{MAX_VA, PAGE_SIZE};
use crate::error::Error;
use crate::frame_allocator::FrameAllocator;

/// SV39 三级页表，只记录根页表所在的物理页号
///
/// 根页表及其下所有次级页表均归本页表独占，
/// 须调用 [`PageTable::free`] 交还，丢弃句柄只会泄漏页帧。
#[derive(Debug)]
pub struct PageTable {
    /// 根页表的物理页号，要交给satp
    root: PhysPageNum,
}

/// 页表项，根据物理地址查到页，
/// 该页装有页表，此乃表中之项
///
/// - [28:53] PPN[2]
/// - [19:27] PPN[1]
/// - [10:18] PPN[0]
/// - [8:9]   保留
/// - [0:7]   保护位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Entry(u64);

/// 保护位
/// - V(Valid)：仅当位 V 为 1 时，页表项才是合法的；
/// - R(Read)/W(Write)/X(eXecute)：分别控制索引到这个页表项的对应虚拟页面是否允许读/写/执行；
/// - U(User)：控制索引到这个页表项的对应虚拟页面是否在 CPU 处于 U 特权级的情况下是否被允许访问；
/// - G：全局映射；
/// - A(Accessed)：处理器记录自从页表项上的这一位被清零之后，页表项的对应虚拟页面是否被访问过；
/// - D(Dirty)：处理器记录自从页表项上的这一位被清零之后，页表项的对应虚拟页面是否被修改过。
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PTEFlag {
    V = 0b0000_0001,
    R = 0b0000_0010,
    W = 0b0000_0100,
    X = 0b0000_1000,
    U = 0b0001_0000,
    G = 0b0010_0000,
    A = 0b0100_0000,
    D = 0b1000_0000,
}

/// 解码后的页表项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pte {
    Invalid,
    /// 指向下一级页表
    Branch(PhysPageNum),
    /// 映射一个物理页，至少带有 R/W/X 之一
    Leaf(PhysPageNum, BitFlags<PTEFlag>),
}

/// 页表项的位置：某张页表中的第几项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub table: PhysPageNum,
    pub index: usize,
}

impl PageTable {
    /// 可容纳的页表项数量
    pub const CAPACITY: usize = 512;
    /// 页表级数，根页表为第2级
    pub const LEVELS: usize = 3;

    /// 分配一页作为空的根页表
    pub fn new(frames: &mut impl FrameAllocator) -> Result<Self, Error> {
        let root = frames.alloc_zeroed().ok_or(Error::OutOfMemory)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> PhysPageNum {
        self.root
    }

    /// 将根页表地址转化成 satp 使用的数据
    pub fn token(&self) -> usize {
        self.root.into_satp()
    }

    /// 为`[va, va + size)`覆盖的每一页创建映射，物理页从`pa`起依次递增
    ///
    /// 中途若无法分配页表，已建立的映射不会撤销，由调用者负责回滚。
    pub fn map(
        &mut self,
        frames: &mut impl FrameAllocator,
        va: VirtAddr,
        size: usize,
        pa: PhysAddr,
        flags: impl Into<BitFlags<PTEFlag>>,
    ) -> Result<(), Error> {
        if size == 0 {
            panic!("map: zero size at {va:?}");
        }

        let flags = flags.into();
        let first: usize = va.floor().into();
        let last: usize = (va + (size - 1)).floor().into();
        let ppn = pa.floor();

        for (i, vpn) in (first..=last).enumerate() {
            let vpn = VirtPageNum::from_raw(vpn);
            let slot = self.walk_or_insert(frames, vpn.into())?;
            if slot.read(frames).is_valid() {
                panic!("map: remap {vpn:?}");
            }
            slot.write(frames, Entry::leaf(ppn + i, flags));
        }

        Ok(())
    }

    /// 清空从`va`起`npages`页的映射，`free`为真时一并回收物理页
    pub fn unmap(
        &mut self,
        frames: &mut impl FrameAllocator,
        va: VirtAddr,
        npages: usize,
        free: bool,
    ) {
        if !va.is_aligned() {
            panic!("unmap: {va:?} not aligned");
        }

        let first: usize = va.floor().into();
        for vpn in first..first + npages {
            let vpn = VirtPageNum::from_raw(vpn);
            let Some(slot) = self.walk(frames, vpn.into()) else {
                panic!("unmap: no table for {vpn:?}");
            };
            match slot.read(frames).decode() {
                Pte::Invalid => panic!("unmap: {vpn:?} not mapped"),
                Pte::Branch(_) => panic!("unmap: {vpn:?} not a leaf"),
                Pte::Leaf(ppn, _) => {
                    if free {
                        frames.dealloc(ppn);
                    }
                }
            }
            slot.write(frames, Entry::EMPTY);
        }
    }

    /// 查找`va`所在页的叶子表项，不要求用户可访问
    pub fn translate(
        &self,
        frames: &impl FrameAllocator,
        va: VirtAddr,
    ) -> Option<(PhysPageNum, BitFlags<PTEFlag>)> {
        match self.walk(frames, va)?.read(frames).decode() {
            Pte::Leaf(ppn, flags) => Some((ppn, flags)),
            _ => None,
        }
    }

    /// 查找用户可访问的页，越界、未映射或缺少U位时返回 None
    ///
    /// 用户给出的地址不可信，此处先检查范围，绝不让越界地址进入`walk`。
    pub fn translate_user(
        &self,
        frames: &impl FrameAllocator,
        va: VirtAddr,
    ) -> Option<PhysPageNum> {
        if !va.in_range() {
            return None;
        }
        self.translate(frames, va)
            .filter(|(_, flags)| flags.contains(PTEFlag::U))
            .map(|(ppn, _)| ppn)
    }

    /// 去掉`va`所在页的U位，使其成为用户态访问即出错的保护页
    pub fn clear_user(&mut self, frames: &mut impl FrameAllocator, va: VirtAddr) {
        let Some(slot) = self.walk(frames, va) else {
            panic!("clear_user: {va:?} not mapped");
        };
        let Pte::Leaf(ppn, mut flags) = slot.read(frames).decode() else {
            panic!("clear_user: {va:?} not mapped");
        };
        flags.remove(PTEFlag::U);
        slot.write(frames, Entry::leaf(ppn, flags));
    }

    /// 收集从`va`起至多64页的访问位，第`i`页被访问过则置位第`i`位，并清除这些访问位
    ///
    /// 未映射的页视作未访问，越过[`MAX_VA`]即停止。
    pub fn take_accessed(
        &mut self,
        frames: &mut impl FrameAllocator,
        va: VirtAddr,
        npages: usize,
    ) -> u64 {
        let mut mask = 0;
        let mut va = usize::from(va);

        for i in 0..npages.min(u64::BITS as usize) {
            if va >= MAX_VA {
                break;
            }
            if let Some(slot) = self.walk(frames, VirtAddr::new(va)) {
                if let Pte::Leaf(ppn, mut flags) = slot.read(frames).decode() {
                    if flags.contains(PTEFlag::A) {
                        mask |= 1 << i;
                        flags.remove(PTEFlag::A);
                        slot.write(frames, Entry::leaf(ppn, flags));
                    }
                }
            }
            va += PAGE_SIZE;
        }

        mask
    }

    /// 回收`va`所在的、已不含任何有效表项的次级页表
    pub fn prune(&mut self, frames: &mut impl FrameAllocator, va: VirtAddr) {
        check_range(va);
        let vpn = va.floor();

        let top = Slot::new(self.root, vpn.index(2));
        let Pte::Branch(middle) = top.read(frames).decode() else {
            return;
        };
        let slot = Slot::new(middle, vpn.index(1));
        if let Pte::Branch(leaves) = slot.read(frames).decode() {
            if is_empty(frames, leaves) {
                slot.write(frames, Entry::EMPTY);
                frames.dealloc(leaves);
            }
        }
        if is_empty(frames, middle) {
            top.write(frames, Entry::EMPTY);
            frames.dealloc(middle);
        }
    }

    /// 自底向上回收所有页表页，叶子映射须已全部清除
    pub fn free(self, frames: &mut impl FrameAllocator) {
        free_table(frames, self.root, Self::LEVELS - 1);
    }
}

impl PageTable {
    /// 根据虚拟地址查找末级页表项，并沿途创建尚未存在的页表
    ///
    /// 注意：返回的页表项未做检查，可能无效
    pub fn walk_or_insert(
        &mut self,
        frames: &mut impl FrameAllocator,
        va: VirtAddr,
    ) -> Result<Slot, Error> {
        check_range(va);
        let vpn = va.floor();
        let mut table = self.root;

        for level in (1..Self::LEVELS).rev() {
            let slot = Slot::new(table, vpn.index(level));
            log::trace!("level {level} page table: {table:?}, index: {:#x}", slot.index);
            table = match slot.read(frames).decode() {
                Pte::Branch(next) => next,
                Pte::Invalid => {
                    // 分配新的物理页，并让上级页表项指向此物理页
                    let next = frames.alloc_zeroed().ok_or(Error::OutOfMemory)?;
                    slot.write(frames, Entry::branch(next));
                    next
                }
                Pte::Leaf(..) => panic!("walk: leaf at level {level} for {va:?}"),
            };
        }

        Ok(Slot::new(table, vpn.index(0)))
    }

    /// 根据虚拟地址查找末级页表项，沿途若有无效表项，则返回 None。
    ///
    /// 注意：返回的页表项未做检查，可能无效
    pub fn walk(&self, frames: &impl FrameAllocator, va: VirtAddr) -> Option<Slot> {
        check_range(va);
        let vpn = va.floor();
        let mut table = self.root;

        for level in (1..Self::LEVELS).rev() {
            table = match Slot::new(table, vpn.index(level)).read(frames).decode() {
                Pte::Branch(next) => next,
                Pte::Invalid => return None,
                Pte::Leaf(..) => panic!("walk: leaf at level {level} for {va:?}"),
            };
        }

        Some(Slot::new(table, vpn.index(0)))
    }
}

fn check_range(va: VirtAddr) {
    if !va.in_range() {
        panic!("walk: {va:?} out of range");
    }
}

fn is_empty(frames: &impl FrameAllocator, table: PhysPageNum) -> bool {
    (0..PageTable::CAPACITY).all(|index| !Slot::new(table, index).read(frames).is_valid())
}

fn free_table(frames: &mut impl FrameAllocator, table: PhysPageNum, level: usize) {
    for index in 0..PageTable::CAPACITY {
        let slot = Slot::new(table, index);
        match slot.read(frames).decode() {
            Pte::Invalid => {}
            Pte::Branch(child) if level > 0 => {
                free_table(frames, child, level - 1);
                slot.write(frames, Entry::EMPTY);
            }
            _ => panic!("free: live leaf at level {level} index {index} of table {table:?}"),
        }
    }
    frames.dealloc(table);
}

impl Slot {
    pub fn new(table: PhysPageNum, index: usize) -> Self {
        Self { table, index }
    }

    pub fn read(&self, frames: &impl FrameAllocator) -> Entry {
        let mut raw = [0; 8];
        raw.copy_from_slice(&frames.page_bytes(self.table)[self.index * 8..][..8]);
        Entry(u64::from_ne_bytes(raw))
    }

    pub fn write(&self, frames: &mut impl FrameAllocator, entry: Entry) {
        frames.page_bytes_mut(self.table)[self.index * 8..][..8]
            .copy_from_slice(&entry.0.to_ne_bytes());
    }
}

impl Entry {
    pub const EMPTY: Self = Self(0);

    const PERMISSION: BitFlags<PTEFlag> =
        enumflags2::make_bitflags!(PTEFlag::{R | W | X});

    pub fn new(ppn: PhysPageNum, flags: impl Into<BitFlags<PTEFlag>>) -> Self {
        let flags: BitFlags<PTEFlag> = flags.into();
        Self(((ppn << 10) as u64) | flags.bits() as u64)
    }

    /// 指向下一级页表的表项：只有V位
    pub fn branch(ppn: PhysPageNum) -> Self {
        Self::new(ppn, PTEFlag::V)
    }

    /// 映射物理页的表项，R/W/X 至少得有一个，否则硬件会当作下一级页表
    pub fn leaf(ppn: PhysPageNum, flags: impl Into<BitFlags<PTEFlag>>) -> Self {
        let flags = flags.into();
        if !flags.intersects(Self::PERMISSION) {
            panic!("leaf entry for {ppn:?} without R/W/X");
        }
        Self::new(ppn, flags | PTEFlag::V)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn ppn(&self) -> PhysPageNum {
        PhysPageNum::from((self.0 >> 10) as usize)
    }

    pub fn flags(&self) -> BitFlags<PTEFlag> {
        // 缩减为u8，得到低8位的二进制标志位
        BitFlags::from_bits_truncate(self.0 as u8)
    }

    pub fn is_valid(&self) -> bool {
        self.flags().contains(PTEFlag::V)
    }

    pub fn decode(self) -> Pte {
        let flags = self.flags();
        if !flags.contains(PTEFlag::V) {
            Pte::Invalid
        } else if flags.intersects(Self::PERMISSION) {
            Pte::Leaf(self.ppn(), flags)
        } else {
            Pte::Branch(self.ppn())
        }
    }
}
