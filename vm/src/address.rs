//! SV39多级页表的地址约定

use core::fmt::{self, LowerHex};
use core::ops::{Add, Shl};

use derive_more::{From, Into};

use crate::config::{MAX_VA, PAGE_SIZE, PAGE_SIZE_BITS};

/// satp的模式字段值为8时，会启用SV39分页模式
const SV39_MODE_MASK: usize = 0b1000 << 60;

/// 虚拟地址
/// - [12:37] 虚拟页号
/// - [0:11]  对应物理页的页内偏移
///
/// 不做截断：来自用户的地址可能越界，须保留原值以便检查。
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, From, Into)]
pub struct VirtAddr(usize);

/// 虚拟页号 (27位)
/// 1. [18:26] 二级索引，指示根页表中次级页表的物理页号
/// 2. [9:17]  一级索引，指示次级页表中末级页表的物理页号
/// 3. [0:8]   零级索引，指示末级页表中目标物理页号
///
/// 页表位于物理页内，一个物理页大小为4K字节，
/// 而页表项占8字节，因此页表总共有512条表项。
/// log2(512) = 9，故索引的长度为9比特。
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, From, Into)]
pub struct VirtPageNum(usize);

/// 物理地址 (56位)
/// - [12:55] 物理页号
/// - [0:11]  页内偏移
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysAddr(usize);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysPageNum(usize);

/// 向上取整到页边界
#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// 向下取整到页边界
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

impl VirtAddr {
    pub const fn new(va: usize) -> Self {
        Self(va)
    }

    /// 是否落在可供页表翻译的范围内
    pub fn in_range(&self) -> bool {
        self.0 < MAX_VA
    }

    pub fn page_offset(&self) -> usize {
        self.0 & ((1 << PAGE_SIZE_BITS) - 1)
    }

    pub fn is_aligned(&self) -> bool {
        self.page_offset() == 0
    }

    /// 所在页的页号
    pub fn floor(&self) -> VirtPageNum {
        VirtPageNum(self.0 / PAGE_SIZE)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA({:#x})", self.0)
    }
}

impl fmt::Debug for VirtPageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        LowerHex::fmt(&self.0, f)
    }
}

impl VirtPageNum {
    const INDEX_MASK: usize = 0b1_1111_1111;

    pub fn from_raw(vpn: usize) -> Self {
        Self(vpn)
    }

    /// 取出第`level`级页表的索引，根页表为第2级
    pub fn index(&self, level: usize) -> usize {
        (self.0 >> (9 * level)) & Self::INDEX_MASK
    }
}

impl PhysAddr {
    pub const WIDTH: usize = 56;

    pub fn page_number(&self) -> PhysPageNum {
        self.floor()
    }

    pub fn page_offset(&self) -> usize {
        self.0 & ((1 << PAGE_SIZE_BITS) - 1)
    }

    /// 本物理地址的页号，区间的闭端
    pub fn floor(&self) -> PhysPageNum {
        PhysPageNum(self.0 / PAGE_SIZE)
    }

    /// 本物理地址的上界页号，区间的开端
    pub fn ceil(&self) -> PhysPageNum {
        PhysPageNum(self.0.div_ceil(PAGE_SIZE))
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA({:#x})", self.0)
    }
}

impl fmt::Debug for PhysPageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        LowerHex::fmt(&self.0, f)
    }
}

impl PhysPageNum {
    pub const WIDTH: usize = PhysAddr::WIDTH - PAGE_SIZE_BITS;

    pub fn from_raw(ppn: usize) -> Self {
        Self(ppn)
    }

    /// 得到用于传给 satp 的数据
    pub fn into_satp(self) -> usize {
        SV39_MODE_MASK | self.0
    }
}

// ========== VirtAddr * usize ==========

impl Add<usize> for VirtAddr {
    type Output = Self;

    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

// ========== PhysAddr * usize ==========

impl From<usize> for PhysAddr {
    fn from(v: usize) -> Self {
        Self(v & ((1 << PhysAddr::WIDTH) - 1))
    }
}

impl From<PhysAddr> for usize {
    fn from(pa: PhysAddr) -> Self {
        pa.0
    }
}

impl Add<usize> for PhysAddr {
    type Output = PhysAddr;

    fn add(self, rhs: usize) -> Self::Output {
        Self::from(self.0 + rhs)
    }
}

// ========== PhysPageNum * usize ==========

impl From<usize> for PhysPageNum {
    fn from(v: usize) -> Self {
        Self(v & ((1 << PhysPageNum::WIDTH) - 1))
    }
}

impl From<PhysPageNum> for usize {
    fn from(ppn: PhysPageNum) -> Self {
        ppn.0
    }
}

impl Shl<usize> for PhysPageNum {
    type Output = usize;

    fn shl(self, rhs: usize) -> Self::Output {
        self.0 << rhs
    }
}

impl Add<usize> for PhysPageNum {
    type Output = PhysPageNum;

    fn add(self, rhs: usize) -> Self::Output {
        Self::from(self.0 + rhs)
    }
}

// ========== Va <=> Vpn ==========

impl From<VirtPageNum> for VirtAddr {
    fn from(vpn: VirtPageNum) -> Self {
        Self(vpn.0 << PAGE_SIZE_BITS)
    }
}

// ========== Pa <=> Ppn ==========

impl From<PhysAddr> for PhysPageNum {
    fn from(pa: PhysAddr) -> Self {
        assert_eq!(pa.page_offset(), 0);
        pa.page_number()
    }
}

impl From<PhysPageNum> for PhysAddr {
    fn from(ppn: PhysPageNum) -> Self {
        Self(ppn.0 << PAGE_SIZE_BITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexes() {
        // 2级索引1，1级索引2，0级索引3
        let va = VirtAddr::new((1 << 30) | (2 << 21) | (3 << 12) | 0x123);
        let vpn = va.floor();
        assert_eq!(vpn.index(2), 1);
        assert_eq!(vpn.index(1), 2);
        assert_eq!(vpn.index(0), 3);
        assert_eq!(va.page_offset(), 0x123);
    }

    #[test]
    fn rounding() {
        assert_eq!(page_round_up(0), 0);
        assert_eq!(page_round_up(1), PAGE_SIZE);
        assert_eq!(page_round_up(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(page_round_down(PAGE_SIZE + 37), PAGE_SIZE);
        assert_eq!(VirtAddr::new(2 * PAGE_SIZE - 1).floor(), VirtPageNum::from_raw(1));
        assert_eq!(PhysAddr::from(PAGE_SIZE + 1).ceil(), PhysPageNum::from_raw(2));
    }

    #[test]
    fn range() {
        assert!(VirtAddr::new(MAX_VA - 1).in_range());
        assert!(!VirtAddr::new(MAX_VA).in_range());
    }

    #[test]
    fn satp() {
        let token = PhysPageNum::from_raw(0x8_0001).into_satp();
        assert_eq!(token >> 60, 8);
        assert_eq!(token & ((1 << 44) - 1), 0x8_0001);
    }
}
