use core::fmt;

use crate::address::VirtAddr;

/// 可恢复的错误，交由调用者转化为用户可见的错误码
///
/// 页表损坏、重复映射之类的内部错误不在此列，它们直接 panic。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 物理页帧耗尽
    OutOfMemory,
    /// 地址未映射、越界或不允许用户访问
    BadAddress(VirtAddr),
    /// 在给定长度内没有找到字符串的结尾
    NoTerminator,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::BadAddress(va) => write!(f, "bad address {:#x}", usize::from(*va)),
            Self::NoTerminator => f.write_str("string is not terminated"),
        }
    }
}
