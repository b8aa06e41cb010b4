//! 32 位状态码

use std::fmt;

/// 每个二进制方法调用的返回值: 最高位为 1 表示失败
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HResult(pub i32);

impl HResult {
    pub const fn from_u32(code: u32) -> Self {
        Self(code as i32)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    /// 非负值都算成功 (包括 S_FALSE 之类的成功变体)
    pub const fn is_ok(self) -> bool {
        self.0 >= 0
    }

    pub const fn is_err(self) -> bool {
        self.0 < 0
    }

    /// 已知状态码的符号名
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            S_OK => "S_OK",
            S_FALSE => "S_FALSE",
            E_NOTIMPL => "E_NOTIMPL",
            E_NOINTERFACE => "E_NOINTERFACE",
            E_POINTER => "E_POINTER",
            E_FAIL => "E_FAIL",
            E_UNEXPECTED => "E_UNEXPECTED",
            E_INVALIDARG => "E_INVALIDARG",
            E_OUTOFMEMORY => "E_OUTOFMEMORY",
            STG_E_INVALIDFUNCTION => "STG_E_INVALIDFUNCTION",
            STG_E_INVALIDPOINTER => "STG_E_INVALIDPOINTER",
            CLASS_E_CLASSNOTAVAILABLE => "CLASS_E_CLASSNOTAVAILABLE",
            REGDB_E_CLASSNOTREG => "REGDB_E_CLASSNOTREG",
            _ => return None,
        };
        Some(name)
    }
}

pub const S_OK: HResult = HResult(0);
pub const S_FALSE: HResult = HResult(1);
pub const E_NOTIMPL: HResult = HResult::from_u32(0x8000_4001);
pub const E_NOINTERFACE: HResult = HResult::from_u32(0x8000_4002);
pub const E_POINTER: HResult = HResult::from_u32(0x8000_4003);
pub const E_FAIL: HResult = HResult::from_u32(0x8000_4005);
pub const E_UNEXPECTED: HResult = HResult::from_u32(0x8000_FFFF);
pub const E_INVALIDARG: HResult = HResult::from_u32(0x8007_0057);
pub const E_OUTOFMEMORY: HResult = HResult::from_u32(0x8007_000E);
pub const STG_E_INVALIDFUNCTION: HResult = HResult::from_u32(0x8003_0001);
pub const STG_E_INVALIDPOINTER: HResult = HResult::from_u32(0x8003_0009);
pub const CLASS_E_CLASSNOTAVAILABLE: HResult = HResult::from_u32(0x8004_0111);
pub const REGDB_E_CLASSNOTREG: HResult = HResult::from_u32(0x8004_0154);

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010X}", self.0 as u32)?;
        if let Some(name) = self.name() {
            write!(f, " ({})", name)?;
        }
        Ok(())
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HResult({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_bit_is_failure() {
        assert!(S_OK.is_ok());
        assert!(S_FALSE.is_ok());
        assert!(HResult(0x7fff_ffff).is_ok());
        assert!(E_FAIL.is_err());
        assert!(STG_E_INVALIDFUNCTION.is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(E_FAIL.to_string(), "0x80004005 (E_FAIL)");
        assert_eq!(HResult(5).to_string(), "0x00000005");
    }
}
