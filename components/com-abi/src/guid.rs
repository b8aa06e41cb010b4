//! 128 位接口标识

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// 标识解析错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuidError {
    #[error("标识长度错误: 期望 36 个字符, 实际 {len}")]
    Length { len: usize },
    #[error("标识位宽错误: 期望 128 位, 实际 {bits} 位")]
    Width { bits: usize },
    #[error("花括号不成对")]
    UnbalancedBraces,
    #[error("位置 {index} 处缺少连字符")]
    Hyphen { index: usize },
    #[error("非法的十六进制字符: {ch:?}")]
    Digit { ch: char },
}

/// 连字符在规范文本中的位置
const HYPHENS: [usize; 4] = [8, 13, 18, 23];

/// 全局唯一标识 (32 位 + 2 x 16 位 + 8 x 8 位)
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const NULL: Guid = Guid::from_u128(0);

    pub const fn from_fields(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    /// 按文本顺序 (大端) 从 128 位整数构造
    pub const fn from_u128(value: u128) -> Self {
        Self {
            data1: (value >> 96) as u32,
            data2: (value >> 80) as u16,
            data3: (value >> 64) as u16,
            data4: (value as u64).to_be_bytes(),
        }
    }

    pub const fn to_u128(self) -> u128 {
        ((self.data1 as u128) << 96)
            | ((self.data2 as u128) << 80)
            | ((self.data3 as u128) << 64)
            | (u64::from_be_bytes(self.data4) as u128)
    }

    /// 解析规范文本, 允许外层花括号, 不区分大小写
    pub fn parse(text: &str) -> Result<Self, GuidError> {
        let inner = if let Some(rest) = text.strip_prefix('{') {
            rest.strip_suffix('}').ok_or(GuidError::UnbalancedBraces)?
        } else if text.ends_with('}') {
            return Err(GuidError::UnbalancedBraces);
        } else {
            text
        };

        if let Some(ch) = inner.chars().find(|c| !c.is_ascii()) {
            return Err(GuidError::Digit { ch });
        }
        if inner.len() != 36 {
            return Err(GuidError::Length { len: inner.len() });
        }
        let raw = inner.as_bytes();
        for index in HYPHENS {
            if raw[index] != b'-' {
                return Err(GuidError::Hyphen { index });
            }
        }

        let digits = [&inner[0..8], &inner[9..13], &inner[14..18], &inner[19..23], &inner[24..36]].concat();
        let bytes = hex::decode(&digits).map_err(|e| match e {
            hex::FromHexError::InvalidHexCharacter { c, .. } => GuidError::Digit { ch: c },
            _ => GuidError::Length { len: inner.len() },
        })?;
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| GuidError::Width { bits: b.len() * 8 })?;
        Ok(Self::from_u128(u128::from_be_bytes(bytes)))
    }

    /// 从内存布局 (各字段小端) 构造, 必须正好 16 字节
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GuidError> {
        let bytes: &[u8; 16] = bytes
            .try_into()
            .map_err(|_| GuidError::Width { bits: bytes.len() * 8 })?;
        let mut data4 = [0u8; 8];
        data4.copy_from_slice(&bytes[8..16]);
        Ok(Self {
            data1: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            data2: u16::from_le_bytes([bytes[4], bytes[5]]),
            data3: u16::from_le_bytes([bytes[6], bytes[7]]),
            data4,
        })
    }

    /// 内存布局字节序列, 与 `from_bytes` 对应
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.data1.to_le_bytes());
        out[4..6].copy_from_slice(&self.data2.to_le_bytes());
        out[6..8].copy_from_slice(&self.data3.to_le_bytes());
        out[8..16].copy_from_slice(&self.data4);
        out
    }

    /// 注册表形式 `{XXXXXXXX-...}`
    pub fn braced(&self) -> String {
        format!("{{{}}}", self)
    }
}

impl FromStr for Guid {
    type Err = GuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "0C733A30-2A1C-11CE-ADE5-00AA0044773D";

    #[test]
    fn test_parse_fields() {
        let g = Guid::parse(STREAM).unwrap();
        assert_eq!(g.data1, 0x0C733A30);
        assert_eq!(g.data2, 0x2A1C);
        assert_eq!(g.data3, 0x11CE);
        assert_eq!(g.data4, [0xAD, 0xE5, 0x00, 0xAA, 0x00, 0x44, 0x77, 0x3D]);
        assert_eq!(g, Guid::from_u128(0x0C733A30_2A1C_11CE_ADE5_00AA0044773D));
    }

    #[test]
    fn test_parse_braced_lowercase() {
        let a = Guid::parse("{0c733a30-2a1c-11ce-ade5-00aa0044773d}").unwrap();
        let b: Guid = STREAM.parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), STREAM);
        assert_eq!(a.braced(), format!("{{{}}}", STREAM));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Guid::parse("{0C733A30-2A1C-11CE-ADE5-00AA0044773D"), Err(GuidError::UnbalancedBraces));
        assert_eq!(Guid::parse("0C733A30-2A1C-11CE-ADE5"), Err(GuidError::Length { len: 23 }));
        assert_eq!(
            Guid::parse("0C733A30+2A1C-11CE-ADE5-00AA0044773D"),
            Err(GuidError::Hyphen { index: 8 })
        );
        assert_eq!(
            Guid::parse("0C733A30-2A1C-11CE-ADE5-00AA0044773G"),
            Err(GuidError::Digit { ch: 'G' })
        );
    }

    #[test]
    fn test_bytes_width() {
        let g = Guid::parse(STREAM).unwrap();
        let bytes = g.to_bytes();
        assert_eq!(bytes[0], 0x30);
        assert_eq!(Guid::from_bytes(&bytes).unwrap(), g);
        assert_eq!(Guid::from_bytes(&bytes[..12]), Err(GuidError::Width { bits: 96 }));
    }

    #[test]
    fn test_u128_roundtrip_equality() {
        let v = 0x0000000C_0000_0000_C000_000000000046u128;
        assert_eq!(Guid::from_u128(v).to_u128(), v);
        assert_ne!(Guid::from_u128(v), Guid::NULL);
    }
}
