//! 常用接口标识

use crate::Guid;

/// {00000000-0000-0000-C000-000000000046}
pub const IID_IUNKNOWN: Guid = Guid::from_u128(0x00000000_0000_0000_C000_000000000046);

/// {0C733A30-2A1C-11CE-ADE5-00AA0044773D}
pub const IID_ISEQUENTIALSTREAM: Guid = Guid::from_u128(0x0C733A30_2A1C_11CE_ADE5_00AA0044773D);

/// {0000000C-0000-0000-C000-000000000046}
pub const IID_ISTREAM: Guid = Guid::from_u128(0x0000000C_0000_0000_C000_000000000046);
