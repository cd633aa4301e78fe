//! Wire-format constants for statistics archives.
//!
//! Archives are written big-endian. The token stream layout:
//! ```text
//! HEADER (77)        version:i8 start:i64 system_id:i64 system_start:i64
//!                    tz_offset:i32 tz_name:utf dir:utf product:utf os:utf machine:utf
//! RESOURCE_TYPE (1)  id:i32 name:utf desc:utf stat_count:u16
//!                    stat_count × { name:utf type:i8 counter:bool [larger_better:bool] units:utf desc:utf }
//! INST_CREATE (2)    id:i32 name:utf numeric_id:i64 type_id:i32
//! INST_INIT (4)      INST_CREATE fields + one initial value per stat
//! INST_DELETE (3)    id:i32
//! SAMPLE (0)         time_delta { inst_id { stat_offset value }* 255 }* inst_id=255
//! ```

use serde::Serialize;

use crate::error::{ArchiveError, Result};

pub const SAMPLE_TOKEN: u8 = 0;
pub const RESOURCE_TYPE_TOKEN: u8 = 1;
pub const RESOURCE_INSTANCE_CREATE_TOKEN: u8 = 2;
pub const RESOURCE_INSTANCE_DELETE_TOKEN: u8 = 3;
pub const RESOURCE_INSTANCE_INITIALIZE_TOKEN: u8 = 4;
pub const HEADER_TOKEN: u8 = 77;

/// Newest archive version this decoder understands.
pub const ARCHIVE_VERSION: u8 = 4;
/// Oldest archive version this decoder understands.
pub const MIN_ARCHIVE_VERSION: u8 = 2;
/// First version that stores the "larger is better" flag per stat.
pub const LARGER_BETTER_VERSION: u8 = 4;

pub const ILLEGAL_RESOURCE_INST_ID: i32 = -1;
pub const MAX_BYTE_RESOURCE_INST_ID: u8 = 252;
pub const SHORT_RESOURCE_INST_ID_TOKEN: u8 = 253;
pub const INT_RESOURCE_INST_ID_TOKEN: u8 = 254;
pub const ILLEGAL_RESOURCE_INST_ID_TOKEN: u8 = 255;

pub const MAX_SHORT_TIMESTAMP: u16 = 65534;
pub const INT_TIMESTAMP_TOKEN: u16 = 65535;

pub const ILLEGAL_STAT_OFFSET: u8 = 255;

/// Escape byte announcing a 2-byte compact value.
pub const COMPACT_VALUE_2_TOKEN: i8 = i8::MIN;
/// Smallest compact value stored in a single byte; lower bytes are escapes.
pub const MIN_1BYTE_COMPACT_VALUE: i64 = i8::MIN as i64 + 7;
pub const MAX_1BYTE_COMPACT_VALUE: i64 = i8::MAX as i64;
pub const MIN_2BYTE_COMPACT_VALUE: i64 = i16::MIN as i64;
pub const MAX_2BYTE_COMPACT_VALUE: i64 = i16::MAX as i64;

/// Wire type of a stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeCode {
    Boolean,
    Char,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    WChar,
}

impl TypeCode {
    pub fn from_wire(code: i8) -> Result<Self> {
        Ok(match code {
            1 => TypeCode::Boolean,
            2 => TypeCode::Char,
            3 => TypeCode::Byte,
            4 => TypeCode::Short,
            5 => TypeCode::Int,
            6 => TypeCode::Long,
            7 => TypeCode::Float,
            8 => TypeCode::Double,
            12 => TypeCode::WChar,
            other => return Err(ArchiveError::UnknownTypeCode(other)),
        })
    }

    pub fn to_wire(self) -> i8 {
        match self {
            TypeCode::Boolean => 1,
            TypeCode::Char => 2,
            TypeCode::Byte => 3,
            TypeCode::Short => 4,
            TypeCode::Int => 5,
            TypeCode::Long => 6,
            TypeCode::Float => 7,
            TypeCode::Double => 8,
            TypeCode::WChar => 12,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeCode::Boolean => "boolean",
            TypeCode::Char => "char",
            TypeCode::Byte => "byte",
            TypeCode::Short => "short",
            TypeCode::Int => "int",
            TypeCode::Long => "long",
            TypeCode::Float => "float",
            TypeCode::Double => "double",
            TypeCode::WChar => "wchar",
        }
    }

    /// Converts a stored bit pattern into the numeric value it represents.
    ///
    /// Integral types are cast directly; `Float` and `Double` reinterpret the
    /// low 32 / all 64 bits as IEEE-754.
    pub fn bits_to_f64(self, bits: i64) -> f64 {
        match self {
            TypeCode::Float => f32::from_bits(bits as u32) as f64,
            TypeCode::Double => f64::from_bits(bits as u64),
            _ => bits as f64,
        }
    }
}

impl std::fmt::Display for TypeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
