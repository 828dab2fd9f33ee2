//! Element type tags for array payloads

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::StreamError;

/// Supported array element types.
///
/// Tags match the names numpy prints for `str(array.dtype)`, so headers written
/// by Python producers decode without translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 8-bit boolean (0 or 1)
    Bool,
    /// 8-bit signed integer
    Int8,
    /// 8-bit unsigned integer
    UInt8,
    /// 16-bit signed integer
    Int16,
    /// 16-bit unsigned integer
    UInt16,
    /// 32-bit signed integer
    Int32,
    /// 32-bit unsigned integer
    UInt32,
    /// 64-bit signed integer
    Int64,
    /// 64-bit unsigned integer
    UInt64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
}

impl DType {
    /// Every supported element type.
    pub const ALL: [DType; 11] = [
        DType::Bool,
        DType::Int8,
        DType::UInt8,
        DType::Int16,
        DType::UInt16,
        DType::Int32,
        DType::UInt32,
        DType::Int64,
        DType::UInt64,
        DType::Float32,
        DType::Float64,
    ];

    /// Returns the size in bytes of one element.
    pub const fn size(&self) -> usize {
        match self {
            DType::Bool | DType::Int8 | DType::UInt8 => 1,
            DType::Int16 | DType::UInt16 => 2,
            DType::Int32 | DType::UInt32 | DType::Float32 => 4,
            DType::Int64 | DType::UInt64 | DType::Float64 => 8,
        }
    }

    /// Wire tag for this type.
    pub const fn tag(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::UInt8 => "uint8",
            DType::Int16 => "int16",
            DType::UInt16 => "uint16",
            DType::Int32 => "int32",
            DType::UInt32 => "uint32",
            DType::Int64 => "int64",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    /// Whether the type is a floating-point type.
    pub const fn is_float(&self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for DType {
    type Err = StreamError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        DType::ALL
            .into_iter()
            .find(|dtype| dtype.tag() == tag)
            .ok_or_else(|| StreamError::malformed(format!("unrecognized dtype '{tag}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_back_to_the_same_type() {
        for dtype in DType::ALL {
            assert_eq!(dtype.tag().parse::<DType>().unwrap(), dtype);
        }
    }

    #[test]
    fn sizes_match_numpy_itemsize() {
        assert_eq!(DType::UInt8.size(), 1);
        assert_eq!(DType::Int16.size(), 2);
        assert_eq!(DType::Float32.size(), 4);
        assert_eq!(DType::Float64.size(), 8);
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let err = "complex128".parse::<DType>().unwrap_err();
        assert!(matches!(err, StreamError::MalformedMessage { .. }));
        assert!(err.to_string().contains("complex128"));
    }
}
