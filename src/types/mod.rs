#![forbid(unsafe_code)]

//! Logical data types and literal values shared by host plans and GPU descriptions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Literal casts evaluated at plan-rewrite time.
pub mod cast;
/// Supported-type signatures declared by rules.
pub mod sig;

pub use cast::{cast_scalar, CastError};
pub use sig::TypeSig;

/// Widest decimal precision the device kernels handle.
pub const MAX_GPU_DECIMAL_PRECISION: u8 = 18;

/// Logical column or expression type as reported by the host engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Untyped null.
    Null,
    /// Boolean.
    Boolean,
    /// 8-bit signed integer.
    Byte,
    /// 16-bit signed integer.
    Short,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Raw bytes.
    Binary,
    /// Days since the epoch.
    Date,
    /// Microseconds since the epoch, session time zone aware.
    Timestamp,
    /// Fixed-point decimal.
    Decimal {
        /// Total digits.
        precision: u8,
        /// Digits after the point.
        scale: i8,
    },
    /// Variable-length list.
    Array(Box<DataType>),
    /// Key/value map.
    Map(Box<DataType>, Box<DataType>),
    /// Positional struct.
    Struct(Vec<DataType>),
}

impl DataType {
    /// 8, 16, 32 or 64-bit integer types.
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            DataType::Byte | DataType::Short | DataType::Int | DataType::Long
        )
    }

    /// Float or double.
    pub fn is_floating(&self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    /// Arrays, maps and structs.
    pub fn is_nested(&self) -> bool {
        matches!(
            self,
            DataType::Array(_) | DataType::Map(_, _) | DataType::Struct(_)
        )
    }

    /// Types the device sort kernels can order.
    pub fn is_orderable(&self) -> bool {
        !self.is_nested()
    }

    /// Types the device hash kernels accept as grouping or join keys.
    pub fn is_hashable(&self) -> bool {
        match self {
            DataType::Map(_, _) | DataType::Array(_) => false,
            DataType::Struct(fields) => fields.iter().all(DataType::is_hashable),
            _ => true,
        }
    }

    /// True when values depend on the session time zone.
    pub fn is_zoned(&self) -> bool {
        matches!(self, DataType::Timestamp)
    }

    /// Minimum and maximum value representable by an integral type.
    pub fn integral_bounds(&self) -> Option<(i64, i64)> {
        match self {
            DataType::Byte => Some((i8::MIN as i64, i8::MAX as i64)),
            DataType::Short => Some((i16::MIN as i64, i16::MAX as i64)),
            DataType::Int => Some((i32::MIN as i64, i32::MAX as i64)),
            DataType::Long => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Null => write!(f, "null"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::Byte => write!(f, "tinyint"),
            DataType::Short => write!(f, "smallint"),
            DataType::Int => write!(f, "int"),
            DataType::Long => write!(f, "bigint"),
            DataType::Float => write!(f, "float"),
            DataType::Double => write!(f, "double"),
            DataType::String => write!(f, "string"),
            DataType::Binary => write!(f, "binary"),
            DataType::Date => write!(f, "date"),
            DataType::Timestamp => write!(f, "timestamp"),
            DataType::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            DataType::Array(elem) => write!(f, "array<{elem}>"),
            DataType::Map(key, value) => write!(f, "map<{key},{value}>"),
            DataType::Struct(fields) => {
                write!(f, "struct<")?;
                for (idx, field) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, ">")
            }
        }
    }
}

/// Literal value carried by host literals and folded GPU literals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarValue {
    /// Typed null.
    Null(DataType),
    /// Boolean literal.
    Boolean(bool),
    /// Tinyint literal.
    Byte(i8),
    /// Smallint literal.
    Short(i16),
    /// Int literal.
    Int(i32),
    /// Bigint literal.
    Long(i64),
    /// Float literal.
    Float(f32),
    /// Double literal.
    Double(f64),
    /// String literal.
    String(String),
    /// Date literal (days since epoch).
    Date(i32),
    /// Timestamp literal (microseconds since epoch).
    Timestamp(i64),
}

impl ScalarValue {
    /// Type of the literal.
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Null(ty) => ty.clone(),
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Byte(_) => DataType::Byte,
            ScalarValue::Short(_) => DataType::Short,
            ScalarValue::Int(_) => DataType::Int,
            ScalarValue::Long(_) => DataType::Long,
            ScalarValue::Float(_) => DataType::Float,
            ScalarValue::Double(_) => DataType::Double,
            ScalarValue::String(_) => DataType::String,
            ScalarValue::Date(_) => DataType::Date,
            ScalarValue::Timestamp(_) => DataType::Timestamp,
        }
    }

    /// True for typed nulls.
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null(_))
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null(_) => write!(f, "null"),
            ScalarValue::Boolean(v) => write!(f, "{v}"),
            ScalarValue::Byte(v) => write!(f, "{v}"),
            ScalarValue::Short(v) => write!(f, "{v}"),
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::Long(v) => write!(f, "{v}L"),
            ScalarValue::Float(v) => write!(f, "{v}F"),
            ScalarValue::Double(v) => write!(f, "{v}D"),
            ScalarValue::String(v) => write!(f, "'{v}'"),
            ScalarValue::Date(v) => write!(f, "DATE {v}"),
            ScalarValue::Timestamp(v) => write!(f, "TIMESTAMP {v}"),
        }
    }
}
