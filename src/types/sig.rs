use std::fmt;
use std::ops::BitOr;

use super::{DataType, MAX_GPU_DECIMAL_PRECISION};

/// Set of data types a GPU implementation accepts.
///
/// Nested types are accepted only when their bit is present and every child
/// type is accepted by the same signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeSig {
    mask: u32,
}

const NULL: u32 = 1 << 0;
const BOOLEAN: u32 = 1 << 1;
const BYTE: u32 = 1 << 2;
const SHORT: u32 = 1 << 3;
const INT: u32 = 1 << 4;
const LONG: u32 = 1 << 5;
const FLOAT: u32 = 1 << 6;
const DOUBLE: u32 = 1 << 7;
const STRING: u32 = 1 << 8;
const BINARY: u32 = 1 << 9;
const DATE: u32 = 1 << 10;
const TIMESTAMP: u32 = 1 << 11;
const DECIMAL: u32 = 1 << 12;
const ARRAY: u32 = 1 << 13;
const MAP: u32 = 1 << 14;
const STRUCT: u32 = 1 << 15;

const NAMES: [(u32, &str); 16] = [
    (NULL, "null"),
    (BOOLEAN, "boolean"),
    (BYTE, "tinyint"),
    (SHORT, "smallint"),
    (INT, "int"),
    (LONG, "bigint"),
    (FLOAT, "float"),
    (DOUBLE, "double"),
    (STRING, "string"),
    (BINARY, "binary"),
    (DATE, "date"),
    (TIMESTAMP, "timestamp"),
    (DECIMAL, "decimal"),
    (ARRAY, "array"),
    (MAP, "map"),
    (STRUCT, "struct"),
];

impl TypeSig {
    /// Accepts nothing.
    pub const NONE: TypeSig = TypeSig { mask: 0 };
    /// Boolean only.
    pub const BOOLEAN: TypeSig = TypeSig { mask: BOOLEAN };
    /// Strings only.
    pub const STRING: TypeSig = TypeSig { mask: STRING };
    /// Timestamps only.
    pub const TIMESTAMP: TypeSig = TypeSig { mask: TIMESTAMP };
    /// Dates only.
    pub const DATE: TypeSig = TypeSig { mask: DATE };
    /// Tinyint through bigint.
    pub const INTEGRAL: TypeSig = TypeSig {
        mask: BYTE | SHORT | INT | LONG,
    };
    /// Float and double.
    pub const FP: TypeSig = TypeSig {
        mask: FLOAT | DOUBLE,
    };
    /// Integral, floating and decimal.
    pub const NUMERIC: TypeSig = TypeSig {
        mask: BYTE | SHORT | INT | LONG | FLOAT | DOUBLE | DECIMAL,
    };
    /// Flat types the device supports for most operators.
    pub const COMMON: TypeSig = TypeSig {
        mask: NULL
            | BOOLEAN
            | BYTE
            | SHORT
            | INT
            | LONG
            | FLOAT
            | DOUBLE
            | STRING
            | DATE
            | TIMESTAMP
            | DECIMAL,
    };
    /// Arrays, maps and structs.
    pub const NESTED: TypeSig = TypeSig {
        mask: ARRAY | MAP | STRUCT,
    };

    /// Returns true when `ty` is accepted.
    pub fn supports(&self, ty: &DataType) -> bool {
        self.reason_not_supported(ty).is_none()
    }

    /// Explains why `ty` is rejected, or `None` when accepted.
    pub fn reason_not_supported(&self, ty: &DataType) -> Option<String> {
        let bit = bit_for(ty);
        if self.mask & bit == 0 {
            return Some(format!("{ty} is not supported"));
        }
        match ty {
            DataType::Decimal { precision, .. } if *precision > MAX_GPU_DECIMAL_PRECISION => {
                Some(format!(
                    "{ty} exceeds the maximum supported decimal precision of {MAX_GPU_DECIMAL_PRECISION}"
                ))
            }
            DataType::Array(elem) => self
                .reason_not_supported(elem)
                .map(|inner| format!("{ty} child {inner}")),
            DataType::Map(key, value) => self
                .reason_not_supported(key)
                .or_else(|| self.reason_not_supported(value))
                .map(|inner| format!("{ty} child {inner}")),
            DataType::Struct(fields) => fields
                .iter()
                .find_map(|field| self.reason_not_supported(field))
                .map(|inner| format!("{ty} child {inner}")),
            _ => None,
        }
    }

    /// Removes the types accepted by `other`.
    pub const fn without(self, other: TypeSig) -> TypeSig {
        TypeSig {
            mask: self.mask & !other.mask,
        }
    }
}

fn bit_for(ty: &DataType) -> u32 {
    match ty {
        DataType::Null => NULL,
        DataType::Boolean => BOOLEAN,
        DataType::Byte => BYTE,
        DataType::Short => SHORT,
        DataType::Int => INT,
        DataType::Long => LONG,
        DataType::Float => FLOAT,
        DataType::Double => DOUBLE,
        DataType::String => STRING,
        DataType::Binary => BINARY,
        DataType::Date => DATE,
        DataType::Timestamp => TIMESTAMP,
        DataType::Decimal { .. } => DECIMAL,
        DataType::Array(_) => ARRAY,
        DataType::Map(_, _) => MAP,
        DataType::Struct(_) => STRUCT,
    }
}

impl BitOr for TypeSig {
    type Output = TypeSig;

    fn bitor(self, rhs: TypeSig) -> TypeSig {
        TypeSig {
            mask: self.mask | rhs.mask,
        }
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(bit, _)| self.mask & bit != 0)
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_decimal_is_rejected() {
        let narrow = DataType::Decimal {
            precision: 18,
            scale: 2,
        };
        let wide = DataType::Decimal {
            precision: 38,
            scale: 2,
        };
        assert!(TypeSig::NUMERIC.supports(&narrow));
        let reason = TypeSig::NUMERIC
            .reason_not_supported(&wide)
            .expect("wide decimal rejected");
        assert!(reason.contains("maximum supported decimal precision of 18"));
    }

    #[test]
    fn nested_children_must_be_supported() {
        let sig = TypeSig::COMMON | TypeSig::NESTED;
        assert!(sig.supports(&DataType::Array(Box::new(DataType::Int))));
        let reason = sig
            .reason_not_supported(&DataType::Array(Box::new(DataType::Binary)))
            .expect("binary child rejected");
        assert_eq!(reason, "array<binary> child binary is not supported");
    }

    #[test]
    fn display_lists_members() {
        assert_eq!(TypeSig::FP.to_string(), "float, double");
        assert_eq!(TypeSig::NONE.to_string(), "none");
        assert_eq!(
            TypeSig::NUMERIC.without(TypeSig::FP).to_string(),
            "tinyint, smallint, int, bigint, decimal"
        );
    }
}
