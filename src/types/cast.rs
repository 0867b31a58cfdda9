//! Range-checked literal casts.
//!
//! Casts return a tagged outcome so callers decide between folding and
//! deferring the failure to execution.

use thiserror::Error;

use super::{DataType, ScalarValue};

/// Failure outcome of [`cast_scalar`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CastError {
    /// Value does not fit the target type under ANSI semantics.
    #[error("{value} is out of range for {to}")]
    Overflow {
        /// Rendered source value.
        value: String,
        /// Target type.
        to: DataType,
    },
    /// Source text is not a valid literal of the target type.
    #[error("'{value}' cannot be parsed as {to}")]
    Malformed {
        /// Source text.
        value: String,
        /// Target type.
        to: DataType,
    },
    /// This cast is not folded at rewrite time.
    #[error("cast from {from} to {to} is not folded")]
    Unsupported {
        /// Source type.
        from: DataType,
        /// Target type.
        to: DataType,
    },
}

/// Casts a literal to `to`.
///
/// Legacy semantics (`ansi == false`) wrap integral narrowing, saturate
/// float to integral conversions and turn unparsable strings into nulls.
/// ANSI semantics report those cases as errors.
pub fn cast_scalar(value: &ScalarValue, to: &DataType, ansi: bool) -> Result<ScalarValue, CastError> {
    if &value.data_type() == to {
        return Ok(value.clone());
    }
    if value.is_null() {
        return Ok(ScalarValue::Null(to.clone()));
    }
    match value {
        ScalarValue::Boolean(v) if to.is_integral() => integral_from_i64(*v as i64, to, ansi),
        ScalarValue::Byte(v) => from_i64(*v as i64, to, ansi),
        ScalarValue::Short(v) => from_i64(*v as i64, to, ansi),
        ScalarValue::Int(v) => from_i64(*v as i64, to, ansi),
        ScalarValue::Long(v) => from_i64(*v, to, ansi),
        ScalarValue::Float(v) if to.is_integral() || to.is_floating() => {
            from_f64(*v as f64, to, ansi)
        }
        ScalarValue::Double(v) if to.is_integral() || to.is_floating() => from_f64(*v, to, ansi),
        ScalarValue::String(text) => from_str(text, to, ansi),
        _ => Err(unsupported(value, to)),
    }
}

fn unsupported(value: &ScalarValue, to: &DataType) -> CastError {
    CastError::Unsupported {
        from: value.data_type(),
        to: to.clone(),
    }
}

fn from_i64(v: i64, to: &DataType, ansi: bool) -> Result<ScalarValue, CastError> {
    match to {
        DataType::Boolean => Ok(ScalarValue::Boolean(v != 0)),
        DataType::Float => Ok(ScalarValue::Float(v as f32)),
        DataType::Double => Ok(ScalarValue::Double(v as f64)),
        DataType::String => Ok(ScalarValue::String(v.to_string())),
        _ if to.is_integral() => integral_from_i64(v, to, ansi),
        _ => Err(CastError::Unsupported {
            from: DataType::Long,
            to: to.clone(),
        }),
    }
}

fn integral_from_i64(v: i64, to: &DataType, ansi: bool) -> Result<ScalarValue, CastError> {
    let Some((min, max)) = to.integral_bounds() else {
        return Err(CastError::Unsupported {
            from: DataType::Long,
            to: to.clone(),
        });
    };
    if ansi && (v < min || v > max) {
        return Err(CastError::Overflow {
            value: v.to_string(),
            to: to.clone(),
        });
    }
    Ok(match to {
        DataType::Byte => ScalarValue::Byte(v as i8),
        DataType::Short => ScalarValue::Short(v as i16),
        DataType::Int => ScalarValue::Int(v as i32),
        _ => ScalarValue::Long(v),
    })
}

fn from_f64(v: f64, to: &DataType, ansi: bool) -> Result<ScalarValue, CastError> {
    match to {
        DataType::Float => Ok(ScalarValue::Float(v as f32)),
        DataType::Double => Ok(ScalarValue::Double(v)),
        _ => {
            let Some((min, max)) = to.integral_bounds() else {
                return Err(CastError::Unsupported {
                    from: DataType::Double,
                    to: to.clone(),
                });
            };
            let truncated = v.trunc();
            if ansi && (v.is_nan() || truncated < min as f64 || truncated > max as f64) {
                return Err(CastError::Overflow {
                    value: v.to_string(),
                    to: to.clone(),
                });
            }
            // `as` saturates and maps NaN to zero, matching legacy semantics.
            let clamped = (truncated as i64).clamp(min, max);
            integral_from_i64(clamped, to, false)
        }
    }
}

fn from_str(text: &str, to: &DataType, ansi: bool) -> Result<ScalarValue, CastError> {
    let trimmed = text.trim();
    let malformed = || CastError::Malformed {
        value: text.to_string(),
        to: to.clone(),
    };
    let parsed = match to {
        DataType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Some(ScalarValue::Boolean(true)),
            "false" | "f" | "no" | "n" | "0" => Some(ScalarValue::Boolean(false)),
            _ => None,
        },
        _ if to.is_integral() => match trimmed.parse::<i64>() {
            Ok(v) => return integral_from_str(v, text, to, ansi),
            Err(_) => None,
        },
        DataType::Float => trimmed.parse::<f32>().ok().map(ScalarValue::Float),
        DataType::Double => trimmed.parse::<f64>().ok().map(ScalarValue::Double),
        _ => {
            return Err(CastError::Unsupported {
                from: DataType::String,
                to: to.clone(),
            })
        }
    };
    match parsed {
        Some(value) => Ok(value),
        None if ansi => Err(malformed()),
        None => Ok(ScalarValue::Null(to.clone())),
    }
}

fn integral_from_str(v: i64, text: &str, to: &DataType, ansi: bool) -> Result<ScalarValue, CastError> {
    let (min, max) = to.integral_bounds().unwrap_or((i64::MIN, i64::MAX));
    if v < min || v > max {
        // Out-of-range strings become null in legacy mode rather than wrapping.
        return if ansi {
            Err(CastError::Overflow {
                value: text.to_string(),
                to: to.clone(),
            })
        } else {
            Ok(ScalarValue::Null(to.clone()))
        };
    }
    integral_from_i64(v, to, false)
}
