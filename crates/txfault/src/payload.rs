//! Payload encoding — typed client values to owned failure payloads.
//!
//! A failure point may carry extra context ("failinfo") that the
//! injector hands back to the failing call site alongside the fail
//! number.  The client supplies it as a dynamically-typed [`Value`];
//! [`encode`] turns that into an immutable [`Payload`] plus a textual
//! description used only for introspection.
//!
//! # Supported types
//!
//! | Declared type       | Payload variant            |
//! |---------------------|----------------------------|
//! | `boolean`           | [`Payload::Bool`]          |
//! | `smallint`          | [`Payload::Int2`]          |
//! | `integer`           | [`Payload::Int4`]          |
//! | `bigint`            | [`Payload::Int8`]          |
//! | `real`              | [`Payload::Float4`]        |
//! | `double precision`  | [`Payload::Float8`]        |
//! | `numeric`           | [`Payload::Float8`] (lossy)|
//! | `"char"`            | [`Payload::Char`]          |
//! | `text`              | [`Payload::Text`]          |

use crate::error::{FaultError, Result};
use bigdecimal::{BigDecimal, ToPrimitive};
use std::fmt;
use std::str::FromStr;

/// A dynamically-typed value supplied by a client at registration time.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No failinfo; the point is registered without a payload.
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    /// Decimal literal of any precision, kept as the client wrote it.
    Numeric(String),
    /// Single-byte character.
    Char(u8),
    Text(String),
    /// A value whose type the encoder does not handle.
    Other { type_name: String },
}

impl Value {
    /// Build a value from a declared type name and a textual literal.
    ///
    /// Type names are matched case-insensitively against the canonical
    /// names and their common aliases.  An unknown type name yields
    /// [`Value::Other`], which [`encode`] rejects.
    ///
    /// ```
    /// use txfault::payload::Value;
    ///
    /// assert_eq!(Value::parse("int8", "-7").unwrap(), Value::Int8(-7));
    /// assert_eq!(Value::parse("bool", "on").unwrap(), Value::Bool(true));
    /// ```
    pub fn parse(type_name: &str, literal: &str) -> Result<Self> {
        let normalized = type_name.trim().to_ascii_lowercase();
        let invalid = || FaultError::InvalidLiteral {
            type_name: type_name.to_string(),
            literal: literal.to_string(),
        };
        let trimmed = literal.trim();

        let value = match normalized.as_str() {
            "boolean" | "bool" => Value::Bool(parse_bool(trimmed).ok_or_else(invalid)?),
            "smallint" | "int2" => Value::Int2(trimmed.parse().map_err(|_| invalid())?),
            "integer" | "int" | "int4" => Value::Int4(trimmed.parse().map_err(|_| invalid())?),
            "bigint" | "int8" => Value::Int8(trimmed.parse().map_err(|_| invalid())?),
            "real" | "float4" => Value::Float4(parse_float(trimmed).ok_or_else(invalid)?),
            "double precision" | "float8" => {
                Value::Float8(parse_float(trimmed).ok_or_else(invalid)?)
            }
            "numeric" | "decimal" => {
                BigDecimal::from_str(trimmed).map_err(|_| invalid())?;
                Value::Numeric(trimmed.to_string())
            }
            // Only the first byte is kept; an empty literal is NUL.  Bare
            // `char` is character(1), which is not supported.
            "\"char\"" => Value::Char(literal.bytes().next().unwrap_or(0)),
            "text" => Value::Text(literal.to_string()),
            _ => Value::Other {
                type_name: type_name.to_string(),
            },
        };
        Ok(value)
    }

    /// Canonical name of this value's declared type.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "unknown",
            Value::Bool(_) => "boolean",
            Value::Int2(_) => "smallint",
            Value::Int4(_) => "integer",
            Value::Int8(_) => "bigint",
            Value::Float4(_) => "real",
            Value::Float8(_) => "double precision",
            Value::Numeric(_) => "numeric",
            Value::Char(_) => "\"char\"",
            Value::Text(_) => "text",
            Value::Other { type_name } => type_name,
        }
    }
}

/// Parse a float, rejecting finite literals that overflow to infinity.
fn parse_float<F>(literal: &str) -> Option<F>
where
    F: FromStr + Copy + Into<f64>,
{
    let value: F = literal.parse().ok()?;
    let spelled_infinite = literal
        .trim_start_matches(['+', '-'])
        .to_ascii_lowercase()
        .starts_with("inf");
    if value.into().is_infinite() && !spelled_infinite {
        return None;
    }
    Some(value)
}

fn parse_bool(literal: &str) -> Option<bool> {
    match literal.to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Some(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Storage for a 64-bit integer payload.
///
/// The injector's calling convention passes failinfo as a single
/// pointer-sized word.  Where that word is at least 64 bits wide the
/// integer travels in the word itself, bit for bit; elsewhere it is
/// boxed and the word would point at the copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Int8Slot {
    Inline(usize),
    Boxed(Box<i64>),
}

impl Int8Slot {
    fn new(value: i64) -> Self {
        #[cfg(target_pointer_width = "64")]
        {
            Int8Slot::Inline(value as usize)
        }
        #[cfg(not(target_pointer_width = "64"))]
        {
            Int8Slot::Boxed(Box::new(value))
        }
    }

    /// The stored integer.
    pub fn get(&self) -> i64 {
        match self {
            Int8Slot::Inline(word) => *word as i64,
            Int8Slot::Boxed(value) => **value,
        }
    }
}

/// Owned, immutable failinfo attached to a failure point.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(Int8Slot),
    Float4(f32),
    Float8(f64),
    Char(u8),
    Text(Box<str>),
}

impl Payload {
    /// Opaque native-endian byte image of the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Bool(b) => vec![u8::from(*b)],
            Payload::Int2(v) => v.to_ne_bytes().to_vec(),
            Payload::Int4(v) => v.to_ne_bytes().to_vec(),
            Payload::Int8(slot) => slot.get().to_ne_bytes().to_vec(),
            Payload::Float4(v) => v.to_ne_bytes().to_vec(),
            Payload::Float8(v) => v.to_ne_bytes().to_vec(),
            Payload::Char(c) => vec![*c],
            Payload::Text(s) => s.as_bytes().to_vec(),
        }
    }

    /// The by-value pointer word, for an inline 64-bit integer.
    pub fn slot_word(&self) -> Option<usize> {
        match self {
            Payload::Int8(Int8Slot::Inline(word)) => Some(*word),
            _ => None,
        }
    }

    /// The stored integer, for integer payloads of any width.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Payload::Int2(v) => Some(i64::from(*v)),
            Payload::Int4(v) => Some(i64::from(*v)),
            Payload::Int8(slot) => Some(slot.get()),
            _ => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Bool(b) => write!(f, "{b}"),
            Payload::Int2(v) => write!(f, "{v}"),
            Payload::Int4(v) => write!(f, "{v}"),
            Payload::Int8(slot) => write!(f, "{}", slot.get()),
            Payload::Float4(v) => write!(f, "{v}"),
            Payload::Float8(v) => write!(f, "{v}"),
            Payload::Char(c) => write!(f, "{}", char::from(*c)),
            Payload::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Result of [`encode`]: the payload (absent for [`Value::Null`]) and a
/// rendering of the value as the client supplied it.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPayload {
    pub payload: Option<Payload>,
    pub description: String,
}

/// Encode a client value into an owned payload and its description.
///
/// Fails with [`FaultError::UnsupportedPayloadType`] for values of an
/// unrecognized type; nothing is allocated in that case.
///
/// ```
/// use txfault::payload::{encode, Value};
///
/// let encoded = encode(&Value::Int8(9_000_000_000)).unwrap();
/// assert_eq!(encoded.description, "9000000000");
/// ```
pub fn encode(value: &Value) -> Result<EncodedPayload> {
    let (payload, description) = match value {
        Value::Null => (None, "NULL".to_string()),
        Value::Bool(b) => (Some(Payload::Bool(*b)), b.to_string()),
        Value::Int2(v) => (Some(Payload::Int2(*v)), v.to_string()),
        Value::Int4(v) => (Some(Payload::Int4(*v)), v.to_string()),
        Value::Int8(v) => (Some(Payload::Int8(Int8Slot::new(*v))), v.to_string()),
        Value::Float4(v) => (Some(Payload::Float4(*v)), v.to_string()),
        Value::Float8(v) => (Some(Payload::Float8(*v)), v.to_string()),
        Value::Numeric(text) => {
            let invalid = || FaultError::InvalidLiteral {
                type_name: "numeric".to_string(),
                literal: text.clone(),
            };
            let decimal = BigDecimal::from_str(text).map_err(|_| invalid())?;
            let as_float = text
                .parse::<f64>()
                .ok()
                .or_else(|| decimal.to_f64())
                .ok_or_else(invalid)?;
            (Some(Payload::Float8(as_float)), text.clone())
        }
        Value::Char(c) => (Some(Payload::Char(*c)), char::from(*c).to_string()),
        Value::Text(s) => (Some(Payload::Text(s.as_str().into())), s.clone()),
        Value::Other { type_name } => {
            return Err(FaultError::UnsupportedPayloadType {
                type_name: type_name.clone(),
            })
        }
    };
    Ok(EncodedPayload {
        payload,
        description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int8_description_is_decimal_string() {
        for v in [0i64, -1, 42, i64::MIN, i64::MAX] {
            let encoded = encode(&Value::Int8(v)).unwrap();
            assert_eq!(encoded.description, v.to_string());
            assert_eq!(encoded.payload.unwrap().as_i64(), Some(v));
        }
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn int8_travels_by_value_on_wide_pointers() {
        let encoded = encode(&Value::Int8(-2)).unwrap();
        let payload = encoded.payload.unwrap();
        assert!(matches!(payload, Payload::Int8(Int8Slot::Inline(_))));
        assert_eq!(payload.slot_word(), Some(usize::MAX - 1));
    }

    #[test]
    fn numeric_becomes_float8_but_keeps_text() {
        let value = Value::parse("numeric", "3.14159265358979323846").unwrap();
        let encoded = encode(&value).unwrap();
        assert_eq!(encoded.description, "3.14159265358979323846");
        match encoded.payload {
            Some(Payload::Float8(f)) => assert!((f - std::f64::consts::PI).abs() < 1e-12),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn numeric_beyond_fixed_precision_is_accepted() {
        let big = "100000000000000000000000000000000";
        let encoded = encode(&Value::parse("numeric", big).unwrap()).unwrap();
        assert_eq!(encoded.description, big);
        assert_eq!(encoded.payload, Some(Payload::Float8(1e32)));

        let tiny = "0.0000000000000000000000000000001";
        let encoded = encode(&Value::parse("decimal", tiny).unwrap()).unwrap();
        assert_eq!(encoded.description, tiny);
        assert_eq!(encoded.payload, Some(Payload::Float8(1e-31)));
    }

    #[test]
    fn numeric_rejects_garbage() {
        assert!(matches!(
            Value::parse("numeric", "12abc"),
            Err(FaultError::InvalidLiteral { .. })
        ));
        assert!(matches!(
            encode(&Value::Numeric("not a number".into())),
            Err(FaultError::InvalidLiteral { .. })
        ));
    }

    #[test]
    fn float_overflow_is_rejected() {
        assert!(matches!(
            Value::parse("real", "1e40"),
            Err(FaultError::InvalidLiteral { .. })
        ));
        assert!(matches!(
            Value::parse("float8", "-1e400"),
            Err(FaultError::InvalidLiteral { .. })
        ));
        assert_eq!(
            Value::parse("real", "-Infinity").unwrap(),
            Value::Float4(f32::NEG_INFINITY)
        );
        assert_eq!(
            Value::parse("float8", "inf").unwrap(),
            Value::Float8(f64::INFINITY)
        );
        assert_eq!(Value::parse("float8", "1e300").unwrap(), Value::Float8(1e300));
    }

    #[test]
    fn bare_char_is_unsupported() {
        for type_name in ["char", "bpchar", "character"] {
            let value = Value::parse(type_name, "x").unwrap();
            assert_eq!(
                encode(&value),
                Err(FaultError::UnsupportedPayloadType {
                    type_name: type_name.into()
                })
            );
        }
    }

    #[test]
    fn text_is_copied() {
        let mut source = String::from("disk full");
        let encoded = encode(&Value::Text(source.clone())).unwrap();
        source.clear();
        assert_eq!(encoded.payload, Some(Payload::Text("disk full".into())));
        assert_eq!(encoded.description, "disk full");
    }

    #[test]
    fn char_keeps_first_byte() {
        let value = Value::parse("\"char\"", "xyz").unwrap();
        assert_eq!(value, Value::Char(b'x'));
        let encoded = encode(&value).unwrap();
        assert_eq!(encoded.description, "x");
        assert_eq!(encoded.payload.unwrap().to_bytes(), vec![b'x']);
    }

    #[test]
    fn null_has_no_payload() {
        let encoded = encode(&Value::Null).unwrap();
        assert!(encoded.payload.is_none());
        assert_eq!(encoded.description, "NULL");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let value = Value::parse("jsonb", "{}").unwrap();
        assert_eq!(value.type_name(), "jsonb");
        assert_eq!(
            encode(&value),
            Err(FaultError::UnsupportedPayloadType {
                type_name: "jsonb".into()
            })
        );
    }

    #[test]
    fn parse_aliases_and_bools() {
        assert_eq!(Value::parse("INTEGER", " 12 ").unwrap(), Value::Int4(12));
        assert_eq!(Value::parse("smallint", "-3").unwrap(), Value::Int2(-3));
        assert_eq!(Value::parse("float4", "1.5").unwrap(), Value::Float4(1.5));
        assert_eq!(
            Value::parse("double precision", "2.25").unwrap(),
            Value::Float8(2.25)
        );
        assert_eq!(Value::parse("boolean", "f").unwrap(), Value::Bool(false));
        assert_eq!(Value::parse("bool", "YES").unwrap(), Value::Bool(true));
    }

    #[test]
    fn parse_rejects_bad_literals() {
        assert!(matches!(
            Value::parse("int2", "70000"),
            Err(FaultError::InvalidLiteral { .. })
        ));
        assert!(matches!(
            Value::parse("boolean", "maybe"),
            Err(FaultError::InvalidLiteral { .. })
        ));
    }

    #[test]
    fn byte_images_are_native_endian() {
        let payload = encode(&Value::Int4(0x0102_0304)).unwrap().payload.unwrap();
        assert_eq!(payload.to_bytes(), 0x0102_0304i32.to_ne_bytes().to_vec());
        let payload = encode(&Value::Bool(true)).unwrap().payload.unwrap();
        assert_eq!(payload.to_bytes(), vec![1]);
    }
}
