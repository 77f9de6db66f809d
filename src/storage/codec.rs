use crate::core::error::{Error, Result};
use crate::core::types::{Value, ValueKind, MAX_DECIMAL_SCALE};

/// Byte layout of a single record value, dispatched on `ValueKind`.
///
/// Every kind reserves one bit pattern as null: the minimum representable
/// value for numbers, a zero length prefix for text. Callers may not store
/// that pattern as a real value.
pub struct ValueCodec;

impl ValueCodec {
    /// Bytes of one null record of `width` bytes.
    pub fn null_bytes(kind: ValueKind, width: usize) -> Vec<u8> {
        let mut out = vec![0u8; width];
        // Null never fails to encode.
        let _ = Self::encode(kind, &Value::Null, &mut out);
        out
    }

    pub fn encode(kind: ValueKind, value: &Value, out: &mut [u8]) -> Result<()> {
        match (kind, value) {
            (ValueKind::Byte, Value::Null) => out[0] = i8::MIN as u8,
            (ValueKind::Byte, Value::Byte(v)) => out[0] = *v as u8,
            (ValueKind::Short, Value::Null) => out[..2].copy_from_slice(&i16::MIN.to_le_bytes()),
            (ValueKind::Short, Value::Short(v)) => out[..2].copy_from_slice(&v.to_le_bytes()),
            (ValueKind::Int, Value::Null) => out[..4].copy_from_slice(&i32::MIN.to_le_bytes()),
            (ValueKind::Int, Value::Int(v)) => out[..4].copy_from_slice(&v.to_le_bytes()),
            (ValueKind::Long, Value::Null) => out[..8].copy_from_slice(&i64::MIN.to_le_bytes()),
            (ValueKind::Long, Value::Long(v)) => out[..8].copy_from_slice(&v.to_le_bytes()),
            (ValueKind::Float, Value::Null) => out[..4].copy_from_slice(&f32::MIN.to_le_bytes()),
            (ValueKind::Float, Value::Float(v)) => out[..4].copy_from_slice(&v.to_le_bytes()),
            (ValueKind::Double, Value::Null) => out[..8].copy_from_slice(&f64::MIN.to_le_bytes()),
            (ValueKind::Double, Value::Double(v)) => out[..8].copy_from_slice(&v.to_le_bytes()),
            (ValueKind::Decimal, Value::Null) => {
                out[..8].copy_from_slice(&i64::MIN.to_le_bytes());
                out[8] = 0;
            }
            (ValueKind::Decimal, Value::Decimal { mantissa, scale }) => {
                out[..8].copy_from_slice(&mantissa.to_le_bytes());
                out[8] = *scale;
            }
            (ValueKind::Text, Value::Null) => out.fill(0),
            (ValueKind::Text, Value::Text(s)) => {
                let payload = s.as_bytes();
                if payload.len() + 1 > out.len() {
                    return Err(Error::validation(format!(
                        "text of {} bytes does not fit a {} byte record",
                        payload.len(),
                        out.len()
                    )));
                }
                out.fill(0);
                out[0] = payload.len() as u8;
                out[1..1 + payload.len()].copy_from_slice(payload);
            }
            (kind, value) => {
                return Err(Error::validation(format!(
                    "{:?} value cannot be stored in a {:?} column",
                    value.kind(),
                    kind
                )))
            }
        }
        Ok(())
    }

    pub fn decode(kind: ValueKind, bytes: &[u8]) -> Value {
        match kind {
            ValueKind::Byte => {
                let v = bytes[0] as i8;
                if v == i8::MIN { Value::Null } else { Value::Byte(v) }
            }
            ValueKind::Short => {
                let v = i16::from_le_bytes([bytes[0], bytes[1]]);
                if v == i16::MIN { Value::Null } else { Value::Short(v) }
            }
            ValueKind::Int => {
                let v = i32::from_le_bytes(array4(bytes));
                if v == i32::MIN { Value::Null } else { Value::Int(v) }
            }
            ValueKind::Long => {
                let v = i64::from_le_bytes(array8(bytes));
                if v == i64::MIN { Value::Null } else { Value::Long(v) }
            }
            ValueKind::Float => {
                let v = f32::from_le_bytes(array4(bytes));
                if v == f32::MIN { Value::Null } else { Value::Float(v) }
            }
            ValueKind::Double => {
                let v = f64::from_le_bytes(array8(bytes));
                if v == f64::MIN { Value::Null } else { Value::Double(v) }
            }
            ValueKind::Decimal => {
                let mantissa = i64::from_le_bytes(array8(bytes));
                if mantissa == i64::MIN {
                    Value::Null
                } else {
                    Value::Decimal { mantissa, scale: bytes[8] }
                }
            }
            ValueKind::Text => {
                let len = bytes[0] as usize;
                if len == 0 {
                    Value::Null
                } else {
                    let end = (1 + len).min(bytes.len());
                    Value::Text(String::from_utf8_lossy(&bytes[1..end]).into_owned())
                }
            }
        }
    }

    /// Integer view of a record, `None` for null. Only integer kinds.
    pub fn decode_integer(kind: ValueKind, bytes: &[u8]) -> Option<i64> {
        match kind {
            ValueKind::Byte | ValueKind::Short | ValueKind::Int | ValueKind::Long => {
                Self::decode(kind, bytes).as_i64()
            }
            _ => None,
        }
    }

    /// Reject values outside the kind's domain, including its null pattern.
    /// `data_length` bounds text payloads; `non_negative` applies to
    /// dimension columns, whose values index a distribution, and to
    /// one-to-one link columns, whose values are record ids.
    pub fn check_domain(
        kind: ValueKind,
        value: &Value,
        data_length: u32,
        non_negative: bool,
    ) -> Result<()> {
        if value.kind() != Some(kind) {
            return Err(Error::validation(format!(
                "expected a {:?} value, got {:?}",
                kind, value
            )));
        }
        let reserved = match value {
            Value::Byte(v) => *v == i8::MIN,
            Value::Short(v) => *v == i16::MIN,
            Value::Int(v) => *v == i32::MIN,
            Value::Long(v) => *v == i64::MIN,
            Value::Float(v) => *v == f32::MIN,
            Value::Double(v) => *v == f64::MIN,
            Value::Decimal { mantissa, .. } => *mantissa == i64::MIN,
            Value::Text(s) => s.is_empty(),
            Value::Null => true,
        };
        if reserved {
            return Err(Error::validation(format!(
                "{:?} is the reserved null value of {:?} columns",
                value, kind
            )));
        }
        match value {
            Value::Float(v) if v.is_nan() => {
                return Err(Error::validation("NaN is not storable"));
            }
            Value::Double(v) if v.is_nan() => {
                return Err(Error::validation("NaN is not storable"));
            }
            Value::Decimal { scale, .. } if *scale > MAX_DECIMAL_SCALE => {
                return Err(Error::validation(format!(
                    "decimal scale {} exceeds {}",
                    scale, MAX_DECIMAL_SCALE
                )));
            }
            Value::Text(s) if s.len() > data_length.saturating_sub(1) as usize => {
                return Err(Error::validation(format!(
                    "text '{}' is {} bytes, column holds {}",
                    s,
                    s.len(),
                    data_length.saturating_sub(1)
                )));
            }
            _ => {}
        }
        if non_negative && value.as_i64().is_some_and(|v| v < 0) {
            return Err(Error::validation(format!(
                "column values are non-negative, got {}",
                value
            )));
        }
        Ok(())
    }
}

fn array4(bytes: &[u8]) -> [u8; 4] {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    raw
}

fn array8(bytes: &[u8]) -> [u8; 8] {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_patterns_decode_as_null() {
        let cases = [
            (ValueKind::Byte, 1),
            (ValueKind::Short, 2),
            (ValueKind::Int, 4),
            (ValueKind::Long, 8),
            (ValueKind::Float, 4),
            (ValueKind::Double, 8),
            (ValueKind::Decimal, 9),
            (ValueKind::Text, 11),
        ];
        for (kind, width) in cases {
            let bytes = ValueCodec::null_bytes(kind, width);
            assert_eq!(ValueCodec::decode(kind, &bytes), Value::Null, "{:?}", kind);
        }
    }

    #[test]
    fn reserved_values_are_rejected() {
        let cases = [
            (ValueKind::Byte, Value::Byte(i8::MIN)),
            (ValueKind::Short, Value::Short(i16::MIN)),
            (ValueKind::Int, Value::Int(i32::MIN)),
            (ValueKind::Long, Value::Long(i64::MIN)),
            (ValueKind::Float, Value::Float(f32::MIN)),
            (ValueKind::Double, Value::Double(f64::MIN)),
            (ValueKind::Decimal, Value::Decimal { mantissa: i64::MIN, scale: 2 }),
            (ValueKind::Text, Value::Text(String::new())),
            (ValueKind::Int, Value::Null),
        ];
        for (kind, value) in cases {
            let err = ValueCodec::check_domain(kind, &value, 11, false).unwrap_err();
            assert!(err.is_validation(), "{:?} accepted", value);
        }
    }

    #[test]
    fn domain_edges() {
        let smallest = Value::Byte(i8::MIN + 1);
        assert!(ValueCodec::check_domain(ValueKind::Byte, &smallest, 1, false).is_ok());
        assert!(ValueCodec::check_domain(ValueKind::Byte, &Value::Byte(-1), 1, true).is_err());
        assert!(ValueCodec::check_domain(ValueKind::Int, &Value::Long(5), 4, false).is_err());
        let nan = Value::Double(f64::NAN);
        assert!(ValueCodec::check_domain(ValueKind::Double, &nan, 8, false).is_err());
        assert!(ValueCodec::check_domain(ValueKind::Text, &Value::from("abcd"), 5, false).is_ok());
        let long = Value::from("abcde");
        assert!(ValueCodec::check_domain(ValueKind::Text, &long, 5, false).is_err());
    }

    #[test]
    fn text_prefix_and_payload_move_together() {
        let mut slot = [0xffu8; 8];
        ValueCodec::encode(ValueKind::Text, &Value::from("hey"), &mut slot).unwrap();
        assert_eq!(&slot, &[3, b'h', b'e', b'y', 0, 0, 0, 0]);
        assert_eq!(ValueCodec::decode(ValueKind::Text, &slot), Value::from("hey"));
    }

    #[test]
    fn decimal_keeps_scale() {
        let mut slot = [0u8; 9];
        let value = Value::Decimal { mantissa: -12_345, scale: 3 };
        ValueCodec::encode(ValueKind::Decimal, &value, &mut slot).unwrap();
        assert_eq!(ValueCodec::decode(ValueKind::Decimal, &slot), value);
        assert_eq!(value.as_f64(), Some(-12.345));
    }
}
