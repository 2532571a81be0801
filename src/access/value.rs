use anyhow::{bail, Result};

/// Data types supported by the engine.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Boolean = 1,
    Int32 = 2,
    BigInt = 3,
    Varchar = 4,
}

impl DataType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(DataType::Boolean),
            2 => Ok(DataType::Int32),
            3 => Ok(DataType::BigInt),
            4 => Ok(DataType::Varchar),
            _ => bail!("Unknown data type: {}", value),
        }
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    BigInt(i64),
    String(String),
}

impl Value {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Int32(_) => Some(DataType::Int32),
            Value::BigInt(_) => Some(DataType::BigInt),
            Value::String(_) => Some(DataType::Varchar),
        }
    }

    pub fn is_compatible_with(&self, data_type: DataType) -> bool {
        matches!(
            (self, data_type),
            (Value::Null, _)
                | (Value::Boolean(_), DataType::Boolean)
                | (Value::Int32(_), DataType::Int32)
                | (Value::BigInt(_), DataType::BigInt)
                | (Value::String(_), DataType::Varchar)
        )
    }

    /// Truthiness for predicate results; NULL is false.
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Boolean(true))
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        use std::cmp::Ordering;
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Boolean(a), Value::Boolean(b)) => a.partial_cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.partial_cmp(b),
            (Value::BigInt(a), Value::BigInt(b)) => a.partial_cmp(b),
            (Value::Int32(a), Value::BigInt(b)) => (*a as i64).partial_cmp(b),
            (Value::BigInt(a), Value::Int32(b)) => a.partial_cmp(&(*b as i64)),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Serialize a row of values with type tags.
pub fn serialize_values(values: &[Value]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&(values.len() as u32).to_le_bytes());

    for value in values {
        match value {
            Value::Null => data.push(0),
            Value::Boolean(b) => {
                data.push(DataType::Boolean as u8);
                data.push(u8::from(*b));
            }
            Value::Int32(i) => {
                data.push(DataType::Int32 as u8);
                data.extend_from_slice(&i.to_le_bytes());
            }
            Value::BigInt(i) => {
                data.push(DataType::BigInt as u8);
                data.extend_from_slice(&i.to_le_bytes());
            }
            Value::String(s) => {
                data.push(DataType::Varchar as u8);
                let bytes = s.as_bytes();
                data.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                data.extend_from_slice(bytes);
            }
        }
    }

    data
}

/// Deserialize a row of values written by `serialize_values`.
pub fn deserialize_values(data: &[u8]) -> Result<Vec<Value>> {
    if data.len() < 4 {
        bail!("Invalid value data: too short");
    }

    let mut offset = 0;
    let count = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    offset += 4;

    fn take<'a>(data: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
        if *offset + len > data.len() {
            bail!("Invalid value data: truncated");
        }
        let bytes = &data[*offset..*offset + len];
        *offset += len;
        Ok(bytes)
    }

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let tag = take(data, &mut offset, 1)?[0];
        let value = match tag {
            0 => Value::Null,
            1 => Value::Boolean(take(data, &mut offset, 1)?[0] != 0),
            2 => Value::Int32(i32::from_le_bytes(
                take(data, &mut offset, 4)?.try_into().unwrap(),
            )),
            3 => Value::BigInt(i64::from_le_bytes(
                take(data, &mut offset, 8)?.try_into().unwrap(),
            )),
            4 => {
                let len =
                    u32::from_le_bytes(take(data, &mut offset, 4)?.try_into().unwrap()) as usize;
                Value::String(std::str::from_utf8(take(data, &mut offset, len)?)?.to_string())
            }
            other => bail!("Unknown value tag: {}", other),
        };
        values.push(value);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_roundtrip() -> Result<()> {
        let values = vec![
            Value::Int32(-7),
            Value::String("alice".to_string()),
            Value::Boolean(true),
            Value::Null,
            Value::BigInt(1 << 40),
        ];
        let data = serialize_values(&values);
        let back = deserialize_values(&data)?;
        assert_eq!(values, back);
        Ok(())
    }

    #[test]
    fn test_value_ordering() {
        assert!(Value::Null < Value::Int32(i32::MIN));
        assert!(Value::Int32(1) < Value::Int32(2));
        assert!(Value::String("a".into()) < Value::String("b".into()));
        assert!(Value::Int32(3) < Value::BigInt(4));
    }

    #[test]
    fn test_truncated_data_fails() {
        assert!(deserialize_values(&[1, 0]).is_err());
        let mut data = serialize_values(&[Value::Int32(5)]);
        data.truncate(data.len() - 2);
        assert!(deserialize_values(&data).is_err());
    }
}
