use crate::access::value::Value;
use anyhow::{bail, Result};
use std::cmp::Ordering;

/// Fixed-width index key. Supported widths are 4, 8, 16, 32 and 64 bytes;
/// the tree is monomorphized per width.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    pub fn zeroed() -> Self {
        Self { data: [0u8; N] }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; N];
        let len = bytes.len().min(N);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.data
    }

    /// Order-preserving encoding of a signed integer into the key prefix.
    pub fn from_i64(value: i64) -> Self {
        let mut data = [0u8; N];
        let flipped = (value as u64) ^ (1 << 63);
        let be = flipped.to_be_bytes();
        if N >= 8 {
            data[..8].copy_from_slice(&be);
        } else {
            data.copy_from_slice(&be[8 - N..]);
        }
        Self { data }
    }

    pub fn to_i64(&self) -> i64 {
        let mut be = [0u8; 8];
        if N >= 8 {
            be.copy_from_slice(&self.data[..8]);
        } else {
            be[8 - N..].copy_from_slice(&self.data);
        }
        (u64::from_be_bytes(be) ^ (1 << 63)) as i64
    }
}

impl<const N: usize> std::fmt::Debug for GenericKey<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GenericKey<{}>({})", N, self.to_i64())
    }
}

/// Total order over fixed-width keys, supplied at tree construction.
pub trait KeyComparator<const N: usize>: Clone + Send + Sync + 'static {
    fn compare(&self, a: &GenericKey<N>, b: &GenericKey<N>) -> Ordering;
}

/// Lexicographic byte order. Pairs with the order-preserving value
/// encodings below.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedBytesComparator;

impl<const N: usize> KeyComparator<N> for OrderedBytesComparator {
    fn compare(&self, a: &GenericKey<N>, b: &GenericKey<N>) -> Ordering {
        a.as_bytes().cmp(b.as_bytes())
    }
}

/// Interprets the key prefix as an order-encoded i64.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignedIntComparator;

impl<const N: usize> KeyComparator<N> for SignedIntComparator {
    fn compare(&self, a: &GenericKey<N>, b: &GenericKey<N>) -> Ordering {
        a.to_i64().cmp(&b.to_i64())
    }
}

/// Encode a row of key-column values into a fixed-width key such that byte
/// order equals value order: integers are sign-flipped big-endian, strings
/// contribute a zero-padded prefix, booleans one byte.
pub fn encode_key_values<const N: usize>(values: &[Value]) -> Result<GenericKey<N>> {
    let mut buf = Vec::with_capacity(N);
    for value in values {
        match value {
            Value::Null => buf.push(0),
            Value::Boolean(b) => buf.push(1 + u8::from(*b)),
            Value::Int32(i) => {
                buf.push(1);
                buf.extend_from_slice(&(((*i as u32) ^ (1 << 31)).to_be_bytes()));
            }
            Value::BigInt(i) => {
                buf.push(1);
                buf.extend_from_slice(&(((*i as u64) ^ (1 << 63)).to_be_bytes()));
            }
            Value::String(s) => {
                buf.push(1);
                buf.extend_from_slice(s.as_bytes());
                buf.push(0);
            }
        }
    }
    if buf.len() > N {
        bail!("key values exceed key width {} (need {})", N, buf.len());
    }
    Ok(GenericKey::from_bytes(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i64_encoding_orders() {
        let keys: Vec<GenericKey<8>> = [-100i64, -1, 0, 1, 42, i64::MAX]
            .iter()
            .map(|&v| GenericKey::from_i64(v))
            .collect();
        for pair in keys.windows(2) {
            assert_eq!(
                KeyComparator::<8>::compare(&OrderedBytesComparator, &pair[0], &pair[1]),
                Ordering::Less
            );
            assert_eq!(
                KeyComparator::<8>::compare(&SignedIntComparator, &pair[0], &pair[1]),
                Ordering::Less
            );
        }
    }

    #[test]
    fn test_i64_roundtrip() {
        for v in [-5i64, 0, 7, i64::MIN, i64::MAX] {
            assert_eq!(GenericKey::<8>::from_i64(v).to_i64(), v);
        }
        // Narrow keys keep order for small values.
        let a = GenericKey::<4>::from_i64(3);
        let b = GenericKey::<4>::from_i64(4);
        assert!(a.as_bytes() < b.as_bytes());
    }

    #[test]
    fn test_encode_key_values_order() -> Result<()> {
        let k1: GenericKey<16> = encode_key_values(&[Value::Int32(1), Value::Int32(5)])?;
        let k2: GenericKey<16> = encode_key_values(&[Value::Int32(1), Value::Int32(9)])?;
        let k3: GenericKey<16> = encode_key_values(&[Value::Int32(2), Value::Int32(0)])?;
        assert!(k1.as_bytes() < k2.as_bytes());
        assert!(k2.as_bytes() < k3.as_bytes());

        let s1: GenericKey<16> = encode_key_values(&[Value::String("abc".into())])?;
        let s2: GenericKey<16> = encode_key_values(&[Value::String("abd".into())])?;
        assert!(s1.as_bytes() < s2.as_bytes());

        // NULL sorts below any value.
        let n: GenericKey<16> = encode_key_values(&[Value::Null])?;
        assert!(n.as_bytes() < s1.as_bytes());

        Ok(())
    }

    #[test]
    fn test_encode_too_wide_fails() {
        let long = Value::String("x".repeat(40));
        assert!(encode_key_values::<8>(&[long]).is_err());
    }
}
