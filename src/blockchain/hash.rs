use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hashes an unordered set of values
///
/// Each value is rendered to canonical JSON (object keys sorted), the renderings
/// are sorted and joined with a single space, and the result is hashed with SHA-256.
/// The argument order therefore never affects the digest.
///
/// # Returns
///
/// The digest as a 64 character lowercase hexadecimal string
pub fn crypto_hash(inputs: &[Value]) -> String {
    let mut rendered: Vec<String> = inputs.iter().map(Value::to_string).collect();
    rendered.sort();

    let mut hasher = Sha256::new();
    hasher.update(rendered.join(" ").as_bytes());

    format!("{:x}", hasher.finalize())
}

/// Converts a ledger value into the JSON form fed to [`crypto_hash`]
///
/// Ledger types only contain strings, integers, sequences and string-keyed maps,
/// which always have a JSON representation.
pub fn canonical<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Hashes any number of serializable values, see [`crypto_hash`]
#[macro_export]
macro_rules! crypto_hash {
    ($($value:expr),+ $(,)?) => {
        $crate::blockchain::hash::crypto_hash(&[$($crate::blockchain::hash::canonical(&$value)),+])
    };
}

/// Counts the leading zero bits of a hex encoded digest
///
/// Returns 0 if the digest is not valid hex, so malformed hashes never satisfy a difficulty.
pub fn leading_zero_bits(hex_digest: &str) -> u32 {
    let bytes = match hex::decode(hex_digest) {
        Ok(bytes) => bytes,
        Err(_) => return 0,
    };

    let mut total = 0;
    for byte in bytes {
        if byte == 0 {
            total += 8;
        } else {
            total += byte.leading_zeros();
            break;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_known_digest() {
        // sha256 of "\"pranav\"", the JSON rendering of the string
        assert_eq!(
            crypto_hash!("pranav"),
            "ff6fec95b8dd4c95f2fb4731554997f732f4bb9f393190a917b5f1e95eb0f227"
        );
    }

    #[test]
    fn test_order_independence() {
        assert_eq!(crypto_hash!("one", "two", "three"), crypto_hash!("three", "one", "two"));
        assert_eq!(crypto_hash!(1u64, "a", vec![2, 3]), crypto_hash!(vec![2, 3], 1u64, "a"));
    }

    #[test]
    fn test_mutated_value_changes_hash() {
        let mut map: BTreeMap<String, u64> = BTreeMap::new();
        let original = crypto_hash!(map);

        map.insert("a".to_string(), 1);
        assert_ne!(crypto_hash!(map), original);
    }

    #[test]
    fn test_digest_length() {
        let hash = crypto_hash!("foo", 42u32);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_leading_zero_bits() {
        assert_eq!(leading_zero_bits("ff"), 0);
        assert_eq!(leading_zero_bits("7f"), 1);
        assert_eq!(leading_zero_bits("0f"), 4);
        assert_eq!(leading_zero_bits("0001"), 15);
        assert_eq!(leading_zero_bits("0000"), 16);
        assert_eq!(leading_zero_bits("hash-one"), 0);
    }
}
