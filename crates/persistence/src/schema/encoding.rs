//! Base-62 obfuscation for integer identifiers.

const ALPHABET: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Encodes a non-negative integer as a base-62 string.
pub fn basic_encode(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(ALPHABET[(value % 62) as usize]);
        value /= 62;
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

/// Decodes a base-62 string. Returns `None` for empty input, characters outside
/// the alphabet, or overflow.
pub fn basic_decode(encoded: &str) -> Option<u64> {
    if encoded.is_empty() {
        return None;
    }
    encoded.bytes().try_fold(0u64, |acc, byte| {
        let digit = ALPHABET.iter().position(|c| *c == byte)? as u64;
        acc.checked_mul(62)?.checked_add(digit)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_values() {
        assert_eq!(basic_encode(0), "0");
        assert_eq!(basic_encode(61), "Z");
        assert_eq!(basic_encode(62), "10");
        assert_eq!(basic_encode(3843), "ZZ");
    }

    #[test]
    fn test_decode_inverse() {
        for value in [0u64, 1, 61, 62, 12345, 987_654_321, u64::MAX / 7] {
            assert_eq!(basic_decode(&basic_encode(value)), Some(value));
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(basic_decode(""), None);
        assert_eq!(basic_decode("ab-c"), None);
        assert_eq!(basic_decode("ZZZZZZZZZZZZZZZZZZZZZZZZ"), None);
    }
}
