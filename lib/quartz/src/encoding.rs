/// Base64 helpers for ssh key blobs.
pub mod base64 {
    #[inline]
    pub fn encode<T: AsRef<[u8]>>(data: T) -> String {
        ::base64::encode(data.as_ref())
    }

    #[inline]
    pub fn decode(encoded: &str) -> Result<Vec<u8>, ::base64::DecodeError> {
        ::base64::decode(encoded)
    }
}

/// Hex helpers for key literals on the command line and in config files.
pub mod hex {
    pub fn encode(data: &[u8]) -> String {
        let mut out = String::with_capacity(data.len() * 2);
        for byte in data {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }

    pub fn decode(encoded: &str) -> Option<Vec<u8>> {
        if encoded.len() % 2 != 0 {
            return None;
        }

        let mut out = Vec::with_capacity(encoded.len() / 2);
        for idx in (0..encoded.len()).step_by(2) {
            let byte = u8::from_str_radix(encoded.get(idx..idx + 2)?, 16).ok()?;
            out.push(byte);
        }

        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let data = [0u8, 1, 0xab, 0xff];
        let encoded = hex::encode(&data);

        assert_eq!(encoded, "0001abff");
        assert_eq!(hex::decode(&encoded).unwrap(), &data);
    }

    #[test]
    fn test_hex_rejects_odd_length() {
        assert!(hex::decode("abc").is_none());
    }

    #[test]
    fn test_hex_rejects_non_hex() {
        assert!(hex::decode("zz").is_none());
    }

    #[test]
    fn test_base64_roundtrip() {
        let encoded = base64::encode(b"glyph");
        assert_eq!(base64::decode(&encoded).unwrap(), b"glyph");
    }
}
