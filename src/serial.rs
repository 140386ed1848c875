use std::fmt;

use serde::{Deserialize, Serialize};
use x509_parser::num_bigint::BigUint;

/// Number of hex digits a serial is zero-padded to.
///
/// This is the format the CA uses for serials in its APIs, so the same key
/// can be used for map lookups and for building oracle URLs.
pub const SERIAL_HEX_WIDTH: usize = 36;

/// Canonical, fixed-width string form of a certificate serial number.
///
/// Raw serial bytes are not suitable as map keys: the same integer may be
/// encoded with or without leading zero bytes. `SerialKey` always renders the
/// integer value as lowercase hex, left padded with zeros.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SerialKey(String);

impl SerialKey {
    pub fn from_biguint(serial: &BigUint) -> Self {
        Self(format!("{serial:0width$x}", width = SERIAL_HEX_WIDTH))
    }

    /// Builds a key from big-endian serial bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::from_biguint(&BigUint::from_bytes_be(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the integer value, or `None` if the key is not valid hex.
    pub fn to_biguint(&self) -> Option<BigUint> {
        BigUint::parse_bytes(self.0.as_bytes(), 16)
    }
}

impl From<&BigUint> for SerialKey {
    fn from(serial: &BigUint) -> Self {
        Self::from_biguint(serial)
    }
}

impl AsRef<str> for SerialKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SerialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Big-endian bytes of a serial, as stored in the tracker.
pub fn serial_bytes(serial: &BigUint) -> Vec<u8> {
    serial.to_bytes_be()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_key_is_zero_padded() {
        let cases = [
            (111u64, "00000000000000000000000000000000006f"),
            (444444, "00000000000000000000000000000006c81c"),
            (606060, "000000000000000000000000000000093f6c"),
            (123456, "00000000000000000000000000000001e240"),
        ];
        for (serial, expected) in cases {
            let key = SerialKey::from_biguint(&BigUint::from(serial));
            assert_eq!(key.as_str(), expected);
            assert_eq!(key.as_str().len(), SERIAL_HEX_WIDTH);
        }
    }

    #[test]
    fn test_serial_key_ignores_leading_zero_bytes() {
        let padded = SerialKey::from_bytes(&[0x00, 0x00, 0x01, 0x02]);
        let unpadded = SerialKey::from_bytes(&[0x01, 0x02]);
        assert_eq!(padded, unpadded);
        assert_eq!(padded.to_biguint(), Some(BigUint::from(0x0102u32)));
    }

    #[test]
    fn test_full_width_serial() {
        let serial = BigUint::parse_bytes(b"04bc17a64a2c415af9ba4df32b73bf4e08e7", 16).unwrap();
        let key = SerialKey::from(&serial);
        assert_eq!(key.to_string(), "04bc17a64a2c415af9ba4df32b73bf4e08e7");
        assert_eq!(SerialKey::from_bytes(&serial_bytes(&serial)), key);
    }
}
