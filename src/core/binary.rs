//! Byte order for integer reads and decoding.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

impl Endianness {
    /// Decode up to eight bytes as an unsigned integer.
    pub fn read_uint(&self, bytes: &[u8]) -> u64 {
        let mut value = 0u64;
        match self {
            Endianness::Little => {
                for &b in bytes.iter().take(8).rev() {
                    value = (value << 8) | b as u64;
                }
            }
            Endianness::Big => {
                for &b in bytes.iter().take(8) {
                    value = (value << 8) | b as u64;
                }
            }
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_uint() {
        assert_eq!(Endianness::Little.read_uint(&[0x78, 0x56, 0x34, 0x12]), 0x12345678);
        assert_eq!(Endianness::Big.read_uint(&[0x12, 0x34]), 0x1234);
        assert_eq!(Endianness::Little.read_uint(&[]), 0);
    }
}
