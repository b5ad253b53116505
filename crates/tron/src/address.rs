//! TRON address validation.
//!
//! TRON addresses are base58check strings: a 0x41 prefix byte, a 20-byte
//! account hash, and a 4-byte double-SHA256 checksum. Validation is a pure
//! format check done before any RPC call.

use base58::FromBase58;
use sha2::{Digest, Sha256};

/// Mainnet address prefix byte.
const ADDRESS_PREFIX: u8 = 0x41;

/// Decoded length: 1 prefix + 20 account hash + 4 checksum.
const DECODED_LEN: usize = 25;

/// Errors from decoding a base58check address.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address contains an invalid base58 character")]
    InvalidChar,

    #[error("address has invalid length")]
    InvalidLength,

    #[error("address prefix is not 0x41")]
    InvalidPrefix,

    #[error("address checksum mismatch")]
    InvalidChecksum,
}

/// Decode and verify a TRON base58check address, returning the 21-byte
/// prefixed payload.
pub fn decode_address(address: &str) -> Result<Vec<u8>, AddressError> {
    let raw = address.from_base58().map_err(|_| AddressError::InvalidChar)?;

    if raw.len() != DECODED_LEN {
        return Err(AddressError::InvalidLength);
    }

    let (payload, checksum) = raw.split_at(DECODED_LEN - 4);

    if payload[0] != ADDRESS_PREFIX {
        return Err(AddressError::InvalidPrefix);
    }

    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);

    if &second[..4] != checksum {
        return Err(AddressError::InvalidChecksum);
    }

    Ok(payload.to_vec())
}

/// Check whether a string is a well-formed TRON address.
pub fn is_valid_address(address: &str) -> bool {
    decode_address(address).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_mainnet_addresses() {
        // Well-known mainnet addresses
        assert!(is_valid_address("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t"));
        assert!(is_valid_address("TLa2f6VPqDgRE67v1736s7bJ8Ray5wYjU7"));
    }

    #[test]
    fn test_invalid_checksum() {
        let mut addr = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".to_string();
        addr.pop();
        addr.push('u');
        assert!(!is_valid_address(&addr));
    }

    #[test]
    fn test_invalid_length() {
        assert_eq!(decode_address("TR7NHq"), Err(AddressError::InvalidLength));
        assert!(!is_valid_address(""));
    }

    #[test]
    fn test_invalid_characters() {
        // '0', 'O', 'I' and 'l' are not in the base58 alphabet
        assert!(!is_valid_address("TR0NHqjeKQxGTCi8q8ZY4pL8otSzgjL0Ol"));
        // Ethereum-style addresses are rejected outright
        assert!(!is_valid_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e"));
    }

    #[test]
    fn test_decoded_payload_shape() {
        let payload = decode_address("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t").unwrap();
        assert_eq!(payload.len(), 21);
        assert_eq!(payload[0], 0x41);
    }
}
