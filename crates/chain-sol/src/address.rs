//! Solana addresses.
//!
//! An address is the Base58 encoding of a raw 32-byte Ed25519 public key,
//! with no hashing step in between.

use crate::error::SolError;

/// Raw Ed25519 public key bytes.
pub type PublicKey = [u8; 32];

/// Encode a public key as a Solana address string.
pub fn bytes_to_address(pubkey: &PublicKey) -> String {
    bs58::encode(pubkey).into_string()
}

/// Decode a Solana address string into its 32 public key bytes.
pub fn address_to_bytes(address: &str) -> Result<PublicKey, SolError> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| SolError::InvalidAddress(format!("base58 decode failed: {e}")))?;

    bytes.try_into().map_err(|v: Vec<u8>| {
        SolError::InvalidAddress(format!("expected 32 bytes, got {}", v.len()))
    })
}

/// Returns `true` when `address` decodes to exactly 32 bytes.
pub fn validate_address(address: &str) -> bool {
    address_to_bytes(address).is_ok()
}
