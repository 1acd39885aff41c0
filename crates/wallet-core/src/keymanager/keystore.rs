//! Keystore file codec.
//!
//! A keystore file holds the 64-byte Solana secret key as a compact JSON
//! array of byte values, e.g. `[12,250,...]`, the same layout the Solana CLI
//! writes.

use chain_sol::{SolKeypair, SECRET_KEY_LENGTH};
use zeroize::Zeroizing;

use crate::error::WalletError;

/// Encode the keypair's secret key as keystore file contents.
pub fn encode_secret_key(keypair: &SolKeypair) -> Result<Zeroizing<String>, WalletError> {
    let secret = keypair.to_secret_key();
    serde_json::to_string(secret.as_slice())
        .map(Zeroizing::new)
        .map_err(|e| WalletError::KeystoreCorrupt(format!("encode failed: {e}")))
}

/// Decode keystore file contents into a keypair.
pub fn decode_secret_key(contents: &str) -> Result<SolKeypair, WalletError> {
    let bytes: Zeroizing<Vec<u8>> = serde_json::from_str::<Vec<u8>>(contents.trim())
        .map(Zeroizing::new)
        .map_err(|e| WalletError::KeystoreCorrupt(format!("expected a JSON byte array: {e}")))?;

    if bytes.len() != SECRET_KEY_LENGTH {
        return Err(WalletError::KeystoreCorrupt(format!(
            "expected {SECRET_KEY_LENGTH} bytes, got {}",
            bytes.len()
        )));
    }

    SolKeypair::from_secret_key(&bytes).map_err(|e| WalletError::KeystoreCorrupt(e.to_string()))
}
