//! Ed25519 keypairs in Solana's 64-byte secret key layout.
//!
//! A Solana secret key is the 32-byte Ed25519 seed followed by the 32-byte
//! public key. Keystore files and exported keys use this layout, so decoding
//! checks that the public half really belongs to the seed.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::address::{bytes_to_address, PublicKey};
use crate::error::SolError;

/// Length of a full Solana secret key (seed + public key).
pub const SECRET_KEY_LENGTH: usize = 64;

/// Length of the Ed25519 seed.
pub const SEED_LENGTH: usize = 32;

/// An Ed25519 signing keypair.
///
/// The inner `SigningKey` zeroizes its seed on drop.
pub struct SolKeypair {
    signing_key: SigningKey,
}

impl SolKeypair {
    /// Generate a new keypair from the operating system RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Build a keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; SEED_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Decode a 64-byte Solana secret key, or a bare 32-byte seed.
    pub fn from_secret_key(bytes: &[u8]) -> Result<Self, SolError> {
        match bytes.len() {
            SECRET_KEY_LENGTH => {
                let mut full = Zeroizing::new([0u8; SECRET_KEY_LENGTH]);
                full.copy_from_slice(bytes);
                let signing_key = SigningKey::from_keypair_bytes(&full).map_err(|e| {
                    SolError::InvalidSecretKey(format!("public key does not match seed: {e}"))
                })?;
                Ok(Self { signing_key })
            }
            SEED_LENGTH => {
                let mut seed = Zeroizing::new([0u8; SEED_LENGTH]);
                seed.copy_from_slice(bytes);
                Ok(Self::from_seed(&seed))
            }
            other => Err(SolError::InvalidSecretKey(format!(
                "expected {SECRET_KEY_LENGTH} or {SEED_LENGTH} bytes, got {other}"
            ))),
        }
    }

    /// The 64-byte secret key (seed followed by public key).
    pub fn to_secret_key(&self) -> Zeroizing<[u8; SECRET_KEY_LENGTH]> {
        Zeroizing::new(self.signing_key.to_keypair_bytes())
    }

    pub fn pubkey(&self) -> PublicKey {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Base58 address of the public key.
    pub fn address(&self) -> String {
        bytes_to_address(&self.pubkey())
    }

    /// Sign arbitrary bytes, returning the raw 64-byte signature.
    pub fn sign_message(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for SolKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolKeypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
