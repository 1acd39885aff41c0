//! Key supplied through the process environment.
//!
//! The value is resolved into [`EnvironmentConfig`] by the config layer; this
//! backend only decodes it. Accepted encodings: a JSON byte array (Solana CLI
//! keystore layout) or a base58 string. Either may carry the 64-byte secret
//! key or the 32-byte seed.

use async_trait::async_trait;
use chain_sol::{PublicKey, SolKeypair, SolTransaction};
use secrecy::ExposeSecret;
use zeroize::Zeroizing;

use super::KeyManager;
use crate::config::{EnvironmentConfig, ENV_PRIVATE_KEY};
use crate::error::WalletError;

#[derive(Debug)]
pub struct EnvironmentKeyManager {
    keypair: SolKeypair,
}

impl EnvironmentKeyManager {
    pub fn from_config(config: &EnvironmentConfig) -> Result<Self, WalletError> {
        let secret = config
            .private_key
            .as_ref()
            .ok_or_else(|| WalletError::MissingCredential(ENV_PRIVATE_KEY.to_string()))?;
        Self::from_secret(secret.expose_secret())
    }

    /// Decode a secret given as JSON array or base58.
    pub fn from_secret(value: &str) -> Result<Self, WalletError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(WalletError::MissingCredential(ENV_PRIVATE_KEY.to_string()));
        }

        let bytes: Zeroizing<Vec<u8>> = if value.starts_with('[') {
            serde_json::from_str::<Vec<u8>>(value)
                .map(Zeroizing::new)
                .map_err(|_| {
                    WalletError::InvalidCredential(format!(
                        "{ENV_PRIVATE_KEY} is not a JSON byte array"
                    ))
                })?
        } else {
            bs58::decode(value)
                .into_vec()
                .map(Zeroizing::new)
                .map_err(|_| {
                    WalletError::InvalidCredential(format!("{ENV_PRIVATE_KEY} is not base58"))
                })?
        };

        // Never echo the decoded bytes; the length is enough to diagnose.
        let keypair = SolKeypair::from_secret_key(&bytes).map_err(|_| {
            WalletError::InvalidCredential(format!(
                "{ENV_PRIVATE_KEY} decodes to {} bytes, expected 32 or 64",
                bytes.len()
            ))
        })?;

        tracing::debug!(address = %keypair.address(), "Loaded key from environment");
        Ok(Self { keypair })
    }
}

#[async_trait]
impl KeyManager for EnvironmentKeyManager {
    async fn public_key(&self) -> Result<PublicKey, WalletError> {
        Ok(self.keypair.pubkey())
    }

    async fn sign(&self, tx: &mut SolTransaction) -> Result<(), WalletError> {
        tx.partial_sign(&self.keypair)
            .map_err(|e| WalletError::SigningFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_sol::{compile_transaction, system_transfer, MessageVersion};
    use secrecy::SecretString;

    fn keypair() -> SolKeypair {
        SolKeypair::from_seed(&[0x42u8; 32])
    }

    #[tokio::test]
    async fn json_array_secret() {
        let kp = keypair();
        let json = serde_json::to_string(kp.to_secret_key().as_slice()).unwrap();
        let km = EnvironmentKeyManager::from_secret(&json).unwrap();
        assert_eq!(km.address().await.unwrap(), kp.address());
    }

    #[tokio::test]
    async fn base58_secret_key_and_seed() {
        let kp = keypair();
        let full = bs58::encode(kp.to_secret_key().as_slice()).into_string();
        let seed = bs58::encode([0x42u8; 32]).into_string();

        let a = EnvironmentKeyManager::from_secret(&full).unwrap();
        let b = EnvironmentKeyManager::from_secret(&seed).unwrap();
        assert_eq!(a.public_key().await.unwrap(), kp.pubkey());
        assert_eq!(b.public_key().await.unwrap(), kp.pubkey());
    }

    #[test]
    fn missing_variable() {
        let err = EnvironmentKeyManager::from_config(&EnvironmentConfig::default()).unwrap_err();
        assert!(matches!(err, WalletError::MissingCredential(ref v) if v == ENV_PRIVATE_KEY));
    }

    #[test]
    fn blank_variable_counts_as_missing() {
        let config = EnvironmentConfig {
            private_key: Some(SecretString::from("  ".to_string())),
        };
        assert!(matches!(
            EnvironmentKeyManager::from_config(&config),
            Err(WalletError::MissingCredential(_))
        ));
    }

    #[test]
    fn malformed_values_are_invalid() {
        for bad in ["[1,2,", "0OIl-not-base58", "[1,2,3]", "3yZe7d"] {
            assert!(
                matches!(
                    EnvironmentKeyManager::from_secret(bad),
                    Err(WalletError::InvalidCredential(_))
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn error_never_contains_secret() {
        let secret = bs58::encode([7u8; 40]).into_string();
        let err = EnvironmentKeyManager::from_secret(&secret).unwrap_err();
        assert!(!err.to_string().contains(&secret));
        assert!(err.to_string().contains("40 bytes"));
    }

    #[tokio::test]
    async fn signs_own_slot() {
        let kp = keypair();
        let json = serde_json::to_string(kp.to_secret_key().as_slice()).unwrap();
        let km = EnvironmentKeyManager::from_config(&EnvironmentConfig {
            private_key: Some(SecretString::from(json)),
        })
        .unwrap();

        let ix = system_transfer(&kp.pubkey(), &[3u8; 32], 1_000).unwrap();
        let mut tx =
            compile_transaction(&[ix], &kp.pubkey(), &[6u8; 32], MessageVersion::V0).unwrap();
        km.sign(&mut tx).await.unwrap();

        let sig = tx.signature_for(&kp.pubkey()).unwrap();
        assert!(tx.verify_signature(&kp.pubkey(), sig).is_ok());
    }
}
