//! Remote custody backend.
//!
//! Holds API credentials only; the key lives with the custody service. Every
//! signature that comes back is verified locally before it is written.

pub mod client;

use async_trait::async_trait;
use chain_sol::{address_to_bytes, bytes_to_address, PublicKey, SolTransaction, SIGNATURE_LENGTH};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::OnceCell;

pub use self::client::CustodyClient;
use super::KeyManager;
use crate::config::{RemoteCustodyConfig, ENV_CUSTODY_API_SECRET};
use crate::error::WalletError;

#[derive(Debug)]
pub struct RemoteKeyManager {
    client: CustodyClient,
    sign_with: String,
    pubkey: OnceCell<PublicKey>,
}

impl RemoteKeyManager {
    pub fn from_config(config: &RemoteCustodyConfig) -> Result<Self, WalletError> {
        let secret = config
            .api_secret
            .as_ref()
            .filter(|s| !s.expose_secret().is_empty())
            .ok_or_else(|| WalletError::MissingCredential(ENV_CUSTODY_API_SECRET.to_string()))?;

        for (field, value) in [
            ("remote.base_url", &config.base_url),
            ("remote.organization_id", &config.organization_id),
            ("remote.api_key_id", &config.api_key_id),
            ("remote.sign_with", &config.sign_with),
        ] {
            if value.trim().is_empty() {
                return Err(WalletError::Config(format!("{field} is not set")));
            }
        }

        let client = CustodyClient::new(
            &config.base_url,
            &config.organization_id,
            &config.api_key_id,
            SecretString::from(secret.expose_secret().to_string()),
            config.timeout(),
        )?;
        tracing::debug!(base_url = client.base_url(), sign_with = %config.sign_with, "Remote custody configured");
        Ok(Self::new(client, &config.sign_with))
    }

    pub fn new(client: CustodyClient, sign_with: &str) -> Self {
        Self {
            client,
            sign_with: sign_with.to_string(),
            pubkey: OnceCell::new(),
        }
    }

    async fn fetch_public_key(&self) -> Result<PublicKey, WalletError> {
        let encoded = self.client.public_key(&self.sign_with).await?;
        address_to_bytes(&encoded).map_err(|e| {
            WalletError::RemoteServiceError(format!("custody returned an invalid public key: {e}"))
        })
    }
}

#[async_trait]
impl KeyManager for RemoteKeyManager {
    async fn public_key(&self) -> Result<PublicKey, WalletError> {
        self.pubkey
            .get_or_try_init(|| self.fetch_public_key())
            .await
            .copied()
    }

    async fn sign(&self, tx: &mut SolTransaction) -> Result<(), WalletError> {
        let pubkey = self.public_key().await?;
        let address = bytes_to_address(&pubkey);
        if tx.signer_index(&pubkey).is_none() {
            return Err(WalletError::SigningFailed(format!(
                "{address} is not a required signer"
            )));
        }

        let encoded = self
            .client
            .sign_raw_payload(&self.sign_with, &tx.message_bytes())
            .await?;
        let signature: [u8; SIGNATURE_LENGTH] = hex::decode(encoded.trim())
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| {
                WalletError::RemoteServiceError("signature is not 64 hex-encoded bytes".into())
            })?;

        if tx.verify_signature(&pubkey, &signature).is_err() {
            tracing::warn!(%address, "Custody signature failed verification");
            return Err(WalletError::SignatureMismatch(address));
        }
        tx.add_signature(&pubkey, signature)
            .map_err(|e| WalletError::SigningFailed(e.to_string()))?;

        tracing::debug!(%address, "Signed by remote custody");
        Ok(())
    }
}
