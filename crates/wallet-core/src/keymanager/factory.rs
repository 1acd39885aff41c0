use super::{EnvironmentKeyManager, KeyManagerBackend, LocalKeyManager};
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::types::KeystoreType;

impl KeyManagerBackend {
    /// Construct the backend named by `config.keystore_type`.
    ///
    /// There is no fallback: a missing or unknown type is an error. Backends
    /// compiled out of this build report `UnsupportedKeystoreType`.
    pub async fn from_config(config: &WalletConfig) -> Result<Self, WalletError> {
        let keystore_type = config.keystore_type()?;
        tracing::info!(keystore = %keystore_type, "Selecting key manager");

        let backend = match keystore_type {
            KeystoreType::Local => KeyManagerBackend::Local(LocalKeyManager::from_config(&config.local)),
            KeystoreType::Hardware => hardware(config).await?,
            KeystoreType::RemoteCustody => remote_custody(config)?,
            KeystoreType::Environment => KeyManagerBackend::Environment(
                EnvironmentKeyManager::from_config(&config.environment)?,
            ),
        };
        Ok(backend)
    }
}

#[cfg(feature = "hardware")]
async fn hardware(config: &WalletConfig) -> Result<KeyManagerBackend, WalletError> {
    super::HardwareKeyManager::connect(&config.hardware)
        .await
        .map(KeyManagerBackend::Hardware)
}

#[cfg(not(feature = "hardware"))]
async fn hardware(_config: &WalletConfig) -> Result<KeyManagerBackend, WalletError> {
    Err(WalletError::UnsupportedKeystoreType(format!(
        "{} (built without the `hardware` feature)",
        KeystoreType::Hardware
    )))
}

#[cfg(feature = "remote-custody")]
fn remote_custody(config: &WalletConfig) -> Result<KeyManagerBackend, WalletError> {
    super::RemoteKeyManager::from_config(&config.remote).map(KeyManagerBackend::RemoteCustody)
}

#[cfg(not(feature = "remote-custody"))]
fn remote_custody(_config: &WalletConfig) -> Result<KeyManagerBackend, WalletError> {
    Err(WalletError::UnsupportedKeystoreType(format!(
        "{} (built without the `remote-custody` feature)",
        KeystoreType::RemoteCustody
    )))
}
