//! Key custody backends.
//!
//! Every backend implements [`KeyManager`]. The pipeline only ever talks to
//! that contract; [`KeyManagerBackend`] closes the set of backends so the
//! factory can hand out one concrete value without boxing.

use async_trait::async_trait;
use chain_sol::{bytes_to_address, PublicKey, SolTransaction};

use crate::error::WalletError;
use crate::types::KeystoreType;

pub mod environment;
mod factory;
#[cfg(feature = "hardware")]
pub mod hardware;
pub mod keystore;
pub mod local;
#[cfg(feature = "remote-custody")]
pub mod remote;

pub use environment::EnvironmentKeyManager;
#[cfg(feature = "hardware")]
pub use hardware::HardwareKeyManager;
pub use local::{KeyLoadPolicy, LocalKeyManager};
#[cfg(feature = "remote-custody")]
pub use remote::RemoteKeyManager;

/// Signing capability shared by all custody backends.
///
/// `sign` writes this backend's signature into its own slot and leaves every
/// other slot untouched. One transaction must not be signed concurrently;
/// `&mut` enforces that.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Raw Ed25519 public key.
    async fn public_key(&self) -> Result<PublicKey, WalletError>;

    /// Base58 address of [`KeyManager::public_key`].
    async fn address(&self) -> Result<String, WalletError> {
        Ok(bytes_to_address(&self.public_key().await?))
    }

    async fn sign(&self, tx: &mut SolTransaction) -> Result<(), WalletError>;
}

/// The backend selected by configuration.
#[derive(Debug)]
pub enum KeyManagerBackend {
    Local(LocalKeyManager),
    #[cfg(feature = "hardware")]
    Hardware(HardwareKeyManager),
    #[cfg(feature = "remote-custody")]
    RemoteCustody(RemoteKeyManager),
    Environment(EnvironmentKeyManager),
}

impl KeyManagerBackend {
    pub fn keystore_type(&self) -> KeystoreType {
        match self {
            KeyManagerBackend::Local(_) => KeystoreType::Local,
            #[cfg(feature = "hardware")]
            KeyManagerBackend::Hardware(_) => KeystoreType::Hardware,
            #[cfg(feature = "remote-custody")]
            KeyManagerBackend::RemoteCustody(_) => KeystoreType::RemoteCustody,
            KeyManagerBackend::Environment(_) => KeystoreType::Environment,
        }
    }

    /// The local backend, for keystore maintenance (generate / purge).
    pub fn as_local(&self) -> Option<&LocalKeyManager> {
        match self {
            KeyManagerBackend::Local(local) => Some(local),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}

#[async_trait]
impl KeyManager for KeyManagerBackend {
    async fn public_key(&self) -> Result<PublicKey, WalletError> {
        match self {
            KeyManagerBackend::Local(km) => km.public_key().await,
            #[cfg(feature = "hardware")]
            KeyManagerBackend::Hardware(km) => km.public_key().await,
            #[cfg(feature = "remote-custody")]
            KeyManagerBackend::RemoteCustody(km) => km.public_key().await,
            KeyManagerBackend::Environment(km) => km.public_key().await,
        }
    }

    async fn address(&self) -> Result<String, WalletError> {
        match self {
            KeyManagerBackend::Local(km) => km.address().await,
            #[cfg(feature = "hardware")]
            KeyManagerBackend::Hardware(km) => km.address().await,
            #[cfg(feature = "remote-custody")]
            KeyManagerBackend::RemoteCustody(km) => km.address().await,
            KeyManagerBackend::Environment(km) => km.address().await,
        }
    }

    async fn sign(&self, tx: &mut SolTransaction) -> Result<(), WalletError> {
        match self {
            KeyManagerBackend::Local(km) => km.sign(tx).await,
            #[cfg(feature = "hardware")]
            KeyManagerBackend::Hardware(km) => km.sign(tx).await,
            #[cfg(feature = "remote-custody")]
            KeyManagerBackend::RemoteCustody(km) => km.sign(tx).await,
            KeyManagerBackend::Environment(km) => km.sign(tx).await,
        }
    }
}
