//! Local file keystore.
//!
//! With the default [`KeyLoadPolicy::Reload`] the key is read from disk for
//! every operation and dropped (zeroized) right after, so decoded secret
//! material only lives for the duration of one call.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chain_sol::{PublicKey, SolKeypair, SolTransaction};
use zeroize::Zeroizing;

use super::keystore::{decode_secret_key, encode_secret_key};
use super::KeyManager;
use crate::config::LocalKeystoreConfig;
use crate::error::WalletError;

/// How long a decoded local key stays in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyLoadPolicy {
    /// Re-read the keystore file for every operation.
    #[default]
    Reload,
    /// Decode once and keep the key until it is purged or regenerated.
    Cache,
}

#[derive(Debug)]
pub struct LocalKeyManager {
    path: PathBuf,
    policy: KeyLoadPolicy,
    cached: Mutex<Option<Arc<SolKeypair>>>,
}

impl LocalKeyManager {
    pub fn new(path: impl Into<PathBuf>, policy: KeyLoadPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            cached: Mutex::new(None),
        }
    }

    pub fn from_config(config: &LocalKeystoreConfig) -> Self {
        let policy = if config.cache_key {
            KeyLoadPolicy::Cache
        } else {
            KeyLoadPolicy::Reload
        };
        Self::new(&config.path, policy)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> KeyLoadPolicy {
        self.policy
    }

    /// Generate a fresh keypair and write it to the keystore path.
    ///
    /// Without `overwrite` an existing file is left untouched and
    /// `KeystoreExists` is returned. With it, the old key is replaced and is
    /// gone for good. Returns the new address.
    pub fn generate_key(&self, overwrite: bool) -> Result<String, WalletError> {
        let dir = match self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                dir.to_path_buf()
            }
            None => PathBuf::from("."),
        };
        if !overwrite && self.path.exists() {
            return Err(self.exists_error());
        }

        let keypair = SolKeypair::generate();
        let contents = encode_secret_key(&keypair)?;

        // Staged next to the keystore and renamed over it, so the path only
        // ever holds a complete owner-only file.
        let mut staged = tempfile::Builder::new()
            .prefix(".keystore-")
            .tempfile_in(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(staged.path(), fs::Permissions::from_mode(0o600))?;
        }
        staged.write_all(contents.as_bytes())?;
        staged.as_file().sync_all()?;

        let persisted = if overwrite {
            staged.persist(&self.path)
        } else {
            staged.persist_noclobber(&self.path)
        };
        persisted.map_err(|e| match e.error.kind() {
            ErrorKind::AlreadyExists => self.exists_error(),
            _ => WalletError::Io(e.error),
        })?;

        let address = keypair.address();
        self.replace_cache(None);
        tracing::info!(path = %self.path.display(), %address, overwrite, "Generated local keystore");
        Ok(address)
    }

    /// Delete the keystore file. A missing file is not an error.
    pub fn purge_key(&self) -> Result<(), WalletError> {
        self.replace_cache(None);
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Purged local keystore");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read and decode the keystore file, bypassing any cache.
    pub fn load_key(&self) -> Result<SolKeypair, WalletError> {
        let raw = fs::read(&self.path)
            .map(Zeroizing::new)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    WalletError::KeystoreNotFound(self.path.display().to_string())
                }
                _ => WalletError::Io(e),
            })?;
        let contents = std::str::from_utf8(&raw)
            .map_err(|e| WalletError::KeystoreCorrupt(format!("not UTF-8 text: {e}")))?;
        decode_secret_key(contents)
    }

    fn exists_error(&self) -> WalletError {
        WalletError::KeystoreExists(self.path.display().to_string())
    }

    /// The key according to the load policy.
    fn keypair(&self) -> Result<Arc<SolKeypair>, WalletError> {
        if self.policy == KeyLoadPolicy::Reload {
            return self.load_key().map(Arc::new);
        }

        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(kp) = cached.as_ref() {
            return Ok(Arc::clone(kp));
        }
        let kp = Arc::new(self.load_key()?);
        *cached = Some(Arc::clone(&kp));
        Ok(kp)
    }

    fn replace_cache(&self, value: Option<Arc<SolKeypair>>) {
        *self.cached.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }
}

#[async_trait]
impl KeyManager for LocalKeyManager {
    async fn public_key(&self) -> Result<PublicKey, WalletError> {
        self.keypair()
            .map(|kp| kp.pubkey())
            .map_err(|e| WalletError::KeyUnavailable(e.to_string()))
    }

    async fn sign(&self, tx: &mut SolTransaction) -> Result<(), WalletError> {
        let keypair = self
            .keypair()
            .map_err(|e| WalletError::SigningFailed(e.to_string()))?;
        tx.partial_sign(&keypair)
            .map_err(|e| WalletError::SigningFailed(e.to_string()))?;
        tracing::debug!(address = %keypair.address(), "Signed with local keystore");
        Ok(())
    }
}
