//! Wallet configuration.
//!
//! Read once at startup from `$HOME/.config/hellowallet/config.json`, then
//! overlaid with environment variables. The resulting [`WalletConfig`] is
//! passed by reference to the backend factory; nothing below this module
//! reads the process environment.
//!
//! Secrets (`CUSTODY_API_SECRET`, `WALLET_PRIVATE_KEY`) only ever come from
//! the environment and are skipped when the file is written.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::WalletError;
use crate::types::{Commitment, KeystoreType};

pub const ENV_KEYSTORE_TYPE: &str = "KEYSTORE_TYPE";
pub const ENV_RPC_URL: &str = "RPC_URL";
pub const ENV_COMMITMENT: &str = "COMMITMENT";
pub const ENV_PRIVATE_KEY: &str = "WALLET_PRIVATE_KEY";
pub const ENV_CUSTODY_API_SECRET: &str = "CUSTODY_API_SECRET";

const CONFIG_DIR: &str = "hellowallet";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub rpc_url: String,
    pub commitment: Commitment,
    pub rpc_timeout_ms: u64,
    /// Raw keystore type; resolved by [`WalletConfig::keystore_type`].
    pub keystore_type: Option<String>,
    pub local: LocalKeystoreConfig,
    pub hardware: HardwareConfig,
    pub remote: RemoteCustodyConfig,
    #[serde(skip)]
    pub environment: EnvironmentConfig,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.devnet.solana.com".to_string(),
            commitment: Commitment::Confirmed,
            rpc_timeout_ms: 30_000,
            keystore_type: None,
            local: LocalKeystoreConfig::default(),
            hardware: HardwareConfig::default(),
            remote: RemoteCustodyConfig::default(),
            environment: EnvironmentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalKeystoreConfig {
    pub path: PathBuf,
    /// Keep the decoded key in memory instead of re-reading the file on
    /// every operation.
    pub cache_key: bool,
}

impl Default for LocalKeystoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./default_key.json"),
            cache_key: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// `host:port` of the APDU endpoint.
    pub device_address: String,
    pub derivation_path: String,
    /// Connect, handshake and key lookup timeout.
    pub timeout_ms: u64,
    /// Signing waits for the holder to approve on the device.
    pub confirm_timeout_ms: u64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            device_address: "127.0.0.1:9999".to_string(),
            derivation_path: "44'/501'/0'".to_string(),
            timeout_ms: 5_000,
            confirm_timeout_ms: 120_000,
        }
    }
}

impl HardwareConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteCustodyConfig {
    pub base_url: String,
    pub organization_id: String,
    pub api_key_id: String,
    /// Address (or key id) of the custody key used for signing.
    pub sign_with: String,
    pub timeout_ms: u64,
    #[serde(skip)]
    pub api_secret: Option<SecretString>,
}

impl Default for RemoteCustodyConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            organization_id: String::new(),
            api_key_id: String::new(),
            sign_with: String::new(),
            timeout_ms: 10_000,
            api_secret: None,
        }
    }
}

impl RemoteCustodyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Default)]
pub struct EnvironmentConfig {
    /// JSON byte array or base58 string.
    pub private_key: Option<SecretString>,
}

impl WalletConfig {
    /// `$HOME/.config/hellowallet/config.json`
    pub fn default_path() -> Result<PathBuf, WalletError> {
        let home = std::env::var_os("HOME")
            .ok_or_else(|| WalletError::Config("HOME is not set".to_string()))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR)
            .join(CONFIG_FILE))
    }

    /// Load the default config file (defaults if it does not exist) and
    /// apply environment overrides.
    pub fn load() -> Result<Self, WalletError> {
        let path = Self::default_path()?;
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, WalletError> {
        let raw = fs::read_to_string(path)?;
        let config: WalletConfig = serde_json::from_str(&raw)
            .map_err(|e| WalletError::Config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn save(&self) -> Result<(), WalletError> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), WalletError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| WalletError::Config(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Overlay the recognised variables from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), WalletError> {
        let known = [
            ENV_KEYSTORE_TYPE,
            ENV_RPC_URL,
            ENV_COMMITMENT,
            ENV_PRIVATE_KEY,
            ENV_CUSTODY_API_SECRET,
        ];
        let vars = std::env::vars().filter(|(k, _)| known.contains(&k.as_str()));
        self.apply_overrides(vars)
    }

    /// Overlay explicit `(name, value)` pairs using the environment variable
    /// names. Unknown names are ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<(), WalletError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let value: String = value.into();
            match key.as_ref() {
                ENV_KEYSTORE_TYPE => self.keystore_type = Some(value),
                ENV_RPC_URL => self.rpc_url = value,
                ENV_COMMITMENT => self.commitment = value.parse()?,
                ENV_PRIVATE_KEY => {
                    self.environment.private_key = Some(SecretString::from(value))
                }
                ENV_CUSTODY_API_SECRET => {
                    self.remote.api_secret = Some(SecretString::from(value))
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn keystore_type(&self) -> Result<KeystoreType, WalletError> {
        KeystoreType::resolve(self.keystore_type.as_deref())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}
