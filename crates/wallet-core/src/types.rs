use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WalletError;

/// Custody backend selected for a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeystoreType {
    Local,
    Hardware,
    RemoteCustody,
    Environment,
}

impl KeystoreType {
    /// Canonical configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeystoreType::Local => "local",
            KeystoreType::Hardware => "hardware",
            KeystoreType::RemoteCustody => "remote-custody",
            KeystoreType::Environment => "environment",
        }
    }

    /// Resolve an optional configuration value. Blank counts as absent.
    pub fn resolve(value: Option<&str>) -> Result<Self, WalletError> {
        match value.map(str::trim) {
            None | Some("") => Err(WalletError::MissingKeystoreType),
            Some(v) => v.parse(),
        }
    }
}

impl FromStr for KeystoreType {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(KeystoreType::Local),
            "hardware" | "ledger" => Ok(KeystoreType::Hardware),
            "remote-custody" | "remote" | "turnkey" => Ok(KeystoreType::RemoteCustody),
            "environment" | "env" => Ok(KeystoreType::Environment),
            other => Err(WalletError::UnsupportedKeystoreType(other.to_string())),
        }
    }
}

impl fmt::Display for KeystoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RPC commitment level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl FromStr for Commitment {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(WalletError::Config(format!("unknown commitment: {other}"))),
        }
    }
}

/// Recent network state a transaction is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub blockhash: [u8; 32],
    /// Last block height at which a transaction using this blockhash is valid.
    pub last_valid_block_height: u64,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.blockhash).into_string())
    }
}

/// Lifecycle of a pipeline transaction. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Built,
    Signed,
    Submitted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keystore_type_accepts_aliases() {
        assert_eq!("ledger".parse::<KeystoreType>().unwrap(), KeystoreType::Hardware);
        assert_eq!("Turnkey".parse::<KeystoreType>().unwrap(), KeystoreType::RemoteCustody);
        assert_eq!(" env ".parse::<KeystoreType>().unwrap(), KeystoreType::Environment);
    }

    #[test]
    fn keystore_type_display_roundtrips() {
        for ty in [
            KeystoreType::Local,
            KeystoreType::Hardware,
            KeystoreType::RemoteCustody,
            KeystoreType::Environment,
        ] {
            assert_eq!(ty.to_string().parse::<KeystoreType>().unwrap(), ty);
        }
    }

    #[test]
    fn unknown_keystore_type_never_defaults() {
        let err = "yubikey".parse::<KeystoreType>().unwrap_err();
        assert!(matches!(err, WalletError::UnsupportedKeystoreType(ref v) if v == "yubikey"));
    }

    #[test]
    fn missing_or_blank_keystore_type() {
        assert!(matches!(
            KeystoreType::resolve(None),
            Err(WalletError::MissingKeystoreType)
        ));
        assert!(matches!(
            KeystoreType::resolve(Some("   ")),
            Err(WalletError::MissingKeystoreType)
        ));
    }

    #[test]
    fn commitment_serde_is_lowercase() {
        let json = serde_json::to_string(&Commitment::Finalized).unwrap();
        assert_eq!(json, "\"finalized\"");
        let parsed: Commitment = serde_json::from_str("\"processed\"").unwrap();
        assert_eq!(parsed, Commitment::Processed);
    }

    #[test]
    fn checkpoint_displays_base58() {
        let cp = Checkpoint {
            blockhash: [0u8; 32],
            last_valid_block_height: 10,
        };
        assert_eq!(cp.to_string(), "11111111111111111111111111111111");
    }
}
