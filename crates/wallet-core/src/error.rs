use thiserror::Error;

use crate::types::TransactionState;

#[derive(Debug, Error)]
pub enum WalletError {
    // ─── Key manager contract ───────────────────────────────────────
    #[error("Key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    // ─── Local keystore ─────────────────────────────────────────────
    #[error("Keystore already exists at {0}; pass overwrite to replace it")]
    KeystoreExists(String),

    #[error("Keystore not found at {0}")]
    KeystoreNotFound(String),

    #[error("Keystore corrupt: {0}")]
    KeystoreCorrupt(String),

    // ─── Hardware device ────────────────────────────────────────────
    #[error("Signing device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device communication error: {0}")]
    DeviceCommunicationError(String),

    #[error("Device did not answer within {0} ms")]
    DeviceTimeout(u64),

    #[error("Request rejected on device")]
    UserRejected,

    // ─── Remote custody ─────────────────────────────────────────────
    #[error("Remote custody service error: {0}")]
    RemoteServiceError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Signature returned for {0} does not verify")]
    SignatureMismatch(String),

    // ─── Environment credential ─────────────────────────────────────
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    // ─── Backend selection ──────────────────────────────────────────
    #[error("Unsupported keystore type: {0}")]
    UnsupportedKeystoreType(String),

    #[error("Keystore type is not configured")]
    MissingKeystoreType,

    // ─── Transaction pipeline ───────────────────────────────────────
    #[error("Failed to fetch latest blockhash: {0}")]
    CheckpointFetchFailed(String),

    #[error("Transaction rejected by the network: {0}")]
    SubmissionRejected(String),

    #[error("Transaction build failed: {0}")]
    TransactionBuildFailed(String),

    #[error("Transaction is {actual:?}, expected {expected:?}")]
    InvalidTransactionState {
        expected: TransactionState,
        actual: TransactionState,
    },

    // ─── Ambient ────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<chain_sol::SolError> for WalletError {
    fn from(e: chain_sol::SolError) -> Self {
        WalletError::TransactionBuildFailed(format!("SOL: {e}"))
    }
}
