//! Solana wallet core: pluggable key custody behind one signing contract and
//! a Build → Sign → Send transaction pipeline.
//!
//! ```no_run
//! use wallet_core::{chain_sol, KeyManager, WalletConfig, WalletCore};
//!
//! # async fn run() -> Result<(), wallet_core::WalletError> {
//! let config = WalletConfig::load()?;
//! let core = WalletCore::create(&config).await?;
//!
//! let payer = core.key_manager().public_key().await?;
//! let recipient = chain_sol::address_to_bytes("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin")?;
//! let ix = chain_sol::system_transfer(&payer, &recipient, 1_000)?;
//!
//! let mut tx = core.build_transaction(&[ix], &payer).await?;
//! core.sign_transaction(&mut tx).await?;
//! let signature = core.send_transaction(&mut tx).await?;
//! println!("{signature}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod keymanager;
pub mod logging;
pub mod pipeline;
pub mod types;

pub use chain_sol;

pub use config::WalletConfig;
pub use connection::{Connection, ConnectionError, RpcConnection};
pub use error::WalletError;
pub use keymanager::{
    EnvironmentKeyManager, KeyLoadPolicy, KeyManager, KeyManagerBackend, LocalKeyManager,
};
#[cfg(feature = "hardware")]
pub use keymanager::HardwareKeyManager;
#[cfg(feature = "remote-custody")]
pub use keymanager::RemoteKeyManager;
pub use logging::init_logging;
pub use pipeline::{Transaction, WalletCore};
pub use types::{Checkpoint, Commitment, KeystoreType, TransactionState};
