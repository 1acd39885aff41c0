//! Build → Sign → Send.
//!
//! [`WalletCore`] wires one key manager to one connection. Each
//! [`Transaction`] carries its own lifecycle state, so independent
//! transactions can move through the same pipeline concurrently.

use chain_sol::{
    bytes_to_address, compile_transaction, serialize_transaction, MessageVersion, PublicKey,
    SolInstruction, SolTransaction,
};

use crate::config::WalletConfig;
use crate::connection::{Connection, RpcConnection};
use crate::error::WalletError;
use crate::keymanager::{KeyManager, KeyManagerBackend};
use crate::types::{Checkpoint, KeystoreType, TransactionState};

/// A transaction moving through the pipeline.
#[derive(Debug, Clone)]
pub struct Transaction {
    inner: SolTransaction,
    checkpoint: Checkpoint,
    state: TransactionState,
    submission: Option<String>,
}

impl Transaction {
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Network state the message was compiled against.
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn message(&self) -> &SolTransaction {
        &self.inner
    }

    /// Signature returned by the network once submitted.
    pub fn submission(&self) -> Option<&str> {
        self.submission.as_deref()
    }

    /// Wire bytes as they would be submitted now.
    pub fn to_wire(&self) -> Vec<u8> {
        serialize_transaction(&self.inner)
    }

    /// Add a signature from an additional signer. Only allowed while the
    /// transaction is still `Built`. Moves to `Signed` once every required
    /// slot is filled.
    pub async fn cosign<K>(&mut self, signer: &K) -> Result<(), WalletError>
    where
        K: KeyManager + ?Sized,
    {
        self.require_state(TransactionState::Built)?;
        signer.sign(&mut self.inner).await?;
        self.settle();
        Ok(())
    }

    /// `Built` becomes `Signed` when no required slot is left empty.
    fn settle(&mut self) {
        if self.state == TransactionState::Built && self.inner.is_fully_signed() {
            self.state = TransactionState::Signed;
            tracing::info!(blockhash = %self.checkpoint, "Transaction signed");
        }
    }

    fn require_state(&self, expected: TransactionState) -> Result<(), WalletError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(WalletError::InvalidTransactionState {
                expected,
                actual: self.state,
            })
        }
    }
}

pub struct WalletCore<C = RpcConnection, K = KeyManagerBackend> {
    key_manager: K,
    connection: C,
}

impl WalletCore {
    /// Backend from `config.keystore_type`, RPC connection from `config.rpc_url`.
    pub async fn create(config: &WalletConfig) -> Result<Self, WalletError> {
        let key_manager = KeyManagerBackend::from_config(config).await?;
        let connection = RpcConnection::from_config(config)
            .map_err(|e| WalletError::Config(format!("RPC connection: {e}")))?;
        tracing::info!(
            keystore = %key_manager.keystore_type(),
            rpc_url = %config.rpc_url,
            commitment = config.commitment.as_str(),
            "Wallet ready"
        );
        Ok(Self::with_connection(key_manager, connection))
    }
}

impl<C> WalletCore<C, KeyManagerBackend> {
    pub fn keystore_type(&self) -> KeystoreType {
        self.key_manager.keystore_type()
    }
}

impl<C, K> WalletCore<C, K>
where
    C: Connection,
    K: KeyManager,
{
    pub fn with_connection(key_manager: K, connection: C) -> Self {
        Self {
            key_manager,
            connection,
        }
    }

    pub fn key_manager(&self) -> &K {
        &self.key_manager
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Compile `instructions` into a v0 message paid by `payer`, anchored to
    /// the latest checkpoint. Nothing is built if the checkpoint cannot be
    /// fetched.
    pub async fn build_transaction(
        &self,
        instructions: &[SolInstruction],
        payer: &PublicKey,
    ) -> Result<Transaction, WalletError> {
        let payer_address = bytes_to_address(payer);
        tracing::debug!(payer = %payer_address, instructions = instructions.len(), "Building transaction");

        let checkpoint = self.connection.latest_checkpoint().await.map_err(|e| {
            tracing::warn!(error = %e, "Could not fetch latest blockhash");
            WalletError::CheckpointFetchFailed(e.to_string())
        })?;

        let inner = compile_transaction(instructions, payer, &checkpoint.blockhash, MessageVersion::V0)?;
        tracing::info!(
            payer = %payer_address,
            blockhash = %checkpoint,
            signers = inner.required_signers().len(),
            "Transaction built"
        );

        Ok(Transaction {
            inner,
            checkpoint,
            state: TransactionState::Built,
            submission: None,
        })
    }

    /// Sign with the configured backend. Backend errors come back unchanged
    /// and leave the transaction `Built`. If other signers are still missing
    /// the transaction also stays `Built` until [`Transaction::cosign`]
    /// completes it.
    pub async fn sign_transaction(&self, tx: &mut Transaction) -> Result<(), WalletError> {
        tx.require_state(TransactionState::Built)?;
        self.key_manager.sign(&mut tx.inner).await?;
        tx.settle();
        if tx.state == TransactionState::Built {
            let missing = tx
                .inner
                .required_signers()
                .iter()
                .filter(|signer| !tx.inner.is_signed_by(signer))
                .count();
            tracing::info!(missing, "Signed, waiting for co-signers");
        }
        Ok(())
    }

    /// Submit a signed transaction and return the network's signature for it.
    pub async fn send_transaction(&self, tx: &mut Transaction) -> Result<String, WalletError> {
        tx.require_state(TransactionState::Signed)?;
        let signature = self
            .connection
            .send_transaction(&tx.inner)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Transaction rejected");
                WalletError::SubmissionRejected(e.to_string())
            })?;

        tx.state = TransactionState::Submitted;
        tx.submission = Some(signature.clone());
        tracing::info!(%signature, "Transaction submitted");
        Ok(signature)
    }
}

impl<C, K: std::fmt::Debug> std::fmt::Debug for WalletCore<C, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletCore")
            .field("key_manager", &self.key_manager)
            .finish_non_exhaustive()
    }
}
