//! Solana chain primitives for hellowallet.
//!
//! This crate handles Solana addresses, Ed25519 keypairs in the 64-byte
//! secret key layout used by Solana keystore files, message compilation
//! (legacy and v0) and the transaction wire format. It does not pull in
//! `solana-sdk`; the compact binary format is implemented by hand on top of
//! `ed25519-dalek` and `bs58`.

pub mod address;
pub mod error;
pub mod keypair;
pub mod transaction;

pub use address::{address_to_bytes, bytes_to_address, validate_address, PublicKey};
pub use error::SolError;
pub use keypair::{SolKeypair, SECRET_KEY_LENGTH, SEED_LENGTH};
pub use transaction::{
    compile_transaction, encode_compact_u16, serialize_message, serialize_transaction,
    system_transfer, CompiledInstruction, MessageVersion, SolAccountMeta, SolInstruction,
    SolTransaction, SIGNATURE_LENGTH, SYSTEM_PROGRAM_ID,
};
