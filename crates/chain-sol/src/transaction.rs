//! Solana message compilation, signature slots and wire format.
//!
//! Transactions are built by hand, no `solana-sdk`. Layout:
//!
//! ```text
//! Transaction:
//!   num_signatures          compact-u16
//!   signatures              64 bytes * num_signatures
//!   message:
//!     [version prefix]      u8, 0x80 for v0, absent for legacy
//!     num_required_sigs     u8
//!     num_readonly_signed   u8
//!     num_readonly_unsigned u8
//!     num_accounts          compact-u16
//!     account_keys          32 bytes * num_accounts
//!     recent_blockhash      32 bytes
//!     num_instructions      compact-u16
//!     instructions[]        (see below)
//!     [num_lookups]         compact-u16, v0 only (always 0 here)
//!
//! Instruction:
//!   program_id_index        u8
//!   num_accounts            compact-u16
//!   account_indices         u8 * num_accounts
//!   data_len                compact-u16
//!   data                    u8 * data_len
//! ```
//!
//! A signature slot holding 64 zero bytes is unfilled.

use ed25519_dalek::{Signature, VerifyingKey};

use crate::address::{bytes_to_address, PublicKey};
use crate::error::SolError;
use crate::keypair::SolKeypair;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// The Solana System Program public key: 32 zero bytes.
pub const SYSTEM_PROGRAM_ID: PublicKey = [0u8; 32];

/// System Program `Transfer` instruction index (little-endian u32).
const SYSTEM_TRANSFER_IX_INDEX: u32 = 2;

/// Ed25519 signature length.
pub const SIGNATURE_LENGTH: usize = 64;

/// High bit marking a versioned message; low bits carry the version.
const VERSION_PREFIX: u8 = 0x80;

/// Account indices are encoded as u8.
const MAX_ACCOUNT_KEYS: usize = 256;

const EMPTY_SIGNATURE: [u8; SIGNATURE_LENGTH] = [0u8; SIGNATURE_LENGTH];

// ---------------------------------------------------------------------------
// Compact-u16 encoding
// ---------------------------------------------------------------------------

/// Encode a `u16` value in Solana's compact-u16 format.
///
/// - Values 0..0x7f       -> 1 byte
/// - Values 0x80..0x3fff  -> 2 bytes
/// - Values 0x4000..      -> 3 bytes
pub fn encode_compact_u16(value: u16) -> Vec<u8> {
    let mut val = value as u32;
    let mut out = Vec::with_capacity(3);

    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if val == 0 {
            break;
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// A single account reference in a Solana instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolAccountMeta {
    pub pubkey: PublicKey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl SolAccountMeta {
    pub fn writable(pubkey: PublicKey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    pub fn readonly(pubkey: PublicKey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

/// A Solana instruction before it is compiled into a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolInstruction {
    pub program_id: PublicKey,
    pub accounts: Vec<SolAccountMeta>,
    pub data: Vec<u8>,
}

/// Message encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageVersion {
    Legacy,
    /// Versioned message without address table lookups.
    #[default]
    V0,
}

/// A compiled instruction where account references are replaced by u8 indices
/// into the transaction's `account_keys` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub account_indices: Vec<u8>,
    pub data: Vec<u8>,
}

/// A Solana transaction: compiled message plus one signature slot per
/// required signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolTransaction {
    pub version: MessageVersion,

    /// Account keys in canonical order:
    ///   1. writable signers (fee payer first)
    ///   2. read-only signers
    ///   3. writable non-signers
    ///   4. read-only non-signers
    pub account_keys: Vec<PublicKey>,

    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,

    pub recent_blockhash: [u8; 32],

    pub compiled_instructions: Vec<CompiledInstruction>,

    /// `signatures[i]` belongs to `account_keys[i]`.
    pub signatures: Vec<[u8; SIGNATURE_LENGTH]>,
}

impl SolTransaction {
    /// The bytes every signer signs.
    pub fn message_bytes(&self) -> Vec<u8> {
        serialize_message(self)
    }

    /// Public keys that must sign, in slot order.
    pub fn required_signers(&self) -> &[PublicKey] {
        let n = (self.num_required_signatures as usize).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    /// Slot index reserved for `pubkey`, if it is a required signer.
    pub fn signer_index(&self, pubkey: &PublicKey) -> Option<usize> {
        self.required_signers().iter().position(|k| k == pubkey)
    }

    /// The filled signature for `pubkey`, if any.
    pub fn signature_for(&self, pubkey: &PublicKey) -> Option<&[u8; SIGNATURE_LENGTH]> {
        let idx = self.signer_index(pubkey)?;
        self.signatures
            .get(idx)
            .filter(|sig| **sig != EMPTY_SIGNATURE)
    }

    pub fn is_signed_by(&self, pubkey: &PublicKey) -> bool {
        self.signature_for(pubkey).is_some()
    }

    /// Every required slot carries a signature.
    pub fn is_fully_signed(&self) -> bool {
        self.signatures.len() == self.required_signers().len()
            && self.signatures.iter().all(|sig| *sig != EMPTY_SIGNATURE)
    }

    /// Check `signature` over this message against `pubkey`.
    pub fn verify_signature(
        &self,
        pubkey: &PublicKey,
        signature: &[u8; SIGNATURE_LENGTH],
    ) -> Result<(), SolError> {
        let vk = VerifyingKey::from_bytes(pubkey)
            .map_err(|e| SolError::InvalidPublicKey(e.to_string()))?;
        vk.verify_strict(&self.message_bytes(), &Signature::from_bytes(signature))
            .map_err(|e| SolError::InvalidSignature(e.to_string()))
    }

    /// Write `signature` into the slot of `pubkey`. Other slots are left as
    /// they are. The signature is not verified here.
    pub fn add_signature(
        &mut self,
        pubkey: &PublicKey,
        signature: [u8; SIGNATURE_LENGTH],
    ) -> Result<(), SolError> {
        let idx = self
            .signer_index(pubkey)
            .ok_or_else(|| SolError::SignerNotRequired(bytes_to_address(pubkey)))?;

        // Transactions assembled by hand may come without slots.
        let required = self.required_signers().len();
        if self.signatures.len() < required {
            self.signatures.resize(required, EMPTY_SIGNATURE);
        }
        self.signatures[idx] = signature;
        Ok(())
    }

    /// Sign the message with `keypair` and fill its slot.
    pub fn partial_sign(&mut self, keypair: &SolKeypair) -> Result<(), SolError> {
        let pubkey = keypair.pubkey();
        if self.signer_index(&pubkey).is_none() {
            return Err(SolError::SignerNotRequired(keypair.address()));
        }
        let signature = keypair.sign_message(&self.message_bytes());
        self.add_signature(&pubkey, signature)
    }
}

// ---------------------------------------------------------------------------
// Transaction building
// ---------------------------------------------------------------------------

/// Build a System Program `Transfer` instruction moving `lamports` from
/// `from` to `to`.
pub fn system_transfer(
    from: &PublicKey,
    to: &PublicKey,
    lamports: u64,
) -> Result<SolInstruction, SolError> {
    if lamports == 0 {
        return Err(SolError::TransactionBuildError(
            "lamports must be > 0".into(),
        ));
    }

    // u32 LE instruction index + u64 LE lamports.
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&SYSTEM_TRANSFER_IX_INDEX.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());

    Ok(SolInstruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::writable(*from, true),
            SolAccountMeta::writable(*to, false),
        ],
        data,
    })
}

/// Compile instructions into an unsigned transaction with `fee_payer` at
/// index 0. The result is deterministic for identical inputs.
pub fn compile_transaction(
    instructions: &[SolInstruction],
    fee_payer: &PublicKey,
    recent_blockhash: &[u8; 32],
    version: MessageVersion,
) -> Result<SolTransaction, SolError> {
    struct AccountEntry {
        pubkey: PublicKey,
        is_signer: bool,
        is_writable: bool,
    }

    // Instruction account lists are tiny; a Vec keeps insertion order.
    let mut entries: Vec<AccountEntry> = Vec::new();

    let mut upsert = |pubkey: PublicKey, signer: bool, writable: bool| {
        if let Some(entry) = entries.iter_mut().find(|e| e.pubkey == pubkey) {
            entry.is_signer |= signer;
            entry.is_writable |= writable;
        } else {
            entries.push(AccountEntry {
                pubkey,
                is_signer: signer,
                is_writable: writable,
            });
        }
    };

    upsert(*fee_payer, true, true);

    for ix in instructions {
        for meta in &ix.accounts {
            upsert(meta.pubkey, meta.is_signer, meta.is_writable);
        }
        upsert(ix.program_id, false, false);
    }

    if entries.len() > MAX_ACCOUNT_KEYS {
        return Err(SolError::TransactionBuildError(format!(
            "too many account keys: {} (max {MAX_ACCOUNT_KEYS})",
            entries.len()
        )));
    }

    // Stable sort: the fee payer is inserted first and is a writable signer,
    // so it stays at index 0.
    entries.sort_by_key(|e| match (e.is_signer, e.is_writable) {
        (true, true) => 0u8,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    });

    let num_signers = entries.iter().filter(|e| e.is_signer).count();
    let num_readonly_signed = entries
        .iter()
        .filter(|e| e.is_signer && !e.is_writable)
        .count();
    let num_readonly_unsigned = entries
        .iter()
        .filter(|e| !e.is_signer && !e.is_writable)
        .count();

    let account_keys: Vec<PublicKey> = entries.iter().map(|e| e.pubkey).collect();

    let index_of = |key: &PublicKey, what: &str| -> Result<u8, SolError> {
        account_keys
            .iter()
            .position(|k| k == key)
            .map(|i| i as u8)
            .ok_or_else(|| SolError::TransactionBuildError(format!("{what} not in account keys")))
    };

    let mut compiled = Vec::with_capacity(instructions.len());
    for ix in instructions {
        let program_id_index = index_of(&ix.program_id, "program_id")?;
        let account_indices = ix
            .accounts
            .iter()
            .map(|meta| index_of(&meta.pubkey, "account"))
            .collect::<Result<Vec<u8>, SolError>>()?;

        compiled.push(CompiledInstruction {
            program_id_index,
            account_indices,
            data: ix.data.clone(),
        });
    }

    Ok(SolTransaction {
        version,
        account_keys,
        num_required_signatures: num_signers as u8,
        num_readonly_signed: num_readonly_signed as u8,
        num_readonly_unsigned: num_readonly_unsigned as u8,
        recent_blockhash: *recent_blockhash,
        compiled_instructions: compiled,
        signatures: vec![EMPTY_SIGNATURE; num_signers],
    })
}

/// Serialize the transaction message (the bytes that get signed).
pub fn serialize_message(tx: &SolTransaction) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);

    if tx.version == MessageVersion::V0 {
        buf.push(VERSION_PREFIX);
    }

    buf.push(tx.num_required_signatures);
    buf.push(tx.num_readonly_signed);
    buf.push(tx.num_readonly_unsigned);

    buf.extend_from_slice(&encode_compact_u16(tx.account_keys.len() as u16));
    for key in &tx.account_keys {
        buf.extend_from_slice(key);
    }

    buf.extend_from_slice(&tx.recent_blockhash);

    buf.extend_from_slice(&encode_compact_u16(
        tx.compiled_instructions.len() as u16
    ));
    for ix in &tx.compiled_instructions {
        buf.push(ix.program_id_index);

        buf.extend_from_slice(&encode_compact_u16(ix.account_indices.len() as u16));
        buf.extend_from_slice(&ix.account_indices);

        buf.extend_from_slice(&encode_compact_u16(ix.data.len() as u16));
        buf.extend_from_slice(&ix.data);
    }

    if tx.version == MessageVersion::V0 {
        // No address table lookups.
        buf.extend_from_slice(&encode_compact_u16(0));
    }

    buf
}

/// Serialize signatures and message into the wire format accepted by
/// `sendTransaction`.
pub fn serialize_transaction(tx: &SolTransaction) -> Vec<u8> {
    let message = serialize_message(tx);
    let mut wire =
        Vec::with_capacity(3 + tx.signatures.len() * SIGNATURE_LENGTH + message.len());

    wire.extend_from_slice(&encode_compact_u16(tx.signatures.len() as u16));
    for sig in &tx.signatures {
        wire.extend_from_slice(sig);
    }
    wire.extend_from_slice(&message);

    wire
}
