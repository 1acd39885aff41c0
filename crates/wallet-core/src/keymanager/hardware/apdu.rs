//! APDU framing for the Solana app on Ledger-style signing devices.

use crate::error::WalletError;

pub const CLA: u8 = 0xE0;

pub const INS_GET_APP_CONFIGURATION: u8 = 0x04;
pub const INS_GET_PUBKEY: u8 = 0x05;
pub const INS_SIGN_MESSAGE: u8 = 0x06;

pub const P1_NON_CONFIRM: u8 = 0x00;
pub const P1_CONFIRM: u8 = 0x01;

/// This chunk continues the previous one.
pub const P2_EXTEND: u8 = 0x01;
/// More chunks follow.
pub const P2_MORE: u8 = 0x02;

/// APDU payloads are length-prefixed with a single byte.
pub const MAX_CHUNK_SIZE: usize = 255;

pub const SW_OK: u16 = 0x9000;
pub const SW_USER_REJECTED: u16 = 0x6985;

const HARDENED: u32 = 0x8000_0000;

/// A command APDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl Apdu {
    pub fn new(ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            cla: CLA,
            ins,
            p1,
            p2,
            data,
        }
    }

    /// `CLA INS P1 P2 Lc data`
    pub fn to_bytes(&self) -> Result<Vec<u8>, WalletError> {
        let lc = u8::try_from(self.data.len()).map_err(|_| {
            WalletError::DeviceCommunicationError(format!(
                "APDU payload of {} bytes exceeds {MAX_CHUNK_SIZE}",
                self.data.len()
            ))
        })?;
        let mut out = Vec::with_capacity(5 + self.data.len());
        out.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2, lc]);
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        let (header, data) = bytes
            .split_first_chunk::<5>()
            .ok_or_else(|| WalletError::DeviceCommunicationError("short APDU".into()))?;
        if header[4] as usize != data.len() {
            return Err(WalletError::DeviceCommunicationError(format!(
                "APDU length byte {} does not match payload of {} bytes",
                header[4],
                data.len()
            )));
        }
        Ok(Self {
            cla: header[0],
            ins: header[1],
            p1: header[2],
            p2: header[3],
            data: data.to_vec(),
        })
    }
}

/// A response APDU: payload plus status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub status: u16,
}

impl ApduResponse {
    pub fn ok(data: Vec<u8>) -> Self {
        Self { data, status: SW_OK }
    }

    pub fn status(status: u16) -> Self {
        Self {
            data: Vec::new(),
            status,
        }
    }

    /// Payload of a successful response, or the matching error.
    pub fn into_result(self) -> Result<Vec<u8>, WalletError> {
        match self.status {
            SW_OK => Ok(self.data),
            SW_USER_REJECTED => Err(WalletError::UserRejected),
            sw => Err(WalletError::DeviceCommunicationError(format!(
                "device returned status 0x{sw:04x}"
            ))),
        }
    }
}

/// Parse `44'/501'/0'` (an optional leading `m/` is accepted). `'` or `h`
/// marks a hardened component.
pub fn parse_derivation_path(path: &str) -> Result<Vec<u32>, WalletError> {
    let trimmed = path.trim();
    let trimmed = trimmed.strip_prefix("m/").unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(WalletError::Config("empty derivation path".into()));
    }

    let components = trimmed
        .split('/')
        .map(|part| {
            let (digits, hardened) = match part.strip_suffix(['\'', 'h']) {
                Some(d) => (d, true),
                None => (part, false),
            };
            let index: u32 = digits
                .parse()
                .ok()
                .filter(|i| i & HARDENED == 0)
                .ok_or_else(|| {
                    WalletError::Config(format!("invalid derivation path component: {part}"))
                })?;
            Ok(if hardened { index | HARDENED } else { index })
        })
        .collect::<Result<Vec<u32>, WalletError>>()?;

    if components.len() > u8::MAX as usize {
        return Err(WalletError::Config("derivation path too long".into()));
    }
    Ok(components)
}

/// Component count followed by big-endian u32 components.
pub fn encode_derivation_path(components: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + components.len() * 4);
    // parse_derivation_path caps the count at u8::MAX.
    out.push(components.len() as u8);
    for c in components {
        out.extend_from_slice(&c.to_be_bytes());
    }
    out
}

/// Split a payload into sign APDUs. Every chunk but the first carries
/// `P2_EXTEND`; every chunk but the last carries `P2_MORE`.
pub fn chunk_payload(ins: u8, p1: u8, payload: &[u8]) -> Vec<Apdu> {
    if payload.is_empty() {
        return vec![Apdu::new(ins, p1, 0, Vec::new())];
    }
    let chunks: Vec<&[u8]> = payload.chunks(MAX_CHUNK_SIZE).collect();
    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut p2 = 0;
            if i > 0 {
                p2 |= P2_EXTEND;
            }
            if i < last {
                p2 |= P2_MORE;
            }
            Apdu::new(ins, p1, p2, chunk.to_vec())
        })
        .collect()
}
