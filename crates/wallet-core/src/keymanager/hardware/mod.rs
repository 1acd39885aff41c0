//! Hardware signing device backend.
//!
//! Keys never leave the device. The backend owns one transport for its whole
//! lifetime and serializes exchanges through a mutex; a signing request holds
//! the lock until the device answers, times out or is rejected.

pub mod apdu;
pub mod transport;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chain_sol::{bytes_to_address, PublicKey, SolTransaction, SIGNATURE_LENGTH};
use tokio::sync::{Mutex, OnceCell};

use self::apdu::{
    chunk_payload, encode_derivation_path, parse_derivation_path, Apdu, INS_GET_APP_CONFIGURATION,
    INS_GET_PUBKEY, INS_SIGN_MESSAGE, P1_CONFIRM, P1_NON_CONFIRM,
};
pub use self::transport::{DeviceTransport, TcpDeviceTransport};
use super::KeyManager;
use crate::config::HardwareConfig;
use crate::error::WalletError;

pub struct HardwareKeyManager<T = TcpDeviceTransport> {
    transport: Mutex<T>,
    derivation_path: Vec<u32>,
    timeout: Duration,
    confirm_timeout: Duration,
    pubkey: OnceCell<PublicKey>,
}

impl HardwareKeyManager<TcpDeviceTransport> {
    /// Connect to the device at `config.device_address` and check that the
    /// Solana app answers.
    pub async fn connect(config: &HardwareConfig) -> Result<Self, WalletError> {
        let address = config.device_address.as_str();
        let transport = tokio::time::timeout(config.timeout(), TcpDeviceTransport::connect(address))
            .await
            .map_err(|_| WalletError::DeviceNotFound(format!("{address}: connect timed out")))??;
        Self::with_transport(transport, config).await
    }
}

impl<T: DeviceTransport> HardwareKeyManager<T> {
    /// Wrap an open transport and run the app configuration handshake.
    pub async fn with_transport(transport: T, config: &HardwareConfig) -> Result<Self, WalletError> {
        let km = Self {
            transport: Mutex::new(transport),
            derivation_path: parse_derivation_path(&config.derivation_path)?,
            timeout: config.timeout(),
            confirm_timeout: config.confirm_timeout(),
            pubkey: OnceCell::new(),
        };

        let handshake = Apdu::new(INS_GET_APP_CONFIGURATION, P1_NON_CONFIRM, 0, Vec::new());
        let app = km
            .exchange(&[handshake], km.timeout)
            .await
            .map_err(|e| WalletError::DeviceNotFound(format!("Solana app not reachable: {e}")))?;

        // blind signing flag, pubkey display mode, major, minor, patch
        if let [_, _, major, minor, patch, ..] = app[..] {
            tracing::info!(version = %format!("{major}.{minor}.{patch}"), "Solana app ready");
        }
        Ok(km)
    }

    /// Send `apdus` in order under one lock and one deadline. Returns the
    /// payload of the last response.
    async fn exchange(&self, apdus: &[Apdu], limit: Duration) -> Result<Vec<u8>, WalletError> {
        let mut transport = self.transport.lock().await;
        let run = async {
            let mut last = Vec::new();
            for apdu in apdus {
                tracing::debug!(ins = apdu.ins, p2 = apdu.p2, len = apdu.data.len(), "APDU exchange");
                last = transport.exchange(apdu).await?.into_result()?;
            }
            Ok::<_, WalletError>(last)
        };
        match tokio::time::timeout(limit, run).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_ms = limit.as_millis() as u64, "Signing device timed out");
                Err(WalletError::DeviceTimeout(limit.as_millis() as u64))
            }
        }
    }

    async fn fetch_public_key(&self) -> Result<PublicKey, WalletError> {
        let request = Apdu::new(
            INS_GET_PUBKEY,
            P1_NON_CONFIRM,
            0,
            encode_derivation_path(&self.derivation_path),
        );
        let data = self.exchange(&[request], self.timeout).await?;
        PublicKey::try_from(data.as_slice()).map_err(|_| {
            WalletError::DeviceCommunicationError(format!(
                "expected a 32-byte public key, got {} bytes",
                data.len()
            ))
        })
    }
}

#[async_trait]
impl<T: DeviceTransport> KeyManager for HardwareKeyManager<T> {
    async fn public_key(&self) -> Result<PublicKey, WalletError> {
        self.pubkey
            .get_or_try_init(|| self.fetch_public_key())
            .await
            .copied()
    }

    async fn sign(&self, tx: &mut SolTransaction) -> Result<(), WalletError> {
        let pubkey = self.public_key().await?;
        let address = bytes_to_address(&pubkey);
        if tx.signer_index(&pubkey).is_none() {
            return Err(WalletError::SigningFailed(format!(
                "{address} is not a required signer"
            )));
        }

        let mut payload = vec![1u8];
        payload.extend(encode_derivation_path(&self.derivation_path));
        payload.extend(tx.message_bytes());
        let apdus = chunk_payload(INS_SIGN_MESSAGE, P1_CONFIRM, &payload);

        tracing::info!(%address, chunks = apdus.len(), "Waiting for approval on device");
        let data = self.exchange(&apdus, self.confirm_timeout).await?;

        let signature: [u8; SIGNATURE_LENGTH] = data.as_slice().try_into().map_err(|_| {
            WalletError::DeviceCommunicationError(format!(
                "expected a {SIGNATURE_LENGTH}-byte signature, got {} bytes",
                data.len()
            ))
        })?;
        tx.verify_signature(&pubkey, &signature)
            .map_err(|_| WalletError::SignatureMismatch(address.clone()))?;
        tx.add_signature(&pubkey, signature)
            .map_err(|e| WalletError::SigningFailed(e.to_string()))?;

        tracing::debug!(%address, "Signed on device");
        Ok(())
    }
}

impl<T> fmt::Debug for HardwareKeyManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareKeyManager")
            .field("derivation_path", &self.derivation_path)
            .field("timeout", &self.timeout)
            .field("confirm_timeout", &self.confirm_timeout)
            .field("pubkey", &self.pubkey.get().map(bytes_to_address))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::apdu::{ApduResponse, P2_EXTEND, P2_MORE, SW_USER_REJECTED};
    use super::*;
    use chain_sol::{compile_transaction, system_transfer, MessageVersion, SolAccountMeta, SolInstruction, SolKeypair};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Approve,
        Reject,
        Hang,
        WrongSignature,
        AppClosed,
    }

    /// In-process Solana app: reassembles sign chunks and signs with a fixed
    /// seed.
    struct MockDevice {
        keypair: SolKeypair,
        mode: Mode,
        pending: Vec<u8>,
        log: Arc<StdMutex<Vec<Apdu>>>,
    }

    impl MockDevice {
        fn new(mode: Mode) -> (Self, Arc<StdMutex<Vec<Apdu>>>) {
            let log = Arc::new(StdMutex::new(Vec::new()));
            let device = Self {
                keypair: SolKeypair::from_seed(&[0x4Cu8; 32]),
                mode,
                pending: Vec::new(),
                log: Arc::clone(&log),
            };
            (device, log)
        }

        fn sign_pending(&self) -> ApduResponse {
            // signer count, path count, path, message
            let path_len = 1 + 4 * self.pending[1] as usize;
            let message = &self.pending[1 + path_len..];
            match self.mode {
                Mode::Reject => ApduResponse::status(SW_USER_REJECTED),
                Mode::WrongSignature => ApduResponse::ok(self.keypair.sign_message(b"other").to_vec()),
                _ => ApduResponse::ok(self.keypair.sign_message(message).to_vec()),
            }
        }
    }

    #[async_trait]
    impl DeviceTransport for MockDevice {
        async fn exchange(&mut self, apdu: &Apdu) -> Result<ApduResponse, WalletError> {
            self.log.lock().unwrap().push(apdu.clone());
            match apdu.ins {
                INS_GET_APP_CONFIGURATION if self.mode == Mode::AppClosed => {
                    Ok(ApduResponse::status(0x6e01))
                }
                INS_GET_APP_CONFIGURATION => Ok(ApduResponse::ok(vec![0, 0, 1, 4, 1])),
                INS_GET_PUBKEY => Ok(ApduResponse::ok(self.keypair.pubkey().to_vec())),
                INS_SIGN_MESSAGE => {
                    if apdu.p2 & P2_EXTEND == 0 {
                        self.pending.clear();
                    }
                    self.pending.extend_from_slice(&apdu.data);
                    if apdu.p2 & P2_MORE != 0 {
                        return Ok(ApduResponse::ok(Vec::new()));
                    }
                    if self.mode == Mode::Hang {
                        std::future::pending::<()>().await;
                    }
                    Ok(self.sign_pending())
                }
                _ => Ok(ApduResponse::status(0x6d00)),
            }
        }
    }

    fn config() -> HardwareConfig {
        HardwareConfig {
            confirm_timeout_ms: 200,
            ..HardwareConfig::default()
        }
    }

    async fn manager(mode: Mode) -> (HardwareKeyManager<MockDevice>, Arc<StdMutex<Vec<Apdu>>>) {
        let (device, log) = MockDevice::new(mode);
        let km = HardwareKeyManager::with_transport(device, &config()).await.unwrap();
        (km, log)
    }

    /// A transaction whose message needs several APDU chunks.
    fn large_tx(signer: PublicKey) -> SolTransaction {
        let ix = SolInstruction {
            program_id: [5u8; 32],
            accounts: vec![SolAccountMeta::writable(signer, true)],
            data: vec![0xAB; 400],
        };
        compile_transaction(&[ix], &signer, &[2u8; 32], MessageVersion::V0).unwrap()
    }

    // -- construction --

    #[tokio::test]
    async fn handshake_runs_on_construction() {
        let (_km, log) = manager(Mode::Approve).await;
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].ins, INS_GET_APP_CONFIGURATION);
    }

    #[tokio::test]
    async fn closed_app_is_device_not_found() {
        let (device, _) = MockDevice::new(Mode::AppClosed);
        let err = HardwareKeyManager::with_transport(device, &config())
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn bad_derivation_path_is_rejected() {
        let (device, _) = MockDevice::new(Mode::Approve);
        let config = HardwareConfig {
            derivation_path: "44'/solana".into(),
            ..config()
        };
        assert!(matches!(
            HardwareKeyManager::with_transport(device, &config).await,
            Err(WalletError::Config(_))
        ));
    }

    // -- public key --

    #[tokio::test]
    async fn public_key_is_fetched_once() {
        let (km, log) = manager(Mode::Approve).await;
        let expected = SolKeypair::from_seed(&[0x4Cu8; 32]);

        assert_eq!(km.address().await.unwrap(), expected.address());
        assert_eq!(km.public_key().await.unwrap(), expected.pubkey());

        let log = log.lock().unwrap();
        let lookups: Vec<&Apdu> = log.iter().filter(|a| a.ins == INS_GET_PUBKEY).collect();
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].data, encode_derivation_path(&[0x8000_002C, 0x8000_01F5, 0x8000_0000]));
    }

    // -- signing --

    #[tokio::test]
    async fn sign_reassembles_chunks_and_fills_slot() {
        let (km, log) = manager(Mode::Approve).await;
        let signer = km.public_key().await.unwrap();
        let mut tx = large_tx(signer);
        assert!(tx.message_bytes().len() > 255);

        km.sign(&mut tx).await.unwrap();

        let sig = tx.signature_for(&signer).unwrap();
        assert!(tx.verify_signature(&signer, sig).is_ok());

        let log = log.lock().unwrap();
        let chunks: Vec<&Apdu> = log.iter().filter(|a| a.ins == INS_SIGN_MESSAGE).collect();
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|a| a.p1 == P1_CONFIRM));
        assert_eq!(chunks[0].data[0], 1);
    }

    #[tokio::test]
    async fn rejection_on_device() {
        let (km, _) = manager(Mode::Reject).await;
        let signer = km.public_key().await.unwrap();
        let mut tx = large_tx(signer);

        assert!(matches!(km.sign(&mut tx).await, Err(WalletError::UserRejected)));
        assert!(!tx.is_signed_by(&signer));
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let (km, _) = manager(Mode::Hang).await;
        let signer = km.public_key().await.unwrap();
        let ix = system_transfer(&signer, &[1u8; 32], 10).unwrap();
        let mut tx = compile_transaction(&[ix], &signer, &[2u8; 32], MessageVersion::V0).unwrap();

        assert!(matches!(
            km.sign(&mut tx).await,
            Err(WalletError::DeviceTimeout(200))
        ));
    }

    #[tokio::test]
    async fn wrong_signature_is_not_written() {
        let (km, _) = manager(Mode::WrongSignature).await;
        let signer = km.public_key().await.unwrap();
        let mut tx = large_tx(signer);

        assert!(matches!(
            km.sign(&mut tx).await,
            Err(WalletError::SignatureMismatch(_))
        ));
        assert!(!tx.is_signed_by(&signer));
    }

    #[tokio::test]
    async fn sign_keeps_cosigner_signature() {
        let (km, _) = manager(Mode::Approve).await;
        let signer = km.public_key().await.unwrap();
        let cosigner = SolKeypair::from_seed(&[0x61u8; 32]);
        let ix = SolInstruction {
            program_id: [5u8; 32],
            accounts: vec![
                SolAccountMeta::writable(signer, true),
                SolAccountMeta::readonly(cosigner.pubkey(), true),
            ],
            data: vec![7; 300],
        };
        let mut tx = compile_transaction(&[ix], &signer, &[2u8; 32], MessageVersion::V0).unwrap();
        tx.partial_sign(&cosigner).unwrap();
        let cosig = *tx.signature_for(&cosigner.pubkey()).unwrap();

        km.sign(&mut tx).await.unwrap();

        assert_eq!(tx.signature_for(&cosigner.pubkey()), Some(&cosig));
        assert!(tx.is_fully_signed());
    }

    #[tokio::test]
    async fn device_key_not_a_signer() {
        let (km, log) = manager(Mode::Approve).await;
        let ix = system_transfer(&[1u8; 32], &[2u8; 32], 10).unwrap();
        let mut tx = compile_transaction(&[ix], &[1u8; 32], &[2u8; 32], MessageVersion::V0).unwrap();

        assert!(matches!(
            km.sign(&mut tx).await,
            Err(WalletError::SigningFailed(_))
        ));
        assert!(log.lock().unwrap().iter().all(|a| a.ins != INS_SIGN_MESSAGE));
    }

    // -- over TCP --

    /// Runs a [`MockDevice`] per connection behind the TCP framing. The first
    /// signing request across all connections is answered after `first_delay`.
    async fn spawn_tcp_device(first_delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let signs = Arc::new(AtomicUsize::new(0));
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                tokio::spawn(serve_tcp_device(sock, Arc::clone(&signs), first_delay));
            }
        });
        addr
    }

    async fn serve_tcp_device(mut sock: TcpStream, signs: Arc<AtomicUsize>, first_delay: Duration) {
        let (mut device, _) = MockDevice::new(Mode::Approve);
        while let Ok(len) = sock.read_u32().await {
            let mut frame = vec![0u8; len as usize];
            if sock.read_exact(&mut frame).await.is_err() {
                return;
            }
            let apdu = Apdu::from_bytes(&frame).unwrap();
            let final_chunk = apdu.ins == INS_SIGN_MESSAGE && apdu.p2 & P2_MORE == 0;
            if final_chunk && signs.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(first_delay).await;
            }
            let resp = device.exchange(&apdu).await.unwrap();
            if sock.write_u32(resp.data.len() as u32).await.is_err() {
                return;
            }
            let _ = sock.write_all(&resp.data).await;
            let _ = sock.write_u16(resp.status).await;
        }
    }

    #[tokio::test]
    async fn late_device_reply_does_not_poison_next_sign() {
        let addr = spawn_tcp_device(Duration::from_millis(400)).await;
        let config = HardwareConfig {
            device_address: addr,
            ..config()
        };
        let km = HardwareKeyManager::connect(&config).await.unwrap();
        let signer = km.public_key().await.unwrap();
        let ix = system_transfer(&signer, &[1u8; 32], 10).unwrap();
        let mut tx = compile_transaction(&[ix], &signer, &[2u8; 32], MessageVersion::V0).unwrap();

        assert!(matches!(
            km.sign(&mut tx).await,
            Err(WalletError::DeviceTimeout(200))
        ));
        assert!(!tx.is_signed_by(&signer));

        // The first reply arrives on the abandoned exchange.
        tokio::time::sleep(Duration::from_millis(300)).await;

        km.sign(&mut tx).await.unwrap();
        let sig = tx.signature_for(&signer).unwrap();
        assert!(tx.verify_signature(&signer, sig).is_ok());
    }

    #[test]
    fn debug_shows_path_not_transport() {
        let (device, _) = MockDevice::new(Mode::Approve);
        let km = HardwareKeyManager {
            transport: Mutex::new(device),
            derivation_path: vec![1, 2],
            timeout: Duration::from_millis(1),
            confirm_timeout: Duration::from_millis(1),
            pubkey: OnceCell::new(),
        };
        let debug = format!("{km:?}");
        assert!(debug.contains("derivation_path: [1, 2]"));
        assert!(debug.contains("pubkey: None"));
    }
}
