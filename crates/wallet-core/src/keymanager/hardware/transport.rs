//! Device transports.
//!
//! [`TcpDeviceTransport`] speaks the APDU-over-TCP framing used by device
//! emulators and USB bridges:
//!
//! ```text
//! request:   u32 BE apdu_len | apdu
//! response:  u32 BE data_len | data | u16 BE status word
//! ```

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::apdu::{Apdu, ApduResponse};
use crate::error::WalletError;

/// Upper bound on a response payload; anything larger is a framing error.
const MAX_RESPONSE_LEN: u32 = 64 * 1024;

/// One request/response exchange with a signing device.
///
/// Callers may drop an `exchange` future part way (a timeout does this).
/// The next call must not read the abandoned request's reply.
#[async_trait]
pub trait DeviceTransport: Send {
    async fn exchange(&mut self, apdu: &Apdu) -> Result<ApduResponse, WalletError>;
}

#[derive(Debug)]
pub struct TcpDeviceTransport {
    stream: TcpStream,
    address: String,
    /// Set while a frame is outstanding. Still set on entry means the last
    /// exchange never finished and the stream is out of step.
    in_flight: bool,
}

async fn open(address: &str) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect(address).await?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(address, error = %e, "Could not set TCP_NODELAY on device socket");
    }
    Ok(stream)
}

impl TcpDeviceTransport {
    pub async fn connect(address: &str) -> Result<Self, WalletError> {
        let stream = open(address)
            .await
            .map_err(|e| WalletError::DeviceNotFound(format!("{address}: {e}")))?;
        tracing::debug!(address, "Connected to signing device");
        Ok(Self {
            stream,
            address: address.to_string(),
            in_flight: false,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn reconnect(&mut self) -> Result<(), WalletError> {
        tracing::warn!(address = %self.address, "Previous device exchange was interrupted, reconnecting");
        self.stream = open(&self.address).await.map_err(|e| {
            WalletError::DeviceCommunicationError(format!("reconnect to {}: {e}", self.address))
        })?;
        self.in_flight = false;
        Ok(())
    }

    async fn round_trip(&mut self, bytes: &[u8]) -> Result<ApduResponse, WalletError> {
        let mut frame = Vec::with_capacity(4 + bytes.len());
        frame.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        frame.extend_from_slice(bytes);
        self.stream.write_all(&frame).await.map_err(io_error)?;
        self.stream.flush().await.map_err(io_error)?;

        let len = self.stream.read_u32().await.map_err(io_error)?;
        if len > MAX_RESPONSE_LEN {
            return Err(WalletError::DeviceCommunicationError(format!(
                "response of {len} bytes exceeds limit"
            )));
        }
        let mut data = vec![0u8; len as usize];
        self.stream.read_exact(&mut data).await.map_err(io_error)?;
        let status = self.stream.read_u16().await.map_err(io_error)?;

        Ok(ApduResponse { data, status })
    }
}

fn io_error(e: std::io::Error) -> WalletError {
    WalletError::DeviceCommunicationError(e.to_string())
}

#[async_trait]
impl DeviceTransport for TcpDeviceTransport {
    async fn exchange(&mut self, apdu: &Apdu) -> Result<ApduResponse, WalletError> {
        let bytes = apdu.to_bytes()?;
        if self.in_flight {
            self.reconnect().await?;
        }

        // Left set on any error or cancellation below.
        self.in_flight = true;
        let response = self.round_trip(&bytes).await?;
        self.in_flight = false;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymanager::hardware::apdu::{INS_GET_PUBKEY, P1_NON_CONFIRM, SW_OK};
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn exchange_uses_length_prefixed_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let len = sock.read_u32().await.unwrap();
            let mut apdu = vec![0u8; len as usize];
            sock.read_exact(&mut apdu).await.unwrap();

            sock.write_u32(3).await.unwrap();
            sock.write_all(&[9, 8, 7]).await.unwrap();
            sock.write_u16(SW_OK).await.unwrap();
            apdu
        });

        let mut transport = TcpDeviceTransport::connect(&addr).await.unwrap();
        assert_eq!(transport.address(), addr);
        let request = Apdu::new(INS_GET_PUBKEY, P1_NON_CONFIRM, 0, vec![0xAA, 0xBB]);
        let response = transport.exchange(&request).await.unwrap();

        assert_eq!(response, ApduResponse::ok(vec![9, 8, 7]));
        let received = server.await.unwrap();
        assert_eq!(Apdu::from_bytes(&received).unwrap(), request);
    }

    #[tokio::test]
    async fn closed_connection_is_a_communication_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);
        });

        let mut transport = TcpDeviceTransport::connect(&addr).await.unwrap();
        let err = transport
            .exchange(&Apdu::new(INS_GET_PUBKEY, P1_NON_CONFIRM, 0, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::DeviceCommunicationError(_)));
    }

    /// Serves one frame per connection: the first connection answers late
    /// with `[1]`, later ones answer at once with `[2]`.
    async fn spawn_late_then_prompt_device() -> (String, tokio::task::JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let mut connections = 0;
            loop {
                let Ok(Ok((mut sock, _))) =
                    tokio::time::timeout(Duration::from_millis(800), listener.accept()).await
                else {
                    return connections;
                };
                connections += 1;
                let late = connections == 1;
                tokio::spawn(async move {
                    while let Ok(len) = sock.read_u32().await {
                        let mut apdu = vec![0u8; len as usize];
                        sock.read_exact(&mut apdu).await.unwrap();
                        if late {
                            tokio::time::sleep(Duration::from_millis(300)).await;
                        }
                        let reply = if late { 1u8 } else { 2u8 };
                        if sock.write_u32(1).await.is_err() {
                            return;
                        }
                        let _ = sock.write_all(&[reply]).await;
                        let _ = sock.write_u16(SW_OK).await;
                    }
                });
            }
        });
        (addr, server)
    }

    #[tokio::test]
    async fn abandoned_exchange_does_not_leak_into_the_next() {
        let (addr, server) = spawn_late_then_prompt_device().await;
        let mut transport = TcpDeviceTransport::connect(&addr).await.unwrap();
        let request = Apdu::new(INS_GET_PUBKEY, P1_NON_CONFIRM, 0, vec![]);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(100), transport.exchange(&request)).await;
        assert!(abandoned.is_err());

        // Give the late reply time to land on the old socket.
        tokio::time::sleep(Duration::from_millis(400)).await;

        let response = transport.exchange(&request).await.unwrap();
        assert_eq!(response, ApduResponse::ok(vec![2]));
        let again = transport.exchange(&request).await.unwrap();
        assert_eq!(again, ApduResponse::ok(vec![2]));

        assert_eq!(server.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn completed_exchanges_reuse_the_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            while let Ok(len) = sock.read_u32().await {
                let mut apdu = vec![0u8; len as usize];
                sock.read_exact(&mut apdu).await.unwrap();
                sock.write_u32(0).await.unwrap();
                sock.write_u16(SW_OK).await.unwrap();
            }
        });

        let mut transport = TcpDeviceTransport::connect(&addr).await.unwrap();
        let request = Apdu::new(INS_GET_PUBKEY, P1_NON_CONFIRM, 0, vec![]);
        for _ in 0..3 {
            assert_eq!(transport.exchange(&request).await.unwrap(), ApduResponse::ok(vec![]));
        }
    }

    #[tokio::test]
    async fn connect_refused_is_not_found() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(matches!(
            TcpDeviceTransport::connect(&addr).await,
            Err(WalletError::DeviceNotFound(_))
        ));
    }
}
