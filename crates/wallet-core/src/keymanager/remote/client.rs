//! HTTP client for the remote custody signing API.
//!
//! Every request carries three headers:
//!
//! - `X-Api-Key`: the API key id
//! - `X-Timestamp`: unix time in milliseconds
//! - `X-Signature`: hex HMAC-SHA256 of `"{timestamp}.{body}"` keyed by the
//!   API secret

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::WalletError;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_API_KEY: &str = "X-Api-Key";
pub const HEADER_TIMESTAMP: &str = "X-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Signature";

pub const PATH_PUBLIC_KEY: &str = "/v1/public_key";
pub const PATH_SIGN_RAW_PAYLOAD: &str = "/v1/sign_raw_payload";

#[derive(Debug, Serialize, Deserialize)]
pub struct PublicKeyRequest {
    pub organization_id: String,
    pub sign_with: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublicKeyResponse {
    /// Base58.
    pub public_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignRawPayloadRequest {
    pub organization_id: String,
    pub sign_with: String,
    /// Hex-encoded message bytes.
    pub payload: String,
    pub encoding: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignRawPayloadResponse {
    /// Hex-encoded 64-byte Ed25519 signature.
    pub signature: String,
}

/// Hex HMAC-SHA256 over `"{timestamp}.{body}"`.
pub fn request_signature(secret: &[u8], timestamp: u64, body: &str) -> Result<String, WalletError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| WalletError::InvalidCredential(format!("API secret: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug)]
pub struct CustodyClient {
    http: Client,
    base_url: String,
    organization_id: String,
    api_key_id: String,
    api_secret: SecretString,
    timeout: Duration,
}

impl CustodyClient {
    pub fn new(
        base_url: &str,
        organization_id: &str,
        api_key_id: &str,
        api_secret: SecretString,
        timeout: Duration,
    ) -> Result<Self, WalletError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::Config(format!("custody HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            organization_id: organization_id.to_string(),
            api_key_id: api_key_id.to_string(),
            api_secret,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn public_key(&self, sign_with: &str) -> Result<String, WalletError> {
        let req = PublicKeyRequest {
            organization_id: self.organization_id.clone(),
            sign_with: sign_with.to_string(),
        };
        let resp: PublicKeyResponse = self.post(PATH_PUBLIC_KEY, &req).await?;
        Ok(resp.public_key)
    }

    /// Ask the service to sign `payload` with the key `sign_with`. Returns the
    /// raw signature hex.
    pub async fn sign_raw_payload(&self, sign_with: &str, payload: &[u8]) -> Result<String, WalletError> {
        let req = SignRawPayloadRequest {
            organization_id: self.organization_id.clone(),
            sign_with: sign_with.to_string(),
            payload: hex::encode(payload),
            encoding: "hex".to_string(),
        };
        let resp: SignRawPayloadResponse = self.post(PATH_SIGN_RAW_PAYLOAD, &req).await?;
        Ok(resp.signature)
    }

    async fn post<Req, Resp>(&self, path: &str, req: &Req) -> Result<Resp, WalletError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_string(req)
            .map_err(|e| WalletError::RemoteServiceError(format!("encode request: {e}")))?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let signature =
            request_signature(self.api_secret.expose_secret().as_bytes(), timestamp, &body)?;

        let url = format!("{}{path}", self.base_url);
        tracing::debug!(%url, "Custody request");

        let resp = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(HEADER_API_KEY, &self.api_key_id)
            .header(HEADER_TIMESTAMP, timestamp.to_string())
            .header(HEADER_SIGNATURE, signature)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WalletError::RemoteServiceError(format!(
                        "{path} timed out after {} ms",
                        self.timeout.as_millis()
                    ))
                } else {
                    WalletError::RemoteServiceError(format!("{path}: {e}"))
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| WalletError::RemoteServiceError(format!("{path}: {e}")))?;

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                tracing::warn!(%status, path, "Custody service refused credentials");
                Err(WalletError::AuthenticationFailed(format!("{status}: {text}")))
            }
            s if !s.is_success() => Err(WalletError::RemoteServiceError(format!(
                "{path} returned {status}: {text}"
            ))),
            _ => serde_json::from_str(&text).map_err(|e| {
                WalletError::RemoteServiceError(format!("{path}: malformed response: {e}"))
            }),
        }
    }
}
