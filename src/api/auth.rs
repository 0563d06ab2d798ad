//! L2 (API key) authentication for authenticated CLOB endpoints.

use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE as BASE64_URL_SAFE},
    Engine,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid base64 secret: {0}")]
    InvalidSecret(#[from] base64::DecodeError),

    #[error("HMAC computation failed: {0}")]
    Hmac(String),

    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

/// API credentials derived for a wallet.
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    api_secret: String,
    passphrase: String,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl ApiCredentials {
    pub fn new(api_key: String, api_secret: String, passphrase: String) -> Self {
        Self {
            api_key,
            api_secret,
            passphrase,
        }
    }

    /// HMAC-SHA256 over `{timestamp}{method}{path}{body}`, keyed with the
    /// base64-decoded secret and returned URL-safe base64 encoded.
    pub fn sign(
        &self,
        timestamp: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<String, AuthError> {
        // Secrets are issued URL-safe; older ones used the standard alphabet.
        let secret = BASE64_URL_SAFE
            .decode(&self.api_secret)
            .or_else(|_| BASE64.decode(&self.api_secret))?;

        let mut mac =
            HmacSha256::new_from_slice(&secret).map_err(|e| AuthError::Hmac(e.to_string()))?;
        mac.update(format!("{timestamp}{method}{path}{body}").as_bytes());

        Ok(BASE64_URL_SAFE.encode(mac.finalize().into_bytes()))
    }

    /// Build the `POLY_*` header set for one request.
    pub fn headers(
        &self,
        address: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<HeaderMap, AuthError> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&timestamp, method, path, body)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("poly_address"),
            HeaderValue::from_str(address)?,
        );
        headers.insert(
            HeaderName::from_static("poly_signature"),
            HeaderValue::from_str(&signature)?,
        );
        headers.insert(
            HeaderName::from_static("poly_timestamp"),
            HeaderValue::from_str(&timestamp)?,
        );
        headers.insert(
            HeaderName::from_static("poly_api_key"),
            HeaderValue::from_str(&self.api_key)?,
        );
        headers.insert(
            HeaderName::from_static("poly_passphrase"),
            HeaderValue::from_str(&self.passphrase)?,
        );

        Ok(headers)
    }
}
