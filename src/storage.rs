//! Time-limited object-storage URLs.
//!
//! [`S3Presigner`] implements AWS Signature Version 4 query-string signing
//! for `GET` (template download) and `PUT` (render output upload) URLs.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// SigV4 presigned URLs may live at most seven days.
const MAX_EXPIRATION_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum PresignError {
    #[error("missing AWS credential: {0}")]
    MissingCredentials(&'static str),

    #[error("expiration must be between 1 and {MAX_EXPIRATION_SECS} seconds, got {0}")]
    InvalidExpiration(u64),

    #[error("failed to initialize signing key")]
    SigningKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Put => write!(f, "PUT"),
        }
    }
}

pub trait UrlPresigner {
    fn create_url(
        &self,
        bucket: &str,
        key: &str,
        expiration: Duration,
        method: HttpMethod,
    ) -> Result<String, PresignError>;
}

#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

impl AwsCredentials {
    /// Reads the standard `AWS_*` variables.
    pub fn from_env() -> Result<Self, PresignError> {
        let read = |name: &'static str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or(PresignError::MissingCredentials(name))
        };
        Ok(Self {
            access_key_id: read("AWS_ACCESS_KEY_ID")?,
            secret_access_key: read("AWS_SECRET_ACCESS_KEY")?,
            session_token: read("AWS_SESSION_TOKEN").ok(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct S3Presigner {
    region: String,
    credentials: AwsCredentials,
}

impl S3Presigner {
    pub fn new(region: impl Into<String>, credentials: AwsCredentials) -> Self {
        Self {
            region: region.into(),
            credentials,
        }
    }

    fn host(&self, bucket: &str) -> String {
        if self.region == "us-east-1" {
            format!("{bucket}.s3.amazonaws.com")
        } else {
            format!("{bucket}.s3.{}.amazonaws.com", self.region)
        }
    }

    /// Signs a URL as of `now`.
    pub fn presign_at(
        &self,
        bucket: &str,
        key: &str,
        expiration: Duration,
        method: HttpMethod,
        now: DateTime<Utc>,
    ) -> Result<String, PresignError> {
        let expires = expiration.as_secs();
        if expires == 0 || expires > MAX_EXPIRATION_SECS {
            return Err(PresignError::InvalidExpiration(expires));
        }

        let host = self.host(bucket);
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{date}/{}/s3/aws4_request", self.region);
        let credential = format!("{}/{scope}", self.credentials.access_key_id);
        let canonical_uri = format!("/{}", encode_path(key));

        let mut params: Vec<(&str, String)> = vec![
            ("X-Amz-Algorithm", "AWS4-HMAC-SHA256".to_string()),
            ("X-Amz-Credential", credential),
            ("X-Amz-Date", amz_date.clone()),
            ("X-Amz-Expires", expires.to_string()),
            ("X-Amz-SignedHeaders", "host".to_string()),
        ];
        if let Some(token) = &self.credentials.session_token {
            params.push(("X-Amz-Security-Token", token.clone()));
        }
        params.sort_by(|a, b| a.0.cmp(b.0));
        let canonical_query = params
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_request = format!(
            "{method}\n{canonical_uri}\n{canonical_query}\nhost:{host}\n\nhost\nUNSIGNED-PAYLOAD"
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac(secret.as_bytes(), date.as_bytes())?;
        let k_region = hmac(&k_date, self.region.as_bytes())?;
        let k_service = hmac(&k_region, b"s3")?;
        let k_signing = hmac(&k_service, b"aws4_request")?;
        let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?);

        Ok(format!(
            "https://{host}{canonical_uri}?{canonical_query}&X-Amz-Signature={signature}"
        ))
    }
}

impl UrlPresigner for S3Presigner {
    fn create_url(
        &self,
        bucket: &str,
        key: &str,
        expiration: Duration,
        method: HttpMethod,
    ) -> Result<String, PresignError> {
        self.presign_at(bucket, key, expiration, method, Utc::now())
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, PresignError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| PresignError::SigningKey)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// RFC 3986 encoding of everything but unreserved characters.
fn encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn encode_path(key: &str) -> String {
    key.split('/').map(encode).collect::<Vec<_>>().join("/")
}
