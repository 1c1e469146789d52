//! Detached HMAC-SHA256 tags for data whose authenticity is checked apart
//! from the AEAD, such as metadata sent alongside an envelope.

use std::sync::Arc;

use serde::Serialize;

use crate::crypto::CryptoProvider;
use crate::error::{log_failure, Result};
use crate::record::{canonical_json, decode_b64, encode_b64};

#[derive(Clone)]
pub struct IntegrityVerifier {
    provider: Arc<dyn CryptoProvider>,
}

impl IntegrityVerifier {
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        IntegrityVerifier { provider }
    }

    /// Base64 HMAC-SHA256 of `message` under `key`.
    pub fn create_hmac(&self, message: &[u8], key: &[u8]) -> Result<String> {
        let tag = self
            .provider
            .hmac_sha256_sign(key, message)
            .inspect_err(|e| log_failure("create_hmac", e))?;
        Ok(encode_b64(&tag))
    }

    /// Constant-time check of a base64 tag. Malformed tags are `false`.
    pub fn verify_hmac(&self, message: &[u8], tag: &str, key: &[u8]) -> bool {
        match decode_b64("tag", tag) {
            Ok(raw) => self.provider.hmac_sha256_verify(key, message, &raw),
            Err(_) => false,
        }
    }

    /// Tag the canonical JSON form of `value`.
    pub fn create_hmac_for<T: Serialize>(&self, value: &T, key: &[u8]) -> Result<String> {
        let json = canonical_json(value)?;
        self.create_hmac(json.as_bytes(), key)
    }

    pub fn verify_hmac_for<T: Serialize>(&self, value: &T, tag: &str, key: &[u8]) -> bool {
        match canonical_json(value) {
            Ok(json) => self.verify_hmac(json.as_bytes(), tag, key),
            Err(_) => false,
        }
    }
}
