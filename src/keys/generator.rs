//! Identity key pairs: generation, persistence in the `SecureKeyStore`, and
//! publication to the key directory.
//!
//! Store layout, one item per value:
//!
//! ```text
//! identity.current_key_id     pointer to the active key id      (plain)
//! identity.<key_id>.public    base64 SPKI DER                   (plain)
//! identity.<key_id>.private   base64 PKCS#8 DER                 (encrypted)
//! ```
//!
//! The pointer is always written last. If a write fails part way, the pointer
//! still names the previous, complete key pair.

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::crypto::{CryptoProvider, KeyPair, PrivateKey, PublicKey};
use crate::error::{log_failure, QuietboxError, Result};
use crate::keys::store::SecureKeyStore;
use crate::record::{decode_b64, encode_b64, KeyRecord};
use crate::transport::KeyDirectoryClient;

pub const CURRENT_KEY_ID: &str = "identity.current_key_id";

pub fn public_key_item(key_id: &str) -> String {
    format!("identity.{}.public", key_id)
}

pub fn private_key_item(key_id: &str) -> String {
    format!("identity.{}.private", key_id)
}

#[derive(Clone)]
pub struct KeyPairGenerator {
    provider: Arc<dyn CryptoProvider>,
    store: Arc<dyn SecureKeyStore>,
}

impl KeyPairGenerator {
    pub fn new(provider: Arc<dyn CryptoProvider>, store: Arc<dyn SecureKeyStore>) -> Self {
        KeyPairGenerator { provider, store }
    }

    /// Create a P-256 key pair. Nothing is persisted.
    pub fn generate_key_pair(&self) -> Result<KeyPair> {
        self.provider
            .generate_key_pair()
            .inspect_err(|e| log_failure("generate_key_pair", e))
    }

    /// Generate a pair, persist both halves under a fresh key id and make it current.
    ///
    /// Concurrent calls race on the pointer (last writer wins); callers that
    /// rotate must serialize per identity.
    pub fn generate_and_store_key_pair(&self) -> Result<String> {
        let key_pair = self.generate_key_pair()?;
        self.store_key_pair(&key_pair)
    }

    /// Persist an existing pair under a new key id and make it current.
    pub fn store_key_pair(&self, key_pair: &KeyPair) -> Result<String> {
        let public_der = self.provider.export_public_key(&key_pair.public_key)?;
        let private_der = self.provider.export_private_key(&key_pair.private_key)?;
        let private_b64 = Zeroizing::new(encode_b64(&private_der));
        let key_id = uuid::Uuid::new_v4().to_string();

        let result = self
            .store
            .set_item(&public_key_item(&key_id), &encode_b64(&public_der), false)
            .and_then(|_| self.store.set_item(&private_key_item(&key_id), &private_b64, true))
            .and_then(|_| self.store.set_item(CURRENT_KEY_ID, &key_id, false));
        result.inspect_err(|e| log_failure("store_key_pair", e))?;

        tracing::info!(key_id = %key_id, "stored new identity key pair");
        Ok(key_id)
    }

    /// Store a restored PKCS#8 private key as a new current identity.
    pub fn import_private_key(&self, pkcs8_der: &[u8]) -> Result<String> {
        let private_key = self.provider.import_private_key(pkcs8_der)?;
        self.store_key_pair(&KeyPair::from(private_key))
    }

    /// Read the current-key pointer. Returns `None` before the first key exists.
    pub fn current_key_id(&self) -> Result<Option<String>> {
        self.store.get_item(CURRENT_KEY_ID, false)
    }

    pub fn require_current_key_id(&self) -> Result<String> {
        self.current_key_id()?
            .ok_or_else(|| QuietboxError::KeyNotFound("no local identity key".into()))
    }

    /// Base64 SPKI of a stored public key, as published to the directory.
    pub fn exported_public_key(&self, key_id: &str) -> Result<String> {
        self.store
            .get_item(&public_key_item(key_id), false)?
            .ok_or_else(|| QuietboxError::KeyNotFound(format!("public key {}", key_id)))
    }

    pub fn load_public_key(&self, key_id: &str) -> Result<PublicKey> {
        let der = decode_b64("public key", &self.exported_public_key(key_id)?)?;
        self.provider.import_public_key(&der)
    }

    pub fn load_private_key(&self, key_id: &str) -> Result<PrivateKey> {
        let b64 = Zeroizing::new(
            self.store
                .get_item(&private_key_item(key_id), true)?
                .ok_or_else(|| QuietboxError::KeyNotFound(format!("private key {}", key_id)))?,
        );
        let der = Zeroizing::new(decode_b64("private key", &b64)?);
        self.provider.import_private_key(&der)
    }

    pub fn load_key_pair(&self, key_id: &str) -> Result<KeyPair> {
        let key_pair = KeyPair::from(self.load_private_key(key_id)?);
        if key_pair.public_key != self.load_public_key(key_id)? {
            return Err(QuietboxError::InvalidKey(format!(
                "stored halves of {} do not match",
                key_id
            )));
        }
        Ok(key_pair)
    }

    /// Return the current key id, generating an identity on first use.
    pub fn ensure_key_pair(&self) -> Result<String> {
        if let Some(key_id) = self.current_key_id()? {
            if self.store.get_item(&private_key_item(&key_id), true)?.is_some() {
                return Ok(key_id);
            }
            tracing::warn!("current key pointer names missing material; generating a new pair");
        }
        self.generate_and_store_key_pair()
    }

    /// Rotate: generate and store a new current pair, then publish it for `user_id`.
    pub fn generate_and_register(
        &self,
        directory: &dyn KeyDirectoryClient,
        user_id: &str,
    ) -> Result<KeyRecord> {
        let key_id = self.generate_and_store_key_pair()?;
        self.register_current(directory, user_id, &key_id)
    }

    /// Publish an already stored key. Safe to repeat.
    pub fn register_current(
        &self,
        directory: &dyn KeyDirectoryClient,
        user_id: &str,
        key_id: &str,
    ) -> Result<KeyRecord> {
        let public_key = self.exported_public_key(key_id)?;
        directory
            .register_key(user_id, key_id, &public_key)
            .inspect_err(|e| log_failure("register_key", e))
    }
}
