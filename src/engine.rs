//! `E2eeEngine`: the component a messaging client holds on to.
//!
//! Wires a provider, a key store and a key directory into identity
//! management, per-recipient encryption and backup/restore of the identity key.

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::crypto::{CryptoProvider, SharedSecretDeriver};
use crate::error::{log_failure, Result};
use crate::integrity::IntegrityVerifier;
use crate::keys::{KeyPairGenerator, SecureKeyStore};
use crate::message::MessageCipher;
use crate::record::{EncryptedMessage, KeyRecord, PasswordPackage};
use crate::transport::KeyDirectoryClient;
use crate::vault::PasswordVault;

#[derive(Clone)]
pub struct E2eeEngine {
    provider: Arc<dyn CryptoProvider>,
    keys: KeyPairGenerator,
    cipher: MessageCipher,
    vault: PasswordVault,
    store: Arc<dyn SecureKeyStore>,
    directory: Arc<dyn KeyDirectoryClient>,
}

impl E2eeEngine {
    pub fn new(
        provider: Arc<dyn CryptoProvider>,
        store: Arc<dyn SecureKeyStore>,
        directory: Arc<dyn KeyDirectoryClient>,
    ) -> Self {
        E2eeEngine {
            keys: KeyPairGenerator::new(provider.clone(), store.clone()),
            cipher: MessageCipher::new(provider.clone(), store.clone()),
            vault: PasswordVault::new(provider.clone()),
            provider,
            store,
            directory,
        }
    }

    /// Replace the vault, e.g. to change the PBKDF2 cost of new backups.
    pub fn with_vault(mut self, vault: PasswordVault) -> Self {
        self.vault = vault;
        self
    }

    /// Replace the shared-secret derivation used for messages.
    pub fn with_deriver(mut self, deriver: SharedSecretDeriver) -> Self {
        self.cipher =
            MessageCipher::with_deriver(self.provider.clone(), self.store.clone(), deriver);
        self
    }

    pub fn keys(&self) -> &KeyPairGenerator {
        &self.keys
    }

    pub fn cipher(&self) -> &MessageCipher {
        &self.cipher
    }

    pub fn directory(&self) -> &dyn KeyDirectoryClient {
        self.directory.as_ref()
    }

    pub fn vault(&self) -> &PasswordVault {
        &self.vault
    }

    pub fn integrity(&self) -> IntegrityVerifier {
        IntegrityVerifier::new(self.provider.clone())
    }

    /// Current key id, creating a local identity if none exists yet.
    pub fn ensure_identity(&self) -> Result<String> {
        self.keys.ensure_key_pair()
    }

    /// Publish the current identity key for `user_id`. Safe to repeat.
    pub fn publish_identity(&self, user_id: &str) -> Result<KeyRecord> {
        let key_id = self.keys.require_current_key_id()?;
        self.keys.register_current(self.directory.as_ref(), user_id, &key_id)
    }

    /// Generate a new current key pair and publish it.
    ///
    /// Envelopes sealed to the previous key stop opening through `decrypt`.
    pub fn rotate_identity(&self, user_id: &str) -> Result<KeyRecord> {
        let record = self.keys.generate_and_register(self.directory.as_ref(), user_id)?;
        tracing::info!(key_id = %record.key_id, "identity rotated");
        Ok(record)
    }

    /// Encrypt for the recipient's most recently published key.
    pub fn encrypt_for(
        &self,
        recipient_user_id: &str,
        plaintext: &str,
    ) -> Result<EncryptedMessage> {
        let record = self
            .directory
            .get_latest_key(recipient_user_id)
            .inspect_err(|e| log_failure("encrypt_for", e))?;
        self.encrypt_to_record(&record, plaintext)
    }

    /// Encrypt for one specific published key of the recipient.
    pub fn encrypt_for_key(
        &self,
        recipient_user_id: &str,
        key_id: &str,
        plaintext: &str,
    ) -> Result<EncryptedMessage> {
        let record = self
            .directory
            .get_key(recipient_user_id, key_id)
            .inspect_err(|e| log_failure("encrypt_for_key", e))?;
        self.encrypt_to_record(&record, plaintext)
    }

    fn encrypt_to_record(&self, record: &KeyRecord, plaintext: &str) -> Result<EncryptedMessage> {
        let recipient = self.provider.import_public_key(&record.public_key_der()?)?;
        self.cipher.encrypt(plaintext, &recipient)
    }

    pub fn decrypt(&self, envelope: &EncryptedMessage) -> Result<String> {
        self.cipher.decrypt(envelope)
    }

    /// Wrap the current private key (PKCS#8) under a backup code.
    pub fn export_backup(&self, code: &str) -> Result<PasswordPackage> {
        let key_id = self.keys.require_current_key_id()?;
        let private_key = self.keys.load_private_key(&key_id)?;
        let der = self.provider.export_private_key(&private_key)?;
        self.vault
            .pack_with_backup_code(&der, code)
            .inspect_err(|e| log_failure("export_backup", e))
    }

    /// Unwrap a backup and install it as the current identity. Returns the new key id.
    ///
    /// The restored key gets a fresh key id; publish it again before peers
    /// address messages to it by id.
    pub fn restore_backup(&self, package: &PasswordPackage, code: &str) -> Result<String> {
        let der: Zeroizing<Vec<u8>> = self.vault.unpack_with_backup_code(package, code)?;
        let key_id = self
            .keys
            .import_private_key(&der)
            .inspect_err(|e| log_failure("restore_backup", e))?;
        tracing::info!(key_id = %key_id, "identity restored from backup");
        Ok(key_id)
    }
}

impl std::fmt::Debug for E2eeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("E2eeEngine")
            .field("cipher", &self.cipher)
            .field("vault", &self.vault)
            .finish()
    }
}
