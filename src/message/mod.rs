//! Message cipher: ephemeral-static ECDH + AES-256-GCM envelopes.
//!
//! Every `encrypt` call mints a fresh ephemeral P-256 pair and a fresh IV, so
//! two encryptions of the same plaintext share nothing observable. Decryption
//! uses the receiver's current identity key; an envelope sealed to a rotated
//! key fails with the same `Decryption` error as a tampered one.

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::crypto::{
    random_array, CryptoProvider, PrivateKey, PublicKey, SharedSecretDeriver, IV_LEN,
};
use crate::error::{log_failure, QuietboxError, Result};
use crate::keys::store::SecureKeyStore;
use crate::keys::KeyPairGenerator;
use crate::record::EncryptedMessage;

#[derive(Clone)]
pub struct MessageCipher {
    provider: Arc<dyn CryptoProvider>,
    deriver: SharedSecretDeriver,
    keys: KeyPairGenerator,
}

impl MessageCipher {
    pub fn new(provider: Arc<dyn CryptoProvider>, store: Arc<dyn SecureKeyStore>) -> Self {
        let deriver = SharedSecretDeriver::new(provider.clone());
        Self::with_deriver(provider, store, deriver)
    }

    /// Use a non-default derivation (e.g. HKDF). Both peers must match.
    pub fn with_deriver(
        provider: Arc<dyn CryptoProvider>,
        store: Arc<dyn SecureKeyStore>,
        deriver: SharedSecretDeriver,
    ) -> Self {
        let keys = KeyPairGenerator::new(provider.clone(), store);
        MessageCipher {
            provider,
            deriver,
            keys,
        }
    }

    /// Encrypt UTF-8 text for the holder of `recipient`.
    pub fn encrypt(&self, plaintext: &str, recipient: &PublicKey) -> Result<EncryptedMessage> {
        self.encrypt_bytes(plaintext.as_bytes(), recipient)
    }

    pub fn encrypt_bytes(
        &self,
        plaintext: &[u8],
        recipient: &PublicKey,
    ) -> Result<EncryptedMessage> {
        self.seal(plaintext, recipient)
            .inspect_err(|e| log_failure("encrypt", e))
    }

    fn seal(&self, plaintext: &[u8], recipient: &PublicKey) -> Result<EncryptedMessage> {
        let sender_key_id = self.keys.require_current_key_id()?;

        let ephemeral = self.provider.generate_key_pair()?;
        let key = self
            .deriver
            .derive_shared_secret(&ephemeral.private_key, recipient)?;
        let iv: [u8; IV_LEN] = random_array(self.provider.as_ref())?;
        let sealed = self.provider.aes_gcm_encrypt(&key, &iv, plaintext)?;
        let ephemeral_public_key = self.provider.export_public_key(&ephemeral.public_key)?;

        EncryptedMessage::from_combined(iv, &sealed, ephemeral_public_key, sender_key_id)
    }

    /// Decrypt with the current identity key and decode as UTF-8.
    pub fn decrypt(&self, envelope: &EncryptedMessage) -> Result<String> {
        let bytes = self.decrypt_bytes(envelope)?;
        utf8(bytes)
    }

    pub fn decrypt_bytes(&self, envelope: &EncryptedMessage) -> Result<Zeroizing<Vec<u8>>> {
        let key_id = self
            .keys
            .require_current_key_id()
            .inspect_err(|e| log_failure("decrypt", e))?;
        self.decrypt_bytes_with_key_id(envelope, &key_id)
    }

    /// Decrypt with a specific stored identity key, e.g. one rotated out.
    pub fn decrypt_with_key_id(&self, envelope: &EncryptedMessage, key_id: &str) -> Result<String> {
        utf8(self.decrypt_bytes_with_key_id(envelope, key_id)?)
    }

    fn decrypt_bytes_with_key_id(
        &self,
        envelope: &EncryptedMessage,
        key_id: &str,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let private_key = self
            .keys
            .load_private_key(key_id)
            .inspect_err(|e| log_failure("decrypt", e))?;
        self.open(envelope, &private_key)
    }

    /// Decrypt with a caller-held private key; nothing is read from the store.
    pub fn decrypt_with_private_key(
        &self,
        envelope: &EncryptedMessage,
        private_key: &PrivateKey,
    ) -> Result<String> {
        utf8(self.open(envelope, private_key)?)
    }

    fn open(
        &self,
        envelope: &EncryptedMessage,
        private_key: &PrivateKey,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let result = self
            .provider
            .import_public_key(&envelope.ephemeral_public_key)
            .map_err(|_| QuietboxError::Decryption)
            .and_then(|ephemeral| self.deriver.derive_shared_secret(private_key, &ephemeral))
            .and_then(|key| {
                self.provider
                    .aes_gcm_decrypt(&key, &envelope.iv, &envelope.combined())
            })
            .map_err(|e| match e {
                QuietboxError::ProviderUnavailable(_) => e,
                _ => QuietboxError::Decryption,
            });
        result.inspect_err(|e| log_failure("decrypt", e))
    }

    pub fn keys(&self) -> &KeyPairGenerator {
        &self.keys
    }
}

fn utf8(bytes: Zeroizing<Vec<u8>>) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| {
        let err = QuietboxError::Malformed("plaintext is not valid UTF-8".into());
        log_failure("decrypt", &err);
        err
    })
}

impl std::fmt::Debug for MessageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCipher")
            .field("deriver", &self.deriver)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{AesKey, KeyPair, RustCryptoProvider, TAG_LEN};
    use crate::keys::MemoryKeyStore;
    use crate::vault::PasswordVault;

    /// Provider whose randomness and key agreement are gone.
    struct NoEntropyProvider {
        inner: RustCryptoProvider,
    }

    fn no_entropy() -> QuietboxError {
        QuietboxError::ProviderUnavailable("entropy source unavailable".into())
    }

    impl CryptoProvider for NoEntropyProvider {
        fn generate_key_pair(&self) -> Result<KeyPair> {
            Err(no_entropy())
        }
        fn export_public_key(&self, key: &PublicKey) -> Result<Vec<u8>> {
            self.inner.export_public_key(key)
        }
        fn import_public_key(&self, spki_der: &[u8]) -> Result<PublicKey> {
            self.inner.import_public_key(spki_der)
        }
        fn export_private_key(&self, key: &PrivateKey) -> Result<Zeroizing<Vec<u8>>> {
            self.inner.export_private_key(key)
        }
        fn import_private_key(&self, pkcs8_der: &[u8]) -> Result<PrivateKey> {
            self.inner.import_private_key(pkcs8_der)
        }
        fn ecdh(&self, _: &PrivateKey, _: &PublicKey) -> Result<Zeroizing<[u8; 32]>> {
            Err(no_entropy())
        }
        fn aes_gcm_encrypt(&self, key: &AesKey, iv: &[u8; IV_LEN], pt: &[u8]) -> Result<Vec<u8>> {
            self.inner.aes_gcm_encrypt(key, iv, pt)
        }
        fn aes_gcm_decrypt(
            &self,
            key: &AesKey,
            iv: &[u8; IV_LEN],
            ct: &[u8],
        ) -> Result<Zeroizing<Vec<u8>>> {
            self.inner.aes_gcm_decrypt(key, iv, ct)
        }
        fn hmac_sha256_sign(&self, key: &[u8], message: &[u8]) -> Result<[u8; 32]> {
            self.inner.hmac_sha256_sign(key, message)
        }
        fn hmac_sha256_verify(&self, key: &[u8], message: &[u8], tag: &[u8]) -> bool {
            self.inner.hmac_sha256_verify(key, message, tag)
        }
        fn pbkdf2_sha256(&self, password: &[u8], salt: &[u8], iterations: u32) -> Result<AesKey> {
            self.inner.pbkdf2_sha256(password, salt, iterations)
        }
        fn fill_random(&self, _: &mut [u8]) -> Result<()> {
            Err(no_entropy())
        }
    }

    struct Party {
        cipher: MessageCipher,
        public_key: PublicKey,
    }

    fn provider() -> Arc<dyn CryptoProvider> {
        Arc::new(RustCryptoProvider::new().expect("provider"))
    }

    fn party(p: &Arc<dyn CryptoProvider>) -> Party {
        let cipher = MessageCipher::new(p.clone(), Arc::new(MemoryKeyStore::new()));
        let key_id = cipher.keys().generate_and_store_key_pair().expect("identity");
        let public_key = cipher.keys().load_public_key(&key_id).expect("public key");
        Party { cipher, public_key }
    }

    #[test]
    fn test_round_trip() {
        let p = provider();
        let alice = party(&p);
        let bob = party(&p);
        let envelope = alice
            .cipher
            .encrypt("meet at noon", &bob.public_key)
            .expect("encrypt");
        assert_eq!(bob.cipher.decrypt(&envelope).expect("decrypt"), "meet at noon");
    }

    #[test]
    fn test_round_trip_empty_and_binary() {
        let p = provider();
        let alice = party(&p);
        let bob = party(&p);

        let envelope = alice.cipher.encrypt("", &bob.public_key).expect("encrypt");
        assert!(envelope.ciphertext.is_empty());
        assert_eq!(bob.cipher.decrypt(&envelope).expect("decrypt"), "");

        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let envelope = alice.cipher.encrypt_bytes(&payload, &bob.public_key).expect("encrypt");
        assert_eq!(
            bob.cipher.decrypt_bytes(&envelope).expect("decrypt").as_slice(),
            payload.as_slice()
        );
    }

    #[test]
    fn test_envelope_carries_sender_key_id() {
        let p = provider();
        let alice = party(&p);
        let bob = party(&p);
        let envelope = alice.cipher.encrypt("hi", &bob.public_key).expect("encrypt");
        assert_eq!(
            Some(envelope.sender_key_id),
            alice.cipher.keys().current_key_id().expect("pointer")
        );
        assert_eq!(envelope.ephemeral_public_key.len(), 91, "SPKI DER of a P-256 key");
    }

    #[test]
    fn test_encryption_is_not_deterministic() {
        let p = provider();
        let alice = party(&p);
        let bob = party(&p);
        let a = alice.cipher.encrypt("same text", &bob.public_key).expect("a");
        let b = alice.cipher.encrypt("same text", &bob.public_key).expect("b");
        assert_ne!(a.ephemeral_public_key, b.ephemeral_public_key);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_encrypt_without_identity_is_key_not_found() {
        let p = provider();
        let bob = party(&p);
        let stranger = MessageCipher::new(p.clone(), Arc::new(MemoryKeyStore::new()));
        assert!(matches!(
            stranger.encrypt("hi", &bob.public_key),
            Err(QuietboxError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_every_ciphertext_and_tag_bit_is_authenticated() {
        let p = provider();
        let alice = party(&p);
        let bob = party(&p);
        let envelope = alice.cipher.encrypt("tamper me", &bob.public_key).expect("encrypt");

        for byte in 0..envelope.ciphertext.len() {
            for bit in 0..8 {
                let mut forged = envelope.clone();
                forged.ciphertext[byte] ^= 1 << bit;
                assert!(
                    matches!(bob.cipher.decrypt(&forged), Err(QuietboxError::Decryption)),
                    "ciphertext byte {} bit {} flip must be rejected",
                    byte,
                    bit
                );
            }
        }
        for byte in 0..TAG_LEN {
            for bit in 0..8 {
                let mut forged = envelope.clone();
                forged.auth_tag[byte] ^= 1 << bit;
                assert!(
                    matches!(bob.cipher.decrypt(&forged), Err(QuietboxError::Decryption)),
                    "tag byte {} bit {} flip must be rejected",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_iv_and_ephemeral_key_tampering_fails_closed() {
        let p = provider();
        let alice = party(&p);
        let bob = party(&p);
        let envelope = alice.cipher.encrypt("tamper me", &bob.public_key).expect("encrypt");

        let mut forged = envelope.clone();
        forged.iv[0] ^= 0x01;
        assert!(matches!(bob.cipher.decrypt(&forged), Err(QuietboxError::Decryption)));

        for byte in 0..envelope.ephemeral_public_key.len() {
            let mut forged = envelope.clone();
            forged.ephemeral_public_key[byte] ^= 0x01;
            assert!(
                matches!(bob.cipher.decrypt(&forged), Err(QuietboxError::Decryption)),
                "ephemeral key byte {} flip must be rejected",
                byte
            );
        }

        let mut forged = envelope;
        forged.ephemeral_public_key.clear();
        assert!(matches!(bob.cipher.decrypt(&forged), Err(QuietboxError::Decryption)));
    }

    #[test]
    fn test_wrong_recipient_cannot_decrypt() {
        let p = provider();
        let alice = party(&p);
        let bob = party(&p);
        let eve = party(&p);
        let envelope = alice.cipher.encrypt("for bob", &bob.public_key).expect("encrypt");
        assert!(matches!(eve.cipher.decrypt(&envelope), Err(QuietboxError::Decryption)));
    }

    #[test]
    fn test_rotated_receiver_key_needs_explicit_key_id() {
        let p = provider();
        let alice = party(&p);
        let bob = party(&p);
        let old_key_id = bob.cipher.keys().require_current_key_id().expect("id");
        let envelope = alice.cipher.encrypt("before rotation", &bob.public_key).expect("encrypt");

        bob.cipher.keys().generate_and_store_key_pair().expect("rotate");
        assert!(matches!(bob.cipher.decrypt(&envelope), Err(QuietboxError::Decryption)));
        assert_eq!(
            bob.cipher
                .decrypt_with_key_id(&envelope, &old_key_id)
                .expect("old key still opens it"),
            "before rotation"
        );
    }

    #[test]
    fn test_decrypt_with_private_key() {
        let p = provider();
        let alice = party(&p);
        let bob = p.generate_key_pair().expect("bob");
        let envelope = alice.cipher.encrypt("direct", &bob.public_key).expect("encrypt");
        assert_eq!(
            alice
                .cipher
                .decrypt_with_private_key(&envelope, &bob.private_key)
                .expect("decrypt"),
            "direct"
        );
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let p = provider();
        let alice = party(&p);
        let bob = party(&p);
        let envelope = alice
            .cipher
            .encrypt_bytes(&[0xff, 0xfe, 0x00], &bob.public_key)
            .expect("encrypt");
        assert!(matches!(bob.cipher.decrypt(&envelope), Err(QuietboxError::Malformed(_))));
        assert_eq!(bob.cipher.decrypt_bytes(&envelope).expect("bytes").len(), 3);
    }

    #[test]
    fn test_hkdf_and_raw_peers_do_not_interoperate() {
        let p = provider();
        let bob = party(&p);
        let sender_store = Arc::new(MemoryKeyStore::new());
        let hkdf_sender = MessageCipher::with_deriver(
            p.clone(),
            sender_store,
            SharedSecretDeriver::with_hkdf(p.clone(), b"quietbox message v1"),
        );
        hkdf_sender.keys().generate_and_store_key_pair().expect("identity");

        let envelope = hkdf_sender.encrypt("hkdf", &bob.public_key).expect("encrypt");
        assert!(matches!(bob.cipher.decrypt(&envelope), Err(QuietboxError::Decryption)));
    }

    #[test]
    fn test_concurrent_encrypt_and_decrypt() {
        let p = provider();
        let alice = party(&p);
        let bob = party(&p);

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let alice = &alice;
                let bob = &bob;
                scope.spawn(move || {
                    for i in 0..8 {
                        let text = format!("worker {} message {}", worker, i);
                        let envelope =
                            alice.cipher.encrypt(&text, &bob.public_key).expect("encrypt");
                        assert_eq!(bob.cipher.decrypt(&envelope).expect("decrypt"), text);
                    }
                });
            }
        });
    }

    #[test]
    fn test_provider_unavailable_surfaces_unchanged() {
        let p = provider();
        let bob = party(&p);
        let store = Arc::new(MemoryKeyStore::new());
        let alice = MessageCipher::new(p.clone(), store.clone());
        alice.keys().generate_and_store_key_pair().expect("identity");
        let envelope = alice.encrypt("before the outage", &bob.public_key).expect("encrypt");
        let items_before = store.len();

        let broken: Arc<dyn CryptoProvider> = Arc::new(NoEntropyProvider {
            inner: RustCryptoProvider::new().expect("provider"),
        });
        let cipher = MessageCipher::new(broken.clone(), store.clone());

        assert!(matches!(
            cipher.keys().generate_key_pair(),
            Err(QuietboxError::ProviderUnavailable(_))
        ));
        assert!(matches!(
            cipher.keys().generate_and_store_key_pair(),
            Err(QuietboxError::ProviderUnavailable(_))
        ));
        assert_eq!(store.len(), items_before, "a failed keygen must not write to the store");

        assert!(matches!(
            cipher.encrypt("hi", &bob.public_key),
            Err(QuietboxError::ProviderUnavailable(_))
        ));
        assert!(matches!(
            PasswordVault::with_iterations(broken.clone(), 1_000).pack_with_password(b"x", "pw"),
            Err(QuietboxError::ProviderUnavailable(_))
        ));

        let bob_broken = MessageCipher::new(broken, Arc::new(MemoryKeyStore::new()));
        let bob_key = bob.cipher.keys().require_current_key_id().expect("id");
        let bob_private = bob.cipher.keys().load_private_key(&bob_key).expect("private");
        let to_bob = alice.encrypt("after", &bob.public_key).expect("encrypt");
        assert!(
            matches!(
                bob_broken.decrypt_with_private_key(&to_bob, &bob_private),
                Err(QuietboxError::ProviderUnavailable(_))
            ),
            "provider failure must not be reported as Decryption"
        );
        assert_eq!(
            alice
                .decrypt_with_private_key(&envelope, &bob_private)
                .expect("working provider still decrypts"),
            "before the outage"
        );
    }
}
