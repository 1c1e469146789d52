//! Crypto module: the `CryptoProvider` capability and its RustCrypto backend.
//!
//! Everything above this module (key generation, message sealing, the
//! password vault) reaches primitives only through `CryptoProvider`, resolved
//! once at startup and passed around as `Arc<dyn CryptoProvider>`. Key
//! boundaries are DER encodings: SPKI for public keys, PKCS#8 for private keys.

pub mod ecdh;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{QuietboxError, Result};

pub use ecdh::SharedSecretDeriver;

/// AES-GCM nonce length (96 bits).
pub const IV_LEN: usize = 12;

/// AES-GCM authentication tag length (128 bits).
pub const TAG_LEN: usize = 16;

/// AES-256 key length.
pub const AES_KEY_LEN: usize = 32;

/// PBKDF2 salt length.
pub const SALT_LEN: usize = 16;

/// HMAC-SHA256 output length.
pub const HMAC_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Public half of a P-256 ECDH key pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(p256::PublicKey);

/// Private half of a P-256 ECDH key pair. Zeroized on drop.
#[derive(Clone)]
pub struct PrivateKey(p256::SecretKey);

impl PrivateKey {
    /// Build a private key from a raw big-endian scalar.
    ///
    /// Rejects zero and values outside the curve order.
    pub fn from_scalar_bytes(bytes: &[u8; 32]) -> Result<Self> {
        p256::SecretKey::from_slice(bytes)
            .map(PrivateKey)
            .map_err(|_| QuietboxError::InvalidKey("scalar out of range for P-256".into()))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("scalar", &"[REDACTED]")
            .finish()
    }
}

/// A P-256 key pair. The private half stays inside the local trust boundary.
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl From<PrivateKey> for KeyPair {
    fn from(private_key: PrivateKey) -> Self {
        KeyPair {
            public_key: private_key.public_key(),
            private_key,
        }
    }
}

/// A 256-bit AES-GCM key. Zeroized on drop.
pub struct AesKey(Zeroizing<[u8; AES_KEY_LEN]>);

impl AesKey {
    pub fn from_bytes(bytes: [u8; AES_KEY_LEN]) -> Self {
        AesKey(Zeroizing::new(bytes))
    }

    /// Take ownership of key bytes that are already zeroizing.
    pub fn from_zeroizing(bytes: Zeroizing<[u8; AES_KEY_LEN]>) -> Self {
        AesKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; AES_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesKey").field("key", &"[REDACTED]").finish()
    }
}

/// Platform cryptographic capability consumed by the rest of the crate.
///
/// Implementations must be usable from several threads at once; none of the
/// operations keep state between calls.
pub trait CryptoProvider: Send + Sync {
    /// Generate a fresh P-256 key pair from the provider's CSPRNG.
    fn generate_key_pair(&self) -> Result<KeyPair>;

    /// Encode a public key as SPKI DER.
    fn export_public_key(&self, key: &PublicKey) -> Result<Vec<u8>>;

    /// Decode a public key from SPKI DER, validating the curve point.
    fn import_public_key(&self, spki_der: &[u8]) -> Result<PublicKey>;

    /// Encode a private key as PKCS#8 DER.
    fn export_private_key(&self, key: &PrivateKey) -> Result<Zeroizing<Vec<u8>>>;

    /// Decode a private key from PKCS#8 DER.
    fn import_private_key(&self, pkcs8_der: &[u8]) -> Result<PrivateKey>;

    /// Raw ECDH agreement: the x-coordinate of the shared point.
    fn ecdh(
        &self,
        private_key: &PrivateKey,
        public_key: &PublicKey,
    ) -> Result<Zeroizing<[u8; 32]>>;

    /// AES-256-GCM encryption. Output is `ciphertext ++ tag` (tag is the last 16 bytes).
    fn aes_gcm_encrypt(
        &self,
        key: &AesKey,
        iv: &[u8; IV_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>>;

    /// AES-256-GCM decryption of `ciphertext ++ tag`. Any tag mismatch is `Decryption`.
    fn aes_gcm_decrypt(
        &self,
        key: &AesKey,
        iv: &[u8; IV_LEN],
        ciphertext_with_tag: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>>;

    fn hmac_sha256_sign(&self, key: &[u8], message: &[u8]) -> Result<[u8; HMAC_LEN]>;

    /// Constant-time tag check. Never errors; a malformed tag is simply `false`.
    fn hmac_sha256_verify(&self, key: &[u8], message: &[u8], tag: &[u8]) -> bool;

    /// PBKDF2-HMAC-SHA256 producing a 256-bit key.
    fn pbkdf2_sha256(&self, password: &[u8], salt: &[u8], iterations: u32) -> Result<AesKey>;

    /// Fill `dest` from a cryptographically secure source.
    fn fill_random(&self, dest: &mut [u8]) -> Result<()>;
}

/// Draw a fixed-size random array (IVs, salts) from the provider.
pub fn random_array<const N: usize>(provider: &dyn CryptoProvider) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    provider.fill_random(&mut out)?;
    Ok(out)
}

/// `CryptoProvider` backed by the RustCrypto crates and the operating system RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustCryptoProvider {
    _private: (),
}

impl RustCryptoProvider {
    /// Resolve the provider, probing the OS RNG once.
    ///
    /// Fails with `ProviderUnavailable` when the platform exposes no secure
    /// randomness; nothing else in the crate re-checks this at call time.
    pub fn new() -> Result<Self> {
        let mut sample = [0u8; 16];
        rand::rngs::OsRng
            .try_fill_bytes(&mut sample)
            .map_err(|e| QuietboxError::ProviderUnavailable(e.to_string()))?;
        tracing::debug!("crypto provider resolved: RustCrypto + OS RNG");
        Ok(RustCryptoProvider { _private: () })
    }
}

impl CryptoProvider for RustCryptoProvider {
    fn generate_key_pair(&self) -> Result<KeyPair> {
        // A uniformly random 32-byte string is a valid scalar except with
        // probability ~2^-32; redraw in that case.
        for _ in 0..8 {
            let scalar = Zeroizing::new(random_array::<32>(self)?);
            if let Ok(private_key) = PrivateKey::from_scalar_bytes(&scalar) {
                return Ok(KeyPair::from(private_key));
            }
        }
        Err(QuietboxError::ProviderUnavailable(
            "random source produced no valid P-256 scalar".into(),
        ))
    }

    fn export_public_key(&self, key: &PublicKey) -> Result<Vec<u8>> {
        let doc = key
            .0
            .to_public_key_der()
            .map_err(|e| QuietboxError::InvalidKey(format!("SPKI encode: {}", e)))?;
        Ok(doc.as_bytes().to_vec())
    }

    fn import_public_key(&self, spki_der: &[u8]) -> Result<PublicKey> {
        p256::PublicKey::from_public_key_der(spki_der)
            .map(PublicKey)
            .map_err(|e| QuietboxError::InvalidKey(format!("SPKI decode: {}", e)))
    }

    fn export_private_key(&self, key: &PrivateKey) -> Result<Zeroizing<Vec<u8>>> {
        let doc = key
            .0
            .to_pkcs8_der()
            .map_err(|e| QuietboxError::InvalidKey(format!("PKCS#8 encode: {}", e)))?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }

    fn import_private_key(&self, pkcs8_der: &[u8]) -> Result<PrivateKey> {
        p256::SecretKey::from_pkcs8_der(pkcs8_der)
            .map(PrivateKey)
            .map_err(|e| QuietboxError::InvalidKey(format!("PKCS#8 decode: {}", e)))
    }

    fn ecdh(
        &self,
        private_key: &PrivateKey,
        public_key: &PublicKey,
    ) -> Result<Zeroizing<[u8; 32]>> {
        let shared =
            p256::ecdh::diffie_hellman(private_key.0.to_nonzero_scalar(), public_key.0.as_affine());
        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(out)
    }

    fn aes_gcm_encrypt(
        &self,
        key: &AesKey,
        iv: &[u8; IV_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let cipher =
            Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| QuietboxError::Encryption)?;
        cipher
            .encrypt(Nonce::from_slice(iv), plaintext)
            .map_err(|_| QuietboxError::Encryption)
    }

    fn aes_gcm_decrypt(
        &self,
        key: &AesKey,
        iv: &[u8; IV_LEN],
        ciphertext_with_tag: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        if ciphertext_with_tag.len() < TAG_LEN {
            return Err(QuietboxError::Decryption);
        }
        let cipher =
            Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| QuietboxError::Decryption)?;
        cipher
            .decrypt(Nonce::from_slice(iv), ciphertext_with_tag)
            .map(Zeroizing::new)
            .map_err(|_| QuietboxError::Decryption)
    }

    fn hmac_sha256_sign(&self, key: &[u8], message: &[u8]) -> Result<[u8; HMAC_LEN]> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|e| QuietboxError::InvalidKey(format!("hmac key: {}", e)))?;
        mac.update(message);
        let mut out = [0u8; HMAC_LEN];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    fn hmac_sha256_verify(&self, key: &[u8], message: &[u8], tag: &[u8]) -> bool {
        let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
            return false;
        };
        mac.update(message);
        mac.verify_slice(tag).is_ok()
    }

    fn pbkdf2_sha256(&self, password: &[u8], salt: &[u8], iterations: u32) -> Result<AesKey> {
        if iterations == 0 {
            return Err(QuietboxError::Malformed("PBKDF2 iteration count must be non-zero".into()));
        }
        let mut out = Zeroizing::new([0u8; AES_KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, out.as_mut());
        Ok(AesKey(out))
    }

    fn fill_random(&self, dest: &mut [u8]) -> Result<()> {
        rand::rngs::OsRng
            .try_fill_bytes(dest)
            .map_err(|e| QuietboxError::ProviderUnavailable(e.to_string()))
    }
}
