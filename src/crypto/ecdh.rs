//! Shared-secret derivation: ECDH on P-256 into an AES-256-GCM key.
//!
//! The default mode uses the 32-byte x-coordinate of the shared point directly
//! as the AES key, with no separate KDF pass. Because the result is
//! deterministic for a given (private, public) pair, every outgoing message
//! must use a fresh ephemeral key pair.
//!
//! `with_hkdf` switches to HKDF-SHA256 over the shared secret with a
//! caller-chosen info string. Sender and receiver must be configured the same
//! way or decryption fails.

use std::sync::Arc;

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::{AesKey, CryptoProvider, PrivateKey, PublicKey, AES_KEY_LEN};
use crate::error::{QuietboxError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Derivation {
    Raw,
    Hkdf { info: Vec<u8> },
}

#[derive(Clone)]
pub struct SharedSecretDeriver {
    provider: Arc<dyn CryptoProvider>,
    derivation: Derivation,
}

impl SharedSecretDeriver {
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        SharedSecretDeriver {
            provider,
            derivation: Derivation::Raw,
        }
    }

    /// Expand the ECDH output through HKDF-SHA256 with `info` before use.
    pub fn with_hkdf(provider: Arc<dyn CryptoProvider>, info: &[u8]) -> Self {
        SharedSecretDeriver {
            provider,
            derivation: Derivation::Hkdf { info: info.to_vec() },
        }
    }

    pub fn uses_hkdf(&self) -> bool {
        matches!(self.derivation, Derivation::Hkdf { .. })
    }

    /// Derive the symmetric key shared between `private_key` and `public_key`.
    pub fn derive_shared_secret(
        &self,
        private_key: &PrivateKey,
        public_key: &PublicKey,
    ) -> Result<AesKey> {
        let shared = self.provider.ecdh(private_key, public_key)?;
        match &self.derivation {
            Derivation::Raw => Ok(AesKey::from_zeroizing(shared)),
            Derivation::Hkdf { info } => {
                let hkdf = Hkdf::<Sha256>::new(None, shared.as_slice());
                let mut okm = Zeroizing::new([0u8; AES_KEY_LEN]);
                hkdf.expand(info, okm.as_mut())
                    .map_err(|e| QuietboxError::InvalidKey(format!("hkdf expand error: {}", e)))?;
                Ok(AesKey::from_zeroizing(okm))
            }
        }
    }
}

impl std::fmt::Debug for SharedSecretDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecretDeriver")
            .field("hkdf", &self.uses_hkdf())
            .finish()
    }
}
