//! Record module: wire types that cross into transport and storage collaborators.
//!
//! Binary fields are held as bytes in memory and become standard base64 strings
//! only when serialized. `KeyRecord` uses the key directory's snake_case field
//! names; `EncryptedMessage` and `PasswordPackage` use camelCase.
//!
//! Struct fields are declared in alphabetical order so that compact JSON output
//! is deterministic without the `preserve_order` serde_json feature.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::crypto::{IV_LEN, SALT_LEN, TAG_LEN};
use crate::error::{QuietboxError, Result};

/// Default PBKDF2 iteration count for password packages.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;

/// Encode bytes as standard base64.
pub fn encode_b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode standard base64, naming the field in the error.
pub fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| QuietboxError::Malformed(format!("invalid base64 in {}: {}", field, e)))
}

mod b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_b64(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode_b64("field", &s).map_err(serde::de::Error::custom)
    }
}

mod b64_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_b64(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = super::decode_b64("field", &s).map_err(serde::de::Error::custom)?;
        let len = bytes.len();
        bytes.try_into().map_err(|_| {
            serde::de::Error::custom(format!("expected {} bytes, got {}", N, len))
        })
    }
}

/// A public key published to the key directory.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    /// Unix timestamp (seconds) when the directory accepted the key.
    pub created_at: u64,
    /// Identifier minted when the key pair was generated (UUIDv4).
    pub key_id: String,
    /// Base64-encoded SPKI DER of the P-256 public key.
    pub public_key: String,
    pub user_id: String,
}

impl KeyRecord {
    /// Decode the `public_key` field to SPKI DER bytes.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        decode_b64("public_key", &self.public_key)
    }
}

/// The envelope produced for every outgoing message.
///
/// `ciphertext` and `auth_tag` are carried separately. The AEAD output is
/// `ciphertext ++ auth_tag`, with the tag always being the last 16 bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMessage {
    #[serde(with = "b64_array")]
    pub auth_tag: [u8; TAG_LEN],
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// SPKI DER of the one-time sender key pair.
    #[serde(with = "b64")]
    pub ephemeral_public_key: Vec<u8>,
    #[serde(with = "b64_array")]
    pub iv: [u8; IV_LEN],
    pub sender_key_id: String,
}

impl EncryptedMessage {
    /// Build an envelope from a concatenated `ciphertext ++ tag` buffer.
    ///
    /// The last 16 bytes are taken as the tag; shorter buffers are rejected.
    pub fn from_combined(
        iv: [u8; IV_LEN],
        ciphertext_with_tag: &[u8],
        ephemeral_public_key: Vec<u8>,
        sender_key_id: String,
    ) -> Result<Self> {
        if ciphertext_with_tag.len() < TAG_LEN {
            return Err(QuietboxError::Malformed(format!(
                "AEAD output too short: {} bytes, need at least {}",
                ciphertext_with_tag.len(),
                TAG_LEN
            )));
        }
        let split = ciphertext_with_tag.len() - TAG_LEN;
        let mut auth_tag = [0u8; TAG_LEN];
        auth_tag.copy_from_slice(&ciphertext_with_tag[split..]);
        Ok(EncryptedMessage {
            auth_tag,
            ciphertext: ciphertext_with_tag[..split].to_vec(),
            ephemeral_public_key,
            iv,
            sender_key_id,
        })
    }

    /// Reassemble `ciphertext ++ auth_tag`.
    pub fn combined(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.auth_tag);
        out
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| QuietboxError::Malformed(format!("failed to serialize envelope: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| QuietboxError::Malformed(format!("failed to parse envelope: {}", e)))
    }
}

fn default_iterations() -> u32 {
    DEFAULT_PBKDF2_ITERATIONS
}

/// Secret bytes wrapped under a password-derived key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PasswordPackage {
    /// AES-GCM output, tag included (last 16 bytes).
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// PBKDF2 cost the package was sealed with. Older packages omit it.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(with = "b64_array")]
    pub iv: [u8; IV_LEN],
    #[serde(with = "b64_array")]
    pub salt: [u8; SALT_LEN],
}

impl PasswordPackage {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| QuietboxError::Malformed(format!("failed to serialize package: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| QuietboxError::Malformed(format!("failed to parse package: {}", e)))
    }
}

/// Produce canonical JSON: compact, fields in declaration order.
///
/// Used wherever bytes must be reproducible on both ends, such as detached
/// HMAC tags over metadata.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| QuietboxError::Malformed(format!("failed to serialize value: {}", e)))
}
