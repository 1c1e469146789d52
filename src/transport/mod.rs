/// Transport module: key directory clients.
///
/// `KeyDirectoryClient` is the narrow interface the engine consumes to publish
/// and look up public keys. Two implementations ship with the crate:
///
///   - `MemoryKeyDirectory`: process-local, for tests and embedding.
///   - `HttpKeyDirectory`: blocking JSON client for a remote directory.
///
/// HTTP protocol (bearer credential identifies the caller):
///
/// ```text
/// POST {base}/keys                      {"key_id", "public_key"} -> KeyRecord
/// GET  {base}/keys/{user_id}/{key_id}                             -> KeyRecord
/// GET  {base}/keys/{user_id}/latest                               -> KeyRecord
/// ```
///
/// Every record returned over HTTP is checked against the request before it
/// reaches the caller: the user and key ids must match and the public key must
/// decode as a P-256 SPKI.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::crypto::CryptoProvider;
use crate::error::{QuietboxError, Result};
use crate::record::KeyRecord;
use crate::util::now_secs;

pub trait KeyDirectoryClient: Send + Sync {
    /// Upsert the record for `(user_id, key_id)`. Repeating the call is harmless.
    fn register_key(&self, user_id: &str, key_id: &str, public_key: &str) -> Result<KeyRecord>;

    fn get_key(&self, user_id: &str, key_id: &str) -> Result<KeyRecord>;

    /// The record with the greatest `created_at`; `KeyNotFound` if the user never published.
    fn get_latest_key(&self, user_id: &str) -> Result<KeyRecord>;
}

// ── MemoryKeyDirectory ─────────────────────────────────────────────────────

/// In-process directory. Records are kept per user in registration order.
#[derive(Default)]
pub struct MemoryKeyDirectory {
    records: RwLock<HashMap<String, Vec<KeyRecord>>>,
}

impl MemoryKeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register with an explicit timestamp instead of the system clock.
    pub fn register_key_at(
        &self,
        user_id: &str,
        key_id: &str,
        public_key: &str,
        created_at: u64,
    ) -> KeyRecord {
        let mut records = self.records.write();
        let user_records = records.entry(user_id.to_string()).or_default();
        if let Some(existing) = user_records.iter_mut().find(|r| r.key_id == key_id) {
            existing.public_key = public_key.to_string();
            return existing.clone();
        }
        let record = KeyRecord {
            created_at,
            key_id: key_id.to_string(),
            public_key: public_key.to_string(),
            user_id: user_id.to_string(),
        };
        user_records.push(record.clone());
        record
    }

    pub fn key_count(&self, user_id: &str) -> usize {
        self.records.read().get(user_id).map_or(0, Vec::len)
    }
}

impl KeyDirectoryClient for MemoryKeyDirectory {
    fn register_key(&self, user_id: &str, key_id: &str, public_key: &str) -> Result<KeyRecord> {
        Ok(self.register_key_at(user_id, key_id, public_key, now_secs()))
    }

    fn get_key(&self, user_id: &str, key_id: &str) -> Result<KeyRecord> {
        self.records
            .read()
            .get(user_id)
            .and_then(|records| records.iter().find(|r| r.key_id == key_id))
            .cloned()
            .ok_or_else(|| QuietboxError::KeyNotFound(format!("{}/{}", user_id, key_id)))
    }

    fn get_latest_key(&self, user_id: &str) -> Result<KeyRecord> {
        // Ties on created_at go to the most recently registered record.
        self.records
            .read()
            .get(user_id)
            .and_then(|records| {
                records
                    .iter()
                    .enumerate()
                    .max_by_key(|(index, r)| (r.created_at, *index))
                    .map(|(_, r)| r.clone())
            })
            .ok_or_else(|| QuietboxError::KeyNotFound(user_id.to_string()))
    }
}

// ── HttpKeyDirectory ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct RegisterKeyRequest<'a> {
    key_id: &'a str,
    public_key: &'a str,
}

/// Blocking HTTP client for a remote key directory.
pub struct HttpKeyDirectory {
    client: reqwest::blocking::Client,
    base_url: reqwest::Url,
    token: Zeroizing<String>,
    provider: Arc<dyn CryptoProvider>,
}

impl HttpKeyDirectory {
    /// Create a client for `base_url` (e.g. `https://keys.example.com/v1`).
    ///
    /// A bare hostname is treated as `https://`.
    pub fn new(base_url: &str, token: &str, provider: Arc<dyn CryptoProvider>) -> Result<Self> {
        let with_scheme = if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url.to_string()
        } else {
            format!("https://{}", base_url)
        };
        let base_url = reqwest::Url::parse(&with_scheme)
            .map_err(|e| QuietboxError::Directory(format!("invalid directory URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(QuietboxError::Directory("directory URL cannot be a base".into()));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| QuietboxError::Directory(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token: Zeroizing::new(token.to_string()),
            provider,
        })
    }

    /// Append percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| QuietboxError::Directory("directory URL cannot be a base".into()))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    /// Send a request and return the body, mapping 404 to `KeyNotFound`.
    fn send(&self, request: reqwest::blocking::RequestBuilder, what: &str) -> Result<Vec<u8>> {
        let response = request
            .bearer_auth(self.token.as_str())
            .send()
            .map_err(|e| QuietboxError::Directory(format!("{} request failed: {}", what, e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(QuietboxError::KeyNotFound(what.to_string()));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(QuietboxError::Directory(format!(
                "{} failed (status {}): {}",
                what,
                status,
                body.trim()
            )));
        }

        Ok(response
            .bytes()
            .map_err(|e| QuietboxError::Directory(format!("failed to read response: {}", e)))?
            .to_vec())
    }

    /// Parse a KeyRecord and check it answers the request that was made.
    fn deserialize_and_validate(
        &self,
        bytes: &[u8],
        user_id: &str,
        key_id: Option<&str>,
    ) -> Result<KeyRecord> {
        let record: KeyRecord = serde_json::from_slice(bytes)
            .map_err(|e| QuietboxError::Directory(format!("failed to parse key record: {}", e)))?;

        if record.user_id != user_id {
            return Err(QuietboxError::Directory(format!(
                "directory answered for user {:?}, expected {:?}",
                record.user_id, user_id
            )));
        }
        if let Some(expected) = key_id {
            if record.key_id != expected {
                return Err(QuietboxError::Directory(format!(
                    "directory answered with key {:?}, expected {:?}",
                    record.key_id, expected
                )));
            }
        }
        let der = record
            .public_key_der()
            .map_err(|e| QuietboxError::Directory(e.to_string()))?;
        self.provider
            .import_public_key(&der)
            .map_err(|e| {
                QuietboxError::Directory(format!("directory returned unusable key: {}", e))
            })?;

        Ok(record)
    }
}

impl KeyDirectoryClient for HttpKeyDirectory {
    fn register_key(&self, user_id: &str, key_id: &str, public_key: &str) -> Result<KeyRecord> {
        let url = self.endpoint(&["keys"])?;
        let body = RegisterKeyRequest { key_id, public_key };
        let bytes = self.send(self.client.post(url).json(&body), "register-key")?;
        let record = self.deserialize_and_validate(&bytes, user_id, Some(key_id))?;
        if record.public_key != public_key {
            return Err(QuietboxError::Directory(
                "directory stored a different public key than registered".into(),
            ));
        }
        Ok(record)
    }

    fn get_key(&self, user_id: &str, key_id: &str) -> Result<KeyRecord> {
        let url = self.endpoint(&["keys", user_id, key_id])?;
        let bytes = self.send(self.client.get(url), "get-key")?;
        self.deserialize_and_validate(&bytes, user_id, Some(key_id))
    }

    fn get_latest_key(&self, user_id: &str) -> Result<KeyRecord> {
        let url = self.endpoint(&["keys", user_id, "latest"])?;
        let bytes = self.send(self.client.get(url), "get-latest-key")?;
        self.deserialize_and_validate(&bytes, user_id, None)
    }
}

impl std::fmt::Debug for HttpKeyDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpKeyDirectory")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"[REDACTED]")
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, PrivateKey, RustCryptoProvider};
    use crate::record::encode_b64;

    fn provider() -> Arc<dyn CryptoProvider> {
        Arc::new(RustCryptoProvider::new().expect("provider"))
    }

    fn public_key_b64(byte: u8) -> String {
        let p = provider();
        let pair = KeyPair::from(PrivateKey::from_scalar_bytes(&[byte; 32]).expect("scalar"));
        encode_b64(&p.export_public_key(&pair.public_key).expect("export"))
    }

    fn record_json(user_id: &str, key_id: &str, public_key: &str) -> Vec<u8> {
        serde_json::to_vec(&KeyRecord {
            created_at: 1_700_000_000,
            key_id: key_id.to_string(),
            public_key: public_key.to_string(),
            user_id: user_id.to_string(),
        })
        .expect("serialize")
    }

    // ── MemoryKeyDirectory tests ───────────────────────────────────────────

    #[test]
    fn test_memory_get_latest_unknown_user() {
        let directory = MemoryKeyDirectory::new();
        assert!(matches!(
            directory.get_latest_key("nobody"),
            Err(QuietboxError::KeyNotFound(_))
        ));
        assert!(matches!(
            directory.get_key("nobody", "k1"),
            Err(QuietboxError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_memory_latest_by_created_at() {
        let directory = MemoryKeyDirectory::new();
        directory.register_key_at("alice", "new", "pk-new", 200);
        directory.register_key_at("alice", "old", "pk-old", 100);
        assert_eq!(directory.get_latest_key("alice").expect("latest").key_id, "new");
        assert_eq!(directory.get_key("alice", "old").expect("old").public_key, "pk-old");
    }

    #[test]
    fn test_memory_latest_tie_goes_to_last_registered() {
        let directory = MemoryKeyDirectory::new();
        directory.register_key_at("alice", "k1", "pk1", 100);
        directory.register_key_at("alice", "k2", "pk2", 100);
        assert_eq!(directory.get_latest_key("alice").expect("latest").key_id, "k2");
    }

    #[test]
    fn test_memory_register_is_idempotent() {
        let directory = MemoryKeyDirectory::new();
        let first = directory.register_key_at("alice", "k1", "pk1", 100);
        let second = directory.register_key("alice", "k1", "pk1").expect("re-register");
        assert_eq!(first, second, "re-registering must not change the record");
        assert_eq!(directory.key_count("alice"), 1);
    }

    #[test]
    fn test_memory_users_are_isolated() {
        let directory = MemoryKeyDirectory::new();
        directory.register_key_at("alice", "k1", "pk1", 100);
        assert!(directory.get_key("bob", "k1").is_err());
    }

    // ── HttpKeyDirectory tests ─────────────────────────────────────────────

    #[test]
    fn test_http_client_new_adds_scheme() {
        let client = HttpKeyDirectory::new("keys.example.com", "token", provider())
            .expect("client should build");
        assert_eq!(client.base_url.as_str(), "https://keys.example.com/");
    }

    #[test]
    fn test_http_endpoint_joins_and_encodes_segments() {
        let client = HttpKeyDirectory::new("https://keys.example.com/v1/", "token", provider())
            .expect("client should build");
        let url = client.endpoint(&["keys", "alice", "latest"]).expect("endpoint");
        assert_eq!(url.as_str(), "https://keys.example.com/v1/keys/alice/latest");

        let url = client.endpoint(&["keys", "a/b", "k 1"]).expect("endpoint");
        assert_eq!(url.as_str(), "https://keys.example.com/v1/keys/a%2Fb/k%201");
    }

    #[test]
    fn test_http_debug_redacts_token() {
        let client = HttpKeyDirectory::new("https://keys.example.com", "s3cret-token", provider())
            .expect("client should build");
        let debug = format!("{:?}", client);
        assert!(!debug.contains("s3cret-token"), "got: {}", debug);
    }

    #[test]
    fn test_http_validate_accepts_matching_record() {
        let client = HttpKeyDirectory::new("https://keys.example.com", "t", provider())
            .expect("client");
        let pk = public_key_b64(5);
        let record = client
            .deserialize_and_validate(&record_json("alice", "k1", &pk), "alice", Some("k1"))
            .expect("valid record should pass");
        assert_eq!(record.public_key, pk);
    }

    #[test]
    fn test_http_validate_rejects_substituted_user_or_key() {
        let client = HttpKeyDirectory::new("https://keys.example.com", "t", provider())
            .expect("client");
        let pk = public_key_b64(5);
        assert!(matches!(
            client.deserialize_and_validate(
                &record_json("mallory", "k1", &pk),
                "alice",
                Some("k1")
            ),
            Err(QuietboxError::Directory(_))
        ));
        assert!(matches!(
            client.deserialize_and_validate(&record_json("alice", "k2", &pk), "alice", Some("k1")),
            Err(QuietboxError::Directory(_))
        ));
    }

    #[test]
    fn test_http_validate_rejects_unusable_public_key() {
        let client = HttpKeyDirectory::new("https://keys.example.com", "t", provider())
            .expect("client");
        let bogus = encode_b64(b"not an spki document");
        assert!(matches!(
            client.deserialize_and_validate(&record_json("alice", "k1", &bogus), "alice", None),
            Err(QuietboxError::Directory(_))
        ));
        assert!(matches!(
            client.deserialize_and_validate(b"{not json", "alice", None),
            Err(QuietboxError::Directory(_))
        ));
    }

    /// Integration test requiring a live key directory.
    ///
    /// Run with: QUIETBOX_TEST_DIRECTORY=https://... QUIETBOX_TEST_TOKEN=... \
    ///   cargo test --lib transport::tests::test_integration_register_and_fetch -- --ignored
    #[test]
    #[ignore]
    fn test_integration_register_and_fetch() {
        let base = std::env::var("QUIETBOX_TEST_DIRECTORY").expect("QUIETBOX_TEST_DIRECTORY");
        let token = std::env::var("QUIETBOX_TEST_TOKEN").expect("QUIETBOX_TEST_TOKEN");
        let user = std::env::var("QUIETBOX_TEST_USER").expect("QUIETBOX_TEST_USER");
        let client = HttpKeyDirectory::new(&base, &token, provider()).expect("client");

        let key_id = uuid::Uuid::new_v4().to_string();
        let pk = public_key_b64(42);
        client.register_key(&user, &key_id, &pk).expect("register should succeed");
        let fetched = client.get_key(&user, &key_id).expect("get_key should succeed");
        assert_eq!(fetched.public_key, pk);
        let latest = client.get_latest_key(&user).expect("latest should succeed");
        assert_eq!(latest.key_id, key_id);
    }
}
