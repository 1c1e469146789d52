//! CLI configuration persisted at `~/.quietbox/config.json`.
//!
//! Every field is optional on disk; command-line flags and `QUIETBOX_*`
//! environment variables take precedence over the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{QuietboxError, Result};
use crate::keys::store::{base_dir, write_item_atomic};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

pub fn config_path() -> Result<PathBuf> {
    Ok(base_dir()?.join("config.json"))
}

impl Config {
    /// Load from `path`; a missing file is an empty config.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => {
                return Err(QuietboxError::Storage(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        serde_json::from_str(&content).map_err(|e| {
            QuietboxError::Malformed(format!("invalid config at {}: {}", path.display(), e))
        })
    }

    /// Write atomically with owner-only permissions; the token is a credential.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                QuietboxError::Storage(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| QuietboxError::Malformed(format!("failed to serialize config: {}", e)))?;
        write_item_atomic(path, json.as_bytes())
    }

    /// Overlay explicitly given values on top of the stored ones.
    pub fn merged(
        mut self,
        directory_url: Option<String>,
        user_id: Option<String>,
        token: Option<String>,
    ) -> Self {
        if directory_url.is_some() {
            self.directory_url = directory_url;
        }
        if user_id.is_some() {
            self.user_id = user_id;
        }
        if token.is_some() {
            self.token = token;
        }
        self
    }

    pub fn is_online(&self) -> bool {
        self.directory_url.is_some()
    }
}
