use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::error::{log_failure, QuietboxError, Result};
use crate::record::PasswordPackage;
use crate::vault::PasswordVault;

/// Named-secret storage consumed by key generation and message decryption.
///
/// `encrypted` asks the store to protect the value at rest when it can; a
/// store without an at-rest key stores it as-is.
pub trait SecureKeyStore: Send + Sync {
    fn get_item(&self, name: &str, encrypted: bool) -> Result<Option<String>>;
    fn set_item(&self, name: &str, value: &str, encrypted: bool) -> Result<()>;
    fn remove_item(&self, name: &str) -> Result<()>;
}

pub fn base_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(QuietboxError::HomeDirNotFound)?;
    Ok(home.join(".quietbox"))
}

pub fn default_store_dir() -> Result<PathBuf> {
    Ok(base_dir()?.join("keys"))
}

// ── In-memory store ─────────────────────────────────────────────────────────

/// Process-local store. Values are kept as given; the `encrypted` flag is
/// remembered so callers can assert how an item was written.
#[derive(Default)]
pub struct MemoryKeyStore {
    items: RwLock<HashMap<String, (String, bool)>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `encrypted` flag the item was last written with.
    pub fn was_encrypted(&self, name: &str) -> Option<bool> {
        self.items.read().get(name).map(|(_, encrypted)| *encrypted)
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn get_item(&self, name: &str, _encrypted: bool) -> Result<Option<String>> {
        Ok(self.items.read().get(name).map(|(value, _)| value.clone()))
    }

    fn set_item(&self, name: &str, value: &str, encrypted: bool) -> Result<()> {
        self.items
            .write()
            .insert(name.to_string(), (value.to_string(), encrypted));
        Ok(())
    }

    fn remove_item(&self, name: &str) -> Result<()> {
        self.items.write().remove(name);
        Ok(())
    }
}

// ── File-backed store ───────────────────────────────────────────────────────

struct Sealing {
    vault: PasswordVault,
    passphrase: Zeroizing<String>,
}

/// One file per item under a private directory.
///
/// Files are written atomically (temp file + rename) with 0600 permissions,
/// and reads refuse files that are readable by group or others. With a
/// passphrase, items written with `encrypted = true` are stored as a
/// `PasswordPackage`.
pub struct FileKeyStore {
    dir: PathBuf,
    sealing: Option<Sealing>,
}

impl FileKeyStore {
    /// Open (creating if needed) a store without encryption at rest.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        ensure_private_dir(&dir)?;
        Ok(FileKeyStore { dir, sealing: None })
    }

    /// Open a store that seals encrypted items under `passphrase`.
    pub fn open_with_passphrase(
        dir: impl Into<PathBuf>,
        vault: PasswordVault,
        passphrase: &str,
    ) -> Result<Self> {
        let mut store = Self::open(dir)?;
        store.sealing = Some(Sealing {
            vault,
            passphrase: Zeroizing::new(passphrase.to_string()),
        });
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_sealed(&self) -> bool {
        self.sealing.is_some()
    }

    fn item_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !valid {
            return Err(QuietboxError::Storage(format!("invalid item name {:?}", name)));
        }
        Ok(self.dir.join(name))
    }
}

impl SecureKeyStore for FileKeyStore {
    fn get_item(&self, name: &str, encrypted: bool) -> Result<Option<String>> {
        let path = self.item_path(name)?;
        if !path.exists() {
            return Ok(None);
        }
        check_item_permissions(&path)?;
        let content = std::fs::read_to_string(&path)
            .map_err(|e| {
                QuietboxError::Storage(format!("failed to read {}: {}", path.display(), e))
            })?;

        let package = PasswordPackage::from_json(&content).ok();
        match (&self.sealing, encrypted, package) {
            (Some(sealing), true, Some(package)) => {
                let plaintext = sealing
                    .vault
                    .unpack_with_password(&package, &sealing.passphrase)
                    .inspect_err(|e| log_failure("key_store_unseal", e))?;
                let value = String::from_utf8(plaintext.to_vec())
                    .map_err(|_| QuietboxError::Storage(format!("item {} is not UTF-8", name)))?;
                Ok(Some(value))
            }
            (Some(_), true, None) => Err(QuietboxError::Storage(format!(
                "item {} was stored without encryption at rest",
                name
            ))),
            (None, true, Some(_)) => Err(QuietboxError::Storage(format!(
                "item {} is sealed; a passphrase is required",
                name
            ))),
            _ => Ok(Some(content)),
        }
    }

    fn set_item(&self, name: &str, value: &str, encrypted: bool) -> Result<()> {
        let path = self.item_path(name)?;
        let result = match (&self.sealing, encrypted) {
            (Some(sealing), true) => {
                let package = sealing
                    .vault
                    .pack_with_password(value.as_bytes(), &sealing.passphrase)?;
                write_item_atomic(&path, package.to_json()?.as_bytes())
            }
            _ => write_item_atomic(&path, value.as_bytes()),
        };
        result
            .map_err(|e| match e {
                QuietboxError::AtomicWriteFailed(io) => QuietboxError::Storage(format!(
                    "failed to write {}: {}",
                    path.display(),
                    io
                )),
                other => other,
            })
            .inspect_err(|e| log_failure("key_store_write", e))
    }

    fn remove_item(&self, name: &str) -> Result<()> {
        let path = self.item_path(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QuietboxError::Storage(format!(
                "failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

fn ensure_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| QuietboxError::Storage(format!("failed to create {}: {}", dir.display(), e)))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).map_err(|e| {
            QuietboxError::Storage(format!("failed to set 0700 on {}: {}", dir.display(), e))
        })?;
    }
    Ok(())
}

/// Write an item atomically (temp file then rename) and set 0600 permissions.
///
/// The temp file lives in the same directory so the rename never crosses a
/// filesystem boundary.
pub fn write_item_atomic(dest: &Path, contents: &[u8]) -> Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| QuietboxError::Storage("item path has no parent directory".into()))?;
    let file_name = dest
        .file_name()
        .ok_or_else(|| QuietboxError::Storage("item path has no file name".into()))?;
    let tmp = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));

    write_private_file(&tmp, contents).map_err(QuietboxError::AtomicWriteFailed)?;

    if let Err(e) = std::fs::rename(&tmp, dest) {
        let _ = std::fs::remove_file(&tmp);
        return Err(QuietboxError::AtomicWriteFailed(e));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o600))
            .map_err(QuietboxError::AtomicWriteFailed)?;
    }

    Ok(())
}

#[cfg(unix)]
fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

/// Check that an item file has exactly 0600 permissions (Unix only).
///
/// The error names the remediation command so the user can fix it directly.
#[cfg(unix)]
pub fn check_item_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = std::fs::metadata(path).map_err(|e| {
        QuietboxError::Storage(format!("failed to read metadata for {}: {}", path.display(), e))
    })?;
    let mode = metadata.permissions().mode() & 0o777;
    if mode != 0o600 {
        return Err(QuietboxError::Storage(format!(
            "{} has insecure permissions {:04o} (expected 0600). Fix with: chmod 600 {}",
            path.display(),
            mode,
            path.display()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_item_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
