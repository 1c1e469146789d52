pub mod backup;
pub mod init;
pub mod lookup;
pub mod open;
pub mod seal;
pub mod whoami;

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use zeroize::Zeroizing;

use quietbox::config::{config_path, Config};
use quietbox::crypto::{CryptoProvider, RustCryptoProvider};
use quietbox::keys::store::default_store_dir;
use quietbox::keys::{FileKeyStore, SecureKeyStore};
use quietbox::transport::{HttpKeyDirectory, KeyDirectoryClient, MemoryKeyDirectory};
use quietbox::vault::PasswordVault;
use quietbox::E2eeEngine;

use crate::cli::GlobalArgs;

/// Everything a command needs, resolved from flags, environment and config file.
pub struct Context {
    pub engine: E2eeEngine,
    pub config: Config,
    pub store_dir: PathBuf,
    pub sealed: bool,
}

impl Context {
    pub fn build(global: &GlobalArgs) -> anyhow::Result<Self> {
        let provider: Arc<dyn CryptoProvider> = Arc::new(RustCryptoProvider::new()?);

        let store_dir = match &global.store_dir {
            Some(dir) => dir.clone(),
            None => default_store_dir()?,
        };
        let passphrase = std::env::var("QUIETBOX_PASSPHRASE").ok().map(Zeroizing::new);
        let store = match &passphrase {
            Some(passphrase) => FileKeyStore::open_with_passphrase(
                &store_dir,
                PasswordVault::new(provider.clone()),
                passphrase,
            ),
            None => FileKeyStore::open(&store_dir),
        }
        .with_context(|| format!("Failed to open key store at {}", store_dir.display()))?;
        let sealed = store.is_sealed();
        let store: Arc<dyn SecureKeyStore> = Arc::new(store);

        let config = Config::load_from(&config_path()?)?.merged(
            global.directory_url.clone(),
            global.user_id.clone(),
            global.token.clone(),
        );

        let directory: Arc<dyn KeyDirectoryClient> = match &config.directory_url {
            Some(url) => Arc::new(HttpKeyDirectory::new(
                url,
                config.token.as_deref().unwrap_or_default(),
                provider.clone(),
            )?),
            None => Arc::new(MemoryKeyDirectory::new()),
        };

        Ok(Context {
            engine: E2eeEngine::new(provider, store, directory),
            config,
            store_dir,
            sealed,
        })
    }

    /// The configured user id, or an error telling the user how to set it.
    pub fn user_id(&self) -> anyhow::Result<&str> {
        self.config
            .user_id
            .as_deref()
            .ok_or_else(|| {
                anyhow::anyhow!("No user id configured. Pass --user-id or set QUIETBOX_USER_ID.")
            })
    }

    pub fn require_online(&self) -> anyhow::Result<()> {
        if !self.config.is_online() {
            anyhow::bail!(
                "No key directory configured. Pass --directory-url or set QUIETBOX_DIRECTORY_URL."
            );
        }
        Ok(())
    }
}

/// Read a file argument, treating `-` or no argument as stdin.
pub fn read_input(path: Option<&str>) -> anyhow::Result<String> {
    match path {
        None | Some("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            Ok(buf)
        }
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path)),
    }
}
