//! Password vault: wraps secret bytes under a PBKDF2-derived AES-256-GCM key
//! and issues human-enterable backup codes.
//!
//! A wrong password and a corrupted package both surface as
//! `QuietboxError::Authentication`; callers cannot tell them apart.

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::crypto::{random_array, AesKey, CryptoProvider, IV_LEN, SALT_LEN};
use crate::error::{log_failure, QuietboxError, Result};
use crate::record::{PasswordPackage, DEFAULT_PBKDF2_ITERATIONS};

/// Backup code alphabet: digits 2-9 and A-Z without I and O (32 symbols).
pub const BACKUP_CODE_ALPHABET: &[u8; 32] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Number of code symbols, excluding separators.
pub const BACKUP_CODE_SYMBOLS: usize = 16;

const BACKUP_CODE_GROUP: usize = 4;

/// Upper bound accepted from a package header; anything above is treated as hostile.
const MAX_PBKDF2_ITERATIONS: u32 = 10_000_000;

#[derive(Clone)]
pub struct PasswordVault {
    provider: Arc<dyn CryptoProvider>,
    iterations: u32,
}

impl PasswordVault {
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self::with_iterations(provider, DEFAULT_PBKDF2_ITERATIONS)
    }

    /// Seal new packages with a custom PBKDF2 cost. Unpacking always honours
    /// the cost recorded in the package.
    pub fn with_iterations(provider: Arc<dyn CryptoProvider>, iterations: u32) -> Self {
        PasswordVault {
            provider,
            iterations,
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// PBKDF2-HMAC-SHA256 of `password` over `salt` at the vault's iteration count.
    pub fn derive_key_from_password(&self, password: &str, salt: &[u8]) -> Result<AesKey> {
        self.provider
            .pbkdf2_sha256(password.as_bytes(), salt, self.iterations)
    }

    /// Wrap `data` with a fresh salt and IV.
    pub fn pack_with_password(&self, data: &[u8], password: &str) -> Result<PasswordPackage> {
        let salt: [u8; SALT_LEN] = random_array(self.provider.as_ref())?;
        let iv: [u8; IV_LEN] = random_array(self.provider.as_ref())?;
        let key = self.derive_key_from_password(password, &salt)?;
        let ciphertext = self
            .provider
            .aes_gcm_encrypt(&key, &iv, data)
            .inspect_err(|e| log_failure("pack_with_password", e))?;
        Ok(PasswordPackage {
            ciphertext,
            iterations: self.iterations,
            iv,
            salt,
        })
    }

    /// Recover the bytes wrapped by `pack_with_password`.
    pub fn unpack_with_password(
        &self,
        package: &PasswordPackage,
        password: &str,
    ) -> Result<Zeroizing<Vec<u8>>> {
        if package.iterations == 0 || package.iterations > MAX_PBKDF2_ITERATIONS {
            let err = QuietboxError::Authentication;
            log_failure("unpack_with_password", &err);
            return Err(err);
        }
        let key = self
            .provider
            .pbkdf2_sha256(password.as_bytes(), &package.salt, package.iterations)?;
        self.provider
            .aes_gcm_decrypt(&key, &package.iv, &package.ciphertext)
            .map_err(|_| QuietboxError::Authentication)
            .inspect_err(|e| log_failure("unpack_with_password", e))
    }

    /// Generate a `XXXX-XXXX-XXXX-XXXX` recovery code from the OS RNG.
    ///
    /// The code is a recovery secret, not key material; store only a hash of it
    /// or use it through `pack_with_backup_code`.
    pub fn generate_backup_code(&self) -> Result<String> {
        let raw: Zeroizing<[u8; BACKUP_CODE_SYMBOLS]> =
            Zeroizing::new(random_array(self.provider.as_ref())?);
        // 32 divides 256, so masking the low five bits is unbiased.
        let symbols: Vec<u8> = raw
            .iter()
            .map(|b| BACKUP_CODE_ALPHABET[(b & 0x1f) as usize])
            .collect();
        Ok(format_groups(&symbols))
    }

    /// Wrap `data` using a backup code as the password.
    ///
    /// The code is normalized first, so the user may later type it in lower
    /// case or without hyphens.
    pub fn pack_with_backup_code(&self, data: &[u8], code: &str) -> Result<PasswordPackage> {
        let normalized = Zeroizing::new(normalize_backup_code(code)?);
        self.pack_with_password(data, &normalized)
    }

    pub fn unpack_with_backup_code(
        &self,
        package: &PasswordPackage,
        code: &str,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let normalized = Zeroizing::new(
            normalize_backup_code(code).map_err(|_| QuietboxError::Authentication)?,
        );
        self.unpack_with_password(package, &normalized)
    }
}

impl std::fmt::Debug for PasswordVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordVault")
            .field("iterations", &self.iterations)
            .finish()
    }
}

fn format_groups(symbols: &[u8]) -> String {
    symbols
        .chunks(BACKUP_CODE_GROUP)
        .map(|group| group.iter().map(|&b| b as char).collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

/// Canonicalize user input into `XXXX-XXXX-XXXX-XXXX`.
///
/// Accepts lower case and ignores spaces and hyphens. Rejects any symbol
/// outside the alphabet (including the ambiguous `0`, `1`, `I`, `O`) and any
/// length other than 16 symbols.
pub fn normalize_backup_code(input: &str) -> Result<String> {
    let symbols: Vec<u8> = input
        .chars()
        .filter(|c| !matches!(c, '-' | ' ' | '\t'))
        .map(|c| c.to_ascii_uppercase())
        .map(|c| {
            if c.is_ascii() && BACKUP_CODE_ALPHABET.contains(&(c as u8)) {
                Ok(c as u8)
            } else {
                Err(QuietboxError::Malformed(
                    "backup code contains a character outside its alphabet".into(),
                ))
            }
        })
        .collect::<Result<_>>()?;
    if symbols.len() != BACKUP_CODE_SYMBOLS {
        return Err(QuietboxError::Malformed(format!(
            "backup code must have {} characters, got {}",
            BACKUP_CODE_SYMBOLS,
            symbols.len()
        )));
    }
    Ok(format_groups(&symbols))
}
