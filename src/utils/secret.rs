// rman-backup/src/utils/secret.rs
//! Standby passwords stored as `<secrets_dir>/<DB>.pwd`.
//!
//! File format: base64(nonce (12 bytes) || AES-256-GCM ciphertext+tag).
//! The key is the SHA-256 digest of a passphrase taken from the environment.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, Result};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

pub trait SecretResolver {
    fn decrypt(&self, db_name: &str) -> Result<String>;
}

pub struct FileSecretResolver {
    dir: PathBuf,
    key_env: String,
}

impl FileSecretResolver {
    pub fn new(dir: &Path, key_env: &str) -> Self {
        FileSecretResolver {
            dir: dir.to_path_buf(),
            key_env: key_env.to_string(),
        }
    }

    fn secret_path(&self, db_name: &str) -> PathBuf {
        self.dir.join(format!("{}.pwd", db_name))
    }
}

impl SecretResolver for FileSecretResolver {
    fn decrypt(&self, db_name: &str) -> Result<String> {
        let passphrase = std::env::var(&self.key_env).map_err(|_| {
            AppError::Secret(format!("environment variable {} is not set", self.key_env))
        })?;
        let path = self.secret_path(db_name);
        let encoded = fs::read_to_string(&path).map_err(|e| {
            AppError::Secret(format!("cannot read {}: {}", path.display(), e))
        })?;
        decrypt_blob(&passphrase, &encoded)
    }
}

fn derive_key(passphrase: &str) -> [u8; 32] {
    Sha256::digest(passphrase.as_bytes()).into()
}

pub fn decrypt_blob(passphrase: &str, encoded: &str) -> Result<String> {
    let combined = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| AppError::Secret(format!("invalid base64: {}", e)))?;
    if combined.len() < NONCE_LEN + TAG_LEN {
        return Err(AppError::Secret("encrypted password is too short".to_string()));
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(&derive_key(passphrase))
        .map_err(|e| AppError::Secret(format!("invalid key: {}", e)))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| AppError::Secret("decryption failed, wrong key or corrupted file".to_string()))?;

    let password = String::from_utf8(plaintext)
        .map_err(|_| AppError::Secret("decrypted password is not UTF-8".to_string()))?;
    Ok(password.trim_end_matches(['\r', '\n']).to_string())
}
