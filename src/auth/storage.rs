//! Site session persistence with encrypted-at-rest storage.
//!
//! The session cookies captured at login are written to
//! `~/.config/language101/session.enc` so later runs can skip the login form.

use std::env;
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use super::CookieLine;

/// Environment variable that supplies key material instead of the keychain.
pub const MASTER_KEY_ENV: &str = "LANGUAGE101_MASTER_KEY";

const KEYRING_SERVICE: &str = "language101";
const KEYRING_ENTRY_NAME: &str = "session-master-key-v1";
const MAGIC: &[u8; 4] = b"L1S1";
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

/// Errors for persisted session storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Could not access keychain and no env fallback key was provided.
    #[error(
        "unable to access system keychain for session encryption key; set LANGUAGE101_MASTER_KEY or configure keychain access"
    )]
    KeychainUnavailable,
    /// Stored encrypted payload is malformed.
    #[error("persisted session payload is invalid")]
    InvalidPayload,
    /// Encryption failed.
    #[error("failed to encrypt persisted session")]
    EncryptionFailed,
    /// Decryption failed.
    #[error("failed to decrypt persisted session")]
    DecryptionFailed,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StoredCookie {
    domain: String,
    tailmatch: bool,
    path: String,
    secure: bool,
    expires: u64,
    name: String,
    value: String,
}

impl StoredCookie {
    fn from_cookie_line(cookie: &CookieLine) -> Self {
        Self {
            domain: cookie.domain.clone(),
            tailmatch: cookie.tailmatch,
            path: cookie.path.clone(),
            secure: cookie.secure,
            expires: cookie.expires,
            name: cookie.name.clone(),
            value: cookie.value().to_string(),
        }
    }

    fn into_cookie_line(self) -> CookieLine {
        CookieLine::new(
            self.domain,
            self.tailmatch,
            self.path,
            self.secure,
            self.expires,
            self.name,
            self.value,
        )
    }
}

/// Location and key source of the encrypted session file.
///
/// Without explicit key material the key comes from
/// [`MASTER_KEY_ENV`] or the system keychain.
#[derive(Clone)]
pub struct SessionVault {
    path: PathBuf,
    key_material: Option<String>,
}

impl SessionVault {
    /// A vault whose key comes from the environment or keychain.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key_material: None,
        }
    }

    /// A vault with fixed key material.
    #[must_use]
    pub fn with_key(path: impl Into<PathBuf>, key_material: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key_material: Some(key_material.into()),
        }
    }

    /// Path of the encrypted session file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores session cookies encrypted, replacing any previous session.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when key retrieval, encryption, or file writing fails.
    #[instrument(level = "debug", skip(self, cookies), fields(path = %self.path.display(), count = cookies.len()))]
    pub fn store(&self, cookies: &[CookieLine]) -> Result<(), StorageError> {
        let key = self.key()?;
        store_session_with_key(cookies, &self.path, &key)
    }

    /// Loads and decrypts the stored session.
    ///
    /// Returns `Ok(None)` when no session has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when key retrieval, decryption, or parsing fails.
    #[instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<Option<Vec<CookieLine>>, StorageError> {
        if !self.path.exists() {
            debug!("no persisted session");
            return Ok(None);
        }

        let key = self.key()?;
        load_session_with_key(&self.path, &key).map(Some)
    }

    /// Removes the persisted session.
    ///
    /// Returns `true` when a session file existed and was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when file removal fails.
    pub fn clear(&self) -> Result<bool, StorageError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn key(&self) -> Result<String, StorageError> {
        match &self.key_material {
            Some(key) => Ok(key.clone()),
            None => load_or_create_key(),
        }
    }
}

impl std::fmt::Debug for SessionVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionVault")
            .field("path", &self.path)
            .field("key_material", &self.key_material.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn load_or_create_key() -> Result<String, StorageError> {
    if let Some(from_env) = env::var_os(MASTER_KEY_ENV) {
        let key = from_env.to_string_lossy().trim().to_string();
        if !key.is_empty() {
            return Ok(key);
        }
    }

    let entry = safe_keyring_entry()?;

    match safe_keyring_get_password(&entry) {
        Ok(existing) if !existing.trim().is_empty() => Ok(existing),
        _ => {
            let generated = generate_key_material();
            safe_keyring_set_password(&entry, &generated)?;
            Ok(generated)
        }
    }
}

// The keyring backends can panic on headless systems; treat that as "unavailable".
fn safe_keyring_entry() -> Result<keyring::Entry, StorageError> {
    catch_unwind(|| keyring::Entry::new(KEYRING_SERVICE, KEYRING_ENTRY_NAME))
        .map_err(|_| StorageError::KeychainUnavailable)?
        .map_err(|_| StorageError::KeychainUnavailable)
}

fn safe_keyring_get_password(entry: &keyring::Entry) -> Result<String, StorageError> {
    catch_unwind(AssertUnwindSafe(|| entry.get_password()))
        .map_err(|_| StorageError::KeychainUnavailable)?
        .map_err(|_| StorageError::KeychainUnavailable)
}

fn safe_keyring_set_password(entry: &keyring::Entry, password: &str) -> Result<(), StorageError> {
    catch_unwind(AssertUnwindSafe(|| entry.set_password(password)))
        .map_err(|_| StorageError::KeychainUnavailable)?
        .map_err(|_| StorageError::KeychainUnavailable)
}

fn generate_key_material() -> String {
    let mut bytes = [0_u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

fn derive_key_bytes(key_material: &str) -> [u8; KEY_LEN] {
    let digest = Sha256::digest(key_material.as_bytes());
    let mut key = [0_u8; KEY_LEN];
    key.copy_from_slice(&digest[..KEY_LEN]);
    key
}

fn store_session_with_key(
    cookies: &[CookieLine],
    path: &Path,
    key_material: &str,
) -> Result<(), StorageError> {
    let stored = cookies
        .iter()
        .map(StoredCookie::from_cookie_line)
        .collect::<Vec<_>>();
    let plaintext = serde_json::to_vec(&stored)?;
    let encrypted = encrypt_bytes(&plaintext, key_material)?;
    write_encrypted_payload(path, &encrypted)
}

// Write-then-rename so an interrupted run never leaves half a session behind.
fn write_encrypted_payload(path: &Path, payload: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let staging = path.with_extension("enc.tmp");
    fs::write(&staging, payload)?;
    set_owner_only_permissions(&staging)?;
    fs::rename(&staging, path)?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = fs::Permissions::from_mode(0o600);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

fn load_session_with_key(
    path: &Path,
    key_material: &str,
) -> Result<Vec<CookieLine>, StorageError> {
    let bytes = fs::read(path)?;
    let plaintext = decrypt_bytes(&bytes, key_material)?;
    let stored = serde_json::from_slice::<Vec<StoredCookie>>(&plaintext)?;
    Ok(stored
        .into_iter()
        .map(StoredCookie::into_cookie_line)
        .collect())
}

fn encrypt_bytes(plaintext: &[u8], key_material: &str) -> Result<Vec<u8>, StorageError> {
    let key_bytes = derive_key_bytes(key_material);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key_bytes));

    let mut nonce = [0_u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let nonce_ref = XNonce::from_slice(&nonce);

    let ciphertext = cipher
        .encrypt(nonce_ref, plaintext)
        .map_err(|_| StorageError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    output.extend_from_slice(MAGIC);
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

fn decrypt_bytes(payload: &[u8], key_material: &str) -> Result<Vec<u8>, StorageError> {
    if payload.len() < MAGIC.len() + NONCE_LEN || &payload[..MAGIC.len()] != MAGIC {
        return Err(StorageError::InvalidPayload);
    }

    let key_bytes = derive_key_bytes(key_material);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key_bytes));
    let nonce_start = MAGIC.len();
    let nonce_end = nonce_start + NONCE_LEN;
    let nonce = XNonce::from_slice(&payload[nonce_start..nonce_end]);
    let ciphertext = &payload[nonce_end..];

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| StorageError::DecryptionFailed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn sample_cookie() -> CookieLine {
        CookieLine::new(
            ".japanesepod101.com".to_string(),
            true,
            "/".to_string(),
            true,
            4_102_444_800,
            "amember_nr".to_string(),
            "secret".to_string(),
        )
    }

    #[test]
    fn test_store_and_load_round_trip_with_explicit_key() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("session.enc");

        store_session_with_key(&[sample_cookie()], &path, "test-key").unwrap();
        let loaded = load_session_with_key(&path, "test-key").unwrap();

        assert_eq!(loaded, vec![sample_cookie()]);
        assert!(!path.with_extension("enc.tmp").exists(), "staging file removed");
    }

    #[test]
    fn test_payload_does_not_contain_plaintext_value() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("session.enc");

        store_session_with_key(&[sample_cookie()], &path, "test-key").unwrap();
        let raw = fs::read(&path).unwrap();

        assert!(raw.starts_with(MAGIC));
        assert!(!raw.windows(6).any(|window| window == b"secret"));
    }

    #[test]
    fn test_load_with_wrong_key_fails() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("session.enc");
        store_session_with_key(&[sample_cookie()], &path, "key-a").unwrap();

        let result = load_session_with_key(&path, "key-b");
        assert!(matches!(result, Err(StorageError::DecryptionFailed)));
    }

    #[test]
    fn test_invalid_payload_fails() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("session.enc");
        fs::write(&path, b"not-encrypted-data").unwrap();

        let result = load_session_with_key(&path, "test-key");
        assert!(matches!(result, Err(StorageError::InvalidPayload)));
    }

    #[test]
    fn test_store_overwrites_previous_session() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("session.enc");
        store_session_with_key(&[sample_cookie()], &path, "k").unwrap();
        store_session_with_key(&[], &path, "k").unwrap();

        assert!(load_session_with_key(&path, "k").unwrap().is_empty());
    }

    #[test]
    fn test_vault_clear_reports_removal() {
        let tempdir = TempDir::new().unwrap();
        let vault = SessionVault::with_key(tempdir.path().join("session.enc"), "k");
        assert!(!vault.clear().unwrap());

        vault.store(&[sample_cookie()]).unwrap();
        assert!(vault.clear().unwrap());
        assert!(!vault.path().exists());
    }

    #[test]
    fn test_vault_load_missing_returns_none() {
        let tempdir = TempDir::new().unwrap();
        let vault = SessionVault::with_key(tempdir.path().join("missing.enc"), "k");
        assert!(vault.load().unwrap().is_none());
    }

    #[test]
    fn test_vault_debug_redacts_key() {
        let vault = SessionVault::with_key("/tmp/session.enc", "super-secret");
        let debug = format!("{vault:?}");
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn test_hex_encode_length() {
        assert_eq!(hex_encode(&[1_u8, 255_u8, 16_u8]), "01ff10");
    }

    #[cfg(unix)]
    #[test]
    fn test_store_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("session.enc");
        store_session_with_key(&[sample_cookie()], &path, "test-key").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
