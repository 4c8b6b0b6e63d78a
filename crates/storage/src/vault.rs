//! [`EncryptedFileVault`]: credentials encrypted at rest with AES-256-GCM.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracking::{Credential, SubscriberId, TokenVault, VaultError};

use crate::{atomic_write_secure, StorageError};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// 256-bit vault key.
#[derive(Clone)]
pub struct VaultKey([u8; KEY_LEN]);

impl VaultKey {
    /// Decodes a base64 key of exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, StorageError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| StorageError::InvalidKey {
                reason: e.to_string(),
            })?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|b: Vec<u8>| StorageError::InvalidKey {
            reason: format!("expected {KEY_LEN} bytes, got {}", b.len()),
        })?;
        Ok(Self(key))
    }

    /// Generates a random key.
    pub fn generate() -> Result<Self, StorageError> {
        let mut key = [0u8; KEY_LEN];
        getrandom::fill(&mut key).map_err(|e| StorageError::InvalidKey {
            reason: format!("failed to generate key: {e}"),
        })?;
        Ok(Self(key))
    }

    /// Returns the key in the base64 form accepted by [`Self::from_base64`].
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(<redacted>)")
    }
}

/// File-backed [`TokenVault`].
///
/// Decrypted credentials live in memory. The file maps subscriber ids to
/// `base64(nonce || ciphertext)` and is rewritten with owner-only permissions
/// on every change. Writes are serialised so the file always reflects the
/// latest completed `put` or `delete`, and run on the blocking pool.
pub struct EncryptedFileVault {
    path: PathBuf,
    cipher: Aes256Gcm,
    entries: DashMap<SubscriberId, Credential>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for EncryptedFileVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileVault")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl EncryptedFileVault {
    /// Opens the vault at `path`, decrypting every readable record.
    ///
    /// A missing file is an empty vault. Records that fail to decode or
    /// decrypt are logged and skipped; they are dropped on the next write.
    pub fn open(path: impl Into<PathBuf>, key: &VaultKey) -> Result<Self, StorageError> {
        let path = path.into();
        let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|e| StorageError::InvalidKey {
            reason: e.to_string(),
        })?;
        let vault = Self {
            entries: DashMap::new(),
            cipher,
            path,
            write_lock: Mutex::new(()),
        };

        let records = match std::fs::read(&vault.path) {
            Ok(bytes) => serde_json::from_slice::<BTreeMap<String, String>>(&bytes).map_err(
                |source| StorageError::Json {
                    path: vault.path.clone(),
                    source,
                },
            )?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(StorageError::Io {
                    path: vault.path.clone(),
                    source,
                })
            }
        };

        for (id, record) in records {
            let Ok(raw) = id.parse::<i64>() else {
                warn!(record = %id, "Skipping vault record with invalid subscriber id");
                continue;
            };
            let subscriber = SubscriberId::new(raw);
            match vault.decrypt(&record) {
                Ok(credential) => {
                    vault.entries.insert(subscriber, credential);
                }
                Err(e) => warn!(%subscriber, error = %e, "Skipping unreadable vault record"),
            }
        }
        info!(path = %vault.path.display(), credentials = vault.entries.len(), "Vault opened");
        Ok(vault)
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of stored credentials.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no credentials are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn encrypt(&self, credential: &Credential) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        getrandom::fill(&mut nonce_bytes).map_err(|e| VaultError::Crypto {
            message: format!("failed to generate nonce: {e}"),
        })?;
        let ciphertext = self
            .cipher
            .encrypt(&Nonce::from(nonce_bytes), credential.expose().as_bytes())
            .map_err(|e| VaultError::Crypto {
                message: e.to_string(),
            })?;
        let mut record = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        record.extend_from_slice(&nonce_bytes);
        record.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(record))
    }

    fn decrypt(&self, record: &str) -> Result<Credential, VaultError> {
        let crypto = |message: String| VaultError::Crypto { message };
        let bytes = BASE64.decode(record).map_err(|e| crypto(e.to_string()))?;
        if bytes.len() <= NONCE_LEN {
            return Err(crypto("record too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce_bytes: [u8; NONCE_LEN] = nonce_bytes
            .try_into()
            .map_err(|_| crypto("invalid nonce length".to_string()))?;
        let plaintext = self
            .cipher
            .decrypt(&Nonce::from(nonce_bytes), ciphertext)
            .map_err(|e| crypto(e.to_string()))?;
        let secret = String::from_utf8(plaintext).map_err(|e| crypto(e.to_string()))?;
        Credential::new(secret).ok_or_else(|| crypto("empty credential".to_string()))
    }

    /// Applies `change` to the in-memory map and rewrites the file. The change
    /// is rolled back if the write fails.
    async fn apply<T: Send>(
        &self,
        subscriber: SubscriberId,
        change: impl FnOnce(&DashMap<SubscriberId, Credential>) -> (T, Option<Credential>) + Send,
    ) -> Result<T, VaultError> {
        let _guard = self.write_lock.lock().await;
        let (result, previous) = change(&self.entries);
        if let Err(e) = self.persist().await {
            match previous {
                Some(old) => {
                    self.entries.insert(subscriber, old);
                }
                None => {
                    self.entries.remove(&subscriber);
                }
            }
            return Err(e);
        }
        Ok(result)
    }

    fn serialise(&self) -> Result<Vec<u8>, VaultError> {
        let mut records = BTreeMap::new();
        for entry in self.entries.iter() {
            records.insert(entry.key().to_string(), self.encrypt(entry.value())?);
        }
        serde_json::to_vec_pretty(&records).map_err(|e| VaultError::Storage {
            message: e.to_string(),
        })
    }

    async fn persist(&self) -> Result<(), VaultError> {
        let body = self.serialise()?;
        let path = self.path.clone();
        let written = tokio::task::spawn_blocking(move || match atomic_write_secure(&path, &body) {
            Ok(()) => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        })
        .await
        .map_err(|e| VaultError::Storage {
            message: format!("vault write task failed: {e}"),
        })?;
        written.map_err(VaultError::from)
    }
}

#[async_trait]
impl TokenVault for EncryptedFileVault {
    async fn get(&self, subscriber: SubscriberId) -> Result<Option<Credential>, VaultError> {
        Ok(self.entries.get(&subscriber).map(|entry| entry.value().clone()))
    }

    async fn put(&self, subscriber: SubscriberId, credential: Credential) -> Result<(), VaultError> {
        self.apply(subscriber, |entries| ((), entries.insert(subscriber, credential)))
            .await
    }

    async fn delete(&self, subscriber: SubscriberId) -> Result<bool, VaultError> {
        if !self.entries.contains_key(&subscriber) {
            return Ok(false);
        }
        self.apply(subscriber, |entries| {
            let removed = entries.remove(&subscriber).map(|(_, old)| old);
            (removed.is_some(), removed)
        })
        .await
    }
}
