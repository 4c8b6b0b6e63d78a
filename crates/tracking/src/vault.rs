//! In-memory [`TokenVault`].

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{Credential, SubscriberId, TokenVault, VaultError};

/// Process-local credential store.
///
/// Each entry is replaced as a whole under its shard lock, so readers see
/// either the previous or the new credential, never a mix.
#[derive(Debug, Default)]
pub struct InMemoryTokenVault {
    entries: DashMap<SubscriberId, Credential>,
}

impl InMemoryTokenVault {
    /// Creates an empty vault.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a vault pre-populated with `entries`.
    pub fn with_entries(entries: impl IntoIterator<Item = (SubscriberId, Credential)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Returns the number of stored credentials.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no credentials are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TokenVault for InMemoryTokenVault {
    async fn get(&self, subscriber: SubscriberId) -> Result<Option<Credential>, VaultError> {
        Ok(self.entries.get(&subscriber).map(|entry| entry.value().clone()))
    }

    async fn put(&self, subscriber: SubscriberId, credential: Credential) -> Result<(), VaultError> {
        self.entries.insert(subscriber, credential);
        Ok(())
    }

    async fn delete(&self, subscriber: SubscriberId) -> Result<bool, VaultError> {
        Ok(self.entries.remove(&subscriber).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let vault = InMemoryTokenVault::new();
        let alice = SubscriberId::new(1);

        assert_eq!(vault.get(alice).await.unwrap(), None);

        vault.put(alice, Credential::new("first").unwrap()).await.unwrap();
        vault.put(alice, Credential::new("second").unwrap()).await.unwrap();
        assert_eq!(
            vault.get(alice).await.unwrap(),
            Some(Credential::new("second").unwrap())
        );
        assert_eq!(vault.len(), 1);

        assert!(vault.delete(alice).await.unwrap());
        assert!(!vault.delete(alice).await.unwrap());
        assert!(vault.is_empty());
    }
}
