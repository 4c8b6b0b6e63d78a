//! Port traits implemented by infrastructure crates.
//!
//! The monitor and dispatcher depend only on these traits. Concrete adapters
//! (`github`, `telegram`, `storage`) implement them; tests inject fakes.

use async_trait::async_trait;

use crate::{
    Credential, Destination, Issue, Notification, Page, PageToken, Release, RepoSnapshot,
    RepositoryKey, SendError, SourceError, Stargazer, SubscriberId, VaultError,
};

/// Read access to the source-hosting service.
///
/// Implementations must surface rate limiting and not-found conditions as the
/// distinct [`SourceError`] variants; the monitor's failure accounting relies
/// on it. Every method is a single network round trip (or a bounded few); the
/// monitor applies its own per-call timeout on top.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetches repository metadata.
    async fn fetch_repository(
        &self,
        key: &RepositoryKey,
        credential: Option<&Credential>,
    ) -> Result<RepoSnapshot, SourceError>;

    /// Fetches one page of releases, newest first. `page = None` is the newest page.
    async fn fetch_releases(
        &self,
        key: &RepositoryKey,
        credential: Option<&Credential>,
        page: Option<&PageToken>,
    ) -> Result<Page<Release>, SourceError>;

    /// Fetches one page of issues (pull requests excluded), newest first.
    async fn fetch_issues(
        &self,
        key: &RepositoryKey,
        credential: Option<&Credential>,
        page: Option<&PageToken>,
    ) -> Result<Page<Issue>, SourceError>;

    /// Fetches one page of stargazers with star timestamps, newest page first.
    async fn fetch_starred(
        &self,
        key: &RepositoryKey,
        credential: Option<&Credential>,
        page: Option<&PageToken>,
    ) -> Result<Page<Stargazer>, SourceError>;
}

/// Delivery of rendered notifications to chat destinations.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Sends one notification to one destination.
    ///
    /// Must return [`SendError::PermanentlyInvalid`] only when retrying can
    /// never succeed; every other failure is [`SendError::Transient`].
    async fn send(
        &self,
        destination: &Destination,
        notification: &Notification,
    ) -> Result<(), SendError>;
}

/// Pre-registration check that the bot is able to post to a destination.
#[async_trait]
pub trait PermissionValidator: Send + Sync {
    /// Returns `true` if notifications can be posted to `destination`.
    async fn can_post(&self, destination: &Destination) -> bool;
}

/// Per-subscriber credential storage.
///
/// One opaque blob per subscriber; no history. Concurrent `put`s for the same
/// subscriber are last-write-wins and a `get` never observes a torn value.
#[async_trait]
pub trait TokenVault: Send + Sync {
    /// Returns the subscriber's credential, if one is stored.
    async fn get(&self, subscriber: SubscriberId) -> Result<Option<Credential>, VaultError>;

    /// Stores (or replaces) the subscriber's credential.
    async fn put(&self, subscriber: SubscriberId, credential: Credential) -> Result<(), VaultError>;

    /// Removes the subscriber's credential. Returns `true` if one existed.
    async fn delete(&self, subscriber: SubscriberId) -> Result<bool, VaultError>;
}
