//! Core tracking domain for repowatch.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, and error type used by the monitor and the adapters. Infrastructure
//! crates implement the traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`RepositoryKey`, `SubscriberId`, `TickId`, etc.) |
//! | [`types`] | Shared value types (`Tracking`, `Destination`, `Marker`, `ChangeItem`, etc.) |
//! | [`errors`] | Error and retry-policy types |
//! | [`ports`] | Traits for the source host, notification sender, permission check and vault |
//! | [`registration`] | Parsing of track requests |
//! | [`store`] | [`TrackingStore`] |
//! | [`vault`] | [`InMemoryTokenVault`] |
//! | [`delta`] | Watermarks, item ordering and per-tracking change detection |
//! | [`codec`] | [`CallbackCodec`] for bounded inline-button payloads |

pub mod codec;
pub mod delta;
pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod registration;
pub mod store;
pub mod types;
pub mod vault;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use codec::{CallbackCodec, CodecConfig, NavigationState, NavigationView, GENERATION_LEN};
pub use delta::{Detection, FetchPlan};
pub use errors::{
    CodecError, ParseError, RetryPolicy, SendError, SourceError, TrackingError, VaultError,
};
pub use identifiers::{ChatId, IssueNumber, ReleaseId, RepositoryKey, SubscriberId, ThreadId, TickId};
pub use ports::{NotificationSender, PermissionValidator, SourceAdapter, TokenVault};
pub use registration::{parse_destination, parse_event_types, TrackRequest, DEFAULT_EVENT_TYPES};
pub use store::{TrackingStore, UpsertOutcome};
pub use types::{
    ChangeBundle, ChangeItem, Credential, Destination, EventType, Issue, ItemPosition, Marker,
    Notification, Page, PageToken, Release, RepoSnapshot, Stargazer, Timestamp, Tracking,
    UntrackReason,
};
pub use vault::InMemoryTokenVault;
