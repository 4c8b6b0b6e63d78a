//! Shared value types for the tracking domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (a tracking always has at least one
//! destination, markers only move forward) and participate in domain
//! computations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChatId, IssueNumber, ReleaseId, RepositoryKey, SubscriberId, ThreadId};

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Creates a [`Timestamp`] from whole seconds since the Unix epoch.
    ///
    /// Returns `None` if the value is out of range.
    pub fn from_unix_seconds(secs: i64) -> Option<Self> {
        DateTime::from_timestamp(secs, 0).map(Self)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A kind of repository change a subscriber can track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A new published release.
    Release,
    /// A newly opened issue.
    Issue,
    /// Someone starred the repository.
    Starred,
}

impl EventType {
    /// Every event type, in canonical order.
    pub const ALL: [EventType; 3] = [EventType::Release, EventType::Issue, EventType::Starred];

    /// Parses a user-supplied event type name (`releases`, `issue`, `stars`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "release" | "releases" => Some(Self::Release),
            "issue" | "issues" => Some(Self::Issue),
            "star" | "stars" | "starred" | "stargazers" => Some(Self::Starred),
            _ => None,
        }
    }

    /// Returns the plural display name used in user-facing text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Release => "releases",
            Self::Issue => "issues",
            Self::Starred => "stars",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Destinations
// ---------------------------------------------------------------------------

/// Target for a notification.
///
/// Resolved once at registration time; downstream code never re-parses
/// destination strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Destination {
    /// The subscriber's private chat with the bot.
    DirectMessage {
        /// Subscriber to message.
        subscriber: SubscriberId,
    },
    /// A broadcast channel (or supergroup) the bot can post in.
    Channel {
        /// Target chat.
        chat: ChatId,
    },
    /// A basic group chat.
    Group {
        /// Target chat.
        chat: ChatId,
    },
    /// A specific topic thread within a forum-enabled group.
    ForumTopic {
        /// Target chat.
        chat: ChatId,
        /// Topic thread inside the chat.
        thread: ThreadId,
    },
}

impl Destination {
    /// Returns the raw chat id messages for this destination are sent to.
    pub fn chat_id(self) -> i64 {
        match self {
            Self::DirectMessage { subscriber } => subscriber.get(),
            Self::Channel { chat } | Self::Group { chat } | Self::ForumTopic { chat, .. } => {
                chat.get()
            }
        }
    }

    /// Returns the topic thread, if the destination is a forum topic.
    pub fn thread_id(self) -> Option<ThreadId> {
        match self {
            Self::ForumTopic { thread, .. } => Some(thread),
            _ => None,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DirectMessage { subscriber } => write!(f, "dm:{subscriber}"),
            Self::Channel { chat } => write!(f, "channel:{chat}"),
            Self::Group { chat } => write!(f, "group:{chat}"),
            Self::ForumTopic { chat, thread } => write!(f, "topic:{chat}/{thread}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Opaque per-subscriber secret used to authenticate source-host requests.
///
/// The `Debug` implementation never prints the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wraps a secret, returning `None` if it is empty or whitespace.
    pub fn new(secret: impl Into<String>) -> Option<Self> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            None
        } else {
            Some(Self(secret.trim().to_string()))
        }
    }

    /// Returns the secret. Callers must not log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Source items
// ---------------------------------------------------------------------------

/// A published release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Host-assigned release id.
    pub id: ReleaseId,
    /// Git tag the release points at (e.g. `"v1.2.0"`).
    pub tag_name: String,
    /// Human-readable release title, if set.
    pub name: Option<String>,
    /// Link to the release page.
    pub html_url: String,
    /// When the release was published.
    pub published_at: Timestamp,
    /// Whether the release is flagged as a pre-release.
    pub prerelease: bool,
}

/// An opened issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Per-repository issue number.
    pub number: IssueNumber,
    /// Issue title.
    pub title: String,
    /// Login of the author.
    pub author: String,
    /// Link to the author's profile.
    pub author_url: Option<String>,
    /// Link to the issue page.
    pub html_url: String,
    /// Issue body, if any.
    pub body: Option<String>,
    /// When the issue was opened.
    pub created_at: Timestamp,
}

/// A user who starred the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stargazer {
    /// Login of the user.
    pub login: String,
    /// Link to the user's profile.
    pub html_url: String,
    /// When the star was added.
    pub starred_at: Timestamp,
}

/// Totally ordered position of an item within its event type.
///
/// Positions of different event types are never compared with each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemPosition {
    /// Release publish order, ties broken by id.
    Release {
        /// Publish time.
        published_at: Timestamp,
        /// Release id.
        id: ReleaseId,
    },
    /// Issue number order.
    Issue {
        /// Issue number.
        number: IssueNumber,
    },
    /// Star timestamp order, ties broken by login.
    Starred {
        /// Star time.
        starred_at: Timestamp,
        /// Stargazer login.
        login: String,
    },
}

/// One fetched item of any event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeItem {
    /// A release.
    Release(Release),
    /// An issue.
    Issue(Issue),
    /// A stargazer.
    Starred(Stargazer),
}

impl ChangeItem {
    /// Returns the event type this item belongs to.
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Release(_) => EventType::Release,
            Self::Issue(_) => EventType::Issue,
            Self::Starred(_) => EventType::Starred,
        }
    }

    /// Returns the item's position in its type-specific order.
    pub fn position(&self) -> ItemPosition {
        match self {
            Self::Release(r) => ItemPosition::Release {
                published_at: r.published_at,
                id: r.id,
            },
            Self::Issue(i) => ItemPosition::Issue { number: i.number },
            Self::Starred(s) => ItemPosition::Starred {
                starred_at: s.starred_at,
                login: s.login.clone(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Markers
// ---------------------------------------------------------------------------

/// Last-seen position for one event type of one tracking.
///
/// `position == None` records that the repository was observed with no items
/// of this type; it sorts below every real position so the first item ever
/// published is delivered.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Marker {
    /// Position of the newest item seen, if any.
    pub position: Option<ItemPosition>,
}

impl Marker {
    /// Marker for a repository observed with no items.
    pub fn empty() -> Self {
        Self { position: None }
    }

    /// Marker at the given item position.
    pub fn at(position: ItemPosition) -> Self {
        Self {
            position: Some(position),
        }
    }

    /// Returns `true` if an item at `position` is newer than this marker.
    pub fn is_behind(&self, position: &ItemPosition) -> bool {
        match &self.position {
            None => true,
            Some(seen) => position > seen,
        }
    }
}

// ---------------------------------------------------------------------------
// Tracking
// ---------------------------------------------------------------------------

/// One subscriber's registered interest in one repository.
///
/// Invariants: `destinations` is non-empty and duplicate-free in insertion
/// order; `event_types` is non-empty; `markers` only holds tracked types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracking {
    /// Repository being watched.
    pub repository: RepositoryKey,
    /// Subscriber who registered the tracking.
    pub subscriber: SubscriberId,
    /// Where notifications are delivered, in registration order.
    pub destinations: Vec<Destination>,
    /// Event types the subscriber is interested in, in canonical order.
    pub event_types: Vec<EventType>,
    /// Last-seen marker per event type. Absent means "never observed".
    #[serde(default)]
    pub markers: BTreeMap<EventType, Marker>,
}

impl Tracking {
    /// Returns `true` if this tracking includes `event_type`.
    pub fn tracks(&self, event_type: EventType) -> bool {
        self.event_types.contains(&event_type)
    }

    /// Returns this tracking's marker for `event_type`, if established.
    pub fn marker(&self, event_type: EventType) -> Option<&Marker> {
        self.markers.get(&event_type)
    }
}

/// Metadata about a repository as returned by the source host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSnapshot {
    /// Canonical key of the repository.
    pub key: RepositoryKey,
    /// Short description, if any.
    pub description: Option<String>,
    /// Link to the repository page.
    pub html_url: String,
    /// Star count at fetch time.
    pub stargazers: u64,
    /// Whether the repository is archived.
    pub archived: bool,
}

/// One page of items from the source host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page, in whatever order the host returned them.
    pub items: Vec<T>,
    /// Opaque token for the next (older) page, if any.
    pub next: Option<PageToken>,
}

/// Opaque continuation token for paginated source requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageToken(String);

impl PageToken {
    /// Wraps a raw token.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Change events and notifications
// ---------------------------------------------------------------------------

/// The unit of work handed from the monitor to the dispatcher: the new items
/// of one event type for one tracking, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBundle {
    /// Repository the items belong to.
    pub repository: RepositoryKey,
    /// Subscriber whose tracking produced this bundle.
    pub subscriber: SubscriberId,
    /// Event type of every item in the bundle.
    pub event_type: EventType,
    /// New items in ascending position order.
    pub items: Vec<ChangeItem>,
    /// Marker the tracking advances to once the bundle has been dispatched.
    pub marker: Marker,
}

/// Why a tracking was removed automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UntrackReason {
    /// The repository no longer exists or was renamed.
    RepositoryNotFound,
    /// The credential in use lost access to the repository.
    AccessRevoked,
}

/// Content handed to a notification sender.
///
/// Rendering into platform markup is the sender's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A new release, issue, or star.
    Change {
        /// Repository the item belongs to.
        repository: RepositoryKey,
        /// The new item.
        item: ChangeItem,
    },
    /// A tracking was removed because the repository became unreachable.
    Untracked {
        /// Repository that was untracked.
        repository: RepositoryKey,
        /// Why it was untracked.
        reason: UntrackReason,
    },
    /// A destination stopped accepting messages and was removed from a tracking.
    DestinationPruned {
        /// Repository of the affected tracking.
        repository: RepositoryKey,
        /// The destination that was removed.
        destination: Destination,
    },
}
