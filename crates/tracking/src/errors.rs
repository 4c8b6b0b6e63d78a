//! Error and retry-policy types for the tracking domain.
//!
//! Each component surfaces its own error enum. [`RetryPolicy`] is a
//! cross-cutting concern: any error type that participates in retry decisions
//! must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Destination, EventType, RepositoryKey};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// ## Rules
///
/// - `Retryable` errors: timeouts, rate limits, transport failures. The next
///   monitor tick retries them from the same marker.
/// - `NonRetryable` errors: not found, revoked access, permanently invalid
///   destinations. These are counted and eventually become terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means retry on the
        /// caller's own schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried as-is.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Errors produced while parsing a tracking registration request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The repository reference is not `owner/name` or a repository URL.
    #[error("Invalid repository reference: '{input}'")]
    InvalidRepository {
        /// The rejected input.
        input: String,
    },

    /// An event type name is not recognised.
    #[error("Unknown event type: '{name}'")]
    UnknownEventType {
        /// The rejected name.
        name: String,
    },

    /// The bracketed event type list was empty.
    #[error("At least one event type is required")]
    NoEventTypes,

    /// The destination override is not `chat_id` or `chat_id/thread_id`.
    #[error("Invalid destination: '{input}'")]
    InvalidDestination {
        /// The rejected input.
        input: String,
    },

    /// The request text was empty.
    #[error("Missing repository reference")]
    MissingRepository,
}

/// Errors returned by [`crate::TrackingStore`] mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackingError {
    /// The permission check rejected the destination. User-visible.
    #[error("Cannot post to destination {destination}")]
    InvalidDestination {
        /// The rejected destination.
        destination: Destination,
    },

    /// A tracking must include at least one event type.
    #[error("Tracking for {repository} has no event types")]
    NoEventTypes {
        /// Repository of the rejected request.
        repository: RepositoryKey,
    },
}

// ---------------------------------------------------------------------------
// Source adapter
// ---------------------------------------------------------------------------

/// Failures surfaced by a [`crate::SourceAdapter`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The host rejected the request because of rate limiting.
    #[error("Upstream rate limited{}", retry_suffix(.retry_after))]
    RateLimited {
        /// Delay advertised by the host, if any.
        retry_after: Option<Duration>,
    },

    /// The repository does not exist (or is invisible to the credential).
    #[error("Repository {repository} not found")]
    NotFound {
        /// Repository that was requested.
        repository: RepositoryKey,
    },

    /// The credential was rejected or lost access to the repository.
    #[error("Access to {repository} revoked")]
    AccessRevoked {
        /// Repository that was requested.
        repository: RepositoryKey,
    },

    /// The call did not complete within the configured timeout.
    #[error("Request for {repository} {event_type} timed out after {after:?}")]
    Timeout {
        /// Repository that was requested.
        repository: RepositoryKey,
        /// Event type being fetched.
        event_type: EventType,
        /// Timeout that elapsed.
        after: Duration,
    },

    /// Network or protocol failure.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The host returned a body that could not be decoded.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the failure.
        message: String,
    },
}

fn retry_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl SourceError {
    /// Returns the retry policy for this failure.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::RateLimited { retry_after } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            Self::Timeout { .. } | Self::Transport { .. } | Self::Decode { .. } => {
                RetryPolicy::Retryable { after: None }
            }
            Self::NotFound { .. } | Self::AccessRevoked { .. } => RetryPolicy::NonRetryable,
        }
    }

    /// Returns `true` for failures that count towards automatic untracking.
    pub fn counts_towards_untrack(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::AccessRevoked { .. })
    }
}

// ---------------------------------------------------------------------------
// Notification sender
// ---------------------------------------------------------------------------

/// Failures surfaced by a [`crate::NotificationSender`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The destination can never be delivered to as-is (bot removed, chat
    /// deleted, user blocked the bot).
    #[error("Destination permanently invalid: {reason}")]
    PermanentlyInvalid {
        /// Platform-provided description.
        reason: String,
    },

    /// The send may succeed later.
    #[error("Transient send failure: {reason}")]
    Transient {
        /// Platform-provided description.
        reason: String,
        /// Delay advertised by the platform, if any.
        retry_after: Option<Duration>,
    },
}

impl SendError {
    /// Returns the retry policy for this failure.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::PermanentlyInvalid { .. } => RetryPolicy::NonRetryable,
            Self::Transient { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Callback codec
// ---------------------------------------------------------------------------

/// Failures surfaced by [`crate::CallbackCodec`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The token is unknown: never issued, evicted, or issued before a restart.
    /// Callers present this as "session expired".
    #[error("Unknown or expired token: '{token}'")]
    UnknownOrExpiredToken {
        /// The token that missed.
        token: String,
    },

    /// The navigation state could not be serialised.
    #[error("Failed to serialise navigation state: {message}")]
    Serialize {
        /// Serializer message.
        message: String,
    },

    /// The codec configuration is inconsistent.
    #[error("Invalid codec configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// Failures surfaced by a [`crate::TokenVault`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    /// The backing store could not be read or written.
    #[error("Vault storage error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },

    /// A stored record could not be encrypted or decrypted.
    #[error("Vault crypto error: {message}")]
    Crypto {
        /// Description of the failure.
        message: String,
    },
}
