//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! a [`SubscriberId`] with a [`ChatId`] even though both are `i64` under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ParseError;

// ---------------------------------------------------------------------------
// Macro for integer-wrapped newtypes (platform-assigned integers).
// Generates: struct (Copy), new(), get(), Display.
// ---------------------------------------------------------------------------
macro_rules! int_id {
    (
        $(#[$attr:meta])*
        $name:ident($inner:ty)
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Creates a new identifier from a raw integer.
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the underlying integer value.
            pub fn get(self) -> $inner {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: chat-platform integers
// ---------------------------------------------------------------------------

int_id! {
    /// Identifies the chat user who registered a tracking.
    ///
    /// Also used as the chat id of that user's private conversation with the bot.
    SubscriberId(i64)
}

int_id! {
    /// Identifies a chat (channel, group, or supergroup) on the chat platform.
    ChatId(i64)
}

int_id! {
    /// Identifies a topic thread inside a forum-enabled group.
    ThreadId(i32)
}

// ---------------------------------------------------------------------------
// Identifiers: source-host integers
// ---------------------------------------------------------------------------

int_id! {
    /// Identifies a release on the source host.
    ReleaseId(u64)
}

int_id! {
    /// The per-repository issue number (`#42`).
    IssueNumber(u64)
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies one monitor tick.
///
/// Generated fresh for every tick; recorded on the tick span so all activity
/// from a single polling pass can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickId(Uuid);

impl TickId {
    /// Generates a new random tick identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for TickId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Repository key
// ---------------------------------------------------------------------------

/// Canonical `(owner, name)` pair identifying a hosted repository.
///
/// Both components are lowercased on construction so `Rust-Lang/Rust` and
/// `rust-lang/rust` refer to the same tracking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepositoryKey {
    owner: String,
    name: String,
}

impl RepositoryKey {
    /// Creates a normalised key, rejecting empty or malformed components.
    pub fn new(owner: &str, name: &str) -> Result<Self, ParseError> {
        let owner = normalise_component(owner)?;
        let name = normalise_component(name.trim().trim_end_matches(".git"))?;
        Ok(Self { owner, name })
    }

    /// Parses a repository reference.
    ///
    /// Accepts `owner/name`, `github.com/owner/name`, and full
    /// `https://github.com/owner/name[/anything]` URLs, with an optional
    /// `.git` suffix.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let trimmed = input.trim();
        let without_scheme = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed);
        let path = without_scheme
            .strip_prefix("www.github.com/")
            .or_else(|| without_scheme.strip_prefix("github.com/"))
            .unwrap_or(without_scheme);

        let mut parts = path.trim_matches('/').split('/');
        match (parts.next(), parts.next()) {
            (Some(owner), Some(name)) => Self::new(owner, name),
            _ => Err(ParseError::InvalidRepository {
                input: input.to_string(),
            }),
        }
    }

    /// Returns the owner component.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the repository name component.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for RepositoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn normalise_component(raw: &str) -> Result<String, ParseError> {
    let value = raw.trim();
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(value.to_ascii_lowercase())
    } else {
        Err(ParseError::InvalidRepository {
            input: raw.to_string(),
        })
    }
}
