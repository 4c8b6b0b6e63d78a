//! Tracking registration requests.
//!
//! The command layer hands the text after `/track` to [`TrackRequest::parse`]:
//!
//! ```text
//! owner/repo
//! owner/repo [releases,issues]
//! https://github.com/owner/repo [issues] > -1001234567890
//! owner/repo [releases] > -1001234567890/42
//! ```
//!
//! The destination override is resolved into a [`Destination`] here, once;
//! nothing downstream parses chat ids again.

use crate::{ChatId, Destination, EventType, ParseError, RepositoryKey, SubscriberId, ThreadId};

/// Event types tracked when the request does not list any.
pub const DEFAULT_EVENT_TYPES: [EventType; 1] = [EventType::Release];

/// A validated request to track a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRequest {
    /// Repository to watch.
    pub repository: RepositoryKey,
    /// Subscriber making the request.
    pub subscriber: SubscriberId,
    /// Where notifications for this request go.
    pub destination: Destination,
    /// Requested event types, sorted and de-duplicated.
    pub event_types: Vec<EventType>,
}

impl TrackRequest {
    /// Builds a request, normalising the event type list.
    pub fn new(
        repository: RepositoryKey,
        subscriber: SubscriberId,
        destination: Destination,
        event_types: impl IntoIterator<Item = EventType>,
    ) -> Self {
        Self {
            repository,
            subscriber,
            destination,
            event_types: normalise_event_types(event_types),
        }
    }

    /// Parses the argument text of a track command issued by `subscriber`.
    pub fn parse(subscriber: SubscriberId, text: &str) -> Result<Self, ParseError> {
        let (target, destination) = match text.split_once('>') {
            Some((target, dest)) => (target, parse_destination(dest)?),
            None => (text, Destination::DirectMessage { subscriber }),
        };

        let (repo_part, types_part) = match target.find('[') {
            Some(open) => {
                let close = target[open..]
                    .find(']')
                    .map(|i| open + i)
                    .ok_or_else(|| ParseError::UnknownEventType {
                        name: target[open..].trim().to_string(),
                    })?;
                (&target[..open], Some(&target[open + 1..close]))
            }
            None => (target, None),
        };

        let repo_part = repo_part.trim();
        if repo_part.is_empty() {
            return Err(ParseError::MissingRepository);
        }
        let repository = RepositoryKey::parse(repo_part)?;

        let event_types = match types_part {
            Some(list) => parse_event_types(list)?,
            None => DEFAULT_EVENT_TYPES.to_vec(),
        };

        Ok(Self::new(repository, subscriber, destination, event_types))
    }
}

/// Parses a comma-separated event type list.
pub fn parse_event_types(list: &str) -> Result<Vec<EventType>, ParseError> {
    let mut types = Vec::new();
    for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let event_type = EventType::from_name(name).ok_or_else(|| ParseError::UnknownEventType {
            name: name.to_string(),
        })?;
        types.push(event_type);
    }
    if types.is_empty() {
        return Err(ParseError::NoEventTypes);
    }
    Ok(normalise_event_types(types))
}

/// Resolves a `chat_id` or `chat_id/thread_id` override.
///
/// Telegram channel and supergroup ids carry a `-100` prefix; other negative
/// ids are basic groups and positive ids are private chats.
pub fn parse_destination(input: &str) -> Result<Destination, ParseError> {
    let trimmed = input.trim();
    let invalid = || ParseError::InvalidDestination {
        input: trimmed.to_string(),
    };

    let (chat_part, thread_part) = match trimmed.split_once('/') {
        Some((chat, thread)) => (chat.trim(), Some(thread.trim())),
        None => (trimmed, None),
    };
    let chat: i64 = chat_part.parse().map_err(|_| invalid())?;
    if chat == 0 {
        return Err(invalid());
    }

    if let Some(thread) = thread_part {
        let thread: i32 = thread.parse().map_err(|_| invalid())?;
        if thread <= 0 {
            return Err(invalid());
        }
        return Ok(Destination::ForumTopic {
            chat: ChatId::new(chat),
            thread: ThreadId::new(thread),
        });
    }

    if chat > 0 {
        return Ok(Destination::DirectMessage {
            subscriber: SubscriberId::new(chat),
        });
    }
    if chat_part.starts_with("-100") {
        Ok(Destination::Channel {
            chat: ChatId::new(chat),
        })
    } else {
        Ok(Destination::Group {
            chat: ChatId::new(chat),
        })
    }
}

pub(crate) fn normalise_event_types(types: impl IntoIterator<Item = EventType>) -> Vec<EventType> {
    let mut types: Vec<EventType> = types.into_iter().collect();
    types.sort();
    types.dedup();
    types
}

#[cfg(test)]
mod tests {
    use super::*;

    const ME: SubscriberId = SubscriberId::new(77);

    #[test]
    fn test_parse_defaults_to_releases_in_direct_message() {
        let request = TrackRequest::parse(ME, "tokio-rs/tokio").unwrap();
        assert_eq!(request.repository.to_string(), "tokio-rs/tokio");
        assert_eq!(request.event_types, vec![EventType::Release]);
        assert_eq!(request.destination, Destination::DirectMessage { subscriber: ME });
    }

    #[test]
    fn test_parse_event_type_list() {
        let request = TrackRequest::parse(ME, "o/r [issues, releases,issues]").unwrap();
        assert_eq!(request.event_types, vec![EventType::Release, EventType::Issue]);

        let err = TrackRequest::parse(ME, "o/r [commits]").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownEventType {
                name: "commits".to_string()
            }
        );
        assert_eq!(
            TrackRequest::parse(ME, "o/r [ ]").unwrap_err(),
            ParseError::NoEventTypes
        );
    }

    #[test]
    fn test_parse_channel_group_and_topic_destinations() {
        let channel = TrackRequest::parse(ME, "o/r [releases] > -1001234567890").unwrap();
        assert_eq!(
            channel.destination,
            Destination::Channel {
                chat: ChatId::new(-1001234567890)
            }
        );

        let group = TrackRequest::parse(ME, "o/r > -4567").unwrap();
        assert_eq!(group.destination, Destination::Group { chat: ChatId::new(-4567) });

        let topic = TrackRequest::parse(ME, "https://github.com/o/r [issues] > -1001234567890/123")
            .unwrap();
        assert_eq!(
            topic.destination,
            Destination::ForumTopic {
                chat: ChatId::new(-1001234567890),
                thread: ThreadId::new(123)
            }
        );
        assert_eq!(topic.event_types, vec![EventType::Issue]);
    }

    #[test]
    fn test_parse_rejects_bad_destinations() {
        for input in ["o/r > abc", "o/r > 0", "o/r > -100/x", "o/r > -100/0", "o/r > "] {
            assert!(
                matches!(
                    TrackRequest::parse(ME, input),
                    Err(ParseError::InvalidDestination { .. })
                ),
                "{input}"
            );
        }
    }

    #[test]
    fn test_parse_requires_repository() {
        assert_eq!(
            TrackRequest::parse(ME, "  [releases]").unwrap_err(),
            ParseError::MissingRepository
        );
        assert!(matches!(
            TrackRequest::parse(ME, "not-a-repo"),
            Err(ParseError::InvalidRepository { .. })
        ));
    }
}
