//! repowatch Telegram adapter.
//!
//! Implements [`tracking::NotificationSender`] and
//! [`tracking::PermissionValidator`] over the Telegram Bot API using
//! `teloxide`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Markup, message size limits and Bot API error codes
//! live here. The dispatcher only sees [`tracking::SendError`], split into
//! permanently invalid destinations and everything else.
//!
//! | Bot API failure | [`tracking::SendError`] |
//! |---|---|
//! | bot blocked, chat not found, bot kicked, user deactivated, cannot initiate conversation | `PermanentlyInvalid` |
//! | chat migrated to a supergroup | `PermanentlyInvalid` |
//! | flood control (`retry_after`) | `Transient` with delay |
//! | network and every other API error | `Transient` |

mod notifier;
pub mod render;

pub use notifier::{chunk_message, map_error, TelegramNotifier, MAX_MESSAGE_LENGTH};
