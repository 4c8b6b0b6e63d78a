//! repowatch persistence.
//!
//! Two files survive restarts:
//!
//! - the tracking snapshot ([`TrackingSnapshot`]), pretty JSON written after
//!   every tick and every registration change;
//! - the credential vault ([`EncryptedFileVault`]), one AES-256-GCM record per
//!   subscriber, rewritten on every `put` and `delete`.
//!
//! Both are written with [`atomic_write`] so a crash leaves either the old or
//! the new file on disk, never a partial one.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Implements [`tracking::TokenVault`]. The tracking store
//! itself stays in memory; this crate only converts it to and from disk.

mod atomic;
mod errors;
mod snapshot;
mod vault;

pub use atomic::{atomic_write, atomic_write_secure};
pub use errors::StorageError;
pub use snapshot::{TrackingSnapshot, SNAPSHOT_VERSION};
pub use vault::{EncryptedFileVault, VaultKey};
