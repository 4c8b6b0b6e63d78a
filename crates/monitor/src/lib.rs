//! repowatch polling monitor and notification dispatcher.
//!
//! This crate drives the tracking domain: it decides which repositories to
//! fetch, when, and with which credential, and routes the detected changes to
//! every registered destination.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The monitor sequences calls between the business
//! logic in the [`tracking`] crate and the port traits it defines (source
//! host, notification sender, vault). It contains no I/O of its own.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | [`MonitorConfig`] and its validation |
//! | [`monitor`] | [`Monitor::tick`] and the per-tick [`TickReport`] |
//! | [`dispatcher`] | Per-destination fan-out, failure counting and pruning |
//! | [`scheduler`] | The fixed-period tick loop |

pub mod config;
pub mod dispatcher;
pub mod monitor;
pub mod scheduler;

pub use config::{ConfigError, MonitorConfig};
pub use dispatcher::{DeliveryOutcome, DispatchReport, Dispatcher};
pub use monitor::{Monitor, RepositoryOutcome, TickReport};
pub use scheduler::Scheduler;
