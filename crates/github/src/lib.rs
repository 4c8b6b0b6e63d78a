//! repowatch GitHub source adapter.
//!
//! Implements [`tracking::SourceAdapter`] over the GitHub REST API with
//! `reqwest`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate holds no tracking rules. HTTP status
//! classification, `Link` header pagination and authentication are handled
//! here; the monitor sees only [`tracking::Page`]s and
//! [`tracking::SourceError`]s.
//!
//! ## Error mapping
//!
//! | Response | [`tracking::SourceError`] |
//! |---|---|
//! | 404, 410 | `NotFound` |
//! | 401, 403 without rate-limit signals | `AccessRevoked` |
//! | 403 with `x-ratelimit-remaining: 0` or `retry-after`, any 429 | `RateLimited` |
//! | other non-2xx, connection failures | `Transport` |
//! | undecodable body | `Decode` |
//!
//! ## Authentication
//!
//! The credential passed by the caller is used when present, then
//! [`GithubConfig::token`]. With neither, requests are anonymous and subject
//! to the unauthenticated rate limit.

mod client;
mod config;
mod errors;
mod links;
mod models;

pub use client::GithubSource;
pub use config::{GithubConfig, DEFAULT_API_BASE};
pub use errors::classify;
pub use links::Links;
