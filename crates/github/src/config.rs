//! GitHub adapter configuration.

use serde::{Deserialize, Serialize};

/// Default REST API root.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Settings for [`crate::GithubSource`], read from the `[github]` table.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// REST API root, without a trailing slash.
    pub api_base: String,
    /// `User-Agent` sent with every request. GitHub rejects requests without one.
    pub user_agent: String,
    /// Items requested per page (GitHub caps this at 100).
    pub per_page: u32,
    /// Token used when no subscriber credential is available.
    pub token: Option<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            user_agent: "repowatch".to_string(),
            per_page: 30,
            token: None,
        }
    }
}

impl std::fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubConfig")
            .field("api_base", &self.api_base)
            .field("user_agent", &self.user_agent)
            .field("per_page", &self.per_page)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
