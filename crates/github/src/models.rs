//! Wire shapes of the GitHub REST responses the adapter reads, and their
//! conversion into domain items.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracking::{
    Issue, IssueNumber, Release, ReleaseId, RepoSnapshot, RepositoryKey, Stargazer, Timestamp,
};

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UserDto {
    pub login: String,
    pub html_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RepositoryDto {
    pub full_name: String,
    pub description: Option<String>,
    pub html_url: String,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub archived: bool,
}

impl RepositoryDto {
    /// Converts to a snapshot. The requested key is used if the returned
    /// name cannot be parsed.
    pub fn into_snapshot(self, requested: &RepositoryKey) -> RepoSnapshot {
        let key = RepositoryKey::parse(&self.full_name).unwrap_or_else(|_| requested.clone());
        RepoSnapshot {
            key,
            description: self.description.filter(|d| !d.trim().is_empty()),
            html_url: self.html_url,
            stargazers: self.stargazers_count,
            archived: self.archived,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ReleaseDto {
    pub id: u64,
    pub tag_name: String,
    pub name: Option<String>,
    pub html_url: String,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
}

impl ReleaseDto {
    /// Drafts and unpublished releases have no position and are skipped.
    pub fn into_release(self) -> Option<Release> {
        if self.draft {
            return None;
        }
        Some(Release {
            id: ReleaseId::new(self.id),
            name: self.name.filter(|n| !n.trim().is_empty()),
            tag_name: self.tag_name,
            html_url: self.html_url,
            published_at: Timestamp::from_utc(self.published_at?),
            prerelease: self.prerelease,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct IssueDto {
    pub number: u64,
    pub title: String,
    pub user: Option<UserDto>,
    pub html_url: String,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Present when the "issue" is a pull request.
    pub pull_request: Option<serde_json::Value>,
}

impl IssueDto {
    /// Pull requests share the issues endpoint and are skipped.
    pub fn into_issue(self) -> Option<Issue> {
        if self.pull_request.is_some() {
            return None;
        }
        let (author, author_url) = match self.user {
            Some(user) => (user.login, Some(user.html_url)),
            None => ("ghost".to_string(), None),
        };
        Some(Issue {
            number: IssueNumber::new(self.number),
            title: self.title,
            author,
            author_url,
            html_url: self.html_url,
            body: self.body.filter(|b| !b.trim().is_empty()),
            created_at: Timestamp::from_utc(self.created_at),
        })
    }
}

/// Stargazer entry as returned with `application/vnd.github.star+json`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StargazerDto {
    pub starred_at: DateTime<Utc>,
    pub user: UserDto,
}

impl StargazerDto {
    pub fn into_stargazer(self) -> Stargazer {
        Stargazer {
            login: self.user.login,
            html_url: self.user.html_url,
            starred_at: Timestamp::from_utc(self.starred_at),
        }
    }
}
