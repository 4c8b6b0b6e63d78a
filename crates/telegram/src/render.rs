//! Rendering of [`Notification`]s into Telegram HTML.
//!
//! Only the tags Telegram's HTML parse mode accepts are emitted. Every
//! host-provided string goes through [`escape`].

use tracking::{
    ChangeItem, Destination, Issue, Notification, Release, RepositoryKey, Stargazer,
    UntrackReason,
};

/// Issue bodies longer than this many characters are cut.
pub const ISSUE_BODY_LIMIT: usize = 300;

/// Escapes text for Telegram HTML (`&`, `<`, `>` and `"`).
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

/// Renders a notification as an HTML message body.
pub fn render(notification: &Notification) -> String {
    match notification {
        Notification::Change { repository, item } => match item {
            ChangeItem::Release(release) => render_release(repository, release),
            ChangeItem::Issue(issue) => render_issue(repository, issue),
            ChangeItem::Starred(stargazer) => render_star(repository, stargazer),
        },
        Notification::Untracked { repository, reason } => {
            let why = match reason {
                UntrackReason::RepositoryNotFound => "the repository no longer exists",
                UntrackReason::AccessRevoked => "access to the repository was revoked",
            };
            format!(
                "⚠️ Stopped tracking <b>{}</b>: {why}.\nUse /track to register it again.",
                escape(&repository.to_string())
            )
        }
        Notification::DestinationPruned {
            repository,
            destination,
        } => format!(
            "⚠️ Updates for <b>{}</b> are no longer posted to <code>{}</code>: the bot cannot post there anymore.",
            escape(&repository.to_string()),
            escape(&describe(destination))
        ),
    }
}

fn repository_link(repository: &RepositoryKey) -> String {
    format!(
        "<a href=\"https://github.com/{0}\">{0}</a>",
        escape(&repository.to_string())
    )
}

fn render_release(repository: &RepositoryKey, release: &Release) -> String {
    let mut text = format!(
        "🚀 <b>New release</b> in {}\n\n🏷️ Version: <b>{}</b>",
        repository_link(repository),
        escape(&release.tag_name)
    );
    if let Some(name) = release.name.as_deref().filter(|n| *n != release.tag_name) {
        text.push_str(&format!("\n📦 {}", escape(name)));
    }
    if release.prerelease {
        text.push_str(" (pre-release)");
    }
    text.push_str(&format!(
        "\n📅 Published: {}\n\n<a href=\"{}\">View release</a>",
        release.published_at.as_datetime().format("%Y-%m-%d"),
        escape(&release.html_url)
    ));
    text
}

fn render_issue(repository: &RepositoryKey, issue: &Issue) -> String {
    let author = match &issue.author_url {
        Some(url) => format!("<a href=\"{}\">{}</a>", escape(url), escape(&issue.author)),
        None => escape(&issue.author),
    };
    let body = issue
        .body
        .as_deref()
        .map(|b| truncate(b, ISSUE_BODY_LIMIT))
        .unwrap_or_else(|| "No description provided.".to_string());
    format!(
        "🪲 {author} opened issue <code>{}#{}</code>\n\n<blockquote expandable>Title: {}\n{}</blockquote>\n\n🔗 <a href=\"{}\">View issue</a>",
        escape(&repository.to_string()),
        issue.number,
        escape(&issue.title),
        escape(&body),
        escape(&issue.html_url)
    )
}

fn render_star(repository: &RepositoryKey, stargazer: &Stargazer) -> String {
    format!(
        "⭐ <a href=\"{}\">{}</a> starred {}",
        escape(&stargazer.html_url),
        escape(&stargazer.login),
        repository_link(repository)
    )
}

fn describe(destination: &Destination) -> String {
    match destination {
        Destination::DirectMessage { .. } => "your private chat".to_string(),
        Destination::Channel { chat } | Destination::Group { chat } => chat.to_string(),
        Destination::ForumTopic { chat, thread } => format!("{chat}/{thread}"),
    }
}

/// Cuts `text` to at most `limit` characters, marking the cut with `...`.
fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use tracking::{ChatId, IssueNumber, ReleaseId, Timestamp};

    use super::*;

    fn repo() -> RepositoryKey {
        RepositoryKey::new("acme", "widgets").unwrap()
    }

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_unix_seconds(secs).unwrap()
    }

    #[test]
    fn test_escape_html_specials() {
        assert_eq!(escape("a<b> & \"c\""), "a&lt;b&gt; &amp; &quot;c&quot;");
    }

    #[test]
    fn test_release_message() {
        let text = render(&Notification::Change {
            repository: repo(),
            item: ChangeItem::Release(Release {
                id: ReleaseId::new(1),
                tag_name: "v2.0.0".to_string(),
                name: Some("Big <one>".to_string()),
                html_url: "https://github.com/acme/widgets/releases/tag/v2.0.0".to_string(),
                published_at: ts(1_700_000_000),
                prerelease: false,
            }),
        });
        assert!(text.contains("<b>v2.0.0</b>"));
        assert!(text.contains("Big &lt;one&gt;"));
        assert!(text.contains("2023-11-14"));
        assert!(text.contains("href=\"https://github.com/acme/widgets\""));
    }

    #[test]
    fn test_issue_body_is_truncated() {
        let text = render(&Notification::Change {
            repository: repo(),
            item: ChangeItem::Issue(Issue {
                number: IssueNumber::new(42),
                title: "Crash".to_string(),
                author: "qa".to_string(),
                author_url: None,
                html_url: "https://github.com/acme/widgets/issues/42".to_string(),
                body: Some("é".repeat(400)),
                created_at: ts(0),
            }),
        });
        assert!(text.contains("<code>acme/widgets#42</code>"));
        assert!(text.contains(&format!("{}...", "é".repeat(300))));
        assert!(!text.contains(&"é".repeat(301)));
    }

    #[test]
    fn test_untrack_and_prune_notices() {
        let untracked = render(&Notification::Untracked {
            repository: repo(),
            reason: UntrackReason::RepositoryNotFound,
        });
        assert!(untracked.contains("no longer exists"));

        let pruned = render(&Notification::DestinationPruned {
            repository: repo(),
            destination: Destination::Channel {
                chat: ChatId::new(-1001),
            },
        });
        assert!(pruned.contains("<code>-1001</code>"));
    }

    #[test]
    fn test_truncate_short_text_is_unchanged() {
        assert_eq!(truncate("short", 300), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
