//! Mapping of GitHub HTTP failures onto [`SourceError`].

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use tracking::{RepositoryKey, SourceError};

const RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Classifies a non-success response.
///
/// GitHub reports both exhausted rate limits and missing permissions as 403;
/// the rate-limit headers tell them apart. `now` is the current Unix time in
/// seconds, used to turn `x-ratelimit-reset` into a delay.
pub fn classify(
    status: StatusCode,
    headers: &HeaderMap,
    repository: &RepositoryKey,
    now: i64,
) -> SourceError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => SourceError::NotFound {
            repository: repository.clone(),
        },
        StatusCode::UNAUTHORIZED => SourceError::AccessRevoked {
            repository: repository.clone(),
        },
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = retry_after(headers);
            let exhausted = header_str(headers, RATELIMIT_REMAINING) == Some("0");
            if exhausted || retry_after.is_some() || status == StatusCode::TOO_MANY_REQUESTS {
                SourceError::RateLimited {
                    retry_after: retry_after.or_else(|| reset_delay(headers, now)),
                }
            } else {
                SourceError::AccessRevoked {
                    repository: repository.clone(),
                }
            }
        }
        other => SourceError::Transport {
            message: format!("unexpected status {other} for {repository}"),
        },
    }
}

/// Wraps a request-level failure.
pub fn transport(error: reqwest::Error) -> SourceError {
    SourceError::Transport {
        message: error.to_string(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_str(headers, RETRY_AFTER.as_str())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn reset_delay(headers: &HeaderMap, now: i64) -> Option<Duration> {
    let reset: i64 = header_str(headers, RATELIMIT_RESET)?.trim().parse().ok()?;
    u64::try_from(reset - now).ok().map(Duration::from_secs)
}
