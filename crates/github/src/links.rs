//! `Link` header pagination.
//!
//! GitHub advertises neighbouring pages as
//! `<https://api.github.com/...&page=2>; rel="next", <...&page=5>; rel="last"`.
//! Only the page numbers are kept; the adapter rebuilds URLs itself.

/// Page numbers advertised by a `Link` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Links {
    /// The next (older) page.
    pub next: Option<u32>,
    /// The final page.
    pub last: Option<u32>,
}

impl Links {
    /// Parses a `Link` header value. Unknown relations and malformed entries
    /// are ignored.
    pub fn parse(header: &str) -> Self {
        let mut links = Self::default();
        for entry in header.split(',') {
            let mut parts = entry.split(';');
            let Some(target) = parts.next() else {
                continue;
            };
            let Some(page) = page_param(target.trim().trim_start_matches('<').trim_end_matches('>'))
            else {
                continue;
            };
            for param in parts {
                match param.trim().strip_prefix("rel=").map(|r| r.trim_matches('"')) {
                    Some("next") => links.next = Some(page),
                    Some("last") => links.last = Some(page),
                    _ => {}
                }
            }
        }
        links
    }

    /// Reads the `Link` header of a response.
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        headers
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .map(Self::parse)
            .unwrap_or_default()
    }
}

fn page_param(url: &str) -> Option<u32> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "page")
        .and_then(|(_, value)| value.parse().ok())
}
