//! [`GithubSource`]: the REST implementation of [`SourceAdapter`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use tracking::{
    Credential, Issue, Page, PageToken, Release, RepoSnapshot, RepositoryKey, SourceAdapter,
    SourceError, Stargazer,
};

use crate::errors::{classify, transport};
use crate::models::{IssueDto, ReleaseDto, RepositoryDto, StargazerDto};
use crate::{GithubConfig, Links};

const JSON: &str = "application/vnd.github+json";
const STAR_JSON: &str = "application/vnd.github.star+json";
const API_VERSION_HEADER: &str = "x-github-api-version";
const API_VERSION: &str = "2022-11-28";
const MAX_PER_PAGE: u32 = 100;

/// GitHub REST client.
///
/// Page tokens are plain page numbers. Releases and issues are requested
/// newest first and walk forward through `rel="next"`. Stargazers are only
/// listed oldest first, so the newest page is the `rel="last"` one and older
/// pages are reached by counting down.
#[derive(Debug, Clone)]
pub struct GithubSource {
    http: reqwest::Client,
    config: GithubConfig,
}

struct Response<T> {
    body: T,
    links: Links,
}

impl GithubSource {
    /// Builds a client from configuration.
    pub fn new(config: GithubConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, config })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &GithubConfig {
        &self.config
    }

    fn per_page(&self) -> u32 {
        self.config.per_page.clamp(1, MAX_PER_PAGE)
    }

    fn url(&self, key: &RepositoryKey, path: &str) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{base}/repos/{}/{}{path}", key.owner(), key.name())
    }

    async fn get<T: DeserializeOwned>(
        &self,
        key: &RepositoryKey,
        url: &str,
        accept: &str,
        query: &[(&str, String)],
        credential: Option<&Credential>,
    ) -> Result<Response<T>, SourceError> {
        let mut request = self
            .http
            .get(url)
            .header(ACCEPT, accept)
            .header(API_VERSION_HEADER, API_VERSION)
            .query(query);
        let token = credential
            .map(Credential::expose)
            .or(self.config.token.as_deref());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let headers: HeaderMap = response.headers().clone();
        debug!(%status, url, authenticated = token.is_some(), "GitHub response");
        if !status.is_success() {
            return Err(classify(
                status,
                &headers,
                key,
                chrono::Utc::now().timestamp(),
            ));
        }

        let bytes = response.bytes().await.map_err(transport)?;
        let body = serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode {
            message: format!("{url}: {e}"),
        })?;
        Ok(Response {
            body,
            links: Links::from_headers(&headers),
        })
    }

    /// Fetches a newest-first listing at the given page.
    async fn newest_first<T: DeserializeOwned>(
        &self,
        key: &RepositoryKey,
        path: &str,
        extra: &[(&str, &str)],
        credential: Option<&Credential>,
        page: Option<&PageToken>,
    ) -> Result<(Vec<T>, Option<PageToken>), SourceError> {
        let number = page_number(page)?;
        let mut query = vec![
            ("per_page", self.per_page().to_string()),
            ("page", number.to_string()),
        ];
        query.extend(extra.iter().map(|(k, v)| (*k, v.to_string())));
        let response = self
            .get::<Vec<T>>(key, &self.url(key, path), JSON, &query, credential)
            .await?;
        let next = response
            .links
            .next
            .filter(|n| *n > number)
            .map(|n| PageToken::new(n.to_string()));
        Ok((response.body, next))
    }
}

fn page_number(page: Option<&PageToken>) -> Result<u32, SourceError> {
    match page {
        None => Ok(1),
        Some(token) => match token.as_str().parse::<u32>() {
            Ok(n) if n >= 1 => Ok(n),
            _ => Err(SourceError::Decode {
                message: format!("invalid page token '{}'", token.as_str()),
            }),
        },
    }
}

fn previous_page(number: u32) -> Option<PageToken> {
    (number > 1).then(|| PageToken::new((number - 1).to_string()))
}

#[async_trait]
impl SourceAdapter for GithubSource {
    #[instrument(skip_all, fields(%key))]
    async fn fetch_repository(
        &self,
        key: &RepositoryKey,
        credential: Option<&Credential>,
    ) -> Result<RepoSnapshot, SourceError> {
        let response = self
            .get::<RepositoryDto>(key, &self.url(key, ""), JSON, &[], credential)
            .await?;
        Ok(response.body.into_snapshot(key))
    }

    #[instrument(skip_all, fields(%key))]
    async fn fetch_releases(
        &self,
        key: &RepositoryKey,
        credential: Option<&Credential>,
        page: Option<&PageToken>,
    ) -> Result<Page<Release>, SourceError> {
        let (dtos, next) = self
            .newest_first::<ReleaseDto>(key, "/releases", &[], credential, page)
            .await?;
        Ok(Page {
            items: dtos.into_iter().filter_map(ReleaseDto::into_release).collect(),
            next,
        })
    }

    #[instrument(skip_all, fields(%key))]
    async fn fetch_issues(
        &self,
        key: &RepositoryKey,
        credential: Option<&Credential>,
        page: Option<&PageToken>,
    ) -> Result<Page<Issue>, SourceError> {
        let filters = [("state", "all"), ("sort", "created"), ("direction", "desc")];
        let (dtos, next) = self
            .newest_first::<IssueDto>(key, "/issues", &filters, credential, page)
            .await?;
        Ok(Page {
            items: dtos.into_iter().filter_map(IssueDto::into_issue).collect(),
            next,
        })
    }

    #[instrument(skip_all, fields(%key))]
    async fn fetch_starred(
        &self,
        key: &RepositoryKey,
        credential: Option<&Credential>,
        page: Option<&PageToken>,
    ) -> Result<Page<Stargazer>, SourceError> {
        let url = self.url(key, "/stargazers");
        let per_page = self.per_page().to_string();
        let query = |n: u32| vec![("per_page", per_page.clone()), ("page", n.to_string())];

        let (number, dtos) = match page {
            Some(_) => {
                let number = page_number(page)?;
                let response = self
                    .get::<Vec<StargazerDto>>(key, &url, STAR_JSON, &query(number), credential)
                    .await?;
                (number, response.body)
            }
            None => {
                let first = self
                    .get::<Vec<StargazerDto>>(key, &url, STAR_JSON, &query(1), credential)
                    .await?;
                match first.links.last.filter(|last| *last > 1) {
                    Some(last) => {
                        let response = self
                            .get::<Vec<StargazerDto>>(
                                key,
                                &url,
                                STAR_JSON,
                                &query(last),
                                credential,
                            )
                            .await?;
                        (last, response.body)
                    }
                    None => (1, first.body),
                }
            }
        };

        Ok(Page {
            items: dtos.into_iter().map(StargazerDto::into_stargazer).collect(),
            next: previous_page(number),
        })
    }
}
