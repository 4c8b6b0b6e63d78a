//! In-process fakes shared by the monitor integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use monitor::{Dispatcher, Monitor, MonitorConfig};
use tracking::{
    ChangeItem, Credential, Destination, EventType, InMemoryTokenVault, Issue, IssueNumber,
    Notification, Page, PageToken, PermissionValidator, Release, ReleaseId, RepoSnapshot,
    RepositoryKey, SendError, SourceAdapter, SourceError, Stargazer, SubscriberId, Timestamp,
    TrackRequest, TrackingStore,
};

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct RepoState {
    pub releases: Vec<Release>,
    pub issues: Vec<Issue>,
    pub stargazers: Vec<Stargazer>,
    pub failure: Option<SourceError>,
    /// Credentials answered with access-revoked.
    pub rejected_credentials: Vec<String>,
    pub delay: Option<Duration>,
}

/// A fetch the fake source served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub repository: RepositoryKey,
    pub event_type: EventType,
    pub page: Option<String>,
    pub credential: Option<String>,
}

/// Serves repositories from memory, newest first, `per_page` items a page.
pub struct FakeSource {
    per_page: usize,
    repos: Mutex<HashMap<RepositoryKey, RepoState>>,
    calls: Mutex<Vec<FetchCall>>,
    in_flight: InFlight,
}

impl FakeSource {
    pub fn new(per_page: usize) -> Self {
        Self {
            per_page,
            repos: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: InFlight::default(),
        }
    }

    /// Most delayed fetches that were pending at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak()
    }

    pub fn update(&self, repository: &RepositoryKey, apply: impl FnOnce(&mut RepoState)) {
        let mut repos = self.repos.lock().unwrap();
        apply(repos.entry(repository.clone()).or_default());
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn serve<T: Clone>(
        &self,
        key: &RepositoryKey,
        event_type: EventType,
        credential: Option<&Credential>,
        page: Option<&PageToken>,
        select: impl FnOnce(&RepoState) -> Vec<(ChangeItem, T)>,
    ) -> Result<(Page<T>, Option<Duration>), SourceError> {
        self.calls.lock().unwrap().push(FetchCall {
            repository: key.clone(),
            event_type,
            page: page.map(|p| p.as_str().to_string()),
            credential: credential.map(|c| c.expose().to_string()),
        });

        let repos = self.repos.lock().unwrap();
        let state = repos.get(key).ok_or_else(|| SourceError::NotFound {
            repository: key.clone(),
        })?;
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }
        if credential.is_some_and(|c| state.rejected_credentials.iter().any(|r| r == c.expose())) {
            return Err(SourceError::AccessRevoked {
                repository: key.clone(),
            });
        }

        let mut items = select(state);
        items.sort_by(|a, b| b.0.position().cmp(&a.0.position()));
        let index: usize = page.map(|p| p.as_str().parse().unwrap()).unwrap_or(0);
        let start = index * self.per_page;
        let slice: Vec<T> = items
            .into_iter()
            .skip(start)
            .take(self.per_page)
            .map(|(_, item)| item)
            .collect();
        let total = select_len(state, event_type);
        let next = (start + self.per_page < total).then(|| PageToken::new((index + 1).to_string()));
        Ok((Page { items: slice, next }, state.delay))
    }
}

fn select_len(state: &RepoState, event_type: EventType) -> usize {
    match event_type {
        EventType::Release => state.releases.len(),
        EventType::Issue => state.issues.len(),
        EventType::Starred => state.stargazers.len(),
    }
}

/// Counts concurrent sleeps and remembers the highest count.
#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    async fn sleep(&self, delay: Duration) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl FakeSource {
    async fn delayed<T>(
        &self,
        served: Result<(Page<T>, Option<Duration>), SourceError>,
    ) -> Result<Page<T>, SourceError> {
        let (page, delay) = served?;
        if let Some(delay) = delay {
            self.in_flight.sleep(delay).await;
        }
        Ok(page)
    }
}

#[async_trait]
impl SourceAdapter for FakeSource {
    async fn fetch_repository(
        &self,
        key: &RepositoryKey,
        _credential: Option<&Credential>,
    ) -> Result<RepoSnapshot, SourceError> {
        let repos = self.repos.lock().unwrap();
        match repos.get(key) {
            Some(state) if state.failure.is_none() => Ok(RepoSnapshot {
                key: key.clone(),
                description: None,
                html_url: format!("https://github.com/{key}"),
                stargazers: state.stargazers.len() as u64,
                archived: false,
            }),
            Some(state) => Err(state.failure.clone().unwrap()),
            None => Err(SourceError::NotFound {
                repository: key.clone(),
            }),
        }
    }

    async fn fetch_releases(
        &self,
        key: &RepositoryKey,
        credential: Option<&Credential>,
        page: Option<&PageToken>,
    ) -> Result<Page<Release>, SourceError> {
        let served = self.serve(key, EventType::Release, credential, page, |s| {
            s.releases
                .iter()
                .map(|r| (ChangeItem::Release(r.clone()), r.clone()))
                .collect()
        });
        self.delayed(served).await
    }

    async fn fetch_issues(
        &self,
        key: &RepositoryKey,
        credential: Option<&Credential>,
        page: Option<&PageToken>,
    ) -> Result<Page<Issue>, SourceError> {
        let served = self.serve(key, EventType::Issue, credential, page, |s| {
            s.issues
                .iter()
                .map(|i| (ChangeItem::Issue(i.clone()), i.clone()))
                .collect()
        });
        self.delayed(served).await
    }

    async fn fetch_starred(
        &self,
        key: &RepositoryKey,
        credential: Option<&Credential>,
        page: Option<&PageToken>,
    ) -> Result<Page<Stargazer>, SourceError> {
        let served = self.serve(key, EventType::Starred, credential, page, |s| {
            s.stargazers
                .iter()
                .map(|g| (ChangeItem::Starred(g.clone()), g.clone()))
                .collect()
        });
        self.delayed(served).await
    }
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Records every successful send; fails destinations on request.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(Destination, Notification)>>,
    failing: Mutex<HashMap<Destination, SendError>>,
    delay: Mutex<Option<Duration>>,
    in_flight: InFlight,
}

impl RecordingSender {
    /// Makes every successful send take `delay`.
    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Most delayed sends that were pending at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak()
    }

    pub fn fail(&self, destination: Destination, error: SendError) {
        self.failing.lock().unwrap().insert(destination, error);
    }

    pub fn recover(&self, destination: Destination) {
        self.failing.lock().unwrap().remove(&destination);
    }

    pub fn sent(&self) -> Vec<(Destination, Notification)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, destination: Destination) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|(d, _)| *d == destination)
            .map(|(_, n)| n)
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl tracking::NotificationSender for RecordingSender {
    async fn send(
        &self,
        destination: &Destination,
        notification: &Notification,
    ) -> Result<(), SendError> {
        if let Some(error) = self.failing.lock().unwrap().get(destination) {
            return Err(error.clone());
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            self.in_flight.sleep(delay).await;
        }
        self.sent
            .lock()
            .unwrap()
            .push((*destination, notification.clone()));
        Ok(())
    }
}

pub struct AllowAll;

#[async_trait]
impl PermissionValidator for AllowAll {
    async fn can_post(&self, _destination: &Destination) -> bool {
        true
    }
}

pub fn permanent() -> SendError {
    SendError::PermanentlyInvalid {
        reason: "Forbidden: bot was kicked from the channel chat".to_string(),
    }
}

pub fn transient() -> SendError {
    SendError::Transient {
        reason: "network".to_string(),
        retry_after: None,
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<TrackingStore>,
    pub vault: Arc<InMemoryTokenVault>,
    pub source: Arc<FakeSource>,
    pub sender: Arc<RecordingSender>,
    pub dispatcher: Arc<Dispatcher>,
    pub monitor: Arc<Monitor>,
}

impl Harness {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_page_size(config, 30)
    }

    pub fn with_page_size(config: MonitorConfig, per_page: usize) -> Self {
        let store = Arc::new(TrackingStore::new());
        let vault = Arc::new(InMemoryTokenVault::new());
        let source = Arc::new(FakeSource::new(per_page));
        let sender = Arc::new(RecordingSender::default());
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), sender.clone(), &config));
        let monitor = Arc::new(Monitor::new(
            store.clone(),
            vault.clone(),
            source.clone(),
            dispatcher.clone(),
            config,
        ));
        Self {
            store,
            vault,
            source,
            sender,
            dispatcher,
            monitor,
        }
    }

    pub async fn track(
        &self,
        repository: &RepositoryKey,
        subscriber: i64,
        destination: Destination,
        types: &[EventType],
    ) {
        self.store
            .upsert(
                TrackRequest::new(
                    repository.clone(),
                    SubscriberId::new(subscriber),
                    destination,
                    types.iter().copied(),
                ),
                &AllowAll,
            )
            .await
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn repo(name: &str) -> RepositoryKey {
    RepositoryKey::new("acme", name).unwrap()
}

pub fn dm(subscriber: i64) -> Destination {
    Destination::DirectMessage {
        subscriber: SubscriberId::new(subscriber),
    }
}

pub fn channel(chat: i64) -> Destination {
    Destination::Channel {
        chat: tracking::ChatId::new(chat),
    }
}

pub fn ts(secs: i64) -> Timestamp {
    Timestamp::from_unix_seconds(1_700_000_000 + secs).unwrap()
}

pub fn release(id: u64, tag: &str) -> Release {
    Release {
        id: ReleaseId::new(id),
        tag_name: tag.to_string(),
        name: Some(format!("Release {tag}")),
        html_url: format!("https://github.com/acme/app/releases/tag/{tag}"),
        published_at: ts(id as i64 * 3600),
        prerelease: false,
    }
}

pub fn issue(number: u64) -> Issue {
    Issue {
        number: IssueNumber::new(number),
        title: format!("Bug {number}"),
        author: "reporter".to_string(),
        author_url: Some("https://github.com/reporter".to_string()),
        html_url: format!("https://github.com/acme/app/issues/{number}"),
        body: Some("Steps to reproduce".to_string()),
        created_at: ts(number as i64 * 60),
    }
}

pub fn stargazer(login: &str, at: i64) -> Stargazer {
    Stargazer {
        login: login.to_string(),
        html_url: format!("https://github.com/{login}"),
        starred_at: ts(at),
    }
}

/// Tags of the release notifications in `notifications`, in order.
pub fn release_tags(notifications: &[Notification]) -> Vec<String> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::Change {
                item: ChangeItem::Release(r),
                ..
            } => Some(r.tag_name.clone()),
            _ => None,
        })
        .collect()
}

/// Numbers of the issue notifications in `notifications`, in order.
pub fn issue_numbers(notifications: &[Notification]) -> Vec<u64> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::Change {
                item: ChangeItem::Issue(i),
                ..
            } => Some(i.number.get()),
            _ => None,
        })
        .collect()
}
