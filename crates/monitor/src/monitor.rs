//! The polling monitor.
//!
//! One [`Monitor::tick`] checks every tracked repository once. Repositories
//! are checked concurrently up to `max_concurrent_repositories`. Each check
//! fetches every event type any of the repository's trackings includes, one
//! fetch sequence per type regardless of how many subscribers share it, then
//! hands the per-tracking bundles to the [`Dispatcher`].
//!
//! Fetches try each subscriber credential stored for the repository in turn
//! and finally go unauthenticated. A credential answered with not-found or
//! access-revoked only moves on to the next access path; the repository fails
//! when the last path fails.
//!
//! A repository whose fetch fails for any event type produces no bundles and
//! advances no markers in that tick. Not-found and access-revoked failures are
//! counted; after `repository_failure_threshold` consecutive ones every
//! tracking of the repository is removed and its subscriber told why.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn, Instrument};
use tracking::delta::{self, FetchPlan};
use tracking::{
    ChangeItem, Credential, EventType, Notification, Page, PageToken, RepositoryKey,
    SourceAdapter, SourceError, SubscriberId, TickId, TokenVault, Tracking, TrackingStore,
    UntrackReason,
};

use crate::{Dispatcher, MonitorConfig};

/// What happened to one repository during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryOutcome {
    /// Every event type was fetched and compared.
    Checked {
        /// Bundles handed to the dispatcher.
        bundles: usize,
        /// Notifications sent across all bundles.
        sent: usize,
        /// Trackings given a silent first marker.
        baselines: usize,
        /// Destinations pruned while dispatching.
        pruned: usize,
        /// Event types whose catch-up stopped at `max_pages`.
        truncated: usize,
    },
    /// The repository had no trackings left when its turn came.
    Skipped,
    /// A fetch failed; nothing was advanced.
    Failed {
        /// The failure.
        error: SourceError,
        /// Consecutive counted failures so far.
        consecutive: u32,
    },
    /// The failure threshold was reached and every tracking was removed.
    Untracked {
        /// Why the repository was untracked.
        reason: UntrackReason,
        /// Number of trackings removed.
        trackings: usize,
    },
}

/// Summary of one [`Monitor::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Identifier of the tick.
    pub tick_id: TickId,
    /// Outcome per repository, sorted by repository.
    pub repositories: Vec<(RepositoryKey, RepositoryOutcome)>,
}

impl TickReport {
    /// Number of bundles dispatched.
    pub fn bundles(&self) -> usize {
        self.outcomes()
            .map(|outcome| match outcome {
                RepositoryOutcome::Checked { bundles, .. } => *bundles,
                _ => 0,
            })
            .sum()
    }

    /// Number of notifications sent.
    pub fn sent(&self) -> usize {
        self.outcomes()
            .map(|outcome| match outcome {
                RepositoryOutcome::Checked { sent, .. } => *sent,
                _ => 0,
            })
            .sum()
    }

    /// Number of repositories whose check failed or ended in untracking.
    pub fn failures(&self) -> usize {
        self.outcomes()
            .filter(|outcome| {
                matches!(
                    outcome,
                    RepositoryOutcome::Failed { .. } | RepositoryOutcome::Untracked { .. }
                )
            })
            .count()
    }

    /// Returns the outcome recorded for `repository`, if it was checked.
    pub fn outcome(&self, repository: &RepositoryKey) -> Option<&RepositoryOutcome> {
        self.repositories
            .iter()
            .find(|(key, _)| key == repository)
            .map(|(_, outcome)| outcome)
    }

    fn outcomes(&self) -> impl Iterator<Item = &RepositoryOutcome> {
        self.repositories.iter().map(|(_, outcome)| outcome)
    }
}

/// Polls the source host for every tracked repository.
pub struct Monitor {
    store: Arc<TrackingStore>,
    vault: Arc<dyn TokenVault>,
    source: Arc<dyn SourceAdapter>,
    dispatcher: Arc<Dispatcher>,
    config: MonitorConfig,
    failures: DashMap<RepositoryKey, u32>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("config", &self.config)
            .field("failing_repositories", &self.failures.len())
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Creates a monitor. `config` should already be validated.
    pub fn new(
        store: Arc<TrackingStore>,
        vault: Arc<dyn TokenVault>,
        source: Arc<dyn SourceAdapter>,
        dispatcher: Arc<Dispatcher>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            vault,
            source,
            dispatcher,
            config,
            failures: DashMap::new(),
        }
    }

    /// Returns the monitor's configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Runs one polling pass over every tracked repository.
    pub async fn tick(&self) -> TickReport {
        let tick_id = TickId::new_random();
        let span = tracing::info_span!("tick", %tick_id);
        async move {
            let repositories = self.store.repositories();
            let mut outcomes: Vec<(RepositoryKey, RepositoryOutcome)> =
                stream::iter(repositories)
                    .map(|repository| async move {
                        let outcome = self.check_repository(&repository).await;
                        (repository, outcome)
                    })
                    .buffer_unordered(self.config.max_concurrent_repositories.max(1))
                    .collect()
                    .await;
            outcomes.sort_by(|a, b| a.0.cmp(&b.0));
            self.forget_untracked();

            let report = TickReport {
                tick_id,
                repositories: outcomes,
            };
            info!(
                repositories = report.repositories.len(),
                bundles = report.bundles(),
                sent = report.sent(),
                failures = report.failures(),
                "Tick complete"
            );
            report
        }
        .instrument(span)
        .await
    }

    /// Returns the consecutive counted failures recorded for `repository`.
    pub fn failure_count(&self, repository: &RepositoryKey) -> u32 {
        self.failures.get(repository).map(|c| *c).unwrap_or(0)
    }

    /// Drops failure counts of repositories and destinations no longer tracked.
    fn forget_untracked(&self) {
        self.failures
            .retain(|repository, _| self.store.contains_repository(repository));
        self.dispatcher.forget_untracked();
    }

    #[instrument(skip_all, fields(%repository))]
    async fn check_repository(&self, repository: &RepositoryKey) -> RepositoryOutcome {
        let trackings = self.store.list_by_repository(repository);
        if trackings.is_empty() {
            return RepositoryOutcome::Skipped;
        }

        let plans: Vec<FetchPlan> = EventType::ALL
            .iter()
            .filter_map(|event_type| delta::plan(&trackings, *event_type))
            .collect();

        let fetched = match self.fetch_with_fallback(repository, &trackings, &plans).await {
            Ok(fetched) => fetched,
            Err(error) => return self.record_failure(repository, &trackings, error).await,
        };
        self.failures.remove(repository);

        let truncated = fetched.iter().filter(|f| f.truncated).count();
        let mut bundles = 0;
        let mut sent = 0;
        let mut baselines = 0;
        let mut pruned = 0;
        for Fetched {
            event_type, items, ..
        } in fetched
        {
            let detection = delta::detect(repository, event_type, &trackings, items);
            for (subscriber, marker) in detection.baselines {
                if self
                    .store
                    .advance_marker(repository, subscriber, event_type, marker)
                {
                    baselines += 1;
                }
            }
            for bundle in detection.bundles {
                let report = self.dispatcher.dispatch(bundle).await;
                bundles += 1;
                sent += report.sent();
                pruned += report.pruned.len();
            }
        }

        debug!(bundles, sent, baselines, truncated, "Repository checked");
        RepositoryOutcome::Checked {
            bundles,
            sent,
            baselines,
            pruned,
            truncated,
        }
    }

    /// Fetches every plan with each subscriber credential in turn, then
    /// unauthenticated. Only not-found and access-revoked answers move on to
    /// the next path; any other failure ends the attempt.
    async fn fetch_with_fallback(
        &self,
        repository: &RepositoryKey,
        trackings: &[Tracking],
        plans: &[FetchPlan],
    ) -> Result<Vec<Fetched>, SourceError> {
        for (subscriber, credential) in self.credentials(trackings).await {
            match self.fetch_all(repository, Some(&credential), plans).await {
                Ok(fetched) => return Ok(fetched),
                Err(error) if error.counts_towards_untrack() => {
                    warn!(%subscriber, %error, "Subscriber credential rejected, trying the next one");
                }
                Err(error) => return Err(error),
            }
        }
        self.fetch_all(repository, None, plans).await
    }

    /// Stored credentials of the repository's subscribers, in tracking order.
    async fn credentials(&self, trackings: &[Tracking]) -> Vec<(SubscriberId, Credential)> {
        let mut found = Vec::new();
        for tracking in trackings {
            match self.vault.get(tracking.subscriber).await {
                Ok(Some(credential)) => found.push((tracking.subscriber, credential)),
                Ok(None) => {}
                Err(error) => {
                    warn!(subscriber = %tracking.subscriber, %error, "Vault lookup failed");
                }
            }
        }
        found
    }

    async fn fetch_all(
        &self,
        repository: &RepositoryKey,
        credential: Option<&Credential>,
        plans: &[FetchPlan],
    ) -> Result<Vec<Fetched>, SourceError> {
        let mut fetched = Vec::with_capacity(plans.len());
        for plan in plans {
            fetched.push(self.fetch_items(repository, credential, plan).await?);
        }
        Ok(fetched)
    }

    /// Fetches newest-first pages of one event type until the plan's
    /// watermark is covered, the host runs out of pages, or `max_pages` is
    /// reached.
    async fn fetch_items(
        &self,
        repository: &RepositoryKey,
        credential: Option<&Credential>,
        plan: &FetchPlan,
    ) -> Result<Fetched, SourceError> {
        let mut items = Vec::new();
        let mut token: Option<PageToken> = None;
        let mut truncated = false;
        for pages in 1..=self.config.max_pages {
            let page = self
                .fetch_page(repository, credential, plan.event_type, token.as_ref())
                .await?;
            let oldest = page.items.iter().map(ChangeItem::position).min();
            items.extend(page.items);

            let wants_more = oldest.is_some_and(|oldest| plan.wants_older_than(&oldest));
            match page.next {
                Some(_) if wants_more && pages == self.config.max_pages => {
                    warn!(
                        %repository,
                        event_type = %plan.event_type,
                        pages,
                        "Page limit reached before the last seen item; older changes are skipped"
                    );
                    truncated = true;
                }
                Some(next) if wants_more => token = Some(next),
                _ => break,
            }
        }
        Ok(Fetched {
            event_type: plan.event_type,
            items,
            truncated,
        })
    }

    async fn fetch_page(
        &self,
        repository: &RepositoryKey,
        credential: Option<&Credential>,
        event_type: EventType,
        token: Option<&PageToken>,
    ) -> Result<Page<ChangeItem>, SourceError> {
        let timeout = self.config.fetch_timeout();
        let fetch = async {
            Ok::<_, SourceError>(match event_type {
                EventType::Release => map_page(
                    self.source.fetch_releases(repository, credential, token).await?,
                    ChangeItem::Release,
                ),
                EventType::Issue => map_page(
                    self.source.fetch_issues(repository, credential, token).await?,
                    ChangeItem::Issue,
                ),
                EventType::Starred => map_page(
                    self.source.fetch_starred(repository, credential, token).await?,
                    ChangeItem::Starred,
                ),
            })
        };
        with_timeout(timeout, repository, event_type, fetch).await
    }

    async fn record_failure(
        &self,
        repository: &RepositoryKey,
        trackings: &[Tracking],
        error: SourceError,
    ) -> RepositoryOutcome {
        if !error.counts_towards_untrack() {
            match error {
                SourceError::RateLimited { .. } => debug!(%error, "Repository check rate limited"),
                _ => warn!(%error, "Repository check failed"),
            }
            let consecutive = self.failure_count(repository);
            return RepositoryOutcome::Failed { error, consecutive };
        }

        let consecutive = {
            let mut count = self.failures.entry(repository.clone()).or_insert(0);
            *count += 1;
            *count
        };
        warn!(%error, consecutive, "Repository check failed");
        if consecutive < self.config.repository_failure_threshold {
            return RepositoryOutcome::Failed { error, consecutive };
        }

        let reason = match error {
            SourceError::AccessRevoked { .. } => UntrackReason::AccessRevoked,
            _ => UntrackReason::RepositoryNotFound,
        };
        self.failures.remove(repository);
        let mut removed = 0;
        for tracking in trackings {
            if self.store.remove(repository, tracking.subscriber, None).is_empty() {
                continue;
            }
            removed += 1;
            self.dispatcher
                .notify_subscriber(
                    tracking.subscriber,
                    &Notification::Untracked {
                        repository: repository.clone(),
                        reason: reason.clone(),
                    },
                )
                .await;
        }
        warn!(?reason, trackings = removed, "Repository untracked");
        RepositoryOutcome::Untracked {
            reason,
            trackings: removed,
        }
    }
}

/// Items fetched for one event type.
struct Fetched {
    event_type: EventType,
    items: Vec<ChangeItem>,
    truncated: bool,
}

fn map_page<T>(page: Page<T>, wrap: fn(T) -> ChangeItem) -> Page<ChangeItem> {
    Page {
        items: page.items.into_iter().map(wrap).collect(),
        next: page.next,
    }
}

async fn with_timeout<T>(
    after: Duration,
    repository: &RepositoryKey,
    event_type: EventType,
    fetch: impl std::future::Future<Output = Result<T, SourceError>>,
) -> Result<T, SourceError> {
    tokio::time::timeout(after, fetch)
        .await
        .unwrap_or_else(|_| {
            Err(SourceError::Timeout {
                repository: repository.clone(),
                event_type,
                after,
            })
        })
}
