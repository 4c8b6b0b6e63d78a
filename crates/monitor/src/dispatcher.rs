//! Fan-out of change bundles to destinations.
//!
//! Each bundle is sent to every destination of its tracking concurrently.
//! Within one destination the items go out oldest first, one at a time, and
//! the first failure ends delivery to that destination for this bundle. The
//! tracking's marker advances once every destination has been attempted,
//! whatever the outcome.
//!
//! Permanent send failures are counted per `(repository, subscriber,
//! destination)`. A success resets the count; transient failures leave it
//! unchanged. Reaching the threshold prunes the destination.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, instrument, warn};
use tracking::{
    ChangeBundle, Destination, Notification, NotificationSender, RepositoryKey, SendError,
    SubscriberId, TrackingStore,
};

use crate::MonitorConfig;

type FailureKey = (RepositoryKey, SubscriberId, Destination);

/// Outcome of delivering one bundle to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Every item was sent.
    Delivered {
        /// Number of items sent.
        sent: usize,
    },
    /// Delivery stopped at the first failure.
    Failed {
        /// Items sent before the failure.
        sent: usize,
        /// The failure.
        error: SendError,
    },
}

/// Summary of one [`Dispatcher::dispatch`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Outcome per destination, in the tracking's destination order.
    pub deliveries: Vec<(Destination, DeliveryOutcome)>,
    /// Destinations removed from the tracking because of this dispatch.
    pub pruned: Vec<Destination>,
    /// Whether the tracking's marker moved.
    pub marker_advanced: bool,
}

impl DispatchReport {
    /// Total notifications sent across all destinations.
    pub fn sent(&self) -> usize {
        self.deliveries
            .iter()
            .map(|(_, outcome)| match outcome {
                DeliveryOutcome::Delivered { sent } | DeliveryOutcome::Failed { sent, .. } => *sent,
            })
            .sum()
    }
}

/// Delivers [`ChangeBundle`]s and maintains per-destination failure counts.
pub struct Dispatcher {
    store: Arc<TrackingStore>,
    sender: Arc<dyn NotificationSender>,
    send_timeout: Duration,
    failure_threshold: u32,
    failures: DashMap<FailureKey, u32>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("send_timeout", &self.send_timeout)
            .field("failure_threshold", &self.failure_threshold)
            .field("tracked_failures", &self.failures.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher over `store` that sends through `sender`.
    pub fn new(
        store: Arc<TrackingStore>,
        sender: Arc<dyn NotificationSender>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            store,
            sender,
            send_timeout: config.send_timeout(),
            failure_threshold: config.destination_failure_threshold,
            failures: DashMap::new(),
        }
    }

    /// Sends `bundle` to every destination of its tracking, updates failure
    /// counts, prunes exhausted destinations and advances the marker.
    ///
    /// A bundle whose tracking was removed in the meantime is dropped.
    #[instrument(
        skip(self, bundle),
        fields(
            repository = %bundle.repository,
            subscriber = %bundle.subscriber,
            event_type = %bundle.event_type,
            items = bundle.items.len(),
        )
    )]
    pub async fn dispatch(&self, bundle: ChangeBundle) -> DispatchReport {
        let Some(tracking) = self.store.get(&bundle.repository, bundle.subscriber) else {
            debug!("Tracking removed before dispatch");
            return DispatchReport::default();
        };

        let outcomes = join_all(
            tracking
                .destinations
                .iter()
                .map(|destination| self.deliver(*destination, &bundle)),
        )
        .await;

        let mut report = DispatchReport::default();
        for (destination, outcome) in tracking.destinations.iter().copied().zip(outcomes) {
            let key = (bundle.repository.clone(), bundle.subscriber, destination);
            match &outcome {
                DeliveryOutcome::Delivered { sent } => {
                    debug!(%destination, sent, "Bundle delivered");
                    self.failures.remove(&key);
                }
                DeliveryOutcome::Failed {
                    error: error @ SendError::PermanentlyInvalid { .. },
                    ..
                } => {
                    let count = self.record_failure(key);
                    warn!(%destination, %error, count, "Destination rejected notification");
                    if count >= self.failure_threshold {
                        report.pruned.extend(
                            self.prune(&bundle.repository, bundle.subscriber, destination)
                                .await,
                        );
                    }
                }
                DeliveryOutcome::Failed { error, .. } => {
                    warn!(%destination, %error, "Transient delivery failure");
                }
            }
            report.deliveries.push((destination, outcome));
        }

        report.marker_advanced = self.store.advance_marker(
            &bundle.repository,
            bundle.subscriber,
            bundle.event_type,
            bundle.marker.clone(),
        );
        report
    }

    /// Sends `notification` to the subscriber's private chat.
    ///
    /// Used for notices about the subscriber's own trackings. Failures are
    /// logged and not counted.
    pub async fn notify_subscriber(&self, subscriber: SubscriberId, notification: &Notification) {
        let destination = Destination::DirectMessage { subscriber };
        if let Err(error) = self.send_one(&destination, notification).await {
            warn!(%subscriber, %error, "Failed to notify subscriber");
        }
    }

    /// Returns the current consecutive permanent-failure count for a
    /// destination.
    pub fn failure_count(
        &self,
        repository: &RepositoryKey,
        subscriber: SubscriberId,
        destination: Destination,
    ) -> u32 {
        self.failures
            .get(&(repository.clone(), subscriber, destination))
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Drops failure counts of destinations no longer attached to their
    /// tracking.
    pub fn forget_untracked(&self) {
        self.failures.retain(|(repository, subscriber, destination), _| {
            self.store
                .get(repository, *subscriber)
                .is_some_and(|tracking| tracking.destinations.contains(destination))
        });
    }

    async fn deliver(&self, destination: Destination, bundle: &ChangeBundle) -> DeliveryOutcome {
        let mut sent = 0;
        for item in &bundle.items {
            let notification = Notification::Change {
                repository: bundle.repository.clone(),
                item: item.clone(),
            };
            if let Err(error) = self.send_one(&destination, &notification).await {
                return DeliveryOutcome::Failed { sent, error };
            }
            sent += 1;
        }
        DeliveryOutcome::Delivered { sent }
    }

    async fn send_one(
        &self,
        destination: &Destination,
        notification: &Notification,
    ) -> Result<(), SendError> {
        match tokio::time::timeout(self.send_timeout, self.sender.send(destination, notification))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SendError::Transient {
                reason: format!("send timed out after {:?}", self.send_timeout),
                retry_after: None,
            }),
        }
    }

    fn record_failure(&self, key: FailureKey) -> u32 {
        let mut count = self.failures.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    async fn prune(
        &self,
        repository: &RepositoryKey,
        subscriber: SubscriberId,
        destination: Destination,
    ) -> Vec<Destination> {
        self.failures
            .remove(&(repository.clone(), subscriber, destination));
        let removed = self.store.remove(repository, subscriber, Some(destination));
        if removed.is_empty() {
            return removed;
        }
        warn!(%repository, %subscriber, %destination, "Pruned destination");

        if destination != (Destination::DirectMessage { subscriber }) {
            self.notify_subscriber(
                subscriber,
                &Notification::DestinationPruned {
                    repository: repository.clone(),
                    destination,
                },
            )
            .await;
        }
        removed
    }
}
