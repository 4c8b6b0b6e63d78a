//! In-memory registry of [`Tracking`]s.
//!
//! Trackings are sharded by repository. A secondary index maps each subscriber
//! to the repositories they track so per-subscriber listings do not scan the
//! whole registry.
//!
//! ## Locking
//!
//! Every mutation takes the repository entry first and updates the subscriber
//! index while still holding it. Readers of the subscriber index release it
//! before touching the repository map, so the two maps are never locked in the
//! opposite order. The permission check in [`TrackingStore::upsert`] runs
//! before any lock is taken.

use std::collections::BTreeSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::registration::normalise_event_types;
use crate::{
    Destination, EventType, Marker, PermissionValidator, RepositoryKey, SubscriberId,
    TrackRequest, Tracking, TrackingError,
};

/// What an [`TrackingStore::upsert`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new tracking was created.
    Created,
    /// An existing tracking gained a destination.
    DestinationAdded,
    /// An existing tracking and destination were re-registered; event types
    /// were replaced.
    Updated,
}

/// Concurrent registry of trackings keyed by `(repository, subscriber)`.
#[derive(Debug, Default)]
pub struct TrackingStore {
    by_repository: DashMap<RepositoryKey, Vec<Tracking>>,
    by_subscriber: DashMap<SubscriberId, BTreeSet<RepositoryKey>>,
}

impl TrackingStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a store from previously exported trackings.
    ///
    /// Event types are re-normalised, duplicate destinations collapsed and
    /// markers for untracked types dropped. Records left with no destination
    /// or no event type are discarded. Records sharing a
    /// `(repository, subscriber)` pair are merged; the merged marker is the
    /// older of the two so nothing is skipped.
    pub fn from_trackings(trackings: impl IntoIterator<Item = Tracking>) -> Self {
        let store = Self::new();
        for tracking in trackings {
            let Some(tracking) = normalise(tracking) else {
                continue;
            };
            let repository = tracking.repository.clone();
            let subscriber = tracking.subscriber;

            let mut entry = store.by_repository.entry(repository.clone()).or_default();
            match entry.iter_mut().find(|t| t.subscriber == subscriber) {
                Some(existing) => merge_into(existing, tracking),
                None => entry.push(tracking),
            }
            store
                .by_subscriber
                .entry(subscriber)
                .or_default()
                .insert(repository);
        }
        store
    }

    /// Registers or updates a tracking.
    ///
    /// A destination not yet attached to the subscriber's tracking of this
    /// repository is checked with `validator` first. Re-registering replaces
    /// the tracked event types and drops markers of types no longer tracked.
    pub async fn upsert(
        &self,
        request: TrackRequest,
        validator: &dyn PermissionValidator,
    ) -> Result<UpsertOutcome, TrackingError> {
        let event_types = normalise_event_types(request.event_types);
        if event_types.is_empty() {
            return Err(TrackingError::NoEventTypes {
                repository: request.repository,
            });
        }

        let known = self
            .get(&request.repository, request.subscriber)
            .is_some_and(|t| t.destinations.contains(&request.destination));
        if !known && !validator.can_post(&request.destination).await {
            return Err(TrackingError::InvalidDestination {
                destination: request.destination,
            });
        }

        let mut entry = self
            .by_repository
            .entry(request.repository.clone())
            .or_default();
        let outcome = match entry.iter_mut().find(|t| t.subscriber == request.subscriber) {
            Some(tracking) => {
                tracking.markers.retain(|ty, _| event_types.contains(ty));
                tracking.event_types = event_types;
                if tracking.destinations.contains(&request.destination) {
                    UpsertOutcome::Updated
                } else {
                    tracking.destinations.push(request.destination);
                    UpsertOutcome::DestinationAdded
                }
            }
            None => {
                entry.push(Tracking {
                    repository: request.repository.clone(),
                    subscriber: request.subscriber,
                    destinations: vec![request.destination],
                    event_types,
                    markers: Default::default(),
                });
                UpsertOutcome::Created
            }
        };
        self.by_subscriber
            .entry(request.subscriber)
            .or_default()
            .insert(request.repository.clone());
        drop(entry);

        debug!(
            repository = %request.repository,
            subscriber = %request.subscriber,
            destination = %request.destination,
            ?outcome,
            "Tracking registered"
        );
        Ok(outcome)
    }

    /// Removes one destination, or the whole tracking when `destination` is
    /// `None`.
    ///
    /// A tracking left without destinations is removed. Returns the removed
    /// destinations; an empty vector means nothing matched.
    pub fn remove(
        &self,
        repository: &RepositoryKey,
        subscriber: SubscriberId,
        destination: Option<Destination>,
    ) -> Vec<Destination> {
        let Entry::Occupied(mut entry) = self.by_repository.entry(repository.clone()) else {
            return Vec::new();
        };
        let trackings = entry.get_mut();
        let Some(index) = trackings.iter().position(|t| t.subscriber == subscriber) else {
            return Vec::new();
        };

        let removed = match destination {
            Some(destination) => {
                let tracking = &mut trackings[index];
                let before = tracking.destinations.len();
                tracking.destinations.retain(|d| *d != destination);
                if tracking.destinations.len() == before {
                    return Vec::new();
                }
                if tracking.destinations.is_empty() {
                    trackings.remove(index);
                }
                vec![destination]
            }
            None => trackings.remove(index).destinations,
        };

        if !trackings.iter().any(|t| t.subscriber == subscriber) {
            if let Entry::Occupied(mut repositories) = self.by_subscriber.entry(subscriber) {
                repositories.get_mut().remove(repository);
                if repositories.get().is_empty() {
                    repositories.remove();
                }
            }
        }
        if entry.get().is_empty() {
            entry.remove();
        }

        debug!(
            %repository,
            %subscriber,
            removed = removed.len(),
            "Tracking destinations removed"
        );
        removed
    }

    /// Moves a tracking's marker for `event_type` forward.
    ///
    /// Returns `false` without changing anything if the tracking no longer
    /// exists, no longer tracks `event_type`, or already has a marker at or
    /// past `marker`.
    pub fn advance_marker(
        &self,
        repository: &RepositoryKey,
        subscriber: SubscriberId,
        event_type: EventType,
        marker: Marker,
    ) -> bool {
        let Some(mut trackings) = self.by_repository.get_mut(repository) else {
            return false;
        };
        let Some(tracking) = trackings.iter_mut().find(|t| t.subscriber == subscriber) else {
            return false;
        };
        if !tracking.tracks(event_type) {
            return false;
        }
        match tracking.markers.get(&event_type) {
            Some(current) if *current >= marker => false,
            _ => {
                tracking.markers.insert(event_type, marker);
                true
            }
        }
    }

    /// Returns a copy of one subscriber's tracking of `repository`.
    pub fn get(&self, repository: &RepositoryKey, subscriber: SubscriberId) -> Option<Tracking> {
        self.by_repository
            .get(repository)?
            .iter()
            .find(|t| t.subscriber == subscriber)
            .cloned()
    }

    /// Returns every tracking of `repository`.
    pub fn list_by_repository(&self, repository: &RepositoryKey) -> Vec<Tracking> {
        self.by_repository
            .get(repository)
            .map(|trackings| trackings.clone())
            .unwrap_or_default()
    }

    /// Returns every tracking registered by `subscriber`, ordered by repository.
    pub fn list_by_subscriber(&self, subscriber: SubscriberId) -> Vec<Tracking> {
        let repositories: Vec<RepositoryKey> = match self.by_subscriber.get(&subscriber) {
            Some(index) => index.iter().cloned().collect(),
            None => return Vec::new(),
        };
        repositories
            .iter()
            .filter_map(|repository| self.get(repository, subscriber))
            .collect()
    }

    /// Returns `true` if any subscriber tracks `repository`.
    pub fn contains_repository(&self, repository: &RepositoryKey) -> bool {
        self.by_repository.contains_key(repository)
    }

    /// Returns the distinct tracked repositories, sorted.
    pub fn repositories(&self) -> Vec<RepositoryKey> {
        let mut keys: Vec<RepositoryKey> =
            self.by_repository.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Exports every tracking, ordered by repository then subscriber.
    pub fn snapshot(&self) -> Vec<Tracking> {
        let mut all: Vec<Tracking> = self
            .by_repository
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        all.sort_by(|a, b| {
            a.repository
                .cmp(&b.repository)
                .then(a.subscriber.cmp(&b.subscriber))
        });
        all
    }

    /// Returns the number of trackings.
    pub fn len(&self) -> usize {
        self.by_repository.iter().map(|e| e.value().len()).sum()
    }

    /// Returns `true` if there are no trackings.
    pub fn is_empty(&self) -> bool {
        self.by_repository.is_empty()
    }
}

fn normalise(mut tracking: Tracking) -> Option<Tracking> {
    tracking.event_types = normalise_event_types(tracking.event_types);
    let mut seen = BTreeSet::new();
    tracking.destinations.retain(|d| seen.insert(*d));
    let event_types = tracking.event_types.clone();
    tracking.markers.retain(|ty, _| event_types.contains(ty));
    if tracking.event_types.is_empty() || tracking.destinations.is_empty() {
        return None;
    }
    Some(tracking)
}

fn merge_into(existing: &mut Tracking, other: Tracking) {
    for destination in other.destinations {
        if !existing.destinations.contains(&destination) {
            existing.destinations.push(destination);
        }
    }
    existing.event_types =
        normalise_event_types(existing.event_types.iter().copied().chain(other.event_types));
    for (event_type, marker) in other.markers {
        match existing.markers.get(&event_type) {
            Some(current) if *current <= marker => {}
            _ => {
                existing.markers.insert(event_type, marker);
            }
        }
    }
}
