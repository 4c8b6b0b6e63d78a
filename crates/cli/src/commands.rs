//! Offline administration of the persisted state.
//!
//! These commands read the tracking snapshot, change it and write it back.
//! They are meant to run while the service is stopped: a running `repowatch
//! run` rewrites the snapshot after every tick.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use storage::TrackingSnapshot;
use tracking::{
    Credential, Destination, PermissionValidator, RepositoryKey, SourceAdapter, SubscriberId,
    TokenVault, TrackRequest, Tracking, TrackingStore, UpsertOutcome,
};

/// Accepts every destination. Used with `track --no-check`.
pub struct SkipPermissionCheck;

#[async_trait]
impl PermissionValidator for SkipPermissionCheck {
    async fn can_post(&self, _destination: &Destination) -> bool {
        true
    }
}

fn load_store(path: &Path) -> Result<TrackingStore> {
    let trackings = TrackingSnapshot::load(path).context("Failed to load tracking snapshot")?;
    Ok(TrackingStore::from_trackings(trackings))
}

fn save_store(path: &Path, store: &TrackingStore) -> Result<()> {
    TrackingSnapshot::save(path, &store.snapshot()).context("Failed to save tracking snapshot")
}

/// Registers a tracking from track-command text such as
/// `owner/name [releases,issues] > -1001234/7`.
pub async fn track(
    snapshot: &Path,
    subscriber: SubscriberId,
    text: &str,
    validator: &dyn PermissionValidator,
) -> Result<String> {
    let request = TrackRequest::parse(subscriber, text)?;
    let store = load_store(snapshot)?;
    let repository = request.repository.clone();
    let destination = request.destination;
    let outcome = store.upsert(request, validator).await?;
    save_store(snapshot, &store)?;
    Ok(match outcome {
        UpsertOutcome::Created => format!("Now tracking {repository} for {subscriber} at {destination}"),
        UpsertOutcome::DestinationAdded => {
            format!("Added {destination} to {subscriber}'s tracking of {repository}")
        }
        UpsertOutcome::Updated => format!("Updated {subscriber}'s tracking of {repository}"),
    })
}

/// Removes a tracking, or one destination of it.
pub fn untrack(
    snapshot: &Path,
    subscriber: SubscriberId,
    repository: &RepositoryKey,
    destination: Option<Destination>,
) -> Result<String> {
    let store = load_store(snapshot)?;
    let removed = store.remove(repository, subscriber, destination);
    if removed.is_empty() {
        return Ok(format!("{subscriber} is not tracking {repository} there"));
    }
    save_store(snapshot, &store)?;
    let list: Vec<String> = removed.iter().map(Destination::to_string).collect();
    Ok(format!(
        "Stopped posting {repository} to {} for {subscriber}",
        list.join(", ")
    ))
}

/// Lists trackings, optionally for one subscriber.
pub fn list(snapshot: &Path, subscriber: Option<SubscriberId>) -> Result<String> {
    let store = load_store(snapshot)?;
    let trackings = match subscriber {
        Some(s) => store.list_by_subscriber(s),
        None => store.snapshot(),
    };
    if trackings.is_empty() {
        return Ok("No trackings".to_string());
    }
    let mut out = String::new();
    for tracking in &trackings {
        let _ = writeln!(out, "{}", describe(tracking));
    }
    Ok(out.trim_end().to_string())
}

fn describe(tracking: &Tracking) -> String {
    let types: Vec<&str> = tracking.event_types.iter().map(|t| t.as_str()).collect();
    let destinations: Vec<String> = tracking.destinations.iter().map(Destination::to_string).collect();
    format!(
        "{} subscriber={} [{}] -> {}",
        tracking.repository,
        tracking.subscriber,
        types.join(","),
        destinations.join(", ")
    )
}

pub async fn set_token(vault: &dyn TokenVault, subscriber: SubscriberId, secret: &str) -> Result<String> {
    let Some(credential) = Credential::new(secret) else {
        bail!("Token must not be empty");
    };
    vault.put(subscriber, credential).await?;
    Ok(format!("Stored token for {subscriber}"))
}

pub async fn delete_token(vault: &dyn TokenVault, subscriber: SubscriberId) -> Result<String> {
    Ok(if vault.delete(subscriber).await? {
        format!("Deleted token for {subscriber}")
    } else {
        format!("No token stored for {subscriber}")
    })
}

/// Fetches repository metadata, with the subscriber's token when given.
pub async fn check(
    source: &dyn SourceAdapter,
    vault: &dyn TokenVault,
    repository: &RepositoryKey,
    subscriber: Option<SubscriberId>,
) -> Result<String> {
    let credential = match subscriber {
        Some(s) => vault.get(s).await?,
        None => None,
    };
    let snapshot = source
        .fetch_repository(repository, credential.as_ref())
        .await
        .with_context(|| format!("Failed to fetch {repository}"))?;
    let mut out = format!("{} ({})\nstars: {}", snapshot.key, snapshot.html_url, snapshot.stargazers);
    if let Some(description) = &snapshot.description {
        let _ = write!(out, "\n{description}");
    }
    if snapshot.archived {
        out.push_str("\narchived");
    }
    Ok(out)
}
