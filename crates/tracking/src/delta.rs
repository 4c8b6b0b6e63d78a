//! Change detection.
//!
//! Pure functions that turn the items fetched for one repository and event
//! type into per-tracking [`ChangeBundle`]s. The monitor owns all I/O; nothing
//! here touches a store or the network.

use crate::{
    ChangeBundle, ChangeItem, EventType, ItemPosition, Marker, RepositoryKey, SubscriberId,
    Tracking,
};

/// How far back to fetch for one repository and event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    /// Event type to fetch.
    pub event_type: EventType,
    /// Lowest established marker among trackings of this type. `None` when
    /// every tracking is still unobserved, in which case only the newest page
    /// is needed to set their baseline.
    pub watermark: Option<Marker>,
}

impl FetchPlan {
    /// Returns `true` if a page whose oldest item sits at `oldest` may still
    /// be followed by older items that are new to some tracking.
    pub fn wants_older_than(&self, oldest: &ItemPosition) -> bool {
        self.watermark
            .as_ref()
            .is_some_and(|watermark| watermark.is_behind(oldest))
    }
}

/// Result of comparing fetched items against every tracking's marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    /// Items to deliver, one bundle per tracking with anything new.
    pub bundles: Vec<ChangeBundle>,
    /// Trackings observed for the first time and the marker they start at.
    /// These advance silently.
    pub baselines: Vec<(SubscriberId, Marker)>,
}

impl Detection {
    /// Returns `true` if nothing needs to be delivered or recorded.
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty() && self.baselines.is_empty()
    }
}

/// Builds the fetch plan for `event_type`, or `None` if no tracking includes it.
pub fn plan(trackings: &[Tracking], event_type: EventType) -> Option<FetchPlan> {
    let interested: Vec<&Tracking> = trackings.iter().filter(|t| t.tracks(event_type)).collect();
    if interested.is_empty() {
        return None;
    }
    let watermark = interested
        .iter()
        .filter_map(|t| t.marker(event_type))
        .min()
        .cloned();
    Some(FetchPlan {
        event_type,
        watermark,
    })
}

/// Sorts fetched items oldest first and drops duplicates.
///
/// Pages can overlap when items are added between requests.
pub fn order_items(mut items: Vec<ChangeItem>) -> Vec<ChangeItem> {
    items.sort_by_key(ChangeItem::position);
    items.dedup_by_key(|item| item.position());
    items
}

/// Returns the items strictly after `marker`, oldest first.
///
/// `items` must already be ordered by [`order_items`].
pub fn items_after(items: &[ChangeItem], marker: &Marker) -> Vec<ChangeItem> {
    items
        .iter()
        .filter(|item| marker.is_behind(&item.position()))
        .cloned()
        .collect()
}

/// Returns the marker for the newest of `items`, or [`Marker::empty`] if there
/// are none.
pub fn newest_marker(items: &[ChangeItem]) -> Marker {
    items
        .iter()
        .map(ChangeItem::position)
        .max()
        .map(Marker::at)
        .unwrap_or_else(Marker::empty)
}

/// Compares `fetched` items of `event_type` against each tracking's marker.
///
/// A tracking with no marker yet gets a silent baseline at the newest fetched
/// item. Every other tracking gets the items strictly after its own marker.
pub fn detect(
    repository: &RepositoryKey,
    event_type: EventType,
    trackings: &[Tracking],
    fetched: Vec<ChangeItem>,
) -> Detection {
    let items = order_items(fetched);
    let baseline = newest_marker(&items);

    let mut detection = Detection::default();
    for tracking in trackings.iter().filter(|t| t.tracks(event_type)) {
        let Some(marker) = tracking.marker(event_type) else {
            detection
                .baselines
                .push((tracking.subscriber, baseline.clone()));
            continue;
        };
        let personal = items_after(&items, marker);
        let Some(last) = personal.last() else {
            continue;
        };
        detection.bundles.push(ChangeBundle {
            repository: repository.clone(),
            subscriber: tracking.subscriber,
            event_type,
            marker: Marker::at(last.position()),
            items: personal,
        });
    }
    detection
}
