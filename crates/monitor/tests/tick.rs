mod common;

use std::time::Duration;

use common::*;
use monitor::{MonitorConfig, RepositoryOutcome};
use tracking::{
    ChangeItem, Credential, EventType, IssueNumber, ItemPosition, Marker, Notification,
    SourceError, SubscriberId, TokenVault, UntrackReason,
};

fn issue_marker(number: u64) -> Marker {
    Marker::at(ItemPosition::Issue {
        number: IssueNumber::new(number),
    })
}

fn release_marker(id: u64, tag: &str) -> Marker {
    Marker::at(ChangeItem::Release(release(id, tag)).position())
}

#[tokio::test]
async fn first_tick_sets_silent_baseline_then_only_new_release_is_sent() {
    let h = Harness::new(MonitorConfig::default());
    let app = repo("app");
    h.source.update(&app, |s| s.releases = vec![release(1, "v1")]);
    h.track(&app, 1, dm(1), &[EventType::Release]).await;

    let report = h.monitor.tick().await;
    assert_eq!(report.sent(), 0);
    assert!(h.sender.sent().is_empty());
    let tracking = h.store.get(&app, SubscriberId::new(1)).unwrap();
    assert_eq!(
        tracking.marker(EventType::Release),
        Some(&release_marker(1, "v1"))
    );

    h.source
        .update(&app, |s| s.releases.push(release(2, "v2")));
    let report = h.monitor.tick().await;
    assert_eq!(report.sent(), 1);
    assert_eq!(release_tags(&h.sender.sent_to(dm(1))), vec!["v2"]);
    let tracking = h.store.get(&app, SubscriberId::new(1)).unwrap();
    assert_eq!(
        tracking.marker(EventType::Release),
        Some(&release_marker(2, "v2"))
    );
}

#[tokio::test]
async fn tick_without_upstream_change_emits_nothing() {
    let h = Harness::new(MonitorConfig::default());
    let app = repo("app");
    h.source.update(&app, |s| {
        s.releases = vec![release(1, "v1"), release(2, "v2")];
        s.issues = (1..=5).map(issue).collect();
    });
    h.track(&app, 1, dm(1), &[EventType::Release, EventType::Issue])
        .await;

    h.monitor.tick().await;
    h.source.update(&app, |s| s.issues.push(issue(6)));
    h.monitor.tick().await;
    assert_eq!(issue_numbers(&h.sender.sent_to(dm(1))), vec![6]);

    h.sender.clear();
    let report = h.monitor.tick().await;
    assert_eq!(report.bundles(), 0);
    assert!(h.sender.sent().is_empty());
}

#[tokio::test]
async fn each_tracking_receives_items_after_its_own_marker() {
    let h = Harness::new(MonitorConfig::default());
    let app = repo("app");
    h.source
        .update(&app, |s| s.issues = (1..=20).map(issue).collect());
    h.track(&app, 1, dm(1), &[EventType::Issue]).await;
    h.track(&app, 2, dm(2), &[EventType::Issue]).await;
    assert!(h
        .store
        .advance_marker(&app, SubscriberId::new(1), EventType::Issue, issue_marker(10)));
    assert!(h
        .store
        .advance_marker(&app, SubscriberId::new(2), EventType::Issue, issue_marker(15)));

    let report = h.monitor.tick().await;
    assert_eq!(report.bundles(), 2);
    assert_eq!(
        issue_numbers(&h.sender.sent_to(dm(1))),
        (11..=20).collect::<Vec<_>>()
    );
    assert_eq!(
        issue_numbers(&h.sender.sent_to(dm(2))),
        (16..=20).collect::<Vec<_>>()
    );
    for subscriber in [1, 2] {
        let tracking = h.store.get(&app, SubscriberId::new(subscriber)).unwrap();
        assert_eq!(tracking.marker(EventType::Issue), Some(&issue_marker(20)));
    }
}

#[tokio::test]
async fn one_fetch_per_repository_and_event_type_regardless_of_subscribers() {
    let h = Harness::new(MonitorConfig::default());
    let app = repo("app");
    h.source.update(&app, |s| {
        s.releases = vec![release(1, "v1")];
        s.stargazers = vec![stargazer("alice", 10)];
    });
    for subscriber in 1..=5 {
        h.track(&app, subscriber, dm(subscriber), &[EventType::Release])
            .await;
    }
    h.track(&app, 6, dm(6), &[EventType::Starred]).await;

    h.monitor.tick().await;
    let calls = h.source.calls();
    let releases = calls
        .iter()
        .filter(|c| c.event_type == EventType::Release)
        .count();
    let stars = calls
        .iter()
        .filter(|c| c.event_type == EventType::Starred)
        .count();
    assert_eq!((releases, stars, calls.len()), (1, 1, 2));
}

#[tokio::test]
async fn failing_repository_does_not_block_others() {
    let h = Harness::new(MonitorConfig::default());
    let broken = repo("broken");
    let healthy = repo("healthy");
    h.source.update(&broken, |s| s.releases = vec![release(1, "v1")]);
    h.source.update(&healthy, |s| s.releases = vec![release(1, "v1")]);
    h.track(&broken, 1, dm(1), &[EventType::Release]).await;
    h.track(&healthy, 1, dm(1), &[EventType::Release]).await;
    h.monitor.tick().await;

    h.source.update(&broken, |s| {
        s.releases.push(release(2, "v2"));
        s.failure = Some(SourceError::Transport {
            message: "connection reset".to_string(),
        });
    });
    h.source
        .update(&healthy, |s| s.releases.push(release(2, "v2")));

    let report = h.monitor.tick().await;
    assert!(matches!(
        report.outcome(&broken),
        Some(RepositoryOutcome::Failed { .. })
    ));
    assert!(matches!(
        report.outcome(&healthy),
        Some(RepositoryOutcome::Checked { sent: 1, .. })
    ));
    assert_eq!(
        h.store
            .get(&broken, SubscriberId::new(1))
            .unwrap()
            .marker(EventType::Release),
        Some(&release_marker(1, "v1"))
    );
    assert_eq!(
        h.store
            .get(&healthy, SubscriberId::new(1))
            .unwrap()
            .marker(EventType::Release),
        Some(&release_marker(2, "v2"))
    );

    // The broken repository catches up once it recovers.
    h.source.update(&broken, |s| s.failure = None);
    h.sender.clear();
    h.monitor.tick().await;
    assert_eq!(release_tags(&h.sender.sent_to(dm(1))), vec!["v2"]);
}

#[tokio::test]
async fn rate_limited_repository_advances_no_markers() {
    let h = Harness::new(MonitorConfig::default());
    let app = repo("app");
    h.source.update(&app, |s| {
        s.releases = vec![release(1, "v1")];
        s.issues = vec![issue(1)];
    });
    h.track(&app, 1, dm(1), &[EventType::Release]).await;
    h.track(&app, 2, dm(2), &[EventType::Issue]).await;

    h.source.update(&app, |s| {
        s.failure = Some(SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        })
    });
    let report = h.monitor.tick().await;
    assert!(matches!(
        report.outcome(&app),
        Some(RepositoryOutcome::Failed { consecutive: 0, .. })
    ));
    for subscriber in [1, 2] {
        assert!(h
            .store
            .get(&app, SubscriberId::new(subscriber))
            .unwrap()
            .markers
            .is_empty());
    }
}

#[tokio::test]
async fn repository_is_untracked_after_consecutive_not_found() {
    let config = MonitorConfig {
        repository_failure_threshold: 3,
        ..MonitorConfig::default()
    };
    let h = Harness::new(config);
    let gone = repo("gone");
    h.track(&gone, 1, dm(1), &[EventType::Release]).await;
    h.track(&gone, 2, channel(-1002), &[EventType::Issue]).await;

    let not_found = SourceError::NotFound {
        repository: repo("gone"),
    };
    h.source
        .update(&gone, |s| s.failure = Some(not_found.clone()));
    h.monitor.tick().await;
    assert_eq!(h.monitor.failure_count(&gone), 1);

    // Rate limits in between neither count nor reset.
    h.source.update(&gone, |s| {
        s.failure = Some(SourceError::RateLimited { retry_after: None })
    });
    h.monitor.tick().await;
    assert_eq!(h.monitor.failure_count(&gone), 1);

    h.source
        .update(&gone, |s| s.failure = Some(not_found.clone()));
    h.monitor.tick().await;
    assert_eq!(h.monitor.failure_count(&gone), 2);
    assert_eq!(h.store.len(), 2);

    let report = h.monitor.tick().await;
    assert_eq!(
        report.outcome(&gone),
        Some(&RepositoryOutcome::Untracked {
            reason: UntrackReason::RepositoryNotFound,
            trackings: 2,
        })
    );
    assert!(h.store.is_empty());
    assert_eq!(h.monitor.failure_count(&gone), 0);

    for subscriber in [1, 2] {
        assert_eq!(
            h.sender.sent_to(dm(subscriber)),
            vec![Notification::Untracked {
                repository: gone.clone(),
                reason: UntrackReason::RepositoryNotFound,
            }]
        );
    }
    assert!(h.sender.sent_to(channel(-1002)).is_empty());
}

#[tokio::test]
async fn success_resets_repository_failure_count() {
    let h = Harness::new(MonitorConfig::default());
    let app = repo("app");
    h.source.update(&app, |s| {
        s.failure = Some(SourceError::AccessRevoked {
            repository: repo("app"),
        })
    });
    h.track(&app, 1, dm(1), &[EventType::Release]).await;

    h.monitor.tick().await;
    h.monitor.tick().await;
    assert_eq!(h.monitor.failure_count(&app), 2);

    h.source.update(&app, |s| s.failure = None);
    h.monitor.tick().await;
    assert_eq!(h.monitor.failure_count(&app), 0);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn subscriber_credential_is_used_for_the_whole_repository() {
    let h = Harness::new(MonitorConfig::default());
    let private = repo("private");
    h.source.update(&private, |s| {
        s.releases = vec![release(1, "v1")];
        s.issues = vec![issue(1)];
    });
    h.track(&private, 1, dm(1), &[EventType::Release]).await;
    h.track(&private, 2, dm(2), &[EventType::Issue]).await;
    h.vault
        .put(SubscriberId::new(2), Credential::new("ghp_second").unwrap())
        .await
        .unwrap();

    h.monitor.tick().await;
    let calls = h.source.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls
        .iter()
        .all(|c| c.credential.as_deref() == Some("ghp_second")));
}

#[tokio::test]
async fn no_credential_falls_back_to_unauthenticated() {
    let h = Harness::new(MonitorConfig::default());
    let public = repo("public");
    h.source.update(&public, |s| s.releases = vec![release(1, "v1")]);
    h.track(&public, 1, dm(1), &[EventType::Release]).await;

    h.monitor.tick().await;
    assert!(h.source.calls().iter().all(|c| c.credential.is_none()));
}

#[tokio::test]
async fn catching_up_follows_pages_until_watermark_or_limit() {
    let config = MonitorConfig {
        max_pages: 3,
        ..MonitorConfig::default()
    };
    let h = Harness::with_page_size(config, 5);
    let app = repo("app");
    h.source
        .update(&app, |s| s.issues = (1..=12).map(issue).collect());
    h.track(&app, 1, dm(1), &[EventType::Issue]).await;
    assert!(h
        .store
        .advance_marker(&app, SubscriberId::new(1), EventType::Issue, issue_marker(4)));

    let report = h.monitor.tick().await;
    // Pages: 12..8, 7..3 (contains #4, stop).
    assert_eq!(h.source.calls().len(), 2);
    assert!(matches!(
        report.outcome(&app),
        Some(RepositoryOutcome::Checked { truncated: 0, .. })
    ));
    assert_eq!(
        issue_numbers(&h.sender.sent_to(dm(1))),
        (5..=12).collect::<Vec<_>>()
    );

    // A marker further back than max_pages reaches only what was fetched.
    h.source.clear_calls();
    h.sender.clear();
    h.source
        .update(&app, |s| s.issues = (1..=40).map(issue).collect());
    let report = h.monitor.tick().await;
    assert_eq!(h.source.calls().len(), 3);
    assert!(matches!(
        report.outcome(&app),
        Some(RepositoryOutcome::Checked { truncated: 1, .. })
    ));
    assert_eq!(
        issue_numbers(&h.sender.sent_to(dm(1))),
        (26..=40).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn baseline_fetch_reads_only_the_newest_page() {
    let h = Harness::with_page_size(MonitorConfig::default(), 5);
    let app = repo("app");
    h.source
        .update(&app, |s| s.issues = (1..=30).map(issue).collect());
    h.track(&app, 1, dm(1), &[EventType::Issue]).await;

    h.monitor.tick().await;
    assert_eq!(h.source.calls().len(), 1);
    assert_eq!(
        h.store
            .get(&app, SubscriberId::new(1))
            .unwrap()
            .marker(EventType::Issue),
        Some(&issue_marker(30))
    );
}

#[tokio::test]
async fn new_stargazers_are_delivered_oldest_first() {
    let h = Harness::new(MonitorConfig::default());
    let app = repo("app");
    h.source
        .update(&app, |s| s.stargazers = vec![stargazer("alice", 10)]);
    h.track(&app, 1, dm(1), &[EventType::Starred]).await;
    h.monitor.tick().await;

    h.source.update(&app, |s| {
        s.stargazers.push(stargazer("carol", 30));
        s.stargazers.push(stargazer("bob", 20));
    });
    h.monitor.tick().await;
    let logins: Vec<String> = h
        .sender
        .sent_to(dm(1))
        .into_iter()
        .filter_map(|n| match n {
            Notification::Change {
                item: ChangeItem::Starred(s),
                ..
            } => Some(s.login),
            _ => None,
        })
        .collect();
    assert_eq!(logins, vec!["bob", "carol"]);
}

#[tokio::test(start_paused = true)]
async fn stuck_fetch_times_out_as_repository_failure() {
    let config = MonitorConfig {
        fetch_timeout_secs: 5,
        ..MonitorConfig::default()
    };
    let h = Harness::new(config);
    let slow = repo("slow");
    let fast = repo("fast");
    h.source.update(&slow, |s| {
        s.releases = vec![release(1, "v1")];
        s.delay = Some(Duration::from_secs(60));
    });
    h.source.update(&fast, |s| s.releases = vec![release(1, "v1")]);
    h.track(&slow, 1, dm(1), &[EventType::Release]).await;
    h.track(&fast, 1, dm(1), &[EventType::Release]).await;

    let report = h.monitor.tick().await;
    assert!(matches!(
        report.outcome(&slow),
        Some(RepositoryOutcome::Failed {
            error: SourceError::Timeout { .. },
            consecutive: 0,
        })
    ));
    assert!(matches!(
        report.outcome(&fast),
        Some(RepositoryOutcome::Checked { baselines: 1, .. })
    ));
    assert!(h
        .store
        .get(&slow, SubscriberId::new(1))
        .unwrap()
        .markers
        .is_empty());
}

#[tokio::test]
async fn rejected_credential_falls_back_without_untracking_other_subscribers() {
    let config = MonitorConfig {
        repository_failure_threshold: 3,
        ..MonitorConfig::default()
    };
    let h = Harness::new(config);
    let public = repo("public");
    h.source.update(&public, |s| {
        s.releases = vec![release(1, "v1")];
        s.rejected_credentials = vec!["ghp_expired".to_string()];
    });
    for subscriber in 1..=3 {
        h.track(&public, subscriber, dm(subscriber), &[EventType::Release])
            .await;
    }
    h.vault
        .put(SubscriberId::new(1), Credential::new("ghp_expired").unwrap())
        .await
        .unwrap();

    for _ in 0..3 {
        let report = h.monitor.tick().await;
        assert!(matches!(
            report.outcome(&public),
            Some(RepositoryOutcome::Checked { .. })
        ));
    }
    assert_eq!(h.store.len(), 3);
    assert_eq!(h.monitor.failure_count(&public), 0);

    let credentials: Vec<Option<String>> =
        h.source.calls().into_iter().map(|c| c.credential).collect();
    assert_eq!(
        credentials[..2],
        [Some("ghp_expired".to_string()), None]
    );
    assert!(h.sender.sent().is_empty());
}

#[tokio::test]
async fn failure_counts_only_when_every_access_path_fails() {
    let h = Harness::new(MonitorConfig::default());
    let private = repo("private");
    h.source.update(&private, |s| {
        s.failure = Some(SourceError::AccessRevoked {
            repository: repo("private"),
        })
    });
    h.track(&private, 1, dm(1), &[EventType::Release]).await;
    h.track(&private, 2, dm(2), &[EventType::Release]).await;
    for (subscriber, secret) in [(1, "ghp_one"), (2, "ghp_two")] {
        h.vault
            .put(SubscriberId::new(subscriber), Credential::new(secret).unwrap())
            .await
            .unwrap();
    }

    let report = h.monitor.tick().await;
    assert!(matches!(
        report.outcome(&private),
        Some(RepositoryOutcome::Failed { consecutive: 1, .. })
    ));
    let credentials: Vec<Option<String>> =
        h.source.calls().into_iter().map(|c| c.credential).collect();
    assert_eq!(
        credentials,
        vec![Some("ghp_one".to_string()), Some("ghp_two".to_string()), None]
    );
}

#[tokio::test]
async fn rate_limit_on_a_credential_stops_the_fallback() {
    let h = Harness::new(MonitorConfig::default());
    let app = repo("app");
    h.source.update(&app, |s| {
        s.failure = Some(SourceError::RateLimited { retry_after: None })
    });
    h.track(&app, 1, dm(1), &[EventType::Release]).await;
    h.vault
        .put(SubscriberId::new(1), Credential::new("ghp_one").unwrap())
        .await
        .unwrap();

    h.monitor.tick().await;
    assert_eq!(h.source.calls().len(), 1);
    assert_eq!(h.monitor.failure_count(&app), 0);
}

#[tokio::test]
async fn failure_count_is_dropped_once_repository_is_no_longer_tracked() {
    let h = Harness::new(MonitorConfig::default());
    let gone = repo("gone");
    let app = repo("app");
    h.source.update(&app, |s| s.releases = vec![release(1, "v1")]);
    h.track(&gone, 1, dm(1), &[EventType::Release]).await;
    h.track(&app, 1, dm(1), &[EventType::Release]).await;

    h.monitor.tick().await;
    assert_eq!(h.monitor.failure_count(&gone), 1);

    h.store.remove(&gone, SubscriberId::new(1), None);
    h.monitor.tick().await;
    h.track(&gone, 1, dm(1), &[EventType::Release]).await;
    assert_eq!(h.monitor.failure_count(&gone), 0);
}

#[tokio::test(start_paused = true)]
async fn repository_checks_stay_within_the_concurrency_limit() {
    let config = MonitorConfig {
        max_concurrent_repositories: 2,
        ..MonitorConfig::default()
    };
    let h = Harness::new(config);
    for name in ["a", "b", "c", "d", "e"] {
        let key = repo(name);
        h.source.update(&key, |s| {
            s.releases = vec![release(1, "v1")];
            s.delay = Some(Duration::from_secs(1));
        });
        h.track(&key, 1, dm(1), &[EventType::Release]).await;
    }

    let started = tokio::time::Instant::now();
    let report = h.monitor.tick().await;
    assert_eq!(report.failures(), 0);
    assert_eq!(h.source.peak_in_flight(), 2);
    // Five one-second checks, two at a time.
    assert!(started.elapsed() >= Duration::from_secs(3));
}
