mod common;

use std::time::Duration;

use common::*;
use monitor::{MonitorConfig, Scheduler};
use tracking::EventType;

#[tokio::test(start_paused = true)]
async fn ticks_on_the_configured_period_until_shutdown() {
    let h = Harness::new(MonitorConfig {
        poll_interval_secs: 300,
        ..MonitorConfig::default()
    });
    let app = repo("app");
    h.source.update(&app, |s| s.releases = vec![release(1, "v1")]);
    h.track(&app, 1, dm(1), &[EventType::Release]).await;

    let scheduler = Scheduler::new(h.monitor.clone());
    let mut reports = Vec::new();
    let ticks = scheduler
        .run_until(tokio::time::sleep(Duration::from_secs(601)), |report| {
            reports.push(report.tick_id)
        })
        .await;

    // Immediately, then at 300s and 600s.
    assert_eq!(ticks, 3);
    assert_eq!(reports.len(), 3);
    assert_ne!(reports[0], reports[1]);
    assert_eq!(h.source.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn shutdown_before_first_period_runs_single_tick() {
    let h = Harness::new(MonitorConfig::default());
    let scheduler = Scheduler::new(h.monitor.clone()).with_period(Duration::from_secs(60));
    let ticks = scheduler
        .run_until(tokio::time::sleep(Duration::from_secs(1)), |_| {})
        .await;
    assert_eq!(ticks, 1);
}
