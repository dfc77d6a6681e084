mod common;

use common::fixture;
use guardian_monitor::{RunSummary, ShutdownReason};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_three_ticks_one_minute_apart() {
    let f = fixture("* * * * *", Duration::from_secs(60));
    let sink = f.sink.clone();
    let handle = tokio::spawn(f.monitor.run());

    while sink.len() < 3 {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    f.shutdown.trigger(ShutdownReason::Terminate);

    let summary = handle.await.unwrap().unwrap();
    assert_eq!(
        summary,
        RunSummary {
            ticks_persisted: 3,
            ticks_dropped: 0
        }
    );

    let records = sink.records();
    assert_eq!(records.len(), 3);
    for pair in records.windows(2) {
        let gap = (pair[1].collected_at - pair[0].collected_at).num_seconds();
        assert!(gap > 0, "timestamps not increasing");
        assert!((58..=62).contains(&gap), "gap of {gap}s");
    }
    // warm-up established the baseline, so every tick carries traffic
    assert!(records.iter().all(|r| r.sample.network_upload_bytes == 500));
    assert!(records.iter().all(|r| r.sample.network_download_bytes == 1000));
    assert_eq!(sink.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_long_wait() {
    let f = fixture("*/5 * * * *", Duration::from_secs(60));
    let sink = f.sink.clone();
    let handle = tokio::spawn(f.monitor.run());

    // well inside the wait for 12:05
    tokio::time::sleep(Duration::from_secs(30)).await;
    let requested = Instant::now();
    f.shutdown.trigger(ShutdownReason::Interrupt);

    let summary = handle.await.unwrap().unwrap();
    assert!(requested.elapsed() < Duration::from_secs(2));
    assert_eq!(summary.ticks_persisted, 0);
    assert!(sink.is_empty());
    assert_eq!(sink.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_signals_release_once() {
    let f = fixture("* * * * *", Duration::from_secs(60));
    let sink = f.sink.clone();
    let handle = tokio::spawn(f.monitor.run());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(f.shutdown.trigger(ShutdownReason::Terminate));
    assert!(!f.shutdown.trigger(ShutdownReason::Interrupt));

    handle.await.unwrap().unwrap();
    assert_eq!(sink.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sink_outage_leaves_gap() {
    let f = fixture("* * * * *", Duration::from_secs(60));
    let sink = f.sink.clone();
    // first tick fails; backoff swallows the next trigger
    sink.fail_next(1);
    let handle = tokio::spawn(f.monitor.run());

    while sink.len() < 2 {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    f.shutdown.trigger(ShutdownReason::Terminate);
    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.ticks_dropped, 1);
    assert_eq!(summary.ticks_persisted, 2);

    let records = sink.records();
    let first_gap = records[0].collected_at - common::anchor();
    // 12:00:15 -> failed tick 12:01:01 -> backoff until 12:02:01 -> tick 12:03:01
    assert_eq!(first_gap.num_seconds(), 166);
    // the dropped tick still advanced the baseline; its traffic is not re-reported
    assert_eq!(records[0].sample.network_upload_bytes, 500);
    assert_eq!(records[1].sample.network_upload_bytes, 500);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_cpu_window_discards_sample() {
    let f = fixture("* * * * *", Duration::from_secs(60));
    let sink = f.sink.clone();
    let handle = tokio::spawn(f.monitor.run());

    // warm-up ends 12:00:16, the 12:01:00 tick samples CPU until 12:01:01
    tokio::time::sleep(Duration::from_millis(45_500)).await;
    f.shutdown.trigger(ShutdownReason::Interrupt);

    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.ticks_persisted, 0);
    assert_eq!(summary.ticks_dropped, 0);
    assert!(sink.is_empty());
    assert_eq!(sink.close_count(), 1);
}
