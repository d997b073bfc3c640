//! End-to-end runs: in-memory archive, stub upstream, CSV checkpoint report on disk.

mod common;

use bararchive_core::checkpoint::{Checkpoint, CheckpointBook, CheckpointStore, CsvCheckpointStore};
use bararchive_core::domain::{Granularity, PartitionCoordinate, PartitionLayout};
use bararchive_core::storage::ObjectStore;
use bararchive_runner::{
    execute_run, fetch_range, DailyRange, LogProgress, RunError, RunMode, RunOptions, RunReport,
    SeriesStatus,
};
use common::{d, harness, harness_with, seed, StubProvider, ROOT};
use std::sync::atomic::AtomicBool;

fn opts(mode: RunMode) -> RunOptions {
    RunOptions {
        mode,
        today: d(2024, 1, 13),
        workers: 1,
        max_unit_attempts: None,
    }
}

fn series(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn xyz_fills_trailing_gap_then_is_idempotent() {
    let h = harness(StubProvider::default());
    seed(
        &h.store,
        "XYZ",
        &[d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 4), d(2024, 1, 8), d(2024, 1, 9), d(2024, 1, 10)],
    );
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = CsvCheckpointStore::new(dir.path().join("logs/backfill_report.csv"));

    let report = execute_run(&h.ctx, &checkpoints, &series(&["XYZ"]), &opts(RunMode::Backfill), &LogProgress, None)
        .unwrap();
    assert_eq!(report.latest_complete, Some(d(2024, 1, 12)));
    let xyz = &report.series[0];
    assert_eq!(xyz.status, SeriesStatus::Reconciled);
    assert_eq!(xyz.missing_units, 2);
    assert_eq!(xyz.written, 2);

    let calls: Vec<_> = h.provider.calls.lock().unwrap().iter().map(|(_, d)| *d).collect();
    assert_eq!(calls, vec![d(2024, 1, 11), d(2024, 1, 12)]);

    let book = checkpoints.load().unwrap();
    assert_eq!(book["XYZ"].last_checked, d(2024, 1, 12));
    assert_eq!(book["XYZ"].missing_count(), 0);

    // Second run with nothing new to fetch
    let again = execute_run(&h.ctx, &checkpoints, &series(&["XYZ"]), &opts(RunMode::Backfill), &LogProgress, None)
        .unwrap();
    assert_eq!(again.series[0].missing_units, 0);
    assert_eq!(h.provider.call_count(), 2);
    assert_eq!(checkpoints.load().unwrap(), book);
}

#[test]
fn failed_date_is_carried_over_and_resolved_later() {
    let h = harness(StubProvider::failing_on(&[d(2024, 1, 3)]));
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = CsvCheckpointStore::new(dir.path().join("report.csv"));

    let first = execute_run(&h.ctx, &checkpoints, &series(&["ABC"]), &opts(RunMode::Backfill), &LogProgress, None)
        .unwrap();
    let abc = &first.series[0];
    assert_eq!(abc.status, SeriesStatus::Partial);
    assert_eq!(abc.missing_units, 8);
    assert_eq!(abc.written, 7);
    assert_eq!(abc.failed, 1);
    assert_eq!(abc.unresolved, vec![d(2024, 1, 3)]);

    let book = checkpoints.load().unwrap();
    assert_eq!(book["ABC"].last_checked, d(2024, 1, 12));
    assert_eq!(book["ABC"].attempts(d(2024, 1, 3)), 1);

    h.provider.heal();
    let second = execute_run(&h.ctx, &checkpoints, &series(&["ABC"]), &opts(RunMode::Backfill), &LogProgress, None)
        .unwrap();
    assert_eq!(second.series[0].missing_units, 1);
    assert_eq!(second.series[0].status, SeriesStatus::Reconciled);
    assert_eq!(h.provider.call_count(), 9);

    let book = checkpoints.load().unwrap();
    assert!(book["ABC"].unresolved.is_empty());
    assert!(h
        .store
        .exists(&PartitionLayout::new(ROOT).key(&PartitionCoordinate::daily("ABC", d(2024, 1, 3))))
        .unwrap());
}

#[test]
fn attempt_cap_abandons_a_date() {
    let h = harness(StubProvider::failing_on(&[d(2024, 1, 3)]));
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = CsvCheckpointStore::new(dir.path().join("report.csv"));
    let capped = RunOptions {
        max_unit_attempts: Some(2),
        ..opts(RunMode::Backfill)
    };

    let first = execute_run(&h.ctx, &checkpoints, &series(&["ABC"]), &capped, &LogProgress, None).unwrap();
    assert!(first.series[0].abandoned.is_empty());

    let second = execute_run(&h.ctx, &checkpoints, &series(&["ABC"]), &capped, &LogProgress, None).unwrap();
    assert_eq!(second.series[0].abandoned, vec![d(2024, 1, 3)]);
    assert!(checkpoints.load().unwrap()["ABC"].unresolved.is_empty());

    execute_run(&h.ctx, &checkpoints, &series(&["ABC"]), &capped, &LogProgress, None).unwrap();
    // Abandoned dates are not fetched again
    assert_eq!(h.provider.call_count(), 9);
}

#[test]
fn corrupt_checkpoint_aborts_without_fetching_or_saving() {
    let h = harness(StubProvider::default());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.csv");
    let corrupt = "ticker,last_checked,missing_count,missing_dates\nXYZ,not-a-date,0,\n";
    std::fs::write(&path, corrupt).unwrap();
    let checkpoints = CsvCheckpointStore::new(&path);

    let err = execute_run(&h.ctx, &checkpoints, &series(&["XYZ"]), &opts(RunMode::Backfill), &LogProgress, None)
        .unwrap_err();
    assert!(matches!(err, RunError::Checkpoint(_)));
    assert_eq!(h.provider.call_count(), 0);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), corrupt);
}

#[test]
fn report_only_records_gaps_without_fetching() {
    let h = harness(StubProvider::default());
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = CsvCheckpointStore::new(dir.path().join("report.csv"));

    let report = execute_run(&h.ctx, &checkpoints, &series(&["ABC"]), &opts(RunMode::ReportOnly), &LogProgress, None)
        .unwrap();
    assert_eq!(report.series[0].status, SeriesStatus::Partial);
    assert_eq!(h.provider.call_count(), 0);

    let book = checkpoints.load().unwrap();
    assert_eq!(book["ABC"].last_checked, d(2024, 1, 12));
    assert_eq!(book["ABC"].missing_count(), 8);
    assert!(!book["ABC"].unresolved.contains_key(&d(2024, 1, 5)));
}

#[test]
fn cancelled_run_leaves_checkpoints_unchanged() {
    let h = harness(StubProvider::default());
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = CsvCheckpointStore::new(dir.path().join("report.csv"));
    let mut book = CheckpointBook::new();
    book.insert("XYZ".into(), Checkpoint::new(d(2024, 1, 4)));
    checkpoints.save(&book).unwrap();

    let cancel = AtomicBool::new(true);
    let report = execute_run(
        &h.ctx,
        &checkpoints,
        &series(&["XYZ", "ABC"]),
        &opts(RunMode::Backfill),
        &LogProgress,
        Some(&cancel),
    )
    .unwrap();
    assert!(report.cancelled);
    assert!(report.series.iter().all(|s| s.status == SeriesStatus::Skipped));
    assert_eq!(h.provider.call_count(), 0);
    assert_eq!(checkpoints.load().unwrap(), book);
}

#[test]
fn worker_pool_keeps_request_order() {
    let h = harness(StubProvider::default());
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = CsvCheckpointStore::new(dir.path().join("report.csv"));
    let names = series(&["AAA", "BBB", "CCC", "DDD", "EEE", "FFF"]);
    let parallel = RunOptions {
        workers: 3,
        ..opts(RunMode::Backfill)
    };

    let report = execute_run(&h.ctx, &checkpoints, &names, &parallel, &LogProgress, None).unwrap();
    let order: Vec<_> = report.series.iter().map(|s| s.series.clone()).collect();
    assert_eq!(order, names);
    assert!(report.series.iter().all(|s| s.status == SeriesStatus::Reconciled));
    assert_eq!(report.total_written(), 6 * 8);
    assert_eq!(checkpoints.load().unwrap().len(), 6);
}

#[test]
fn hourly_run_fills_missing_hours_only() {
    let h = harness_with(StubProvider::default(), Granularity::Hourly);
    let layout = PartitionLayout::new(ROOT);
    for hour in 9..12 {
        let key = layout.key(&PartitionCoordinate::hourly("XYZ", d(2024, 1, 12), hour));
        h.store.put(&key, b"PAR1-placeholder-PAR1").unwrap();
    }
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = CsvCheckpointStore::new(dir.path().join("report.csv"));

    let report = execute_run(&h.ctx, &checkpoints, &series(&["XYZ"]), &opts(RunMode::Backfill), &LogProgress, None)
        .unwrap();
    assert_eq!(report.series[0].missing_units, 4);
    assert_eq!(report.series[0].written, 4);
    for hour in 12..16 {
        let key = layout.key(&PartitionCoordinate::hourly("XYZ", d(2024, 1, 12), hour));
        assert!(h.store.exists(&key).unwrap(), "hour {hour} missing");
    }
}

#[test]
fn daily_task_skips_existing_keys() {
    let h = harness(StubProvider::default());
    seed(&h.store, "XYZ", &[d(2024, 1, 12)]);

    let report = fetch_range(
        &h.ctx.reconciler,
        &h.ctx.driver,
        &series(&["XYZ", "ABC"]),
        DailyRange {
            start: None,
            end: None,
            today: d(2024, 1, 13),
        },
        None,
    )
    .unwrap();
    assert_eq!(report.sessions, vec![d(2024, 1, 12)]);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.written(), 1);

    let ranged = fetch_range(
        &h.ctx.reconciler,
        &h.ctx.driver,
        &series(&["XYZ"]),
        DailyRange {
            start: Some(d(2024, 1, 4)),
            end: Some(d(2024, 1, 9)),
            today: d(2024, 1, 13),
        },
        None,
    )
    .unwrap();
    // 2024-01-05 is closed in this calendar
    assert_eq!(ranged.sessions, vec![d(2024, 1, 4), d(2024, 1, 8), d(2024, 1, 9)]);
    assert_eq!(ranged.written(), 3);
}

#[test]
fn tripped_breaker_short_circuits_every_unit() {
    let h = harness(StubProvider::default());
    h.provider.trip();
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = CsvCheckpointStore::new(dir.path().join("report.csv"));

    let first = execute_run(&h.ctx, &checkpoints, &series(&["ABC"]), &opts(RunMode::Backfill), &LogProgress, None)
        .unwrap();
    let abc = &first.series[0];
    assert_eq!(abc.status, SeriesStatus::Partial);
    assert_eq!(abc.missing_units, 8);
    assert_eq!(abc.failed, 8);
    assert_eq!(abc.written, 0);
    assert_eq!(h.provider.call_count(), 0);

    // Short-circuited units are carried without spending an attempt
    let book = checkpoints.load().unwrap();
    assert_eq!(book["ABC"].last_checked, d(2024, 1, 12));
    assert_eq!(book["ABC"].missing_count(), 8);
    assert!(book["ABC"].unresolved.values().all(|attempts| *attempts == 0));

    h.provider.heal();
    let healed = execute_run(&h.ctx, &checkpoints, &series(&["ABC"]), &opts(RunMode::Backfill), &LogProgress, None)
        .unwrap();
    assert_eq!(healed.series[0].status, SeriesStatus::Reconciled);
    assert_eq!(healed.series[0].written, 8);
    assert_eq!(h.provider.call_count(), 8);
}

#[test]
fn repeated_reconciliation_without_writes_is_stable() {
    let h = harness(StubProvider::default());
    seed(
        &h.store,
        "XYZ",
        &[d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 4), d(2024, 1, 8), d(2024, 1, 9), d(2024, 1, 10)],
    );
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = CsvCheckpointStore::new(dir.path().join("report.csv"));
    let names = series(&["XYZ", "ABC"]);

    let first = execute_run(&h.ctx, &checkpoints, &names, &opts(RunMode::ReportOnly), &LogProgress, None).unwrap();
    let after_first = checkpoints.load().unwrap();
    let second = execute_run(&h.ctx, &checkpoints, &names, &opts(RunMode::ReportOnly), &LogProgress, None).unwrap();
    let after_second = checkpoints.load().unwrap();

    let missing = |r: &RunReport| -> Vec<usize> { r.series.iter().map(|s| s.missing_units).collect() };
    assert_eq!(missing(&first), vec![2, 8]);
    assert_eq!(missing(&second), missing(&first));
    for name in &names {
        let before = &after_first[name.as_str()].unresolved;
        let after = &after_second[name.as_str()].unresolved;
        assert!(before.keys().all(|date| after.contains_key(date)), "{name} lost unresolved dates");
    }
    assert_eq!(h.provider.call_count(), 0);
}

#[test]
fn repeated_failing_runs_keep_the_same_gaps() {
    let sessions = [
        d(2024, 1, 2),
        d(2024, 1, 3),
        d(2024, 1, 4),
        d(2024, 1, 8),
        d(2024, 1, 9),
        d(2024, 1, 10),
        d(2024, 1, 11),
        d(2024, 1, 12),
    ];
    let h = harness(StubProvider::failing_on(&sessions));
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = CsvCheckpointStore::new(dir.path().join("report.csv"));

    let first = execute_run(&h.ctx, &checkpoints, &series(&["ABC"]), &opts(RunMode::Backfill), &LogProgress, None)
        .unwrap();
    let after_first = checkpoints.load().unwrap();
    let second = execute_run(&h.ctx, &checkpoints, &series(&["ABC"]), &opts(RunMode::Backfill), &LogProgress, None)
        .unwrap();
    let after_second = checkpoints.load().unwrap();

    assert_eq!(first.series[0].missing_units, 8);
    assert_eq!(second.series[0].missing_units, first.series[0].missing_units);
    assert_eq!(second.series[0].unresolved, first.series[0].unresolved);
    for (date, attempts) in &after_first["ABC"].unresolved {
        assert_eq!(after_second["ABC"].attempts(*date), attempts + 1);
    }
}

#[test]
fn truncated_partition_behind_checkpoint_is_rewritten() {
    let h = harness(StubProvider::default());
    seed(
        &h.store,
        "XYZ",
        &[d(2024, 1, 2), d(2024, 1, 4), d(2024, 1, 8), d(2024, 1, 9), d(2024, 1, 10)],
    );
    let layout = PartitionLayout::new(ROOT);
    let truncated = layout.key(&PartitionCoordinate::daily("XYZ", d(2024, 1, 3)));
    h.store.put(&truncated, b"PA").unwrap();

    let dir = tempfile::tempdir().unwrap();
    let checkpoints = CsvCheckpointStore::new(dir.path().join("report.csv"));
    let mut book = CheckpointBook::new();
    book.insert("XYZ".into(), Checkpoint::new(d(2024, 1, 10)));
    checkpoints.save(&book).unwrap();

    let report = execute_run(&h.ctx, &checkpoints, &series(&["XYZ"]), &opts(RunMode::Backfill), &LogProgress, None)
        .unwrap();
    assert_eq!(report.series[0].missing_units, 3);
    assert_eq!(report.series[0].status, SeriesStatus::Reconciled);

    let calls: Vec<_> = h.provider.calls.lock().unwrap().iter().map(|(_, d)| *d).collect();
    assert_eq!(calls, vec![d(2024, 1, 3), d(2024, 1, 11), d(2024, 1, 12)]);
    assert!(h.store.get(&truncated).unwrap().len() > 4);
}
