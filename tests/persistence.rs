// tests/persistence.rs
//
// File-backed state: registry and board round-trips, snapshot immutability,
// unreadable snapshot files, trend-run ordering.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use trend_missions::aggregate::{Aggregator, BandedScorer, Tokenizer, TrendRun};
use trend_missions::ingest::topics::TopicClassifier;
use trend_missions::ingest::types::{LearningSnapshot, SnapshotItem, SourceName};
use trend_missions::missions::{MissionBoard, MissionGenerator, MissionId, RelevancePolicy};
use trend_missions::registry::{
    AgentRegistry, EliminationPolicy, MissionResult, WeightedRollingAverage,
};
use trend_missions::storage::Store;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 1, 6, 0, 0).unwrap()
}

fn snapshot(source: &str, at: DateTime<Utc>, titles: &[&str]) -> LearningSnapshot {
    let items = titles.iter().map(|t| SnapshotItem::new(*t, "")).collect();
    LearningSnapshot::new(SourceName::from(source), at, items)
}

#[test]
fn registry_round_trip_preserves_scores() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();

    let registry = AgentRegistry::default();
    registry.register("ada", "ai security").unwrap();
    registry.register("bob", "rust").unwrap();
    for (i, q) in [70.0, 95.0, 40.0].into_iter().enumerate() {
        registry
            .record_result(MissionResult::new(
                MissionId(i as u64 + 1),
                "ada",
                q,
                q >= 50.0,
                t0() + Duration::hours(i as i64),
            ))
            .unwrap();
    }
    store.save_agents(&registry.records()).unwrap();

    let reloaded = AgentRegistry::new(
        Arc::new(WeightedRollingAverage::default()),
        EliminationPolicy::default(),
    );
    reloaded.load(store.load_agents().unwrap());

    for name in ["ada", "bob"] {
        let before = registry.get(name).unwrap().profile;
        let after = reloaded.get(name).unwrap().profile;
        assert_eq!(after, before, "{name}");
    }
    assert_eq!(reloaded.history("ada").unwrap().len(), 3);
}

#[test]
fn tampered_score_is_recomputed_on_load() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();

    let registry = AgentRegistry::default();
    registry.register("ada", "ai").unwrap();
    registry
        .record_result(MissionResult::new(MissionId(1), "ada", 60.0, true, t0()))
        .unwrap();
    let mut records = registry.records();
    records[0].performance_score = 99.0;
    store.save_agents(&records).unwrap();

    let reloaded = AgentRegistry::default();
    reloaded.load(store.load_agents().unwrap());
    assert_eq!(reloaded.get("ada").unwrap().profile.performance_score, 60.0);
}

#[test]
fn board_round_trip_keeps_ids_and_generation_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();

    let agg = Aggregator::new(
        Tokenizer::default(),
        TopicClassifier::default_seed(),
        Arc::new(BandedScorer::default()),
    );
    let titles: Vec<&str> = std::iter::repeat_n("agents for security teams", 20).collect();
    let snaps = vec![
        snapshot("hacker_news", t0(), &titles),
        snapshot("tldr", t0(), &titles),
    ];
    let trends = agg.aggregate(&snaps, t0()).unwrap();

    let policy = RelevancePolicy {
        threshold: 60.0,
        locations: vec!["docs/investigations".into()],
        category_locations: Default::default(),
    };
    let generator = MissionGenerator::new(policy);
    let board = MissionBoard::new();
    let created = generator.generate(&board, &trends, t0());
    assert!(!created.is_empty());
    store.save_board(&board.to_record()).unwrap();

    let restored = MissionBoard::from_record(store.load_board().unwrap());
    assert_eq!(restored.list(), board.list());
    assert!(generator.generate(&restored, &trends, t0()).is_empty());

    let categories: BTreeSet<_> = restored
        .list()
        .into_iter()
        .filter(|m| m.trend == "agents")
        .map(|m| m.category)
        .collect();
    assert!(categories.contains("ai"));
    assert!(categories.contains("security"));

    // A later run of the same trend is a different key.
    let later: Vec<_> = trends
        .iter()
        .cloned()
        .map(|mut t| {
            t.run_at = t0() + Duration::hours(1);
            t
        })
        .collect();
    let fresh = generator.generate(&restored, &later, t0() + Duration::hours(1));
    assert_eq!(fresh.len(), created.len());
    assert!(fresh.iter().all(|id| id.0 > created.iter().map(|c| c.0).max().unwrap()));
}

#[test]
fn snapshots_are_never_overwritten() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let snap = snapshot("tldr", t0(), &["Rust 1.88 released"]);
    store.write_snapshot(&snap).unwrap();
    assert!(store.write_snapshot(&snap).is_err());

    let loaded = store.load_snapshots(None).unwrap();
    assert_eq!(loaded, vec![snap]);
}

#[test]
fn unreadable_snapshots_are_skipped_and_since_filters() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();
    store
        .write_snapshot(&snapshot("hacker_news", t0(), &["old"]))
        .unwrap();
    store
        .write_snapshot(&snapshot("hacker_news", t0() + Duration::hours(3), &["fresh"]))
        .unwrap();
    std::fs::write(
        dir.path().join("snapshots/hacker_news/20250701T070000.000Z.json"),
        b"{ not json",
    )
    .unwrap();

    assert_eq!(store.load_snapshots(None).unwrap().len(), 2);
    let recent = store
        .load_snapshots(Some(t0() + Duration::hours(1)))
        .unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].items[0].title, "fresh");
}

#[test]
fn latest_trend_run_is_the_newest_file() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();
    assert!(store.latest_trend_run().unwrap().is_none());

    for h in [2, 0, 1] {
        store
            .write_trend_run(&TrendRun {
                run_at: t0() + Duration::hours(h),
                snapshot_count: h as usize,
                trends: Vec::new(),
            })
            .unwrap();
    }
    let latest = store.latest_trend_run().unwrap().unwrap();
    assert_eq!(latest.run_at, t0() + Duration::hours(2));
}
