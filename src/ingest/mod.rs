// src/ingest/mod.rs
pub mod providers;
pub mod topics;
pub mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use tokio::task::JoinSet;

use crate::aggregate::Aggregator;
use crate::config::CollectorsConfig;
use crate::error::FetchError;
use crate::ingest::types::{
    CollectOutcome, LearningSnapshot, SourceCollector, SourceName, TimeWindow,
};

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("collector_runs_total", "Collector runs, per source.");
        describe_counter!(
            "collector_errors_total",
            "Collector failures after retries, per source and kind."
        );
        describe_counter!("collector_items_total", "Items kept in snapshots.");
        describe_counter!(
            "collector_partial_total",
            "Snapshots persisted with a partial-failure marker."
        );
        describe_histogram!("collector_fetch_ms", "Wall time of one collector run in ms.");
        describe_histogram!("collector_parse_ms", "Feed parse time in milliseconds.");
        describe_counter!("aggregate_runs_total", "Aggregation runs.");
        describe_counter!("trends_scored_total", "Trends produced by aggregation.");
        describe_counter!("missions_created_total", "Missions generated from trends.");
        describe_counter!("missions_assigned_total", "Successful claims.");
        describe_counter!("missions_abandoned_total", "Claims released by timeout.");
        describe_counter!("missions_completed_total", "Missions closed with a result.");
        describe_counter!(
            "assign_conflicts_total",
            "Slot reservations lost to a concurrent writer."
        );
        describe_counter!("agents_eliminated_total", "Agents that fell below the floor.");
        describe_gauge!(
            "pipeline_last_run_ts",
            "Unix ts when a pipeline job last finished."
        );
    });
}

/// Normalize feed text: decode entities, strip tags, fold quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }
    out
}

/// Retry schedule for `FetchError::Network`. `attempts` counts the first try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl From<&CollectorsConfig> for RetryPolicy {
    fn from(cfg: &CollectorsConfig) -> Self {
        Self {
            attempts: cfg.retry_attempts.max(1),
            base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, i.e. `base << (attempt - 1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << shift)
    }
}

/// Run one collector, retrying network failures with exponential backoff.
/// Returns the outcome and the number of attempts made.
pub async fn collect_with_retry(
    collector: &dyn SourceCollector,
    window: &TimeWindow,
    retry: RetryPolicy,
) -> (Result<CollectOutcome, FetchError>, u32) {
    let mut attempt = 1u32;
    loop {
        match collector.collect(window).await {
            Ok(out) => return (Ok(out), attempt),
            Err(e) if e.is_retryable() && attempt < retry.attempts => {
                let delay = retry.backoff(attempt);
                tracing::warn!(
                    target: "ingest",
                    source = %collector.source(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "collector failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}

/// Result of one source within a collection run.
#[derive(Debug)]
pub struct SourceRun {
    pub source: SourceName,
    pub attempts: u32,
    pub elapsed: Duration,
    pub result: Result<CollectOutcome, FetchError>,
}

#[derive(Debug, Default)]
pub struct CollectionReport {
    /// Sorted by source name.
    pub runs: Vec<SourceRun>,
}

impl CollectionReport {
    pub fn succeeded(&self) -> impl Iterator<Item = (&SourceName, &CollectOutcome)> {
        self.runs
            .iter()
            .filter_map(|r| r.result.as_ref().ok().map(|o| (&r.source, o)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&SourceName, &FetchError)> {
        self.runs
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (&r.source, e)))
    }
}

fn error_kind(e: &FetchError) -> &'static str {
    match e {
        FetchError::Network { .. } => "network",
        FetchError::Auth { .. } => "auth",
        FetchError::Parse { .. } => "parse",
        FetchError::Panicked { .. } => "panic",
    }
}

/// Run every collector in its own task. One source failing (or panicking)
/// never affects the others.
pub async fn run_collectors(
    collectors: &[Arc<dyn SourceCollector>],
    window: TimeWindow,
    retry: RetryPolicy,
) -> CollectionReport {
    ensure_metrics_described();

    let mut set = JoinSet::new();
    for c in collectors {
        let c = Arc::clone(c);
        let source = c.source();
        set.spawn(async move {
            let t0 = Instant::now();
            // Inner task so a panicking collector still reports under its own name.
            let inner = tokio::spawn(async move { collect_with_retry(c.as_ref(), &window, retry).await });
            let (result, attempts) = match inner.await {
                Ok(done) => done,
                Err(e) => (Err(FetchError::panicked(source.as_str(), e)), 1),
            };
            SourceRun {
                source,
                attempts,
                elapsed: t0.elapsed(),
                result,
            }
        });
    }

    let mut report = CollectionReport::default();
    while let Some(joined) = set.join_next().await {
        let run = match joined {
            Ok(run) => run,
            Err(e) => {
                tracing::error!(target: "ingest", error = %e, "collector task died");
                counter!("collector_errors_total", "source" => "unknown", "kind" => "panic")
                    .increment(1);
                continue;
            }
        };
        let source = run.source.to_string();
        counter!("collector_runs_total", "source" => source.clone()).increment(1);
        histogram!("collector_fetch_ms", "source" => source.clone())
            .record(run.elapsed.as_secs_f64() * 1_000.0);
        match &run.result {
            Ok(out) => {
                counter!("collector_items_total", "source" => source.clone())
                    .increment(out.items.len() as u64);
                tracing::info!(
                    target: "ingest",
                    source = %run.source,
                    items = out.items.len(),
                    failures = out.failures.len(),
                    attempts = run.attempts,
                    "collector done"
                );
            }
            Err(e) => {
                counter!("collector_errors_total", "source" => source.clone(), "kind" => error_kind(e))
                    .increment(1);
                tracing::warn!(
                    target: "ingest",
                    source = %run.source,
                    attempts = run.attempts,
                    error = %e,
                    "collector skipped for this run"
                );
            }
        }
        report.runs.push(run);
    }
    report.runs.sort_by(|a, b| a.source.cmp(&b.source));
    report
}

/// Turn a collector outcome into the snapshot that gets persisted: items
/// outside the window dropped, topics grouped, top terms listed.
pub fn build_snapshot(
    source: SourceName,
    timestamp: DateTime<Utc>,
    window: TimeWindow,
    outcome: &CollectOutcome,
    aggregator: &Aggregator,
    trend_count: usize,
) -> LearningSnapshot {
    let items: Vec<_> = outcome
        .items
        .iter()
        .filter(|it| window.admits(it))
        .cloned()
        .collect();
    let mut snap = LearningSnapshot::new(source, timestamp, items);
    snap.window = Some(window);
    snap.topics = aggregator.topics().group_titles(&snap.items);
    snap.trends = aggregator.top_terms(&snap.items, trend_count);
    if !outcome.failures.is_empty() {
        counter!("collector_partial_total").increment(1);
        snap.failure = Some(format!(
            "{} sub-request(s) failed: {}",
            outcome.failures.len(),
            outcome.failures.join("; ")
        ));
    }
    snap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_decodes_and_collapses() {
        let s = "  <b>Rust</b>&nbsp;&nbsp; 1.80 &ldquo;ships&rdquo;  ";
        assert_eq!(normalize_text(s), "Rust 1.80 \"ships\"");
    }

    #[test]
    fn normalize_text_caps_length() {
        let long = "a".repeat(2000);
        assert_eq!(normalize_text(&long).chars().count(), 1500);
    }

    #[test]
    fn backoff_doubles() {
        let r = RetryPolicy {
            attempts: 4,
            base_delay: Duration::from_millis(500),
        };
        assert_eq!(r.backoff(1), Duration::from_millis(500));
        assert_eq!(r.backoff(2), Duration::from_millis(1000));
        assert_eq!(r.backoff(3), Duration::from_millis(2000));
    }
}
