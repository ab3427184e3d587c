use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::analysis::Analyzer;
use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::error::Result;
use crate::fetcher::PayloadSource;
use crate::state::{Delivered, ReportCache};
use crate::types::Report;

/// Runs fetch + analysis off the caller's task. Every submitted request
/// runs to completion and delivers exactly once.
pub struct RefreshService {
    source: Arc<dyn PayloadSource>,
    analyzer: Arc<Analyzer>,
    cache: Arc<ReportCache>,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
    uid: String,
    next_seq: AtomicU64,
}

impl RefreshService {
    pub fn new(
        source: Arc<dyn PayloadSource>,
        analyzer: Arc<Analyzer>,
        cache: Arc<ReportCache>,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
        uid: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            analyzer,
            cache,
            health,
            latency,
            uid,
            next_seq: AtomicU64::new(1),
        })
    }

    /// Spawn a refresh for `theme`. The outcome is written to the report
    /// cache and sent on the returned channel; dropping the receiver does
    /// not cancel the pass.
    pub fn submit(self: &Arc<Self>, theme: &str) -> oneshot::Receiver<Result<Arc<Report>>> {
        let (tx, rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let theme = theme.to_string();
        let this = Arc::clone(self);

        self.health.refresh_started();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = this.refresh(&theme).await.map(Arc::new);
            this.latency.record(started.elapsed());

            let now = chrono::Utc::now().timestamp();
            match &result {
                Ok(report) => {
                    info!(
                        theme = %theme,
                        seq,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Refresh delivered"
                    );
                    this.cache.deliver(&theme, Delivered::Report(Arc::clone(report)), now, seq);
                    this.health.refresh_succeeded(now);
                }
                Err(e) => {
                    if e.is_recoverable() {
                        warn!(theme = %theme, seq, "Refresh produced no report: {e}");
                    } else {
                        error!(theme = %theme, seq, "Refresh failed: {e}");
                    }
                    this.cache.deliver(&theme, Delivered::Error(e.to_string()), now, seq);
                    this.health.refresh_failed(now, e.to_string());
                }
            }

            // Receiver may be gone; the cache already has the outcome.
            let _ = tx.send(result);
        });

        rx
    }

    /// Re-submit `theme` every `interval_secs`. 0 disables the ticker.
    pub async fn run(self: Arc<Self>, theme: String, interval_secs: u64) {
        if interval_secs == 0 {
            return;
        }

        let mut ticker = interval(Duration::from_secs(interval_secs));
        ticker.tick().await; // skip immediate first tick, startup already submitted

        loop {
            ticker.tick().await;
            if self.submit(&theme).await.is_err() {
                error!(theme = %theme, "Refresh task dropped before delivering");
            }
        }
    }

    async fn refresh(&self, theme: &str) -> Result<Report> {
        let payload = self.source.fetch_rogue_payload(&self.uid).await?;
        let now = chrono::Utc::now().timestamp();
        self.analyzer.analyze(&self.uid, &payload, theme, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RunStore;
    use crate::error::AppError;
    use crate::ruleset::fixtures::{rulesets_with, sample_ruleset};
    use crate::ruleset::SquadAliases;
    use crate::types::{History, RawPayload, Topic};
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticSource(RawPayload);

    #[async_trait]
    impl PayloadSource for StaticSource {
        async fn fetch_rogue_payload(&self, _uid: &str) -> Result<RawPayload> {
            Ok(self.0.clone())
        }
    }

    struct DownSource;

    #[async_trait]
    impl PayloadSource for DownSource {
        async fn fetch_rogue_payload(&self, _uid: &str) -> Result<RawPayload> {
            Err(AppError::Fetch("provider unreachable".to_string()))
        }
    }

    fn payload() -> RawPayload {
        RawPayload {
            topics: vec![Topic { name: "T".to_string() }],
            history: Some(History {
                records: vec![json!({
                    "id": "a", "startTs": 1_000, "endTs": 4_600, "modeGrade": 3,
                    "score": 300, "success": true, "gainRelicList": []
                })],
            }),
            ..RawPayload::default()
        }
    }

    async fn service(source: Arc<dyn PayloadSource>) -> Arc<RefreshService> {
        let store = Arc::new(RunStore::open_in_memory().await.unwrap());
        let analyzer = Arc::new(Analyzer::new(
            store,
            rulesets_with("T", sample_ruleset()),
            SquadAliases::default(),
            15,
        ));
        RefreshService::new(
            source,
            analyzer,
            ReportCache::new(),
            Arc::new(HealthState::new()),
            Arc::new(LatencyStats::new()),
            "u".to_string(),
        )
    }

    #[tokio::test]
    async fn submit_delivers_report_to_caller_and_cache() {
        let svc = service(Arc::new(StaticSource(payload()))).await;

        let report = svc.submit("T").await.unwrap().unwrap();
        assert_eq!(report.stats.total_runs, 1);
        assert_eq!(report.theme_summary.detailed_recent_runs[0].ending, "Ending: 1");

        let entry = svc.cache.get("T").unwrap();
        assert_eq!(entry.request_seq, 1);
        assert!(matches!(entry.delivered, Delivered::Report(ref r) if r.stats.total_runs == 1));
        assert!(svc.health.last_success_at() > 0);
        assert_eq!(svc.health.refreshes_in_flight(), 0);
        assert_eq!(svc.latency.len(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_is_delivered_as_error() {
        let svc = service(Arc::new(DownSource)).await;

        let err = svc.submit("T").await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::Fetch(_)), "{err}");

        let entry = svc.cache.get("T").unwrap();
        assert!(matches!(entry.delivered, Delivered::Error(ref m) if m.contains("unreachable")));
        assert!(svc.health.last_error().is_some());
    }

    #[tokio::test]
    async fn dropped_receiver_still_updates_cache() {
        let svc = service(Arc::new(StaticSource(payload()))).await;
        drop(svc.submit("T"));

        let second = svc.submit("T").await.unwrap().unwrap();
        assert_eq!(second.stats.total_runs, 1);
        for _ in 0..50 {
            if svc.health.refreshes_completed() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(svc.health.refreshes_completed(), 2);
    }

    #[tokio::test]
    async fn zero_interval_returns_immediately() {
        let svc = service(Arc::new(DownSource)).await;
        svc.clone().run("T".to_string(), 0).await;
        assert_eq!(svc.health.refreshes_completed(), 0);
    }
}
