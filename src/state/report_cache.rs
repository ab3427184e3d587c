use std::sync::Arc;

use dashmap::DashMap;

use crate::types::Report;

/// Result of the most recently finished refresh for a theme.
#[derive(Debug, Clone)]
pub enum Delivered {
    Report(Arc<Report>),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct DeliveredEntry {
    pub delivered: Delivered,
    /// Epoch seconds of delivery.
    pub delivered_at: i64,
    /// Sequence number of the refresh request that produced it.
    pub request_seq: u64,
}

/// Last-delivered report per theme. Whichever refresh finishes last wins,
/// regardless of the order requests were submitted in.
#[derive(Default)]
pub struct ReportCache {
    entries: DashMap<String, DeliveredEntry>,
}

impl ReportCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deliver(&self, theme: &str, delivered: Delivered, delivered_at: i64, request_seq: u64) {
        self.entries.insert(
            theme.to_string(),
            DeliveredEntry {
                delivered,
                delivered_at,
                request_seq,
            },
        );
    }

    pub fn get(&self, theme: &str) -> Option<DeliveredEntry> {
        self.entries.get(theme).map(|e| e.value().clone())
    }

    pub fn themes(&self) -> Vec<String> {
        let mut themes: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        themes.sort();
        themes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_delivery_wins_even_if_older_request() {
        let cache = ReportCache::new();
        cache.deliver("t", Delivered::Error("newer request failed".into()), 100, 2);
        cache.deliver("t", Delivered::Error("older request failed".into()), 101, 1);

        let entry = cache.get("t").unwrap();
        assert_eq!(entry.request_seq, 1);
        assert!(matches!(entry.delivered, Delivered::Error(ref m) if m.starts_with("older")));
    }

    #[test]
    fn report_replaces_earlier_error() {
        let cache = ReportCache::new();
        cache.deliver("t", Delivered::Error("down".into()), 100, 1);
        cache.deliver("t", Delivered::Report(Arc::new(sample_report())), 160, 2);

        let entry = cache.get("t").unwrap();
        assert_eq!(entry.delivered_at, 160);
        assert!(matches!(entry.delivered, Delivered::Report(ref r) if r.stats.total_runs == 4));
        assert_eq!(cache.themes(), vec!["t".to_string()]);
    }

    fn sample_report() -> Report {
        serde_json::from_value(serde_json::json!({
            "playerInfo": {},
            "careerSummary": {},
            "stats": {
                "totalRuns": 4,
                "totalStats": summary(),
                "sevenDayRuns": 0,
                "sevenDayStats": summary(),
                "squadFrequency": []
            },
            "themeSummary": {"name": "t", "detailedRecentRuns": []}
        }))
        .unwrap()
    }

    fn summary() -> serde_json::Value {
        serde_json::json!({
            "winRate": "0.00%", "maxStreak": 0, "currentStreak": 0,
            "notableRate": "0.00%", "maxNotableStreak": 0, "currentNotableStreak": 0
        })
    }

    #[test]
    fn unknown_theme_is_empty() {
        let cache = ReportCache::new();
        assert!(cache.get("nope").is_none());
        assert!(cache.themes().is_empty());
    }
}
