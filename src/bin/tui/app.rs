use serde::Deserialize;

// ---------------------------------------------------------------------------
// API response types (mirror the analyzer's report shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerInfo {
    pub name: Option<String>,
    pub level: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CareerSummary {
    pub invest: Option<i64>,
    pub node: Option<i64>,
    pub step: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsSummary {
    pub win_rate: String,
    pub max_streak: usize,
    pub current_streak: usize,
    pub notable_rate: String,
    pub max_notable_streak: usize,
    pub current_notable_streak: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SquadCount {
    pub squad: String,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Stats {
    pub total_runs: usize,
    pub total_stats: StatsSummary,
    pub seven_day_runs: usize,
    pub seven_day_stats: StatsSummary,
    pub squad_frequency: Vec<SquadCount>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RecentRun {
    pub difficulty: String,
    pub squad: String,
    pub score: i64,
    pub is_success: bool,
    pub ending: String,
    pub is_rolling: bool,
    pub start_date: String,
    pub duration_hours: String,
    pub totem_count: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ThemeSummary {
    pub name: String,
    pub detailed_recent_runs: Vec<RecentRun>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Report {
    pub player_info: PlayerInfo,
    pub career_summary: CareerSummary,
    pub stats: Stats,
    pub theme_summary: ThemeSummary,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ConnectionStatus,
    pub report: Option<Report>,
    /// Message from the analyzer when it has no report to show.
    pub report_error: Option<String>,
    pub latency: LatencyResponse,
    pub refreshing: bool,
    pub last_refresh: std::time::Instant,
    pub base_url: String,
    pub theme: String,
}

impl AppState {
    pub fn new(base_url: String, theme: String) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            report: None,
            report_error: None,
            latency: LatencyResponse::default(),
            refreshing: false,
            last_refresh: std::time::Instant::now(),
            base_url,
            theme,
        }
    }

    /// Poll the last delivered report.
    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let report_url = format!("{}/report/{}", self.base_url, self.theme);
        let latency_url = format!("{}/stats/latency", self.base_url);

        let (report_res, latency_res) = tokio::join!(
            client.get(&report_url).send(),
            client.get(&latency_url).send(),
        );

        match report_res {
            Ok(resp) => self.apply_report_response(resp).await,
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("{e}"));
                return;
            }
        }

        if let Ok(l) = latency_res {
            if let Ok(latency) = l.json::<LatencyResponse>().await {
                self.latency = latency;
            }
        }
    }

    /// Ask the analyzer for a fresh pass and wait for its result.
    pub async fn request_analysis(&mut self, client: &reqwest::Client) {
        let url = format!("{}/refresh/{}", self.base_url, self.theme);
        self.refreshing = true;
        match client.post(&url).send().await {
            Ok(resp) => self.apply_report_response(resp).await,
            Err(e) => self.status = ConnectionStatus::Error(format!("{e}")),
        }
        self.refreshing = false;
    }

    async fn apply_report_response(&mut self, resp: reqwest::Response) {
        self.status = ConnectionStatus::Connected;
        self.last_refresh = std::time::Instant::now();

        if resp.status().is_success() {
            match resp.json::<Report>().await {
                Ok(report) => {
                    self.report = Some(report);
                    self.report_error = None;
                }
                Err(e) => self.status = ConnectionStatus::Error(format!("parse error: {e}")),
            }
        } else {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            self.report_failed(error_message(&text).unwrap_or_else(|| status.to_string()));
        }
    }

    /// The analyzer's latest delivery was an error; stop showing the older report.
    pub fn report_failed(&mut self, message: String) {
        self.report = None;
        self.report_error = Some(message);
    }
}

/// Extract the message from an `{"error": ...}` body.
pub fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body).ok().map(|b| b.error)
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

pub fn format_opt(v: Option<i64>) -> String {
    v.map_or("—".to_string(), |n| n.to_string())
}

pub fn format_ms(v: Option<f64>) -> String {
    v.map_or("—".to_string(), |ms| format!("{ms:.0}ms"))
}

/// Parse "66.67%" back to a number for colouring.
pub fn rate_value(rate: &str) -> Option<f64> {
    rate.trim_end_matches('%').parse().ok()
}

/// Truncate to `max` characters, counting chars rather than bytes.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate("完成结局: 滚动 15", 6), "完成结局:…");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn error_body_is_unwrapped() {
        assert_eq!(
            error_message(r#"{"error":"No run history available"}"#).as_deref(),
            Some("No run history available")
        );
        assert_eq!(error_message("<html>"), None);
    }

    #[test]
    fn rate_parses_percent_strings() {
        assert_eq!(rate_value("66.67%"), Some(66.67));
        assert_eq!(rate_value("n/a"), None);
    }

    #[test]
    fn failed_delivery_replaces_shown_report() {
        let mut app = AppState::new("http://localhost:3000".to_string(), "t".to_string());
        app.report = Some(Report::default());

        app.report_failed("Last refresh for theme \"t\" failed: down".to_string());
        assert!(app.report.is_none());
        assert_eq!(
            app.report_error.as_deref(),
            Some("Last refresh for theme \"t\" failed: down")
        );
    }

    #[test]
    fn partial_report_deserializes() {
        let report: Report =
            serde_json::from_str(r#"{"stats":{"totalRuns":3},"themeSummary":{"name":"t"}}"#).unwrap();
        assert_eq!(report.stats.total_runs, 3);
        assert_eq!(report.theme_summary.name, "t");
        assert!(report.theme_summary.detailed_recent_runs.is_empty());
    }
}
