use crate::error::{AppError, Result};

pub const ROGUE_INFO_URL: &str = "https://zonai.skland.com/api/v1/game/arknights/rogue";

/// Theme analyzed when THEME is not set.
pub const DEFAULT_THEME: &str = "萨卡兹的无终奇语";

/// Number of most recent runs detailed in a report.
pub const RECENT_RUNS_COUNT: usize = 15;

/// Trailing window for the short-term statistics block.
pub const SEVEN_DAY_WINDOW_SECS: i64 = 7 * 24 * 3600;

/// Timeout for a single payload fetch.
pub const FETCH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Pull the payload from the companion API.
    Http,
    /// Replay a saved payload dump from disk.
    File,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Game account the history belongs to (PLAYER_UID)
    pub player_uid: String,
    /// Theme refreshed on startup and by the periodic ticker (THEME)
    pub theme: String,
    /// JSON file holding one ruleset per theme (RULESET_PATH)
    pub ruleset_path: String,
    /// Optional squad display-name aliases (ALIASES_PATH)
    pub aliases_path: String,
    pub recent_runs_count: usize,
    /// 0 disables periodic refresh (REFRESH_INTERVAL_SECS)
    pub refresh_interval_secs: u64,
    pub source: SourceKind,
    pub rogue_info_url: String,
    pub payload_file: String,
    /// Pre-authenticated request headers (API_HEADERS, comma-separated `name:value`).
    /// Example: "cred:abc,sign:def,timestamp:1700000000,platform:1"
    pub api_headers: Vec<(String, String)>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "rogue_data.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            player_uid: std::env::var("PLAYER_UID").unwrap_or_default(),
            theme: std::env::var("THEME").unwrap_or_else(|_| DEFAULT_THEME.to_string()),
            ruleset_path: std::env::var("RULESET_PATH")
                .unwrap_or_else(|_| "config/themes.json".to_string()),
            aliases_path: std::env::var("ALIASES_PATH")
                .unwrap_or_else(|_| "config/aliases.json".to_string()),
            recent_runs_count: parse_recent_runs_count(
                &std::env::var("RECENT_RUNS_COUNT").unwrap_or_else(|_| RECENT_RUNS_COUNT.to_string()),
            )?,
            refresh_interval_secs: std::env::var("REFRESH_INTERVAL_SECS")
                .unwrap_or_else(|_| "0".to_string())
                .parse::<u64>()
                .map_err(|_| {
                    AppError::Config("REFRESH_INTERVAL_SECS must be a whole number".to_string())
                })?,
            source: parse_source_kind(
                &std::env::var("PAYLOAD_SOURCE").unwrap_or_else(|_| "http".to_string()),
            )?,
            rogue_info_url: std::env::var("ROGUE_INFO_URL")
                .unwrap_or_else(|_| ROGUE_INFO_URL.to_string()),
            payload_file: std::env::var("PAYLOAD_FILE")
                .unwrap_or_else(|_| "data/rogue_payload.json".to_string()),
            api_headers: parse_header_list(&std::env::var("API_HEADERS").unwrap_or_default()),
        })
    }
}

fn parse_source_kind(s: &str) -> Result<SourceKind> {
    match s.trim().to_lowercase().as_str() {
        "http" => Ok(SourceKind::Http),
        "file" => Ok(SourceKind::File),
        other => Err(AppError::Config(format!(
            "PAYLOAD_SOURCE must be \"http\" or \"file\", got \"{other}\""
        ))),
    }
}

fn parse_recent_runs_count(s: &str) -> Result<usize> {
    s.trim()
        .parse::<usize>()
        .map_err(|_| AppError::Config("RECENT_RUNS_COUNT must be a whole number".to_string()))
}

/// `cred:abc, sign:def` → [("cred", "abc"), ("sign", "def")]. Entries without a colon are dropped.
pub fn parse_header_list(s: &str) -> Vec<(String, String)> {
    s.split(',')
        .filter_map(|entry| {
            let (name, value) = entry.split_once(':')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_list_skips_malformed_entries() {
        let headers = parse_header_list("cred: abc ,bogus, sign:d:e,:x");
        assert_eq!(
            headers,
            vec![
                ("cred".to_string(), "abc".to_string()),
                ("sign".to_string(), "d:e".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_recent_runs_count_is_a_config_error() {
        assert_eq!(parse_recent_runs_count(" 20 ").unwrap(), 20);
        let err = parse_recent_runs_count("fifteen").unwrap_err();
        assert!(matches!(err, AppError::Config(ref m) if m.contains("RECENT_RUNS_COUNT")));
    }

    #[test]
    fn source_kind_is_case_insensitive() {
        assert_eq!(parse_source_kind("FILE").unwrap(), SourceKind::File);
        assert!(parse_source_kind("ftp").is_err());
    }
}
