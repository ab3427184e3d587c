use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Run history
// ---------------------------------------------------------------------------

/// One roguelike play-through, normalized from a raw API dict.
/// Immutable once stored; identified by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub owner_uid: String,
    pub theme: String,
    /// Epoch seconds, 0 when unknown.
    pub start_ts: i64,
    /// Epoch seconds, 0 when unknown.
    pub end_ts: i64,
    pub difficulty: String,
    pub squad: Option<String>,
    pub score: i64,
    pub success: bool,
    pub last_stage: Option<String>,
    #[serde(default)]
    pub relics: BTreeSet<String>,
    #[serde(default)]
    pub totems: BTreeMap<String, i64>,
}

impl RunRecord {
    /// Run length in hours, None if either endpoint is unknown.
    pub fn duration_hours(&self) -> Option<f64> {
        if self.start_ts == 0 || self.end_ts == 0 {
            return None;
        }
        Some((self.end_ts - self.start_ts) as f64 / 3600.0)
    }

    pub fn totem_count(&self, totem_id: &str) -> i64 {
        self.totems.get(totem_id).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Raw provider payload
// ---------------------------------------------------------------------------

/// The `data` document of the rogue info endpoint. Only the parts the
/// analyzer reads are typed; run dicts stay untyped because their field
/// names vary per theme.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPayload {
    #[serde(deserialize_with = "null_as_default")]
    pub topics: Vec<Topic>,
    pub history: Option<History>,
    #[serde(deserialize_with = "null_as_default")]
    pub career: CareerSummary,
    #[serde(deserialize_with = "null_as_default")]
    pub game_user_info: PlayerInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Topic {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct History {
    #[serde(deserialize_with = "null_as_default")]
    pub records: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CareerSummary {
    #[serde(deserialize_with = "lenient_i64")]
    pub invest: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub node: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub step: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerInfo {
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub level: Option<i64>,
}

/// Provider documents send `null` where a field has nothing to report.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Counters arrive as numbers or numeric strings; anything else reads as unknown.
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Report: the structure handed to presentation clients
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    /// Percentage with two decimals, e.g. "66.67%".
    pub win_rate: String,
    pub max_streak: usize,
    pub current_streak: usize,
    pub notable_rate: String,
    pub max_notable_streak: usize,
    pub current_notable_streak: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SquadCount {
    pub squad: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_runs: usize,
    pub total_stats: StatsSummary,
    pub seven_day_runs: usize,
    pub seven_day_stats: StatsSummary,
    pub squad_frequency: Vec<SquadCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentRun {
    pub difficulty: String,
    pub squad: String,
    pub score: i64,
    pub is_success: bool,
    pub ending: String,
    pub is_rolling: bool,
    /// "%m-%d" in local time.
    pub start_date: String,
    /// "2.5h", or "N/A" when a timestamp is missing.
    pub duration_hours: String,
    pub totem_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeSummary {
    pub name: String,
    pub detailed_recent_runs: Vec<RecentRun>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub player_info: PlayerInfo,
    pub career_summary: CareerSummary,
    pub stats: Stats,
    pub theme_summary: ThemeSummary,
}
