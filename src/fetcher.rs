use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{Config, SourceKind, FETCH_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::ruleset::FieldKeys;
use crate::types::{RawPayload, RunRecord};

/// Delivers the provider's rogue info document for a player. Authentication
/// and request signing live behind this seam.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    async fn fetch_rogue_payload(&self, uid: &str) -> Result<RawPayload>;
}

pub fn source_from_config(cfg: &Config) -> Result<Arc<dyn PayloadSource>> {
    Ok(match cfg.source {
        SourceKind::Http => Arc::new(HttpPayloadSource::new(
            cfg.rogue_info_url.clone(),
            cfg.api_headers.clone(),
        )?),
        SourceKind::File => Arc::new(FilePayloadSource::new(cfg.payload_file.clone())),
    })
}

/// Response wrapper used by every companion API endpoint.
#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<RawPayload>,
}

fn unwrap_envelope(envelope: Envelope) -> Result<RawPayload> {
    if envelope.code != 0 {
        return Err(AppError::Fetch(format!(
            "provider returned code {}: {}",
            envelope.code,
            envelope.message.unwrap_or_else(|| "unknown error".to_string())
        )));
    }
    envelope
        .data
        .ok_or_else(|| AppError::Fetch("provider response has no data".to_string()))
}

// ---------------------------------------------------------------------------
// HTTP source
// ---------------------------------------------------------------------------

pub struct HttpPayloadSource {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
}

impl HttpPayloadSource {
    pub fn new(url: String, headers: Vec<(String, String)>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, url, headers })
    }
}

#[async_trait]
impl PayloadSource for HttpPayloadSource {
    async fn fetch_rogue_payload(&self, uid: &str) -> Result<RawPayload> {
        let mut request = self.client.get(&self.url).query(&[("uid", uid)]);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let envelope: Envelope = request.send().await?.error_for_status()?.json().await?;
        let payload = unwrap_envelope(envelope)?;
        debug!(
            uid,
            topics = payload.topics.len(),
            records = payload.history.as_ref().map_or(0, |h| h.records.len()),
            "Fetched rogue payload"
        );
        Ok(payload)
    }
}

// ---------------------------------------------------------------------------
// File source
// ---------------------------------------------------------------------------

/// Replays a saved payload dump. Accepts either the bare `data` document or
/// the full `{code, message, data}` envelope.
pub struct FilePayloadSource {
    path: PathBuf,
}

impl FilePayloadSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PayloadSource for FilePayloadSource {
    async fn fetch_rogue_payload(&self, uid: &str) -> Result<RawPayload> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let value: Value = serde_json::from_str(&text)?;
        let payload = if value.get("code").is_some() {
            unwrap_envelope(serde_json::from_value(value)?)?
        } else {
            serde_json::from_value(value)?
        };
        info!(uid, path = %self.path.display(), "Loaded rogue payload from file");
        Ok(payload)
    }
}

// ---------------------------------------------------------------------------
// Raw run dict → RunRecord
// ---------------------------------------------------------------------------

/// Normalize raw run dicts through the theme's key mapping. Malformed fields
/// fall back to defaults; a missing id yields an empty id, which the store
/// skips.
pub fn extract_records(raw: &[Value], uid: &str, theme: &str, keys: &FieldKeys) -> Vec<RunRecord> {
    raw.iter().map(|v| parse_run(v, uid, theme, keys)).collect()
}

pub fn parse_run(v: &Value, uid: &str, theme: &str, keys: &FieldKeys) -> RunRecord {
    let relics: BTreeSet<String> = lookup(v, &keys.relics)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|r| r.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    RunRecord {
        id: lookup(v, &keys.id).and_then(lenient_string).unwrap_or_default(),
        owner_uid: uid.to_string(),
        theme: theme.to_string(),
        start_ts: lookup(v, &keys.start_ts).and_then(lenient_i64).unwrap_or(0),
        end_ts: lookup(v, &keys.end_ts).and_then(lenient_i64).unwrap_or(0),
        difficulty: lookup(v, &keys.difficulty)
            .and_then(lenient_string)
            .unwrap_or_else(|| "N/A".to_string()),
        squad: lookup(v, &keys.squad)
            .and_then(lenient_string)
            .filter(|s| !s.is_empty()),
        score: lookup(v, &keys.score).and_then(lenient_i64).unwrap_or(0),
        success: lookup(v, &keys.success).is_some_and(lenient_bool),
        last_stage: lookup(v, &keys.last_stage)
            .and_then(lenient_string)
            .filter(|s| !s.is_empty()),
        relics,
        totems: parse_totems(lookup(v, &keys.totems), keys),
    }
}

/// Follow a dotted path (`band.name`) through nested objects.
fn lookup<'a>(v: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(v, |node, segment| node.get(segment))
        .filter(|found| !found.is_null())
}

fn lenient_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_i64(v: &Value) -> Option<i64> {
    v.as_i64()
        .or_else(|| v.as_f64().map(|f| f as i64))
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn lenient_bool(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Totems arrive either as `[{id, count}, ...]` or as an `{id: count}` map.
/// Repeated ids are summed.
fn parse_totems(v: Option<&Value>, keys: &FieldKeys) -> BTreeMap<String, i64> {
    let mut totems = BTreeMap::new();
    match v {
        Some(Value::Array(items)) => {
            for item in items {
                let Some(id) = item.get(&keys.totem_id).and_then(lenient_string) else {
                    continue;
                };
                let count = item.get(&keys.totem_count).and_then(lenient_i64).unwrap_or(0);
                *totems.entry(id).or_insert(0) += count;
            }
        }
        Some(Value::Object(map)) => {
            for (id, count) in map {
                *totems.entry(id.clone()).or_insert(0) += lenient_i64(count).unwrap_or(0);
            }
        }
        _ => {}
    }
    totems
}
