use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::classifier::classify;
use crate::config::SEVEN_DAY_WINDOW_SECS;
use crate::db::RunStore;
use crate::error::{AppError, Result};
use crate::fetcher::extract_records;
use crate::ruleset::{Rulesets, SquadAliases, ThemeRuleset};
use crate::scorer::{compute_stats, squad_frequency, valid_runs, within_window};
use crate::types::{RawPayload, RecentRun, Report, RunRecord, Stats, ThemeSummary};

/// Turns a raw payload into a report: merge new runs, re-read the whole
/// history, classify, and aggregate.
pub struct Analyzer {
    store: Arc<RunStore>,
    rulesets: Rulesets,
    aliases: SquadAliases,
    recent_runs_count: usize,
}

impl Analyzer {
    pub fn new(
        store: Arc<RunStore>,
        rulesets: Rulesets,
        aliases: SquadAliases,
        recent_runs_count: usize,
    ) -> Self {
        Self {
            store,
            rulesets,
            aliases,
            recent_runs_count,
        }
    }

    /// `now` is epoch seconds and anchors the trailing 7-day window.
    pub async fn analyze(&self, uid: &str, payload: &RawPayload, theme: &str, now: i64) -> Result<Report> {
        if !payload.topics.iter().any(|t| t.name == theme) {
            return Err(AppError::ThemeNotFound(theme.to_string()));
        }

        let rules = self
            .rulesets
            .get(theme)
            .ok_or_else(|| AppError::MissingRuleset(theme.to_string()))?;

        let raw_runs = payload
            .history
            .as_ref()
            .map(|h| h.records.as_slice())
            .unwrap_or_default();
        let new_runs = extract_records(raw_runs, uid, theme, &rules.keys);
        self.store.merge_runs(uid, theme, &new_runs).await?;

        let all_runs = self.store.get_all_runs(uid, theme).await?;
        if all_runs.is_empty() {
            return Err(AppError::NoData(theme.to_string()));
        }

        let valid = valid_runs(&all_runs, rules);
        let seven_day = within_window(&valid, now, SEVEN_DAY_WINDOW_SECS);
        debug!(
            theme,
            fetched = new_runs.len(),
            stored = all_runs.len(),
            valid = valid.len(),
            seven_day = seven_day.len(),
            "Analyzing run history"
        );

        let stats = Stats {
            total_runs: valid.len(),
            total_stats: compute_stats(valid.iter().copied(), rules),
            seven_day_runs: seven_day.len(),
            seven_day_stats: compute_stats(seven_day.iter().copied(), rules),
            squad_frequency: squad_frequency(&valid, &self.aliases),
        };

        let detailed_recent_runs = all_runs
            .iter()
            .take(self.recent_runs_count)
            .map(|r| recent_run(r, rules, &self.aliases))
            .collect();

        info!(
            theme,
            total_runs = stats.total_runs,
            win_rate = %stats.total_stats.win_rate,
            "Analysis complete"
        );

        Ok(Report {
            player_info: payload.game_user_info.clone(),
            career_summary: payload.career.clone(),
            stats,
            theme_summary: ThemeSummary {
                name: theme.to_string(),
                detailed_recent_runs,
            },
        })
    }
}

fn recent_run(record: &RunRecord, rules: &ThemeRuleset, aliases: &SquadAliases) -> RecentRun {
    let outcome = classify(record, rules);
    let totem_count = rules
        .analysis_rules
        .primary_totem
        .as_deref()
        .map_or(0, |totem| record.totem_count(totem));

    RecentRun {
        difficulty: record.difficulty.clone(),
        squad: record
            .squad
            .as_deref()
            .map_or_else(|| "N/A".to_string(), |s| aliases.resolve(s).to_string()),
        score: record.score,
        is_success: record.success,
        ending: outcome.label,
        is_rolling: outcome.is_rolling,
        start_date: format_start_date(record.start_ts),
        duration_hours: format_duration(record),
        totem_count,
    }
}

/// Month-day of the run start in local time.
pub fn format_start_date(ts: i64) -> String {
    if ts == 0 {
        return "N/A".to_string();
    }
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.with_timezone(&Local).format("%m-%d").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

pub fn format_duration(record: &RunRecord) -> String {
    record
        .duration_hours()
        .map_or_else(|| "N/A".to_string(), |h| format!("{h:.1}h"))
}
