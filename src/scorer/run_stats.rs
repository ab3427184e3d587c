use std::collections::HashMap;

use crate::classifier::{classify, is_notable};
use crate::ruleset::{SquadAliases, ThemeRuleset};
use crate::types::{RunRecord, SquadCount, StatsSummary};

/// Runs that count toward statistics: score strictly above the theme minimum.
pub fn valid_runs<'a>(records: &'a [RunRecord], rules: &ThemeRuleset) -> Vec<&'a RunRecord> {
    records
        .iter()
        .filter(|r| r.score > rules.analysis_rules.min_score)
        .collect()
}

/// Subset whose start falls inside the trailing `window_secs` before `now`.
/// Order is preserved.
pub fn within_window<'a>(records: &[&'a RunRecord], now: i64, window_secs: i64) -> Vec<&'a RunRecord> {
    let since = now - window_secs;
    records
        .iter()
        .copied()
        .filter(|r| r.start_ts > since)
        .collect()
}

/// Aggregate statistics over runs given most-recent-first.
pub fn compute_stats<'a, I>(records: I, rules: &ThemeRuleset) -> StatsSummary
where
    I: IntoIterator<Item = &'a RunRecord>,
{
    let (wins, notables): (Vec<bool>, Vec<bool>) = records
        .into_iter()
        .map(|r| {
            let notable = is_notable(r, &classify(r, rules), rules);
            (r.success, notable)
        })
        .unzip();

    let total = wins.len();
    StatsSummary {
        win_rate: format_rate(count_true(&wins), total),
        max_streak: max_streak(&wins),
        current_streak: current_streak(&wins),
        notable_rate: format_rate(count_true(&notables), total),
        max_notable_streak: max_streak(&notables),
        current_notable_streak: current_streak(&notables),
    }
}

fn count_true(flags: &[bool]) -> usize {
    flags.iter().filter(|&&f| f).count()
}

/// `hits / total` as a two-decimal percentage. "0.00%" when there is nothing to count.
pub fn format_rate(hits: usize, total: usize) -> String {
    if total == 0 {
        return "0.00%".to_string();
    }
    format!("{:.2}%", hits as f64 / total as f64 * 100.0)
}

/// Longest run of consecutive `true` anywhere in the sequence.
pub fn max_streak(flags: &[bool]) -> usize {
    let mut best = 0;
    let mut current = 0;
    for &hit in flags {
        if hit {
            current += 1;
        } else {
            best = best.max(current);
            current = 0;
        }
    }
    best.max(current)
}

/// Consecutive `true` values counted from the front (the most recent run)
/// up to the first `false`.
pub fn current_streak(flags: &[bool]) -> usize {
    flags.iter().take_while(|&&hit| hit).count()
}

/// How often each squad was picked, most used first. Unnamed squads are not counted.
pub fn squad_frequency(records: &[&RunRecord], aliases: &SquadAliases) -> Vec<SquadCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for squad in records.iter().filter_map(|r| r.squad.as_deref()) {
        *counts.entry(aliases.resolve(squad)).or_insert(0) += 1;
    }

    let mut frequency: Vec<SquadCount> = counts
        .into_iter()
        .map(|(squad, count)| SquadCount {
            squad: squad.to_string(),
            count,
        })
        .collect();
    frequency.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.squad.cmp(&b.squad)));
    frequency
}
