use std::cmp::Ordering;

use crate::ruleset::{Templates, ThemeRuleset};
use crate::types::RunRecord;

/// Classification of a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub label: String,
    pub is_rolling: bool,
    /// Resolved ending names in label order. Empty for failed runs.
    pub endings: Vec<String>,
}

impl Outcome {
    pub fn has_ending(&self, name: &str) -> bool {
        self.endings.iter().any(|e| e == name)
    }
}

/// Classify a run against its theme's ending rules. Pure: same record and
/// ruleset always give the same outcome.
pub fn classify(record: &RunRecord, rules: &ThemeRuleset) -> Outcome {
    let endings_cfg = &rules.ending_rules;
    let templates = &rules.templates;

    let is_rolling = endings_cfg
        .rolling_relic
        .as_ref()
        .is_some_and(|relic| record.relics.contains(relic));

    if !record.success {
        let stage = record
            .last_stage
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&templates.unknown_stage);
        let template = if is_rolling {
            &templates.failure_rolling
        } else {
            &templates.failure
        };
        return Outcome {
            label: Templates::render(template, stage),
            is_rolling,
            endings: Vec::new(),
        };
    }

    let has_relic = |relic: &str| record.relics.contains(relic);

    let leading = endings_cfg
        .second_tier_ending
        .as_ref()
        .filter(|name| endings_cfg.rule(name).is_some_and(|r| has_relic(&r.relic)))
        .unwrap_or(&endings_cfg.default_ending)
        .clone();

    let mut others: Vec<String> = endings_cfg
        .rules
        .iter()
        .filter(|r| r.name != leading && r.name != endings_cfg.default_ending)
        .filter(|r| has_relic(&r.relic))
        .map(|r| r.name.clone())
        .collect();
    others.sort_by(|a, b| compare_ending_names(a, b));

    let mut endings = Vec::with_capacity(others.len() + 1);
    endings.push(leading);
    endings.extend(others);

    let mut combination = endings.concat();

    let reached_terminal = endings_cfg
        .terminal_ending
        .as_ref()
        .is_some_and(|terminal| endings.contains(terminal));
    if reached_terminal {
        if let Some(companion) = endings_cfg.companions.iter().find(|c| has_relic(&c.relic)) {
            combination.push(' ');
            combination.push_str(&companion.name);
        }
    }

    let template = if is_rolling {
        &templates.success_rolling
    } else {
        &templates.success
    };

    Outcome {
        label: Templates::render(template, &combination),
        is_rolling,
        endings,
    }
}

/// Numeric order when both names are integers, lexical otherwise.
fn compare_ending_names(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// Whether a classified run counts toward the notable-ending statistics.
pub fn is_notable(record: &RunRecord, outcome: &Outcome, rules: &ThemeRuleset) -> bool {
    record.success && outcome.has_ending(&rules.stats_definitions.notable.ending_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ruleset::fixtures::sample_ruleset;
    use std::collections::{BTreeMap, BTreeSet};

    fn run(success: bool, relics: &[&str], last_stage: Option<&str>) -> RunRecord {
        RunRecord {
            id: "r".to_string(),
            owner_uid: "u".to_string(),
            theme: "t".to_string(),
            start_ts: 1_700_000_000,
            end_ts: 1_700_003_600,
            difficulty: "15".to_string(),
            squad: None,
            score: 500,
            success,
            last_stage: last_stage.map(str::to_string),
            relics: relics.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            totems: BTreeMap::new(),
        }
    }

    #[test]
    fn default_ending_prefixes_sorted_others() {
        let outcome = classify(&run(true, &["R3"], None), &sample_ruleset());
        assert_eq!(outcome.label, "Ending: 13");
        assert!(!outcome.is_rolling);
        assert_eq!(outcome.endings, vec!["1", "3"]);
    }

    #[test]
    fn no_flags_still_reaches_default_ending() {
        let outcome = classify(&run(true, &[], None), &sample_ruleset());
        assert_eq!(outcome.label, "Ending: 1");
    }

    #[test]
    fn second_tier_relic_replaces_default() {
        let outcome = classify(&run(true, &["R5", "R2", "R3"], None), &sample_ruleset());
        assert_eq!(outcome.label, "Ending: 235");
        assert_eq!(outcome.endings, vec!["2", "3", "5"]);
    }

    #[test]
    fn first_matching_companion_is_appended_once() {
        let outcome = classify(
            &run(true, &["R5", "EGG_SILVER", "EGG_GOLD"], None),
            &sample_ruleset(),
        );
        assert_eq!(outcome.label, "Ending: 15 Gold");
    }

    #[test]
    fn terminal_without_companion_has_no_suffix() {
        let outcome = classify(&run(true, &["R5"], None), &sample_ruleset());
        assert_eq!(outcome.label, "Ending: 15");
    }

    #[test]
    fn companion_ignored_without_terminal_ending() {
        let outcome = classify(&run(true, &["R3", "EGG_GOLD"], None), &sample_ruleset());
        assert_eq!(outcome.label, "Ending: 13");
    }

    #[test]
    fn rolling_success_uses_rolling_template() {
        let outcome = classify(&run(true, &["ROLL", "R2"], None), &sample_ruleset());
        assert_eq!(outcome.label, "Ending: rolling 2");
        assert!(outcome.is_rolling);
    }

    #[test]
    fn failure_reports_halt_stage() {
        let outcome = classify(&run(false, &[], Some("BOSS_NODE")), &sample_ruleset());
        assert_eq!(outcome.label, "Halted at: BOSS_NODE");
        assert!(!outcome.is_rolling);
        assert!(outcome.endings.is_empty());
    }

    #[test]
    fn failure_without_stage_uses_fallback() {
        let outcome = classify(&run(false, &["ROLL"], None), &sample_ruleset());
        assert_eq!(outcome.label, "Halted at: 事件 (rolling)");
        assert!(outcome.is_rolling);
    }

    #[test]
    fn failure_ignores_ending_relics() {
        let outcome = classify(&run(false, &["R5"], Some("X")), &sample_ruleset());
        assert_eq!(outcome.label, "Halted at: X");
    }

    #[test]
    fn classification_is_deterministic() {
        let rules = sample_ruleset();
        let record = run(true, &["R5", "R3", "ROLL", "EGG_SILVER"], None);
        let first = classify(&record, &rules);
        for _ in 0..10 {
            assert_eq!(classify(&record, &rules), first);
        }
    }

    #[test]
    fn numeric_names_sort_numerically() {
        assert_eq!(compare_ending_names("10", "9"), Ordering::Greater);
        assert_eq!(compare_ending_names("b", "a"), Ordering::Greater);
    }

    #[test]
    fn notable_requires_success_and_ending() {
        let rules = sample_ruleset();
        let win = run(true, &["R5"], None);
        assert!(is_notable(&win, &classify(&win, &rules), &rules));

        let plain = run(true, &["R3"], None);
        assert!(!is_notable(&plain, &classify(&plain, &rules), &rules));

        let loss = run(false, &["R5"], None);
        assert!(!is_notable(&loss, &classify(&loss, &rules), &rules));
    }
}
