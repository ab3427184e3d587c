//! Typed per-theme rule tables.
//!
//! A ruleset tells the engine where each logical field lives in a raw run
//! dict, which relics map to which ending numbers, how labels are worded and
//! what counts as a valid or notable run. Rulesets are loaded once from JSON
//! and validated up front so classification never trips over a missing key.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{AppError, Result};

pub const PLACEHOLDER: &str = "{}";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeRuleset {
    pub keys: FieldKeys,
    pub ending_rules: EndingRules,
    pub templates: Templates,
    pub analysis_rules: AnalysisRules,
    pub stats_definitions: StatsDefinitions,
}

/// Raw field names for each logical record field. Dotted paths address
/// nested objects (`band.name`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldKeys {
    pub id: String,
    pub start_ts: String,
    pub end_ts: String,
    pub difficulty: String,
    pub squad: String,
    pub score: String,
    pub success: String,
    pub last_stage: String,
    pub relics: String,
    pub totems: String,
    #[serde(default = "default_totem_id_key")]
    pub totem_id: String,
    #[serde(default = "default_totem_count_key")]
    pub totem_count: String,
}

fn default_totem_id_key() -> String {
    "id".to_string()
}

fn default_totem_count_key() -> String {
    "count".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NamedRelic {
    pub name: String,
    pub relic: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndingRules {
    /// Ending name → relic that proves it, in declared order.
    pub rules: Vec<NamedRelic>,
    /// Ending every successful run reaches unless overridden.
    pub default_ending: String,
    /// Rule that, when its relic is present, takes the default's leading slot.
    #[serde(default)]
    pub second_tier_ending: Option<String>,
    /// Ending that unlocks companion suffixes.
    #[serde(default)]
    pub terminal_ending: Option<String>,
    #[serde(default)]
    pub rolling_relic: Option<String>,
    /// Checked in order; the first one present wins.
    #[serde(default)]
    pub companions: Vec<NamedRelic>,
}

impl EndingRules {
    pub fn rule(&self, name: &str) -> Option<&NamedRelic> {
        self.rules.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Templates {
    pub success: String,
    pub success_rolling: String,
    pub failure: String,
    pub failure_rolling: String,
    #[serde(default = "default_unknown_stage")]
    pub unknown_stage: String,
}

fn default_unknown_stage() -> String {
    "事件".to_string()
}

impl Templates {
    pub fn render(template: &str, value: &str) -> String {
        template.replacen(PLACEHOLDER, value, 1)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRules {
    /// Runs scoring at or below this are stored but left out of statistics.
    pub min_score: i64,
    #[serde(default)]
    pub primary_totem: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsDefinitions {
    pub notable: NotableRule,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotableRule {
    /// Ending a successful run must have reached to count as notable.
    pub ending_name: String,
}

impl ThemeRuleset {
    /// Reject rulesets that would otherwise fail deep inside classification.
    pub fn validate(&self, theme: &str) -> Result<()> {
        let fail = |msg: String| Err(AppError::Config(format!("ruleset \"{theme}\": {msg}")));

        let k = &self.keys;
        for (field, value) in [
            ("id", &k.id),
            ("startTs", &k.start_ts),
            ("endTs", &k.end_ts),
            ("difficulty", &k.difficulty),
            ("squad", &k.squad),
            ("score", &k.score),
            ("success", &k.success),
            ("lastStage", &k.last_stage),
            ("relics", &k.relics),
            ("totems", &k.totems),
            ("totemId", &k.totem_id),
            ("totemCount", &k.totem_count),
        ] {
            if value.trim().is_empty() {
                return fail(format!("keys.{field} is empty"));
            }
        }

        let e = &self.ending_rules;
        if e.default_ending.is_empty() {
            return fail("endingRules.defaultEnding is empty".to_string());
        }
        let mut seen = HashSet::new();
        for rule in &e.rules {
            if rule.name.is_empty() || rule.relic.is_empty() {
                return fail("endingRules.rules entries need a name and a relic".to_string());
            }
            if !seen.insert(rule.name.as_str()) {
                return fail(format!("ending \"{}\" is declared twice", rule.name));
            }
        }
        if let Some(second) = &e.second_tier_ending {
            if e.rule(second).is_none() {
                return fail(format!("secondTierEnding \"{second}\" has no rule"));
            }
        }
        if let Some(terminal) = &e.terminal_ending {
            if e.rule(terminal).is_none() && *terminal != e.default_ending {
                return fail(format!("terminalEnding \"{terminal}\" has no rule"));
            }
        }

        let t = &self.templates;
        for (field, template) in [
            ("success", &t.success),
            ("successRolling", &t.success_rolling),
            ("failure", &t.failure),
            ("failureRolling", &t.failure_rolling),
        ] {
            if !template.contains(PLACEHOLDER) {
                return fail(format!("templates.{field} lacks a {PLACEHOLDER} placeholder"));
            }
        }

        if self.stats_definitions.notable.ending_name.is_empty() {
            return fail("statsDefinitions.notable.endingName is empty".to_string());
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ruleset registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Rulesets {
    themes: HashMap<String, ThemeRuleset>,
}

impl Rulesets {
    pub fn from_json(json: &str) -> Result<Self> {
        let themes: HashMap<String, ThemeRuleset> = serde_json::from_str(json)
            .map_err(|e| AppError::Config(format!("invalid ruleset file: {e}")))?;
        for (theme, ruleset) in &themes {
            ruleset.validate(theme)?;
        }
        Ok(Self { themes })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read ruleset file {}: {e}", path.display()))
        })?;
        let rulesets = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            themes = rulesets.themes.len(),
            "Loaded theme rulesets"
        );
        Ok(rulesets)
    }

    pub fn get(&self, theme: &str) -> Option<&ThemeRuleset> {
        self.themes.get(theme)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.themes.keys().cloned().collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// Squad aliases
// ---------------------------------------------------------------------------

/// Display-name overrides for squads. A missing or broken file disables
/// aliasing instead of failing startup.
#[derive(Debug, Clone, Default)]
pub struct SquadAliases {
    aliases: HashMap<String, String>,
}

impl SquadAliases {
    #[cfg(test)]
    pub fn new(aliases: HashMap<String, String>) -> Self {
        Self { aliases }
    }

    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| {
                serde_json::from_str::<HashMap<String, String>>(&s).map_err(|e| e.to_string())
            });
        match parsed {
            Ok(aliases) => {
                info!(path = %path.display(), count = aliases.len(), "Loaded squad aliases");
                Self { aliases }
            }
            Err(e) => {
                warn!("Squad aliases unavailable ({}): {e}; showing raw squad names", path.display());
                Self::default()
            }
        }
    }

    pub fn resolve<'a>(&'a self, squad: &'a str) -> &'a str {
        self.aliases.get(squad).map(String::as_str).unwrap_or(squad)
    }
}

#[cfg(test)]
pub mod fixtures {
    use super::*;

    /// Small ruleset: default ending "1", endings 2/3/5, rolling flag "ROLL",
    /// companions on ending 5.
    pub fn sample_ruleset() -> ThemeRuleset {
        let json = r#"{
            "keys": {
                "id": "id", "startTs": "startTs", "endTs": "endTs",
                "difficulty": "modeGrade", "squad": "band.name", "score": "score",
                "success": "success", "lastStage": "lastStage",
                "relics": "gainRelicList", "totems": "totemList"
            },
            "endingRules": {
                "rules": [
                    {"name": "2", "relic": "R2"},
                    {"name": "3", "relic": "R3"},
                    {"name": "5", "relic": "R5"}
                ],
                "defaultEnding": "1",
                "secondTierEnding": "2",
                "terminalEnding": "5",
                "rollingRelic": "ROLL",
                "companions": [
                    {"name": "Gold", "relic": "EGG_GOLD"},
                    {"name": "Silver", "relic": "EGG_SILVER"}
                ]
            },
            "templates": {
                "success": "Ending: {}",
                "successRolling": "Ending: rolling {}",
                "failure": "Halted at: {}",
                "failureRolling": "Halted at: {} (rolling)"
            },
            "analysisRules": {"minScore": 100, "primaryTotem": "TOTEM"},
            "statsDefinitions": {"notable": {"endingName": "5"}}
        }"#;
        let ruleset: ThemeRuleset = serde_json::from_str(json).expect("fixture parses");
        ruleset.validate("sample").expect("fixture is valid");
        ruleset
    }

    pub fn rulesets_with(theme: &str, ruleset: ThemeRuleset) -> Rulesets {
        Rulesets {
            themes: HashMap::from([(theme.to_string(), ruleset)]),
        }
    }
}
