//! Trifecta qualification scoring.
//!
//! Evaluates a merged race against a configurable rule set: field size of
//! priced runners, the favourite's odds and the second favourite's odds.
//! Every factor reports points, the bound it tested and a human-readable
//! explanation, pass or fail. Scoring is a pure function of its inputs.

use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{
    EngineError, FactorResult, NormalizedRace, QualificationResult, RunnerKey, ScoredRace,
};

pub const FACTOR_FIELD_SIZE: &str = "field_size";
pub const FACTOR_FAVORITE: &str = "favorite_odds";
pub const FACTOR_SECOND_FAVORITE: &str = "second_favorite_odds";
pub const FACTOR_INSUFFICIENT: &str = "insufficient_odds";

// ---------------------------------------------------------------------------
// Rule set
// ---------------------------------------------------------------------------

/// Qualification rules, supplied by configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Minimum total score for a race to qualify.
    pub threshold: Decimal,
    pub field_size: FieldSizeRule,
    pub favorite: OddsRule,
    pub second_favorite: OddsRule,
}

/// Field size of priced runners, scored by the first band that contains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSizeRule {
    pub bands: Vec<FieldSizeBand>,
    /// Points when no band matches. May be negative.
    #[serde(default)]
    pub miss_points: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSizeBand {
    pub min: usize,
    pub max: usize,
    pub points: Decimal,
}

/// Inclusive odds bounds; either side may be open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsRule {
    #[serde(default)]
    pub min: Option<Decimal>,
    #[serde(default)]
    pub max: Option<Decimal>,
    pub points: Decimal,
}

impl OddsRule {
    fn accepts(&self, odds: Decimal) -> bool {
        self.min.map_or(true, |min| odds >= min) && self.max.map_or(true, |max| odds <= max)
    }

    fn describe(&self) -> String {
        match (self.min, self.max) {
            (Some(min), Some(max)) => format!("{min} to {max}"),
            (Some(min), None) => format!(">= {min}"),
            (None, Some(max)) => format!("<= {max}"),
            (None, None) => "any".to_string(),
        }
    }
}

impl FieldSizeRule {
    fn describe(&self) -> String {
        self.bands
            .iter()
            .map(|b| format!("{}-{} ({} pts)", b.min, b.max, b.points))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl RuleSet {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.field_size.bands.is_empty() {
            return Err(EngineError::RuleSet("field_size needs at least one band".into()));
        }
        for band in &self.field_size.bands {
            if band.min > band.max {
                return Err(EngineError::RuleSet(format!(
                    "field_size band {}-{} has min above max",
                    band.min, band.max
                )));
            }
        }
        for (name, rule) in [("favorite", &self.favorite), ("second_favorite", &self.second_favorite)] {
            if let (Some(min), Some(max)) = (rule.min, rule.max) {
                if min > max {
                    return Err(EngineError::RuleSet(format!("{name}: min {min} above max {max}")));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Score one race. Scratched and unpriced runners are ignored here but
/// stay in the race's runner list.
pub fn score(race: &NormalizedRace, rules: &RuleSet) -> QualificationResult {
    let mut priced: Vec<(RunnerKey, Decimal)> = race
        .priced_runners()
        .filter_map(|r| r.best_odds().map(|o| (r.key(), o)))
        .collect();
    // Ties on price are broken by runner key so the order is total.
    priced.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let mut factors = IndexMap::new();

    if priced.is_empty() {
        factors.insert(
            FACTOR_INSUFFICIENT.to_string(),
            FactorResult {
                points: Decimal::ZERO,
                threshold: "at least 1 priced runner".to_string(),
                applicable: true,
                passed: false,
                explanation: "insufficient odds data".to_string(),
            },
        );
        return QualificationResult {
            qualified: false,
            total_score: Decimal::ZERO,
            factors,
        };
    }

    factors.insert(FACTOR_FIELD_SIZE.to_string(), field_size_factor(priced.len(), &rules.field_size));

    if priced.len() < 2 {
        for name in [FACTOR_FAVORITE, FACTOR_SECOND_FAVORITE] {
            factors.insert(name.to_string(), not_applicable(name, rules));
        }
    } else {
        let (fav_key, fav_odds) = &priced[0];
        let (second_key, second_odds) = &priced[1];
        factors.insert(
            FACTOR_FAVORITE.to_string(),
            odds_factor("Favorite", fav_key, *fav_odds, &rules.favorite),
        );
        factors.insert(
            FACTOR_SECOND_FAVORITE.to_string(),
            odds_factor("Second favorite", second_key, *second_odds, &rules.second_favorite),
        );
    }

    let total_score: Decimal = factors.values().map(|f| f.points).sum();
    let qualified = total_score >= rules.threshold;

    debug!(
        venue = %race.venue,
        race_number = race.race_number,
        priced = priced.len(),
        score = %total_score,
        qualified,
        "Race scored"
    );

    QualificationResult {
        qualified,
        total_score,
        factors,
    }
}

/// Score every race, preserving input order.
pub fn score_all(races: Vec<NormalizedRace>, rules: &RuleSet) -> Vec<ScoredRace> {
    let scored: Vec<ScoredRace> = races
        .into_iter()
        .map(|race| {
            let qualification = score(&race, rules);
            ScoredRace { race, qualification }
        })
        .collect();

    info!(
        races = scored.len(),
        qualified = scored.iter().filter(|s| s.qualification.qualified).count(),
        "Qualification complete"
    );
    scored
}

fn field_size_factor(size: usize, rule: &FieldSizeRule) -> FactorResult {
    let threshold = rule.describe();
    match rule.bands.iter().find(|b| (b.min..=b.max).contains(&size)) {
        Some(band) => FactorResult {
            points: band.points,
            threshold,
            applicable: true,
            passed: true,
            explanation: format!("{size} priced runners, within {}-{}", band.min, band.max),
        },
        None => FactorResult {
            points: rule.miss_points,
            threshold,
            applicable: true,
            passed: false,
            explanation: format!("{size} priced runners, outside every band"),
        },
    }
}

fn odds_factor(label: &str, key: &RunnerKey, odds: Decimal, rule: &OddsRule) -> FactorResult {
    let passed = rule.accepts(odds);
    FactorResult {
        points: if passed { rule.points } else { Decimal::ZERO },
        threshold: rule.describe(),
        applicable: true,
        passed,
        explanation: if passed {
            format!("{label} {key} at {odds} is within {}", rule.describe())
        } else {
            format!("{label} {key} at {odds} is outside {}", rule.describe())
        },
    }
}

fn not_applicable(name: &str, rules: &RuleSet) -> FactorResult {
    let rule = if name == FACTOR_FAVORITE { &rules.favorite } else { &rules.second_favorite };
    FactorResult {
        points: Decimal::ZERO,
        threshold: rule.describe(),
        applicable: false,
        passed: false,
        explanation: "not applicable: fewer than 2 priced runners".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
