//! Decision problem submitted for a UTA-GMS computation.
//!
//! Only structural well-formedness is checked here. Preference constraints
//! that contradict each other are a valid submission: the solver reports
//! them as an infeasibility marker.

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Upper bound for sampler samples per problem
pub const MAX_SAMPLES: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    pub name: String,
    /// Gain criterion (higher is better) vs cost criterion
    pub gain: bool,
    /// 0 means a general (non piecewise-linear) marginal function
    #[serde(default)]
    pub linear_segments: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub id: String,
    pub name: String,
    /// criterion id -> performance value
    pub performances: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreferenceType {
    #[serde(rename = ">")]
    Preference,
    #[serde(rename = ">=")]
    WeakPreference,
    #[serde(rename = "=")]
    Indifference,
}

/// `alternative_1 {>, >=, =} alternative_2`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseComparison {
    pub alternative_1: String,
    pub alternative_2: String,
    #[serde(rename = "type")]
    pub kind: PreferenceType,
}

/// `(alternative_1, alternative_2) {>, >=, =} (alternative_3, alternative_4)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceIntensity {
    pub alternative_1: String,
    pub alternative_2: String,
    pub alternative_3: String,
    pub alternative_4: String,
    #[serde(rename = "type")]
    pub kind: PreferenceType,
    /// Restrict the intensity to one criterion (None = comprehensive)
    #[serde(default)]
    pub criterion: Option<String>,
}

/// Best/worst position an alternative may take in the final ranking (1-based)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionConstraint {
    pub alternative: String,
    pub best_position: u32,
    pub worst_position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionProblem {
    pub criteria: Vec<Criterion>,
    pub alternatives: Vec<Alternative>,
    #[serde(default)]
    pub comparisons: Vec<PairwiseComparison>,
    #[serde(default)]
    pub preference_intensities: Vec<PreferenceIntensity>,
    #[serde(default)]
    pub positions: Vec<PositionConstraint>,
    /// Number of sampler samples; 0 turns the sampler off
    #[serde(default)]
    pub samples: u32,
}

impl DecisionProblem {
    pub fn sampler_enabled(&self) -> bool {
        self.samples > 0
    }
}

fn invalid(msg: impl Into<String>) -> DomainError {
    DomainError::ValidationError(msg.into())
}

fn unique_ids<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<HashSet<&'a str>> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(invalid(format!("{} id cannot be empty", kind)));
        }
        if !seen.insert(id) {
            return Err(invalid(format!("duplicate {} id '{}'", kind, id)));
        }
    }
    Ok(seen)
}

fn known(set: &HashSet<&str>, id: &str, context: &str) -> Result<()> {
    if set.contains(id) {
        Ok(())
    } else {
        Err(invalid(format!("{} references unknown alternative '{}'", context, id)))
    }
}

/// Structural validation of a submission
///
/// Rejects: empty criteria or alternatives, duplicate ids, missing or
/// non-finite performances, references to unknown alternatives/criteria,
/// self-comparisons, out-of-range positions and sample counts.
pub fn validate_problem(problem: &DecisionProblem) -> Result<()> {
    if problem.criteria.is_empty() {
        return Err(invalid("criteria set cannot be empty"));
    }
    if problem.alternatives.is_empty() {
        return Err(invalid("alternatives set cannot be empty"));
    }
    if problem.samples > MAX_SAMPLES {
        return Err(invalid(format!(
            "samples {} out of range (0-{})",
            problem.samples, MAX_SAMPLES
        )));
    }

    let criteria = unique_ids("criterion", problem.criteria.iter().map(|c| c.id.as_str()))?;
    let alternatives = unique_ids(
        "alternative",
        problem.alternatives.iter().map(|a| a.id.as_str()),
    )?;

    for alt in &problem.alternatives {
        for criterion in &problem.criteria {
            match alt.performances.get(&criterion.id) {
                None => {
                    return Err(invalid(format!(
                        "alternative '{}' has no performance on criterion '{}'",
                        alt.id, criterion.id
                    )))
                }
                Some(v) if !v.is_finite() => {
                    return Err(invalid(format!(
                        "alternative '{}' has a non-finite performance on criterion '{}'",
                        alt.id, criterion.id
                    )))
                }
                Some(_) => {}
            }
        }
        if let Some(extra) = alt.performances.keys().find(|k| !criteria.contains(k.as_str())) {
            return Err(invalid(format!(
                "alternative '{}' has a performance on unknown criterion '{}'",
                alt.id, extra
            )));
        }
    }

    for cmp in &problem.comparisons {
        known(&alternatives, &cmp.alternative_1, "comparison")?;
        known(&alternatives, &cmp.alternative_2, "comparison")?;
        if cmp.alternative_1 == cmp.alternative_2 {
            return Err(invalid(format!(
                "comparison of alternative '{}' with itself",
                cmp.alternative_1
            )));
        }
    }

    for intensity in &problem.preference_intensities {
        for alt in [
            &intensity.alternative_1,
            &intensity.alternative_2,
            &intensity.alternative_3,
            &intensity.alternative_4,
        ] {
            known(&alternatives, alt, "preference intensity")?;
        }
        if let Some(criterion) = &intensity.criterion {
            if !criteria.contains(criterion.as_str()) {
                return Err(invalid(format!(
                    "preference intensity references unknown criterion '{}'",
                    criterion
                )));
            }
        }
    }

    let n = problem.alternatives.len() as u32;
    let mut positioned = HashSet::new();
    for pos in &problem.positions {
        known(&alternatives, &pos.alternative, "position constraint")?;
        if !positioned.insert(pos.alternative.as_str()) {
            return Err(invalid(format!(
                "duplicate position constraint for alternative '{}'",
                pos.alternative
            )));
        }
        if pos.best_position < 1 || pos.worst_position > n || pos.best_position > pos.worst_position
        {
            return Err(invalid(format!(
                "position constraint for '{}' must satisfy 1 <= best ({}) <= worst ({}) <= {}",
                pos.alternative, pos.best_position, pos.worst_position, n
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem() -> DecisionProblem {
        let criteria = vec![
            Criterion { id: "c1".into(), name: "price".into(), gain: false, linear_segments: 2 },
            Criterion { id: "c2".into(), name: "quality".into(), gain: true, linear_segments: 0 },
        ];
        let alternatives = ["a", "b", "c"]
            .iter()
            .enumerate()
            .map(|(i, id)| Alternative {
                id: id.to_string(),
                name: id.to_uppercase(),
                performances: BTreeMap::from([
                    ("c1".to_string(), i as f64),
                    ("c2".to_string(), 10.0 - i as f64),
                ]),
            })
            .collect();
        DecisionProblem {
            criteria,
            alternatives,
            comparisons: vec![PairwiseComparison {
                alternative_1: "a".into(),
                alternative_2: "b".into(),
                kind: PreferenceType::Preference,
            }],
            preference_intensities: vec![],
            positions: vec![],
            samples: 100,
        }
    }

    #[test]
    fn test_valid_problem() {
        assert!(validate_problem(&problem()).is_ok());
    }

    #[test]
    fn test_empty_criteria_rejected() {
        let mut p = problem();
        p.criteria.clear();
        for alt in &mut p.alternatives {
            alt.performances.clear();
        }
        let err = validate_problem(&p).unwrap_err();
        assert!(err.to_string().contains("criteria set cannot be empty"));
    }

    #[test]
    fn test_missing_performance_rejected() {
        let mut p = problem();
        p.alternatives[1].performances.remove("c2");
        let err = validate_problem(&p).unwrap_err();
        assert!(err.to_string().contains("no performance"));
    }

    #[test]
    fn test_non_finite_performance_rejected() {
        let mut p = problem();
        p.alternatives[0].performances.insert("c1".into(), f64::NAN);
        assert!(validate_problem(&p).is_err());
    }

    #[test]
    fn test_self_comparison_rejected() {
        let mut p = problem();
        p.comparisons[0].alternative_2 = "a".into();
        let err = validate_problem(&p).unwrap_err();
        assert!(err.to_string().contains("itself"));
    }

    #[test]
    fn test_unknown_alternative_rejected() {
        let mut p = problem();
        p.comparisons[0].alternative_2 = "zzz".into();
        assert!(validate_problem(&p).is_err());
    }

    #[test]
    fn test_contradictory_preferences_are_structurally_valid() {
        let mut p = problem();
        p.comparisons.push(PairwiseComparison {
            alternative_1: "b".into(),
            alternative_2: "a".into(),
            kind: PreferenceType::Preference,
        });
        assert!(validate_problem(&p).is_ok());
    }

    #[test]
    fn test_position_range() {
        let mut p = problem();
        p.positions.push(PositionConstraint {
            alternative: "c".into(),
            best_position: 2,
            worst_position: 4,
        });
        assert!(validate_problem(&p).is_err());

        p.positions[0].worst_position = 3;
        assert!(validate_problem(&p).is_ok());
    }

    #[test]
    fn test_samples_out_of_range() {
        let mut p = problem();
        p.samples = MAX_SAMPLES + 1;
        let err = validate_problem(&p).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_intensity_unknown_criterion() {
        let mut p = problem();
        p.preference_intensities.push(PreferenceIntensity {
            alternative_1: "a".into(),
            alternative_2: "b".into(),
            alternative_3: "b".into(),
            alternative_4: "c".into(),
            kind: PreferenceType::WeakPreference,
            criterion: Some("c9".into()),
        });
        assert!(validate_problem(&p).is_err());
    }

    #[test]
    fn test_wire_format_uses_symbols() {
        let json = serde_json::json!({
            "criteria": [{"id": "c1", "name": "x", "gain": true}],
            "alternatives": [{"id": "a", "name": "A", "performances": {"c1": 1.0}},
                             {"id": "b", "name": "B", "performances": {"c1": 2.0}}],
            "comparisons": [{"alternative_1": "a", "alternative_2": "b", "type": ">="}]
        });
        let p: DecisionProblem = serde_json::from_value(json).unwrap();
        assert_eq!(p.comparisons[0].kind, PreferenceType::WeakPreference);
        assert_eq!(p.samples, 0);
        assert!(!p.sampler_enabled());
    }
}
