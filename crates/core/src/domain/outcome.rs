// Solver Outcome Domain Model
//
// Infeasibility is a valid outcome, not an error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedAlternative {
    pub alternative: String,
    /// 1-based position in the representative ranking
    pub position: u32,
    pub value: f64,
}

/// Extreme ranking intervals (pessimistic / optimistic approach)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtremeRank {
    pub alternative: String,
    pub pessimistic_best: u32,
    pub pessimistic_worst: u32,
    pub optimistic_best: u32,
    pub optimistic_worst: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionPoint {
    pub abscissa: f64,
    pub ordinate: f64,
}

/// Marginal value function of one criterion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionFunction {
    pub criterion: String,
    pub points: Vec<FunctionPoint>,
}

/// `alternative_1` is (necessarily/possibly) at least as good as `alternative_2`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub alternative_1: String,
    pub alternative_2: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptabilityIndex {
    pub alternative: String,
    pub position: u32,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseWinning {
    pub alternative_1: String,
    pub alternative_2: String,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub ranking: Vec<RankedAlternative>,
    #[serde(default)]
    pub extreme_ranks: Vec<ExtremeRank>,
    #[serde(default)]
    pub functions: Vec<CriterionFunction>,
    #[serde(default)]
    pub necessary: Vec<Relation>,
    #[serde(default)]
    pub possible: Vec<Relation>,
    #[serde(default)]
    pub acceptability_indices: Vec<AcceptabilityIndex>,
    #[serde(default)]
    pub pairwise_winnings: Vec<PairwiseWinning>,
    #[serde(default)]
    pub samples_used: u32,
    /// Sampler failed or was off; the LP part of the solution still stands
    #[serde(default)]
    pub sampler_error: Option<String>,
}

impl Solution {
    /// Alternatives in ranking order
    pub fn ranked_ids(&self) -> Vec<&str> {
        let mut ranking: Vec<&RankedAlternative> = self.ranking.iter().collect();
        ranking.sort_by_key(|r| r.position);
        ranking.iter().map(|r| r.alternative.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyKind {
    Preference,
    WeakPreference,
    Indifference,
    Position,
    Intensity,
}

/// One constraint taking part in an inconsistency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inconsistency {
    /// Constraints in the same group must be removed together to restore consistency
    pub group: u32,
    pub kind: InconsistencyKind,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Infeasibility {
    #[serde(default)]
    pub inconsistencies: Vec<Inconsistency>,
}

impl Infeasibility {
    pub fn groups(&self) -> BTreeMap<u32, Vec<&Inconsistency>> {
        let mut groups: BTreeMap<u32, Vec<&Inconsistency>> = BTreeMap::new();
        for inc in &self.inconsistencies {
            groups.entry(inc.group).or_default().push(inc);
        }
        groups
    }
}

/// Structured output of one solver run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SolverOutcome {
    Solved(Solution),
    Infeasible(Infeasibility),
}

impl SolverOutcome {
    pub fn is_infeasible(&self) -> bool {
        matches!(self, SolverOutcome::Infeasible(_))
    }

    pub fn solution(&self) -> Option<&Solution> {
        match self {
            SolverOutcome::Solved(s) => Some(s),
            SolverOutcome::Infeasible(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_solved_with_defaults() {
        let json = r#"{
            "status": "solved",
            "ranking": [
                {"alternative": "b", "position": 2, "value": 0.4},
                {"alternative": "a", "position": 1, "value": 0.9}
            ],
            "sampler_error": "Sampler turned off"
        }"#;
        let outcome: SolverOutcome = serde_json::from_str(json).unwrap();
        let solution = outcome.solution().unwrap();
        assert_eq!(solution.ranked_ids(), vec!["a", "b"]);
        assert!(solution.extreme_ranks.is_empty());
        assert_eq!(solution.sampler_error.as_deref(), Some("Sampler turned off"));
    }

    #[test]
    fn test_parse_infeasible_groups() {
        let json = r#"{
            "status": "infeasible",
            "inconsistencies": [
                {"group": 1, "kind": "preference", "data": "a > b"},
                {"group": 1, "kind": "preference", "data": "b > a"},
                {"group": 2, "kind": "position", "data": "c in [1, 1]"}
            ]
        }"#;
        let outcome: SolverOutcome = serde_json::from_str(json).unwrap();
        assert!(outcome.is_infeasible());
        match outcome {
            SolverOutcome::Infeasible(inf) => {
                let groups = inf.groups();
                assert_eq!(groups.len(), 2);
                assert_eq!(groups[&1].len(), 2);
            }
            SolverOutcome::Solved(_) => panic!("expected infeasible"),
        }
    }

    #[test]
    fn test_unknown_status_is_malformed() {
        let json = r#"{"status": "maybe"}"#;
        assert!(serde_json::from_str::<SolverOutcome>(json).is_err());
    }
}
