//! Unit tests for submit validation

use super::submit::*;
use crate::domain::problem::{Alternative, Criterion, PairwiseComparison, PreferenceType};
use crate::domain::DecisionProblem;
use std::collections::BTreeMap;

fn item(name: &str) -> SubmitItem {
    SubmitItem {
        name: name.to_string(),
        problem: DecisionProblem {
            criteria: vec![Criterion {
                id: "c1".into(),
                name: "cost".into(),
                gain: false,
                linear_segments: 0,
            }],
            alternatives: vec![
                Alternative {
                    id: "a".into(),
                    name: "A".into(),
                    performances: BTreeMap::from([("c1".to_string(), 1.0)]),
                },
                Alternative {
                    id: "b".into(),
                    name: "B".into(),
                    performances: BTreeMap::from([("c1".to_string(), 2.0)]),
                },
            ],
            comparisons: vec![],
            preference_intensities: vec![],
            positions: vec![],
            samples: 0,
        },
    }
}

#[test]
fn test_validate_name_empty() {
    let result = validate_item(&item("  "));
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("empty"));
}

#[test]
fn test_validate_name_too_long() {
    let result = validate_item(&item(&"a".repeat(256)));
    assert!(result.unwrap_err().to_string().contains("too long"));
}

#[test]
fn test_validate_project_id() {
    assert!(validate_project_id("").is_err());
    assert!(validate_project_id(&"p".repeat(129)).is_err());
    assert!(validate_project_id("project-7").is_ok());
}

#[test]
fn test_problem_errors_carry_item_name() {
    let mut bad = item("ranking");
    bad.problem.criteria.clear();
    let err = validate_item(&bad).unwrap_err();
    assert!(matches!(err, crate::error::AppError::Validation(_)));
    assert!(err.to_string().contains("ranking"));
}

#[test]
fn test_contradictory_preferences_accepted() {
    let mut ok = item("cycle");
    ok.problem.comparisons = vec![
        PairwiseComparison {
            alternative_1: "a".into(),
            alternative_2: "b".into(),
            kind: PreferenceType::Preference,
        },
        PairwiseComparison {
            alternative_1: "b".into(),
            alternative_2: "a".into(),
            kind: PreferenceType::Preference,
        },
    ];
    assert!(validate_item(&ok).is_ok());
}
