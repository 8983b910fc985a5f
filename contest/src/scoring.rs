//! Group-stage scoring kernel.
//!
//! A submission and the ground truth are both partitions of 48 teams into 12
//! labelled groups of 4. Rules are ranked; the first condition that holds
//! decides the score, so at most one rule ever fires. Evaluation works on
//! sets, which makes it independent of the order teams were listed in.
//!
//! The payload arrives as free-form JSON. Historical clients wrapped each
//! team id in a single-element array, and that shape is still accepted and
//! flattened before scoring.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

/// Label → set of team ids. BTree containers keep every derived list in a
/// stable order regardless of input order.
pub type GroupMap = BTreeMap<String, BTreeSet<String>>;

pub const GROUP_LABELS: [&str; 12] =
    ["A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L"];

pub const GROUP_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rule {
    AllCorrect,
    TwoMisplaced,
    ThreeMisplaced,
    IranGroupCorrect,
    PerfectGroup,
    ThreeCorrect,
    NoMatch,
}

impl Rule {
    pub fn score(self) -> u32 {
        match self {
            Rule::AllCorrect => 100,
            Rule::TwoMisplaced => 80,
            Rule::ThreeMisplaced => 60,
            Rule::IranGroupCorrect => 50,
            Rule::PerfectGroup => 40,
            Rule::ThreeCorrect => 20,
            Rule::NoMatch => 0,
        }
    }

    /// Stable numeric tag kept in persisted result details.
    pub fn tag(self) -> u8 {
        match self {
            Rule::AllCorrect => 1,
            Rule::TwoMisplaced => 2,
            Rule::ThreeMisplaced => 3,
            Rule::IranGroupCorrect => 4,
            Rule::PerfectGroup => 5,
            Rule::ThreeCorrect => 6,
            Rule::NoMatch => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Rule::AllCorrect => "ALL_CORRECT",
            Rule::TwoMisplaced => "TWO_MISPLACED",
            Rule::ThreeMisplaced => "THREE_MISPLACED",
            Rule::IranGroupCorrect => "IRAN_GROUP_CORRECT",
            Rule::PerfectGroup => "PERFECT_GROUP",
            Rule::ThreeCorrect => "THREE_CORRECT",
            Rule::NoMatch => "NO_MATCH",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub rule: Rule,
    pub total_score: u32,
    /// Labels whose group matches the truth exactly.
    pub perfect_groups: Vec<String>,
    /// Teams sitting in their truth group, across all groups.
    pub correct_teams: usize,
    pub iran_group_correct: bool,
    /// Teams placed outside their truth group; populated for the two- and
    /// three-misplaced rules.
    pub misplaced_teams: Vec<String>,
    /// Identifying label for the single-group rules.
    pub group_name: Option<String>,
}

/// Normalize a stored payload into a [`GroupMap`].
///
/// Accepts either the bare label map or the `{"groups": {...}}` request
/// wrapper; team entries may be strings, numbers, or single-element arrays
/// of either. Anything else yields `None`.
pub fn normalize_payload(predict: &Value) -> Option<GroupMap> {
    let object = match predict.get("groups") {
        Some(groups) => groups.as_object()?,
        None => predict.as_object()?,
    };

    let mut map = GroupMap::new();
    for (label, teams) in object {
        let teams = teams.as_array()?;
        let mut set = BTreeSet::new();
        for entry in teams {
            set.insert(flatten_entry(entry)?);
        }
        map.insert(label.to_uppercase(), set);
    }

    Some(map)
}

fn flatten_entry(entry: &Value) -> Option<String> {
    match entry {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        // legacy clients wrap each id in its own array
        Value::Array(inner) if inner.len() == 1 => flatten_entry(&inner[0]),
        _ => None,
    }
}

/// Score a submission against the ground truth.
///
/// `designated` is the id of the team singled out by the fourth rule; when
/// it is absent from the tournament, that rule simply never fires.
pub fn score(user: &GroupMap, truth: &GroupMap, designated: Option<&str>) -> Outcome {
    let empty = BTreeSet::new();

    let mut misplaced_teams: Vec<String> = Vec::new();
    let mut perfect_groups: Vec<String> = Vec::new();
    let mut correct_teams = 0usize;
    let mut three_correct_group: Option<String> = None;

    for (label, truth_set) in truth {
        let user_set = user.get(label).unwrap_or(&empty);
        let overlap = user_set.intersection(truth_set).count();

        correct_teams += overlap;
        misplaced_teams.extend(user_set.difference(truth_set).cloned());

        if user_set == truth_set {
            perfect_groups.push(label.clone());
        }
        if overlap == 3 && three_correct_group.is_none() {
            three_correct_group = Some(label.clone());
        }
    }

    // groups the user invented have no truth counterpart; every team there is misplaced
    for (label, user_set) in user {
        if !truth.contains_key(label) {
            misplaced_teams.extend(user_set.iter().cloned());
        }
    }

    // the designated team's group label, kept when its placement and group
    // content both match the truth
    let designated_group = designated.and_then(|id| {
        let user_label = user.iter().find(|(_, set)| set.contains(id)).map(|(l, _)| l);
        let truth_label = truth.iter().find(|(_, set)| set.contains(id)).map(|(l, _)| l);

        match (user_label, truth_label) {
            (Some(ul), Some(tl)) if ul == tl && user.get(ul) == truth.get(tl) => {
                Some(tl.clone())
            }
            _ => None,
        }
    });
    let iran_group_correct = designated_group.is_some();

    let misplaced = misplaced_teams.len();
    let rule = if misplaced == 0 {
        Rule::AllCorrect
    } else if misplaced == 2 {
        Rule::TwoMisplaced
    } else if misplaced == 3 {
        Rule::ThreeMisplaced
    } else if iran_group_correct {
        Rule::IranGroupCorrect
    } else if !perfect_groups.is_empty() {
        Rule::PerfectGroup
    } else if three_correct_group.is_some() {
        Rule::ThreeCorrect
    } else {
        Rule::NoMatch
    };

    let group_name = match rule {
        Rule::IranGroupCorrect => designated_group,
        Rule::PerfectGroup => perfect_groups.first().cloned(),
        Rule::ThreeCorrect => three_correct_group,
        _ => None,
    };

    let misplaced_teams = match rule {
        Rule::TwoMisplaced | Rule::ThreeMisplaced => misplaced_teams,
        _ => Vec::new(),
    };

    Outcome {
        rule,
        total_score: rule.score(),
        perfect_groups,
        correct_teams,
        iran_group_correct,
        misplaced_teams,
        group_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Ground truth used across the tests: ids "1".."48" in label order, so
    /// A = {1,2,3,4}, B = {5,6,7,8}, …, L = {45,46,47,48}. Team "17" sits in
    /// group E and plays the designated role.
    fn truth() -> GroupMap {
        let mut map = GroupMap::new();
        for (index, label) in GROUP_LABELS.iter().enumerate() {
            let start = index * GROUP_SIZE + 1;
            let set: BTreeSet<String> = (start..start + GROUP_SIZE).map(|n| n.to_string()).collect();
            map.insert(label.to_string(), set);
        }
        map
    }

    const DESIGNATED: Option<&str> = Some("17");

    fn swap(map: &mut GroupMap, a: &str, from: &str, b: &str, to: &str) {
        map.get_mut(from).unwrap().remove(a);
        map.get_mut(to).unwrap().remove(b);
        map.get_mut(from).unwrap().insert(b.to_string());
        map.get_mut(to).unwrap().insert(a.to_string());
    }

    /// Rotate every group's members one label forward, except the listed
    /// labels which keep their truth content.
    fn rotate_except(keep: &[&str]) -> GroupMap {
        let truth = truth();
        let mut user = GroupMap::new();

        let rotated: Vec<&str> = GROUP_LABELS
            .iter()
            .filter(|l| !keep.contains(*l))
            .copied()
            .collect();

        for label in keep {
            user.insert(label.to_string(), truth[*label].clone());
        }
        for (index, label) in rotated.iter().enumerate() {
            let source = rotated[(index + 1) % rotated.len()];
            user.insert(label.to_string(), truth[source].clone());
        }

        user
    }

    #[test]
    fn test_perfect_submission() {
        let outcome = score(&truth(), &truth(), DESIGNATED);

        assert_eq!(outcome.rule, Rule::AllCorrect);
        assert_eq!(outcome.total_score, 100);
        assert_eq!(outcome.correct_teams, 48);
        assert_eq!(outcome.perfect_groups.len(), 12);
        assert!(outcome.iran_group_correct);
    }

    #[test]
    fn test_two_swapped_across_groups() {
        let mut user = truth();
        swap(&mut user, "1", "A", "5", "B");

        let outcome = score(&user, &truth(), DESIGNATED);

        assert_eq!(outcome.rule, Rule::TwoMisplaced);
        assert_eq!(outcome.total_score, 80);
        let misplaced: BTreeSet<&str> =
            outcome.misplaced_teams.iter().map(String::as_str).collect();
        assert_eq!(misplaced, BTreeSet::from(["1", "5"]));
    }

    #[test]
    fn test_three_cycle() {
        let mut user = truth();
        // 1 → B, 5 → C, 9 → A
        user.get_mut("A").unwrap().remove("1");
        user.get_mut("B").unwrap().remove("5");
        user.get_mut("C").unwrap().remove("9");
        user.get_mut("B").unwrap().insert("1".to_string());
        user.get_mut("C").unwrap().insert("5".to_string());
        user.get_mut("A").unwrap().insert("9".to_string());

        let outcome = score(&user, &truth(), DESIGNATED);

        assert_eq!(outcome.rule, Rule::ThreeMisplaced);
        assert_eq!(outcome.total_score, 60);
        assert_eq!(outcome.misplaced_teams.len(), 3);
    }

    #[test]
    fn test_designated_group_only_correct() {
        let user = rotate_except(&["E"]);

        let outcome = score(&user, &truth(), DESIGNATED);

        assert_eq!(outcome.rule, Rule::IranGroupCorrect);
        assert_eq!(outcome.total_score, 50);
        assert!(outcome.iran_group_correct);
        assert_eq!(outcome.group_name.as_deref(), Some("E"));
    }

    #[test]
    fn test_designated_rule_names_designated_group() {
        // "A" is also perfect and sorts before "E"; the reported label must
        // still be the designated team's group
        let user = rotate_except(&["A", "E"]);

        let outcome = score(&user, &truth(), DESIGNATED);

        assert_eq!(outcome.rule, Rule::IranGroupCorrect);
        assert_eq!(outcome.total_score, 50);
        assert_eq!(outcome.perfect_groups, vec!["A".to_string(), "E".to_string()]);
        assert_eq!(outcome.group_name.as_deref(), Some("E"));
    }

    #[test]
    fn test_single_perfect_group_without_designated() {
        let user = rotate_except(&["A"]);

        let outcome = score(&user, &truth(), DESIGNATED);

        assert_eq!(outcome.rule, Rule::PerfectGroup);
        assert_eq!(outcome.total_score, 40);
        assert_eq!(outcome.group_name.as_deref(), Some("A"));
    }

    #[test]
    fn test_three_of_four_in_one_group() {
        let mut user = rotate_except(&[]);
        user.insert(
            "A".to_string(),
            BTreeSet::from(["1", "2", "3", "5"].map(String::from)),
        );

        let outcome = score(&user, &truth(), DESIGNATED);

        assert_eq!(outcome.rule, Rule::ThreeCorrect);
        assert_eq!(outcome.total_score, 20);
        assert_eq!(outcome.group_name.as_deref(), Some("A"));
    }

    #[test]
    fn test_no_match_scores_zero() {
        // shift every team by one full group
        let user = rotate_except(&[]);

        let outcome = score(&user, &truth(), DESIGNATED);

        assert_eq!(outcome.rule, Rule::NoMatch);
        assert_eq!(outcome.total_score, 0);
        assert_eq!(outcome.correct_teams, 0);
    }

    #[test]
    fn test_score_is_always_in_rule_set() {
        let allowed = [0, 20, 40, 50, 60, 80, 100];
        let submissions = [
            truth(),
            rotate_except(&[]),
            rotate_except(&["A"]),
            rotate_except(&["E"]),
            rotate_except(&["A", "B", "C"]),
        ];

        for user in &submissions {
            let outcome = score(user, &truth(), DESIGNATED);
            assert!(allowed.contains(&outcome.total_score));
        }
    }

    #[test]
    fn test_missing_designated_disables_rule() {
        let user = rotate_except(&["E"]);

        let outcome = score(&user, &truth(), None);

        assert_eq!(outcome.rule, Rule::PerfectGroup);
        assert!(!outcome.iran_group_correct);
    }

    #[test]
    fn test_order_within_groups_is_irrelevant() {
        let payload_sorted = json!({
            "groups": {
                "A": ["1", "2", "3", "4"],
                "B": ["5", "6", "7", "8"],
            }
        });
        let payload_shuffled = json!({
            "groups": {
                "A": ["4", "1", "3", "2"],
                "B": ["8", "5", "6", "7"],
            }
        });

        assert_eq!(
            normalize_payload(&payload_sorted),
            normalize_payload(&payload_shuffled)
        );
    }

    #[test]
    fn test_normalize_flattens_wrapper_arrays() {
        let wrapped = json!({
            "groups": {
                "A": [["1"], ["2"], ["3"], ["4"]],
            }
        });
        let flat = json!({
            "A": ["1", "2", "3", "4"],
        });

        assert_eq!(normalize_payload(&wrapped), normalize_payload(&flat));
    }

    #[test]
    fn test_normalize_accepts_numeric_ids_and_lowercase_labels() {
        let payload = json!({
            "groups": {
                "a": [1, 2, 3, 4],
            }
        });

        let map = normalize_payload(&payload).unwrap();
        assert_eq!(map["A"], BTreeSet::from(["1", "2", "3", "4"].map(String::from)));
    }

    #[test]
    fn test_normalize_rejects_malformed_entries() {
        assert!(normalize_payload(&json!({"groups": {"A": "not-a-list"}})).is_none());
        assert!(normalize_payload(&json!({"groups": {"A": [["1", "2"]]}})).is_none());
        assert!(normalize_payload(&json!([1, 2, 3])).is_none());
    }
}
