//! Scoring pipeline core, shared by the worker and the synchronous
//! dispatcher fallback.
//!
//! At-most-once effect: a pre-insert existence check skips already-scored
//! submissions cheaply, and the unique constraint on `results.prediction_id`
//! decides any remaining race. A duplicate delivery is therefore an ack, not
//! an error.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    cache::{keys, Cache},
    config::Config,
    db, metrics,
    models::Team,
    scoring::{self, GroupMap, Outcome},
};

/// Ground-truth partition plus the designated team, as cached under
/// `correct-groups`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundTruth {
    pub groups: GroupMap,
    pub designated_team_id: Option<String>,
}

impl GroundTruth {
    pub fn from_teams(teams: &[Team], designated_name: &str) -> Self {
        let mut groups = GroupMap::new();
        for team in teams {
            groups
                .entry(team.group.to_uppercase())
                .or_default()
                .insert(team.id.to_string());
        }

        let designated_team_id = teams
            .iter()
            .find(|team| team.eng_name.eq_ignore_ascii_case(designated_name))
            .map(|team| team.id.to_string());

        Self {
            groups,
            designated_team_id,
        }
    }
}

/// Cache-first ground-truth load; a miss reads the teams table and
/// repopulates the cache with the configured TTL (an hour by default).
/// Teams are immutable at runtime, so the only freshness concern is the TTL.
pub async fn ground_truth(pool: &PgPool, cache: &Cache, config: &Config) -> crate::Result<GroundTruth> {
    if let Some(raw) = cache.get(keys::CORRECT_GROUPS).await? {
        match serde_json::from_str(&raw) {
            Ok(truth) => return Ok(truth),
            Err(err) => warn!(error = %err, "Cached ground truth unreadable, reloading"),
        }
    }

    let teams = db::teams::all(pool).await?;
    let truth = GroundTruth::from_teams(&teams, &config.designated_team);

    cache
        .set_ex(keys::CORRECT_GROUPS, &serde_json::to_string(&truth)?, config.redis.ttl)
        .await?;

    Ok(truth)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    Scored { total_score: u32, rule: &'static str },
    AlreadyScored,
    MissingSubmission,
}

/// Score one submission and persist its result row.
///
/// Infrastructure errors bubble up to the caller (the broker retry policy
/// for the worker, the request for the synchronous path). A submission that
/// was deleted or already scored is a success.
pub async fn process(
    pool: &PgPool,
    cache: &Cache,
    config: &Config,
    submission_id: Uuid,
    user_id: Uuid,
) -> crate::Result<ProcessOutcome> {
    let timer = metrics::JOB_DURATION.start_timer();

    if db::results::exists(pool, submission_id).await? {
        metrics::JOBS_PROCESSED.with_label_values(&["duplicate"]).inc();
        timer.observe_duration();
        return Ok(ProcessOutcome::AlreadyScored);
    }

    let prediction = match db::predictions::find_by_id(pool, submission_id).await? {
        Some(prediction) => prediction,
        None => {
            info!(%submission_id, "Submission gone, dropping job");
            metrics::JOBS_PROCESSED.with_label_values(&["missing"]).inc();
            timer.observe_duration();
            return Ok(ProcessOutcome::MissingSubmission);
        }
    };

    let truth = ground_truth(pool, cache, config).await?;

    // an unreadable payload is a poison job; the retry policy walks it to
    // the dead-letter queue where an operator can see it
    let user_groups = scoring::normalize_payload(&prediction.predict)
        .ok_or(crate::Error::MalformedPayload(submission_id))?;
    let outcome = scoring::score(
        &user_groups,
        &truth.groups,
        truth.designated_team_id.as_deref(),
    );

    let inserted = db::results::insert(
        pool,
        submission_id,
        user_id,
        outcome.total_score as i32,
        &details_json(&outcome),
    )
    .await?;

    if inserted.is_none() {
        metrics::JOBS_PROCESSED.with_label_values(&["duplicate"]).inc();
        timer.observe_duration();
        return Ok(ProcessOutcome::AlreadyScored);
    }

    if let Err(err) = cache.incr(keys::STATS_PROCESSED).await {
        warn!(error = %err, "Progress counter update failed");
    }

    metrics::JOBS_PROCESSED.with_label_values(&["scored"]).inc();
    timer.observe_duration();

    Ok(ProcessOutcome::Scored {
        total_score: outcome.total_score,
        rule: outcome.rule.name(),
    })
}

/// Persisted `details` document. Field names predate this implementation
/// and are kept verbatim for downstream readers.
pub fn details_json(outcome: &Outcome) -> serde_json::Value {
    json!({
        "scoringBreakdown": outcome.rule.tag(),
        "rule": outcome.rule.name(),
        "correctGroups": outcome.perfect_groups,
        "correctTeams": outcome.correct_teams,
        "iranGroupCorrect": outcome.iran_group_correct,
        "perfectGroups": outcome.perfect_groups,
        "misplacedTeams": outcome.misplaced_teams,
        "groupName": outcome.group_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn team(id: Uuid, eng_name: &str, group: &str, order: i32) -> Team {
        Team {
            id,
            fa_name: String::new(),
            eng_name: eng_name.to_string(),
            order,
            group: group.to_string(),
            flag: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_ground_truth_groups_by_label() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let teams = vec![
            team(a, "Qatar", "A", 1),
            team(b, "Ecuador", "a", 2),
            team(c, "Iran", "B", 5),
        ];

        let truth = GroundTruth::from_teams(&teams, "Iran");

        assert_eq!(
            truth.groups["A"],
            BTreeSet::from([a.to_string(), b.to_string()])
        );
        assert_eq!(truth.groups["B"], BTreeSet::from([c.to_string()]));
        assert_eq!(truth.designated_team_id, Some(c.to_string()));
    }

    #[test]
    fn test_absent_designated_team() {
        let teams = vec![team(Uuid::new_v4(), "Qatar", "A", 1)];

        let truth = GroundTruth::from_teams(&teams, "Iran");

        assert_eq!(truth.designated_team_id, None);
    }

    #[test]
    fn test_details_keep_legacy_fields() {
        let outcome = scoring::score(
            &GroupMap::new(),
            &GroupMap::from([(
                "A".to_string(),
                BTreeSet::from(["1".to_string(), "2".to_string()]),
            )]),
            None,
        );

        let details = details_json(&outcome);

        for field in [
            "scoringBreakdown",
            "correctGroups",
            "correctTeams",
            "iranGroupCorrect",
            "perfectGroups",
        ] {
            assert!(details.get(field).is_some(), "missing field {field}");
        }
    }

    #[test]
    fn test_ground_truth_roundtrip() {
        let teams = vec![
            team(Uuid::new_v4(), "Qatar", "A", 1),
            team(Uuid::new_v4(), "Iran", "B", 5),
        ];
        let truth = GroundTruth::from_teams(&teams, "Iran");

        let raw = serde_json::to_string(&truth).unwrap();
        let reloaded: GroundTruth = serde_json::from_str(&raw).unwrap();

        assert_eq!(reloaded.groups, truth.groups);
        assert_eq!(reloaded.designated_team_id, truth.designated_team_id);
    }
}
