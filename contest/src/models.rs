use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub phone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// A session binds a user to two independent bcrypt digests. The plaintext
/// tokens are never persisted, so the hashes are skipped on serialization.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    #[serde(skip_serializing)]
    pub refresh_token_hash: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Prediction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub predict: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub id: Uuid,
    pub prediction_id: Uuid,
    pub user_id: Uuid,
    pub total_score: i32,
    pub details: serde_json::Value,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: Uuid,
    pub fa_name: String,
    pub eng_name: String,
    pub order: i32,
    pub group: String,
    pub flag: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRow {
    pub rank: i64,
    pub user_id: Uuid,
    pub total_score: i32,
    pub processed_at: DateTime<Utc>,
}

/// Wire format of a score job on the broker. Deserialization failure (a
/// missing id included) is a fatal job error and ends in the dead-letter
/// queue after the retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreJob {
    pub submission_id: Uuid,
    pub user_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_serialization_hides_hashes() {
        let session = Session {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            token_hash: "hash-a".into(),
            refresh_token_hash: Some("hash-r".into()),
            user_agent: Some("ua".into()),
            ip_address: Some("1.2.3.4".into()),
            created_at: Utc::now(),
            expires_at: Utc::now(),
        };

        let json = serde_json::to_string(&session).unwrap();
        assert!(!json.contains("hash-a"));
        assert!(!json.contains("hash-r"));
        assert!(json.contains("ipAddress"));
    }

    #[test]
    fn test_score_job_requires_both_ids() {
        let ok: Result<ScoreJob, _> =
            serde_json::from_str(r#"{"submissionId":"00000000-0000-0000-0000-000000000000","userId":"00000000-0000-0000-0000-000000000000"}"#);
        assert!(ok.is_ok());

        let missing: Result<ScoreJob, _> =
            serde_json::from_str(r#"{"submissionId":"00000000-0000-0000-0000-000000000000"}"#);
        assert!(missing.is_err());
    }

    #[test]
    fn test_session_expiry() {
        let now = Utc::now();
        let session = Session {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            token_hash: String::new(),
            refresh_token_hash: None,
            user_agent: None,
            ip_address: None,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(10),
        };

        assert!(!session.is_expired(now));
        assert!(session.is_expired(now + chrono::Duration::seconds(10)));
    }
}
