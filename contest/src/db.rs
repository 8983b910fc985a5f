//! Postgres layer.
//!
//! Plain `sqlx` queries grouped per table. The unique constraints carry real
//! semantics: `users.phone` makes the OTP upsert idempotent and
//! `results.prediction_id` is what turns at-least-once broker delivery into
//! at-most-once scoring effect.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::{
    config::DatabaseConfig,
    error::Result,
    models::{LeaderboardRow, Prediction, PredictionResult, Session, Team, User},
};

pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(config.timeout)
        .connect(&config.url())
        .await?;

    Ok(pool)
}

pub async fn ping(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

pub mod users {
    use super::*;

    /// Create-or-refresh keyed on the normalized phone; called on every
    /// successful OTP verification.
    pub async fn upsert_by_phone(pool: &PgPool, phone: &str) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (phone, last_login_at)
            VALUES ($1, now())
            ON CONFLICT (phone)
            DO UPDATE SET last_login_at = now(), updated_at = now()
            RETURNING id, phone, created_at, updated_at, last_login_at
            "#,
        )
        .bind(phone)
        .fetch_one(pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, phone, created_at, updated_at, last_login_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }
}

pub mod sessions {
    use super::*;

    const COLUMNS: &str = "id, user_id, token_hash, refresh_token_hash, user_agent, ip_address, \
                           created_at, expires_at";

    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        pool: &PgPool,
        user_id: Uuid,
        token_hash: &str,
        refresh_token_hash: &str,
        user_agent: Option<&str>,
        ip_address: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<Session> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            INSERT INTO sessions (user_id, token_hash, refresh_token_hash, user_agent, ip_address, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {COLUMNS}
            "#,
        ))
        .bind(user_id)
        .bind(token_hash)
        .bind(refresh_token_hash)
        .bind(user_agent)
        .bind(ip_address)
        .bind(expires_at)
        .fetch_one(pool)
        .await?;

        Ok(session)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Session>> {
        let session =
            sqlx::query_as::<_, Session>(&format!("SELECT {COLUMNS} FROM sessions WHERE id = $1"))
                .bind(id)
                .fetch_optional(pool)
                .await?;

        Ok(session)
    }

    /// Most recent non-expired sessions; the bounded fallback scan behind
    /// token validation. The limit caps how many bcrypt comparisons a single
    /// cache miss can cost.
    pub async fn recent_active(pool: &PgPool, limit: i64) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(&format!(
            r#"
            SELECT {COLUMNS} FROM sessions
            WHERE expires_at > now()
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        ))
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(sessions)
    }

    pub async fn recent_active_with_refresh(pool: &PgPool, limit: i64) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(&format!(
            r#"
            SELECT {COLUMNS} FROM sessions
            WHERE expires_at > now() AND refresh_token_hash IS NOT NULL
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        ))
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(sessions)
    }

    pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(&format!(
            r#"
            SELECT {COLUMNS} FROM sessions
            WHERE user_id = $1 AND expires_at > now()
            ORDER BY created_at DESC
            "#,
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(sessions)
    }

    pub async fn recent_for_user(
        pool: &PgPool,
        user_id: Uuid,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(&format!(
            r#"
            SELECT {COLUMNS} FROM sessions
            WHERE user_id = $1 AND created_at >= $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        ))
        .bind(user_id)
        .bind(since)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(sessions)
    }

    /// Access-hash rotation on refresh. The row is written before the new
    /// prefix is cached so a validate racing the refresh can never observe
    /// the cache pointing at a hash that is not yet stored.
    pub async fn update_token_hash(pool: &PgPool, id: Uuid, token_hash: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET token_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(token_hash)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn delete(pool: &PgPool, id: Uuid, user_id: Uuid) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM sessions WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }

    pub async fn delete_all_for_user(pool: &PgPool, user_id: Uuid) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }

    pub async fn delete_expired(pool: &PgPool) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM sessions WHERE expires_at < now()")
            .execute(pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }
}

pub mod predictions {
    use super::*;

    pub async fn insert(
        pool: &PgPool,
        user_id: Uuid,
        predict: &serde_json::Value,
    ) -> Result<Prediction> {
        let prediction = sqlx::query_as::<_, Prediction>(
            r#"
            INSERT INTO predictions (user_id, predict)
            VALUES ($1, $2)
            RETURNING id, user_id, predict, created_at
            "#,
        )
        .bind(user_id)
        .bind(predict)
        .fetch_one(pool)
        .await?;

        Ok(prediction)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Prediction>> {
        let prediction = sqlx::query_as::<_, Prediction>(
            "SELECT id, user_id, predict, created_at FROM predictions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(prediction)
    }

    /// Submissions that have no result row yet; the dispatcher's scan.
    pub async fn unscored(pool: &PgPool) -> Result<Vec<(Uuid, Uuid)>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid)>(
            r#"
            SELECT p.id, p.user_id
            FROM predictions p
            LEFT JOIN results r ON r.prediction_id = p.id
            WHERE r.id IS NULL
            ORDER BY p.created_at
            "#,
        )
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}

pub mod results {
    use super::*;

    const COLUMNS: &str = "id, prediction_id, user_id, total_score, details, processed_at";

    pub async fn exists(pool: &PgPool, prediction_id: Uuid) -> Result<bool> {
        let found = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM results WHERE prediction_id = $1)",
        )
        .bind(prediction_id)
        .fetch_one(pool)
        .await?;

        Ok(found)
    }

    /// Inserts at most one row per prediction; a concurrent duplicate job
    /// loses the conflict and gets `None` back.
    pub async fn insert(
        pool: &PgPool,
        prediction_id: Uuid,
        user_id: Uuid,
        total_score: i32,
        details: &serde_json::Value,
    ) -> Result<Option<PredictionResult>> {
        let result = sqlx::query_as::<_, PredictionResult>(&format!(
            r#"
            INSERT INTO results (prediction_id, user_id, total_score, details)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (prediction_id) DO NOTHING
            RETURNING {COLUMNS}
            "#,
        ))
        .bind(prediction_id)
        .bind(user_id)
        .bind(total_score)
        .bind(details)
        .fetch_optional(pool)
        .await?;

        Ok(result)
    }

    pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<PredictionResult>> {
        let results = sqlx::query_as::<_, PredictionResult>(&format!(
            r#"
            SELECT {COLUMNS} FROM results
            WHERE user_id = $1
            ORDER BY processed_at DESC
            "#,
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(results)
    }

    pub async fn leaderboard(pool: &PgPool, limit: i64) -> Result<Vec<LeaderboardRow>> {
        let rows = sqlx::query_as::<_, LeaderboardRow>(
            r#"
            SELECT
                row_number() OVER (ORDER BY total_score DESC, processed_at ASC) AS rank,
                user_id,
                total_score,
                processed_at
            FROM results
            ORDER BY total_score DESC, processed_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}

pub mod teams {
    use super::*;

    pub async fn all(pool: &PgPool) -> Result<Vec<Team>> {
        let teams = sqlx::query_as::<_, Team>(
            r#"
            SELECT id, fa_name, eng_name, "order", "group", flag, created_at
            FROM teams
            ORDER BY "order"
            "#,
        )
        .fetch_all(pool)
        .await?;

        Ok(teams)
    }
}
