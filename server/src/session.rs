//! Session lifecycle: create, validate, refresh, delete, scheduled cleanup.
//!
//! Validation is cache-then-database. The cache maps a token prefix to a
//! session id; the id is only ever trusted after a full bcrypt comparison
//! against the stored hash, so a guessed prefix buys an attacker nothing.
//! The database fallback is a scan of the most recent live sessions,
//! bounded to a constant so the worst case stays a fixed number of bcrypt
//! comparisons.

use std::{str::FromStr, sync::Arc};

use chrono::{Duration, Utc};
use cron::Schedule;
use tracing::{info, warn};
use uuid::Uuid;

use contest::{
    cache::keys,
    db, metrics,
    models::Session,
    token,
};

use crate::{error::ApiError, fraud, state::AppState};

/// Bcrypt comparisons a single cache miss may cost on validation.
const RECENT_LOOKUP_LIMIT: i64 = 3;
/// Scan cap when locating a session by refresh token.
const BULK_REFRESH_LIMIT: i64 = 100;
/// Refreshes per user per hour before the fraud signal fires.
const REFRESH_FREQUENCY_THRESHOLD: i64 = 10;
const REFRESH_FREQUENCY_WINDOW_SECONDS: i64 = 3600;

pub struct NewSession {
    pub session: Session,
    pub access_token: String,
    pub refresh_token: String,
}

pub async fn create(
    state: &AppState,
    user_id: Uuid,
    address: &str,
    user_agent: Option<&str>,
) -> contest::Result<NewSession> {
    fraud::check_concurrent_sessions(state, user_id, address, user_agent).await;

    let cost = state.config.session.bcrypt_cost;
    let token_bytes = state.config.session.token_bytes;
    let access = token::generate(token_bytes, cost)?;
    let refresh = token::generate(token_bytes, cost)?;

    let expires_at = Utc::now() + Duration::seconds(state.config.session.refresh_ttl as i64);
    let session = db::sessions::insert(
        &state.db,
        user_id,
        &access.hash,
        &refresh.hash,
        user_agent,
        Some(address),
        expires_at,
    )
    .await?;

    state
        .cache
        .set_ex(
            &keys::session_token(token::prefix(&access.token)),
            &session.id.to_string(),
            state.config.session.access_ttl,
        )
        .await?;
    state
        .cache
        .set_ex(
            &keys::session_refresh(token::prefix(&refresh.token)),
            &session.id.to_string(),
            state.config.session.refresh_ttl,
        )
        .await?;

    metrics::SESSIONS_CREATED.inc();
    info!(session_id = %session.id, %user_id, "Session created");

    Ok(NewSession {
        session,
        access_token: access.token,
        refresh_token: refresh.token,
    })
}

pub async fn validate(state: &AppState, presented: &str) -> contest::Result<Option<Session>> {
    if !token::valid_format(presented, state.config.session.token_bytes) {
        metrics::SESSION_VALIDATION_FAILURES.inc();
        return Ok(None);
    }

    let now = Utc::now();
    let cache_key = keys::session_token(token::prefix(presented));

    // hot path: prefix pointer → session id → one bcrypt comparison
    if let Some(id) = cached_session_id(state, &cache_key).await {
        if let Some(session) = db::sessions::find_by_id(&state.db, id).await? {
            if !session.is_expired(now) && token::verify(presented, &session.token_hash) {
                return Ok(Some(session));
            }
        }
        // stale pointer: the row is gone, expired, or the hash rotated
        state.cache.del(&cache_key).await?;
    }

    // bounded fallback over the most recent live sessions
    let candidates = db::sessions::recent_active(&state.db, RECENT_LOOKUP_LIMIT).await?;
    for session in candidates {
        if token::verify(presented, &session.token_hash) {
            let remaining = (session.expires_at - now).num_seconds().max(0) as u64;
            let ttl = remaining.min(state.config.session.ttl);
            if ttl > 0 {
                state
                    .cache
                    .set_ex(&cache_key, &session.id.to_string(), ttl)
                    .await?;
            }
            return Ok(Some(session));
        }
    }

    info!("Bearer token matched no live session");
    metrics::SESSION_VALIDATION_FAILURES.inc();
    Ok(None)
}

pub async fn refresh(state: &AppState, presented: &str) -> Result<String, ApiError> {
    if !token::valid_format(presented, state.config.session.token_bytes) {
        return Err(ApiError::InvalidRefreshToken);
    }

    let session = locate_by_refresh(state, presented)
        .await?
        .ok_or(ApiError::InvalidRefreshToken)?;

    track_refresh_frequency(state, session.user_id).await;

    let access = token::generate(
        state.config.session.token_bytes,
        state.config.session.bcrypt_cost,
    )?;

    // row first, cache second: a concurrent validate must never follow the
    // new prefix to a hash that is not stored yet
    db::sessions::update_token_hash(&state.db, session.id, &access.hash)
        .await?;
    state
        .cache
        .set_ex(
            &keys::session_token(token::prefix(&access.token)),
            &session.id.to_string(),
            state.config.session.access_ttl,
        )
        .await?;

    info!(session_id = %session.id, "Access token rotated");
    Ok(access.token)
}

async fn locate_by_refresh(
    state: &AppState,
    presented: &str,
) -> Result<Option<Session>, ApiError> {
    let now = Utc::now();
    let cache_key = keys::session_refresh(token::prefix(presented));

    if let Some(id) = cached_session_id(state, &cache_key).await {
        if let Some(session) = db::sessions::find_by_id(&state.db, id)
            .await?
        {
            if !session.is_expired(now) {
                if let Some(hash) = session.refresh_token_hash.as_deref() {
                    if token::verify(presented, hash) {
                        return Ok(Some(session));
                    }
                }
            }
        }
        state
            .cache
            .del(&cache_key)
            .await?;
    }

    let candidates = db::sessions::recent_active_with_refresh(&state.db, BULK_REFRESH_LIMIT)
        .await?;
    for session in candidates {
        let matches = session
            .refresh_token_hash
            .as_deref()
            .is_some_and(|hash| token::verify(presented, hash));
        if matches {
            let remaining = (session.expires_at - now).num_seconds().max(0) as u64;
            let ttl = remaining.min(state.config.session.refresh_ttl);
            if ttl > 0 {
                state
                    .cache
                    .set_ex(&cache_key, &session.id.to_string(), ttl)
                    .await?;
            }
            return Ok(Some(session));
        }
    }

    Ok(None)
}

/// Excessive refresh traffic is a signal, never a block.
async fn track_refresh_frequency(state: &AppState, user_id: Uuid) {
    let key = keys::refresh_frequency(&user_id);

    let count = match state.cache.incr(&key).await {
        Ok(count) => count,
        Err(err) => {
            warn!(error = %err, "Refresh counter unavailable");
            return;
        }
    };
    if let Err(err) = state.cache.expire(&key, REFRESH_FREQUENCY_WINDOW_SECONDS).await {
        warn!(error = %err, "Refresh counter TTL not set");
    }

    if count > REFRESH_FREQUENCY_THRESHOLD {
        warn!(%user_id, count, "Refresh frequency above threshold");
        metrics::FRAUD_SIGNALS
            .with_label_values(&["refresh_frequency"])
            .inc();
    }
}

async fn cached_session_id(state: &AppState, key: &str) -> Option<Uuid> {
    match state.cache.get(key).await {
        Ok(Some(raw)) => Uuid::parse_str(&raw).ok(),
        Ok(None) => None,
        Err(err) => {
            // a cache outage downgrades to the DB path
            warn!(error = %err, "Session cache read failed");
            None
        }
    }
}

/// Cache entries are left to expire on their own: the pointer alone grants
/// nothing, because validation always re-verifies against the stored row.
pub async fn delete(state: &AppState, session_id: Uuid, user_id: Uuid) -> contest::Result<u64> {
    let deleted = db::sessions::delete(&state.db, session_id, user_id).await?;
    info!(%session_id, deleted, "Session delete requested");
    Ok(deleted)
}

pub async fn delete_all(state: &AppState, user_id: Uuid) -> contest::Result<u64> {
    let deleted = db::sessions::delete_all_for_user(&state.db, user_id).await?;
    info!(%user_id, deleted, "All sessions deleted");
    Ok(deleted)
}

pub async fn cleanup_expired(state: &AppState) -> contest::Result<u64> {
    let deleted = db::sessions::delete_expired(&state.db).await?;
    if deleted > 0 {
        info!(deleted, "Expired sessions removed");
    }
    metrics::SESSIONS_CLEANED.inc_by(deleted as f64);
    Ok(deleted)
}

/// Drive the cleanup at the configured cron cadence. The expression was
/// validated at startup.
pub fn spawn_cleanup(state: Arc<AppState>) {
    let schedule = match Schedule::from_str(&state.config.session.cleanup_cron) {
        Ok(schedule) => schedule,
        Err(err) => {
            warn!(error = %err, "Cleanup schedule unusable, task not started");
            return;
        }
    };

    tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!("Cleanup schedule has no future occurrence, task stopping");
                return;
            };

            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            if let Err(err) = cleanup_expired(&state).await {
                warn!(error = %err, "Session cleanup pass failed");
            }
        }
    });
}
