//! Fraud signals. Everything here is side-effect only: an audit log line
//! and a metric. A signal must never fail or block the request that
//! triggered it.

use chrono::{Duration, Utc};
use tracing::warn;

use contest::{cache::keys, db, metrics};

use crate::state::AppState;

const CONCURRENT_CHECK_LIMIT: i64 = 10;
const CONCURRENT_CHECK_WINDOW_SECONDS: i64 = 300;
const FAILURE_WINDOW_SECONDS: i64 = 3600;
const FAILURE_THRESHOLD: i64 = 5;

/// Flag logins racing in from different addresses within the window.
pub async fn check_concurrent_sessions(
    state: &AppState,
    user_id: uuid::Uuid,
    address: &str,
    user_agent: Option<&str>,
) {
    let since = Utc::now() - Duration::seconds(CONCURRENT_CHECK_WINDOW_SECONDS);

    let recent =
        match db::sessions::recent_for_user(&state.db, user_id, since, CONCURRENT_CHECK_LIMIT).await
        {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(error = %err, "Concurrent-session check skipped");
                return;
            }
        };

    let conflicting = recent
        .iter()
        .filter(|s| s.ip_address.as_deref().is_some_and(|ip| ip != address))
        .count();

    if conflicting > 0 {
        warn!(
            %user_id,
            %address,
            user_agent = user_agent.unwrap_or("-"),
            conflicting,
            "Concurrent sessions from differing addresses"
        );
        metrics::FRAUD_SIGNALS
            .with_label_values(&["concurrent_sessions"])
            .inc();
    }
}

pub async fn track_otp_failure_by_phone(state: &AppState, phone: &str) {
    track(state, &keys::otp_failures_phone(phone), "otp_failures_phone").await;
}

pub async fn track_otp_failure_by_address(state: &AppState, address: &str) {
    track(state, &keys::otp_failures_address(address), "otp_failures_address").await;
}

async fn track(state: &AppState, key: &str, kind: &str) {
    let count = match state.cache.incr(key).await {
        Ok(count) => count,
        Err(err) => {
            warn!(error = %err, kind, "Failure counter unavailable");
            return;
        }
    };

    if let Err(err) = state.cache.expire(key, FAILURE_WINDOW_SECONDS).await {
        warn!(error = %err, kind, "Failure counter TTL not set");
    }

    if count == FAILURE_THRESHOLD {
        warn!(key, count, "OTP failure threshold crossed");
        metrics::FRAUD_SIGNALS.with_label_values(&[kind]).inc();
    }
}
