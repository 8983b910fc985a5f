//! One-time code issuance and verification.
//!
//! All transient state lives in the cache under TTL-bounded keys: the code
//! itself, two cooldown markers, and the verify-attempt counter. The
//! attempt counter is incremented before the code is even looked at, so a
//! burst of concurrent guesses cannot slip past the cap.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use contest::{cache::keys, metrics, models::User, phone};

use crate::{error::ApiError, fraud, state::AppState};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredOtp {
    code: String,
    expires_at: DateTime<Utc>,
    ip: String,
    user_agent: Option<String>,
}

pub struct SendOutcome {
    pub phone: String,
    /// Present only in sandbox mode, where no SMS leaves the system.
    pub sandbox_code: Option<String>,
}

pub async fn send(
    state: &AppState,
    raw_phone: &str,
    address: &str,
    user_agent: Option<&str>,
) -> Result<SendOutcome, ApiError> {
    let phone = phone::normalize(raw_phone).ok_or(ApiError::InvalidPhoneNumber)?;

    if phone::is_unusual(&phone) {
        warn!(%phone, %address, "Unusual phone pattern requested a code");
        metrics::FRAUD_SIGNALS.with_label_values(&["unusual_phone"]).inc();
    }

    if state.cache.get(&keys::otp_send_limit(&phone)).await?.is_some() {
        metrics::OTP_FAILURES.with_label_values(&["send_limit"]).inc();
        return Err(ApiError::ExceededSendLimit);
    }

    if state.cache.get(&keys::otp_last_request(&phone)).await?.is_some() {
        metrics::OTP_FAILURES.with_label_values(&["cooldown"]).inc();
        return Err(ApiError::PleaseWait);
    }

    let code = generate_code(state.config.otp.length);
    let stored = StoredOtp {
        code: code.clone(),
        expires_at: Utc::now() + Duration::seconds(state.config.otp.ttl as i64),
        ip: address.to_string(),
        user_agent: user_agent.map(str::to_string),
    };

    let otp_ttl = state.config.otp.ttl;
    let cooldown = state.config.otp.send_cooldown;
    state
        .cache
        .set_ex(&keys::otp_code(&phone), &serde_json::to_string(&stored).map_err(contest::Error::from)?, otp_ttl)
        .await?;
    state
        .cache
        .set_ex(&keys::otp_send_limit(&phone), "1", cooldown)
        .await?;
    state
        .cache
        .set_ex(&keys::otp_last_request(&phone), "1", cooldown)
        .await?;

    state.sms.send(&phone, &code).await?;

    metrics::OTP_SENT.inc();
    info!(%phone, "One-time code issued");

    let sandbox_code = state.sms.is_sandbox().then_some(code);
    Ok(SendOutcome { phone, sandbox_code })
}

pub async fn verify(
    state: &AppState,
    raw_phone: &str,
    code: &str,
    address: &str,
) -> Result<User, ApiError> {
    let phone = phone::normalize(raw_phone).ok_or(ApiError::InvalidPhoneNumber)?;

    let attempts_key = keys::otp_verify_attempts(&phone);
    let attempts = state.cache.incr(&attempts_key).await?;
    state
        .cache
        .expire(&attempts_key, state.config.rate_limit.verify_window as i64)
        .await?;

    if attempts > state.config.otp.max_verify_attempts {
        fraud::track_otp_failure_by_phone(state, &phone).await;
        metrics::OTP_FAILURES.with_label_values(&["attempt_cap"]).inc();
        return Err(ApiError::ExceededVerificationAttempts);
    }

    let code_key = keys::otp_code(&phone);
    let raw = state
        .cache
        .get(&code_key)
        .await?
        .ok_or(ApiError::OtpNotFound)?;
    let stored: StoredOtp =
        serde_json::from_str(&raw).map_err(contest::Error::from)?;

    if Utc::now() > stored.expires_at {
        state.cache.del(&code_key).await?;
        metrics::OTP_FAILURES.with_label_values(&["expired"]).inc();
        return Err(ApiError::OtpExpired);
    }

    if stored.code != code {
        fraud::track_otp_failure_by_address(state, address).await;
        metrics::OTP_FAILURES.with_label_values(&["wrong_code"]).inc();
        return Err(ApiError::InvalidOtpCode);
    }

    state.cache.del(&code_key).await?;
    state.cache.del(&attempts_key).await?;

    let user = contest::db::users::upsert_by_phone(&state.db, &phone).await?;
    info!(%phone, user_id = %user.id, "Code verified");

    Ok(user)
}

/// Uniform random digits, leading zeros preserved.
fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_length_and_alphabet() {
        for length in [4, 6, 8] {
            let code = generate_code(length);
            assert_eq!(code.len(), length);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_codes_vary() {
        let codes: std::collections::HashSet<String> =
            (0..32).map(|_| generate_code(6)).collect();
        assert!(codes.len() > 1);
    }

    #[test]
    fn test_stored_otp_wire_format() {
        let stored = StoredOtp {
            code: "042137".into(),
            expires_at: Utc::now(),
            ip: "10.0.0.1".into(),
            user_agent: Some("test".into()),
        };

        let json = serde_json::to_string(&stored).unwrap();
        assert!(json.contains("expiresAt"));
        assert!(json.contains("userAgent"));

        let back: StoredOtp = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code, "042137");
    }
}
