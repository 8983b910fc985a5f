use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use contest::{
    cache::keys,
    db,
    scoring::{self, GROUP_LABELS, GROUP_SIZE},
};

use crate::{
    dispatcher,
    error::ApiError,
    middleware::Principal,
    otp, session,
    state::AppState,
};

#[derive(Deserialize)]
pub struct SendOtpRequest {
    phone: String,
}

pub async fn send_otp(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<SendOtpRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = otp::send(
        &state,
        &body.phone,
        &addr.ip().to_string(),
        user_agent(&headers),
    )
    .await?;

    let mut response = json!({ "message": "OTP_SENT_SUCCESSFULLY" });
    if let Some(code) = outcome.sandbox_code {
        response["otp"] = json!(code);
    }

    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    phone: String,
    code: String,
}

pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<VerifyOtpRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.code.len() != state.config.otp.length
        || !body.code.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(ApiError::InvalidOtpFormat);
    }

    let address = addr.ip().to_string();
    let user = otp::verify(&state, &body.phone, &body.code, &address).await?;
    let created = session::create(&state, user.id, &address, user_agent(&headers)).await?;

    Ok(Json(json!({
        "accessToken": created.access_token,
        "refreshToken": created.refresh_token,
        "session": {
            "id": created.session.id,
            "userId": created.session.user_id,
            "expiresAt": created.session.expires_at,
        },
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    refresh_token: String,
}

pub async fn refresh_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let access_token = session::refresh(&state, &body.refresh_token).await?;

    Ok(Json(json!({ "accessToken": access_token })))
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sessions = db::sessions::list_for_user(&state.db, principal.user_id).await?;

    Ok(Json(json!({ "sessions": sessions })))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = session::delete(&state, id, principal.user_id).await?;

    Ok(Json(json!({ "deleted": deleted })))
}

pub async fn delete_all_sessions(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = session::delete_all(&state, principal.user_id).await?;

    Ok(Json(json!({ "deleted": deleted })))
}

pub async fn teams(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let teams = db::teams::all(&state.db).await?;

    Ok(Json(json!({ "teams": teams })))
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    predict: serde_json::Value,
}

pub async fn submit_prediction(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(body): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_prediction_shape(&body.predict)?;

    let prediction = db::predictions::insert(&state.db, principal.user_id, &body.predict).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "predictionId": prediction.id })),
    ))
}

/// Shape-only check: 12 known labels, 4 entries each. Whether a team shows
/// up in more than one group is deliberately not rejected here; the scorer
/// works on sets.
fn validate_prediction_shape(predict: &serde_json::Value) -> Result<(), ApiError> {
    let groups = scoring::normalize_payload(predict).ok_or(ApiError::InvalidPredictionFormat)?;

    if groups.len() != GROUP_LABELS.len() {
        return Err(ApiError::InvalidPredictionFormat);
    }
    for (label, teams) in &groups {
        if !GROUP_LABELS.contains(&label.as_str()) || teams.len() != GROUP_SIZE {
            return Err(ApiError::InvalidPredictionFormat);
        }
    }

    Ok(())
}

pub async fn my_results(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<serde_json::Value>, ApiError> {
    let results = db::results::list_for_user(&state.db, principal.user_id).await?;

    Ok(Json(json!({ "results": results })))
}

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    limit: Option<i64>,
}

pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let rows = db::results::leaderboard(&state.db, limit).await?;

    Ok(Json(json!({ "leaderboard": rows })))
}

pub async fn trigger_processing(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let summary = dispatcher::run(&state).await?;

    Ok(Json(json!({
        "queued": summary.queued,
        "total": summary.total,
        "mode": summary.mode,
    })))
}

pub async fn processing_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let total = read_counter(&state, keys::STATS_TOTAL).await?;
    let processed = read_counter(&state, keys::STATS_PROCESSED).await?;
    let queue_depth = state
        .broker
        .queue_message_count(&state.config.broker.queue)
        .await;
    contest::metrics::QUEUE_DEPTH.set(queue_depth as f64);

    Ok(Json(json!({
        "total": total,
        "processed": processed,
        "pending": (total - processed).max(0),
        "queueDepth": queue_depth,
    })))
}

async fn read_counter(state: &AppState, key: &str) -> Result<i64, ApiError> {
    Ok(state
        .cache
        .get(key)
        .await?
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0))
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = db::ping(&state.db).await.is_ok();
    let cache = state.cache.ping().await.is_ok();
    let broker = state.broker.is_healthy();

    let healthy = database && cache && broker;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "database": database,
            "cache": cache,
            "broker": broker,
        })),
    )
}

pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        contest::metrics::gather(),
    )
}

fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_prediction() -> serde_json::Value {
        let mut groups = serde_json::Map::new();
        for (index, label) in GROUP_LABELS.iter().enumerate() {
            let start = index * GROUP_SIZE + 1;
            let ids: Vec<String> = (start..start + GROUP_SIZE).map(|n| n.to_string()).collect();
            groups.insert(label.to_string(), json!(ids));
        }
        json!({ "groups": groups })
    }

    #[test]
    fn test_accepts_complete_prediction() {
        assert!(validate_prediction_shape(&full_prediction()).is_ok());
    }

    #[test]
    fn test_rejects_missing_group() {
        let mut predict = full_prediction();
        predict["groups"].as_object_mut().unwrap().remove("L");
        assert!(validate_prediction_shape(&predict).is_err());
    }

    #[test]
    fn test_rejects_unknown_label() {
        let mut predict = full_prediction();
        let groups = predict["groups"].as_object_mut().unwrap();
        let teams = groups.remove("L").unwrap();
        groups.insert("M".to_string(), teams);
        assert!(validate_prediction_shape(&predict).is_err());
    }

    #[test]
    fn test_rejects_short_group() {
        let mut predict = full_prediction();
        predict["groups"]["A"] = json!(["1", "2", "3"]);
        assert!(validate_prediction_shape(&predict).is_err());
    }

    #[test]
    fn test_rejects_duplicate_within_group() {
        // a repeated id collapses in the set and fails the size check
        let mut predict = full_prediction();
        predict["groups"]["A"] = json!(["1", "1", "2", "3"]);
        assert!(validate_prediction_shape(&predict).is_err());
    }

    #[test]
    fn test_permits_duplicates_across_groups() {
        let mut predict = full_prediction();
        predict["groups"]["B"] = json!(["1", "6", "7", "8"]);
        assert!(validate_prediction_shape(&predict).is_ok());
    }

    #[test]
    fn test_accepts_wrapped_entries() {
        let mut predict = full_prediction();
        predict["groups"]["A"] = json!([["1"], ["2"], ["3"], ["4"]]);
        assert!(validate_prediction_shape(&predict).is_ok());
    }
}
