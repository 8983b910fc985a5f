//! Request middleware: bearer authentication, the admin gate, and the
//! per-address rate limit on the OTP endpoints.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::warn;
use uuid::Uuid;

use contest::{cache::keys, db};

use crate::{error::ApiError, session, state::AppState};

/// Authenticated caller, attached to the request by [`require_auth`].
#[derive(Debug, Clone, Copy)]
pub struct Principal {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .copied()
            .ok_or(ApiError::MissingAccessToken)
    }
}

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request).ok_or(ApiError::MissingAccessToken)?;

    let session = session::validate(&state, &token)
        .await?
        .ok_or(ApiError::InvalidOrExpiredToken)?;

    if state.config.enable_ip_validation {
        let client_ip = addr.ip().to_string();
        if session.ip_address.as_deref().is_some_and(|ip| ip != client_ip) {
            warn!(session_id = %session.id, %client_ip, "Session address mismatch");
            return Err(ApiError::SessionIpMismatch);
        }
    }

    if state.config.enable_user_agent_validation {
        let client_agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok());
        if session.user_agent.as_deref() != client_agent {
            // logged, never blocked
            warn!(session_id = %session.id, "Session user-agent mismatch");
        }
    }

    request.extensions_mut().insert(Principal {
        user_id: session.user_id,
        session_id: session.id,
    });

    Ok(next.run(request).await)
}

/// Admin access is an allowlist of phone numbers over an already
/// authenticated principal.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = request
        .extensions()
        .get::<Principal>()
        .copied()
        .ok_or(ApiError::MissingAccessToken)?;

    let user = db::users::find_by_id(&state.db, principal.user_id)
        .await?
        .ok_or(ApiError::InvalidOrExpiredToken)?;

    if !state.config.admin_phones.contains(&user.phone) {
        warn!(user_id = %user.id, "Admin endpoint denied");
        return Err(ApiError::AdminRequired);
    }

    Ok(next.run(request).await)
}

/// Fixed-window counter per client address, shared across API instances
/// through the cache. A cache outage fails open.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = keys::rate_limit(&addr.ip().to_string());

    match state.cache.incr(&key).await {
        Ok(count) => {
            if count == 1 {
                if let Err(err) = state
                    .cache
                    .expire(&key, state.config.rate_limit.window as i64)
                    .await
                {
                    warn!(error = %err, "Rate-limit window TTL not set");
                }
            }
            if count > state.config.rate_limit.max_requests {
                return Err(ApiError::TooManyRequests);
            }
        }
        Err(err) => warn!(error = %err, "Rate limiter unavailable"),
    }

    Ok(next.run(request).await)
}

fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with_auth(value: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = value {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_extraction() {
        let request = request_with_auth(Some("Bearer abc123"));
        assert_eq!(bearer_token(&request).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_bearer_requires_scheme() {
        assert_eq!(bearer_token(&request_with_auth(Some("abc123"))), None);
        assert_eq!(bearer_token(&request_with_auth(Some("Basic abc123"))), None);
        assert_eq!(bearer_token(&request_with_auth(None)), None);
    }
}
