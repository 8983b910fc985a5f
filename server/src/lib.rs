//! API process of the prediction contest.
//!
//!
//!
//! # Request Flow
//!
//! - `/auth/*` issues one-time codes over SMS and trades a verified code for
//!   a session with two bearer tokens (access + refresh). Only bcrypt
//!   digests of the tokens are stored; a token-prefix pointer in Redis makes
//!   the hot validation path O(1) while a bounded DB scan covers cache
//!   misses.
//! - `/prediction` stores submissions and reads results; scoring itself
//!   happens out of process (see the `process` binary).
//! - `/prediction/admin/*` fans unscored submissions out onto the broker and
//!   reports progress.
//!
//! Every throttle and OTP failure is a typed error mapped to a stable
//! machine-readable message constant at the HTTP edge.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    http::{header::CONTENT_TYPE, Method},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::info;

use contest::config::Config;

pub mod dispatcher;
pub mod error;
pub mod fraud;
pub mod middleware;
pub mod otp;
pub mod routes;
pub mod session;
pub mod sms;
pub mod state;

use state::AppState;

pub async fn start_server(config: Config) -> contest::Result<()> {
    info!("Initializing state...");
    let state = AppState::new(config).await?;

    contest::metrics::register();
    session::spawn_cleanup(state.clone());

    info!("Starting server...");

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .allow_origin(Any)
        .max_age(Duration::from_secs(60 * 60));

    let app = router(state.clone())
        .layer(cors)
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    let address = format!("0.0.0.0:{}", state.config.http_port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| contest::Error::Config(format!("cannot bind {address}: {e}")))?;
    info!("Server running on {address}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| contest::Error::Config(format!("server error: {e}")))?;

    info!("Server shutting down...");
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    let otp_routes = Router::new()
        .route("/auth/send-otp", post(routes::send_otp))
        .route("/auth/verify-otp", post(routes::verify_otp))
        .route("/auth/refresh", post(routes::refresh_session))
        .route_layer(from_fn_with_state(state.clone(), middleware::rate_limit));

    let public_routes = Router::new()
        .route("/prediction/teams", get(routes::teams))
        .route("/prediction/leaderboard", get(routes::leaderboard))
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics));

    let protected_routes = Router::new()
        .route(
            "/auth/sessions",
            get(routes::list_sessions).delete(routes::delete_all_sessions),
        )
        .route("/auth/sessions/{id}", delete(routes::delete_session))
        .route("/prediction", post(routes::submit_prediction))
        .route("/prediction/result", get(routes::my_results))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    let admin_routes = Router::new()
        .route(
            "/prediction/admin/trigger-prediction-process",
            post(routes::trigger_processing),
        )
        .route(
            "/prediction/admin/processing-status",
            get(routes::processing_status),
        )
        .route_layer(from_fn_with_state(state.clone(), middleware::require_admin))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(otp_routes)
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
