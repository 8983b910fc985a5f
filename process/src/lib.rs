//! Scoring worker.
//!
//! One consumer loop per process, prefetch-bounded; scale is horizontal by
//! running more processes. A job is acked on success and on the two benign
//! outcomes (already scored, submission deleted). An error republishes the
//! job with its retry header incremented until the budget runs out and the
//! broker dead-letters it. Because the ack only happens after the result
//! insert, a worker dying mid-job just means redelivery, and the unique
//! result constraint makes that redelivery harmless.

use std::time::Duration;

use tokio::{signal, time::timeout};
use tracing::info;

use contest::{
    broker::Broker,
    cache::Cache,
    config::Config,
    db, metrics,
    models::ScoreJob,
    pipeline::{self, ProcessOutcome},
};

pub async fn run(config: Config, consumer_tag: &str) -> contest::Result<()> {
    info!("Initializing worker...");

    let pool = db::connect(&config.database).await?;
    let cache = Cache::connect(&config.redis).await?;
    let broker = Broker::connect(&config.broker).await?;
    broker.assert_queue(&config.broker.queue).await?;

    contest::metrics::register();

    let queue = config.broker.queue.clone();
    info!(%queue, consumer_tag, "Consuming");

    let consume = broker.consume(&queue, consumer_tag, |payload| {
        let pool = pool.clone();
        let cache = cache.clone();
        let config = config.clone();
        let payload = payload.to_vec();

        async move { handle_job(&pool, &cache, &config, &payload).await }
    });

    tokio::select! {
        result = consume => result?,
        _ = shutdown_signal() => info!("Worker shutting down..."),
    }

    Ok(())
}

/// Soft wall-clock limit per job; a stall becomes a retryable failure
/// instead of a wedged consumer slot.
const JOB_TIME_LIMIT_SECONDS: u64 = 30;

async fn handle_job(
    pool: &sqlx::PgPool,
    cache: &Cache,
    config: &Config,
    payload: &[u8],
) -> contest::Result<()> {
    // an unreadable job (missing ids included) is a fatal job error; the
    // broker policy walks it to the dead-letter queue
    let job: ScoreJob = serde_json::from_slice(payload)?;

    let outcome = timeout(
        Duration::from_secs(JOB_TIME_LIMIT_SECONDS),
        pipeline::process(pool, cache, config, job.submission_id, job.user_id),
    )
    .await
    .unwrap_or(Err(contest::Error::JobTimeout(JOB_TIME_LIMIT_SECONDS)));

    match &outcome {
        Ok(ProcessOutcome::Scored { total_score, rule }) => {
            info!(
                submission_id = %job.submission_id,
                total_score,
                rule,
                "Submission scored"
            );
        }
        Ok(ProcessOutcome::AlreadyScored) => {
            info!(submission_id = %job.submission_id, "Result exists, job dropped");
        }
        Ok(ProcessOutcome::MissingSubmission) => {}
        Err(_) => {
            metrics::JOBS_PROCESSED.with_label_values(&["failed"]).inc();
        }
    }

    outcome.map(|_| ())
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
