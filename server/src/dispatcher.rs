//! Dispatcher: fan unscored submissions out onto the broker.
//!
//! The progress counters are first-write-wins: a re-trigger while workers
//! are still draining the queue must not shrink `total` underneath them.
//! Resetting is an explicit operator action, never automatic.

use tracing::info;

use contest::{cache::keys, db, metrics, models::ScoreJob, pipeline};

use crate::state::AppState;

const PROGRESS_LOG_INTERVAL: u64 = 100;

pub struct DispatchSummary {
    pub queued: u64,
    pub total: u64,
    pub mode: &'static str,
}

pub async fn run(state: &AppState) -> contest::Result<DispatchSummary> {
    let unscored = db::predictions::unscored(&state.db).await?;
    let total = unscored.len() as u64;

    if state
        .cache
        .set_nx(keys::STATS_TOTAL, &total.to_string())
        .await?
    {
        state.cache.set_nx(keys::STATS_PROCESSED, "0").await?;
        info!(total, "Progress counters initialized");
    }

    if !state.config.prediction.async_processing {
        return process_inline(state, unscored).await;
    }

    let queue = &state.config.broker.queue;
    let mut queued = 0u64;

    for (submission_id, user_id) in unscored {
        state
            .broker
            .publish(
                queue,
                &ScoreJob {
                    submission_id,
                    user_id,
                },
            )
            .await?;
        metrics::JOBS_QUEUED.inc();

        queued += 1;
        if queued % PROGRESS_LOG_INTERVAL == 0 {
            info!(queued, total, "Dispatch progress");
        }
    }

    info!(queued, total, "Dispatch complete");
    Ok(DispatchSummary {
        queued,
        total,
        mode: "queue",
    })
}

/// Fallback when async processing is disabled: score in-process, yielding
/// between batches so the request scheduler keeps breathing.
async fn process_inline(
    state: &AppState,
    unscored: Vec<(uuid::Uuid, uuid::Uuid)>,
) -> contest::Result<DispatchSummary> {
    let total = unscored.len() as u64;
    let batch_size = state.config.prediction.batch_size.max(1);
    let mut scored = 0u64;

    for batch in unscored.chunks(batch_size) {
        for (submission_id, user_id) in batch {
            pipeline::process(&state.db, &state.cache, &state.config, *submission_id, *user_id)
                .await?;

            scored += 1;
            if scored % PROGRESS_LOG_INTERVAL == 0 {
                info!(scored, total, "Inline scoring progress");
            }
        }
        tokio::task::yield_now().await;
    }

    info!(scored, total, "Inline scoring complete");
    Ok(DispatchSummary {
        queued: scored,
        total,
        mode: "sync",
    })
}
