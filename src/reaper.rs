use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::{Engine, EngineError};
use crate::model::Ms;

/// Expire every booking that has waited longer than `window_ms` for payment.
/// Returns how many were expired.
pub async fn sweep_pending(engine: &Engine, now: Ms, window_ms: Ms) -> usize {
    let mut expired = 0;
    for id in engine.stale_pending(now, window_ms) {
        match engine.expire(id).await {
            Ok(_) => {
                expired += 1;
                info!("expired unpaid booking {id}");
            }
            // Paid or cancelled between the scan and the lock.
            Err(EngineError::InvalidTransition { .. }) => debug!("sweep skip {id}: already settled"),
            Err(e) => tracing::warn!("sweep failed for {id}: {e}"),
        }
    }
    expired
}

/// Background task that periodically expires unpaid bookings and drops
/// notification channels nobody listens to anymore.
pub async fn run_payment_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let window = engine.config().payment_window_ms;
        let n = sweep_pending(&engine, crate::engine::now_ms(), window).await;
        if n > 0 {
            debug!("payment sweep expired {n} booking(s)");
        }
        engine.notify.prune();
    }
}

/// Background task that compacts the journal once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(10));
    loop {
        interval.tick().await;
        if engine.journal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = engine.compact_journal().await {
            tracing::error!("journal compaction failed: {e}");
        }
    }
}
