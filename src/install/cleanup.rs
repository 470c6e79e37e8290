use crate::store::Store;
use chrono::{Duration, Utc};
use std::sync::Arc;

/// How long a redeemed code stays recognisable. Never shorter than the
/// correlation window.
const REDEEMED_CODE_RETENTION_HOURS: i64 = 24;

/// Background task that drops pending installs and parked codes once they
/// fall outside the correlation window, and forgets old redeemed codes.
pub async fn run_pending_cleanup(store: Arc<Store>, window: Duration, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        let now = Utc::now();

        match store.purge_pending(now - window) {
            Ok(0) => {}
            Ok(removed) => tracing::debug!("Purged {} expired pending install rows", removed),
            Err(e) => tracing::warn!("Pending install cleanup failed: {:#}", e),
        }
        let retention = Duration::hours(REDEEMED_CODE_RETENTION_HOURS).max(window);
        if let Err(e) = store.purge_redeemed_codes(now - retention) {
            tracing::warn!("Redeemed code cleanup failed: {:#}", e);
        }
    }
}
