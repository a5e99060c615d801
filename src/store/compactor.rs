use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Store;

/// Background task that compacts the store's WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<Store>, threshold: u64, every: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(every.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let appends = store.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
    debug!("compactor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    use crate::model::*;

    const M: Ms = 60_000;
    const NINE: Ms = 1_736_154_000_000;

    #[tokio::test]
    async fn compacts_past_threshold_and_stops() {
        let dir = std::env::temp_dir().join("roombook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("compactor.wal");
        let _ = std::fs::remove_file(&path);

        let store = Arc::new(Store::new(path).unwrap());
        let rid = Ulid::new();
        store.insert_room(Room::new(rid, Some(4))).await.unwrap();
        for i in 0..5 {
            let b = Booking::new(Ulid::new(), rid, Ulid::new(), Span::new(NINE + i * M, NINE + (i + 1) * M), 2);
            store.insert_booking(b).await.unwrap();
        }
        assert_eq!(store.wal_appends_since_compact().await, 6);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_compactor(store.clone(), 3, Duration::from_millis(10), cancel.clone()));
        for _ in 0..100 {
            if store.wal_appends_since_compact().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.wal_appends_since_compact().await, 0);
        assert_eq!(store.booking_count(), 5);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }
}
