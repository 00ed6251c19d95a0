//! Per-user rolling history window backing the velocity analyzer.
//!
//! Store-backed with a small per-user TTL cache in front. The cache is
//! invalidated on every persisted submission for that user, so a scoring
//! call never sees its own user's stale slice.

use crate::errors::FraudResult;
use crate::models::HistoryEntry;
use crate::store::FraudStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

struct CachedSlice {
    fetched_at: Instant,
    days: i64,
    entries: Vec<HistoryEntry>,
}

pub struct HistoryWindow {
    store: Arc<FraudStore>,
    cache: Mutex<HashMap<i64, CachedSlice>>,
    ttl: Duration,
}

impl HistoryWindow {
    pub fn new(store: Arc<FraudStore>) -> Self {
        Self::with_ttl(store, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(store: Arc<FraudStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Newest-first slice of the user's transactions within the last
    /// `days` days.
    pub fn history(&self, user_id: i64, days: i64) -> FraudResult<Vec<HistoryEntry>> {
        {
            let cache = self.cache.lock();
            if let Some(slice) = cache.get(&user_id) {
                if slice.days == days && slice.fetched_at.elapsed() < self.ttl {
                    return Ok(slice.entries.clone());
                }
            }
        }

        let entries = self.store.get_user_history(user_id, days)?;

        let mut cache = self.cache.lock();
        cache.insert(
            user_id,
            CachedSlice {
                fetched_at: Instant::now(),
                days,
                entries: entries.clone(),
            },
        );

        Ok(entries)
    }

    /// Drop the cached slice for a user. Called after every persisted
    /// submission for that user.
    pub fn invalidate(&self, user_id: i64) {
        self.cache.lock().remove(&user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Transaction, TransactionStatus};
    use chrono::Utc;
    use tempfile::NamedTempFile;

    fn test_store() -> (Arc<FraudStore>, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let store = Arc::new(FraudStore::new(temp.path().to_str().unwrap()).unwrap());
        (store, temp)
    }

    fn save_tx(store: &FraudStore, id: &str, user_id: i64, amount: f64) {
        store
            .save_transaction(&Transaction {
                transaction_id: id.to_string(),
                user_id,
                amount,
                currency: "NGN".to_string(),
                transaction_type: "payment".to_string(),
                merchant_id: "x".to_string(),
                timestamp: Utc::now(),
                payment_method: "card".to_string(),
                ip_address: None,
                device_fingerprint: None,
                location_data: None,
                transaction_status: TransactionStatus::Pending,
            })
            .unwrap();
    }

    #[test]
    fn caches_until_invalidated() {
        let (store, _tmp) = test_store();
        let window = HistoryWindow::with_ttl(store.clone(), Duration::from_secs(3600));

        save_tx(&store, "TXN_1", 1, 100.0);
        assert_eq!(window.history(1, 1).unwrap().len(), 1);

        // New write is invisible through the warm cache...
        save_tx(&store, "TXN_2", 1, 200.0);
        assert_eq!(window.history(1, 1).unwrap().len(), 1);

        // ...until the slice is invalidated.
        window.invalidate(1);
        assert_eq!(window.history(1, 1).unwrap().len(), 2);
    }

    #[test]
    fn different_day_span_bypasses_cache() {
        let (store, _tmp) = test_store();
        let window = HistoryWindow::with_ttl(store.clone(), Duration::from_secs(3600));

        save_tx(&store, "TXN_1", 1, 100.0);
        assert_eq!(window.history(1, 1).unwrap().len(), 1);

        save_tx(&store, "TXN_2", 1, 200.0);
        // Requesting a different window ignores the cached 1-day slice.
        assert_eq!(window.history(1, 7).unwrap().len(), 2);
    }

    #[test]
    fn users_are_cached_independently() {
        let (store, _tmp) = test_store();
        let window = HistoryWindow::with_ttl(store.clone(), Duration::from_secs(3600));

        save_tx(&store, "TXN_A", 1, 100.0);
        save_tx(&store, "TXN_B", 2, 100.0);
        assert_eq!(window.history(1, 1).unwrap().len(), 1);

        save_tx(&store, "TXN_C", 2, 200.0);
        assert_eq!(window.history(2, 1).unwrap().len(), 2);
    }
}
