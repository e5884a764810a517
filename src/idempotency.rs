use crate::models::ListingResult;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// In-process replay cache for `Idempotency-Key` requests. Entries expire after `ttl`.
#[derive(Clone)]
pub struct IdempotencyCache {
    entries: Arc<Mutex<HashMap<String, (Instant, ListingResult)>>>,
    ttl: Duration,
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<ListingResult> {
        let mut guard = self.entries.lock().await;
        match guard.get(key) {
            Some((stored, result)) if stored.elapsed() < self.ttl => Some(result.clone()),
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn put(&self, key: &str, result: &ListingResult) {
        let mut guard = self.entries.lock().await;
        guard.retain(|_, (stored, _)| stored.elapsed() < self.ttl);
        guard.insert(key.to_string(), (Instant::now(), result.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Diagnostics, Status};
    use chrono::Utc;

    fn result(sku: &str) -> ListingResult {
        ListingResult {
            status: Status::DryOk,
            sku: sku.into(),
            preview: None,
            source_url: None,
            when: Utc::now(),
            message: None,
            diagnostics: Diagnostics::default(),
            stages: Vec::new(),
        }
    }

    #[tokio::test]
    async fn stored_result_is_replayed() {
        let cache = IdempotencyCache::default();
        assert!(cache.get("k1").await.is_none());
        cache.put("k1", &result("hesi-boost-500-ml")).await;
        assert_eq!(cache.get("k1").await.map(|r| r.sku), Some("hesi-boost-500-ml".into()));
    }

    #[tokio::test]
    async fn expired_entries_are_dropped() {
        let cache = IdempotencyCache::new(Duration::ZERO);
        cache.put("k1", &result("x")).await;
        assert!(cache.get("k1").await.is_none());
    }
}
