//! Blockhash tracking
//!
//! Fetches fresh anchors from the ledger and answers validity questions.
//! Validity is purely height-based: block production rates vary, so wall-clock
//! age says nothing about whether an anchor is still includable.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::errors::LifecycleError;
use crate::metrics::metrics;
use crate::transport::LedgerQuery;
use crate::types::{Anchor, Durability};

/// Pure validity check: the anchor is includable while `current_height <= expiry_height`
#[inline]
pub fn is_valid(anchor: &Anchor, current_height: u64) -> bool {
    current_height <= anchor.expiry_height
}

/// Caches the latest anchor per durability level.
///
/// Anchors are `Copy` values, so replacing the cache never affects envelopes
/// already signed against an older, still-valid anchor.
#[derive(Debug)]
pub struct BlockhashTracker {
    source: Arc<dyn LedgerQuery>,
    latest: DashMap<Durability, Anchor>,
}

impl BlockhashTracker {
    pub fn new(source: Arc<dyn LedgerQuery>) -> Self {
        Self {
            source,
            latest: DashMap::new(),
        }
    }

    /// Fetch a fresh anchor consistent with `level`
    #[instrument(skip(self), fields(level = %level))]
    pub async fn fetch(&self, level: Durability) -> Result<Anchor, LifecycleError> {
        let (blockhash, height) = tokio::try_join!(
            self.source.latest_blockhash(level),
            self.source.current_height(level),
        )
        .inspect_err(|e| {
            metrics().anchor_fetch_failures.inc();
            warn!(error = %e, "Anchor fetch failed");
        })?;

        let (value, expiry_height) = blockhash;
        if expiry_height < height {
            warn!(
                blockhash = %value,
                expiry_height = expiry_height,
                height = height,
                "Fetched anchor is already past its validity window"
            );
        }

        let anchor = Anchor::new(value, expiry_height, height);
        self.latest
            .entry(level)
            .and_modify(|cached| {
                if anchor.expiry_height >= cached.expiry_height {
                    *cached = anchor;
                }
            })
            .or_insert(anchor);

        metrics().anchors_fetched.inc();
        debug!(
            blockhash = %value,
            expiry_height = expiry_height,
            fetched_at_height = height,
            "Anchor fetched"
        );
        Ok(anchor)
    }

    /// Most recently fetched anchor for `level`, if any
    pub fn cached(&self, level: Durability) -> Option<Anchor> {
        self.latest.get(&level).map(|entry| *entry.value())
    }

    /// Cached anchor if still valid at `current_height`, otherwise a fresh fetch
    pub async fn cached_or_fetch(
        &self,
        level: Durability,
        current_height: u64,
    ) -> Result<Anchor, LifecycleError> {
        match self.cached(level) {
            Some(anchor) if is_valid(&anchor, current_height) => Ok(anchor),
            _ => self.fetch(level).await,
        }
    }

    pub fn is_valid(&self, anchor: &Anchor, current_height: u64) -> bool {
        is_valid(anchor, current_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryLedger;
    use proptest::prelude::*;
    use solana_sdk::hash::Hash;

    proptest! {
        #[test]
        fn prop_validity_is_height_comparison(expiry in any::<u64>(), height in any::<u64>()) {
            let anchor = Anchor::new(Hash::default(), expiry, 0);
            prop_assert_eq!(is_valid(&anchor, height), height <= expiry);
        }
    }

    #[tokio::test]
    async fn test_fetch_records_window() {
        let ledger = Arc::new(InMemoryLedger::new("ledger"));
        ledger.set_height(500);
        let tracker = BlockhashTracker::new(ledger.clone());

        let anchor = tracker.fetch(Durability::Confirmed).await.unwrap();
        assert_eq!(anchor.fetched_at_height, 500);
        assert_eq!(anchor.expiry_height, 500 + InMemoryLedger::VALIDITY_WINDOW);
        assert_eq!(tracker.cached(Durability::Confirmed), Some(anchor));
        assert_eq!(tracker.cached(Durability::Finalized), None);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_transport_error() {
        let ledger = Arc::new(InMemoryLedger::new("ledger"));
        ledger.fail_queries(true);
        let tracker = BlockhashTracker::new(ledger);

        let err = tracker.fetch(Durability::Processed).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Transport(_)));
    }

    #[tokio::test]
    async fn test_refetch_keeps_old_anchor_usable() {
        let ledger = Arc::new(InMemoryLedger::new("ledger"));
        let tracker = BlockhashTracker::new(ledger.clone());

        let first = tracker.fetch(Durability::Confirmed).await.unwrap();
        ledger.advance(10);
        let second = tracker.fetch(Durability::Confirmed).await.unwrap();

        assert_ne!(first.value, second.value);
        assert!(is_valid(&first, 10));
        assert_eq!(tracker.cached(Durability::Confirmed), Some(second));
    }

    #[tokio::test]
    async fn test_cached_or_fetch_refreshes_expired() {
        let ledger = Arc::new(InMemoryLedger::new("ledger"));
        let tracker = BlockhashTracker::new(ledger.clone());

        let first = tracker.fetch(Durability::Confirmed).await.unwrap();
        let same = tracker
            .cached_or_fetch(Durability::Confirmed, first.expiry_height)
            .await
            .unwrap();
        assert_eq!(first, same);

        ledger.advance(InMemoryLedger::VALIDITY_WINDOW + 1);
        let fresh = tracker
            .cached_or_fetch(Durability::Confirmed, first.expiry_height + 1)
            .await
            .unwrap();
        assert!(fresh.expiry_height > first.expiry_height);
    }
}
