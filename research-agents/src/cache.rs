//! Signal cache - memoizes consensus per (instrument, timeframe)
//!
//! Concurrent requests for the same key share one in-flight computation,
//! which runs in its own task and settles its slot even if every caller
//! stops waiting.
//! Successful results are kept for the TTL in force when they were computed;
//! failures are never cached.

use crate::orchestrator::ConsensusUnavailable;
use common::ConsensusSignal;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error};

type ConsensusResult = Result<ConsensusSignal, ConsensusUnavailable>;
type SharedConsensus = Shared<BoxFuture<'static, ConsensusResult>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub instrument: String,
    pub timeframe: String,
}

impl CacheKey {
    pub fn new(instrument: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            timeframe: timeframe.into(),
        }
    }
}

enum Slot {
    Ready {
        signal: ConsensusSignal,
        expires_at: Instant,
    },
    Pending {
        generation: u64,
        future: SharedConsensus,
    },
}

enum Lookup {
    Hit(ConsensusSignal),
    Join(SharedConsensus),
    Expired,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined an in-flight computation
    pub coalesced: u64,
    pub entries: usize,
}

/// Shared single-flight consensus cache
#[derive(Default)]
pub struct SignalCache {
    slots: Arc<DashMap<CacheKey, Slot>>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

impl SignalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached consensus for `key`, or compute it once.
    ///
    /// `compute` is only invoked when no fresh entry and no in-flight
    /// computation exist for the key.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        ttl: Duration,
        compute: F,
    ) -> ConsensusResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConsensusResult> + Send + 'static,
    {
        let future = match self.slots.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let lookup = match entry.get() {
                    Slot::Ready { signal, expires_at } if Instant::now() < *expires_at => {
                        Lookup::Hit(signal.clone())
                    }
                    Slot::Ready { .. } => Lookup::Expired,
                    Slot::Pending { future, .. } => Lookup::Join(future.clone()),
                };

                match lookup {
                    Lookup::Hit(signal) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        debug!("Cache hit for {}/{}", key.instrument, key.timeframe);
                        return Ok(signal);
                    }
                    Lookup::Join(future) => {
                        self.coalesced.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            "Joining in-flight consensus for {}/{}",
                            key.instrument, key.timeframe
                        );
                        future
                    }
                    Lookup::Expired => {
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        debug!("Cache entry expired for {}/{}", key.instrument, key.timeframe);
                        let (generation, future) = self.flight(key.clone(), ttl, compute());
                        entry.insert(Slot::Pending {
                            generation,
                            future: future.clone(),
                        });
                        future
                    }
                }
            }
            Entry::Vacant(entry) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss for {}/{}", key.instrument, key.timeframe);
                let (generation, future) = self.flight(key.clone(), ttl, compute());
                entry.insert(Slot::Pending {
                    generation,
                    future: future.clone(),
                });
                future
            }
        };

        future.await
    }

    /// Run a computation in its own task so it settles its slot even when
    /// every caller waiting on it has gone away
    fn flight<Fut>(&self, key: CacheKey, ttl: Duration, work: Fut) -> (u64, SharedConsensus)
    where
        Fut: Future<Output = ConsensusResult> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let slots = Arc::clone(&self.slots);
        let instrument = key.instrument.clone();

        let task = tokio::spawn({
            let slots = Arc::clone(&slots);
            let key = key.clone();
            async move {
                let result = work.await;
                settle(&slots, key, generation, ttl, &result);
                result
            }
        });

        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Consensus task for {} did not complete: {}", instrument, e);
                    let failed = Err(ConsensusUnavailable::Cancelled { instrument });
                    settle(&slots, key, generation, ttl, &failed);
                    failed
                }
            }
        }
        .boxed()
        .shared();

        (generation, future)
    }

    /// Drop the entry for a key; an in-flight computation will not be stored
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.slots.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Remove expired entries, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            !matches!(slot, Slot::Ready { expires_at, .. } if *expires_at <= now)
        });
        let purged = before.saturating_sub(self.slots.len());
        if purged > 0 {
            debug!("Purged {} expired consensus entries", purged);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            entries: self.slots.len(),
        }
    }
}

/// Store a finished round in its slot, unless the slot was invalidated or
/// replaced while the round was running
fn settle(
    slots: &DashMap<CacheKey, Slot>,
    key: CacheKey,
    generation: u64,
    ttl: Duration,
    result: &ConsensusResult,
) {
    if let Entry::Occupied(mut entry) = slots.entry(key) {
        let ours = matches!(entry.get(), Slot::Pending { generation: g, .. } if *g == generation);
        if !ours {
            return;
        }
        match result {
            Ok(signal) => {
                entry.insert(Slot::Ready {
                    signal: signal.clone(),
                    expires_at: Instant::now() + ttl,
                });
            }
            Err(_) => {
                entry.remove();
            }
        }
    }
}
