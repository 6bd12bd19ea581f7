//! Viewport heatmap cache.
//!
//! Keys are bounding boxes snapped outward to a fixed grid, so small pans of
//! the map and polling clients collapse onto the same entry. The snapped box
//! is also the box that gets aggregated, which makes every caller of a key
//! see the same result.
//!
//! A miss registers an in-flight computation under the key. Concurrent
//! misses await that computation instead of starting their own. The work runs
//! on a detached tokio task, so a caller that gives up does not cancel it and
//! the result still reaches the other waiters and the cache.
//!
//! A new incident evicts every entry whose key region contains it. If the
//! entry was still being computed, the waiters get their result but it is not
//! stored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info};

use crate::config::CacheConfig;
use crate::error::{EngineError, Result};
use crate::heatmap::HeatmapResult;
use crate::{BoundingBox, GeoPoint};

/// Keep a thin box from collapsing onto one grid line; `limit` is the world
/// edge in grid units.
fn widen(min: i64, max: i64, limit: f64) -> (i64, i64) {
    if min < max {
        (min, max)
    } else if ((max + 1) as f64) <= limit + SNAP_TOLERANCE {
        (min, max + 1)
    } else {
        (min - 1, max)
    }
}

type SharedComputation = Shared<BoxFuture<'static, Result<Arc<HeatmapResult>>>>;

/// Snapped box in grid units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    min_lat: i64,
    max_lat: i64,
    min_lng: i64,
    max_lng: i64,
}

enum Slot {
    Ready {
        result: Arc<HeatmapResult>,
        expires_at: Instant,
    },
    Pending {
        flight: u64,
        computation: SharedComputation,
    },
}

/// Cache of heatmap results keyed by snapped viewport.
pub struct HeatmapCache {
    config: CacheConfig,
    slots: Mutex<HashMap<CacheKey, Slot>>,
    next_flight: AtomicU64,
}

/// Values this close to a grid line snap onto it.
const SNAP_TOLERANCE: f64 = 1e-6;

impl HeatmapCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
            next_flight: AtomicU64::new(0),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key_for(&self, bounds: &BoundingBox) -> CacheKey {
        let q = self.config.quantum_degrees;
        let snap = |value: f64, outward: fn(f64) -> f64| -> i64 {
            let scaled = value / q;
            let nearest = scaled.round();
            if (scaled - nearest).abs() < SNAP_TOLERANCE {
                nearest as i64
            } else {
                outward(scaled) as i64
            }
        };

        let (min_lat, max_lat) = widen(
            snap(bounds.min_lat, f64::floor),
            snap(bounds.max_lat, f64::ceil),
            90.0 / q,
        );
        let (min_lng, max_lng) = widen(
            snap(bounds.min_lng, f64::floor),
            snap(bounds.max_lng, f64::ceil),
            180.0 / q,
        );
        CacheKey {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        }
    }

    fn region(&self, key: &CacheKey) -> BoundingBox {
        // Round away the multiplication error so that 690 × 0.01 is exactly 6.9
        let edge = |units: i64| (units as f64 * self.config.quantum_degrees * 1e9).round() / 1e9;
        BoundingBox {
            min_lat: edge(key.min_lat).max(-90.0),
            max_lat: edge(key.max_lat).min(90.0),
            min_lng: edge(key.min_lng).max(-180.0),
            max_lng: edge(key.max_lng).min(180.0),
        }
    }

    /// The box a query for `bounds` is actually computed over.
    pub fn snapped(&self, bounds: &BoundingBox) -> BoundingBox {
        self.region(&self.key_for(bounds))
    }

    /// Cached result for `bounds`, if present and not expired.
    pub fn get(&self, bounds: &BoundingBox) -> Option<Arc<HeatmapResult>> {
        let key = self.key_for(bounds);
        match self.slots().get(&key) {
            Some(Slot::Ready { result, expires_at }) if *expires_at > Instant::now() => {
                Some(Arc::clone(result))
            }
            _ => None,
        }
    }

    /// Store a result, replacing whatever the key held.
    pub fn put(&self, bounds: &BoundingBox, result: Arc<HeatmapResult>) {
        let key = self.key_for(bounds);
        self.slots().insert(
            key,
            Slot::Ready {
                result,
                expires_at: Instant::now() + self.config.ttl(),
            },
        );
    }

    /// Return the cached result for `bounds` or compute it once.
    ///
    /// `compute` receives the snapped box and runs on tokio's blocking pool.
    /// Concurrent callers with the same key share a single call. Failed
    /// computations are not cached.
    pub async fn get_or_compute<F>(self: &Arc<Self>, bounds: &BoundingBox, compute: F) -> Result<Arc<HeatmapResult>>
    where
        F: FnOnce(BoundingBox) -> Result<HeatmapResult> + Send + 'static,
    {
        bounds.validate()?;
        let key = self.key_for(bounds);

        let computation = {
            let mut slots = self.slots();
            match slots.get(&key) {
                Some(Slot::Ready { result, expires_at }) if *expires_at > Instant::now() => {
                    debug!("[HeatmapCache] Hit {:?}", key);
                    return Ok(Arc::clone(result));
                }
                Some(Slot::Pending { computation, .. }) => {
                    debug!("[HeatmapCache] Joining in-flight computation for {:?}", key);
                    computation.clone()
                }
                _ => {
                    let flight = self.next_flight.fetch_add(1, Ordering::Relaxed);
                    debug!("[HeatmapCache] Miss {:?}, starting flight {}", key, flight);
                    let computation = self.start_flight(key, flight, compute);
                    slots.insert(
                        key,
                        Slot::Pending {
                            flight,
                            computation: computation.clone(),
                        },
                    );
                    computation
                }
            }
        };

        computation.await
    }

    fn start_flight<F>(self: &Arc<Self>, key: CacheKey, flight: u64, compute: F) -> SharedComputation
    where
        F: FnOnce(BoundingBox) -> Result<HeatmapResult> + Send + 'static,
    {
        let cache = Arc::clone(self);
        let region = self.region(&key);

        let task = tokio::spawn(async move {
            let outcome = match tokio::task::spawn_blocking(move || compute(region)).await {
                Ok(result) => result.map(Arc::new),
                Err(e) => Err(EngineError::Internal(format!("heatmap computation aborted: {e}"))),
            };
            cache.complete(key, flight, &outcome);
            outcome
        });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(EngineError::Internal(format!("heatmap task failed: {e}"))),
            }
        }
        .boxed()
        .shared()
    }

    /// Publish a finished flight, unless the key was invalidated or replaced meanwhile.
    fn complete(&self, key: CacheKey, flight: u64, outcome: &Result<Arc<HeatmapResult>>) {
        let mut slots = self.slots();
        let current = matches!(
            slots.get(&key),
            Some(Slot::Pending { flight: f, .. }) if *f == flight
        );
        if !current {
            debug!("[HeatmapCache] Discarding result of detached flight {}", flight);
            return;
        }

        match outcome {
            Ok(result) => {
                slots.insert(
                    key,
                    Slot::Ready {
                        result: Arc::clone(result),
                        expires_at: Instant::now() + self.config.ttl(),
                    },
                );
            }
            Err(e) => {
                debug!("[HeatmapCache] Flight {} failed: {}", flight, e);
                slots.remove(&key);
            }
        }
    }

    /// Evict every entry whose key region contains `point`. Returns how many.
    pub fn invalidate(&self, point: &GeoPoint) -> usize {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|key, _| !self.region(key).contains(point));
        let evicted = before - slots.len();
        if evicted > 0 {
            info!(
                "[HeatmapCache] Invalidated {} entries at ({:.5}, {:.5})",
                evicted, point.latitude, point.longitude
            );
        }
        evicted
    }

    /// Drop expired entries. Returns how many.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Ready { expires_at, .. } => *expires_at > now,
            Slot::Pending { .. } => true,
        });
        before - slots.len()
    }

    /// Number of entries, in-flight ones included.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.slots().clear();
    }
}
