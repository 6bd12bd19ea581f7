//! Bucketed spatial index of incidents.
//!
//! The plane is cut into square buckets of a fixed size in degrees. Each
//! bucket owns an R-tree of the incidents that fall in it, behind its own
//! lock, so ingesting an incident only blocks queries that touch the same
//! bucket. The bucket map itself is write-locked only when a new bucket is
//! created.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{debug, warn};
use rstar::{RTree, RTreeObject, AABB};

use crate::error::Result;
use crate::{BoundingBox, Incident, IncidentKey};

/// Bucket coordinate: (row, col) = floor(lat / size), floor(lng / size)
type BucketCoord = (i64, i64);

type Bucket = Arc<RwLock<RTree<IndexedIncident>>>;

// =============================================================================
// R-tree entries
// =============================================================================

#[derive(Debug, Clone)]
struct IndexedIncident {
    incident: Incident,
}

impl RTreeObject for IndexedIncident {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.incident.longitude, self.incident.latitude])
    }
}

// =============================================================================
// Index
// =============================================================================

/// Concurrent incident index answering inclusive bounding-box range queries.
pub struct SpatialIndex {
    bucket_size: f64,
    buckets: RwLock<HashMap<BucketCoord, Bucket>>,
    /// Keys already indexed; only writers touch this
    seen: Mutex<HashSet<IncidentKey>>,
    len: AtomicUsize,
}

impl SpatialIndex {
    /// `bucket_size_degrees` must be positive; [`crate::EngineConfig::validate`] enforces it.
    pub fn new(bucket_size_degrees: f64) -> Self {
        Self {
            bucket_size: bucket_size_degrees,
            buckets: RwLock::new(HashMap::new()),
            seen: Mutex::new(HashSet::new()),
            len: AtomicUsize::new(0),
        }
    }

    fn bucket_coord(&self, latitude: f64, longitude: f64) -> BucketCoord {
        (
            (latitude / self.bucket_size).floor() as i64,
            (longitude / self.bucket_size).floor() as i64,
        )
    }

    /// Add an incident.
    ///
    /// Returns `Ok(false)` if an incident with the same kind and id was
    /// already indexed. Out-of-range coordinates are rejected and never enter
    /// the index.
    pub fn insert(&self, incident: Incident) -> Result<bool> {
        incident.location().validate()?;

        {
            let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
            if !seen.insert(incident.key()) {
                debug!("[SpatialIndex] Duplicate incident {:?} ignored", incident.key());
                return Ok(false);
            }
        }

        let coord = self.bucket_coord(incident.latitude, incident.longitude);
        let bucket = self.bucket_for_insert(coord);
        bucket
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(IndexedIncident { incident });

        self.len.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn bucket_for_insert(&self, coord: BucketCoord) -> Bucket {
        if let Some(bucket) = self
            .buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&coord)
        {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(buckets.entry(coord).or_default())
    }

    /// Bulk insert, e.g. when hydrating from the incident store.
    ///
    /// Invalid incidents are skipped with a warning. Returns how many new
    /// incidents were indexed.
    pub fn extend<I>(&self, incidents: I) -> usize
    where
        I: IntoIterator<Item = Incident>,
    {
        let mut inserted = 0;
        for incident in incidents {
            let key = incident.key();
            match self.insert(incident) {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(e) => warn!("[SpatialIndex] Skipping incident {:?}: {}", key, e),
            }
        }
        inserted
    }

    /// All incidents inside `bounds`, edges included, ordered by (kind, id).
    pub fn query_range(&self, bounds: &BoundingBox) -> Vec<Incident> {
        let (row_min, col_min) = self.bucket_coord(bounds.min_lat, bounds.min_lng);
        let (row_max, col_max) = self.bucket_coord(bounds.max_lat, bounds.max_lng);

        let candidates: Vec<Bucket> = {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            let span = (row_max - row_min + 1) as u128 * (col_max - col_min + 1) as u128;

            if span <= buckets.len() as u128 {
                (row_min..=row_max)
                    .flat_map(|row| (col_min..=col_max).map(move |col| (row, col)))
                    .filter_map(|coord| buckets.get(&coord).cloned())
                    .collect()
            } else {
                // Sparse data under a wide box: walk the populated buckets instead
                buckets
                    .iter()
                    .filter(|((row, col), _)| {
                        (row_min..=row_max).contains(row) && (col_min..=col_max).contains(col)
                    })
                    .map(|(_, bucket)| Arc::clone(bucket))
                    .collect()
            }
        };

        let envelope = AABB::from_corners(
            [bounds.min_lng, bounds.min_lat],
            [bounds.max_lng, bounds.max_lat],
        );

        let mut found: Vec<Incident> = Vec::new();
        for bucket in candidates {
            let tree = bucket.read().unwrap_or_else(PoisonError::into_inner);
            found.extend(
                tree.locate_in_envelope(&envelope)
                    .filter(|entry| bounds.contains(&entry.incident.location()))
                    .map(|entry| entry.incident.clone()),
            );
        }

        found.sort_by_key(|incident| incident.key());
        found
    }

    /// Number of indexed incidents.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of populated buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
