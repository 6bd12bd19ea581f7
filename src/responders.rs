//! Nearest emergency responder lookup.
//!
//! The dataset is small (hundreds of stations at most) and changes rarely,
//! so lookups are a linear scan over an immutable snapshot. Reloading swaps
//! the snapshot wholesale; readers holding the old one finish undisturbed.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::{geo_utils, GeoPoint};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponderCategory {
    /// Entries without a category are police stations
    #[default]
    Police,
    Hospital,
}

/// A police station or hospital.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Responder {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: ResponderCategory,
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lng")]
    pub longitude: f64,
    pub phone: String,
}

impl Responder {
    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearestResponder {
    pub responder: Responder,
    pub distance_meters: f64,
}

impl NearestResponder {
    /// Distance as the app displays it, e.g. "850 m" or "1.23 km".
    pub fn distance_label(&self) -> String {
        geo_utils::format_distance(self.distance_meters)
    }
}

/// Swappable responder dataset.
#[derive(Debug, Default)]
pub struct ResponderDirectory {
    responders: RwLock<Arc<Vec<Responder>>>,
}

impl ResponderDirectory {
    pub fn new(responders: Vec<Responder>) -> Self {
        Self {
            responders: RwLock::new(Arc::new(clean(responders))),
        }
    }

    /// Parse a JSON array of responders.
    pub fn from_json_str(source: &str) -> Result<Self> {
        let responders: Vec<Responder> = serde_json::from_str(source)
            .map_err(|e| EngineError::InvalidConfig(format!("responder dataset: {e}")))?;
        Ok(Self::new(responders))
    }

    /// Replace the whole dataset. Returns how many responders were kept.
    pub fn replace(&self, responders: Vec<Responder>) -> usize {
        let cleaned = Arc::new(clean(responders));
        let kept = cleaned.len();
        *self.responders.write().unwrap_or_else(PoisonError::into_inner) = cleaned;
        info!("[ResponderDirectory] Loaded {} responders", kept);
        kept
    }

    pub fn snapshot(&self) -> Arc<Vec<Responder>> {
        Arc::clone(&self.responders.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `limit` responders closest to `point`, nearest first.
    ///
    /// Equal distances are ordered by responder id.
    pub fn nearest(
        &self,
        point: &GeoPoint,
        category: Option<ResponderCategory>,
        limit: usize,
    ) -> Result<Vec<NearestResponder>> {
        point.validate()?;

        let snapshot = self.snapshot();
        let mut found: Vec<NearestResponder> = snapshot
            .iter()
            .filter(|r| category.map_or(true, |c| r.category == c))
            .map(|r| NearestResponder {
                distance_meters: geo_utils::haversine_distance(point, &r.location()),
                responder: r.clone(),
            })
            .collect();

        found.sort_by(|a, b| {
            a.distance_meters
                .total_cmp(&b.distance_meters)
                .then_with(|| a.responder.id.cmp(&b.responder.id))
        });
        found.truncate(limit);
        Ok(found)
    }
}

/// Drop responders with bad coordinates or a repeated id.
fn clean(responders: Vec<Responder>) -> Vec<Responder> {
    let mut seen = HashSet::new();
    responders
        .into_iter()
        .filter(|r| {
            if !r.location().is_valid() {
                warn!(
                    "[ResponderDirectory] Dropping {} ({}): invalid coordinates ({}, {})",
                    r.id, r.name, r.latitude, r.longitude
                );
                return false;
            }
            if !seen.insert(r.id.clone()) {
                warn!("[ResponderDirectory] Dropping duplicate responder id {} ({})", r.id, r.name);
                return false;
            }
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responder(id: &str, category: ResponderCategory, lat: f64, lng: f64) -> Responder {
        Responder {
            id: id.to_string(),
            name: format!("Station {id}"),
            category,
            latitude: lat,
            longitude: lng,
            phone: "0112421111".to_string(),
        }
    }

    /// Offset north of `origin` by `meters`
    fn north_of(origin: GeoPoint, meters: f64) -> (f64, f64) {
        (origin.latitude + meters / 111_195.0, origin.longitude)
    }

    #[test]
    fn test_nearest_two_of_three() {
        let origin = GeoPoint::new(6.9271, 79.8612);
        let (lat_a, lng_a) = north_of(origin, 100.0);
        let (lat_b, lng_b) = north_of(origin, 500.0);
        let (lat_c, lng_c) = north_of(origin, 2000.0);

        let directory = ResponderDirectory::new(vec![
            responder("c", ResponderCategory::Police, lat_c, lng_c),
            responder("a", ResponderCategory::Police, lat_a, lng_a),
            responder("b", ResponderCategory::Police, lat_b, lng_b),
        ]);

        let nearest = directory.nearest(&origin, None, 2).unwrap();
        let ids: Vec<&str> = nearest.iter().map(|n| n.responder.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!((nearest[0].distance_meters - 100.0).abs() < 1.0);
        assert!((nearest[1].distance_meters - 500.0).abs() < 1.0);
        assert_eq!(nearest[0].distance_label(), "100 m");
    }

    #[test]
    fn test_category_filter() {
        let origin = GeoPoint::new(6.9271, 79.8612);
        let directory = ResponderDirectory::new(vec![
            responder("p1", ResponderCategory::Police, 6.9280, 79.8612),
            responder("h1", ResponderCategory::Hospital, 6.9400, 79.8612),
        ]);

        let hospitals = directory.nearest(&origin, Some(ResponderCategory::Hospital), 5).unwrap();
        assert_eq!(hospitals.len(), 1);
        assert_eq!(hospitals[0].responder.id, "h1");
    }

    #[test]
    fn test_ties_ordered_by_id() {
        let origin = GeoPoint::new(6.9271, 79.8612);
        let directory = ResponderDirectory::new(vec![
            responder("z", ResponderCategory::Police, 6.9300, 79.8612),
            responder("m", ResponderCategory::Police, 6.9300, 79.8612),
        ]);
        let nearest = directory.nearest(&origin, None, 2).unwrap();
        assert_eq!(nearest[0].responder.id, "m");
        assert_eq!(nearest[1].responder.id, "z");
    }

    #[test]
    fn test_empty_and_invalid() {
        let directory = ResponderDirectory::default();
        assert!(directory.nearest(&GeoPoint::new(6.9, 79.8), None, 3).unwrap().is_empty());
        assert!(directory.nearest(&GeoPoint::new(99.0, 79.8), None, 3).is_err());
    }

    #[test]
    fn test_load_drops_duplicates_and_bad_rows() {
        let json = r#"[
            {"id": "1", "name": "Colombo Central Police Station", "lat": 6.9271, "lng": 79.8612, "phone": "+94112421111"},
            {"id": "1", "name": "Colombo Central Police Station", "lat": 6.9271, "lng": 79.8612, "phone": "+94112421111"},
            {"id": "2", "name": "Kottawa", "lat": 6.841332, "lng": 79.963553, "phone": "0112782760"},
            {"id": "H7", "name": "National Hospital", "category": "hospital", "latitude": 6.9186, "longitude": 79.8676, "phone": "0112691111"},
            {"id": "X", "name": "Nowhere", "lat": 123.0, "lng": 79.0, "phone": ""}
        ]"#;

        let directory = ResponderDirectory::from_json_str(json).unwrap();
        assert_eq!(directory.len(), 3);

        let snapshot = directory.snapshot();
        assert_eq!(snapshot[0].category, ResponderCategory::Police);
        assert_eq!(snapshot[2].category, ResponderCategory::Hospital);
    }

    #[test]
    fn test_replace_swaps_dataset() {
        let directory = ResponderDirectory::new(vec![responder("a", ResponderCategory::Police, 6.92, 79.86)]);
        let old = directory.snapshot();

        let kept = directory.replace(vec![
            responder("b", ResponderCategory::Police, 6.93, 79.86),
            responder("c", ResponderCategory::Hospital, 6.94, 79.86),
        ]);
        assert_eq!(kept, 2);
        assert_eq!(old.len(), 1);
        assert_eq!(directory.snapshot()[0].id, "b");
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(ResponderDirectory::from_json_str("{not json").is_err());
    }
}
