//! # Safety Engine
//!
//! Geospatial safety intelligence for incident reporting apps.
//!
//! This library provides:
//! - A concurrent spatial index of point incidents (SOS alerts, harassment reports)
//! - Risk heatmaps over arbitrary viewports, merged into classified zone polygons
//! - A viewport cache with single-flight misses and write invalidation
//! - Safety scoring and ranking of externally supplied route candidates
//! - Nearest emergency-responder lookup
//!
//! ## Features
//!
//! - **`parallel`** - Score route candidates in parallel with rayon
//! - **`http`** - axum request layer and the `safety-server` binary
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::Utc;
//! use safety_engine::{BoundingBox, EngineConfig, Incident, IncidentKind, SafetyEngine};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), safety_engine::EngineError> {
//! let engine = SafetyEngine::new(EngineConfig::default())?;
//!
//! engine.on_incident_created(Incident::new(1, IncidentKind::Sos, 6.9271, 79.8612, Utc::now()))?;
//!
//! let viewport = BoundingBox::new(6.90, 6.95, 79.85, 79.90)?;
//! let heatmap = engine.heatmap(&viewport).await?;
//! assert_eq!(heatmap.stats.total_incidents, 1);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod geo_utils;

pub mod spatial_index;
pub use spatial_index::SpatialIndex;

// Risk aggregation and zone polygons
pub mod heatmap;
pub mod zones;
pub use heatmap::{AreaSafety, HeatmapResult, HeatmapStats, RiskAggregator, RiskLevel, RiskZone};

pub mod cache;
pub use cache::HeatmapCache;

pub mod route_scoring;
pub use route_scoring::{RouteAssessment, RouteCandidate, RouteRiskScorer, SafetyRating, ScoredRoute};

pub mod responders;
pub use responders::{NearestResponder, Responder, ResponderCategory, ResponderDirectory};

pub mod export;

pub mod engine;
pub use engine::SafetyEngine;

#[cfg(feature = "http")]
pub mod http;

pub use config::EngineConfig;
pub use error::EngineError;

// ============================================================================
// Core Types
// ============================================================================

/// A WGS84 coordinate in degrees.
///
/// # Example
/// ```
/// use safety_engine::GeoPoint;
/// let point = GeoPoint::new(6.9271, 79.8612); // Colombo
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lng")]
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// Validate, turning an out-of-range point into [`EngineError::InvalidCoordinate`].
    pub fn validate(&self) -> error::Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(EngineError::InvalidCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }

    /// geo uses (x, y) = (lng, lat).
    pub(crate) fn to_geo(self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }
}

/// Axis-aligned lat/lng query window.
///
/// A valid box has `min_lat < max_lat` and `min_lng < max_lng` with all
/// corners inside the WGS84 range. Boxes arriving from the wire are plain
/// data and must go through [`BoundingBox::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Create a validated bounding box.
    pub fn new(min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> error::Result<Self> {
        let bounds = Self { min_lat, max_lat, min_lng, max_lng };
        bounds.validate()?;
        Ok(bounds)
    }

    pub fn validate(&self) -> error::Result<()> {
        let corners = [self.min_lat, self.max_lat, self.min_lng, self.max_lng];
        if corners.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidBoundingBox("non-finite coordinate".to_string()));
        }
        if !GeoPoint::new(self.min_lat, self.min_lng).is_valid()
            || !GeoPoint::new(self.max_lat, self.max_lng).is_valid()
        {
            return Err(EngineError::InvalidBoundingBox(format!(
                "corner out of range: ({}, {}) - ({}, {})",
                self.min_lat, self.min_lng, self.max_lat, self.max_lng
            )));
        }
        if self.min_lat >= self.max_lat || self.min_lng >= self.max_lng {
            return Err(EngineError::InvalidBoundingBox(format!(
                "degenerate box: lat {}..{}, lng {}..{}",
                self.min_lat, self.max_lat, self.min_lng, self.max_lng
            )));
        }
        Ok(())
    }

    /// Smallest box enclosing the points. May be degenerate; `None` for empty input.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self { min_lat, max_lat, min_lng, max_lng })
    }

    /// Inclusive containment: points on an edge are inside.
    #[inline]
    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    pub fn lat_span(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn lng_span(&self) -> f64 {
        self.max_lng - self.min_lng
    }
}

/// Kind of reported incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentKind {
    Sos,
    Harassment,
}

/// SOS alerts and harassment reports are numbered independently, so an
/// incident is identified by its kind together with its id.
pub type IncidentKey = (IncidentKind, u64);

/// A single reported unsafe event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: u64,
    pub kind: IncidentKind,
    pub latitude: f64,
    pub longitude: f64,
    pub occurred_at: DateTime<Utc>,
}

impl Incident {
    pub fn new(
        id: u64,
        kind: IncidentKind,
        latitude: f64,
        longitude: f64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self { id, kind, latitude, longitude, occurred_at }
    }

    pub fn key(&self) -> IncidentKey {
        (self.kind, self.id)
    }

    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

// ============================================================================
// Tests
// ============================================================================
