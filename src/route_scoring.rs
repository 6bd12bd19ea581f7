//! Safety scoring of route candidates.
//!
//! Routes come from an external router; this module only judges them. Each
//! candidate is resampled evenly by distance and every sample is charged the
//! weight of the most severe zone it falls in. The mean charge is the route's
//! risk score. Candidates are ranked by score, then by length.

use std::collections::BTreeSet;

use geo::{Intersects, Polygon};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::{ScorerConfig, MIN_SAMPLE_STEP_METERS};
use crate::error::{EngineError, Result};
use crate::heatmap::{HeatmapResult, RiskLevel, RiskZone};
use crate::{geo_utils, BoundingBox, GeoPoint};

/// Verdict shown next to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyRating {
    Safe,
    Caution,
    #[serde(rename = "High Risk")]
    HighRisk,
    /// Zones could not be computed for the request
    Unknown,
}

impl SafetyRating {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyRating::Safe => "Safe",
            SafetyRating::Caution => "Caution",
            SafetyRating::HighRisk => "High Risk",
            SafetyRating::Unknown => "Unknown",
        }
    }
}

/// A route proposed by the router.
///
/// On the wire coordinates are `[lng, lat]` pairs, the order map SDKs use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteCandidate {
    #[serde(with = "lng_lat_pairs")]
    pub coordinates: Vec<GeoPoint>,
    #[serde(alias = "distance")]
    pub distance_meters: f64,
    #[serde(alias = "duration")]
    pub duration_seconds: f64,
}

impl RouteCandidate {
    pub fn new(coordinates: Vec<GeoPoint>, distance_meters: f64, duration_seconds: f64) -> Self {
        Self { coordinates, distance_meters, duration_seconds }
    }

    fn validate(&self, index: usize) -> Result<()> {
        let invalid = |reason: String| EngineError::InvalidRouteCandidate { index, reason };

        if self.coordinates.is_empty() {
            return Err(invalid("no coordinates".to_string()));
        }
        if let Some((i, p)) = self.coordinates.iter().enumerate().find(|(_, p)| !p.is_valid()) {
            return Err(invalid(format!(
                "coordinate {} out of range: ({}, {})",
                i, p.latitude, p.longitude
            )));
        }
        if !self.distance_meters.is_finite() || self.distance_meters < 0.0 {
            return Err(invalid(format!("bad distance {}", self.distance_meters)));
        }
        Ok(())
    }
}

/// A candidate together with its safety verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredRoute {
    #[serde(flatten)]
    pub route: RouteCandidate,
    pub safety_rating: SafetyRating,
    pub danger_zone_count: u32,
    pub risk_score: f64,
    pub sample_count: u32,
    /// Ids of the high-risk zones the route crosses
    pub danger_zone_ids: Vec<usize>,
}

/// Ranked routes for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteAssessment {
    /// Best first
    pub routes: Vec<ScoredRoute>,
    /// High-risk zones crossed by the recommended route
    pub danger_zones: Vec<RiskZone>,
    /// True when zones were unavailable and every route is `Unknown`
    pub degraded: bool,
}

impl RouteAssessment {
    pub fn recommended(&self) -> Option<&ScoredRoute> {
        self.routes.first()
    }

    pub fn alternatives(&self) -> &[ScoredRoute] {
        self.routes.get(1..).unwrap_or(&[])
    }
}

/// A zone ready for point tests.
struct PreparedZone {
    id: usize,
    level: RiskLevel,
    weight: f64,
    extent: BoundingBox,
    polygon: Polygon<f64>,
}

impl PreparedZone {
    fn new(zone: &RiskZone, config: &ScorerConfig) -> Option<Self> {
        Some(Self {
            id: zone.id,
            level: zone.risk_level,
            weight: zone.risk_level.weight(&config.weights),
            extent: BoundingBox::from_points(&zone.polygon)?,
            polygon: zone.to_polygon(),
        })
    }

    /// Boundaries count as inside, holes do not.
    fn contains(&self, point: &GeoPoint) -> bool {
        self.extent.contains(point) && self.polygon.intersects(&point.to_geo())
    }
}

/// Scores and ranks route candidates against a heatmap.
pub struct RouteRiskScorer {
    config: ScorerConfig,
}

impl RouteRiskScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Reject requests that cannot be scored at all.
    pub fn validate(&self, start: &GeoPoint, end: &GeoPoint, candidates: &[RouteCandidate]) -> Result<()> {
        start.validate()?;
        end.validate()?;
        if candidates.is_empty() {
            return Err(EngineError::NoRouteCandidates);
        }
        candidates
            .iter()
            .enumerate()
            .try_for_each(|(i, candidate)| candidate.validate(i))
    }

    /// One box covering every candidate plus both endpoints, grown by the margin.
    ///
    /// The box always has some extent, even for a single straight north-south route.
    pub fn envelope(&self, start: &GeoPoint, end: &GeoPoint, candidates: &[RouteCandidate]) -> BoundingBox {
        let mut points: Vec<GeoPoint> = candidates
            .iter()
            .flat_map(|c| c.coordinates.iter().copied())
            .collect();
        points.push(*start);
        points.push(*end);

        // `points` always holds start and end
        let tight = BoundingBox::from_points(&points).unwrap_or(BoundingBox {
            min_lat: start.latitude,
            max_lat: start.latitude,
            min_lng: start.longitude,
            max_lng: start.longitude,
        });
        geo_utils::expand_bounds(&tight, self.config.envelope_margin_meters.max(1.0))
    }

    /// Samples taken along a route of `length_meters`.
    pub fn sample_count(&self, length_meters: f64) -> usize {
        let step = self.config.sample_step_meters.max(MIN_SAMPLE_STEP_METERS);
        let by_step = (length_meters / step).ceil() as usize;
        by_step.saturating_add(1).max(self.config.min_samples as usize)
    }

    pub fn rate(&self, risk_score: f64) -> SafetyRating {
        if risk_score < self.config.safe_below {
            SafetyRating::Safe
        } else if risk_score < self.config.caution_below {
            SafetyRating::Caution
        } else {
            SafetyRating::HighRisk
        }
    }

    /// Score and rank validated candidates.
    ///
    /// With no heatmap every route is rated [`SafetyRating::Unknown`] and the
    /// assessment is flagged as degraded.
    pub fn assess(&self, candidates: Vec<RouteCandidate>, heatmap: Option<&HeatmapResult>) -> RouteAssessment {
        let Some(heatmap) = heatmap else {
            warn!(
                "[RouteRiskScorer] No risk zones available, rating {} routes as Unknown",
                candidates.len()
            );
            // Every score is zero, so length alone decides the order
            let mut routes: Vec<ScoredRoute> = candidates.into_iter().map(unknown).collect();
            routes.sort_by(|a, b| a.route.distance_meters.total_cmp(&b.route.distance_meters));
            return RouteAssessment {
                routes,
                danger_zones: Vec::new(),
                degraded: true,
            };
        };

        let zones: Vec<PreparedZone> = heatmap
            .zones
            .iter()
            .filter_map(|z| PreparedZone::new(z, &self.config))
            .collect();

        #[cfg(feature = "parallel")]
        let mut routes: Vec<ScoredRoute> = {
            use rayon::prelude::*;
            candidates
                .into_par_iter()
                .map(|c| self.score_candidate(c, &zones))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let mut routes: Vec<ScoredRoute> = candidates
            .into_iter()
            .map(|c| self.score_candidate(c, &zones))
            .collect();

        routes.sort_by(|a, b| {
            a.risk_score
                .total_cmp(&b.risk_score)
                .then(a.route.distance_meters.total_cmp(&b.route.distance_meters))
        });

        let danger_zones = routes
            .first()
            .map(|best| {
                best.danger_zone_ids
                    .iter()
                    .filter_map(|id| heatmap.zones.get(*id).cloned())
                    .collect()
            })
            .unwrap_or_default();

        RouteAssessment {
            routes,
            danger_zones,
            degraded: false,
        }
    }

    fn score_candidate(&self, route: RouteCandidate, zones: &[PreparedZone]) -> ScoredRoute {
        let length = geo_utils::polyline_length(&route.coordinates);
        let count = self.sample_count(length);
        let samples = geo_utils::sample_polyline(&route.coordinates, count);

        let mut total = 0.0;
        let mut high_zones = BTreeSet::new();

        for sample in &samples {
            let mut worst = 0.0_f64;
            for zone in zones.iter().filter(|z| z.contains(sample)) {
                worst = worst.max(zone.weight);
                if zone.level == RiskLevel::High {
                    high_zones.insert(zone.id);
                }
            }
            total += worst;
        }

        let risk_score = if samples.is_empty() { 0.0 } else { total / samples.len() as f64 };
        let rating = self.rate(risk_score);
        debug!(
            "[RouteRiskScorer] {:.0}m route, {} samples, score {:.3} -> {}",
            length,
            samples.len(),
            risk_score,
            rating.as_str()
        );

        ScoredRoute {
            route,
            safety_rating: rating,
            danger_zone_count: high_zones.len() as u32,
            risk_score,
            sample_count: samples.len() as u32,
            danger_zone_ids: high_zones.into_iter().collect(),
        }
    }
}

fn unknown(route: RouteCandidate) -> ScoredRoute {
    ScoredRoute {
        route,
        safety_rating: SafetyRating::Unknown,
        danger_zone_count: 0,
        risk_score: 0.0,
        sample_count: 0,
        danger_zone_ids: Vec::new(),
    }
}

/// `Vec<GeoPoint>` as `[[lng, lat], ...]`.
mod lng_lat_pairs {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::GeoPoint;

    pub fn serialize<S: Serializer>(points: &[GeoPoint], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(points.iter().map(|p| [p.longitude, p.latitude]))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<GeoPoint>, D::Error> {
        let pairs: Vec<[f64; 2]> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().map(|[lng, lat]| GeoPoint::new(lat, lng)).collect())
    }
}
