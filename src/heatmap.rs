//! Risk heatmap aggregation.
//!
//! Splits a viewport into an N×N grid, bins the incidents the spatial index
//! returns for it, classifies every non-empty cell by incident count and
//! merges 4-connected cells of equal level into zone polygons.
//!
//! Each incident lands in exactly one cell: its fractional grid position is
//! floored, and positions on the max edges are clamped into the last row or
//! column. Incidents on interior cell edges are therefore never counted twice.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use geo::{Coord, LineString, Polygon};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{AggregatorConfig, RiskThresholds, SeverityWeights};
use crate::error::{EngineError, Result};
use crate::spatial_index::SpatialIndex;
use crate::zones::{self, Vertex};
use crate::{geo_utils, BoundingBox, GeoPoint, Incident, IncidentKind};

/// Classification of a cell or zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Level for a cell holding `count` incidents. Empty cells have none.
    pub fn classify(count: u32, thresholds: &RiskThresholds) -> Option<Self> {
        match count {
            0 => None,
            c if c <= thresholds.low_max => Some(RiskLevel::Low),
            c if c <= thresholds.medium_max => Some(RiskLevel::Medium),
            _ => Some(RiskLevel::High),
        }
    }

    /// Penalty a route sample takes inside a zone of this level.
    pub fn weight(self, weights: &SeverityWeights) -> f64 {
        match self {
            RiskLevel::Low => weights.low,
            RiskLevel::Medium => weights.medium,
            RiskLevel::High => weights.high,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// A merged region of same-level cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskZone {
    /// Position in [`HeatmapResult::zones`]
    pub id: usize,
    /// Closed outer ring, counter-clockwise in the (lng, lat) plane
    pub polygon: Vec<GeoPoint>,
    /// Closed inner rings, clockwise
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub holes: Vec<Vec<GeoPoint>>,
    pub risk_level: RiskLevel,
    pub sos_count: u32,
    pub harassment_count: u32,
    pub cell_count: u32,
}

impl RiskZone {
    pub fn total_incidents(&self) -> u32 {
        self.sos_count + self.harassment_count
    }

    /// The zone as a geo polygon with (x, y) = (lng, lat).
    pub fn to_polygon(&self) -> Polygon<f64> {
        fn ring(points: &[GeoPoint]) -> LineString<f64> {
            points
                .iter()
                .map(|p| Coord { x: p.longitude, y: p.latitude })
                .collect()
        }

        Polygon::new(ring(&self.polygon), self.holes.iter().map(|h| ring(h)).collect())
    }
}

/// Incident totals over the whole query box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapStats {
    pub total_incidents: u32,
    pub sos_count: u32,
    pub harassment_count: u32,
}

/// Zones and totals for one bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapResult {
    pub bounds: BoundingBox,
    pub grid_size: u32,
    pub zones: Vec<RiskZone>,
    pub stats: HeatmapStats,
    pub computed_at: DateTime<Utc>,
}

impl HeatmapResult {
    pub fn zones_at(&self, level: RiskLevel) -> impl Iterator<Item = &RiskZone> {
        self.zones.iter().filter(move |z| z.risk_level == level)
    }
}

/// The "is this area unsafe" badge shown for a viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaSafety {
    pub sos_count: u32,
    pub harassment_count: u32,
    pub total_incidents: u32,
    pub is_unsafe: bool,
}

impl AreaSafety {
    /// An area is unsafe once it holds more incidents than a low-risk cell may.
    pub fn from_result(result: &HeatmapResult, thresholds: &RiskThresholds) -> Self {
        let stats = result.stats;
        Self {
            sos_count: stats.sos_count,
            harassment_count: stats.harassment_count,
            total_incidents: stats.total_incidents,
            is_unsafe: stats.total_incidents > thresholds.low_max,
        }
    }
}

// =============================================================================
// Grid construction
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
struct CellCounts {
    sos: u32,
    harassment: u32,
}

impl CellCounts {
    fn total(&self) -> u32 {
        self.sos + self.harassment
    }
}

/// Row-major N×N grid over a bounding box; row 0 is the southern edge.
struct RiskGrid {
    bounds: BoundingBox,
    size: usize,
    cells: Vec<CellCounts>,
}

impl RiskGrid {
    fn new(bounds: BoundingBox, size: usize) -> Self {
        Self {
            bounds,
            size,
            cells: vec![CellCounts::default(); size * size],
        }
    }

    fn axis_index(&self, value: f64, min: f64, span: f64) -> usize {
        let position = ((value - min) / span * self.size as f64).floor().max(0.0) as usize;
        position.min(self.size - 1)
    }

    fn add_incident(&mut self, incident: &Incident) {
        let row = self.axis_index(incident.latitude, self.bounds.min_lat, self.bounds.lat_span());
        let col = self.axis_index(incident.longitude, self.bounds.min_lng, self.bounds.lng_span());
        let cell = &mut self.cells[row * self.size + col];
        match incident.kind {
            IncidentKind::Sos => cell.sos += 1,
            IncidentKind::Harassment => cell.harassment += 1,
        }
    }

    /// Lattice corner to coordinates; the far edges map exactly onto the box.
    fn vertex_to_point(&self, (x, y): Vertex) -> GeoPoint {
        let n = self.size as i64;
        let lat = if y >= n {
            self.bounds.max_lat
        } else {
            self.bounds.min_lat + y as f64 * self.bounds.lat_span() / self.size as f64
        };
        let lng = if x >= n {
            self.bounds.max_lng
        } else {
            self.bounds.min_lng + x as f64 * self.bounds.lng_span() / self.size as f64
        };
        GeoPoint::new(lat, lng)
    }

    fn build(self, thresholds: &RiskThresholds, computed_at: DateTime<Utc>) -> HeatmapResult {
        let levels: Vec<Option<RiskLevel>> = self
            .cells
            .iter()
            .map(|c| RiskLevel::classify(c.total(), thresholds))
            .collect();

        let zones: Vec<RiskZone> = zones::label_components(&levels, self.size)
            .into_iter()
            .enumerate()
            .map(|(id, component)| {
                let rings = zones::trace_rings(&component.cells, self.size);
                debug_assert!(rings.exterior.len() >= 5 && rings.exterior.first() == rings.exterior.last());

                let (sos_count, harassment_count) = component
                    .cells
                    .iter()
                    .map(|&(row, col)| self.cells[row * self.size + col])
                    .fold((0, 0), |(s, h), c| (s + c.sos, h + c.harassment));

                RiskZone {
                    id,
                    polygon: rings.exterior.iter().map(|&v| self.vertex_to_point(v)).collect(),
                    holes: rings
                        .holes
                        .iter()
                        .map(|ring| ring.iter().map(|&v| self.vertex_to_point(v)).collect())
                        .collect(),
                    risk_level: component.level,
                    sos_count,
                    harassment_count,
                    cell_count: component.cells.len() as u32,
                }
            })
            .collect();

        let (sos_count, harassment_count) = self
            .cells
            .iter()
            .fold((0, 0), |(s, h), c| (s + c.sos, h + c.harassment));

        HeatmapResult {
            bounds: self.bounds,
            grid_size: self.size as u32,
            zones,
            stats: HeatmapStats {
                total_incidents: sos_count + harassment_count,
                sos_count,
                harassment_count,
            },
            computed_at,
        }
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// Computes [`HeatmapResult`]s from the spatial index.
pub struct RiskAggregator {
    config: AggregatorConfig,
    index: Arc<SpatialIndex>,
}

impl RiskAggregator {
    pub fn new(config: AggregatorConfig, index: Arc<SpatialIndex>) -> Self {
        Self { config, index }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Aggregate incidents inside `bounds` as of `now`.
    ///
    /// `now` anchors the recency window and stamps the result.
    pub fn aggregate(&self, bounds: &BoundingBox, now: DateTime<Utc>) -> Result<HeatmapResult> {
        bounds.validate()?;

        let area_km2 = geo_utils::bounds_area_km2(bounds);
        if area_km2 > self.config.max_area_km2 {
            return Err(EngineError::AreaTooLarge {
                area_km2,
                max_km2: self.config.max_area_km2,
            });
        }

        let start = Instant::now();
        // A window reaching past the earliest representable time keeps everything
        let cutoff = self
            .config
            .recency_window()
            .and_then(|window| now.checked_sub_signed(window));

        let incidents = self.index.query_range(bounds);
        let found = incidents.len();

        let mut grid = RiskGrid::new(*bounds, self.config.grid_size as usize);
        for incident in incidents
            .iter()
            .filter(|i| cutoff.map_or(true, |c| i.occurred_at >= c))
        {
            grid.add_incident(incident);
        }

        let result = grid.build(&self.config.thresholds, now);

        info!(
            "[RiskAggregator] {} zones from {} incidents ({} in box) over {:.1} km² in {:?}",
            result.zones.len(),
            result.stats.total_incidents,
            found,
            area_km2,
            start.elapsed()
        );
        debug!(
            "[RiskAggregator] Bounds ({:.5}, {:.5}) - ({:.5}, {:.5}), grid {}x{}",
            bounds.min_lat, bounds.min_lng, bounds.max_lat, bounds.max_lng, result.grid_size, result.grid_size
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn colombo() -> BoundingBox {
        BoundingBox::new(6.90, 6.95, 79.85, 79.90).unwrap()
    }

    fn aggregator_with(incidents: Vec<Incident>, config: AggregatorConfig) -> RiskAggregator {
        let index = Arc::new(SpatialIndex::new(0.01));
        index.extend(incidents);
        RiskAggregator::new(config, index)
    }

    fn harassment(id: u64, lat: f64, lng: f64) -> Incident {
        Incident::new(id, IncidentKind::Harassment, lat, lng, now() - Duration::hours(1))
    }

    fn sos(id: u64, lat: f64, lng: f64) -> Incident {
        Incident::new(id, IncidentKind::Sos, lat, lng, now() - Duration::hours(1))
    }

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_classify_thresholds() {
        let t = RiskThresholds::default();
        assert_eq!(RiskLevel::classify(0, &t), None);
        assert_eq!(RiskLevel::classify(1, &t), Some(RiskLevel::Low));
        assert_eq!(RiskLevel::classify(5, &t), Some(RiskLevel::Low));
        assert_eq!(RiskLevel::classify(6, &t), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::classify(10, &t), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::classify(11, &t), Some(RiskLevel::High));
    }

    #[test]
    fn test_scenario_one_high_one_low() {
        let mut incidents: Vec<Incident> = (0..12).map(|i| harassment(i, 6.9125, 79.8625)).collect();
        incidents.push(sos(100, 6.9375, 79.8875));

        let aggregator = aggregator_with(incidents, AggregatorConfig::default());
        let result = aggregator.aggregate(&colombo(), now()).unwrap();

        assert_eq!(
            result.stats,
            HeatmapStats { total_incidents: 13, sos_count: 1, harassment_count: 12 }
        );
        assert_eq!(result.zones.len(), 2);

        let high: Vec<_> = result.zones_at(RiskLevel::High).collect();
        let low: Vec<_> = result.zones_at(RiskLevel::Low).collect();
        assert_eq!(high.len(), 1);
        assert_eq!(low.len(), 1);
        assert_eq!(high[0].harassment_count, 12);
        assert_eq!(high[0].cell_count, 1);
        assert_eq!(low[0].sos_count, 1);

        // Cell (row 2, col 2) spans 6.910..6.915 / 79.860..79.865
        let ring = &high[0].polygon;
        assert_eq!(ring.len(), 5);
        assert!(approx_eq(ring[0].latitude, 6.91));
        assert!(approx_eq(ring[0].longitude, 79.86));
        assert!(approx_eq(ring[2].latitude, 6.915));
        assert!(approx_eq(ring[2].longitude, 79.865));
    }

    #[test]
    fn test_adjacent_cells_merge() {
        // Two horizontally adjacent cells with 6 incidents each
        let mut incidents: Vec<Incident> = (0..6).map(|i| harassment(i, 6.9025, 79.8525)).collect();
        incidents.extend((6..12).map(|i| harassment(i, 6.9025, 79.8575)));

        let aggregator = aggregator_with(incidents, AggregatorConfig::default());
        let result = aggregator.aggregate(&colombo(), now()).unwrap();

        assert_eq!(result.zones.len(), 1);
        let zone = &result.zones[0];
        assert_eq!(zone.risk_level, RiskLevel::Medium);
        assert_eq!(zone.cell_count, 2);
        assert_eq!(zone.harassment_count, 12);
        assert_eq!(zone.polygon.len(), 5);
        assert!(approx_eq(zone.polygon[1].longitude, 79.86));
    }

    #[test]
    fn test_ring_zone_has_hole() {
        let mut incidents = Vec::new();
        let mut id = 0;
        for row in 0..3 {
            for col in 0..3 {
                if row == 1 && col == 1 {
                    continue;
                }
                let lat = 6.90 + (row as f64 + 0.5) * 0.005;
                let lng = 79.85 + (col as f64 + 0.5) * 0.005;
                incidents.push(harassment(id, lat, lng));
                id += 1;
            }
        }

        let aggregator = aggregator_with(incidents, AggregatorConfig::default());
        let result = aggregator.aggregate(&colombo(), now()).unwrap();

        assert_eq!(result.zones.len(), 1);
        let zone = &result.zones[0];
        assert_eq!(zone.cell_count, 8);
        assert_eq!(zone.holes.len(), 1);

        use geo::Intersects;
        let polygon = zone.to_polygon();
        let centre = GeoPoint::new(6.9075, 79.8575).to_geo();
        let on_ring = GeoPoint::new(6.9025, 79.8525).to_geo();
        assert!(!polygon.intersects(&centre));
        assert!(polygon.intersects(&on_ring));
    }

    #[test]
    fn test_counts_are_conserved() {
        let mut incidents = Vec::new();
        for i in 0..200u64 {
            let lat = 6.90 + ((i * 37) % 100) as f64 * 0.0005;
            let lng = 79.85 + ((i * 53) % 100) as f64 * 0.0005;
            if i % 3 == 0 {
                incidents.push(sos(i, lat, lng));
            } else {
                incidents.push(harassment(i, lat, lng));
            }
        }

        let aggregator = aggregator_with(incidents, AggregatorConfig::default());
        let result = aggregator.aggregate(&colombo(), now()).unwrap();

        let zoned: u32 = result.zones.iter().map(|z| z.total_incidents()).sum();
        assert_eq!(zoned, result.stats.total_incidents);
        assert_eq!(result.stats.total_incidents, 200);
        assert_eq!(
            result.stats.sos_count + result.stats.harassment_count,
            result.stats.total_incidents
        );
        for (i, zone) in result.zones.iter().enumerate() {
            assert_eq!(zone.id, i);
        }
    }

    #[test]
    fn test_aggregation_is_deterministic() {
        let incidents: Vec<Incident> = (0..50)
            .map(|i| harassment(i, 6.90 + (i % 7) as f64 * 0.007, 79.85 + (i % 5) as f64 * 0.009))
            .collect();

        let aggregator = aggregator_with(incidents, AggregatorConfig::default());
        let first = aggregator.aggregate(&colombo(), now()).unwrap();
        let second = aggregator.aggregate(&colombo(), now()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_incidents_on_box_edges_are_counted_once() {
        let incidents = vec![
            sos(1, 6.90, 79.85),
            sos(2, 6.95, 79.90),
            // Interior cell edge
            sos(3, 6.905, 79.855),
        ];

        let aggregator = aggregator_with(incidents, AggregatorConfig::default());
        let result = aggregator.aggregate(&colombo(), now()).unwrap();

        assert_eq!(result.stats.total_incidents, 3);
        let zoned: u32 = result.zones.iter().map(|z| z.total_incidents()).sum();
        assert_eq!(zoned, 3);
    }

    #[test]
    fn test_empty_box() {
        let aggregator = aggregator_with(vec![harassment(1, 7.5, 80.5)], AggregatorConfig::default());
        let result = aggregator.aggregate(&colombo(), now()).unwrap();
        assert!(result.zones.is_empty());
        assert_eq!(result.stats, HeatmapStats::default());
    }

    #[test]
    fn test_recency_window_excludes_old_incidents() {
        let old = Incident::new(1, IncidentKind::Sos, 6.91, 79.86, now() - Duration::days(40));
        let fresh = Incident::new(2, IncidentKind::Sos, 6.91, 79.86, now() - Duration::days(1));

        let config = AggregatorConfig {
            recency_window_secs: Some(30 * 24 * 3600),
            ..AggregatorConfig::default()
        };
        let aggregator = aggregator_with(vec![old, fresh], config);
        let result = aggregator.aggregate(&colombo(), now()).unwrap();
        assert_eq!(result.stats.total_incidents, 1);
        assert_eq!(result.stats.sos_count, 1);
    }

    #[test]
    fn test_incident_at_recency_cutoff_is_included() {
        let window = Duration::days(30);
        let at_cutoff = Incident::new(1, IncidentKind::Sos, 6.91, 79.86, now() - window);
        let just_before = Incident::new(
            2,
            IncidentKind::Sos,
            6.91,
            79.86,
            now() - window - Duration::seconds(1),
        );

        let config = AggregatorConfig {
            recency_window_secs: Some(30 * 24 * 3600),
            ..AggregatorConfig::default()
        };
        let aggregator = aggregator_with(vec![at_cutoff, just_before], config);
        let result = aggregator.aggregate(&colombo(), now()).unwrap();
        assert_eq!(result.stats.total_incidents, 1);
    }

    #[test]
    fn test_huge_recency_window_keeps_everything() {
        let ancient = Incident::new(1, IncidentKind::Sos, 6.91, 79.86, now() - Duration::days(3650));
        for secs in [10_000_000_000_000, u64::MAX] {
            let config = AggregatorConfig {
                recency_window_secs: Some(secs),
                ..AggregatorConfig::default()
            };
            let aggregator = aggregator_with(vec![ancient.clone()], config);
            let result = aggregator.aggregate(&colombo(), now()).unwrap();
            assert_eq!(result.stats.total_incidents, 1);
        }
    }

    #[test]
    fn test_area_too_large() {
        let aggregator = aggregator_with(vec![], AggregatorConfig::default());
        let huge = BoundingBox::new(6.0, 7.0, 79.0, 80.0).unwrap();
        let err = aggregator.aggregate(&huge, now()).unwrap_err();
        assert!(matches!(err, EngineError::AreaTooLarge { .. }));
        assert!(err.is_resource());
    }

    #[test]
    fn test_invalid_box_rejected() {
        let aggregator = aggregator_with(vec![], AggregatorConfig::default());
        let flipped = BoundingBox { min_lat: 6.95, max_lat: 6.90, min_lng: 79.85, max_lng: 79.90 };
        assert!(aggregator.aggregate(&flipped, now()).unwrap_err().is_validation());
    }

    #[test]
    fn test_area_safety_badge() {
        let six: Vec<Incident> = (0..6).map(|i| harassment(i, 6.91, 79.86)).collect();
        let aggregator = aggregator_with(six, AggregatorConfig::default());
        let result = aggregator.aggregate(&colombo(), now()).unwrap();
        let safety = AreaSafety::from_result(&result, &RiskThresholds::default());
        assert_eq!(safety.total_incidents, 6);
        assert!(safety.is_unsafe);

        let five: Vec<Incident> = (0..5).map(|i| harassment(i, 6.91, 79.86)).collect();
        let aggregator = aggregator_with(five, AggregatorConfig::default());
        let result = aggregator.aggregate(&colombo(), now()).unwrap();
        assert!(!AreaSafety::from_result(&result, &RiskThresholds::default()).is_unsafe);
    }

    #[test]
    fn test_result_wire_format() {
        let aggregator = aggregator_with(vec![sos(1, 6.91, 79.86)], AggregatorConfig::default());
        let result = aggregator.aggregate(&colombo(), now()).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["stats"]["totalIncidents"], 1);
        assert_eq!(json["zones"][0]["riskLevel"], "low");
        assert!(json["zones"][0].get("holes").is_none());
        assert!(json["computedAt"].is_string());
    }
}
