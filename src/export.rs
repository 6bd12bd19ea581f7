//! GeoJSON rendering of heatmap results.
//!
//! Map clients draw zones straight from a `FeatureCollection`: one `Polygon`
//! feature per zone, exterior ring first, holes after it, positions as
//! `[lng, lat]`. Totals ride along as foreign members of the collection.

use geojson::feature::Id;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue, Position, Value};

use crate::heatmap::{HeatmapResult, RiskZone};
use crate::GeoPoint;

fn ring(points: &[GeoPoint]) -> Vec<Position> {
    points.iter().map(|p| vec![p.longitude, p.latitude]).collect()
}

/// Zone outline as a GeoJSON polygon.
pub fn zone_geometry(zone: &RiskZone) -> Geometry {
    let mut rings = Vec::with_capacity(1 + zone.holes.len());
    rings.push(ring(&zone.polygon));
    rings.extend(zone.holes.iter().map(|h| ring(h)));
    Geometry::new(Value::Polygon(rings))
}

pub fn zone_feature(zone: &RiskZone) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("riskLevel".to_string(), JsonValue::from(zone.risk_level.as_str()));
    properties.insert("sosCount".to_string(), JsonValue::from(zone.sos_count));
    properties.insert("harassmentCount".to_string(), JsonValue::from(zone.harassment_count));
    properties.insert("cellCount".to_string(), JsonValue::from(zone.cell_count));

    Feature {
        bbox: None,
        geometry: Some(zone_geometry(zone)),
        id: Some(Id::Number(zone.id.into())),
        properties: Some(properties),
        foreign_members: None,
    }
}

/// The whole heatmap as a feature collection.
pub fn heatmap_feature_collection(result: &HeatmapResult) -> FeatureCollection {
    let mut members = JsonObject::new();
    members.insert(
        "stats".to_string(),
        serde_json::to_value(result.stats).unwrap_or(JsonValue::Null),
    );
    members.insert("computedAt".to_string(), JsonValue::from(result.computed_at.to_rfc3339()));
    members.insert("gridSize".to_string(), JsonValue::from(result.grid_size));

    let b = &result.bounds;
    FeatureCollection {
        bbox: Some(vec![b.min_lng, b.min_lat, b.max_lng, b.max_lat]),
        features: result.zones.iter().map(zone_feature).collect(),
        foreign_members: Some(members),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heatmap::{HeatmapStats, RiskLevel};
    use crate::BoundingBox;
    use chrono::{TimeZone, Utc};

    fn square(min_lat: f64, min_lng: f64, size: f64) -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(min_lat, min_lng),
            GeoPoint::new(min_lat, min_lng + size),
            GeoPoint::new(min_lat + size, min_lng + size),
            GeoPoint::new(min_lat + size, min_lng),
            GeoPoint::new(min_lat, min_lng),
        ]
    }

    fn sample() -> HeatmapResult {
        let mut hole = square(6.905, 79.855, 0.005);
        hole.reverse();

        HeatmapResult {
            bounds: BoundingBox::new(6.90, 6.95, 79.85, 79.90).unwrap(),
            grid_size: 10,
            zones: vec![RiskZone {
                id: 0,
                polygon: square(6.90, 79.85, 0.015),
                holes: vec![hole],
                risk_level: RiskLevel::Medium,
                sos_count: 2,
                harassment_count: 54,
                cell_count: 8,
            }],
            stats: HeatmapStats {
                total_incidents: 56,
                sos_count: 2,
                harassment_count: 54,
            },
            computed_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_feature_collection_shape() {
        let json = serde_json::to_value(heatmap_feature_collection(&sample())).unwrap();

        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["stats"]["totalIncidents"], 56);
        assert_eq!(json["computedAt"], "2025-03-01T12:00:00+00:00");
        assert_eq!(json["bbox"][0], 79.85);

        let feature = &json["features"][0];
        assert_eq!(feature["id"], 0);
        assert_eq!(feature["geometry"]["type"], "Polygon");
        assert_eq!(feature["properties"]["riskLevel"], "medium");
        assert_eq!(feature["properties"]["harassmentCount"], 54);
        assert_eq!(feature["properties"]["cellCount"], 8);
    }

    #[test]
    fn test_positions_are_lng_lat_with_holes_after_exterior() {
        let geometry = zone_geometry(&sample().zones[0]);
        let Value::Polygon(rings) = geometry.value else {
            panic!("expected a polygon");
        };
        assert_eq!(rings.len(), 2);
        assert_eq!(rings[0][0], vec![79.85, 6.90]);
        assert_eq!(rings[0].first(), rings[0].last());
        assert_eq!(rings[1][0], vec![79.855, 6.905]);
    }

    #[test]
    fn test_empty_heatmap_is_valid_collection() {
        let mut result = sample();
        result.zones.clear();
        result.stats = HeatmapStats::default();

        let text = serde_json::to_string(&heatmap_feature_collection(&result)).unwrap();
        let parsed: geojson::GeoJson = text.parse().unwrap();
        let geojson::GeoJson::FeatureCollection(collection) = parsed else {
            panic!("expected a feature collection");
        };
        assert!(collection.features.is_empty());
    }
}
