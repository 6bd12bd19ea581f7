//! The engine facade.
//!
//! A [`SafetyEngine`] owns one spatial index, one heatmap cache and one
//! responder directory. Clones share them; separately constructed engines
//! share nothing.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::{
    AreaSafety, BoundingBox, GeoPoint, HeatmapCache, HeatmapResult, Incident, NearestResponder, Responder,
    ResponderCategory, ResponderDirectory, RiskAggregator, RouteAssessment, RouteCandidate, RouteRiskScorer,
    SpatialIndex,
};

struct EngineInner {
    config: EngineConfig,
    index: Arc<SpatialIndex>,
    aggregator: Arc<RiskAggregator>,
    cache: Arc<HeatmapCache>,
    scorer: RouteRiskScorer,
    responders: ResponderDirectory,
}

/// Geospatial safety engine.
#[derive(Clone)]
pub struct SafetyEngine {
    inner: Arc<EngineInner>,
}

impl SafetyEngine {
    /// Build an engine with an empty index and no responders.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let index = Arc::new(SpatialIndex::new(config.index.bucket_size_degrees));
        let aggregator = Arc::new(RiskAggregator::new(config.aggregator.clone(), Arc::clone(&index)));
        let cache = Arc::new(HeatmapCache::new(config.cache.clone()));
        let scorer = RouteRiskScorer::new(config.scorer.clone());

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                index,
                aggregator,
                cache,
                scorer,
                responders: ResponderDirectory::default(),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &HeatmapCache {
        &self.inner.cache
    }

    pub fn incident_count(&self) -> usize {
        self.inner.index.len()
    }

    /// Risk zones and totals for a viewport.
    ///
    /// The result covers the viewport snapped outward to the cache grid.
    pub async fn heatmap(&self, bounds: &BoundingBox) -> Result<Arc<HeatmapResult>> {
        let aggregator = Arc::clone(&self.inner.aggregator);
        self.inner
            .cache
            .get_or_compute(bounds, move |region| aggregator.aggregate(&region, Utc::now()))
            .await
    }

    /// The "unsafe area" verdict for a viewport.
    pub async fn area_safety(&self, bounds: &BoundingBox) -> Result<AreaSafety> {
        let heatmap = self.heatmap(bounds).await?;
        Ok(AreaSafety::from_result(&heatmap, &self.inner.config.aggregator.thresholds))
    }

    /// Score and rank route candidates between `start` and `end`.
    ///
    /// When the zones for the routes' envelope cannot be computed the
    /// request still succeeds, with every route rated unknown.
    pub async fn assess_routes(
        &self,
        start: GeoPoint,
        end: GeoPoint,
        candidates: Vec<RouteCandidate>,
    ) -> Result<RouteAssessment> {
        let scorer = &self.inner.scorer;
        scorer.validate(&start, &end, &candidates)?;

        let envelope = scorer.envelope(&start, &end, &candidates);
        let heatmap = match self.heatmap(&envelope).await {
            Ok(heatmap) => Some(heatmap),
            Err(e) => {
                warn!("[SafetyEngine] Route zones unavailable: {}", e);
                None
            }
        };

        Ok(scorer.assess(candidates, heatmap.as_deref()))
    }

    /// Closest responders to `point`; `limit` defaults to the configured value.
    pub fn nearest_responders(
        &self,
        point: &GeoPoint,
        category: Option<ResponderCategory>,
        limit: Option<usize>,
    ) -> Result<Vec<NearestResponder>> {
        let limit = limit.unwrap_or(self.inner.config.responders.default_limit);
        self.inner.responders.nearest(point, category, limit)
    }

    /// Feed a newly created incident into the engine.
    ///
    /// Returns `Ok(false)` for an incident already seen. Cached heatmaps
    /// covering the incident are evicted before this returns.
    pub fn on_incident_created(&self, incident: Incident) -> Result<bool> {
        let location = incident.location();
        let inserted = self.inner.index.insert(incident)?;
        if inserted {
            self.inner.cache.invalidate(&location);
        }
        Ok(inserted)
    }

    /// Bulk load incidents, e.g. from the incident store at start-up.
    pub fn hydrate<I>(&self, incidents: I) -> usize
    where
        I: IntoIterator<Item = Incident>,
    {
        let inserted = self.inner.index.extend(incidents);
        if inserted > 0 {
            self.inner.cache.clear();
        }
        info!(
            "[SafetyEngine] Hydrated {} incidents ({} total)",
            inserted,
            self.inner.index.len()
        );
        inserted
    }

    /// Swap the responder dataset. Returns how many responders were kept.
    pub fn replace_responders(&self, responders: Vec<Responder>) -> usize {
        self.inner.responders.replace(responders)
    }
}
