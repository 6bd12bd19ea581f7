//! HTTP request layer.
//!
//! Thin axum handlers over a [`SafetyEngine`]. Bodies are JSON with camelCase
//! keys; heatmaps are returned as GeoJSON feature collections.
//!
//! | Method | Path | Body / query | Response |
//! |--------|------|--------------|----------|
//! | POST | `/safe-route/heatmap` | `BoundingBox` | `FeatureCollection` |
//! | POST | `/safe-route/calculate` | `{ start, end, candidates }` | ranked routes |
//! | POST | `/safe-route/area-safety` | `BoundingBox` | `AreaSafety` |
//! | GET | `/responders/nearest` | `lat`, `lng`, `category`, `limit` | nearest responders |
//! | POST | `/incidents` | `Incident` | `202 { inserted }` |
//! | GET | `/health` | | `OK` |

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use geojson::{Feature, FeatureCollection};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::error::EngineError;
use crate::{
    export, AreaSafety, BoundingBox, GeoPoint, Incident, NearestResponder, ResponderCategory, RouteCandidate,
    SafetyEngine, ScoredRoute,
};

/// Build the application router.
pub fn router(engine: SafetyEngine) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/safe-route/heatmap", post(heatmap))
        .route("/safe-route/calculate", post(calculate))
        .route("/safe-route/area-safety", post(area_safety))
        .route("/responders/nearest", get(nearest_responders))
        .route("/incidents", post(create_incident))
        .layer(cors)
        .with_state(engine)
}

// =============================================================================
// Errors
// =============================================================================

/// An [`EngineError`] rendered as `{ "error": kind, "message": text }`.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        if self.0.is_validation() {
            StatusCode::BAD_REQUEST
        } else if self.0.is_resource() {
            StatusCode::UNPROCESSABLE_ENTITY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("[http] {}", self.0);
        } else {
            debug!("[http] Rejected request: {}", self.0);
        }
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// =============================================================================
// Handlers
// =============================================================================

async fn heatmap(State(engine): State<SafetyEngine>, Json(bounds): Json<BoundingBox>) -> ApiResult<FeatureCollection> {
    let result = engine.heatmap(&bounds).await?;
    Ok(Json(export::heatmap_feature_collection(&result)))
}

#[derive(Debug, Deserialize)]
pub struct CalculateRequest {
    pub start: GeoPoint,
    pub end: GeoPoint,
    pub candidates: Vec<RouteCandidate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateResponse {
    pub recommended_route: ScoredRoute,
    pub alternative_routes: Vec<ScoredRoute>,
    /// High-risk zones on the recommended route, as GeoJSON features
    pub danger_zones: Vec<Feature>,
    pub degraded: bool,
}

async fn calculate(State(engine): State<SafetyEngine>, Json(request): Json<CalculateRequest>) -> ApiResult<CalculateResponse> {
    let assessment = engine
        .assess_routes(request.start, request.end, request.candidates)
        .await?;

    let danger_zones = assessment.danger_zones.iter().map(export::zone_feature).collect();
    let mut routes = assessment.routes.into_iter();
    let recommended_route = routes.next().ok_or(EngineError::NoRouteCandidates)?;

    Ok(Json(CalculateResponse {
        recommended_route,
        alternative_routes: routes.collect(),
        danger_zones,
        degraded: assessment.degraded,
    }))
}

async fn area_safety(State(engine): State<SafetyEngine>, Json(bounds): Json<BoundingBox>) -> ApiResult<AreaSafety> {
    Ok(Json(engine.area_safety(&bounds).await?))
}

#[derive(Debug, Deserialize)]
pub struct NearestQuery {
    pub lat: f64,
    pub lng: f64,
    pub category: Option<ResponderCategory>,
    pub limit: Option<usize>,
}

async fn nearest_responders(
    State(engine): State<SafetyEngine>,
    Query(query): Query<NearestQuery>,
) -> ApiResult<Vec<NearestResponder>> {
    let point = GeoPoint::new(query.lat, query.lng);
    Ok(Json(engine.nearest_responders(&point, query.category, query.limit)?))
}

#[derive(Debug, Serialize)]
pub struct IncidentAccepted {
    pub inserted: bool,
}

async fn create_incident(
    State(engine): State<SafetyEngine>,
    Json(incident): Json<Incident>,
) -> Result<(StatusCode, Json<IncidentAccepted>), ApiError> {
    let inserted = engine.on_incident_created(incident)?;
    Ok((StatusCode::ACCEPTED, Json(IncidentAccepted { inserted })))
}
