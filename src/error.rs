use thiserror::Error;

/// Errors produced by the safety engine.
///
/// Variants fall into three groups that callers are expected to treat
/// differently: validation errors (malformed input, never retried as-is),
/// resource errors (the request is well-formed but too expensive, retry with
/// a smaller viewport) and internal errors.
///
/// The type is `Clone` because a single in-flight heatmap computation hands
/// its outcome to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid bounding box: {0}")]
    InvalidBoundingBox(String),
    #[error("Invalid coordinate: lat={latitude}, lng={longitude}")]
    InvalidCoordinate { latitude: f64, longitude: f64 },
    #[error("No route candidates supplied")]
    NoRouteCandidates,
    #[error("Invalid route candidate #{index}: {reason}")]
    InvalidRouteCandidate { index: usize, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Query area {area_km2:.1} km² exceeds maximum of {max_km2:.1} km²")]
    AreaTooLarge { area_km2: f64, max_km2: f64 },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Malformed input that should be rejected outright.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidBoundingBox(_)
                | EngineError::InvalidCoordinate { .. }
                | EngineError::NoRouteCandidates
                | EngineError::InvalidRouteCandidate { .. }
                | EngineError::InvalidConfig(_)
        )
    }

    /// Well-formed request that exceeds a resource limit.
    pub fn is_resource(&self) -> bool {
        matches!(self, EngineError::AreaTooLarge { .. })
    }

    /// Short machine-readable name, used by the request layer.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidBoundingBox(_) => "invalid_bounding_box",
            EngineError::InvalidCoordinate { .. } => "invalid_coordinate",
            EngineError::NoRouteCandidates => "no_route_candidates",
            EngineError::InvalidRouteCandidate { .. } => "invalid_route_candidate",
            EngineError::InvalidConfig(_) => "invalid_config",
            EngineError::AreaTooLarge { .. } => "area_too_large",
            EngineError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
