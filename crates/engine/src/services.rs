//! External location and feature-prediction services
//!
//! Both are remote, fallible and slow. The engine only sees these traits and
//! bounds every call with a timeout.

use analyst_core::{
    EventHypothesis, EventLocation, FeaturePrediction, LocationRestraint, LocationSolution,
    PhaseType, SignalDetection, Station,
};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// One relocation request; only `location_restraint` differs between the
/// three requests of a relocation
#[derive(Debug, Clone, Serialize)]
pub struct LocateRequest {
    pub event_hypothesis: EventHypothesis,
    pub signal_detections: Vec<SignalDetection>,
    pub location_restraint: LocationRestraint,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeaturePredictionRequest {
    pub source_location: EventLocation,
    pub receiver_locations: Vec<Station>,
    pub phase: PhaseType,
}

#[async_trait]
pub trait LocationService: Send + Sync {
    async fn locate(&self, request: LocateRequest) -> Result<LocationSolution, ServiceError>;
}

#[async_trait]
pub trait FeaturePredictionService: Send + Sync {
    async fn predict_features(
        &self,
        request: FeaturePredictionRequest,
    ) -> Result<Vec<FeaturePrediction>, ServiceError>;
}
