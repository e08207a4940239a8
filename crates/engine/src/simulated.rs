//! Deterministic in-process stand-ins for the remote services
//!
//! Used by the session replay binary and by tests. Perturbations are derived
//! from a SHA-256 of the request so the same request always yields the same
//! answer.

use crate::services::{
    FeaturePredictionRequest, FeaturePredictionService, LocateRequest, LocationService,
    ServiceError,
};
use analyst_core::{
    new_id, DepthRestraintType, DoubleValue, EventLocation, FeatureMeasurementType,
    FeatureMeasurementValue, FeaturePrediction, InstantValue, LocationSolution, NumericValue,
    PhaseType, Station, Units,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;

/// Value in [-1, 1) derived from the seed
fn unit_offset(seed: &str, salt: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(b"/");
    hasher.update(salt.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) as f64 / u64::MAX as f64) * 2.0 - 1.0
}

// ============================================================================
// Location
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SimulatedLocationService {
    failing: HashSet<DepthRestraintType>,
    delay: Option<Duration>,
}

impl SimulatedLocationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every request for this restraint
    pub fn failing(mut self, restraint: DepthRestraintType) -> Self {
        self.failing.insert(restraint);
        self
    }

    pub fn failing_all(mut self) -> Self {
        self.failing.extend(DepthRestraintType::ALL);
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl LocationService for SimulatedLocationService {
    async fn locate(&self, request: LocateRequest) -> Result<LocationSolution, ServiceError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let restraint = request.location_restraint.depth_restraint_type;
        if self.failing.contains(&restraint) {
            return Err(ServiceError::Unavailable(format!(
                "locator has no solution for {}",
                restraint.as_str()
            )));
        }

        let hypothesis = &request.event_hypothesis;
        let start = hypothesis
            .preferred_location()
            .ok_or_else(|| ServiceError::Rejected("hypothesis has no starting location".to_string()))?;
        let seed = format!("{}:{}", hypothesis.id, restraint.as_str());

        let depth_km = match restraint {
            DepthRestraintType::Unrestrained => {
                (start.location.depth_km + 5.0 * unit_offset(&seed, "depth")).max(0.0)
            }
            DepthRestraintType::FixedAtSurface => 0.0,
            DepthRestraintType::FixedAtDepth => request
                .location_restraint
                .depth_restraint_km
                .unwrap_or(start.location.depth_km),
        };
        let location = EventLocation {
            latitude_degrees: (start.location.latitude_degrees + 0.5 * unit_offset(&seed, "lat"))
                .clamp(-90.0, 90.0),
            longitude_degrees: start.location.longitude_degrees + 0.5 * unit_offset(&seed, "lon"),
            depth_km,
            time: start.location.time + unit_offset(&seed, "time"),
        };

        let mut solution = LocationSolution::new(location, request.location_restraint.clone());
        solution.location_behaviors = start
            .location_behaviors
            .iter()
            .cloned()
            .map(|mut b| {
                b.residual = unit_offset(&seed, &b.feature_measurement_id);
                b
            })
            .collect();
        solution.feature_predictions = start.feature_predictions.clone();
        Ok(solution)
    }
}

// ============================================================================
// Feature prediction
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SimulatedPredictionService {
    failing: HashSet<PhaseType>,
}

impl SimulatedPredictionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, phase: PhaseType) -> Self {
        self.failing.insert(phase);
        self
    }
}

/// Rough apparent slowness per phase (s/deg)
fn slowness_for(phase: PhaseType) -> f64 {
    match phase {
        PhaseType::P | PhaseType::Pn | PhaseType::Pg | PhaseType::pP | PhaseType::PcP => 10.0,
        PhaseType::PKP | PhaseType::PKPbc => 2.0,
        PhaseType::S | PhaseType::Sn | PhaseType::Sg | PhaseType::ScP => 18.0,
        PhaseType::Lg => 31.0,
        PhaseType::LR | PhaseType::Rg => 36.0,
        PhaseType::T | PhaseType::I | PhaseType::Unknown => 20.0,
    }
}

/// Great-circle distance and receiver-to-source azimuth, both in degrees
fn distance_and_azimuth(source: &EventLocation, receiver: &Station) -> (f64, f64) {
    let (lat1, lon1) = (
        receiver.latitude_degrees.to_radians(),
        receiver.longitude_degrees.to_radians(),
    );
    let (lat2, lon2) = (
        source.latitude_degrees.to_radians(),
        source.longitude_degrees.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let distance = 2.0 * a.sqrt().min(1.0).asin();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    let azimuth = (y.atan2(x).to_degrees() + 360.0) % 360.0;
    (distance.to_degrees(), azimuth)
}

#[async_trait]
impl FeaturePredictionService for SimulatedPredictionService {
    async fn predict_features(
        &self,
        request: FeaturePredictionRequest,
    ) -> Result<Vec<FeaturePrediction>, ServiceError> {
        if self.failing.contains(&request.phase) {
            return Err(ServiceError::Unavailable(format!(
                "no travel-time tables for {}",
                request.phase
            )));
        }

        let source = request.source_location;
        let slowness = slowness_for(request.phase);
        let mut predictions = Vec::with_capacity(request.receiver_locations.len() * 3);
        for station in &request.receiver_locations {
            let (distance, azimuth) = distance_and_azimuth(&source, station);
            let arrival = source.time + distance * slowness;
            let numeric = |value: f64, units: Units| {
                FeatureMeasurementValue::Numeric(NumericValue {
                    reference_time: arrival,
                    measurement_value: DoubleValue {
                        value,
                        standard_deviation: 0.0,
                        units,
                    },
                })
            };
            let prediction = |kind: FeatureMeasurementType, value: FeatureMeasurementValue| {
                FeaturePrediction {
                    id: new_id(),
                    phase: request.phase,
                    prediction_type: kind,
                    predicted_value: value,
                    station_id: station.id.clone(),
                    channel_id: None,
                    source_location: source,
                    extrapolated: false,
                }
            };

            predictions.push(prediction(
                FeatureMeasurementType::ArrivalTime,
                FeatureMeasurementValue::Instant(InstantValue {
                    value: arrival,
                    standard_deviation: 0.0,
                }),
            ));
            predictions.push(prediction(
                FeatureMeasurementType::Slowness,
                numeric(slowness, Units::SecondsPerDegree),
            ));
            predictions.push(prediction(
                FeatureMeasurementType::ReceiverToSourceAzimuth,
                numeric(azimuth, Units::Degrees),
            ));
        }
        Ok(predictions)
    }
}
