//! Location solutions, restraints, behaviors and station geometry

use crate::common::{new_id, CreationInfo};
use crate::feature_measurement::{FeatureMeasurementType, FeatureMeasurementValue, PhaseType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EventLocation {
    pub latitude_degrees: f64,
    pub longitude_degrees: f64,
    pub depth_km: f64,
    /// Origin time, epoch seconds
    pub time: f64,
}

// ============================================================================
// Restraints
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DepthRestraintType {
    Unrestrained,
    FixedAtSurface,
    FixedAtDepth,
}

impl DepthRestraintType {
    /// The regimes requested by every relocation, in request order
    pub const ALL: [DepthRestraintType; 3] = [
        DepthRestraintType::Unrestrained,
        DepthRestraintType::FixedAtSurface,
        DepthRestraintType::FixedAtDepth,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            DepthRestraintType::Unrestrained => "unrestrained",
            DepthRestraintType::FixedAtSurface => "fixed_at_surface",
            DepthRestraintType::FixedAtDepth => "fixed_at_depth",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RestraintType {
    Unrestrained,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationRestraint {
    pub depth_restraint_type: DepthRestraintType,
    pub depth_restraint_km: Option<f64>,
    pub latitude_restraint_type: RestraintType,
    pub latitude_restraint_degrees: Option<f64>,
    pub longitude_restraint_type: RestraintType,
    pub longitude_restraint_degrees: Option<f64>,
    pub time_restraint_type: RestraintType,
    pub time_restraint: Option<f64>,
}

impl LocationRestraint {
    /// Only depth restrained (or not); latitude, longitude and time free
    pub fn depth(depth_restraint_type: DepthRestraintType, depth_km: Option<f64>) -> Self {
        let depth_restraint_km = match depth_restraint_type {
            DepthRestraintType::Unrestrained => None,
            DepthRestraintType::FixedAtSurface => Some(0.0),
            DepthRestraintType::FixedAtDepth => depth_km,
        };
        Self {
            depth_restraint_type,
            depth_restraint_km,
            latitude_restraint_type: RestraintType::Unrestrained,
            latitude_restraint_degrees: None,
            longitude_restraint_type: RestraintType::Unrestrained,
            longitude_restraint_degrees: None,
            time_restraint_type: RestraintType::Unrestrained,
            time_restraint: None,
        }
    }
}

impl Default for LocationRestraint {
    fn default() -> Self {
        Self::depth(DepthRestraintType::Unrestrained, None)
    }
}

// ============================================================================
// Behaviors, Predictions, Snapshots
// ============================================================================

/// How one feature measurement took part in a location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationBehavior {
    pub residual: f64,
    pub weight: f64,
    pub defining: bool,
    pub feature_prediction_id: String,
    pub feature_measurement_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeaturePrediction {
    pub id: String,
    pub phase: PhaseType,
    pub prediction_type: FeatureMeasurementType,
    pub predicted_value: FeatureMeasurementValue,
    pub station_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    pub source_location: EventLocation,
    #[serde(default)]
    pub extrapolated: bool,
}

impl FeaturePrediction {
    pub fn predicted(&self) -> Option<f64> {
        self.predicted_value.observed()
    }
}

/// Observed and residual values of one measurement as shown alongside a solution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct AssociationValues {
    pub defining: bool,
    pub observed: Option<f64>,
    pub residual: Option<f64>,
}

/// Denormalized view of an associated detection for one location solution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalDetectionSnapshot {
    pub signal_detection_id: String,
    pub signal_detection_hypothesis_id: String,
    pub station_id: String,
    pub station_name: String,
    pub channel_name: String,
    pub phase: Option<PhaseType>,
    pub time: AssociationValues,
    pub slowness: AssociationValues,
    pub azimuth: AssociationValues,
}

// ============================================================================
// Solutions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationSolution {
    pub id: String,
    pub location: EventLocation,
    pub location_restraint: LocationRestraint,
    #[serde(default)]
    pub location_behaviors: Vec<LocationBehavior>,
    #[serde(default)]
    pub feature_predictions: Vec<FeaturePrediction>,
    #[serde(default)]
    pub snapshots: Vec<SignalDetectionSnapshot>,
}

impl LocationSolution {
    pub fn new(location: EventLocation, location_restraint: LocationRestraint) -> Self {
        Self {
            id: new_id(),
            location,
            location_restraint,
            location_behaviors: Vec::new(),
            feature_predictions: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    pub fn depth_restraint_type(&self) -> DepthRestraintType {
        self.location_restraint.depth_restraint_type
    }

    pub fn behavior_for(&self, feature_measurement_id: &str) -> Option<&LocationBehavior> {
        self.location_behaviors
            .iter()
            .find(|b| b.feature_measurement_id == feature_measurement_id)
    }

    /// Prediction matching a measurement's phase, station and type
    pub fn prediction_for(
        &self,
        phase: PhaseType,
        station_id: &str,
        prediction_type: FeatureMeasurementType,
    ) -> Option<&FeaturePrediction> {
        self.feature_predictions.iter().find(|fp| {
            fp.phase == phase && fp.station_id == station_id && fp.prediction_type == prediction_type
        })
    }
}

/// Solutions produced by one relocation request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationSolutionSet {
    pub id: String,
    /// Ordinal among the sets created for the owning hypothesis
    pub count: usize,
    pub location_solutions: Vec<LocationSolution>,
}

impl LocationSolutionSet {
    pub fn new(count: usize, location_solutions: Vec<LocationSolution>) -> Self {
        Self {
            id: new_id(),
            count,
            location_solutions,
        }
    }

    pub fn solution(&self, id: &str) -> Option<&LocationSolution> {
        self.location_solutions.iter().find(|ls| ls.id == id)
    }

    pub fn by_restraint(&self, restraint: DepthRestraintType) -> Option<&LocationSolution> {
        self.location_solutions
            .iter()
            .find(|ls| ls.depth_restraint_type() == restraint)
    }

    pub fn is_complete(&self) -> bool {
        DepthRestraintType::ALL
            .iter()
            .all(|r| self.by_restraint(*r).is_some())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreferredLocationSolution {
    pub location_solution: LocationSolution,
    pub creation_info: CreationInfo,
}

// ============================================================================
// Stations
// ============================================================================

/// Read-only station geometry supplied by the station service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub latitude_degrees: f64,
    pub longitude_degrees: f64,
    #[serde(default)]
    pub elevation_km: f64,
    #[serde(default = "default_channel_name")]
    pub default_channel_name: String,
}

fn default_channel_name() -> String {
    "fkb".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solution(restraint: DepthRestraintType) -> LocationSolution {
        LocationSolution::new(
            EventLocation {
                latitude_degrees: 1.0,
                longitude_degrees: 2.0,
                depth_km: 10.0,
                time: 100.0,
            },
            LocationRestraint::depth(restraint, Some(10.0)),
        )
    }

    #[test]
    fn test_depth_restraint_values() {
        assert_eq!(
            LocationRestraint::depth(DepthRestraintType::Unrestrained, Some(5.0)).depth_restraint_km,
            None
        );
        assert_eq!(
            LocationRestraint::depth(DepthRestraintType::FixedAtSurface, Some(5.0))
                .depth_restraint_km,
            Some(0.0)
        );
        assert_eq!(
            LocationRestraint::depth(DepthRestraintType::FixedAtDepth, Some(5.0)).depth_restraint_km,
            Some(5.0)
        );
    }

    #[test]
    fn test_set_completeness() {
        let partial = LocationSolutionSet::new(
            0,
            vec![
                solution(DepthRestraintType::Unrestrained),
                solution(DepthRestraintType::FixedAtDepth),
            ],
        );
        assert!(!partial.is_complete());
        assert!(partial.by_restraint(DepthRestraintType::FixedAtSurface).is_none());

        let full = LocationSolutionSet::new(
            1,
            DepthRestraintType::ALL.iter().map(|r| solution(*r)).collect(),
        );
        assert!(full.is_complete());
    }

    #[test]
    fn test_depth_restraint_serialization() {
        let json = serde_json::to_string(&DepthRestraintType::FixedAtSurface).unwrap();
        assert_eq!(json, "\"fixed_at_surface\"");
    }
}
