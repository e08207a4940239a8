//! Signal detections and their hypothesis histories

use crate::feature_measurement::{
    FeatureMeasurement, FeatureMeasurementType, FeatureMeasurementValue, PhaseType,
};
use crate::versioning::{VersionHistory, Versioned};
use serde::{Deserialize, Serialize};

/// One interpretation of a detection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalDetectionHypothesis {
    pub id: String,
    pub parent_signal_detection_id: String,
    pub rejected: bool,
    pub feature_measurements: Vec<FeatureMeasurement>,
    pub creation_info_id: String,
}

impl Versioned for SignalDetectionHypothesis {
    fn version_id(&self) -> &str {
        &self.id
    }
}

impl SignalDetectionHypothesis {
    pub fn measurement(&self, kind: FeatureMeasurementType) -> Option<&FeatureMeasurement> {
        self.feature_measurements
            .iter()
            .find(|fm| fm.measurement_type == kind)
    }

    pub fn measurement_mut(
        &mut self,
        kind: FeatureMeasurementType,
    ) -> Option<&mut FeatureMeasurement> {
        self.feature_measurements
            .iter_mut()
            .find(|fm| fm.measurement_type == kind)
    }

    pub fn measurement_by_id(&self, id: &str) -> Option<&FeatureMeasurement> {
        self.feature_measurements.iter().find(|fm| fm.id == id)
    }

    /// Replace the value of a measurement of this type, or add a new one
    pub fn upsert_measurement(
        &mut self,
        kind: FeatureMeasurementType,
        value: FeatureMeasurementValue,
    ) {
        match self.measurement_mut(kind) {
            Some(fm) => fm.value = value,
            None => self
                .feature_measurements
                .push(FeatureMeasurement::new(kind, value)),
        }
    }

    pub fn arrival_time(&self) -> Option<f64> {
        match &self.measurement(FeatureMeasurementType::ArrivalTime)?.value {
            FeatureMeasurementValue::Instant(v) => Some(v.value),
            _ => None,
        }
    }

    pub fn phase(&self) -> Option<PhaseType> {
        match &self.measurement(FeatureMeasurementType::Phase)?.value {
            FeatureMeasurementValue::Phase(v) => Some(v.phase),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalDetection {
    pub id: String,
    pub station_id: String,
    pub monitoring_organization: String,
    pub hypotheses: VersionHistory<SignalDetectionHypothesis>,
    /// An association touching one of this detection's hypotheses changed
    /// since the last save
    #[serde(default)]
    pub association_modified: bool,
}

impl SignalDetection {
    pub fn new(
        id: impl Into<String>,
        station_id: impl Into<String>,
        monitoring_organization: impl Into<String>,
        first: SignalDetectionHypothesis,
    ) -> Self {
        Self {
            id: id.into(),
            station_id: station_id.into(),
            monitoring_organization: monitoring_organization.into(),
            hypotheses: VersionHistory::new(first),
            association_modified: false,
        }
    }

    /// Rebuild an externally loaded detection. `None` if it has no hypotheses.
    pub fn from_persisted(
        id: impl Into<String>,
        station_id: impl Into<String>,
        monitoring_organization: impl Into<String>,
        hypotheses: Vec<SignalDetectionHypothesis>,
    ) -> Option<Self> {
        Some(Self {
            id: id.into(),
            station_id: station_id.into(),
            monitoring_organization: monitoring_organization.into(),
            hypotheses: VersionHistory::from_persisted(hypotheses)?,
            association_modified: false,
        })
    }

    pub fn current(&self) -> &SignalDetectionHypothesis {
        self.hypotheses.current()
    }

    /// True once a hypothesis has been added this session and not yet persisted
    pub fn modified(&self) -> bool {
        self.hypotheses.has_unsaved()
    }
}

// ============================================================================
// Inputs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AmplitudeMeasurement {
    pub start_time: f64,
    pub period: f64,
    pub amplitude: f64,
    #[serde(default)]
    pub standard_deviation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionTiming {
    pub arrival_time: f64,
    pub time_uncertainty_sec: f64,
    #[serde(default)]
    pub amplitude_measurement: Option<AmplitudeMeasurement>,
}

/// Input for a new analyst pick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewDetection {
    pub station_id: String,
    pub phase: PhaseType,
    pub timing: DetectionTiming,
}

/// Changes to apply to a detection's current hypothesis
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DetectionPatch {
    #[serde(default)]
    pub phase: Option<PhaseType>,
    #[serde(default)]
    pub timing: Option<DetectionTiming>,
}

impl DetectionPatch {
    pub fn phase(phase: PhaseType) -> Self {
        Self {
            phase: Some(phase),
            timing: None,
        }
    }

    pub fn timing(timing: DetectionTiming) -> Self {
        Self {
            phase: None,
            timing: Some(timing),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.phase.is_none() && self.timing.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_measurement::{InstantValue, PhaseValue};

    fn hypothesis() -> SignalDetectionHypothesis {
        SignalDetectionHypothesis {
            id: "sdh-1".to_string(),
            parent_signal_detection_id: "sd-1".to_string(),
            rejected: false,
            feature_measurements: vec![
                FeatureMeasurement::new(
                    FeatureMeasurementType::ArrivalTime,
                    FeatureMeasurementValue::Instant(InstantValue {
                        value: 1000.0,
                        standard_deviation: 0.5,
                    }),
                ),
                FeatureMeasurement::new(
                    FeatureMeasurementType::Phase,
                    FeatureMeasurementValue::Phase(PhaseValue {
                        phase: PhaseType::P,
                        confidence: 1.0,
                    }),
                ),
            ],
            creation_info_id: "ci-1".to_string(),
        }
    }

    #[test]
    fn test_accessors() {
        let hyp = hypothesis();
        assert_eq!(hyp.arrival_time(), Some(1000.0));
        assert_eq!(hyp.phase(), Some(PhaseType::P));
        assert!(hyp.measurement(FeatureMeasurementType::Slowness).is_none());
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut hyp = hypothesis();
        let fm_id = hyp.measurement(FeatureMeasurementType::Phase).unwrap().id.clone();
        hyp.upsert_measurement(
            FeatureMeasurementType::Phase,
            FeatureMeasurementValue::Phase(PhaseValue {
                phase: PhaseType::S,
                confidence: 1.0,
            }),
        );
        assert_eq!(hyp.phase(), Some(PhaseType::S));
        assert_eq!(
            hyp.measurement(FeatureMeasurementType::Phase).unwrap().id,
            fm_id
        );
        assert_eq!(hyp.feature_measurements.len(), 2);
    }

    #[test]
    fn test_new_detection_is_modified() {
        let sd = SignalDetection::new("sd-1", "S1", "CTBTO", hypothesis());
        assert!(sd.modified());

        let loaded = SignalDetection::from_persisted("sd-1", "S1", "CTBTO", vec![hypothesis()])
            .unwrap();
        assert!(!loaded.modified());
        assert!(SignalDetection::from_persisted("sd-2", "S1", "CTBTO", vec![]).is_none());
    }

    #[test]
    fn test_empty_patch() {
        assert!(DetectionPatch::default().is_empty());
        assert!(!DetectionPatch::phase(PhaseType::S).is_empty());
    }
}
