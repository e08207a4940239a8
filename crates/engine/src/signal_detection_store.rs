//! Signal Detection Store
//!
//! Owns every cached `SignalDetection` and its hypothesis history, plus a
//! reverse index from hypothesis id to owning detection.
//!
//! The store only versions detections. Retargeting the associations that
//! point at a superseded hypothesis is the caller's job (see
//! `association::retarget_detection_hypothesis`).

use analyst_core::{
    new_id, AmplitudeValue, DefiningOperation, DetectionPatch, DetectionTiming, DoubleValue,
    EngineError, EngineResult, EntityKind, FeatureMeasurement, FeatureMeasurementType,
    FeatureMeasurementValue, InstantValue, NewDetection, NumericValue, PhaseType, PhaseValue,
    SignalDetection, SignalDetectionHypothesis, TimeRange, Units,
};
use std::collections::{BTreeMap, HashMap};

/// Azimuth and slowness values synthesized for a new pick until it is measured
const SYNTHESIZED_AZIMUTH_DEG: f64 = 21.73;
const SYNTHESIZED_SLOWNESS_SEC_PER_DEG: f64 = 21.73;
const SYNTHESIZED_STANDARD_DEVIATION: f64 = 0.31;

/// How a patch or rejection landed on a detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HypothesisOutcome {
    /// The current (unsaved) hypothesis was edited in place
    InPlace { hypothesis_id: String },
    /// A new hypothesis superseded a persisted one
    Superseded {
        previous_hypothesis_id: String,
        new_hypothesis_id: String,
    },
}

/// Hypotheses popped from one detection by a discard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolledBackDetection {
    pub detection_id: String,
    pub popped_hypothesis_ids: Vec<String>,
    /// Current hypothesis after rollback, `None` when the detection was removed
    pub restored_hypothesis_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SignalDetectionStore {
    detections: BTreeMap<String, SignalDetection>,
    hypothesis_owner: HashMap<String, String>,
    monitoring_organization: String,
}

impl SignalDetectionStore {
    pub fn new(monitoring_organization: impl Into<String>) -> Self {
        Self {
            detections: BTreeMap::new(),
            hypothesis_owner: HashMap::new(),
            monitoring_organization: monitoring_organization.into(),
        }
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn get(&self, detection_id: &str) -> Option<&SignalDetection> {
        self.detections.get(detection_id)
    }

    pub fn require(&self, detection_id: &str) -> EngineResult<&SignalDetection> {
        self.get(detection_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::SignalDetection, detection_id))
    }

    pub fn contains(&self, detection_id: &str) -> bool {
        self.detections.contains_key(detection_id)
    }

    /// Detection owning the hypothesis, current or historical
    pub fn by_hypothesis_id(&self, hypothesis_id: &str) -> Option<&SignalDetection> {
        self.hypothesis_owner
            .get(hypothesis_id)
            .and_then(|id| self.detections.get(id))
    }

    pub fn hypothesis(&self, hypothesis_id: &str) -> Option<&SignalDetectionHypothesis> {
        self.by_hypothesis_id(hypothesis_id)
            .and_then(|sd| sd.hypotheses.get(hypothesis_id))
    }

    pub fn is_current_hypothesis(&self, hypothesis_id: &str) -> bool {
        self.by_hypothesis_id(hypothesis_id)
            .map(|sd| sd.current().id == hypothesis_id)
            .unwrap_or(false)
    }

    /// Detection whose current hypothesis carries the feature measurement
    pub fn by_feature_measurement(&self, feature_measurement_id: &str) -> Option<&SignalDetection> {
        self.detections
            .values()
            .find(|sd| sd.current().measurement_by_id(feature_measurement_id).is_some())
    }

    /// Known detections among `ids`, in the order given
    pub fn by_ids(&self, ids: &[String]) -> Vec<&SignalDetection> {
        ids.iter().filter_map(|id| self.detections.get(id)).collect()
    }

    /// Detections at any of the stations whose current arrival time lies in
    /// `[start, end]`
    pub fn by_stations(&self, station_ids: &[String], range: &TimeRange) -> Vec<&SignalDetection> {
        self.detections
            .values()
            .filter(|sd| station_ids.iter().any(|s| s == &sd.station_id))
            .filter(|sd| {
                sd.current()
                    .arrival_time()
                    .map(|t| range.contains_inclusive(t))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignalDetection> {
        self.detections.values()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert an externally loaded detection.
    ///
    /// An existing detection with unsaved work is kept; returns whether the
    /// given one was inserted.
    pub fn insert_persisted(&mut self, mut detection: SignalDetection) -> bool {
        if let Some(existing) = self.detections.get(&detection.id) {
            if existing.modified() {
                return false;
            }
            let stale: Vec<String> = existing.hypotheses.iter().map(|h| h.id.clone()).collect();
            for id in stale {
                self.hypothesis_owner.remove(&id);
            }
        }
        detection.hypotheses.mark_persisted();
        detection.association_modified = false;
        for hyp in detection.hypotheses.iter() {
            self.hypothesis_owner
                .insert(hyp.id.clone(), detection.id.clone());
        }
        self.detections.insert(detection.id.clone(), detection);
        true
    }

    /// Create a detection for an analyst pick
    pub fn create(&mut self, input: &NewDetection) -> SignalDetection {
        let detection_id = new_id();
        let hypothesis = SignalDetectionHypothesis {
            id: new_id(),
            parent_signal_detection_id: detection_id.clone(),
            rejected: false,
            feature_measurements: synthesize_measurements(input.phase, &input.timing),
            creation_info_id: new_id(),
        };
        self.hypothesis_owner
            .insert(hypothesis.id.clone(), detection_id.clone());

        let detection = SignalDetection::new(
            detection_id.clone(),
            input.station_id.clone(),
            self.monitoring_organization.clone(),
            hypothesis,
        );
        self.detections.insert(detection_id, detection.clone());
        detection
    }

    /// Apply a phase and/or timing patch.
    ///
    /// Edits the current hypothesis in place when it is unsaved, otherwise
    /// appends a patched copy.
    pub fn apply_patch(
        &mut self,
        detection_id: &str,
        patch: &DetectionPatch,
    ) -> EngineResult<HypothesisOutcome> {
        if patch.is_empty() {
            return Err(EngineError::invalid(
                "detection update requires a phase or timing",
            ));
        }
        self.edit_current(detection_id, |hyp| apply_patch_to(hyp, patch))
    }

    /// Mark the current hypothesis rejected (copy-on-write when persisted)
    pub fn reject(&mut self, detection_id: &str) -> EngineResult<HypothesisOutcome> {
        self.edit_current(detection_id, |hyp| hyp.rejected = true)
    }

    fn edit_current<F>(&mut self, detection_id: &str, edit: F) -> EngineResult<HypothesisOutcome>
    where
        F: FnOnce(&mut SignalDetectionHypothesis),
    {
        let detection = self
            .detections
            .get_mut(detection_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::SignalDetection, detection_id))?;

        if let Some(current) = detection.hypotheses.current_mut() {
            edit(&mut *current);
            return Ok(HypothesisOutcome::InPlace {
                hypothesis_id: current.id.clone(),
            });
        }

        let previous = detection.current();
        let previous_hypothesis_id = previous.id.clone();
        let mut next = previous.clone();
        next.id = new_id();
        next.creation_info_id = new_id();
        edit(&mut next);

        let new_hypothesis_id = detection.hypotheses.append(next);
        self.hypothesis_owner
            .insert(new_hypothesis_id.clone(), detection_id.to_string());

        Ok(HypothesisOutcome::Superseded {
            previous_hypothesis_id,
            new_hypothesis_id,
        })
    }

    /// Flag the detection owning `hypothesis_id` as having association changes
    pub fn mark_association_modified(&mut self, hypothesis_id: &str) {
        let owner = self.hypothesis_owner.get(hypothesis_id).cloned();
        if let Some(sd) = owner.and_then(|id| self.detections.get_mut(&id)) {
            sd.association_modified = true;
        }
    }

    /// Pop every unsaved hypothesis; detections created this session are removed
    pub fn rollback_unsaved(&mut self) -> Vec<RolledBackDetection> {
        let dirty: Vec<String> = self
            .detections
            .values()
            .filter(|sd| sd.modified())
            .map(|sd| sd.id.clone())
            .collect();

        let mut rolled_back = Vec::with_capacity(dirty.len());
        for detection_id in dirty {
            let Some(detection) = self.detections.get_mut(&detection_id) else {
                continue;
            };

            if detection.hypotheses.is_new() {
                let popped: Vec<String> =
                    detection.hypotheses.iter().map(|h| h.id.clone()).collect();
                self.detections.remove(&detection_id);
                for id in &popped {
                    self.hypothesis_owner.remove(id);
                }
                rolled_back.push(RolledBackDetection {
                    detection_id,
                    popped_hypothesis_ids: popped,
                    restored_hypothesis_id: None,
                });
                continue;
            }

            let mut popped = Vec::new();
            while let Some(hyp) = detection.hypotheses.rollback_last() {
                popped.push(hyp.id);
            }
            detection.association_modified = false;
            let restored = detection.current().id.clone();
            for id in &popped {
                self.hypothesis_owner.remove(id);
            }
            rolled_back.push(RolledBackDetection {
                detection_id,
                popped_hypothesis_ids: popped,
                restored_hypothesis_id: Some(restored),
            });
        }
        rolled_back
    }

    /// Mark everything persisted and return what changed since the last save
    pub fn mark_saved(&mut self) -> Vec<SignalDetection> {
        let mut saved = Vec::new();
        for detection in self.detections.values_mut() {
            if detection.modified() || detection.association_modified {
                saved.push(detection.clone());
            }
            detection.hypotheses.mark_persisted();
            detection.association_modified = false;
        }
        saved
    }
}

// ============================================================================
// Measurement Helpers
// ============================================================================

fn synthesize_measurements(phase: PhaseType, timing: &DetectionTiming) -> Vec<FeatureMeasurement> {
    let defining = phase.is_location_defining();
    let numeric = |value: f64, units: Units| {
        FeatureMeasurementValue::Numeric(NumericValue {
            reference_time: timing.arrival_time,
            measurement_value: DoubleValue {
                value,
                standard_deviation: SYNTHESIZED_STANDARD_DEVIATION,
                units,
            },
        })
    };

    let mut measurements = vec![
        FeatureMeasurement::new(FeatureMeasurementType::ArrivalTime, arrival_value(timing))
            .with_defining(DefiningOperation::Location, defining),
        FeatureMeasurement::new(
            FeatureMeasurementType::ReceiverToSourceAzimuth,
            numeric(SYNTHESIZED_AZIMUTH_DEG, Units::Degrees),
        )
        .with_defining(DefiningOperation::Location, defining),
        FeatureMeasurement::new(
            FeatureMeasurementType::Slowness,
            numeric(SYNTHESIZED_SLOWNESS_SEC_PER_DEG, Units::SecondsPerDegree),
        )
        .with_defining(DefiningOperation::Location, defining),
        FeatureMeasurement::new(FeatureMeasurementType::Phase, phase_value(phase)),
    ];
    if let Some(value) = amplitude_value(timing) {
        measurements.push(FeatureMeasurement::new(
            FeatureMeasurementType::AmplitudeA5Over2,
            value,
        ));
    }
    measurements
}

fn apply_patch_to(hyp: &mut SignalDetectionHypothesis, patch: &DetectionPatch) {
    if let Some(timing) = &patch.timing {
        hyp.upsert_measurement(FeatureMeasurementType::ArrivalTime, arrival_value(timing));
        if let Some(value) = amplitude_value(timing) {
            hyp.upsert_measurement(FeatureMeasurementType::AmplitudeA5Over2, value);
        }
    }
    if let Some(phase) = patch.phase {
        hyp.upsert_measurement(FeatureMeasurementType::Phase, phase_value(phase));
        let defining = phase.is_location_defining();
        for fm in hyp
            .feature_measurements
            .iter_mut()
            .filter(|fm| fm.measurement_type.is_location_type())
        {
            *fm = fm.clone().with_defining(DefiningOperation::Location, defining);
        }
    }
}

fn arrival_value(timing: &DetectionTiming) -> FeatureMeasurementValue {
    FeatureMeasurementValue::Instant(InstantValue {
        value: timing.arrival_time,
        standard_deviation: timing.time_uncertainty_sec,
    })
}

fn phase_value(phase: PhaseType) -> FeatureMeasurementValue {
    FeatureMeasurementValue::Phase(PhaseValue {
        phase,
        confidence: 1.0,
    })
}

fn amplitude_value(timing: &DetectionTiming) -> Option<FeatureMeasurementValue> {
    timing.amplitude_measurement.as_ref().map(|a| {
        FeatureMeasurementValue::Amplitude(AmplitudeValue {
            start_time: a.start_time,
            period: a.period,
            amplitude: DoubleValue {
                value: a.amplitude,
                standard_deviation: a.standard_deviation,
                units: Units::Nanometers,
            },
        })
    })
}
