//! Location behaviors and detection snapshots
//!
//! Both are derived from an event hypothesis' associations and recomputed
//! whenever associations or behaviors change.

use crate::signal_detection_store::SignalDetectionStore;
use crate::stations::StationDirectory;
use analyst_core::{
    new_id, AssociationValues, DefiningOperation, EventHypothesis, FeatureMeasurementType,
    LocationBehavior, LocationSolution, SignalDetectionEventAssociation,
    SignalDetectionHypothesis, SignalDetectionSnapshot,
};
use std::collections::HashSet;

/// Add or remove the behaviors for a detection hypothesis' location
/// measurements (arrival time, azimuth, slowness).
///
/// Residuals come from the solution's matching feature prediction when there
/// is one.
pub fn update_location_behaviors(
    solution: &mut LocationSolution,
    sd_hypothesis: &SignalDetectionHypothesis,
    station_id: &str,
    associate: bool,
) {
    let phase = sd_hypothesis.phase();
    for measurement in sd_hypothesis
        .feature_measurements
        .iter()
        .filter(|fm| fm.measurement_type.is_location_type())
    {
        solution
            .location_behaviors
            .retain(|b| b.feature_measurement_id != measurement.id);
        if !associate {
            continue;
        }

        let prediction = phase.and_then(|p| {
            solution.prediction_for(p, station_id, measurement.measurement_type)
        });
        let residual = match (measurement.observed(), prediction.and_then(|fp| fp.predicted())) {
            (Some(observed), Some(predicted)) => observed - predicted,
            _ => 0.0,
        };
        let defining = measurement.is_defining_for(DefiningOperation::Location);
        let feature_prediction_id = prediction.map(|fp| fp.id.clone()).unwrap_or_else(new_id);

        solution.location_behaviors.push(LocationBehavior {
            residual,
            weight: if defining { 1.0 } else { 0.0 },
            defining,
            feature_prediction_id,
            feature_measurement_id: measurement.id.clone(),
        });
    }
}

/// Snapshot every active association against one solution
pub fn build_snapshots(
    associations: &[SignalDetectionEventAssociation],
    solution: &LocationSolution,
    detections: &SignalDetectionStore,
    stations: &dyn StationDirectory,
) -> Vec<SignalDetectionSnapshot> {
    associations
        .iter()
        .filter(|a| !a.rejected)
        .filter_map(|association| {
            let sd_hyp_id = &association.signal_detection_hypothesis_id;
            let detection = detections.by_hypothesis_id(sd_hyp_id)?;
            let hypothesis = detection.hypotheses.get(sd_hyp_id)?;
            let station = stations.station(&detection.station_id);

            Some(SignalDetectionSnapshot {
                signal_detection_id: detection.id.clone(),
                signal_detection_hypothesis_id: hypothesis.id.clone(),
                station_id: detection.station_id.clone(),
                station_name: station
                    .as_ref()
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| detection.station_id.clone()),
                channel_name: station
                    .map(|s| s.default_channel_name)
                    .unwrap_or_else(|| "fkb".to_string()),
                phase: hypothesis.phase(),
                time: values_for(hypothesis, solution, FeatureMeasurementType::ArrivalTime),
                slowness: values_for(hypothesis, solution, FeatureMeasurementType::Slowness),
                azimuth: values_for(
                    hypothesis,
                    solution,
                    FeatureMeasurementType::ReceiverToSourceAzimuth,
                ),
            })
        })
        .collect()
}

fn values_for(
    hypothesis: &SignalDetectionHypothesis,
    solution: &LocationSolution,
    kind: FeatureMeasurementType,
) -> AssociationValues {
    let Some(measurement) = hypothesis.measurement(kind) else {
        return AssociationValues::default();
    };
    let behavior = solution.behavior_for(&measurement.id);
    AssociationValues {
        defining: behavior
            .map(|b| b.defining)
            .unwrap_or_else(|| measurement.is_defining_for(DefiningOperation::Location)),
        observed: measurement.observed(),
        residual: behavior.map(|b| b.residual),
    }
}

/// Rebuild every behavior of the solution from the active associations
pub fn recompute_location_behaviors(
    solution: &mut LocationSolution,
    associations: &[SignalDetectionEventAssociation],
    detections: &SignalDetectionStore,
) {
    solution.location_behaviors.clear();
    for association in associations.iter().filter(|a| !a.rejected) {
        let sd_hyp_id = &association.signal_detection_hypothesis_id;
        let Some(detection) = detections.by_hypothesis_id(sd_hyp_id) else {
            continue;
        };
        if let Some(hypothesis) = detection.hypotheses.get(sd_hyp_id) {
            update_location_behaviors(solution, hypothesis, &detection.station_id, true);
        }
    }
}

/// Drop behaviors whose measurement no longer belongs to an active association
pub fn prune_orphan_behaviors(
    solution: &mut LocationSolution,
    associations: &[SignalDetectionEventAssociation],
    detections: &SignalDetectionStore,
) {
    let owned: HashSet<&str> = associations
        .iter()
        .filter(|a| !a.rejected)
        .filter_map(|a| detections.hypothesis(&a.signal_detection_hypothesis_id))
        .flat_map(|h| h.feature_measurements.iter().map(|fm| fm.id.as_str()))
        .collect();
    solution
        .location_behaviors
        .retain(|b| owned.contains(b.feature_measurement_id.as_str()));
}

/// Recompute the preferred solution's snapshots from the hypothesis'
/// associations and copy the preferred solution back into its set
pub fn refresh_snapshots(
    hypothesis: &mut EventHypothesis,
    detections: &SignalDetectionStore,
    stations: &dyn StationDirectory,
) {
    let associations = hypothesis.associations.clone();
    let Some(preferred) = hypothesis.preferred_location_mut() else {
        return;
    };
    preferred.snapshots = build_snapshots(&associations, preferred, detections, stations);
    let preferred = preferred.clone();
    for solution in hypothesis
        .location_solution_sets
        .iter_mut()
        .flat_map(|set| set.location_solutions.iter_mut())
        .filter(|ls| ls.id == preferred.id)
    {
        *solution = preferred.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stations::InMemoryStationDirectory;
    use analyst_core::{
        DetectionTiming, EventLocation, FeaturePrediction, FeatureMeasurementValue,
        InstantValue, LocationRestraint, NewDetection, PhaseType, Station,
    };

    fn solution() -> LocationSolution {
        LocationSolution::new(
            EventLocation {
                latitude_degrees: 0.0,
                longitude_degrees: 0.0,
                depth_km: 10.0,
                time: 970.0,
            },
            LocationRestraint::default(),
        )
    }

    fn detection_store() -> (SignalDetectionStore, String) {
        let mut store = SignalDetectionStore::new("CTBTO");
        let sd = store.create(&NewDetection {
            station_id: "S1".to_string(),
            phase: PhaseType::P,
            timing: DetectionTiming {
                arrival_time: 1000.0,
                time_uncertainty_sec: 0.5,
                amplitude_measurement: None,
            },
        });
        let hyp_id = sd.current().id.clone();
        (store, hyp_id)
    }

    #[test]
    fn test_associate_adds_three_behaviors() {
        let (store, hyp_id) = detection_store();
        let hyp = store.hypothesis(&hyp_id).unwrap();
        let mut ls = solution();

        update_location_behaviors(&mut ls, hyp, "S1", true);
        assert_eq!(ls.location_behaviors.len(), 3);
        assert!(ls.location_behaviors.iter().all(|b| b.defining && b.weight == 1.0));
        assert!(ls.location_behaviors.iter().all(|b| b.residual == 0.0));

        // associating again does not duplicate
        update_location_behaviors(&mut ls, hyp, "S1", true);
        assert_eq!(ls.location_behaviors.len(), 3);

        update_location_behaviors(&mut ls, hyp, "S1", false);
        assert!(ls.location_behaviors.is_empty());
    }

    #[test]
    fn test_residual_from_matching_prediction() {
        let (store, hyp_id) = detection_store();
        let hyp = store.hypothesis(&hyp_id).unwrap();
        let mut ls = solution();
        ls.feature_predictions.push(FeaturePrediction {
            id: "fp-1".to_string(),
            phase: PhaseType::P,
            prediction_type: FeatureMeasurementType::ArrivalTime,
            predicted_value: FeatureMeasurementValue::Instant(InstantValue {
                value: 998.5,
                standard_deviation: 0.0,
            }),
            station_id: "S1".to_string(),
            channel_id: None,
            source_location: ls.location,
            extrapolated: false,
        });

        update_location_behaviors(&mut ls, hyp, "S1", true);
        let arrival_id = &hyp
            .measurement(FeatureMeasurementType::ArrivalTime)
            .unwrap()
            .id;
        let behavior = ls.behavior_for(arrival_id).unwrap();
        assert_eq!(behavior.feature_prediction_id, "fp-1");
        assert!((behavior.residual - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_snapshots_use_station_name() {
        let (store, hyp_id) = detection_store();
        let stations = InMemoryStationDirectory::new(vec![Station {
            id: "S1".to_string(),
            name: "ASAR".to_string(),
            latitude_degrees: -23.7,
            longitude_degrees: 133.9,
            elevation_km: 0.6,
            default_channel_name: "beam".to_string(),
        }]);
        let associations = vec![
            SignalDetectionEventAssociation::new(hyp_id.clone(), "eh-1"),
            SignalDetectionEventAssociation::new("unknown", "eh-1"),
        ];

        let snapshots = build_snapshots(&associations, &solution(), &store, &stations);
        assert_eq!(snapshots.len(), 1);
        let snapshot = &snapshots[0];
        assert_eq!(snapshot.station_name, "ASAR");
        assert_eq!(snapshot.channel_name, "beam");
        assert_eq!(snapshot.phase, Some(PhaseType::P));
        assert_eq!(snapshot.time.observed, Some(1000.0));
        assert_eq!(snapshot.time.residual, None);
        assert!(snapshot.time.defining);
    }

    #[test]
    fn test_prune_and_refresh_keep_set_copy_in_step() {
        use analyst_core::{CreationInfo, LocationSolutionSet, PreferredLocationSolution};

        let (store, hyp_id) = detection_store();
        let stations = InMemoryStationDirectory::default();
        let mut ls = solution();
        update_location_behaviors(&mut ls, store.hypothesis(&hyp_id).unwrap(), "S1", true);

        let mut hyp = EventHypothesis::empty("ev-1");
        let mut association = SignalDetectionEventAssociation::new(hyp_id.clone(), hyp.id.clone());
        hyp.location_solution_sets
            .push(LocationSolutionSet::new(0, vec![ls.clone()]));
        hyp.preferred_location_solution = Some(PreferredLocationSolution {
            location_solution: ls,
            creation_info: CreationInfo::system(),
        });

        hyp.associations.push(association.clone());
        refresh_snapshots(&mut hyp, &store, &stations);
        assert_eq!(hyp.preferred_location().unwrap().snapshots.len(), 1);
        assert_eq!(
            hyp.location_solution_sets[0].location_solutions[0],
            *hyp.preferred_location().unwrap()
        );

        association.rejected = true;
        hyp.associations = vec![association];
        let associations = hyp.associations.clone();
        prune_orphan_behaviors(hyp.preferred_location_mut().unwrap(), &associations, &store);
        refresh_snapshots(&mut hyp, &store, &stations);
        let preferred = hyp.preferred_location().unwrap();
        assert!(preferred.location_behaviors.is_empty());
        assert!(preferred.snapshots.is_empty());
        assert!(hyp.location_solution_sets[0].location_solutions[0]
            .location_behaviors
            .is_empty());
    }
}
