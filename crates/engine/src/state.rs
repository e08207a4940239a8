//! Engine State
//!
//! The two stores, the derived association index and the static inputs
//! (configuration, station geometry) they are operated with. All methods
//! here are synchronous; the async `Engine` wraps them in locks.
//!
//! Association changes live in `association.rs`, event creation and edits
//! in `event_ops.rs`.

use crate::association_index::AssociationIndex;
use crate::config::EngineConfig;
use crate::event_store::EventStore;
use crate::location_behavior::{build_snapshots, recompute_location_behaviors, refresh_snapshots};
use crate::locator::LocatePlan;
use crate::signal_detection_store::SignalDetectionStore;
use crate::stations::StationDirectory;
use analyst_core::{
    AssociationChange, CreationInfo, DiscardSummary, EngineError, EngineResult, EntityKind,
    Event, EventHypothesis, EventLocation, FeaturePrediction, LocationBehavior,
    LocationSolution, LocationSolutionSet, PreferredLocationSolution, SignalDetection, Station,
    TimeRange,
};
use std::collections::HashSet;
use std::sync::Arc;

pub struct EngineState {
    pub(crate) signal_detections: SignalDetectionStore,
    pub(crate) events: EventStore,
    pub(crate) association_index: AssociationIndex,
    pub(crate) interval: Option<TimeRange>,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) stations: Arc<dyn StationDirectory>,
}

impl EngineState {
    pub fn new(config: Arc<EngineConfig>, stations: Arc<dyn StationDirectory>) -> Self {
        Self {
            signal_detections: SignalDetectionStore::new(config.monitoring_organization.clone()),
            events: EventStore::new(
                config.monitoring_organization.clone(),
                config.initial_stage_id.clone(),
            ),
            association_index: AssociationIndex::new(),
            interval: None,
            config,
            stations,
        }
    }

    pub fn signal_detections(&self) -> &SignalDetectionStore {
        &self.signal_detections
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }

    pub fn association_index(&self) -> &AssociationIndex {
        &self.association_index
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn interval(&self) -> Option<TimeRange> {
        self.interval
    }

    pub(crate) fn rebuild_index(&mut self) {
        self.association_index.rebuild(&self.events);
    }

    /// True when the live index matches one derived from scratch
    pub fn index_is_consistent(&self) -> bool {
        AssociationIndex::derive(&self.events) == self.association_index
    }

    // ========================================================================
    // Hydration
    // ========================================================================

    /// Insert externally loaded detections; returns how many were taken
    pub fn hydrate_signal_detections(&mut self, detections: Vec<SignalDetection>) -> usize {
        let mut inserted = 0;
        for detection in detections {
            let id = detection.id.clone();
            if self.signal_detections.insert_persisted(detection) {
                inserted += 1;
            } else {
                tracing::debug!(signal_detection_id = %id, "Kept cached detection with unsaved work");
            }
        }
        inserted
    }

    /// Insert externally loaded events, pruning associations to detection
    /// hypotheses the detection store does not know
    pub fn hydrate_events(&mut self, events: Vec<Event>) -> usize {
        let mut inserted = 0;
        for event in events {
            let event = self.prune_unknown_associations(event);
            if self.events.insert_persisted(event) {
                inserted += 1;
            }
        }
        self.rebuild_index();
        inserted
    }

    fn prune_unknown_associations(&self, event: Event) -> Event {
        let detections = &self.signal_detections;
        let unknown = |sd_hyp_id: &str| detections.hypothesis(sd_hyp_id).is_none();
        let has_unknown = event
            .hypotheses
            .iter()
            .flat_map(|h| h.associations.iter())
            .any(|a| unknown(&a.signal_detection_hypothesis_id));
        if !has_unknown {
            return event;
        }

        let hypotheses: Vec<EventHypothesis> = event
            .hypotheses
            .iter()
            .cloned()
            .map(|mut h| {
                h.associations.retain(|a| {
                    let keep = !unknown(&a.signal_detection_hypothesis_id);
                    if !keep {
                        tracing::warn!(
                            event_id = %event.id,
                            signal_detection_hypothesis_id = %a.signal_detection_hypothesis_id,
                            "Pruned association to unknown detection hypothesis"
                        );
                    }
                    keep
                });
                h
            })
            .collect();
        match Event::from_persisted(
            event.id.clone(),
            event.monitoring_organization.clone(),
            hypotheses,
            event.preferred_event_hypothesis_history.clone(),
        ) {
            Some(mut rebuilt) => {
                rebuilt.status = event.status;
                rebuilt.active_analyst_user_names = event.active_analyst_user_names.clone();
                rebuilt
            }
            None => event,
        }
    }

    /// Switch processing stage and the interval new events default into
    pub fn set_processing_stage(&mut self, stage_id: impl Into<String>, interval: Option<TimeRange>) {
        self.events.set_active_stage(stage_id);
        self.interval = interval;
        self.rebuild_index();
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Detections at the stations in `range`, padded by the extra loading time
    pub fn detections_by_stations(
        &self,
        station_ids: &[String],
        range: &TimeRange,
    ) -> Vec<SignalDetection> {
        let padded = range.padded_end(self.config.extra_loading_time_secs);
        self.signal_detections
            .by_stations(station_ids, &padded)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Detections owning the event's current active associations
    pub fn detections_for_event(&self, event_id: &str) -> EngineResult<Vec<SignalDetection>> {
        let event = self.events.require(event_id)?;
        let mut seen = HashSet::new();
        Ok(event
            .current_hypothesis()
            .active_associations()
            .filter_map(|a| self.signal_detections.by_hypothesis_id(&a.signal_detection_hypothesis_id))
            .filter(|sd| seen.insert(sd.id.clone()))
            .cloned()
            .collect())
    }

    pub fn get_conflicts(&self, sd_hypothesis_ids: &[String]) -> Vec<String> {
        self.association_index.get_conflicts(sd_hypothesis_ids)
    }

    /// Detection hypotheses of the event that another event also claims
    pub fn conflicting_detection_hypotheses(&self, event_id: &str) -> EngineResult<Vec<String>> {
        let event = self.events.require(event_id)?;
        let ids = event.current_hypothesis().associated_sd_hypothesis_ids();
        Ok(self.association_index.get_conflicts(&ids))
    }

    pub fn event_has_conflict(&self, event_id: &str) -> EngineResult<bool> {
        Ok(!self.conflicting_detection_hypotheses(event_id)?.is_empty())
    }

    // ========================================================================
    // Location
    // ========================================================================

    /// Capture a relocation of the current hypothesis `event_hypothesis_id`
    /// starting from `location_solution_id`, with `behaviors` (if any)
    /// replacing that solution's behaviors
    pub fn prepare_locate(
        &self,
        event_hypothesis_id: &str,
        location_solution_id: &str,
        behaviors: Vec<LocationBehavior>,
    ) -> EngineResult<LocatePlan> {
        let event = self.events.require_current_hypothesis(event_hypothesis_id)?;
        let mut hypothesis = event.current_hypothesis().clone();

        let mut start = hypothesis
            .preferred_location()
            .filter(|ls| ls.id == location_solution_id)
            .or_else(|| hypothesis.find_solution(location_solution_id))
            .cloned()
            .ok_or_else(|| EngineError::not_found(EntityKind::LocationSolution, location_solution_id))?;
        if !behaviors.is_empty() {
            start.location_behaviors = behaviors;
        }
        let fixed_depth_km = start.location.depth_km;
        let creation_info = hypothesis
            .preferred_location_solution
            .as_ref()
            .map(|p| p.creation_info.clone())
            .unwrap_or_else(CreationInfo::system);
        hypothesis.preferred_location_solution = Some(PreferredLocationSolution {
            location_solution: start,
            creation_info,
        });

        let mut seen = HashSet::new();
        let signal_detections = hypothesis
            .active_associations()
            .filter_map(|a| self.signal_detections.by_hypothesis_id(&a.signal_detection_hypothesis_id))
            .filter(|sd| seen.insert(sd.id.clone()))
            .cloned()
            .collect();

        Ok(LocatePlan {
            event_id: event.id.clone(),
            event_hypothesis: hypothesis,
            signal_detections,
            fixed_depth_km,
        })
    }

    /// Append the solutions as one new set and make `preferred_id` preferred
    pub fn commit_locate(
        &mut self,
        plan: &LocatePlan,
        mut solutions: Vec<LocationSolution>,
        preferred_id: &str,
    ) -> EngineResult<EventHypothesis> {
        let event = self
            .events
            .require_current_hypothesis(&plan.event_hypothesis.id)?;
        let event_id = event.id.clone();
        let associations = event.current_hypothesis().associations.clone();

        for solution in &mut solutions {
            solution.snapshots = build_snapshots(
                &associations,
                solution,
                &self.signal_detections,
                self.stations.as_ref(),
            );
        }
        let preferred = solutions
            .iter()
            .find(|ls| ls.id == preferred_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(EntityKind::LocationSolution, preferred_id))?;
        let restraint = preferred.depth_restraint_type();

        let (hypothesis_id, count) = self.events.edit_current(&event_id, move |hyp| {
            let count = hyp.location_solution_sets.len();
            hyp.location_solution_sets
                .push(LocationSolutionSet::new(count, solutions));
            hyp.preferred_location_solution = Some(PreferredLocationSolution {
                location_solution: preferred,
                creation_info: CreationInfo::system(),
            });
            count
        })?;
        self.rebuild_index();

        tracing::info!(
            event_id = %event_id,
            event_hypothesis_id = %hypothesis_id,
            set_count = count,
            preferred_restraint = restraint.as_str(),
            "Event located"
        );
        self.events
            .hypothesis(&hypothesis_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(EntityKind::EventHypothesis, hypothesis_id))
    }

    /// Source location and receivers for a feature-prediction request
    pub fn prepare_feature_predictions(
        &self,
        event_id: &str,
    ) -> EngineResult<(EventLocation, Vec<Station>)> {
        let event = self.events.require(event_id)?;
        let location = event
            .current_hypothesis()
            .preferred_location()
            .map(|ls| ls.location)
            .ok_or_else(|| {
                EngineError::invalid(format!("event {} has no preferred location", event_id))
            })?;
        Ok((location, self.stations.stations()))
    }

    /// Replace the preferred solution's predictions and recompute its
    /// behaviors and snapshots
    pub fn commit_feature_predictions(
        &mut self,
        event_id: &str,
        predictions: Vec<FeaturePrediction>,
    ) -> EngineResult<Event> {
        let detections = &self.signal_detections;
        let stations = self.stations.as_ref();
        let count = predictions.len();
        self.events.edit_current(event_id, move |hyp| {
            let associations = hyp.associations.clone();
            if let Some(preferred) = hyp.preferred_location_mut() {
                preferred.feature_predictions = predictions;
                recompute_location_behaviors(preferred, &associations, detections);
            }
            refresh_snapshots(hyp, detections, stations);
        })?;
        self.rebuild_index();

        tracing::debug!(event_id, predictions = count, "Feature predictions updated");
        self.events.require(event_id).cloned()
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Roll back every unsaved hypothesis and repair what still points at a
    /// popped detection hypothesis
    pub fn discard_unsaved(&mut self) -> EngineResult<DiscardSummary> {
        let rolled_events = self.events.rollback_unsaved();
        let rolled_detections = self.signal_detections.rollback_unsaved();
        self.rebuild_index();

        let mut summary = DiscardSummary::default();
        for rolled in &rolled_events {
            if rolled.retained {
                if let Some(event) = self.events.get(&rolled.event_id) {
                    summary.change.push_event(event.clone());
                }
            } else {
                summary.removed_event_ids.push(rolled.event_id.clone());
            }
        }

        for rolled in rolled_detections {
            for popped in &rolled.popped_hypothesis_ids {
                if self.association_index.event_hypotheses_for(popped).is_empty() {
                    continue;
                }
                let touched = match &rolled.restored_hypothesis_id {
                    Some(restored) => self.retarget_detection_hypothesis(popped, restored)?,
                    None => self.reject_associations_for(popped)?,
                };
                self.rebuild_index();
                for event_id in touched {
                    if let Some(event) = self.events.get(&event_id) {
                        summary.change.push_event(event.clone());
                    }
                }
            }
            match &rolled.restored_hypothesis_id {
                Some(_) => {
                    if let Some(detection) = self.signal_detections.get(&rolled.detection_id) {
                        summary.change.push_signal_detection(detection.clone());
                    }
                }
                None => summary
                    .removed_signal_detection_ids
                    .push(rolled.detection_id.clone()),
            }
        }
        self.rebuild_index();

        tracing::info!(
            events = summary.change.events.len(),
            signal_detections = summary.change.signal_detections.len(),
            removed_events = summary.removed_event_ids.len(),
            removed_signal_detections = summary.removed_signal_detection_ids.len(),
            "Discarded unsaved changes"
        );
        Ok(summary)
    }

    /// Everything modified since the last save; all histories become persisted
    pub fn save(&mut self) -> AssociationChange {
        let mut change = AssociationChange::new();
        for event in self.events.mark_saved() {
            change.push_event(event);
        }
        for detection in self.signal_detections.mark_saved() {
            change.push_signal_detection(detection);
        }
        tracing::info!(
            events = change.events.len(),
            signal_detections = change.signal_detections.len(),
            "Saved session changes"
        );
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stations::InMemoryStationDirectory;
    use analyst_core::{
        DetectionTiming, EventLocation, LocationRestraint, NewDetection, PhaseType,
        PreferredEventHypothesis, SignalDetectionEventAssociation,
    };

    fn state() -> EngineState {
        EngineState::new(
            Arc::new(EngineConfig::default()),
            Arc::new(InMemoryStationDirectory::default()),
        )
    }

    fn pick(station: &str, arrival: f64) -> NewDetection {
        NewDetection {
            station_id: station.to_string(),
            phase: PhaseType::P,
            timing: DetectionTiming {
                arrival_time: arrival,
                time_uncertainty_sec: 0.1,
                amplitude_measurement: None,
            },
        }
    }

    #[test]
    fn test_hydrate_events_prunes_unknown_associations() {
        let mut state = state();
        let detection = state.signal_detections.create(&pick("S1", 100.0));
        state.save();
        let known = detection.current().id.clone();

        let mut hyp = EventHypothesis::empty("ev-1");
        hyp.associations
            .push(SignalDetectionEventAssociation::new(known.clone(), hyp.id.clone()));
        hyp.associations
            .push(SignalDetectionEventAssociation::new("ghost", hyp.id.clone()));
        let preferred = PreferredEventHypothesis {
            processing_stage_id: state.config.initial_stage_id.clone(),
            event_hypothesis_id: hyp.id.clone(),
        };
        let event = Event::from_persisted("ev-1", "CTBTO", vec![hyp], vec![preferred]).unwrap();

        assert_eq!(state.hydrate_events(vec![event]), 1);
        let event = state.events.get("ev-1").unwrap();
        assert_eq!(event.current_hypothesis().associated_sd_hypothesis_ids(), vec![known.clone()]);
        assert!(!event.modified());
        assert_eq!(state.association_index.event_hypotheses_for(&known).len(), 1);
        assert!(state.index_is_consistent());
    }

    #[test]
    fn test_detections_by_stations_pads_end() {
        let mut config = EngineConfig::default();
        config.extra_loading_time_secs = 5.0;
        let mut state = EngineState::new(
            Arc::new(config),
            Arc::new(InMemoryStationDirectory::default()),
        );
        state.signal_detections.create(&pick("S1", 100.0));
        state.signal_detections.create(&pick("S1", 104.0));
        state.signal_detections.create(&pick("S2", 100.0));

        let stations = vec!["S1".to_string()];
        assert_eq!(
            state
                .detections_by_stations(&stations, &TimeRange::new(90.0, 100.0))
                .len(),
            2
        );
        assert_eq!(
            state
                .detections_by_stations(&stations, &TimeRange::new(101.0, 102.0))
                .len(),
            1
        );
    }

    #[test]
    fn test_feature_predictions_need_a_location() {
        let mut state = state();
        let event = Event::new("ev-1", "CTBTO", EventHypothesis::empty("ev-1"), "default-stage");
        state.events.insert_new(event);
        assert!(matches!(
            state.prepare_feature_predictions("ev-1"),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            state.prepare_feature_predictions("missing"),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn test_prepare_locate_rejects_unknown_solution() {
        let mut state = state();
        let mut hyp = EventHypothesis::empty("ev-1");
        let solution = LocationSolution::new(
            EventLocation {
                latitude_degrees: 0.0,
                longitude_degrees: 0.0,
                depth_km: 7.0,
                time: 10.0,
            },
            LocationRestraint::default(),
        );
        hyp.location_solution_sets
            .push(LocationSolutionSet::new(0, vec![solution.clone()]));
        hyp.preferred_location_solution = Some(PreferredLocationSolution {
            location_solution: solution.clone(),
            creation_info: CreationInfo::system(),
        });
        let hyp_id = hyp.id.clone();
        state
            .events
            .insert_new(Event::new("ev-1", "CTBTO", hyp, "default-stage"));

        let plan = state.prepare_locate(&hyp_id, &solution.id, Vec::new()).unwrap();
        assert_eq!(plan.fixed_depth_km, 7.0);
        assert_eq!(plan.event_id, "ev-1");
        assert!(matches!(
            state.prepare_locate(&hyp_id, "nope", Vec::new()),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn test_save_returns_modified_then_nothing() {
        let mut state = state();
        state.signal_detections.create(&pick("S1", 100.0));
        let first = state.save();
        assert_eq!(first.signal_detections.len(), 1);
        assert!(state.save().is_empty());
    }
}
