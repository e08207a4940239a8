//! Event creation and hypothesis edits

use crate::location_behavior::refresh_snapshots;
use crate::state::EngineState;
use analyst_core::{
    new_id, AssociationChange, CreationInfo, EngineError, EngineResult, EntityKind, Event,
    EventCreation, EventHypothesis, EventHypothesisPatch, EventLocation, EventPatch,
    LocationRestraint, LocationSolution, LocationSolutionSet, NewDetection,
    PreferredEventHypothesis, PreferredLocationSolution, SignalDetection, Station,
};
use rand::Rng;

impl EngineState {
    pub fn create_detection(&mut self, input: &NewDetection) -> SignalDetection {
        let detection = self.signal_detections.create(input);
        tracing::info!(
            signal_detection_id = %detection.id,
            station_id = %detection.station_id,
            phase = %input.phase,
            arrival_time = input.timing.arrival_time,
            "Signal detection created"
        );
        detection
    }

    /// Create an event located at the earliest associated arrival and bind
    /// the given detection hypotheses to it
    pub fn create_event(&mut self, sd_hypothesis_ids: &[String]) -> EngineResult<EventCreation> {
        let event_id = new_id();
        let location = self.initial_location(sd_hypothesis_ids);
        let solution = LocationSolution::new(location, LocationRestraint::default());

        let mut hypothesis = EventHypothesis::empty(event_id.clone());
        hypothesis
            .location_solution_sets
            .push(LocationSolutionSet::new(0, vec![solution.clone()]));
        hypothesis.preferred_location_solution = Some(PreferredLocationSolution {
            location_solution: solution,
            creation_info: CreationInfo::system(),
        });
        let hypothesis_id = hypothesis.id.clone();

        let event = Event::new(
            event_id.clone(),
            self.events.monitoring_organization().to_string(),
            hypothesis,
            self.events.active_stage_id().to_string(),
        );
        self.events.insert_new(event);

        let association_change = if sd_hypothesis_ids.is_empty() {
            self.rebuild_index();
            let mut change = AssociationChange::new();
            change.push_event(self.events.require(&event_id)?.clone());
            change
        } else {
            self.change_associations(&hypothesis_id, sd_hypothesis_ids, true)?
        };

        tracing::info!(
            event_id = %event_id,
            associations = sd_hypothesis_ids.len(),
            latitude = location.latitude_degrees,
            longitude = location.longitude_degrees,
            "Event created"
        );
        Ok(EventCreation {
            event: self.events.require(&event_id)?.clone(),
            association_change,
        })
    }

    /// Starting location for a new event: the station of the earliest
    /// arrival, or a random point when no detection is usable
    pub(crate) fn initial_location(&self, sd_hypothesis_ids: &[String]) -> EventLocation {
        let earliest = sd_hypothesis_ids
            .iter()
            .filter_map(|id| {
                let detection = self.signal_detections.by_hypothesis_id(id)?;
                let arrival = detection.hypotheses.get(id)?.arrival_time()?;
                let station = self.stations.station(&detection.station_id)?;
                Some((arrival, station))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0));

        match earliest {
            Some((arrival, station)) => EventLocation {
                latitude_degrees: station.latitude_degrees,
                longitude_degrees: station.longitude_degrees,
                depth_km: self.config.default_depth_km,
                time: arrival - self.config.event_lead_time_secs,
            },
            None => {
                let mut rng = rand::thread_rng();
                EventLocation {
                    latitude_degrees: rng.gen_range(-90.0..=90.0),
                    longitude_degrees: rng.gen_range(-180.0..=180.0),
                    depth_km: self.config.default_depth_km,
                    time: self.interval.map(|r| r.start_time).unwrap_or(0.0) + 1.0,
                }
            }
        }
    }

    /// Copy-on-write the event's current hypothesis explicitly
    pub fn create_new_event_hypothesis(&mut self, event_id: &str) -> EngineResult<EventHypothesis> {
        let hypothesis = self.events.create_new_hypothesis(event_id, None)?;
        self.rebuild_index();
        Ok(hypothesis)
    }

    /// Apply a rejected flag and/or a new analyst location to the current
    /// hypothesis `event_hypothesis_id`
    pub fn update_event_hypothesis(
        &mut self,
        event_hypothesis_id: &str,
        patch: &EventHypothesisPatch,
    ) -> EngineResult<EventHypothesis> {
        if patch.is_empty() {
            return Err(EngineError::invalid(
                "event hypothesis update requires a rejected flag or a location",
            ));
        }
        let event_id = self
            .events
            .require_current_hypothesis(event_hypothesis_id)?
            .id
            .clone();
        let creation_info = patch
            .creator_id
            .as_ref()
            .map(CreationInfo::analyst)
            .unwrap_or_else(CreationInfo::system);

        let detections = &self.signal_detections;
        let stations = self.stations.as_ref();
        let (hypothesis_id, _) = self.events.edit_current(&event_id, |hyp| {
            if let Some(rejected) = patch.rejected {
                hyp.rejected = rejected;
            }
            if let Some(location) = patch.event_location {
                let previous = hyp.preferred_location();
                let restraint = previous
                    .map(|ls| ls.location_restraint.clone())
                    .unwrap_or_default();
                let mut solution = LocationSolution::new(location, restraint);
                solution.location_behaviors = previous
                    .map(|ls| ls.location_behaviors.clone())
                    .unwrap_or_default();

                let count = hyp.location_solution_sets.len();
                hyp.location_solution_sets
                    .push(LocationSolutionSet::new(count, vec![solution.clone()]));
                hyp.preferred_location_solution = Some(PreferredLocationSolution {
                    location_solution: solution,
                    creation_info,
                });
                refresh_snapshots(hyp, detections, stations);
            }
        })?;
        self.rebuild_index();

        tracing::info!(
            event_id = %event_id,
            event_hypothesis_id = %hypothesis_id,
            rejected = ?patch.rejected,
            relocated = patch.event_location.is_some(),
            "Event hypothesis updated"
        );
        self.events
            .hypothesis(&hypothesis_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(EntityKind::EventHypothesis, hypothesis_id))
    }

    /// Status, analysts and preferred-hypothesis changes
    pub fn update_event(&mut self, event_id: &str, patch: &EventPatch) -> EngineResult<Event> {
        let event = self.events.update_event(event_id, patch)?;
        if patch.preferred_hypothesis.is_some() {
            self.rebuild_index();
        }
        tracing::info!(event_id, status = ?event.status, "Event updated");
        Ok(event)
    }

    /// `update_event` followed by gathering the inputs for feature
    /// prediction. If the inputs cannot be gathered the event is left as
    /// it was before the patch.
    pub fn update_event_for_refinement(
        &mut self,
        event_id: &str,
        patch: &EventPatch,
    ) -> EngineResult<(EventLocation, Vec<Station>)> {
        let previous = self.events.require(event_id)?.clone();
        self.update_event(event_id, patch)?;
        match self.prepare_feature_predictions(event_id) {
            Ok(inputs) => Ok(inputs),
            Err(err) => {
                self.events.restore(previous);
                self.rebuild_index();
                tracing::warn!(event_id, error = %err, "Event update rolled back");
                Err(err)
            }
        }
    }

    /// Preferred entry for the active stage, bootstrapping it if needed
    pub fn current_hypothesis(&mut self, event_id: &str) -> EngineResult<PreferredEventHypothesis> {
        let preferred = self.events.current_hypothesis(event_id)?;
        self.rebuild_index();
        Ok(preferred)
    }

    pub fn preferred_hypothesis_for_stage(
        &self,
        event_id: &str,
        stage_id: &str,
    ) -> EngineResult<Option<EventHypothesis>> {
        Ok(self
            .events
            .preferred_for_stage(event_id, stage_id)?
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::state::EngineState;
    use crate::stations::InMemoryStationDirectory;
    use analyst_core::{
        DetectionTiming, EngineError, EventHypothesisPatch, EventLocation, NewDetection,
        PhaseType, Station, TimeRange,
    };
    use std::sync::Arc;

    fn station(id: &str, lat: f64, lon: f64) -> Station {
        Station {
            id: id.to_string(),
            name: id.to_string(),
            latitude_degrees: lat,
            longitude_degrees: lon,
            elevation_km: 0.0,
            default_channel_name: "fkb".to_string(),
        }
    }

    fn state() -> EngineState {
        let stations = InMemoryStationDirectory::new(vec![
            station("S1", 10.0, 20.0),
            station("S2", -5.0, 120.0),
        ]);
        EngineState::new(Arc::new(EngineConfig::default()), Arc::new(stations))
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
    fn test_event_starts_at_earliest_arrival_station() {
        let mut state = state();
        let late = state.create_detection(&pick("S1", 1200.0));
        let early = state.create_detection(&pick("S2", 1000.0));
        let ids = vec![late.current().id.clone(), early.current().id.clone()];

        let creation = state.create_event(&ids).unwrap();
        let hyp = creation.event.current_hypothesis();
        let location = hyp.preferred_location().unwrap().location;
        assert_eq!(location.latitude_degrees, -5.0);
        assert_eq!(location.longitude_degrees, 120.0);
        assert_eq!(location.depth_km, 10.0);
        assert_eq!(location.time, 970.0);
        assert_eq!(hyp.location_solution_sets.len(), 1);
        assert_eq!(hyp.location_solution_sets[0].count, 0);
        assert_eq!(hyp.associations.len(), 2);
        assert!(creation.event.modified());
    }

    #[test]
    fn test_event_without_detections_uses_interval_start() {
        let mut state = state();
        state.set_processing_stage("stage-2", Some(TimeRange::new(5000.0, 6000.0)));
        let creation = state.create_event(&[]).unwrap();
        let location = creation
            .event
            .current_hypothesis()
            .preferred_location()
            .unwrap()
            .location;
        assert_eq!(location.time, 5001.0);
        assert!((-90.0..=90.0).contains(&location.latitude_degrees));
        assert_eq!(
            creation
                .event
                .current_event_hypothesis
                .as_ref()
                .unwrap()
                .processing_stage_id,
            "stage-2"
        );
    }

    #[test]
    fn test_update_event_hypothesis_requires_a_field() {
        let mut state = state();
        let creation = state.create_event(&[]).unwrap();
        let hyp_id = creation.event.current_hypothesis().id.clone();
        let err = state
            .update_event_hypothesis(&hyp_id, &EventHypothesisPatch::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_relocating_by_hand_appends_a_set() {
        let mut state = state();
        let sd = state.create_detection(&pick("S1", 1000.0));
        let creation = state.create_event(&[sd.current().id.clone()]).unwrap();
        state.save();
        let hyp_id = creation.event.current_hypothesis().id.clone();

        let patch = EventHypothesisPatch {
            event_location: Some(EventLocation {
                latitude_degrees: 1.0,
                longitude_degrees: 2.0,
                depth_km: 3.0,
                time: 900.0,
            }),
            creator_id: Some("analyst-1".to_string()),
            ..Default::default()
        };
        let updated = state.update_event_hypothesis(&hyp_id, &patch).unwrap();

        assert_ne!(updated.id, hyp_id);
        assert_eq!(updated.parent_event_hypotheses, vec![hyp_id.clone()]);
        assert_eq!(updated.location_solution_sets.len(), 2);
        assert_eq!(updated.location_solution_sets[1].count, 1);
        let preferred = updated.preferred_location_solution.as_ref().unwrap();
        assert_eq!(preferred.creation_info.creator_id, "analyst-1");
        assert_eq!(preferred.location_solution.location_behaviors.len(), 3);
        assert_eq!(preferred.location_solution.snapshots.len(), 1);

        // the persisted hypothesis is untouched
        let event = state.events.get(&creation.event.id).unwrap();
        assert_eq!(
            event.hypothesis(&hyp_id).unwrap(),
            creation.event.current_hypothesis()
        );
    }
}
