//! Association Engine
//!
//! Adds and removes association edges between an event's current hypothesis
//! and signal detection hypotheses, keeps location behaviors in step, and
//! repairs associations when a detection hypothesis is superseded or
//! rejected. Every successful change ends with an index rebuild.

use crate::location_behavior::{prune_orphan_behaviors, refresh_snapshots, update_location_behaviors};
use crate::signal_detection_store::HypothesisOutcome;
use crate::state::EngineState;
use analyst_core::{
    AssociationChange, DetectionChange, DetectionPatch, EngineError, EngineResult, EntityKind,
    SignalDetectionEventAssociation, SignalDetectionHypothesis,
};

impl EngineState {
    /// Associate (or disassociate) detection hypotheses with the current
    /// event hypothesis `event_hypothesis_id`.
    ///
    /// Unknown and stale detection hypothesis ids are logged and skipped.
    pub fn change_associations(
        &mut self,
        event_hypothesis_id: &str,
        sd_hypothesis_ids: &[String],
        associate: bool,
    ) -> EngineResult<AssociationChange> {
        let event = self.events.require_current_hypothesis(event_hypothesis_id)?;
        let event_id = event.id.clone();
        let mut associations = event.current_hypothesis().associations.clone();

        // events sharing an edge that is about to go away
        let conflicted_before = self
            .association_index
            .events_in_conflict(&self.events, sd_hypothesis_ids);

        let mut touched: Vec<(SignalDetectionHypothesis, String)> = Vec::new();
        for sd_hypothesis_id in sd_hypothesis_ids {
            let Some(detection) = self.signal_detections.by_hypothesis_id(sd_hypothesis_id) else {
                tracing::warn!(
                    signal_detection_hypothesis_id = %sd_hypothesis_id,
                    "Unknown detection hypothesis, skipping"
                );
                continue;
            };
            let Some(sd_hypothesis) = detection.hypotheses.get(sd_hypothesis_id) else {
                continue;
            };
            if touched.iter().any(|(h, _)| &h.id == sd_hypothesis_id) {
                continue;
            }

            let is_live = |a: &SignalDetectionEventAssociation| {
                !a.rejected && &a.signal_detection_hypothesis_id == sd_hypothesis_id
            };
            if associate {
                if detection.current().id != *sd_hypothesis_id {
                    tracing::warn!(
                        signal_detection_hypothesis_id = %sd_hypothesis_id,
                        signal_detection_id = %detection.id,
                        "Stale detection hypothesis, skipping"
                    );
                    continue;
                }
                if associations.iter().any(is_live) {
                    continue;
                }
                associations.push(SignalDetectionEventAssociation::new(
                    sd_hypothesis_id.clone(),
                    event_hypothesis_id,
                ));
            } else {
                if !associations.iter().any(is_live) {
                    continue;
                }
                associations.retain(|a| !is_live(a));
            }
            touched.push((sd_hypothesis.clone(), detection.station_id.clone()));
        }

        let mut change = AssociationChange::new();
        if touched.is_empty() {
            if let Some(event) = self.events.get(&event_id) {
                change.push_event(event.clone());
            }
            return Ok(change);
        }

        self.events.apply_associations(&event_id, associations)?;
        let detections = &self.signal_detections;
        let stations = self.stations.as_ref();
        let edits = &touched;
        self.events.edit_current(&event_id, |hyp| {
            if let Some(preferred) = hyp.preferred_location_mut() {
                for (sd_hypothesis, station_id) in edits {
                    update_location_behaviors(preferred, sd_hypothesis, station_id, associate);
                }
            }
            refresh_snapshots(hyp, detections, stations);
        })?;
        for (sd_hypothesis, _) in &touched {
            self.signal_detections
                .mark_association_modified(&sd_hypothesis.id);
        }
        self.rebuild_index();

        let touched_ids: Vec<String> = touched.iter().map(|(h, _)| h.id.clone()).collect();
        let conflicted_after = self
            .association_index
            .events_in_conflict(&self.events, &touched_ids);

        let primary = self.events.require(&event_id)?.clone();
        change.push_event(primary);
        for id in conflicted_before.iter().chain(conflicted_after.iter()) {
            if let Some(event) = self.events.get(id) {
                change.push_event(event.clone());
            }
        }
        for id in &touched_ids {
            if let Some(detection) = self.signal_detections.by_hypothesis_id(id) {
                change.push_signal_detection(detection.clone());
            }
        }

        tracing::info!(
            event_id = %event_id,
            associate,
            changed = touched_ids.len(),
            conflicts = conflicted_after.len(),
            "Associations changed"
        );
        Ok(change)
    }

    /// Point every current association on `previous` at `replacement`.
    /// Returns the ids of the events that changed.
    pub fn retarget_detection_hypothesis(
        &mut self,
        previous: &str,
        replacement: &str,
    ) -> EngineResult<Vec<String>> {
        let event_ids = self.events_associated_with(previous);
        let replacement_hypothesis = self
            .signal_detections
            .hypothesis(replacement)
            .cloned()
            .ok_or_else(|| EngineError::not_found(EntityKind::SignalDetectionHypothesis, replacement))?;
        let station_id = self
            .signal_detections
            .by_hypothesis_id(replacement)
            .map(|sd| sd.station_id.clone())
            .unwrap_or_default();

        for event_id in &event_ids {
            let associations = self
                .events
                .require(event_id)?
                .current_hypothesis()
                .associations
                .iter()
                .cloned()
                .map(|mut a| {
                    if a.signal_detection_hypothesis_id == previous {
                        a.signal_detection_hypothesis_id = replacement.to_string();
                    }
                    a
                })
                .collect();
            self.events.apply_associations(event_id, associations)?;

            let detections = &self.signal_detections;
            let stations = self.stations.as_ref();
            let sd_hypothesis = &replacement_hypothesis;
            let station_id = station_id.as_str();
            self.events.edit_current(event_id, |hyp| {
                let associations = hyp.associations.clone();
                if let Some(preferred) = hyp.preferred_location_mut() {
                    prune_orphan_behaviors(preferred, &associations, detections);
                    update_location_behaviors(preferred, sd_hypothesis, station_id, true);
                }
                refresh_snapshots(hyp, detections, stations);
            })?;
            tracing::debug!(
                event_id = %event_id,
                previous,
                replacement,
                "Retargeted association"
            );
        }
        if !event_ids.is_empty() {
            self.signal_detections.mark_association_modified(replacement);
        }
        Ok(event_ids)
    }

    /// Flag every current association on `sd_hypothesis_id` rejected.
    /// Returns the ids of the events that changed.
    pub fn reject_associations_for(&mut self, sd_hypothesis_id: &str) -> EngineResult<Vec<String>> {
        let event_ids = self.events_associated_with(sd_hypothesis_id);
        for event_id in &event_ids {
            let detections = &self.signal_detections;
            let stations = self.stations.as_ref();
            self.events.edit_current(event_id, |hyp| {
                for association in hyp
                    .associations
                    .iter_mut()
                    .filter(|a| a.signal_detection_hypothesis_id == sd_hypothesis_id)
                {
                    association.rejected = true;
                }
                let associations = hyp.associations.clone();
                if let Some(preferred) = hyp.preferred_location_mut() {
                    prune_orphan_behaviors(preferred, &associations, detections);
                }
                refresh_snapshots(hyp, detections, stations);
            })?;
        }
        if !event_ids.is_empty() {
            self.signal_detections
                .mark_association_modified(sd_hypothesis_id);
        }
        Ok(event_ids)
    }

    /// Events whose current hypothesis holds a live edge to the detection
    /// hypothesis, per the index
    fn events_associated_with(&self, sd_hypothesis_id: &str) -> Vec<String> {
        let mut event_ids: Vec<String> = Vec::new();
        for event_hypothesis_id in self.association_index.event_hypotheses_for(sd_hypothesis_id) {
            if let Some(event_id) = self.events.event_id_for_hypothesis(&event_hypothesis_id) {
                if !event_ids.iter().any(|e| e == event_id) {
                    event_ids.push(event_id.to_string());
                }
            }
        }
        event_ids
    }

    // ========================================================================
    // Detection edits
    // ========================================================================

    /// Apply a phase/timing patch and carry the change into every event
    /// associated with the detection
    pub fn update_detection(
        &mut self,
        detection_id: &str,
        patch: &DetectionPatch,
    ) -> EngineResult<DetectionChange> {
        let outcome = self.signal_detections.apply_patch(detection_id, patch)?;
        let touched_events = match &outcome {
            HypothesisOutcome::Superseded {
                previous_hypothesis_id,
                new_hypothesis_id,
            } => self.retarget_detection_hypothesis(previous_hypothesis_id, new_hypothesis_id)?,
            HypothesisOutcome::InPlace { hypothesis_id } => {
                self.refresh_behaviors_for(hypothesis_id)?
            }
        };
        self.rebuild_index();

        let detection = self.signal_detections.require(detection_id)?.clone();
        let mut association_change = AssociationChange::new();
        for event_id in &touched_events {
            if let Some(event) = self.events.get(event_id) {
                association_change.push_event(event.clone());
            }
        }
        association_change.push_signal_detection(detection.clone());

        tracing::info!(
            signal_detection_id = detection_id,
            hypothesis_id = %detection.current().id,
            events = touched_events.len(),
            "Signal detection updated"
        );
        Ok(DetectionChange {
            signal_detections: vec![detection],
            association_change,
        })
    }

    /// Batch form of `update_detection`; every id is checked first
    pub fn update_detections(
        &mut self,
        detection_ids: &[String],
        patch: &DetectionPatch,
    ) -> EngineResult<DetectionChange> {
        if patch.is_empty() {
            return Err(EngineError::invalid(
                "detection update requires a phase or timing",
            ));
        }
        for id in detection_ids {
            self.signal_detections.require(id)?;
        }

        let mut combined = DetectionChange::default();
        for id in detection_ids {
            let change = self.update_detection(id, patch)?;
            for detection in change.signal_detections {
                match combined
                    .signal_detections
                    .iter_mut()
                    .find(|sd| sd.id == detection.id)
                {
                    Some(existing) => *existing = detection,
                    None => combined.signal_detections.push(detection),
                }
            }
            combined.association_change.merge(change.association_change);
        }
        Ok(combined)
    }

    /// Re-derive the behaviors of an edited-in-place detection hypothesis in
    /// every event that associates it
    fn refresh_behaviors_for(&mut self, sd_hypothesis_id: &str) -> EngineResult<Vec<String>> {
        let event_ids = self.events_associated_with(sd_hypothesis_id);
        let Some(detection) = self.signal_detections.by_hypothesis_id(sd_hypothesis_id) else {
            return Ok(Vec::new());
        };
        let station_id = detection.station_id.clone();
        let Some(sd_hypothesis) = detection.hypotheses.get(sd_hypothesis_id).cloned() else {
            return Ok(Vec::new());
        };

        for event_id in &event_ids {
            let detections = &self.signal_detections;
            let stations = self.stations.as_ref();
            let sd_hypothesis = &sd_hypothesis;
            let station_id = station_id.as_str();
            self.events.edit_current(event_id, |hyp| {
                if let Some(preferred) = hyp.preferred_location_mut() {
                    update_location_behaviors(preferred, sd_hypothesis, station_id, true);
                }
                refresh_snapshots(hyp, detections, stations);
            })?;
        }
        Ok(event_ids)
    }

    /// Reject the detections' current hypotheses and cascade the rejection
    /// onto every association that points at them
    pub fn reject_detections(&mut self, detection_ids: &[String]) -> EngineResult<AssociationChange> {
        for id in detection_ids {
            self.signal_detections.require(id)?;
        }

        let mut touched_events: Vec<String> = Vec::new();
        let mut rejected_hypotheses = Vec::with_capacity(detection_ids.len());
        for id in detection_ids {
            match self.signal_detections.reject(id)? {
                HypothesisOutcome::Superseded {
                    previous_hypothesis_id,
                    new_hypothesis_id,
                } => {
                    touched_events.extend(
                        self.retarget_detection_hypothesis(&previous_hypothesis_id, &new_hypothesis_id)?,
                    );
                    rejected_hypotheses.push(new_hypothesis_id);
                }
                HypothesisOutcome::InPlace { hypothesis_id } => {
                    rejected_hypotheses.push(hypothesis_id)
                }
            }
        }
        self.rebuild_index();

        for hypothesis_id in &rejected_hypotheses {
            touched_events.extend(self.reject_associations_for(hypothesis_id)?);
        }
        self.rebuild_index();

        let mut change = AssociationChange::new();
        for event_id in &touched_events {
            if let Some(event) = self.events.get(event_id) {
                change.push_event(event.clone());
            }
        }
        for id in detection_ids {
            if let Some(detection) = self.signal_detections.get(id) {
                change.push_signal_detection(detection.clone());
            }
        }

        tracing::info!(
            signal_detections = detection_ids.len(),
            events = change.events.len(),
            "Signal detections rejected"
        );
        Ok(change)
    }
}
