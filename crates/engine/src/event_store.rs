//! Event Store
//!
//! Owns every cached `Event`, its hypothesis history and its per-stage
//! preferred-hypothesis bookkeeping.
//!
//! The current hypothesis of an event is the one its preferred-history entry
//! for the active processing stage points at. Mutations go through
//! `edit_current` / `apply_associations`, which edit an unsaved current
//! hypothesis in place and copy-on-write a persisted one.

use analyst_core::{
    new_id, EngineError, EngineResult, EntityKind, Event, EventHypothesis, EventPatch,
    PreferredEventHypothesis, SignalDetectionEventAssociation, TimeRange,
};
use std::collections::{BTreeMap, HashMap};

/// Hypotheses popped from one event by a discard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolledBackEvent {
    pub event_id: String,
    pub popped_hypothesis_ids: Vec<String>,
    /// `false` when the event was created this session and removed
    pub retained: bool,
}

#[derive(Debug)]
pub struct EventStore {
    events: BTreeMap<String, Event>,
    hypothesis_owner: HashMap<String, String>,
    active_stage_id: String,
    monitoring_organization: String,
}

impl EventStore {
    pub fn new(monitoring_organization: impl Into<String>, stage_id: impl Into<String>) -> Self {
        Self {
            events: BTreeMap::new(),
            hypothesis_owner: HashMap::new(),
            active_stage_id: stage_id.into(),
            monitoring_organization: monitoring_organization.into(),
        }
    }

    pub fn monitoring_organization(&self) -> &str {
        &self.monitoring_organization
    }

    pub fn active_stage_id(&self) -> &str {
        &self.active_stage_id
    }

    /// Switch processing stage and re-resolve every event's current hypothesis
    pub fn set_active_stage(&mut self, stage_id: impl Into<String>) {
        self.active_stage_id = stage_id.into();
        let stage = self.active_stage_id.clone();
        for event in self.events.values_mut() {
            resolve_in_place(event, &stage);
        }
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn get(&self, event_id: &str) -> Option<&Event> {
        self.events.get(event_id)
    }

    pub fn require(&self, event_id: &str) -> EngineResult<&Event> {
        self.get(event_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Event, event_id))
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.events.contains_key(event_id)
    }

    pub fn event_id_for_hypothesis(&self, hypothesis_id: &str) -> Option<&str> {
        self.hypothesis_owner.get(hypothesis_id).map(String::as_str)
    }

    pub fn by_hypothesis_id(&self, hypothesis_id: &str) -> Option<&Event> {
        self.event_id_for_hypothesis(hypothesis_id)
            .and_then(|id| self.events.get(id))
    }

    pub fn hypothesis(&self, hypothesis_id: &str) -> Option<&EventHypothesis> {
        self.by_hypothesis_id(hypothesis_id)
            .and_then(|e| e.hypothesis(hypothesis_id))
    }

    /// Resolve the event owning `hypothesis_id` and check the hypothesis is
    /// still that event's current one
    pub fn require_current_hypothesis(&self, hypothesis_id: &str) -> EngineResult<&Event> {
        let event = self
            .by_hypothesis_id(hypothesis_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::EventHypothesis, hypothesis_id))?;
        if event.current_hypothesis().id != hypothesis_id {
            return Err(EngineError::stale(EntityKind::EventHypothesis, hypothesis_id));
        }
        Ok(event)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events whose current preferred location time lies in `[start, end)`
    pub fn in_time_range(&self, range: &TimeRange) -> Vec<&Event> {
        self.events
            .values()
            .filter(|e| {
                e.location_time()
                    .map(|t| range.contains_half_open(t))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Latest hypothesis preferred for `stage_id`, if that stage was visited
    pub fn preferred_for_stage(&self, event_id: &str, stage_id: &str) -> EngineResult<Option<&EventHypothesis>> {
        let event = self.require(event_id)?;
        Ok(event
            .preferred_for_stage(stage_id)
            .and_then(|p| event.hypothesis(&p.event_hypothesis_id)))
    }

    // ========================================================================
    // Insertion
    // ========================================================================

    /// Insert an event created this session
    pub fn insert_new(&mut self, event: Event) {
        for hyp in event.hypotheses.iter() {
            self.hypothesis_owner.insert(hyp.id.clone(), event.id.clone());
        }
        self.events.insert(event.id.clone(), event);
    }

    /// Put back an earlier copy of a cached event. Its hypotheses must be
    /// the ones the cached event already owns.
    pub(crate) fn restore(&mut self, event: Event) {
        self.events.insert(event.id.clone(), event);
    }

    /// Insert an externally loaded event. An existing event is never replaced.
    pub fn insert_persisted(&mut self, mut event: Event) -> bool {
        if self.events.contains_key(&event.id) {
            return false;
        }
        event.hypotheses.mark_persisted();
        resolve_in_place(&mut event, &self.active_stage_id);
        self.insert_new(event);
        true
    }

    // ========================================================================
    // Current hypothesis and copy-on-write
    // ========================================================================

    /// Preferred entry for the active stage, bootstrapping one from the most
    /// recent entry when the stage has not been visited yet
    pub fn current_hypothesis(&mut self, event_id: &str) -> EngineResult<PreferredEventHypothesis> {
        let stage = self.active_stage_id.clone();
        let event = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Event, event_id))?;
        Ok(resolve_in_place(event, &stage))
    }

    /// Clone the current hypothesis under a new id, re-key its non-rejected
    /// associations (or `associations_override`) to it and make it current
    pub fn create_new_hypothesis(
        &mut self,
        event_id: &str,
        associations_override: Option<Vec<SignalDetectionEventAssociation>>,
    ) -> EngineResult<EventHypothesis> {
        let stage = self.active_stage_id.clone();
        let event = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Event, event_id))?;
        let preferred = resolve_in_place(event, &stage);

        let current = event.current_hypothesis();
        let mut next = current.clone();
        next.id = new_id();
        next.parent_event_hypotheses = vec![current.id.clone()];
        let source = associations_override.unwrap_or_else(|| current.associations.clone());
        next.associations = rekey_associations(source, &next.id);

        let entry = PreferredEventHypothesis {
            processing_stage_id: preferred.processing_stage_id,
            event_hypothesis_id: next.id.clone(),
        };
        event.hypotheses.append(next.clone());
        event.preferred_event_hypothesis_history.push(entry.clone());
        event.current_event_hypothesis = Some(entry);
        self.hypothesis_owner
            .insert(next.id.clone(), event_id.to_string());

        tracing::debug!(
            event_id,
            hypothesis_id = %next.id,
            "Created event hypothesis"
        );
        Ok(next)
    }

    /// Run `edit` against an editable current hypothesis, copying a persisted
    /// one first. Returns the edited hypothesis id and the closure's result.
    pub fn edit_current<F, R>(&mut self, event_id: &str, edit: F) -> EngineResult<(String, R)>
    where
        F: FnOnce(&mut EventHypothesis) -> R,
    {
        if !self.current_is_editable(event_id)? {
            self.create_new_hypothesis(event_id, None)?;
        }
        let event = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Event, event_id))?;
        let current = event
            .hypotheses
            .current_mut()
            .ok_or_else(|| EngineError::stale(EntityKind::Event, event_id))?;
        let result = edit(&mut *current);
        Ok((current.id.clone(), result))
    }

    /// Replace the current hypothesis' associations, copy-on-write when it
    /// has been persisted. Returns the hypothesis that now holds them.
    pub fn apply_associations(
        &mut self,
        event_id: &str,
        associations: Vec<SignalDetectionEventAssociation>,
    ) -> EngineResult<String> {
        if self.current_is_editable(event_id)? {
            let (id, _) = self.edit_current(event_id, |hyp| {
                let id = hyp.id.clone();
                hyp.associations = associations
                    .into_iter()
                    .map(|mut a| {
                        a.event_hypothesis_id = id.clone();
                        a
                    })
                    .collect();
            })?;
            Ok(id)
        } else {
            Ok(self.create_new_hypothesis(event_id, Some(associations))?.id)
        }
    }

    fn current_is_editable(&mut self, event_id: &str) -> EngineResult<bool> {
        let stage = self.active_stage_id.clone();
        let event = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Event, event_id))?;
        resolve_in_place(event, &stage);
        Ok(event.hypotheses.current_is_unsaved())
    }

    /// Status, analyst list and preferred-hypothesis changes
    pub fn update_event(&mut self, event_id: &str, patch: &EventPatch) -> EngineResult<Event> {
        if patch.is_empty() {
            return Err(EngineError::invalid("event update has no fields to apply"));
        }
        let stage = self.active_stage_id.clone();
        let event = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Event, event_id))?;

        if let Some(preferred) = &patch.preferred_hypothesis {
            if !event.hypotheses.contains(&preferred.event_hypothesis_id) {
                return Err(EngineError::not_found(
                    EntityKind::EventHypothesis,
                    preferred.event_hypothesis_id.clone(),
                ));
            }
        }

        if let Some(status) = patch.status {
            event.status = status;
        }
        if let Some(analysts) = &patch.active_analyst_user_names {
            event.active_analyst_user_names = analysts.clone();
        }
        if let Some(preferred) = &patch.preferred_hypothesis {
            event
                .preferred_event_hypothesis_history
                .push(preferred.clone());
            event.current_event_hypothesis = None;
            resolve_in_place(event, &stage);
        }
        Ok(event.clone())
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Pop every unsaved hypothesis; events created this session are removed
    pub fn rollback_unsaved(&mut self) -> Vec<RolledBackEvent> {
        let stage = self.active_stage_id.clone();
        let dirty: Vec<String> = self
            .events
            .values()
            .filter(|e| e.modified())
            .map(|e| e.id.clone())
            .collect();

        let mut rolled_back = Vec::with_capacity(dirty.len());
        for event_id in dirty {
            let Some(event) = self.events.get_mut(&event_id) else {
                continue;
            };

            if event.hypotheses.is_new() {
                let popped: Vec<String> = event.hypotheses.iter().map(|h| h.id.clone()).collect();
                self.events.remove(&event_id);
                for id in &popped {
                    self.hypothesis_owner.remove(id);
                }
                rolled_back.push(RolledBackEvent {
                    event_id,
                    popped_hypothesis_ids: popped,
                    retained: false,
                });
                continue;
            }

            let mut popped = Vec::new();
            while let Some(hyp) = event.hypotheses.rollback_last() {
                popped.push(hyp.id);
            }
            event
                .preferred_event_hypothesis_history
                .retain(|p| !popped.contains(&p.event_hypothesis_id));
            event.current_event_hypothesis = None;
            resolve_in_place(event, &stage);
            for id in &popped {
                self.hypothesis_owner.remove(id);
            }
            rolled_back.push(RolledBackEvent {
                event_id,
                popped_hypothesis_ids: popped,
                retained: true,
            });
        }
        rolled_back
    }

    /// Mark everything persisted and return what changed since the last save
    pub fn mark_saved(&mut self) -> Vec<Event> {
        let mut saved = Vec::new();
        for event in self.events.values_mut() {
            if event.modified() {
                saved.push(event.clone());
            }
            event.hypotheses.mark_persisted();
        }
        saved
    }
}

/// Id of the hypothesis that would be current for `stage_id`, without
/// bootstrapping anything
pub fn resolve_current_hypothesis_id<'a>(event: &'a Event, stage_id: &str) -> &'a str {
    if let Some(cached) = &event.current_event_hypothesis {
        if cached.processing_stage_id == stage_id
            && event.hypotheses.contains(&cached.event_hypothesis_id)
        {
            return &cached.event_hypothesis_id;
        }
    }
    event
        .preferred_for_stage(stage_id)
        .or_else(|| event.preferred_event_hypothesis_history.last())
        .map(|p| p.event_hypothesis_id.as_str())
        .filter(|id| event.hypotheses.contains(id))
        .unwrap_or_else(|| event.hypotheses.last().id.as_str())
}

/// Resolve and cache the preferred entry for `stage_id`, selecting its
/// hypothesis as current.
///
/// When the stage has no entry yet, the most recent entry is copied and
/// tagged with the stage.
fn resolve_in_place(event: &mut Event, stage_id: &str) -> PreferredEventHypothesis {
    let hypothesis_id = resolve_current_hypothesis_id(event, stage_id).to_string();
    let entry = PreferredEventHypothesis {
        processing_stage_id: stage_id.to_string(),
        event_hypothesis_id: hypothesis_id.clone(),
    };
    if event.preferred_for_stage(stage_id).map(|p| &p.event_hypothesis_id) != Some(&hypothesis_id) {
        event.preferred_event_hypothesis_history.push(entry.clone());
    }
    event.hypotheses.select(&hypothesis_id);
    event.current_event_hypothesis = Some(entry.clone());
    entry
}

fn rekey_associations(
    associations: Vec<SignalDetectionEventAssociation>,
    event_hypothesis_id: &str,
) -> Vec<SignalDetectionEventAssociation> {
    associations
        .into_iter()
        .filter(|a| !a.rejected)
        .map(|a| SignalDetectionEventAssociation {
            id: new_id(),
            signal_detection_hypothesis_id: a.signal_detection_hypothesis_id,
            event_hypothesis_id: event_hypothesis_id.to_string(),
            rejected: false,
        })
        .collect()
}
