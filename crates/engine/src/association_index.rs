//! Association Index
//!
//! Derived map from signal detection hypothesis id to the event hypotheses
//! currently associated with it. Built only by scanning every event's
//! current hypothesis; never patched incrementally.

use crate::event_store::{resolve_current_hypothesis_id, EventStore};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationIndex {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl AssociationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan every event's current hypothesis and collect its non-rejected
    /// associations
    pub fn derive(events: &EventStore) -> Self {
        let stage = events.active_stage_id();
        let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for event in events.iter() {
            let hypothesis_id = resolve_current_hypothesis_id(event, stage);
            let Some(hypothesis) = event.hypothesis(hypothesis_id) else {
                continue;
            };
            for association in hypothesis.active_associations() {
                edges
                    .entry(association.signal_detection_hypothesis_id.clone())
                    .or_default()
                    .insert(hypothesis.id.clone());
            }
        }
        Self { edges }
    }

    pub fn rebuild(&mut self, events: &EventStore) {
        *self = Self::derive(events);
        tracing::debug!(
            detection_hypotheses = self.edges.len(),
            "Association index rebuilt"
        );
    }

    /// Event hypotheses currently associated with the detection hypothesis
    pub fn event_hypotheses_for(&self, sd_hypothesis_id: &str) -> Vec<String> {
        self.edges
            .get(sd_hypothesis_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_conflicted(&self, sd_hypothesis_id: &str) -> bool {
        self.edges
            .get(sd_hypothesis_id)
            .map(|set| set.len() > 1)
            .unwrap_or(false)
    }

    /// The subset of `sd_hypothesis_ids` claimed by more than one event
    /// hypothesis, in input order
    pub fn get_conflicts(&self, sd_hypothesis_ids: &[String]) -> Vec<String> {
        let mut seen = BTreeSet::new();
        sd_hypothesis_ids
            .iter()
            .filter(|id| self.is_conflicted(id))
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }

    /// Every conflicted detection hypothesis id
    pub fn all_conflicts(&self) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(_, set)| set.len() > 1)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Ids of events holding a conflicted edge to any of `sd_hypothesis_ids`
    pub fn events_in_conflict(&self, events: &EventStore, sd_hypothesis_ids: &[String]) -> Vec<String> {
        let mut event_ids = Vec::new();
        for sd_hypothesis_id in self.get_conflicts(sd_hypothesis_ids) {
            for event_hypothesis_id in self.event_hypotheses_for(&sd_hypothesis_id) {
                if let Some(event_id) = events.event_id_for_hypothesis(&event_hypothesis_id) {
                    if !event_ids.iter().any(|e| e == event_id) {
                        event_ids.push(event_id.to_string());
                    }
                }
            }
        }
        event_ids
    }

    /// Stable digest of the index contents, for comparing two indexes in logs
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (sd_hypothesis_id, event_hypothesis_ids) in &self.edges {
            hasher.update(sd_hypothesis_id.as_bytes());
            for id in event_hypothesis_ids {
                hasher.update(b"|");
                hasher.update(id.as_bytes());
            }
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyst_core::{Event, EventHypothesis, SignalDetectionEventAssociation};

    fn event_with(id: &str, sd_hyp_ids: &[&str]) -> Event {
        let mut hyp = EventHypothesis::empty(id);
        for sd in sd_hyp_ids {
            hyp.associations
                .push(SignalDetectionEventAssociation::new(*sd, hyp.id.clone()));
        }
        Event::new(id, "CTBTO", hyp, "stage")
    }

    fn store(events: Vec<Event>) -> EventStore {
        let mut store = EventStore::new("CTBTO", "stage");
        for event in events {
            store.insert_new(event);
        }
        store
    }

    #[test]
    fn test_conflicts_need_two_owners() {
        let events = store(vec![
            event_with("a", &["x", "y"]),
            event_with("b", &["x"]),
        ]);
        let index = AssociationIndex::derive(&events);

        let ids = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        assert_eq!(index.get_conflicts(&ids), vec!["x".to_string()]);
        assert_eq!(index.event_hypotheses_for("x").len(), 2);
        assert_eq!(index.all_conflicts(), vec!["x".to_string()]);

        let mut in_conflict = index.events_in_conflict(&events, &ids);
        in_conflict.sort();
        assert_eq!(in_conflict, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_rejected_associations_not_indexed() {
        let mut event = event_with("a", &[]);
        let mut hyp = event.current_hypothesis().clone();
        let mut rejected = SignalDetectionEventAssociation::new("x", hyp.id.clone());
        rejected.rejected = true;
        hyp.associations.push(rejected);
        event = Event::new("a", "CTBTO", hyp, "stage");

        let index = AssociationIndex::derive(&store(vec![event]));
        assert!(index.is_empty());
    }

    #[test]
    fn test_rebuild_matches_derive_and_fingerprint() {
        let events = store(vec![event_with("a", &["x"]), event_with("b", &["y"])]);
        let mut index = AssociationIndex::new();
        index.rebuild(&events);
        let derived = AssociationIndex::derive(&events);
        assert_eq!(index, derived);
        assert_eq!(index.fingerprint(), derived.fingerprint());
        assert_ne!(index.fingerprint(), AssociationIndex::new().fingerprint());
    }

    #[test]
    fn test_duplicate_ids_reported_once() {
        let events = store(vec![event_with("a", &["x"]), event_with("b", &["x"])]);
        let index = AssociationIndex::derive(&events);
        let ids = vec!["x".to_string(), "x".to_string()];
        assert_eq!(index.get_conflicts(&ids), vec!["x".to_string()]);
    }
}
