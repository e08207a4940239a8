//! Change sets returned to the transport layer for publication

use crate::event::Event;
use crate::signal_detection::SignalDetection;
use serde::{Deserialize, Serialize};

/// Entities that changed as the result of one operation.
///
/// Each id appears at most once; pushing an entity that is already present
/// replaces the earlier copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssociationChange {
    pub events: Vec<Event>,
    pub signal_detections: Vec<SignalDetection>,
}

impl AssociationChange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&mut self, event: Event) {
        match self.events.iter_mut().find(|e| e.id == event.id) {
            Some(existing) => *existing = event,
            None => self.events.push(event),
        }
    }

    pub fn push_signal_detection(&mut self, detection: SignalDetection) {
        match self
            .signal_detections
            .iter_mut()
            .find(|sd| sd.id == detection.id)
        {
            Some(existing) => *existing = detection,
            None => self.signal_detections.push(detection),
        }
    }

    pub fn merge(&mut self, other: AssociationChange) {
        for event in other.events {
            self.push_event(event);
        }
        for detection in other.signal_detections {
            self.push_signal_detection(detection);
        }
    }

    pub fn event_ids(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.id.as_str()).collect()
    }

    pub fn signal_detection_ids(&self) -> Vec<&str> {
        self.signal_detections.iter().map(|sd| sd.id.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.signal_detections.is_empty()
    }
}

/// Result of a detection update: the updated detections plus any
/// association fallout
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DetectionChange {
    pub signal_detections: Vec<SignalDetection>,
    pub association_change: AssociationChange,
}

/// Result of creating an event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventCreation {
    pub event: Event,
    pub association_change: AssociationChange,
}

/// Result of discarding unsaved session work
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiscardSummary {
    pub change: AssociationChange,
    /// Entities created this session and dropped entirely
    pub removed_event_ids: Vec<String>,
    pub removed_signal_detection_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventHypothesis;

    fn event(id: &str, org: &str) -> Event {
        Event::new(id, org, EventHypothesis::empty(id), "stage")
    }

    #[test]
    fn test_push_event_dedupes_by_id() {
        let mut change = AssociationChange::new();
        change.push_event(event("ev-1", "A"));
        change.push_event(event("ev-2", "A"));
        change.push_event(event("ev-1", "B"));

        assert_eq!(change.event_ids(), vec!["ev-1", "ev-2"]);
        assert_eq!(change.events[0].monitoring_organization, "B");
    }

    #[test]
    fn test_merge() {
        let mut a = AssociationChange::new();
        a.push_event(event("ev-1", "A"));
        let mut b = AssociationChange::new();
        b.push_event(event("ev-1", "A"));
        b.push_event(event("ev-3", "A"));
        a.merge(b);
        assert_eq!(a.events.len(), 2);
        assert!(!a.is_empty());
    }
}
