//! Events, event hypotheses and the association edges between
//! event hypotheses and signal detection hypotheses

use crate::common::new_id;
use crate::location::{
    EventLocation, LocationSolution, LocationSolutionSet, PreferredLocationSolution,
};
use crate::versioning::{VersionHistory, Versioned};
use serde::{Deserialize, Serialize};

/// Edge between a signal detection hypothesis and an event hypothesis.
/// Both ends are referenced by id only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalDetectionEventAssociation {
    pub id: String,
    pub signal_detection_hypothesis_id: String,
    pub event_hypothesis_id: String,
    pub rejected: bool,
}

impl SignalDetectionEventAssociation {
    pub fn new(
        signal_detection_hypothesis_id: impl Into<String>,
        event_hypothesis_id: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            signal_detection_hypothesis_id: signal_detection_hypothesis_id.into(),
            event_hypothesis_id: event_hypothesis_id.into(),
            rejected: false,
        }
    }
}

// ============================================================================
// Event Hypothesis
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventHypothesis {
    pub id: String,
    pub event_id: String,
    pub rejected: bool,
    /// Hypotheses this one was derived from
    #[serde(default)]
    pub parent_event_hypotheses: Vec<String>,
    #[serde(default)]
    pub associations: Vec<SignalDetectionEventAssociation>,
    #[serde(default)]
    pub location_solution_sets: Vec<LocationSolutionSet>,
    pub preferred_location_solution: Option<PreferredLocationSolution>,
}

impl Versioned for EventHypothesis {
    fn version_id(&self) -> &str {
        &self.id
    }
}

impl EventHypothesis {
    pub fn empty(event_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            event_id: event_id.into(),
            rejected: false,
            parent_event_hypotheses: Vec::new(),
            associations: Vec::new(),
            location_solution_sets: Vec::new(),
            preferred_location_solution: None,
        }
    }

    pub fn active_associations(&self) -> impl Iterator<Item = &SignalDetectionEventAssociation> {
        self.associations.iter().filter(|a| !a.rejected)
    }

    /// Non-rejected edge to the given detection hypothesis
    pub fn active_association_for(
        &self,
        sd_hypothesis_id: &str,
    ) -> Option<&SignalDetectionEventAssociation> {
        self.active_associations()
            .find(|a| a.signal_detection_hypothesis_id == sd_hypothesis_id)
    }

    pub fn associated_sd_hypothesis_ids(&self) -> Vec<String> {
        self.active_associations()
            .map(|a| a.signal_detection_hypothesis_id.clone())
            .collect()
    }

    pub fn preferred_location(&self) -> Option<&LocationSolution> {
        self.preferred_location_solution
            .as_ref()
            .map(|p| &p.location_solution)
    }

    pub fn preferred_location_mut(&mut self) -> Option<&mut LocationSolution> {
        self.preferred_location_solution
            .as_mut()
            .map(|p| &mut p.location_solution)
    }

    /// Set that holds the preferred solution, or the latest set if none does
    pub fn preferred_solution_set(&self) -> Option<&LocationSolutionSet> {
        let preferred_id = self.preferred_location().map(|ls| ls.id.as_str());
        preferred_id
            .and_then(|id| {
                self.location_solution_sets
                    .iter()
                    .find(|set| set.solution(id).is_some())
            })
            .or_else(|| self.location_solution_sets.last())
    }

    /// Solution with the given id from any set
    pub fn find_solution(&self, solution_id: &str) -> Option<&LocationSolution> {
        self.location_solution_sets
            .iter()
            .find_map(|set| set.solution(solution_id))
    }
}

// ============================================================================
// Event
// ============================================================================

/// Preferred hypothesis for one processing stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreferredEventHypothesis {
    pub processing_stage_id: String,
    pub event_hypothesis_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    ReadyForRefinement,
    OpenForRefinement,
    AwaitingReview,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub monitoring_organization: String,
    pub hypotheses: VersionHistory<EventHypothesis>,
    /// One entry per processing stage visited, in visit order
    pub preferred_event_hypothesis_history: Vec<PreferredEventHypothesis>,
    /// Entry matching the active stage, resolved lazily
    pub current_event_hypothesis: Option<PreferredEventHypothesis>,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub active_analyst_user_names: Vec<String>,
}

impl Event {
    /// A brand new event whose only hypothesis is preferred for `stage_id`
    pub fn new(
        id: impl Into<String>,
        monitoring_organization: impl Into<String>,
        first: EventHypothesis,
        stage_id: impl Into<String>,
    ) -> Self {
        let preferred = PreferredEventHypothesis {
            processing_stage_id: stage_id.into(),
            event_hypothesis_id: first.id.clone(),
        };
        Self {
            id: id.into(),
            monitoring_organization: monitoring_organization.into(),
            hypotheses: VersionHistory::new(first),
            preferred_event_hypothesis_history: vec![preferred.clone()],
            current_event_hypothesis: Some(preferred),
            status: EventStatus::ReadyForRefinement,
            active_analyst_user_names: Vec::new(),
        }
    }

    /// Rebuild an externally loaded event. `None` if it has no hypotheses.
    pub fn from_persisted(
        id: impl Into<String>,
        monitoring_organization: impl Into<String>,
        hypotheses: Vec<EventHypothesis>,
        preferred_event_hypothesis_history: Vec<PreferredEventHypothesis>,
    ) -> Option<Self> {
        Some(Self {
            id: id.into(),
            monitoring_organization: monitoring_organization.into(),
            hypotheses: VersionHistory::from_persisted(hypotheses)?,
            preferred_event_hypothesis_history,
            current_event_hypothesis: None,
            status: EventStatus::ReadyForRefinement,
            active_analyst_user_names: Vec::new(),
        })
    }

    pub fn current_hypothesis(&self) -> &EventHypothesis {
        self.hypotheses.current()
    }

    pub fn hypothesis(&self, id: &str) -> Option<&EventHypothesis> {
        self.hypotheses.get(id)
    }

    pub fn modified(&self) -> bool {
        self.hypotheses.has_unsaved()
    }

    pub fn preferred_for_stage(&self, stage_id: &str) -> Option<&PreferredEventHypothesis> {
        self.preferred_event_hypothesis_history
            .iter()
            .rev()
            .find(|p| p.processing_stage_id == stage_id)
    }

    /// Origin time of the current preferred location
    pub fn location_time(&self) -> Option<f64> {
        self.current_hypothesis()
            .preferred_location()
            .map(|ls| ls.location.time)
    }
}

// ============================================================================
// Inputs
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventHypothesisPatch {
    #[serde(default)]
    pub rejected: Option<bool>,
    #[serde(default)]
    pub event_location: Option<EventLocation>,
    #[serde(default)]
    pub creator_id: Option<String>,
}

impl EventHypothesisPatch {
    pub fn is_empty(&self) -> bool {
        self.rejected.is_none() && self.event_location.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventPatch {
    #[serde(default)]
    pub status: Option<EventStatus>,
    #[serde(default)]
    pub preferred_hypothesis: Option<PreferredEventHypothesis>,
    #[serde(default)]
    pub active_analyst_user_names: Option<Vec<String>>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.preferred_hypothesis.is_none()
            && self.active_analyst_user_names.is_none()
    }
}
