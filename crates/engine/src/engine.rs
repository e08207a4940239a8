//! Engine: the async entry point used by the transport layer.
//!
//! Owns the engine state behind a tokio `RwLock` plus the per-entity lock
//! registry. Every mutation first takes the locks of the events and
//! detections it will touch, then does its synchronous work under the state
//! write lock. Relocation and feature prediction drop the state lock across
//! the external call but keep their entity lock until commit.

use crate::config::EngineConfig;
use crate::locator::LocationSolutionOrchestrator;
use crate::locks::{detection_key, event_key, EntityGuard, EntityLocks};
use crate::predictions::FeaturePredictor;
use crate::services::{FeaturePredictionService, LocationService};
use crate::state::EngineState;
use crate::stations::StationDirectory;
use analyst_core::{
    AssociationChange, DetectionChange, DetectionPatch, DiscardSummary, EngineError,
    EngineResult, EntityKind, Event, EventCreation, EventHypothesis, EventHypothesisPatch,
    EventLocation, EventPatch, EventStatus, LocationBehavior, NewDetection,
    PreferredEventHypothesis, SignalDetection, Station, TimeRange,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Lock resolution retries before settling for the union of every key seen
const LOCK_ATTEMPTS: usize = 3;

/// Engine owns one analyst session's stores and the services they call
pub struct Engine {
    /// Stores, index and static inputs
    state: RwLock<EngineState>,
    /// Per event / detection advisory locks
    locks: EntityLocks,
    /// Three-regime relocation
    locator: LocationSolutionOrchestrator,
    /// Per-phase feature prediction
    predictor: FeaturePredictor,
    config: Arc<EngineConfig>,
}

impl Engine {
    /// Create an engine; the configuration is validated first
    pub fn new(
        config: EngineConfig,
        stations: Arc<dyn StationDirectory>,
        location_service: Arc<dyn LocationService>,
        prediction_service: Arc<dyn FeaturePredictionService>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        Ok(Self {
            state: RwLock::new(EngineState::new(Arc::clone(&config), stations)),
            locks: EntityLocks::new(),
            locator: LocationSolutionOrchestrator::from_config(location_service, &config),
            predictor: FeaturePredictor::new(prediction_service, config.default_phases.clone()),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a read-only query against the current state
    pub async fn read<R>(&self, query: impl FnOnce(&EngineState) -> R) -> R {
        let state = self.state.read().await;
        query(&state)
    }

    /// Take the entity locks named by `resolve`.
    ///
    /// Ids are resolved under a read lock, locked, then resolved again; a
    /// concurrent copy-on-write between the two can move an edge onto an
    /// entity not yet locked, so resolution is retried a bounded number of
    /// times with the union of keys.
    async fn lock_for<F>(&self, resolve: F) -> EngineResult<EntityGuard>
    where
        F: Fn(&EngineState) -> EngineResult<Vec<String>>,
    {
        let mut keys = resolve(&*self.state.read().await)?;
        for _ in 0..LOCK_ATTEMPTS {
            let guard = self.locks.acquire(keys.clone()).await;
            let now = resolve(&*self.state.read().await)?;
            if guard.covers(&now) {
                return Ok(guard);
            }
            drop(guard);
            keys.extend(now);
        }
        tracing::debug!(keys = keys.len(), "Lock resolution did not settle, locking union");
        Ok(self.locks.acquire(keys).await)
    }

    // ========================================================================
    // Signal detections
    // ========================================================================

    pub async fn hydrate_signal_detections(&self, detections: Vec<SignalDetection>) -> usize {
        let keys: Vec<String> = detections.iter().map(|sd| detection_key(&sd.id)).collect();
        let _guard = self.locks.acquire(keys).await;
        self.state.write().await.hydrate_signal_detections(detections)
    }

    pub async fn create_detection(&self, input: NewDetection) -> SignalDetection {
        self.state.write().await.create_detection(&input)
    }

    pub async fn update_detection(
        &self,
        detection_id: &str,
        patch: DetectionPatch,
    ) -> EngineResult<DetectionChange> {
        let ids = [detection_id.to_string()];
        let _guard = self.lock_for(|s| detection_keys(s, &ids)).await?;
        self.state.write().await.update_detection(detection_id, &patch)
    }

    pub async fn update_detections(
        &self,
        detection_ids: &[String],
        patch: DetectionPatch,
    ) -> EngineResult<DetectionChange> {
        let _guard = self.lock_for(|s| detection_keys(s, detection_ids)).await?;
        self.state.write().await.update_detections(detection_ids, &patch)
    }

    pub async fn reject_detections(&self, detection_ids: &[String]) -> EngineResult<AssociationChange> {
        let _guard = self.lock_for(|s| detection_keys(s, detection_ids)).await?;
        self.state.write().await.reject_detections(detection_ids)
    }

    pub async fn detection(&self, detection_id: &str) -> Option<SignalDetection> {
        self.read(|s| s.signal_detections().get(detection_id).cloned())
            .await
    }

    pub async fn detections_by_ids(&self, detection_ids: &[String]) -> Vec<SignalDetection> {
        self.read(|s| {
            s.signal_detections()
                .by_ids(detection_ids)
                .into_iter()
                .cloned()
                .collect()
        })
        .await
    }

    pub async fn detection_by_feature_measurement(
        &self,
        feature_measurement_id: &str,
    ) -> Option<SignalDetection> {
        self.read(|s| {
            s.signal_detections()
                .by_feature_measurement(feature_measurement_id)
                .cloned()
        })
        .await
    }

    pub async fn detections_for_event(&self, event_id: &str) -> EngineResult<Vec<SignalDetection>> {
        self.read(|s| s.detections_for_event(event_id)).await
    }

    pub async fn detections_by_stations(
        &self,
        station_ids: &[String],
        range: TimeRange,
    ) -> Vec<SignalDetection> {
        self.read(|s| s.detections_by_stations(station_ids, &range))
            .await
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub async fn hydrate_events(&self, events: Vec<Event>) -> usize {
        let keys: Vec<String> = events.iter().map(|e| event_key(&e.id)).collect();
        let _guard = self.locks.acquire(keys).await;
        self.state.write().await.hydrate_events(events)
    }

    pub async fn create_event(&self, sd_hypothesis_ids: &[String]) -> EngineResult<EventCreation> {
        let _guard = self
            .lock_for(|s| Ok(detection_keys_for_hypotheses(s, sd_hypothesis_ids)))
            .await?;
        self.state.write().await.create_event(sd_hypothesis_ids)
    }

    pub async fn event(&self, event_id: &str) -> Option<Event> {
        self.read(|s| s.events().get(event_id).cloned()).await
    }

    pub async fn events_in_time_range(&self, range: TimeRange) -> Vec<Event> {
        self.read(|s| s.events().in_time_range(&range).into_iter().cloned().collect())
            .await
    }

    pub async fn current_hypothesis(&self, event_id: &str) -> EngineResult<PreferredEventHypothesis> {
        let _guard = self.locks.acquire([event_key(event_id)]).await;
        self.state.write().await.current_hypothesis(event_id)
    }

    pub async fn preferred_hypothesis_for_stage(
        &self,
        event_id: &str,
        stage_id: &str,
    ) -> EngineResult<Option<EventHypothesis>> {
        self.read(|s| s.preferred_hypothesis_for_stage(event_id, stage_id))
            .await
    }

    pub async fn create_new_event_hypothesis(&self, event_id: &str) -> EngineResult<EventHypothesis> {
        let _guard = self.locks.acquire([event_key(event_id)]).await;
        self.state.write().await.create_new_event_hypothesis(event_id)
    }

    pub async fn update_event_hypothesis(
        &self,
        event_hypothesis_id: &str,
        patch: EventHypothesisPatch,
    ) -> EngineResult<EventHypothesis> {
        let _guard = self
            .lock_for(|s| Ok(vec![event_key(owner_of(s, event_hypothesis_id)?)]))
            .await?;
        self.state
            .write()
            .await
            .update_event_hypothesis(event_hypothesis_id, &patch)
    }

    /// Apply status, analyst and preferred-hypothesis changes. Opening an
    /// event for refinement computes its feature predictions.
    pub async fn update_event(&self, event_id: &str, patch: EventPatch) -> EngineResult<Event> {
        let _guard = self.locks.acquire([event_key(event_id)]).await;
        if patch.status != Some(EventStatus::OpenForRefinement) {
            return self.state.write().await.update_event(event_id, &patch);
        }
        let (source, receivers) = self
            .state
            .write()
            .await
            .update_event_for_refinement(event_id, &patch)?;
        self.predict_from(event_id, source, receivers).await
    }

    /// Switch the active processing stage; every event re-resolves its
    /// current hypothesis
    pub async fn set_processing_stage(
        &self,
        stage_id: &str,
        interval: Option<TimeRange>,
    ) -> EngineResult<()> {
        let _guard = self.lock_for(|s| Ok(all_keys(s))).await?;
        self.state
            .write()
            .await
            .set_processing_stage(stage_id, interval);
        Ok(())
    }

    // ========================================================================
    // Associations and conflicts
    // ========================================================================

    pub async fn change_associations(
        &self,
        event_hypothesis_id: &str,
        sd_hypothesis_ids: &[String],
        associate: bool,
    ) -> EngineResult<AssociationChange> {
        let _guard = self
            .lock_for(|s| {
                let mut keys = detection_keys_for_hypotheses(s, sd_hypothesis_ids);
                keys.push(event_key(owner_of(s, event_hypothesis_id)?));
                Ok(keys)
            })
            .await?;
        self.state
            .write()
            .await
            .change_associations(event_hypothesis_id, sd_hypothesis_ids, associate)
    }

    pub async fn get_conflicts(&self, sd_hypothesis_ids: &[String]) -> Vec<String> {
        self.read(|s| s.get_conflicts(sd_hypothesis_ids)).await
    }

    pub async fn event_has_conflict(&self, event_id: &str) -> EngineResult<bool> {
        self.read(|s| s.event_has_conflict(event_id)).await
    }

    pub async fn conflicting_detection_hypotheses(&self, event_id: &str) -> EngineResult<Vec<String>> {
        self.read(|s| s.conflicting_detection_hypotheses(event_id))
            .await
    }

    /// True when the live index equals one rebuilt from scratch
    pub async fn index_is_consistent(&self) -> bool {
        self.read(|s| s.index_is_consistent()).await
    }

    // ========================================================================
    // Location
    // ========================================================================

    pub async fn locate_event(
        &self,
        event_hypothesis_id: &str,
        location_solution_id: &str,
        behaviors: Vec<LocationBehavior>,
    ) -> EngineResult<EventHypothesis> {
        self.locate_event_with_timeout(
            event_hypothesis_id,
            location_solution_id,
            behaviors,
            self.config.service_timeout(),
        )
        .await
    }

    /// Relocate under all three depth regimes. Nothing is written unless at
    /// least one regime succeeds.
    pub async fn locate_event_with_timeout(
        &self,
        event_hypothesis_id: &str,
        location_solution_id: &str,
        behaviors: Vec<LocationBehavior>,
        timeout: Duration,
    ) -> EngineResult<EventHypothesis> {
        let _guard = self
            .lock_for(|s| Ok(vec![event_key(owner_of(s, event_hypothesis_id)?)]))
            .await?;
        let plan = self
            .state
            .read()
            .await
            .prepare_locate(event_hypothesis_id, location_solution_id, behaviors)?;

        let solutions = self.locator.locate(&plan, timeout).await?;
        let preferred_id = self
            .locator
            .select_preferred(&solutions)
            .map(|ls| ls.id.clone())
            .ok_or_else(|| EngineError::RelocationFailed {
                event_hypothesis_id: event_hypothesis_id.to_string(),
                reasons: vec!["no solution to prefer".to_string()],
            })?;

        self.state
            .write()
            .await
            .commit_locate(&plan, solutions, &preferred_id)
    }

    /// Predict features for every default phase from the event's preferred
    /// location
    pub async fn compute_feature_predictions(&self, event_id: &str) -> EngineResult<Event> {
        let _guard = self.locks.acquire([event_key(event_id)]).await;
        self.predict_locked(event_id).await
    }

    /// Caller holds the event lock
    async fn predict_locked(&self, event_id: &str) -> EngineResult<Event> {
        let (source, receivers) = self
            .state
            .read()
            .await
            .prepare_feature_predictions(event_id)?;
        self.predict_from(event_id, source, receivers).await
    }

    async fn predict_from(
        &self,
        event_id: &str,
        source: EventLocation,
        receivers: Vec<Station>,
    ) -> EngineResult<Event> {
        let predictions = self
            .predictor
            .predict(source, receivers, self.config.service_timeout())
            .await;
        self.state
            .write()
            .await
            .commit_feature_predictions(event_id, predictions)
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    pub async fn discard_unsaved(&self) -> EngineResult<DiscardSummary> {
        let _guard = self.lock_for(|s| Ok(all_keys(s))).await?;
        self.state.write().await.discard_unsaved()
    }

    pub async fn save(&self) -> EngineResult<AssociationChange> {
        let _guard = self.lock_for(|s| Ok(all_keys(s))).await?;
        Ok(self.state.write().await.save())
    }
}

// ============================================================================
// Lock key resolution
// ============================================================================

fn owner_of<'a>(state: &'a EngineState, event_hypothesis_id: &str) -> EngineResult<&'a str> {
    state
        .events()
        .event_id_for_hypothesis(event_hypothesis_id)
        .ok_or_else(|| EngineError::not_found(EntityKind::EventHypothesis, event_hypothesis_id))
}

/// The detections plus every event currently associated with them
fn detection_keys(state: &EngineState, detection_ids: &[String]) -> EngineResult<Vec<String>> {
    let mut keys = Vec::new();
    for id in detection_ids {
        let detection = state.signal_detections().require(id)?;
        keys.push(detection_key(id));
        for event_hypothesis_id in state
            .association_index()
            .event_hypotheses_for(&detection.current().id)
        {
            if let Some(event_id) = state.events().event_id_for_hypothesis(&event_hypothesis_id) {
                keys.push(event_key(event_id));
            }
        }
    }
    Ok(keys)
}

fn detection_keys_for_hypotheses(state: &EngineState, sd_hypothesis_ids: &[String]) -> Vec<String> {
    sd_hypothesis_ids
        .iter()
        .filter_map(|id| state.signal_detections().by_hypothesis_id(id))
        .map(|sd| detection_key(&sd.id))
        .collect()
}

fn all_keys(state: &EngineState) -> Vec<String> {
    state
        .events()
        .iter()
        .map(|e| event_key(&e.id))
        .chain(state.signal_detections().iter().map(|sd| detection_key(&sd.id)))
        .collect()
}
