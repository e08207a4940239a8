//! Location Solution Orchestrator
//!
//! A relocation issues one request per depth-restraint regime, concurrently,
//! each bounded by the same timeout. Successful answers form one new
//! `LocationSolutionSet`; nothing is committed here.

use crate::config::EngineConfig;
use crate::services::{LocateRequest, LocationService, ServiceError};
use analyst_core::{
    DepthRestraintType, EngineError, EngineResult, EventHypothesis, LocationRestraint,
    LocationSolution, SignalDetection,
};
use std::sync::Arc;
use std::time::Duration;

/// State of one depth-restraint request
#[derive(Debug, Clone, PartialEq)]
pub enum LocateState {
    Pending,
    Succeeded(Box<LocationSolution>),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocateAttempt {
    pub restraint: DepthRestraintType,
    pub state: LocateState,
}

impl LocateAttempt {
    pub fn pending(restraint: DepthRestraintType) -> Self {
        Self {
            restraint,
            state: LocateState::Pending,
        }
    }

    /// Settle a pending attempt; a settled one is returned unchanged
    pub fn succeed(mut self, solution: LocationSolution) -> Self {
        if self.state == LocateState::Pending {
            self.state = LocateState::Succeeded(Box::new(solution));
        }
        self
    }

    pub fn fail(mut self, reason: impl Into<String>) -> Self {
        if self.state == LocateState::Pending {
            self.state = LocateState::Failed(reason.into());
        }
        self
    }

    pub fn solution(&self) -> Option<&LocationSolution> {
        match &self.state {
            LocateState::Succeeded(solution) => Some(solution),
            _ => None,
        }
    }
}

/// Everything a relocation needs, captured from the cache before the
/// external calls
#[derive(Debug, Clone)]
pub struct LocatePlan {
    pub event_id: String,
    /// Local copy of the target hypothesis with the analyst's behaviors
    /// applied to its starting solution
    pub event_hypothesis: EventHypothesis,
    pub signal_detections: Vec<SignalDetection>,
    /// Depth used by the fixed-at-depth request
    pub fixed_depth_km: f64,
}

pub struct LocationSolutionOrchestrator {
    service: Arc<dyn LocationService>,
    priority: Vec<DepthRestraintType>,
    require_complete: bool,
}

impl LocationSolutionOrchestrator {
    pub fn new(
        service: Arc<dyn LocationService>,
        priority: Vec<DepthRestraintType>,
        require_complete: bool,
    ) -> Self {
        Self {
            service,
            priority,
            require_complete,
        }
    }

    pub fn from_config(service: Arc<dyn LocationService>, config: &EngineConfig) -> Self {
        Self::new(
            service,
            config.depth_restraint_priority.clone(),
            config.require_complete_solution_set,
        )
    }

    /// Issue all three requests and wait for each to settle
    pub async fn run(&self, plan: &LocatePlan, timeout: Duration) -> Vec<LocateAttempt> {
        let [unrestrained, surface, depth] = DepthRestraintType::ALL;
        let (a, b, c) = tokio::join!(
            self.attempt(plan, unrestrained, timeout),
            self.attempt(plan, surface, timeout),
            self.attempt(plan, depth, timeout),
        );
        vec![a, b, c]
    }

    async fn attempt(
        &self,
        plan: &LocatePlan,
        restraint: DepthRestraintType,
        timeout: Duration,
    ) -> LocateAttempt {
        let attempt = LocateAttempt::pending(restraint);
        let location_restraint = LocationRestraint::depth(restraint, Some(plan.fixed_depth_km));
        let request = LocateRequest {
            event_hypothesis: plan.event_hypothesis.clone(),
            signal_detections: plan.signal_detections.clone(),
            location_restraint: location_restraint.clone(),
        };

        let outcome = tokio::time::timeout(timeout, self.service.locate(request))
            .await
            .unwrap_or(Err(ServiceError::Timeout(timeout)));
        match outcome {
            Ok(mut solution) => {
                solution.location_restraint = location_restraint;
                attempt.succeed(solution)
            }
            Err(err) => {
                tracing::warn!(
                    event_hypothesis_id = %plan.event_hypothesis.id,
                    restraint = restraint.as_str(),
                    error = %err,
                    "Location request failed"
                );
                attempt.fail(err.to_string())
            }
        }
    }

    /// Solutions of the settled attempts, or `RelocationFailed` when none
    /// succeeded (or any failed while complete sets are required)
    pub fn collect_solutions(
        &self,
        event_hypothesis_id: &str,
        attempts: Vec<LocateAttempt>,
    ) -> EngineResult<Vec<LocationSolution>> {
        let mut solutions = Vec::with_capacity(attempts.len());
        let mut reasons = Vec::new();
        for attempt in attempts {
            match attempt.state {
                LocateState::Succeeded(solution) => solutions.push(*solution),
                LocateState::Failed(reason) => {
                    reasons.push(format!("{}: {}", attempt.restraint.as_str(), reason))
                }
                LocateState::Pending => reasons.push(format!(
                    "{}: never settled",
                    attempt.restraint.as_str()
                )),
            }
        }

        if solutions.is_empty() || (self.require_complete && !reasons.is_empty()) {
            return Err(EngineError::RelocationFailed {
                event_hypothesis_id: event_hypothesis_id.to_string(),
                reasons,
            });
        }
        Ok(solutions)
    }

    /// First solution in priority order; falls back to the first solution
    /// when the priority list names none of the regimes present
    pub fn select_preferred<'a>(
        &self,
        solutions: &'a [LocationSolution],
    ) -> Option<&'a LocationSolution> {
        self.priority
            .iter()
            .find_map(|r| solutions.iter().find(|ls| ls.depth_restraint_type() == *r))
            .or_else(|| solutions.first())
    }

    /// Run the requests and collect the surviving solutions
    pub async fn locate(
        &self,
        plan: &LocatePlan,
        timeout: Duration,
    ) -> EngineResult<Vec<LocationSolution>> {
        let attempts = self.run(plan, timeout).await;
        self.collect_solutions(&plan.event_hypothesis.id, attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedLocationService;
    use analyst_core::{CreationInfo, EventLocation, PreferredLocationSolution};

    fn plan() -> LocatePlan {
        let mut hyp = EventHypothesis::empty("ev-1");
        hyp.preferred_location_solution = Some(PreferredLocationSolution {
            location_solution: LocationSolution::new(
                EventLocation {
                    latitude_degrees: 45.0,
                    longitude_degrees: 90.0,
                    depth_km: 33.0,
                    time: 500.0,
                },
                LocationRestraint::default(),
            ),
            creation_info: CreationInfo::system(),
        });
        LocatePlan {
            event_id: "ev-1".to_string(),
            event_hypothesis: hyp,
            signal_detections: Vec::new(),
            fixed_depth_km: 33.0,
        }
    }

    fn orchestrator(service: SimulatedLocationService) -> LocationSolutionOrchestrator {
        LocationSolutionOrchestrator::new(Arc::new(service), DepthRestraintType::ALL.to_vec(), false)
    }

    #[test]
    fn test_attempt_settles_once() {
        let attempt = LocateAttempt::pending(DepthRestraintType::Unrestrained).fail("boom");
        let attempt = attempt.succeed(plan().event_hypothesis.preferred_location().unwrap().clone());
        assert_eq!(attempt.state, LocateState::Failed("boom".to_string()));
        assert!(attempt.solution().is_none());
    }

    #[tokio::test]
    async fn test_all_three_regimes_requested() {
        let locator = orchestrator(SimulatedLocationService::new());
        let solutions = locator
            .locate(&plan(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(solutions.len(), 3);
        let depth = solutions
            .iter()
            .find(|ls| ls.depth_restraint_type() == DepthRestraintType::FixedAtDepth)
            .unwrap();
        assert_eq!(depth.location.depth_km, 33.0);
        assert_eq!(depth.location_restraint.depth_restraint_km, Some(33.0));

        let preferred = locator.select_preferred(&solutions).unwrap();
        assert_eq!(preferred.depth_restraint_type(), DepthRestraintType::Unrestrained);
    }

    #[tokio::test]
    async fn test_partial_set_uses_priority_fallback() {
        let locator = orchestrator(
            SimulatedLocationService::new().failing(DepthRestraintType::Unrestrained),
        );
        let solutions = locator
            .locate(&plan(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(solutions.len(), 2);
        let preferred = locator.select_preferred(&solutions).unwrap();
        assert_eq!(preferred.depth_restraint_type(), DepthRestraintType::FixedAtSurface);
    }

    #[tokio::test]
    async fn test_all_failing_is_relocation_failure() {
        let locator = orchestrator(SimulatedLocationService::new().failing_all());
        let err = locator
            .locate(&plan(), Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            EngineError::RelocationFailed { reasons, .. } => assert_eq!(reasons.len(), 3),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_set_required() {
        let locator = LocationSolutionOrchestrator::new(
            Arc::new(SimulatedLocationService::new().failing(DepthRestraintType::FixedAtDepth)),
            DepthRestraintType::ALL.to_vec(),
            true,
        );
        let err = locator
            .locate(&plan(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RelocationFailed { .. }));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let locator = orchestrator(
            SimulatedLocationService::new().with_delay(Duration::from_millis(500)),
        );
        let attempts = locator.run(&plan(), Duration::from_millis(20)).await;
        assert!(attempts
            .iter()
            .all(|a| matches!(&a.state, LocateState::Failed(reason) if reason.contains("Timed out"))));
    }
}
