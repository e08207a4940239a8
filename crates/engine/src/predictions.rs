//! Feature prediction fan-out
//!
//! One prediction request per configured phase, run concurrently. A failed
//! or timed-out phase is logged and contributes nothing.

use crate::services::{FeaturePredictionRequest, FeaturePredictionService, ServiceError};
use analyst_core::{EventLocation, FeaturePrediction, PhaseType, Station};
use std::sync::Arc;
use std::time::Duration;

pub struct FeaturePredictor {
    service: Arc<dyn FeaturePredictionService>,
    phases: Vec<PhaseType>,
}

impl FeaturePredictor {
    pub fn new(service: Arc<dyn FeaturePredictionService>, phases: Vec<PhaseType>) -> Self {
        Self { service, phases }
    }

    pub fn phases(&self) -> &[PhaseType] {
        &self.phases
    }

    /// Predictions for every phase that answered, in configured phase order
    pub async fn predict(
        &self,
        source_location: EventLocation,
        receivers: Vec<Station>,
        timeout: Duration,
    ) -> Vec<FeaturePrediction> {
        let mut handles = Vec::with_capacity(self.phases.len());
        for phase in self.phases.iter().copied() {
            let service = Arc::clone(&self.service);
            let request = FeaturePredictionRequest {
                source_location,
                receiver_locations: receivers.clone(),
                phase,
            };
            let handle = tokio::spawn(async move {
                tokio::time::timeout(timeout, service.predict_features(request))
                    .await
                    .unwrap_or(Err(ServiceError::Timeout(timeout)))
            });
            handles.push((phase, handle));
        }

        // Awaited in spawn order, so output follows the configured phases
        let mut predictions = Vec::new();
        for (phase, handle) in handles {
            match handle.await {
                Ok(Ok(answered)) => predictions.extend(answered),
                Ok(Err(err)) => {
                    tracing::warn!(phase = %phase, error = %err, "Feature prediction failed")
                }
                Err(err) => {
                    tracing::warn!(phase = %phase, error = %err, "Feature prediction task aborted")
                }
            }
        }
        predictions
    }
}
