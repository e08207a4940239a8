//! Hypothesis versioning and association consistency engine
//!
//! The in-memory domain layer behind interactive review of seismic signal
//! detections and the events they are associated with.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────────┐
//!  │                          Engine                              │
//!  │        (per-entity locks, async service boundaries)          │
//!  │                                                              │
//!  │   ┌──────────────────┐   ┌────────────┐   ┌───────────────┐  │
//!  │   │ SignalDetection  │   │ EventStore │──▶│ Association   │  │
//!  │   │ Store            │   │            │   │ Index         │  │
//!  │   └──────────────────┘   └─────┬──────┘   └───────────────┘  │
//!  │                                │                             │
//!  │                ┌───────────────┴──────────────┐              │
//!  │                ▼                              ▼              │
//!  │   ┌──────────────────────┐      ┌────────────────────────┐   │
//!  │   │ LocationSolution     │      │ FeaturePredictor       │   │
//!  │   │ Orchestrator         │      │                        │   │
//!  │   └──────────┬───────────┘      └───────────┬────────────┘   │
//!  └──────────────┼──────────────────────────────┼────────────────┘
//!                 ▼                              ▼
//!          LocationService            FeaturePredictionService
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use analyst_engine::{Engine, EngineConfig, InMemoryStationDirectory};
//! use analyst_engine::simulated::{SimulatedLocationService, SimulatedPredictionService};
//! use std::sync::Arc;
//!
//! let engine = Engine::new(
//!     EngineConfig::default(),
//!     Arc::new(InMemoryStationDirectory::default()),
//!     Arc::new(SimulatedLocationService::new()),
//!     Arc::new(SimulatedPredictionService::new()),
//! )?;
//! let detection = engine.create_detection(pick).await;
//! let creation = engine.create_event(&[detection.current().id.clone()]).await?;
//! ```

pub mod association_index;
pub mod config;
pub mod engine;
pub mod event_store;
pub mod location_behavior;
pub mod locator;
pub mod locks;
pub mod logging;
pub mod predictions;
pub mod services;
pub mod signal_detection_store;
pub mod simulated;
pub mod state;
pub mod stations;

// impl blocks on EngineState
mod association;
mod event_ops;

pub use association_index::AssociationIndex;
pub use config::EngineConfig;
pub use engine::Engine;
pub use event_store::EventStore;
pub use locator::{LocateAttempt, LocatePlan, LocateState, LocationSolutionOrchestrator};
pub use logging::{init_logging, LoggingConfig};
pub use predictions::FeaturePredictor;
pub use services::{
    FeaturePredictionRequest, FeaturePredictionService, LocateRequest, LocationService,
    ServiceError,
};
pub use signal_detection_store::{HypothesisOutcome, SignalDetectionStore};
pub use state::EngineState;
pub use stations::{InMemoryStationDirectory, StationDirectory};
