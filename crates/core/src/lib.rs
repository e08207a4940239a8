pub mod change;
pub mod common;
pub mod error;
pub mod event;
pub mod feature_measurement;
pub mod location;
pub mod signal_detection;
pub mod versioning;

pub use change::{AssociationChange, DetectionChange, DiscardSummary, EventCreation};
pub use common::{new_id, CreationInfo, CreatorType, TimeRange};
pub use error::{EngineError, EngineResult, EntityKind, ErrorCode, ErrorReport};
pub use event::{
    Event, EventHypothesis, EventHypothesisPatch, EventPatch, EventStatus,
    PreferredEventHypothesis, SignalDetectionEventAssociation,
};
pub use feature_measurement::{
    AmplitudeValue, DefiningOperation, DefiningRule, DoubleValue, FeatureMeasurement,
    FeatureMeasurementType, FeatureMeasurementValue, InstantValue, NumericValue, PhaseType,
    PhaseValue, StringValue, Units,
};
pub use location::{
    AssociationValues, DepthRestraintType, EventLocation, FeaturePrediction, LocationBehavior,
    LocationRestraint, LocationSolution, LocationSolutionSet, PreferredLocationSolution,
    RestraintType, SignalDetectionSnapshot, Station,
};
pub use signal_detection::{
    AmplitudeMeasurement, DetectionPatch, DetectionTiming, NewDetection, SignalDetection,
    SignalDetectionHypothesis,
};
pub use versioning::{VersionHistory, Versioned};
