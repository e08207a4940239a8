//! Feature measurements attached to signal detection hypotheses
//!
//! A measurement's value shape depends on its type; `FeatureMeasurementValue`
//! makes that explicit so callers match on it instead of probing fields.

use crate::common::new_id;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Measurement Types
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureMeasurementType {
    ArrivalTime,
    ReceiverToSourceAzimuth,
    SourceToReceiverAzimuth,
    Slowness,
    Phase,
    #[serde(rename = "AMPLITUDE_A5_OVER_2")]
    AmplitudeA5Over2,
    FilteredBeam,
}

impl FeatureMeasurementType {
    /// Types that take part in location and therefore carry location behaviors
    pub const LOCATION_TYPES: [FeatureMeasurementType; 3] = [
        FeatureMeasurementType::ArrivalTime,
        FeatureMeasurementType::ReceiverToSourceAzimuth,
        FeatureMeasurementType::Slowness,
    ];

    pub fn is_location_type(&self) -> bool {
        Self::LOCATION_TYPES.contains(self)
    }
}

/// Seismic, hydroacoustic and infrasound phase labels
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhaseType {
    P,
    Pn,
    Pg,
    PKP,
    PKPbc,
    PcP,
    pP,
    S,
    Sn,
    Sg,
    ScP,
    LR,
    Lg,
    Rg,
    T,
    I,
    Unknown,
}

impl PhaseType {
    pub const ALL: [PhaseType; 17] = [
        PhaseType::P,
        PhaseType::Pn,
        PhaseType::Pg,
        PhaseType::PKP,
        PhaseType::PKPbc,
        PhaseType::PcP,
        PhaseType::pP,
        PhaseType::S,
        PhaseType::Sn,
        PhaseType::Sg,
        PhaseType::ScP,
        PhaseType::LR,
        PhaseType::Lg,
        PhaseType::Rg,
        PhaseType::T,
        PhaseType::I,
        PhaseType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseType::P => "P",
            PhaseType::Pn => "Pn",
            PhaseType::Pg => "Pg",
            PhaseType::PKP => "PKP",
            PhaseType::PKPbc => "PKPbc",
            PhaseType::PcP => "PcP",
            PhaseType::pP => "pP",
            PhaseType::S => "S",
            PhaseType::Sn => "Sn",
            PhaseType::Sg => "Sg",
            PhaseType::ScP => "ScP",
            PhaseType::LR => "LR",
            PhaseType::Lg => "Lg",
            PhaseType::Rg => "Rg",
            PhaseType::T => "T",
            PhaseType::I => "I",
            PhaseType::Unknown => "Unknown",
        }
    }

    /// Upper-case P family phases are defining for location by default
    pub fn is_location_defining(&self) -> bool {
        self.as_str().starts_with('P')
    }
}

impl fmt::Display for PhaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PhaseType::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown phase: {}", s))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Units {
    Seconds,
    Degrees,
    SecondsPerDegree,
    Nanometers,
    Unitless,
}

// ============================================================================
// Measurement Values
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DoubleValue {
    pub value: f64,
    pub standard_deviation: f64,
    pub units: Units,
}

/// Point in time with uncertainty (arrival time)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct InstantValue {
    pub value: f64,
    pub standard_deviation: f64,
}

/// Scalar measured at a reference time (azimuth, slowness)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NumericValue {
    pub reference_time: f64,
    pub measurement_value: DoubleValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AmplitudeValue {
    pub start_time: f64,
    pub period: f64,
    pub amplitude: DoubleValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PhaseValue {
    pub phase: PhaseType,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StringValue {
    pub str_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureMeasurementValue {
    Instant(InstantValue),
    Numeric(NumericValue),
    Amplitude(AmplitudeValue),
    Phase(PhaseValue),
    String(StringValue),
}

impl FeatureMeasurementValue {
    /// The scalar an analyst would compare against a prediction
    pub fn observed(&self) -> Option<f64> {
        match self {
            FeatureMeasurementValue::Instant(v) => Some(v.value),
            FeatureMeasurementValue::Numeric(v) => Some(v.measurement_value.value),
            FeatureMeasurementValue::Amplitude(v) => Some(v.amplitude.value),
            FeatureMeasurementValue::Phase(_) | FeatureMeasurementValue::String(_) => None,
        }
    }
}

// ============================================================================
// Feature Measurement
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DefiningOperation {
    Location,
    Magnitude,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefiningRule {
    pub operation_type: DefiningOperation,
    pub is_defining: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureMeasurement {
    pub id: String,
    pub channel_segment_id: String,
    pub measurement_type: FeatureMeasurementType,
    pub value: FeatureMeasurementValue,
    #[serde(default)]
    pub defining_rules: Vec<DefiningRule>,
}

impl FeatureMeasurement {
    pub fn new(measurement_type: FeatureMeasurementType, value: FeatureMeasurementValue) -> Self {
        Self {
            id: new_id(),
            channel_segment_id: new_id(),
            measurement_type,
            value,
            defining_rules: Vec::new(),
        }
    }

    pub fn with_defining(mut self, operation_type: DefiningOperation, is_defining: bool) -> Self {
        self.defining_rules.retain(|r| r.operation_type != operation_type);
        self.defining_rules.push(DefiningRule {
            operation_type,
            is_defining,
        });
        self
    }

    pub fn is_defining_for(&self, operation_type: DefiningOperation) -> bool {
        self.defining_rules
            .iter()
            .any(|r| r.operation_type == operation_type && r.is_defining)
    }

    pub fn observed(&self) -> Option<f64> {
        self.value.observed()
    }
}
