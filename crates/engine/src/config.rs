//! Engine configuration
//!
//! YAML/JSON configuration loaded once at startup. Every field has a default,
//! so an empty document is a valid configuration.

use analyst_core::{DepthRestraintType, EngineError, EngineResult, PhaseType};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Order in which depth-restraint regimes are tried when picking the
    /// preferred solution of a new solution set
    #[serde(default = "default_depth_restraint_priority")]
    pub depth_restraint_priority: Vec<DepthRestraintType>,

    /// Phases feature predictions are computed for
    #[serde(default = "default_phases")]
    pub default_phases: Vec<PhaseType>,

    /// Padding added to the end of detection load windows (seconds)
    #[serde(default)]
    pub extra_loading_time_secs: f64,

    /// Bound on each location or prediction service call (milliseconds)
    #[serde(default = "default_service_timeout_ms")]
    pub service_timeout_ms: u64,

    #[serde(default = "default_monitoring_organization")]
    pub monitoring_organization: String,

    /// Fail a relocation unless all three depth regimes succeeded
    #[serde(default)]
    pub require_complete_solution_set: bool,

    /// Depth given to newly created events (km)
    #[serde(default = "default_depth_km")]
    pub default_depth_km: f64,

    /// New event origin time is the earliest arrival minus this (seconds)
    #[serde(default = "default_event_lead_time")]
    pub event_lead_time_secs: f64,

    /// Stage used until the workflow selects one
    #[serde(default = "default_stage_id")]
    pub initial_stage_id: String,
}

fn default_depth_restraint_priority() -> Vec<DepthRestraintType> {
    DepthRestraintType::ALL.to_vec()
}

fn default_phases() -> Vec<PhaseType> {
    vec![
        PhaseType::P,
        PhaseType::Pn,
        PhaseType::PKP,
        PhaseType::PKPbc,
        PhaseType::PcP,
        PhaseType::pP,
        PhaseType::S,
        PhaseType::Sn,
        PhaseType::LR,
        PhaseType::Lg,
    ]
}

fn default_service_timeout_ms() -> u64 {
    30_000
}

fn default_monitoring_organization() -> String {
    "CTBTO".to_string()
}

fn default_depth_km() -> f64 {
    10.0
}

fn default_event_lead_time() -> f64 {
    30.0
}

fn default_stage_id() -> String {
    "default-stage".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            depth_restraint_priority: default_depth_restraint_priority(),
            default_phases: default_phases(),
            extra_loading_time_secs: 0.0,
            service_timeout_ms: default_service_timeout_ms(),
            monitoring_organization: default_monitoring_organization(),
            require_complete_solution_set: false,
            default_depth_km: default_depth_km(),
            event_lead_time_secs: default_event_lead_time(),
            initial_stage_id: default_stage_id(),
        }
    }
}

impl EngineConfig {
    /// Load from YAML file
    pub fn from_yaml_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config: {}", e)))?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from JSON file
    pub fn from_json_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config: {}", e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Pick the loader by file extension (`.json`, otherwise YAML)
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_yaml_file(path),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.depth_restraint_priority.is_empty() {
            return Err(EngineError::Config(
                "depth_restraint_priority must not be empty".to_string(),
            ));
        }
        if self.service_timeout_ms == 0 {
            return Err(EngineError::Config(
                "service_timeout_ms must be positive".to_string(),
            ));
        }
        if self.extra_loading_time_secs < 0.0 {
            return Err(EngineError::Config(
                "extra_loading_time_secs must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn extra_loading_time(&self) -> Duration {
        Duration::from_secs_f64(self.extra_loading_time_secs.max(0.0))
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(self.service_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_phases.len(), 10);
        assert_eq!(
            config.depth_restraint_priority[0],
            DepthRestraintType::Unrestrained
        );
        assert_eq!(config.monitoring_organization, "CTBTO");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: EngineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "depth_restraint_priority: [fixed_at_depth, unrestrained]\n\
             default_phases: [P, pP, PKPbc]\n\
             extra_loading_time_secs: 90\n\
             service_timeout_ms: 500"
        )
        .unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config.depth_restraint_priority,
            vec![
                DepthRestraintType::FixedAtDepth,
                DepthRestraintType::Unrestrained
            ]
        );
        assert_eq!(
            config.default_phases,
            vec![PhaseType::P, PhaseType::pP, PhaseType::PKPbc]
        );
        assert_eq!(config.extra_loading_time(), Duration::from_secs(90));
        assert_eq!(config.service_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"require_complete_solution_set": true}}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert!(config.require_complete_solution_set);
        assert_eq!(config.service_timeout_ms, 30_000);
    }

    #[test]
    fn test_empty_priority_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "depth_restraint_priority: []").unwrap();

        let err = EngineConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::from_yaml_file(Path::new("/nonexistent/engine.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
