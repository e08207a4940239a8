//! Shared primitives: ids, time ranges, creation info

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a fresh opaque id
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Time interval in epoch seconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimeRange {
    pub start_time: f64,
    pub end_time: f64,
}

impl TimeRange {
    pub fn new(start_time: f64, end_time: f64) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    /// `start <= t <= end`, used for arrival-time filtering
    pub fn contains_inclusive(&self, t: f64) -> bool {
        t >= self.start_time && t <= self.end_time
    }

    /// `start <= t < end`, used for event-time filtering
    pub fn contains_half_open(&self, t: f64) -> bool {
        t >= self.start_time && t < self.end_time
    }

    pub fn padded_end(&self, extra_secs: f64) -> Self {
        Self {
            start_time: self.start_time,
            end_time: self.end_time + extra_secs,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CreatorType {
    Analyst,
    System,
}

/// Who produced a hypothesis or solution, and when
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreationInfo {
    pub id: String,
    pub creation_time: DateTime<Utc>,
    pub creator_id: String,
    pub creator_type: CreatorType,
}

impl CreationInfo {
    pub fn analyst(creator_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            creation_time: Utc::now(),
            creator_id: creator_id.into(),
            creator_type: CreatorType::Analyst,
        }
    }

    pub fn system() -> Self {
        Self {
            id: new_id(),
            creation_time: Utc::now(),
            creator_id: "system".to_string(),
            creator_type: CreatorType::System,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_edges() {
        let range = TimeRange::new(100.0, 200.0);
        assert!(range.contains_inclusive(100.0));
        assert!(range.contains_inclusive(200.0));
        assert!(!range.contains_inclusive(200.001));
        assert!(range.contains_half_open(100.0));
        assert!(!range.contains_half_open(200.0));
    }

    #[test]
    fn test_padded_end() {
        let range = TimeRange::new(0.0, 10.0).padded_end(5.0);
        assert_eq!(range.end_time, 15.0);
        assert_eq!(range.start_time, 0.0);
    }

    #[test]
    fn test_new_id_unique() {
        assert_ne!(new_id(), new_id());
    }
}
