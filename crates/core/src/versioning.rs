//! Append-only Hypothesis Histories
//!
//! Events and signal detections keep every interpretation they have ever had.
//! A history only grows, except that versions appended since the last external
//! persist may be rolled back when the session discards its unsaved work.
//!
//! Persisted versions are never handed out mutably: `current_mut` returns
//! `None` unless the current version is still unsaved.

use serde::{Deserialize, Serialize};

/// Anything that can live in a `VersionHistory`
pub trait Versioned {
    fn version_id(&self) -> &str;
}

// ============================================================================
// Version History
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawHistory<T>")]
pub struct VersionHistory<T> {
    /// Versions in append order
    versions: Vec<T>,
    /// Index of the current version
    current: usize,
    /// Number of leading versions that have been persisted externally
    persisted: usize,
}

/// Wire form of `VersionHistory`, checked before it becomes one
#[derive(Deserialize)]
struct RawHistory<T> {
    versions: Vec<T>,
    current: usize,
    persisted: usize,
}

impl<T> TryFrom<RawHistory<T>> for VersionHistory<T> {
    type Error = String;

    fn try_from(raw: RawHistory<T>) -> Result<Self, Self::Error> {
        let len = raw.versions.len();
        if len == 0 {
            return Err("version history has no versions".to_string());
        }
        if raw.current >= len {
            return Err(format!(
                "current version {} out of range for {} versions",
                raw.current, len
            ));
        }
        if raw.persisted > len {
            return Err(format!(
                "persisted count {} exceeds {} versions",
                raw.persisted, len
            ));
        }
        Ok(Self {
            versions: raw.versions,
            current: raw.current,
            persisted: raw.persisted,
        })
    }
}

impl<T: Versioned> VersionHistory<T> {
    /// Start a history whose first version is unsaved
    pub fn new(first: T) -> Self {
        Self {
            versions: vec![first],
            current: 0,
            persisted: 0,
        }
    }

    /// Rebuild a history from externally persisted versions.
    /// Returns `None` for an empty list.
    pub fn from_persisted(versions: Vec<T>) -> Option<Self> {
        if versions.is_empty() {
            return None;
        }
        let len = versions.len();
        Some(Self {
            versions,
            current: len - 1,
            persisted: len,
        })
    }

    /// Append a new version and make it current
    pub fn append(&mut self, version: T) -> String {
        let id = version.version_id().to_string();
        self.versions.push(version);
        self.current = self.versions.len() - 1;
        id
    }

    pub fn current(&self) -> &T {
        &self.versions[self.current]
    }

    /// Mutable access to the current version, only while it is unsaved
    pub fn current_mut(&mut self) -> Option<&mut T> {
        if self.current_is_unsaved() {
            self.versions.get_mut(self.current)
        } else {
            None
        }
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Point `current` at an existing version. Returns false if unknown.
    pub fn select(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(index) => {
                self.current = index;
                true
            }
            None => false,
        }
    }

    /// Pop the most recent unsaved version and make its predecessor current.
    ///
    /// The root version is never popped; an entity whose root is unsaved
    /// is discarded by its owner as a whole.
    pub fn rollback_last(&mut self) -> Option<T> {
        if self.versions.len() <= self.persisted.max(1) {
            return None;
        }
        let popped = self.versions.pop();
        self.current = self.versions.len() - 1;
        popped
    }

    /// Mark every version as persisted
    pub fn mark_persisted(&mut self) {
        self.persisted = self.versions.len();
    }

    pub fn persisted_len(&self) -> usize {
        self.persisted
    }

    pub fn has_unsaved(&self) -> bool {
        self.versions.len() > self.persisted
    }

    pub fn current_is_unsaved(&self) -> bool {
        self.current >= self.persisted
    }

    /// True when not even the root version has been persisted
    pub fn is_new(&self) -> bool {
        self.persisted == 0
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.versions.iter().find(|v| v.version_id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.versions.iter().position(|v| v.version_id() == id)
    }

    pub fn last(&self) -> &T {
        &self.versions[self.versions.len() - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.versions.iter()
    }

    /// Ids of versions appended since the last persist
    pub fn unsaved_ids(&self) -> Vec<String> {
        self.versions[self.persisted.min(self.versions.len())..]
            .iter()
            .map(|v| v.version_id().to_string())
            .collect()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
