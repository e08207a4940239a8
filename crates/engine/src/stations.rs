//! Station geometry provider
//!
//! Geometry comes from an external station service; the engine only reads it.

use analyst_core::Station;
use std::collections::BTreeMap;

pub trait StationDirectory: Send + Sync {
    fn station(&self, station_id: &str) -> Option<Station>;

    /// Every known station, used as receivers for feature prediction
    fn stations(&self) -> Vec<Station>;
}

/// Fixed station list held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryStationDirectory {
    stations: BTreeMap<String, Station>,
}

impl InMemoryStationDirectory {
    pub fn new(stations: impl IntoIterator<Item = Station>) -> Self {
        Self {
            stations: stations.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    pub fn with_station(mut self, station: Station) -> Self {
        self.stations.insert(station.id.clone(), station);
        self
    }
}

impl StationDirectory for InMemoryStationDirectory {
    fn station(&self, station_id: &str) -> Option<Station> {
        self.stations.get(station_id).cloned()
    }

    fn stations(&self) -> Vec<Station> {
        self.stations.values().cloned().collect()
    }
}
