use std::path::Path;

use super::config_utils::{self, parse_field};
use super::error::{Result, SimError};

#[derive(PartialEq, Debug, Clone)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> GeoPoint {
        GeoPoint{latitude, longitude}
    }
}

/// Static description of a bike station.
#[derive(PartialEq, Debug, Clone)]
pub struct StationInfo {
    pub id: usize,
    pub capacity: u32,
    pub pos: GeoPoint,
}

impl StationInfo {
    pub fn new(id: usize, capacity: u32, pos: GeoPoint) -> StationInfo {
        StationInfo{id, capacity, pos}
    }

    /// Loads the station table from a csv with columns `id,capacity,latitude,longitude`.
    /// Ids must cover exactly 0..n; the result is ordered by id.
    pub fn all_from_csv(csvpath: &Path) -> Result<Vec<StationInfo>> {
        let rows = config_utils::read_csv_rows(csvpath)?;
        let mut slots: Vec<Option<StationInfo>> = vec![None; rows.len()];
        for row in &rows {
            let id: usize = parse_field(row, "id")?;
            if id >= slots.len() {
                return Err(SimError::Validation(format!(
                    "station id {} out of range for {} stations", id, slots.len())));
            }
            if slots[id].is_some() {
                return Err(SimError::Validation(format!("station id {} listed twice", id)));
            }
            let pos = GeoPoint::new(parse_field(row, "latitude")?, parse_field(row, "longitude")?);
            slots[id] = Some(StationInfo::new(id, parse_field(row, "capacity")?, pos));
        }
        // n rows, ids in 0..n, no duplicates: every slot is filled.
        Ok(slots.into_iter().flatten().collect())
    }
}

/// Mutable dock/bike counts of one station.  Only the bike count is stored,
/// so docks + bikes == capacity always holds.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Station {
    id: usize,
    capacity: u32,
    bikes: u32,
}

impl Station {
    pub fn empty(id: usize, capacity: u32) -> Station {
        Station{id, capacity, bikes: 0}
    }

    pub fn with_bikes(id: usize, capacity: u32, bikes: u32) -> Result<Station> {
        if bikes > capacity {
            return Err(SimError::Validation(format!(
                "station {} cannot hold {} bikes in {} docks", id, bikes, capacity)));
        }
        Ok(Station{id, capacity, bikes})
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn bikes_available(&self) -> u32 {
        self.bikes
    }

    pub fn docks_available(&self) -> u32 {
        self.capacity - self.bikes
    }

    /// Removes one bike.  Returns false, leaving the station unchanged, if it has none.
    pub fn take_bike(&mut self) -> bool {
        if self.bikes == 0 {
            return false;
        }
        self.bikes -= 1;
        true
    }

    /// Docks one bike.  Returns false, leaving the station unchanged, if it is full.
    pub fn return_bike(&mut self) -> bool {
        if self.bikes == self.capacity {
            return false;
        }
        self.bikes += 1;
        true
    }

    /// Adds up to `count` bikes, limited by free docks.  Returns how many were placed.
    pub fn stock(&mut self, count: u32) -> u32 {
        let placed = count.min(self.docks_available());
        self.bikes += placed;
        placed
    }
}

/// The dock/bike state of every station in the network, indexed by station id.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Inventory {
    stations: Vec<Station>,
}

impl Inventory {
    /// Builds an inventory from stations whose ids must equal their positions.
    pub fn new(stations: Vec<Station>) -> Result<Inventory> {
        for (ii, station) in stations.iter().enumerate() {
            if station.id != ii {
                return Err(SimError::Validation(format!(
                    "station at position {} has id {}", ii, station.id)));
            }
        }
        Ok(Inventory{stations})
    }

    /// All stations empty, with the capacities from the station table.
    pub fn empty_from_info(infos: &[StationInfo]) -> Inventory {
        let stations = infos.iter().map(|info| Station::empty(info.id, info.capacity)).collect();
        Inventory{stations}
    }

    /// Builds an inventory from (capacity, bikes) pairs, ids assigned by position.
    pub fn from_counts(counts: &[(u32, u32)]) -> Result<Inventory> {
        let stations = counts
            .iter()
            .enumerate()
            .map(|(id, &(capacity, bikes))| Station::with_bikes(id, capacity, bikes))
            .collect::<Result<Vec<Station>>>()?;
        Ok(Inventory{stations})
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn station(&self, id: usize) -> Option<&Station> {
        self.stations.get(id)
    }

    pub fn station_mut(&mut self, id: usize) -> Option<&mut Station> {
        self.stations.get_mut(id)
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn total_bikes(&self) -> u64 {
        self.stations.iter().map(|ss| ss.bikes as u64).sum()
    }

    pub fn total_capacity(&self) -> u64 {
        self.stations.iter().map(|ss| ss.capacity as u64).sum()
    }

    /// Whether any station in the network has a free dock.
    pub fn has_free_dock(&self) -> bool {
        self.stations.iter().any(|ss| ss.docks_available() > 0)
    }
}
