use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use super::config_utils::{self, parse_field};
use super::error::{Result, SimError};
use super::station::{Inventory, StationInfo};

/// A group of stations that share one bike target.  Membership order is the
/// order in which leftover bikes are handed out.
#[derive(PartialEq, Debug, Clone)]
pub struct Cluster {
    pub id: usize,
    pub station_ids: Vec<usize>,
}

impl Cluster {
    pub fn new(id: usize, station_ids: Vec<usize>) -> Cluster {
        Cluster{id, station_ids}
    }

    /// Loads cluster membership from a csv with columns `cluster,station_id`.
    /// Cluster ids must be 0..m and the clusters must partition the `num_stations` stations.
    pub fn all_from_csv(csvpath: &Path, num_stations: usize) -> Result<Vec<Cluster>> {
        let rows = config_utils::read_csv_rows(csvpath)?;
        let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for row in &rows {
            let cluster_id: usize = parse_field(row, "cluster")?;
            let station_id: usize = parse_field(row, "station_id")?;
            members.entry(cluster_id).or_insert(vec![]).push(station_id);
        }

        let mut clusters = vec![];
        for (expected_id, (cluster_id, station_ids)) in members.into_iter().enumerate() {
            if cluster_id != expected_id {
                return Err(SimError::Validation(format!(
                    "cluster ids must be contiguous from 0, but {} is missing", expected_id)));
            }
            clusters.push(Cluster::new(cluster_id, station_ids));
        }
        check_partition(&clusters, num_stations)?;
        log::debug!("loaded {} clusters", clusters.len());
        Ok(clusters)
    }
}

/// Checks that every station id is in range and belongs to exactly one cluster.
pub fn check_partition(clusters: &[Cluster], num_stations: usize) -> Result<()> {
    let mut owner: Vec<Option<usize>> = vec![None; num_stations];
    for cluster in clusters {
        for &station_id in &cluster.station_ids {
            let slot = owner.get_mut(station_id).ok_or_else(|| SimError::Validation(format!(
                "cluster {} references unknown station {}", cluster.id, station_id)))?;
            if let Some(other) = slot {
                return Err(SimError::Validation(format!(
                    "station {} is in both cluster {} and cluster {}",
                    station_id, other, cluster.id)));
            }
            *slot = Some(cluster.id);
        }
    }
    if let Some(orphan) = owner.iter().position(|oo| oo.is_none()) {
        return Err(SimError::Validation(format!("station {} is in no cluster", orphan)));
    }
    Ok(())
}

/// Spreads each cluster's bike target over its stations as evenly as the
/// dock capacities allow.
///
/// Every pass hands each station that still has free docks an equal share of
/// what remains.  Stations that cannot take their share are filled up, and
/// what they could not absorb goes back into the pool along with the
/// remainder of the division.  Once fewer bikes remain than open stations,
/// the first ones in membership order get one bike each.  A cluster whose
/// capacity is below its target ends up completely full and the excess is
/// left unplaced.
pub fn allocate_inventory(targets: &[u32], clusters: &[Cluster], infos: &[StationInfo])
                          -> Result<Inventory> {
    if targets.len() != clusters.len() {
        return Err(SimError::Validation(format!(
            "{} cluster targets given for {} clusters", targets.len(), clusters.len())));
    }
    check_partition(clusters, infos.len())?;

    let mut inventory = Inventory::empty_from_info(infos);
    for (cluster, &target) in clusters.iter().zip(targets) {
        let unplaced = fill_cluster(&mut inventory, cluster, target);
        if unplaced > 0 {
            log::warn!("cluster {} is saturated; {} of its {} bikes were not placed",
                       cluster.id, unplaced, target);
        }
    }
    log::debug!("allocated {} bikes over {} stations", inventory.total_bikes(), inventory.len());
    Ok(inventory)
}

/// Returns the number of bikes that did not fit.
fn fill_cluster(inventory: &mut Inventory, cluster: &Cluster, target: u32) -> u32 {
    let mut active: Vec<usize> = cluster.station_ids
        .iter()
        .cloned()
        .filter(|&id| has_free_docks(inventory, id))
        .collect();
    let mut remaining = target;

    while remaining > 0 && !active.is_empty() {
        let num_active = active.len() as u32;
        if remaining < num_active {
            for &id in active.iter().take(remaining as usize) {
                if let Some(station) = inventory.station_mut(id) {
                    station.stock(1);
                }
            }
            remaining = 0;
            break;
        }

        let share = remaining / num_active;
        let mut shortfall = 0;
        for &id in &active {
            if let Some(station) = inventory.station_mut(id) {
                shortfall += share - station.stock(share);
            }
        }
        remaining = remaining % num_active + shortfall;
        active.retain(|&id| has_free_docks(inventory, id));
    }
    remaining
}

fn has_free_docks(inventory: &Inventory, id: usize) -> bool {
    inventory.station(id).map_or(false, |ss| ss.docks_available() > 0)
}

/// Writes one csv row per station describing the allocation: docks, bikes, id,
/// total docks, bike ratio and coordinates.
pub fn write_configuration_report<W: io::Write>(writer: W, inventory: &Inventory,
                                                infos: &[StationInfo]) -> Result<()> {
    if infos.len() != inventory.len() {
        return Err(SimError::Validation(format!(
            "report has {} station records for {} stations", infos.len(), inventory.len())));
    }
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(&["docks", "bikes", "id", "total", "ratio", "latitude", "longitude"])?;
    for (station, info) in inventory.stations().iter().zip(infos) {
        let ratio = if station.capacity() == 0 {
            0.
        } else {
            station.bikes_available() as f64 / station.capacity() as f64
        };
        writer.write_record(&[
            station.docks_available().to_string(),
            station.bikes_available().to_string(),
            station.id().to_string(),
            station.capacity().to_string(),
            format!("{:.4}", ratio),
            info.pos.latitude.to_string(),
            info.pos.longitude.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_configuration_report_to_path(path: &Path, inventory: &Inventory,
                                          infos: &[StationInfo]) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_configuration_report(file, inventory, infos)?;
    log::info!("wrote initial configuration report to {}", path.display());
    Ok(())
}
