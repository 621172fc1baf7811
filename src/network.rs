use std::fs::File;
use std::path::Path;

use itertools::Itertools;
use ndarray::prelude::*;

use super::error::{Result, SimError};
use super::station::Inventory;

/// Fixed geometry of the station network.  Built once from a distance matrix
/// and shared read-only by every simulation run.
#[derive(Debug, Clone)]
pub struct StationNetwork {
    distances: Array2<f64>,
    // for each station, all other stations in ascending order of distance
    rankings: Vec<Vec<usize>>,
}

impl StationNetwork {
    /// Validates the matrix (square, finite, nonnegative, zero diagonal,
    /// symmetric) and precomputes the per-station distance rankings.
    pub fn new(distances: Array2<f64>) -> Result<StationNetwork> {
        let (rows, cols) = distances.dim();
        if rows != cols {
            return Err(SimError::Validation(format!(
                "distance matrix must be square, got {}x{}", rows, cols)));
        }
        for ((ii, jj), &dist) in distances.indexed_iter() {
            if !dist.is_finite() || dist < 0. {
                return Err(SimError::Validation(format!(
                    "distance from {} to {} is {}", ii, jj, dist)));
            }
            if ii == jj && dist != 0. {
                return Err(SimError::Validation(format!(
                    "distance from station {} to itself is {}", ii, dist)));
            }
            let back = distances[[jj, ii]];
            if (dist - back).abs() > 1e-9 * dist.max(back).max(1.) {
                return Err(SimError::Validation(format!(
                    "distance matrix is not symmetric at ({}, {})", ii, jj)));
            }
        }

        let rankings = (0..rows)
            .map(|origin| {
                let row = distances.row(origin);
                // sorted_by is stable, so equidistant stations stay in id order
                (0..rows)
                    .filter(|&other| other != origin)
                    .sorted_by(|&aa, &bb| {
                        row[aa].partial_cmp(&row[bb]).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .collect()
            })
            .collect();

        Ok(StationNetwork{distances, rankings})
    }

    /// Reads a headerless csv of numbers, one matrix row per line.
    pub fn from_csv(csvpath: &Path) -> Result<StationNetwork> {
        let file = File::open(csvpath)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_reader(file);
        let mut values = vec![];
        let mut num_rows = 0;
        for result in reader.records() {
            let record = result?;
            for field in record.iter() {
                let value: f64 = field.parse().map_err(|_| SimError::Parse(format!(
                    "bad distance \"{}\" on row {}", field, num_rows)))?;
                values.push(value);
            }
            num_rows += 1;
        }
        if num_rows == 0 || values.len() != num_rows * num_rows {
            return Err(SimError::Validation(format!(
                "distance file has {} values over {} rows, which is not a square matrix",
                values.len(), num_rows)));
        }
        let distances = Array2::from_shape_vec((num_rows, num_rows), values)
            .map_err(|err| SimError::Validation(err.to_string()))?;
        log::debug!("loaded {}x{} distance matrix", num_rows, num_rows);
        StationNetwork::new(distances)
    }

    pub fn num_stations(&self) -> usize {
        self.rankings.len()
    }

    pub fn distance(&self, from: usize, to: usize) -> f64 {
        self.distances[[from, to]]
    }

    /// The other stations ordered by ascending distance from `origin`, ties by id.
    pub fn ranking(&self, origin: usize) -> &[usize] {
        &self.rankings[origin]
    }

    /// Finds the closest station other than `origin` that currently has a free dock.
    pub fn nearest_station_with_free_dock(&self, state: &Inventory, origin: usize)
                                          -> Result<usize> {
        if state.len() != self.num_stations() {
            return Err(SimError::Validation(format!(
                "inventory has {} stations but the network has {}",
                state.len(), self.num_stations())));
        }
        let ranking = self.rankings.get(origin).ok_or_else(|| SimError::Validation(format!(
            "unknown station {}", origin)))?;

        ranking
            .iter()
            .cloned()
            .find(|&id| state.station(id).map_or(false, |ss| ss.docks_available() > 0))
            .ok_or(SimError::CapacityExhausted { station: origin })
    }
}
