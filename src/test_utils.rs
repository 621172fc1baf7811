use ndarray::Array2;

use super::demand::{DayDemand, PairDemand};
use super::network::StationNetwork;
use super::station::{GeoPoint, StationInfo};

/// Station records with the given capacities, ids in order.
pub fn station_infos(capacities: &[u32]) -> Vec<StationInfo> {
    capacities
        .iter()
        .enumerate()
        .map(|(id, &cap)| StationInfo::new(id, cap, GeoPoint::new(40.7 + id as f64 * 0.01, -74.)))
        .collect()
}

/// `num` stations spaced one unit apart along a line.
pub fn line_network(num: usize) -> StationNetwork {
    let dists = Array2::from_shape_fn((num, num), |(ii, jj)| (ii as f64 - jj as f64).abs());
    StationNetwork::new(dists).unwrap()
}

/// One day of demand from (origin, dest, rate) triples, all with the same mean duration.
pub fn day_demand(pairs: &[(usize, usize, f64)], mean_duration_min: f64) -> DayDemand {
    let num_stations = pairs.iter().map(|&(oo, dd, _)| oo.max(dd) + 1).max().unwrap_or(0);
    let mut demand = DayDemand::new();
    for &(origin, dest, rate) in pairs {
        demand.insert(origin, dest, PairDemand{rate, mean_duration_min}, num_stations).unwrap();
    }
    demand
}
