use std::cmp::Ordering;

use priority_queue::PriorityQueue;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use rand_isaac::Isaac64Rng;
use rayon::prelude::*;

use super::allocator::{self, Cluster};
use super::arrivals::{self, PickupEvent};
use super::config::SimConfig;
use super::demand::{DayDemand, DemandHistory};
use super::error::{Result, SimError};
use super::network::StationNetwork;
use super::station::{Inventory, StationInfo};

/// A bike in transit, due at `station` at `drop_time`.
#[derive(Debug, Clone)]
struct DropEvent {
    drop_time: f64,
    station: usize,
    // scheduling order, to break ties between equal drop times
    seq: u64,
}

impl Ord for DropEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // reverse the ordering so the earliest drop is at the top of the max-queue
        if self.drop_time < other.drop_time {
            return Ordering::Greater;
        }
        else if self.drop_time > other.drop_time {
            return Ordering::Less;
        }
        else {
            return other.seq.cmp(&self.seq);
        }
    }
}

// Implementing Ord requires all of the below traits
impl PartialOrd for DropEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        return Some(self.cmp(other));
    }
}

impl PartialEq for DropEvent {
    fn eq(&self, other: &Self) -> bool {
        return self.cmp(other) == Ordering::Equal;
    }
}

impl Eq for DropEvent{}

/// What happened during one run.  Lost pickups and redirected drops together
/// are the negatively affected trips.
#[derive(Debug, Clone)]
pub struct SimOutcome {
    /// The historical day whose demand was replayed, if the run chose one.
    pub day_index: Option<usize>,
    pub pickups: u64,
    pub trips_started: u64,
    pub lost_pickups: u64,
    pub redirected_drops: u64,
    pub completed_drops: u64,
    /// Bikes still riding when the horizon closed without being docked.
    pub in_transit_at_end: u64,
    pub final_inventory: Inventory,
}

impl SimOutcome {
    pub fn negatively_affected_trips(&self) -> u64 {
        self.lost_pickups + self.redirected_drops
    }

    /// The failure count negated, so that larger is better.
    pub fn objective(&self) -> i64 {
        -(self.negatively_affected_trips() as i64)
    }
}

#[derive(Debug, Default)]
struct Tally {
    trips_started: u64,
    lost_pickups: u64,
    redirected_drops: u64,
    completed_drops: u64,
}

/// Replays pickup events against a station inventory, dispatching bikes and
/// docking them again when their trips end.
pub struct EventSimulator<'a> {
    network: &'a StationNetwork,
    resolve_in_transit_at_end: bool,
}

impl<'a> EventSimulator<'a> {
    pub fn new(network: &'a StationNetwork) -> EventSimulator<'a> {
        EventSimulator {
            network,
            resolve_in_transit_at_end: false,
        }
    }

    /// If set, bikes still in transit after the last pickup are docked (or
    /// redirected and counted) before the run ends.  Otherwise they are left
    /// out of the accounting.
    pub fn resolve_in_transit_at_end(mut self, resolve: bool) -> EventSimulator<'a> {
        self.resolve_in_transit_at_end = resolve;
        self
    }

    /// Runs the event loop.  `pickups` must be sorted by time; `trip_duration`
    /// gives the riding time in hours of each pickup that finds a bike.
    pub fn replay<F>(&self, mut inventory: Inventory, pickups: &[PickupEvent],
                     mut trip_duration: F) -> Result<SimOutcome>
        where F: FnMut(&PickupEvent) -> Result<f64>
    {
        self.check_inputs(&inventory, pickups)?;

        let fleet = inventory.total_bikes();
        let mut pending = PriorityQueue::new();
        let mut next_seq = 0;
        let mut tally = Tally::default();

        for pickup in pickups {
            self.drain_drops(&mut inventory, &mut pending, Some(pickup.time), fleet, &mut tally)?;

            let took_bike = match inventory.station_mut(pickup.origin) {
                Some(station) => station.take_bike(),
                None => false,
            };
            if !took_bike {
                tally.lost_pickups += 1;
                continue;
            }
            tally.trips_started += 1;

            let duration = trip_duration(pickup)?;
            if !(duration.is_finite() && duration >= 0.) {
                return Err(SimError::Validation(format!(
                    "trip from {} to {} got duration {}", pickup.origin, pickup.dest, duration)));
            }
            let drop = DropEvent {
                drop_time: pickup.time + duration,
                station: pickup.dest,
                seq: next_seq,
            };
            pending.push(next_seq, drop);
            next_seq += 1;

            debug_assert_eq!(inventory.total_bikes() + pending.len() as u64, fleet);
        }

        if self.resolve_in_transit_at_end {
            self.drain_drops(&mut inventory, &mut pending, None, fleet, &mut tally)?;
        }

        let outcome = SimOutcome {
            day_index: None,
            pickups: pickups.len() as u64,
            trips_started: tally.trips_started,
            lost_pickups: tally.lost_pickups,
            redirected_drops: tally.redirected_drops,
            completed_drops: tally.completed_drops,
            in_transit_at_end: pending.len() as u64,
            final_inventory: inventory,
        };
        log::info!("{} pickups: {} lost, {} drops redirected, {} bikes in transit at the end",
                   outcome.pickups, outcome.lost_pickups, outcome.redirected_drops,
                   outcome.in_transit_at_end);
        Ok(outcome)
    }

    fn check_inputs(&self, inventory: &Inventory, pickups: &[PickupEvent]) -> Result<()> {
        let num_stations = self.network.num_stations();
        if inventory.len() != num_stations {
            return Err(SimError::Validation(format!(
                "inventory has {} stations but the network has {}", inventory.len(), num_stations)));
        }
        for pickup in pickups {
            if pickup.origin >= num_stations || pickup.dest >= num_stations {
                return Err(SimError::Validation(format!(
                    "pickup from {} to {} references an unknown station", pickup.origin, pickup.dest)));
            }
        }
        if let Some(bad) = pickups.iter().find(|pp| !pp.time.is_finite()) {
            return Err(SimError::Validation(format!(
                "pickup from {} to {} has time {}", bad.origin, bad.dest, bad.time)));
        }
        if pickups.windows(2).any(|ww| ww[0].time > ww[1].time) {
            return Err(SimError::Validation(String::from("pickups are not sorted by time")));
        }
        Ok(())
    }

    /// Docks every pending bike due by `until`, or every pending bike if `until` is None.
    fn drain_drops(&self, inventory: &mut Inventory, pending: &mut PriorityQueue<u64, DropEvent>,
                   until: Option<f64>, fleet: u64, tally: &mut Tally) -> Result<()> {
        loop {
            let due = match pending.peek() {
                Some((_, drop)) => until.map_or(true, |now| drop.drop_time <= now),
                None => false,
            };
            if !due {
                return Ok(());
            }
            if let Some((_, drop)) = pending.pop() {
                self.dock(inventory, &drop, tally)?;
            }
            debug_assert_eq!(inventory.total_bikes() + pending.len() as u64, fleet);
            debug_assert!(inventory.stations().iter().all(
                |ss| ss.bikes_available() + ss.docks_available() == ss.capacity()));
        }
    }

    fn dock(&self, inventory: &mut Inventory, drop: &DropEvent, tally: &mut Tally)
            -> Result<()> {
        let docked = match inventory.station_mut(drop.station) {
            Some(station) => station.return_bike(),
            None => false,
        };
        if docked {
            tally.completed_drops += 1;
            return Ok(());
        }

        // the station is full, so the rider takes the bike to the closest open dock
        tally.redirected_drops += 1;
        let alternate = self.network.nearest_station_with_free_dock(inventory, drop.station)?;
        log::debug!("station {} full at {:.3}h, bike redirected to {}",
                    drop.station, drop.drop_time, alternate);
        match inventory.station_mut(alternate).map(|station| station.return_bike()) {
            Some(true) => Ok(()),
            _ => Err(SimError::CapacityExhausted { station: drop.station }),
        }
    }
}

/// Parameters of one simulated horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct SimParams {
    /// Length of the horizon in hours.
    pub horizon_hours: f64,
    /// Total number of trips requested over the horizon.
    pub observed_count: u64,
    /// Historical day to replay; chosen at random from the count if None.
    pub day_index: Option<usize>,
    pub resolve_in_transit_at_end: bool,
}

/// Holds the network and demand data and runs complete simulations: allocate
/// the fleet, pick a day, generate demand, replay it.
pub struct BikeShareSimulator {
    network: StationNetwork,
    stations: Vec<StationInfo>,
    clusters: Vec<Cluster>,
    demand: DemandHistory,
    params: SimParams,
}

impl BikeShareSimulator {
    pub fn new(network: StationNetwork, stations: Vec<StationInfo>, clusters: Vec<Cluster>,
               demand: DemandHistory, params: SimParams) -> Result<BikeShareSimulator> {
        if stations.len() != network.num_stations() {
            return Err(SimError::Validation(format!(
                "{} stations listed but the distance matrix covers {}",
                stations.len(), network.num_stations())));
        }
        allocator::check_partition(&clusters, stations.len())?;
        if let Some(day) = params.day_index {
            demand.day(day)?;
        }
        if !(params.horizon_hours.is_finite() && params.horizon_hours >= 0.) {
            return Err(SimError::Validation(format!(
                "horizon {} must be finite and nonnegative", params.horizon_hours)));
        }
        Ok(BikeShareSimulator{network, stations, clusters, demand, params})
    }

    /// Loads every input named by the config.
    pub fn from_config(cfg: &SimConfig) -> Result<BikeShareSimulator> {
        let network = StationNetwork::from_csv(&cfg.distance_matrix_path)?;
        let stations = StationInfo::all_from_csv(&cfg.stations_path)?;
        let clusters = Cluster::all_from_csv(&cfg.clusters_path, stations.len())?;
        let demand = DemandHistory::from_csv(&cfg.demand_path, &cfg.day_means_path,
                                             stations.len())?;
        if let Some(n_days) = cfg.n_days {
            if n_days != demand.num_days() {
                return Err(SimError::Validation(format!(
                    "config says {} days but the demand data has {}", n_days, demand.num_days())));
            }
        }
        if cfg.cluster_targets.len() != clusters.len() {
            return Err(SimError::Validation(format!(
                "{} cluster targets for {} clusters", cfg.cluster_targets.len(), clusters.len())));
        }
        log::info!("loaded {} stations in {} clusters with {} days of demand",
                   stations.len(), clusters.len(), demand.num_days());
        BikeShareSimulator::new(network, stations, clusters, demand, cfg.sim_params())
    }

    pub fn network(&self) -> &StationNetwork {
        &self.network
    }

    pub fn stations(&self) -> &[StationInfo] {
        &self.stations
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    /// The starting inventory for the given per-cluster bike targets.
    pub fn initial_inventory(&self, targets: &[u32]) -> Result<Inventory> {
        allocator::allocate_inventory(targets, &self.clusters, &self.stations)
    }

    /// Runs one full simulation with the given per-cluster targets.
    pub fn run<R: Rng>(&self, targets: &[u32], rng: &mut R) -> Result<SimOutcome> {
        let inventory = self.initial_inventory(targets)?;

        let day_index = match self.params.day_index {
            Some(day) => day,
            None => self.demand.select_day(self.params.observed_count, rng)?,
        };
        log::info!("replaying demand of day {}", day_index);
        let day = self.demand.day(day_index)?;

        let pickups = arrivals::generate_pickups(self.params.horizon_hours,
                                                 &[(self.params.observed_count, day)], rng)?;
        log::debug!("generated {} pickups", pickups.len());

        let simulator = EventSimulator::new(&self.network)
            .resolve_in_transit_at_end(self.params.resolve_in_transit_at_end);
        let mut outcome = simulator.replay(inventory, &pickups,
                                           |pickup| sample_trip_duration(day, pickup, rng))?;
        outcome.day_index = Some(day_index);
        Ok(outcome)
    }

    /// The number of negatively affected trips, negated.
    pub fn negatively_affected_trips<R: Rng>(&self, targets: &[u32], rng: &mut R) -> Result<i64> {
        Ok(self.run(targets, rng)?.objective())
    }

    /// Runs one independent replication per seed in parallel.  Results are in seed order.
    pub fn run_replications(&self, targets: &[u32], seeds: &[u64]) -> Result<Vec<SimOutcome>> {
        seeds
            .par_iter()
            .map(|&seed| {
                let mut rng = Isaac64Rng::seed_from_u64(seed);
                self.run(targets, &mut rng)
            })
            .collect()
    }
}

/// Draws a riding time in hours from an exponential distribution whose mean is
/// the pair's historical mean duration in minutes.
pub fn sample_trip_duration<R: Rng>(day: &DayDemand, pickup: &PickupEvent, rng: &mut R)
                                    -> Result<f64> {
    let mean_min = day.mean_duration_min(pickup.origin, pickup.dest).ok_or_else(|| {
        SimError::Validation(format!("no mean duration for pair ({}, {})",
                                     pickup.origin, pickup.dest))
    })?;
    if mean_min == 0. {
        return Ok(0.);
    }
    let exp = Exp::new(1. / mean_min)
        .map_err(|err| SimError::Validation(format!("bad mean duration {}: {}", mean_min, err)))?;
    Ok(exp.sample(rng) / 60.)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use super::super::test_utils::{day_demand, line_network};

    fn pickup(time: f64, origin: usize, dest: usize) -> PickupEvent {
        PickupEvent{time, origin, dest}
    }

    fn bikes(inventory: &Inventory) -> Vec<u32> {
        inventory.stations().iter().map(|ss| ss.bikes_available()).collect()
    }

    #[test]
    fn test_single_trip_is_docked() {
        let network = line_network(2);
        let inventory = Inventory::from_counts(&[(1, 1), (1, 0)]).unwrap();
        let outcome = EventSimulator::new(&network)
            .resolve_in_transit_at_end(true)
            .replay(inventory, &[pickup(0., 0, 1)], |_| Ok(0.1))
            .unwrap();
        let dest = outcome.final_inventory.station(1).unwrap();
        assert_eq!((dest.bikes_available(), dest.docks_available()), (1, 0));
        assert_eq!(outcome.objective(), 0);
        assert_eq!(outcome.completed_drops, 1);
    }

    #[test]
    fn test_empty_station_loses_pickup() {
        let network = line_network(1);
        let inventory = Inventory::from_counts(&[(3, 0)]).unwrap();
        let before = inventory.clone();
        let outcome = EventSimulator::new(&network)
            .replay(inventory, &[pickup(0.5, 0, 0)], |_| Ok(0.1))
            .unwrap();
        assert_eq!(outcome.lost_pickups, 1);
        assert_eq!(outcome.objective(), -1);
        assert_eq!(outcome.final_inventory, before);
    }

    #[test]
    fn test_full_destination_redirects_to_nearest() {
        // stations on a line at 0, 1, 2, 3; station 2 is full and its neighbours 1 and 3
        // are equally close, so the lower id gets the bike
        let network = line_network(4);
        let inventory = Inventory::from_counts(&[(2, 1), (2, 0), (1, 1), (2, 0)]).unwrap();
        let pickups = [pickup(0., 0, 2), pickup(1., 0, 0)];
        let outcome = EventSimulator::new(&network)
            .replay(inventory, &pickups, |_| Ok(0.5))
            .unwrap();
        assert_eq!(outcome.redirected_drops, 1);
        // the second pickup finds station 0 empty
        assert_eq!(outcome.lost_pickups, 1);
        assert_eq!(outcome.objective(), -2);
        let state = &outcome.final_inventory;
        assert_eq!(bikes(state), vec![0, 1, 1, 0]);
        assert_eq!(state.station(2).unwrap().docks_available(), 0);
    }

    #[test]
    fn test_redirect_prefers_closer_station() {
        let dists = array![
            [0., 5., 9., 2.],
            [5., 0., 4., 3.],
            [9., 4., 0., 1.],
            [2., 3., 1., 0.],
        ];
        let network = StationNetwork::new(dists).unwrap();
        // drop targets station 2 (full); station 3 at distance 1 has room
        let inventory = Inventory::from_counts(&[(1, 1), (1, 0), (1, 1), (1, 0)]).unwrap();
        let outcome = EventSimulator::new(&network)
            .resolve_in_transit_at_end(true)
            .replay(inventory, &[pickup(0., 0, 2)], |_| Ok(0.2))
            .unwrap();
        assert_eq!(outcome.redirected_drops, 1);
        assert_eq!(bikes(&outcome.final_inventory), vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_drop_due_at_pickup_time_is_docked_first() {
        let network = line_network(2);
        let inventory = Inventory::from_counts(&[(1, 1), (1, 0)]).unwrap();
        // the bike arrives at station 1 exactly when the second rider wants it
        let pickups = [pickup(0., 0, 1), pickup(1., 1, 0)];
        let outcome = EventSimulator::new(&network)
            .replay(inventory, &pickups, |_| Ok(1.))
            .unwrap();
        assert_eq!(outcome.lost_pickups, 0);
        assert_eq!(outcome.trips_started, 2);
    }

    #[test]
    fn test_in_transit_bikes_left_out_by_default() {
        let network = line_network(2);
        let inventory = Inventory::from_counts(&[(1, 1), (1, 1)]).unwrap();
        // the bike from 0 is due at full station 1 only after the last pickup
        let outcome = EventSimulator::new(&network)
            .replay(inventory.clone(), &[pickup(0., 0, 1)], |_| Ok(5.))
            .unwrap();
        assert_eq!(outcome.in_transit_at_end, 1);
        assert_eq!(outcome.objective(), 0);
        assert_eq!(bikes(&outcome.final_inventory), vec![0, 1]);

        let drained = EventSimulator::new(&network)
            .resolve_in_transit_at_end(true)
            .replay(inventory, &[pickup(0., 0, 1)], |_| Ok(5.))
            .unwrap();
        assert_eq!(drained.in_transit_at_end, 0);
        assert_eq!(drained.redirected_drops, 1);
        assert_eq!(bikes(&drained.final_inventory), vec![1, 1]);
    }

    #[test]
    fn test_drops_processed_in_time_order() {
        let network = line_network(3);
        // station 2 has a single free dock; the shorter trip must take it
        let inventory = Inventory::from_counts(&[(2, 2), (2, 0), (1, 0)]).unwrap();
        let pickups = [pickup(0., 0, 2), pickup(0.1, 0, 2), pickup(10., 1, 1)];
        let durations = vec![3., 1., 1.];
        let mut calls = 0;
        let outcome = EventSimulator::new(&network)
            .replay(inventory, &pickups, |_| {
                let dd = durations[calls];
                calls += 1;
                Ok(dd)
            })
            .unwrap();
        assert_eq!(outcome.redirected_drops, 1);
        assert_eq!(outcome.completed_drops, 1);
        // station 1 received the redirected bike and then lent it out at t=10
        assert_eq!(outcome.lost_pickups, 0);
        assert_eq!(outcome.in_transit_at_end, 1);
    }

    #[test]
    fn test_fleet_is_conserved() {
        let network = line_network(5);
        let inventory = Inventory::from_counts(&[(3, 2), (2, 2), (4, 1), (2, 0), (3, 3)]).unwrap();
        let fleet = inventory.total_bikes();
        let demand = day_demand(&[(0, 3, 1.), (1, 2, 2.), (4, 0, 1.), (2, 4, 3.), (3, 1, 1.)], 20.);
        let mut rng = Isaac64Rng::seed_from_u64(17);
        let pickups = arrivals::generate_pickups(3., &[(60, &demand)], &mut rng).unwrap();
        let outcome = EventSimulator::new(&network)
            .replay(inventory, &pickups, |pp| sample_trip_duration(&demand, pp, &mut rng))
            .unwrap();
        assert_eq!(outcome.final_inventory.total_bikes() + outcome.in_transit_at_end, fleet);
        assert_eq!(outcome.trips_started + outcome.lost_pickups, 60);
        assert_eq!(outcome.completed_drops + outcome.redirected_drops + outcome.in_transit_at_end,
                   outcome.trips_started);
        for station in outcome.final_inventory.stations() {
            assert_eq!(station.bikes_available() + station.docks_available(), station.capacity());
        }
    }

    #[test]
    fn test_bad_inputs_rejected() {
        let network = line_network(2);
        let inventory = Inventory::from_counts(&[(1, 1), (1, 0)]).unwrap();
        let sim = EventSimulator::new(&network);
        assert!(sim.replay(inventory.clone(), &[pickup(0., 0, 7)], |_| Ok(1.)).is_err());
        assert!(sim.replay(inventory.clone(), &[pickup(2., 0, 1), pickup(1., 1, 0)],
                           |_| Ok(1.)).is_err());
        assert!(sim.replay(inventory.clone(), &[pickup(0., 0, 1)], |_| Ok(-1.)).is_err());
        let wrong_size = Inventory::from_counts(&[(1, 1)]).unwrap();
        assert!(sim.replay(wrong_size, &[], |_| Ok(1.)).is_err());
    }

    #[test]
    fn test_redirected_bike_can_be_lent_again() {
        let network = line_network(3);
        // station 1 is full; stations 0 and 2 are equally close and both have a
        // free dock by then, so the bike goes back to 0 and is lent out again
        let inventory = Inventory::from_counts(&[(1, 1), (1, 1), (1, 0)]).unwrap();
        let pickups = [pickup(0., 0, 1), pickup(1., 0, 2)];
        let outcome = EventSimulator::new(&network)
            .resolve_in_transit_at_end(true)
            .replay(inventory, &pickups, |_| Ok(0.5))
            .unwrap();
        assert_eq!(outcome.redirected_drops, 1);
        assert_eq!(outcome.lost_pickups, 0);
        assert_eq!(outcome.completed_drops, 1);
        assert_eq!(bikes(&outcome.final_inventory), vec![0, 1, 1]);
    }

    #[test]
    fn test_non_finite_pickup_times_rejected() {
        let network = line_network(2);
        let inventory = Inventory::from_counts(&[(2, 2), (2, 0)]).unwrap();
        let sim = EventSimulator::new(&network);
        let pickups = [pickup(0., 0, 1), pickup(f64::NAN, 0, 1), pickup(5., 0, 1)];
        assert!(matches!(sim.replay(inventory.clone(), &pickups, |_| Ok(1.)),
                         Err(SimError::Validation(_))));
        let pickups = [pickup(0., 0, 1), pickup(f64::INFINITY, 0, 1)];
        assert!(sim.replay(inventory, &pickups, |_| Ok(1.)).is_err());
    }

    #[test]
    fn test_crowded_network_keeps_fleet() {
        // small docks and long trips force many redirects in the final drain
        let network = line_network(4);
        let inventory = Inventory::from_counts(&[(2, 2), (1, 1), (2, 1), (1, 0)]).unwrap();
        let demand = day_demand(&[(0, 1, 2.), (2, 1, 2.), (1, 3, 1.), (3, 1, 1.)], 90.);
        for seed in 0..10 {
            let mut rng = Isaac64Rng::seed_from_u64(seed);
            let pickups = arrivals::generate_pickups(2., &[(30, &demand)], &mut rng).unwrap();
            let outcome = EventSimulator::new(&network)
                .resolve_in_transit_at_end(true)
                .replay(inventory.clone(), &pickups,
                        |pp| sample_trip_duration(&demand, pp, &mut rng))
                .unwrap();
            assert_eq!(outcome.in_transit_at_end, 0);
            assert_eq!(outcome.final_inventory.total_bikes(), 4);
            assert_eq!(outcome.completed_drops + outcome.redirected_drops, outcome.trips_started);
        }
    }

    #[test]
    fn test_trip_durations_in_hours() {
        let demand = day_demand(&[(0, 1, 1.)], 30.);
        let mut rng = Isaac64Rng::seed_from_u64(2);
        let trip = pickup(0., 0, 1);
        let num = 20_000;
        let mean: f64 = (0..num)
            .map(|_| sample_trip_duration(&demand, &trip, &mut rng).unwrap())
            .sum::<f64>() / num as f64;
        assert_relative_eq!(mean, 0.5, max_relative = 0.05);
        assert!(sample_trip_duration(&demand, &pickup(0., 1, 0), &mut rng).is_err());
        let instant = day_demand(&[(0, 1, 1.)], 0.);
        assert_eq!(sample_trip_duration(&instant, &trip, &mut rng).unwrap(), 0.);
    }
}
