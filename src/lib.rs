// imports of other modules from this crate
mod error;
pub use error::{Result, SimError};

mod config_utils;

mod config;
pub use config::SimConfig;

mod station;
pub use station::{GeoPoint, Inventory, Station, StationInfo};

mod network;
pub use network::StationNetwork;

mod allocator;
pub use allocator::{allocate_inventory, check_partition, write_configuration_report,
                    write_configuration_report_to_path, Cluster};

mod demand;
pub use demand::{poisson_log_pmf, DayDemand, DemandHistory, PairDemand};

mod arrivals;
pub use arrivals::{generate_arrivals, generate_pickups, ArrivalSchedule, PairArrivals, PickupEvent};

mod simulator;
pub use simulator::{sample_trip_duration, BikeShareSimulator, EventSimulator, SimOutcome,
                    SimParams};

#[cfg(test)]
mod test_utils;
