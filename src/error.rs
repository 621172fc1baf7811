use thiserror::Error;

/// Hard failures of the simulator.  Lost pickups and redirected drops are
/// not errors; they are tallied in the run outcome.
#[derive(Debug, Error)]
pub enum SimError {
    /// Inputs disagree with each other or are malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The rates of a demand group sum to zero, so no probability vector exists.
    #[error("degenerate demand: total rate is zero")]
    DegenerateDemand,

    /// A bike had to be redirected but no station in the network has a free dock.
    #[error("capacity exhausted: no free dock anywhere to redirect a bike from station {station}")]
    CapacityExhausted { station: usize },

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Yaml(#[from] yaml_rust::ScanError),
}

pub type Result<T> = std::result::Result<T, SimError>;
