use std::error::Error;

use bikeshare_sim::{BikeShareSimulator, SimConfig};
use env_logger;
use rand::Rng;


fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let config_path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: bikeshare_sim <config.yaml>");
            std::process::exit(2);
        }
    };

    let cfg = SimConfig::from_file(&config_path)?;
    let sim = BikeShareSimulator::from_config(&cfg)?;

    if let Some(report_path) = &cfg.report_path {
        let inventory = sim.initial_inventory(&cfg.cluster_targets)?;
        bikeshare_sim::write_configuration_report_to_path(report_path, &inventory,
                                                          sim.stations())?;
    }

    let base_seed = match cfg.seed {
        Some(seed) => seed,
        None => {
            let seed = rand::thread_rng().gen();
            log::info!("no seed configured, using {}", seed);
            seed
        }
    };
    let seeds = cfg.replication_seeds(base_seed);
    let outcomes = sim.run_replications(&cfg.cluster_targets, &seeds)?;

    for (seed, outcome) in seeds.iter().zip(&outcomes) {
        println!("seed {}: {}", seed, outcome.objective());
    }
    if outcomes.len() > 1 {
        let mean = outcomes.iter().map(|oo| oo.objective() as f64).sum::<f64>()
            / outcomes.len() as f64;
        println!("mean: {:.3}", mean);
    }
    Ok(())
}
