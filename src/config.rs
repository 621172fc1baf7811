use std::convert::TryFrom;
use std::path::{Path, PathBuf};

use yaml_rust::{Yaml, YamlLoader};

use super::config_utils;
use super::error::{Result, SimError};
use super::simulator::SimParams;

pub struct SimConfig {
    // headerless csv of station-to-station distances
    pub distance_matrix_path: PathBuf,
    // csv with columns id,capacity,latitude,longitude
    pub stations_path: PathBuf,
    // csv with columns cluster,station_id
    pub clusters_path: PathBuf,
    // csv with columns day,origin,dest,rate,mean_duration_min
    pub demand_path: PathBuf,
    // csv with columns day,mean
    pub day_means_path: PathBuf,
    // length of the simulated window, in hours from the start of the day
    pub horizon_hours: f64,
    // total number of bikes; must equal the sum of the cluster targets
    pub fleet_size: u32,
    pub cluster_targets: Vec<u32>,
    // number of trips requested over the horizon
    pub observed_count: u64,
    // if given, must match the number of days in the demand data
    pub n_days: Option<usize>,
    // replay this day instead of picking one from the observed count
    pub day_index: Option<usize>,
    pub seed: Option<u64>,
    pub replications: usize,
    // dock or redirect the bikes still in transit when the horizon ends
    pub resolve_in_transit_at_end: bool,
    // where to write the initial allocation report, if anywhere
    pub report_path: Option<PathBuf>,
}

impl SimConfig {
    pub fn from_file(path: &str) -> Result<SimConfig> {
        let file_contents = std::fs::read_to_string(path)?;
        let config_dir = Path::new(path).parent().unwrap_or_else(|| Path::new("."));
        let cfg = SimConfig::from_yaml_str(&file_contents, config_dir)?;
        log::info!("loaded config from {}", path);
        Ok(cfg)
    }

    /// Parses a config, resolving relative data paths against `config_dir`.
    pub fn from_yaml_str(contents: &str, config_dir: &Path) -> Result<SimConfig> {
        let yaml_cfgs = YamlLoader::load_from_str(contents)?;
        let yaml_cfg = yaml_cfgs
            .get(0)
            .ok_or_else(|| SimError::Config(String::from("config file is empty")))?;
        let path = |key: &str| -> Result<PathBuf> {
            Ok(config_utils::str_to_absolute_path(required_str(yaml_cfg, key)?, config_dir))
        };

        let targets = match &yaml_cfg["cluster_targets"] {
            Yaml::Array(items) => items
                .iter()
                .map(|item| item.as_i64().and_then(to_u32).ok_or_else(|| SimError::Config(
                    format!("cluster target {:?} is not a nonnegative integer", item))))
                .collect::<Result<Vec<u32>>>()?,
            _ => return Err(SimError::Config(String::from("cluster_targets must be a list"))),
        };

        let cfg = SimConfig {
            distance_matrix_path: path("distance_matrix_path")?,
            stations_path: path("stations_path")?,
            clusters_path: path("clusters_path")?,
            demand_path: path("demand_path")?,
            day_means_path: path("day_means_path")?,
            horizon_hours: required_f64(yaml_cfg, "horizon_hours")?,
            fleet_size: narrow(yaml_cfg, "fleet_size", required_int(yaml_cfg, "fleet_size")?)?,
            cluster_targets: targets,
            observed_count: required_int(yaml_cfg, "observed_count")?,
            n_days: optional_int(yaml_cfg, "n_days")?
                .map(|nn| narrow(yaml_cfg, "n_days", nn)).transpose()?,
            day_index: optional_int(yaml_cfg, "day_index")?
                .map(|nn| narrow(yaml_cfg, "day_index", nn)).transpose()?,
            seed: optional_int(yaml_cfg, "seed")?,
            replications: narrow(yaml_cfg, "replications",
                                 optional_int(yaml_cfg, "replications")?.unwrap_or(1))?,
            resolve_in_transit_at_end: match &yaml_cfg["resolve_in_transit_at_end"] {
                Yaml::BadValue | Yaml::Null => false,
                other => other.as_bool().ok_or_else(|| SimError::Config(String::from(
                    "resolve_in_transit_at_end must be true or false")))?,
            },
            report_path: match yaml_cfg["report_path"].as_str() {
                Some(rp) => Some(config_utils::str_to_absolute_path(rp, config_dir)),
                None => None,
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let target_sum: u64 = self.cluster_targets.iter().map(|&tt| tt as u64).sum();
        if target_sum != self.fleet_size as u64 {
            return Err(SimError::Validation(format!(
                "cluster targets sum to {} but the fleet has {} bikes", target_sum, self.fleet_size)));
        }
        if !(self.horizon_hours.is_finite() && self.horizon_hours >= 0.) {
            return Err(SimError::Config(format!(
                "horizon_hours {} must be nonnegative", self.horizon_hours)));
        }
        if self.replications == 0 {
            return Err(SimError::Config(String::from("replications must be at least 1")));
        }
        Ok(())
    }

    pub fn sim_params(&self) -> SimParams {
        SimParams {
            horizon_hours: self.horizon_hours,
            observed_count: self.observed_count,
            day_index: self.day_index,
            resolve_in_transit_at_end: self.resolve_in_transit_at_end,
        }
    }

    /// One seed per replication, counting up from the base seed.
    pub fn replication_seeds(&self, base_seed: u64) -> Vec<u64> {
        (0..self.replications as u64).map(|ii| base_seed.wrapping_add(ii)).collect()
    }
}

fn to_u32(value: i64) -> Option<u32> {
    if value >= 0 && value <= u32::MAX as i64 {
        Some(value as u32)
    } else {
        None
    }
}

/// Converts an integer read from `key` to a narrower type, failing if it does not fit.
fn narrow<T: TryFrom<u64>>(yaml_cfg: &Yaml, key: &str, value: u64) -> Result<T> {
    T::try_from(value).map_err(|_| SimError::Config(format!(
        "key \"{}\" is out of range: {:?}", key, yaml_cfg[key])))
}

fn required_str<'y>(yaml_cfg: &'y Yaml, key: &str) -> Result<&'y str> {
    yaml_cfg[key]
        .as_str()
        .ok_or_else(|| SimError::Config(format!("missing or non-string key \"{}\"", key)))
}

fn required_f64(yaml_cfg: &Yaml, key: &str) -> Result<f64> {
    // yaml parses "6" as an integer, so accept both
    let value = match &yaml_cfg[key] {
        Yaml::Real(_) => yaml_cfg[key].as_f64(),
        Yaml::Integer(ii) => Some(*ii as f64),
        _ => None,
    };
    value.ok_or_else(|| SimError::Config(format!("missing or non-numeric key \"{}\"", key)))
}

fn required_int(yaml_cfg: &Yaml, key: &str) -> Result<u64> {
    optional_int(yaml_cfg, key)?
        .ok_or_else(|| SimError::Config(format!("missing key \"{}\"", key)))
}

fn optional_int(yaml_cfg: &Yaml, key: &str) -> Result<Option<u64>> {
    match &yaml_cfg[key] {
        Yaml::BadValue | Yaml::Null => Ok(None),
        Yaml::Integer(ii) if *ii >= 0 => Ok(Some(*ii as u64)),
        _ => Err(SimError::Config(format!("key \"{}\" must be a nonnegative integer", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static BASE_CFG: &str = "
distance_matrix_path: dists.csv
stations_path: stations.csv
clusters_path: /abs/clusters.csv
demand_path: demand.csv
day_means_path: day_means.csv
horizon_hours: 4
fleet_size: 30
cluster_targets: [10, 20]
observed_count: 120
";

    #[test]
    fn test_minimal_config() {
        let cfg = SimConfig::from_yaml_str(BASE_CFG, Path::new("/data")).unwrap();
        assert_eq!(cfg.distance_matrix_path, PathBuf::from("/data/dists.csv"));
        assert_eq!(cfg.clusters_path, PathBuf::from("/abs/clusters.csv"));
        assert_eq!(cfg.horizon_hours, 4.);
        assert_eq!(cfg.cluster_targets, vec![10, 20]);
        assert_eq!(cfg.observed_count, 120);
        assert_eq!(cfg.n_days, None);
        assert_eq!(cfg.day_index, None);
        assert_eq!(cfg.seed, None);
        assert_eq!(cfg.replications, 1);
        assert!(!cfg.resolve_in_transit_at_end);
        assert!(cfg.report_path.is_none());
    }

    #[test]
    fn test_optional_keys() {
        let text = format!("{}day_index: 3\nseed: 99\nreplications: 4\n\
                            resolve_in_transit_at_end: true\nreport_path: out/report.csv\n\
                            n_days: 365\n", BASE_CFG);
        let cfg = SimConfig::from_yaml_str(&text, Path::new("/data")).unwrap();
        assert_eq!(cfg.day_index, Some(3));
        assert_eq!(cfg.seed, Some(99));
        assert_eq!(cfg.n_days, Some(365));
        assert!(cfg.resolve_in_transit_at_end);
        assert_eq!(cfg.report_path, Some(PathBuf::from("/data/out/report.csv")));
        assert_eq!(cfg.replication_seeds(99), vec![99, 100, 101, 102]);
        assert_eq!(cfg.sim_params().day_index, Some(3));
    }

    #[test]
    fn test_targets_must_match_fleet() {
        let text = BASE_CFG.replace("fleet_size: 30", "fleet_size: 31");
        match SimConfig::from_yaml_str(&text, Path::new("/data")) {
            Err(SimError::Validation(_)) => (),
            other => panic!("expected a validation error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_missing_and_mistyped_keys() {
        let text = BASE_CFG.replace("observed_count: 120\n", "");
        assert!(matches!(SimConfig::from_yaml_str(&text, Path::new("/")),
                         Err(SimError::Config(_))));
        let text = BASE_CFG.replace("horizon_hours: 4", "horizon_hours: soon");
        assert!(matches!(SimConfig::from_yaml_str(&text, Path::new("/")),
                         Err(SimError::Config(_))));
        let text = BASE_CFG.replace("[10, 20]", "[10, -20]");
        assert!(SimConfig::from_yaml_str(&text, Path::new("/")).is_err());
        assert!(SimConfig::from_yaml_str("", Path::new("/")).is_err());
    }

    #[test]
    fn test_out_of_range_integers_rejected() {
        // 2^32 + 30 would wrap to the target sum if narrowed with a cast
        let text = BASE_CFG.replace("fleet_size: 30", "fleet_size: 4294967326");
        match SimConfig::from_yaml_str(&text, Path::new("/data")) {
            Err(SimError::Config(msg)) => assert!(msg.contains("fleet_size")),
            other => panic!("expected a config error, got {:?}", other.err()),
        }
        let text = BASE_CFG.replace("[10, 20]", "[10, 4294967316]");
        assert!(matches!(SimConfig::from_yaml_str(&text, Path::new("/data")),
                         Err(SimError::Config(_))));
        let text = format!("{}seed: 18446744073709551615\n", BASE_CFG);
        assert!(SimConfig::from_yaml_str(&text, Path::new("/data")).is_err());
    }
}
