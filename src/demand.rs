use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::Path;

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

use super::config_utils::{self, parse_field};
use super::error::{Result, SimError};

/// Demand between one origin/destination pair on one day.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct PairDemand {
    pub rate: f64,
    pub mean_duration_min: f64,
}

/// Sparse pairwise demand for one historical day, keyed by (origin, dest).
/// Pairs that are absent have rate zero.  Iteration is in ascending key order.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct DayDemand {
    pairs: BTreeMap<(usize, usize), PairDemand>,
}

impl DayDemand {
    pub fn new() -> DayDemand {
        DayDemand{pairs: BTreeMap::new()}
    }

    /// Adds a pair.  Station ids are checked against `num_stations`; duplicate
    /// pairs and negative or non-finite values are rejected.
    pub fn insert(&mut self, origin: usize, dest: usize, demand: PairDemand, num_stations: usize)
                  -> Result<()> {
        if origin >= num_stations || dest >= num_stations {
            return Err(SimError::Validation(format!(
                "demand pair ({}, {}) references a station outside 0..{}",
                origin, dest, num_stations)));
        }
        if !(demand.rate >= 0. && demand.rate.is_finite()) {
            return Err(SimError::Validation(format!(
                "rate {} for pair ({}, {}) must be finite and nonnegative", demand.rate, origin, dest)));
        }
        if !(demand.mean_duration_min >= 0. && demand.mean_duration_min.is_finite()) {
            return Err(SimError::Validation(format!(
                "mean duration {} for pair ({}, {}) must be finite and nonnegative",
                demand.mean_duration_min, origin, dest)));
        }
        match self.pairs.entry((origin, dest)) {
            Entry::Occupied(_) => Err(SimError::Validation(format!(
                "demand pair ({}, {}) given twice", origin, dest))),
            Entry::Vacant(slot) => {
                slot.insert(demand);
                Ok(())
            }
        }
    }

    /// Merges parallel triplet lists `(rate, origin, dest)` and
    /// `(mean_duration_min, origin, dest)` into one keyed table.  Every pair with
    /// a positive rate needs a duration; durations for pairs without a rate are ignored.
    pub fn from_triplets(rates: &[(f64, usize, usize)], durations: &[(f64, usize, usize)],
                         num_stations: usize) -> Result<DayDemand> {
        let mut duration_map = BTreeMap::new();
        for &(duration, origin, dest) in durations {
            if duration_map.insert((origin, dest), duration).is_some() {
                return Err(SimError::Validation(format!(
                    "duration for pair ({}, {}) given twice", origin, dest)));
            }
        }

        let mut demand = DayDemand::new();
        for &(rate, origin, dest) in rates {
            let mean_duration_min = match duration_map.get(&(origin, dest)) {
                Some(&duration) => duration,
                None if rate == 0. => 0.,
                None => return Err(SimError::Validation(format!(
                    "pair ({}, {}) has rate {} but no mean duration", origin, dest, rate))),
            };
            demand.insert(origin, dest, PairDemand{rate, mean_duration_min}, num_stations)?;
        }
        Ok(demand)
    }

    pub fn get(&self, origin: usize, dest: usize) -> Option<&PairDemand> {
        self.pairs.get(&(origin, dest))
    }

    pub fn mean_duration_min(&self, origin: usize, dest: usize) -> Option<f64> {
        self.get(origin, dest).map(|pd| pd.mean_duration_min)
    }

    pub fn total_rate(&self) -> f64 {
        self.pairs.values().map(|pd| pd.rate).sum()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(usize, usize), &PairDemand)> {
        self.pairs.iter()
    }
}

/// Demand tables for every historical day, with each day's mean total count.
#[derive(PartialEq, Debug, Clone)]
pub struct DemandHistory {
    days: Vec<DayDemand>,
    day_means: Vec<f64>,
}

impl DemandHistory {
    pub fn new(days: Vec<DayDemand>, day_means: Vec<f64>) -> Result<DemandHistory> {
        if days.len() != day_means.len() {
            return Err(SimError::Validation(format!(
                "{} demand days but {} day means", days.len(), day_means.len())));
        }
        if days.is_empty() {
            return Err(SimError::Validation(String::from("no demand days given")));
        }
        if let Some(bad) = day_means.iter().position(|mm| !(mm.is_finite() && *mm >= 0.)) {
            return Err(SimError::Validation(format!(
                "day {} has invalid mean {}", bad, day_means[bad])));
        }
        Ok(DemandHistory{days, day_means})
    }

    /// Loads demand from a csv with columns `day,origin,dest,rate,mean_duration_min`
    /// and per-day means from a csv with columns `day,mean`.
    pub fn from_csv(demand_path: &Path, day_means_path: &Path, num_stations: usize)
                    -> Result<DemandHistory> {
        let mean_rows = config_utils::read_csv_rows(day_means_path)?;
        let mut day_means = vec![None; mean_rows.len()];
        for row in &mean_rows {
            let day: usize = parse_field(row, "day")?;
            let slot = day_means.get_mut(day).ok_or_else(|| SimError::Validation(format!(
                "day {} out of range for {} days", day, mean_rows.len())))?;
            if slot.is_some() {
                return Err(SimError::Validation(format!("mean for day {} given twice", day)));
            }
            *slot = Some(parse_field::<f64>(row, "mean")?);
        }
        let day_means: Vec<f64> = day_means.into_iter().flatten().collect();

        let mut days = vec![DayDemand::new(); day_means.len()];
        for row in &config_utils::read_csv_rows(demand_path)? {
            let day: usize = parse_field(row, "day")?;
            let day_demand = days.get_mut(day).ok_or_else(|| SimError::Validation(format!(
                "demand row for day {} but only {} days have means", day, day_means.len())))?;
            let demand = PairDemand {
                rate: parse_field(row, "rate")?,
                mean_duration_min: parse_field(row, "mean_duration_min")?,
            };
            day_demand.insert(parse_field(row, "origin")?, parse_field(row, "dest")?, demand,
                              num_stations)?;
        }
        log::debug!("loaded demand for {} days", days.len());
        DemandHistory::new(days, day_means)
    }

    pub fn num_days(&self) -> usize {
        self.days.len()
    }

    pub fn day(&self, index: usize) -> Result<&DayDemand> {
        self.days.get(index).ok_or_else(|| SimError::Validation(format!(
            "day index {} out of range for {} days", index, self.days.len())))
    }

    pub fn day_means(&self) -> &[f64] {
        &self.day_means
    }

    /// Probability of each day having produced `observed_count`, proportional
    /// to the Poisson likelihood of the count under the day's mean.
    pub fn day_probabilities(&self, observed_count: u64) -> Result<Vec<f64>> {
        // ln(count!) is the same for every day and cancels in the normalisation
        let log_likelihoods: Vec<f64> = self.day_means
            .iter()
            .map(|&mean| poisson_log_kernel(observed_count, mean))
            .collect();
        let max_ll = log_likelihoods.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if max_ll == f64::NEG_INFINITY {
            return Err(SimError::Validation(format!(
                "a count of {} is impossible under every day's mean", observed_count)));
        }
        // shift by the max so the exponentials do not all underflow
        let weights: Vec<f64> = log_likelihoods.iter().map(|ll| (ll - max_ll).exp()).collect();
        let total: f64 = weights.iter().sum();
        Ok(weights.iter().map(|ww| ww / total).collect())
    }

    /// Picks the historical day that most plausibly produced `observed_count`,
    /// at random in proportion to its Poisson likelihood.
    pub fn select_day<R: Rng>(&self, observed_count: u64, rng: &mut R) -> Result<usize> {
        let probs = self.day_probabilities(observed_count)?;
        let dist = WeightedIndex::new(&probs)
            .map_err(|err| SimError::Validation(format!("bad day weights: {}", err)))?;
        Ok(dist.sample(rng))
    }
}

/// ln P(X = count) for X ~ Poisson(mean).
pub fn poisson_log_pmf(count: u64, mean: f64) -> f64 {
    let ln_factorial: f64 = (2..=count).map(|ii| (ii as f64).ln()).sum();
    poisson_log_kernel(count, mean) - ln_factorial
}

/// ln P(X = count) + ln(count!), the part of the log pmf that depends on the mean.
fn poisson_log_kernel(count: u64, mean: f64) -> f64 {
    if mean == 0. {
        return if count == 0 { 0. } else { f64::NEG_INFINITY };
    }
    count as f64 * mean.ln() - mean
}
