use rand::Rng;
use rand_distr::{Binomial, Distribution};

use super::demand::DayDemand;
use super::error::{Result, SimError};

/// A request to take a bike from `origin` to `dest` at `time` hours into the horizon.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct PickupEvent {
    pub time: f64,
    pub origin: usize,
    pub dest: usize,
}

/// Sorted arrival times for one origin/destination pair.
#[derive(PartialEq, Debug, Clone)]
pub struct PairArrivals {
    pub origin: usize,
    pub dest: usize,
    pub times: Vec<f64>,
}

#[derive(PartialEq, Debug, Clone)]
pub struct ArrivalSchedule {
    /// Only pairs that received at least one arrival, in ascending (origin, dest) order.
    pub pairs: Vec<PairArrivals>,
    pub total: u64,
}

impl ArrivalSchedule {
    /// Flattens the per-pair sequences into pickup events sorted by time.
    /// Equal times keep their (origin, dest) order.
    pub fn into_pickups(self) -> Vec<PickupEvent> {
        let mut pickups: Vec<PickupEvent> = self.pairs
            .into_iter()
            .flat_map(|pa| {
                let (origin, dest) = (pa.origin, pa.dest);
                pa.times.into_iter().map(move |time| PickupEvent{time, origin, dest})
            })
            .collect();
        sort_by_time(&mut pickups);
        pickups
    }
}

/// Generates the arrivals of `count` trips over `[0, horizon]` for one demand group.
///
/// Given the total number of arrivals of a homogeneous Poisson process, the
/// arrival times are independent uniforms, so there is no need to simulate
/// inter-arrival gaps.  The count is split over pairs by one multinomial draw
/// with probabilities proportional to the pair rates, and each pair's times
/// are drawn uniformly and sorted.
pub fn generate_arrivals<R: Rng>(horizon: f64, count: u64, demand: &DayDemand, rng: &mut R)
                                 -> Result<ArrivalSchedule> {
    if !(horizon.is_finite() && horizon >= 0.) {
        return Err(SimError::Validation(format!("horizon {} must be finite and nonnegative",
                                                horizon)));
    }
    let total_rate = demand.total_rate();
    if !(total_rate > 0.) {
        return Err(SimError::DegenerateDemand);
    }

    let weighted: Vec<((usize, usize), f64)> = demand
        .iter()
        .filter(|(_, pd)| pd.rate > 0.)
        .map(|(&key, pd)| (key, pd.rate))
        .collect();
    let counts = multinomial(count, &weighted.iter().map(|(_, rate)| *rate).collect::<Vec<f64>>(),
                             rng)?;

    let mut pairs = vec![];
    for (((origin, dest), _), num) in weighted.into_iter().zip(counts) {
        if num == 0 {
            continue;
        }
        let mut times: Vec<f64> = (0..num).map(|_| horizon * rng.gen::<f64>()).collect();
        times.sort_by(|aa, bb| aa.partial_cmp(bb).unwrap_or(std::cmp::Ordering::Equal));
        pairs.push(PairArrivals{origin, dest, times});
    }

    let total = pairs.iter().map(|pa| pa.times.len() as u64).sum();
    Ok(ArrivalSchedule{pairs, total})
}

/// Generates arrivals for several demand groups and merges them into one
/// time-ordered pickup sequence.
pub fn generate_pickups<R: Rng>(horizon: f64, groups: &[(u64, &DayDemand)], rng: &mut R)
                                -> Result<Vec<PickupEvent>> {
    let mut pickups = vec![];
    for &(count, demand) in groups {
        let schedule = generate_arrivals(horizon, count, demand, rng)?;
        pickups.extend(schedule.into_pickups());
    }
    sort_by_time(&mut pickups);
    Ok(pickups)
}

fn sort_by_time(pickups: &mut Vec<PickupEvent>) {
    // stable, so simultaneous pickups keep their generation order
    pickups.sort_by(|aa, bb| aa.time.partial_cmp(&bb.time).unwrap_or(std::cmp::Ordering::Equal));
}

/// Draws one multinomial sample of size `count` over categories with the
/// given (unnormalized, positive) weights, as a chain of conditional binomials.
fn multinomial<R: Rng>(count: u64, weights: &[f64], rng: &mut R) -> Result<Vec<u64>> {
    // suffix[ii] is the weight of categories ii.. still to be drawn
    let mut suffix = vec![0.; weights.len() + 1];
    for ii in (0..weights.len()).rev() {
        suffix[ii] = suffix[ii + 1] + weights[ii];
    }

    let mut remaining = count;
    let mut counts = Vec::with_capacity(weights.len());
    for (ii, &weight) in weights.iter().enumerate() {
        let num = if remaining == 0 {
            0
        } else if ii + 1 == weights.len() {
            remaining
        } else {
            let prob = (weight / suffix[ii]).min(1.);
            Binomial::new(remaining, prob)
                .map_err(|err| SimError::Validation(format!("bad binomial: {}", err)))?
                .sample(rng)
        };
        remaining -= num;
        counts.push(num);
    }
    Ok(counts)
}
