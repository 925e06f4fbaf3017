//! Delay schedules.
//!
//! A [`Schedule`] is the ordered list of delays (ns) one scan visits. It is
//! built from a range or an explicit list, expanded by a repeat count, and
//! optionally shuffled. Once built it is immutable.

use rand::seq::SliceRandom;
use rand::Rng;
use timescan_core::error::{TimescanError, TsResult};

/// Relative slack (in units of `step`) absorbing floating-point noise in
/// range construction.
const RANGE_SLACK: f64 = 1e-9;

/// Refuse schedules larger than this.
pub const MAX_POINTS: usize = 1_000_000;

/// Ordered delays for one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    delays: Vec<f64>,
}

impl Schedule {
    /// Range schedule: every point of [`range_points`], repeated and
    /// optionally shuffled.
    pub fn from_range<R: Rng + ?Sized>(
        start: f64,
        stop: f64,
        step: f64,
        repeats: u32,
        randomize: bool,
        rng: &mut R,
    ) -> TsResult<Self> {
        let points = range_points(start, stop, step)?;
        Self::from_times(&points, repeats, randomize, rng)
    }

    /// Explicit-list schedule, repeated and optionally shuffled.
    pub fn from_times<R: Rng + ?Sized>(
        times: &[f64],
        repeats: u32,
        randomize: bool,
        rng: &mut R,
    ) -> TsResult<Self> {
        if times.is_empty() {
            return Err(TimescanError::InvalidSchedule("no delay points given".into()));
        }
        if let Some(bad) = times.iter().find(|t| !t.is_finite()) {
            return Err(TimescanError::InvalidSchedule(format!("non-finite delay {}", bad)));
        }
        let delays = expand(times, repeats, randomize, rng)?;
        Ok(Self { delays })
    }

    /// Delays in visiting order.
    pub fn delays(&self) -> &[f64] {
        &self.delays
    }

    /// Number of cycles.
    pub fn len(&self) -> usize {
        self.delays.len()
    }

    /// Whether the schedule has no points.
    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }

    /// Iterate in visiting order.
    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.delays.iter()
    }
}

impl<'a> IntoIterator for &'a Schedule {
    type Item = &'a f64;
    type IntoIter = std::slice::Iter<'a, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Inclusive arithmetic sequence `start, start+step, ...` whose last point
/// is the first one `>= stop`.
///
/// Points are `start + i*step` rather than a running sum. A point within
/// `1e-9 * step` of `stop` is snapped to `stop`.
pub fn range_points(start: f64, stop: f64, step: f64) -> TsResult<Vec<f64>> {
    if !start.is_finite() || !stop.is_finite() {
        return Err(TimescanError::InvalidSchedule(format!(
            "range bounds must be finite, got [{}, {}]",
            start, stop
        )));
    }
    if !(step.is_finite() && step > 0.0) {
        return Err(TimescanError::InvalidSchedule(format!(
            "step must be positive, got {}",
            step
        )));
    }
    if stop < start {
        return Err(TimescanError::InvalidSchedule(format!(
            "stop {} is before start {}",
            stop, start
        )));
    }

    let intervals = ((stop - start) / step - RANGE_SLACK).ceil().max(0.0);
    if intervals >= MAX_POINTS as f64 {
        return Err(TimescanError::InvalidSchedule(format!(
            "range [{}, {}] with step {} exceeds {} points",
            start, stop, step, MAX_POINTS
        )));
    }
    let intervals = intervals as usize;

    let points = (0..=intervals)
        .map(|i| {
            let p = start + i as f64 * step;
            if (p - stop).abs() <= RANGE_SLACK * step {
                stop
            } else {
                p
            }
        })
        .collect();
    Ok(points)
}

/// `n` evenly spaced points from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { stop } else { start + i as f64 * step })
                .collect()
        }
    }
}

/// Repeat every value `repeats` times in place, then shuffle the whole
/// sequence if `randomize`.
pub fn expand<R: Rng + ?Sized>(
    values: &[f64],
    repeats: u32,
    randomize: bool,
    rng: &mut R,
) -> TsResult<Vec<f64>> {
    if repeats < 1 {
        return Err(TimescanError::InvalidSchedule(format!(
            "repeats must be at least 1, got {}",
            repeats
        )));
    }
    let total = values.len().saturating_mul(repeats as usize);
    if total > MAX_POINTS {
        return Err(TimescanError::InvalidSchedule(format!(
            "{} points x {} repeats exceeds {} points",
            values.len(),
            repeats,
            MAX_POINTS
        )));
    }

    let mut expanded: Vec<f64> = values
        .iter()
        .flat_map(|&v| std::iter::repeat(v).take(repeats as usize))
        .collect();
    if randomize {
        expanded.shuffle(rng);
    }
    Ok(expanded)
}
