use serde::Serialize;
use statrs::statistics::Statistics;

/// Percentile ranks reported for every populated window.
pub const PERCENTILE_LADDER: [f64; 9] = [1.0, 5.0, 10.0, 25.0, 50.0, 75.0, 90.0, 95.0, 99.0];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentilePoint {
    pub percentile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sample standard deviation; absent for a single value.
    pub std_dev: Option<f64>,
    pub percentiles: Vec<PercentilePoint>,
    #[serde(skip)]
    sorted: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DistributionSummary {
    Empty,
    Populated(DistributionStats),
}

impl DistributionSummary {
    pub fn count(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Populated(stats) => stats.count,
        }
    }

    pub fn stats(&self) -> Option<&DistributionStats> {
        match self {
            Self::Empty => None,
            Self::Populated(stats) => Some(stats),
        }
    }
}

impl DistributionStats {
    /// Interpolated value at percentile rank `p` in `[0, 100]`.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        quantile_sorted(&self.sorted, p / 100.0)
    }

    /// Ladder value for an exact ladder rung, e.g. `ladder(95.0)`.
    pub fn ladder(&self, p: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|point| (point.percentile - p).abs() < f64::EPSILON)
            .map(|point| point.value)
    }

    pub fn median(&self) -> f64 {
        self.percentile(50.0).unwrap_or(self.mean)
    }
}

/// Summarizes the finite values; non-finite inputs are ignored.
pub fn summarize<I>(values: I) -> DistributionSummary
where
    I: IntoIterator<Item = f64>,
{
    let mut sorted: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return DistributionSummary::Empty;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let count = sorted.len();
    let min = sorted[0];
    let max = sorted[count - 1];
    let mean = sorted.iter().mean();
    let std_dev = if count > 1 {
        Some(sorted.iter().std_dev()).filter(|sd| sd.is_finite())
    } else {
        None
    };
    let percentiles = PERCENTILE_LADDER
        .iter()
        .filter_map(|p| {
            quantile_sorted(&sorted, p / 100.0).map(|value| PercentilePoint {
                percentile: *p,
                value,
            })
        })
        .collect();

    DistributionSummary::Populated(DistributionStats {
        count,
        min,
        max,
        mean,
        std_dev,
        percentiles,
        sorted,
    })
}

/// Linear interpolation between order statistics at rank `q * (n - 1)`.
fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if !(0.0..=1.0).contains(&q) || sorted.is_empty() {
        return None;
    }
    if sorted.len() == 1 {
        return Some(sorted[0]);
    }
    let pos = q * (sorted.len() as f64 - 1.0);
    let idx = pos.floor() as usize;
    let frac = pos - idx as f64;
    let a = sorted[idx];
    let b = sorted[(idx + 1).min(sorted.len() - 1)];
    Some((a + (b - a) * frac).clamp(a.min(b), a.max(b)))
}
