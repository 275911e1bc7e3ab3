use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::store::Observation;

/// Position of a value within a window. Ties share the more extreme rank.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankResult {
    /// 1 + number of window values strictly below the value (1 = lowest).
    pub rank_low: usize,
    /// 1 + number of window values strictly above the value (1 = highest).
    pub rank_high: usize,
    pub total_count: usize,
    pub tied_count: usize,
    /// Mid-rank percentile position in `[0, 100]`.
    pub percentile_rank: f64,
}

impl RankResult {
    pub fn greater_count(&self) -> usize {
        self.rank_high - 1
    }

    pub fn less_count(&self) -> usize {
        self.rank_low - 1
    }

    /// Highest or tied for highest in the window.
    pub fn is_highest(&self) -> bool {
        self.rank_high == 1
    }

    pub fn is_lowest(&self) -> bool {
        self.rank_low == 1
    }

    /// Strictly above every value of the window.
    pub fn is_new_high(&self) -> bool {
        self.is_highest() && self.tied_count == 0
    }

    pub fn is_new_low(&self) -> bool {
        self.is_lowest() && self.tied_count == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtremeDirection {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Extreme {
    pub date: NaiveDate,
    pub value: f64,
}

/// Ranks `value` against the finite values of `observations`.
pub fn rank(metric_id: &str, value: f64, observations: &[Observation]) -> EngineResult<RankResult> {
    let mut less = 0usize;
    let mut greater = 0usize;
    let mut tied = 0usize;
    for obs in observations.iter().filter(|obs| obs.value.is_finite()) {
        if obs.value < value {
            less += 1;
        } else if obs.value > value {
            greater += 1;
        } else {
            tied += 1;
        }
    }

    let total = less + greater + tied;
    if total == 0 || !value.is_finite() {
        return Err(EngineError::insufficient_history(metric_id));
    }

    Ok(RankResult {
        rank_low: less + 1,
        rank_high: greater + 1,
        total_count: total,
        tied_count: tied,
        percentile_rank: 100.0 * (less as f64 + tied as f64 / 2.0) / total as f64,
    })
}

/// Minimum or maximum of the window; the earliest date wins ties.
pub fn locate_extreme(observations: &[Observation], direction: ExtremeDirection) -> Option<Extreme> {
    let mut best: Option<Extreme> = None;
    for obs in observations.iter().filter(|obs| obs.value.is_finite()) {
        let better = match &best {
            None => true,
            Some(current) => {
                let more_extreme = match direction {
                    ExtremeDirection::Low => obs.value < current.value,
                    ExtremeDirection::High => obs.value > current.value,
                };
                more_extreme || (obs.value == current.value && obs.date < current.date)
            }
        };
        if better {
            best = Some(Extreme {
                date: obs.date,
                value: obs.value,
            });
        }
    }
    best
}
