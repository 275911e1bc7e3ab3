use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use super::period::PeriodOfInterest;
use super::rank::{locate_extreme, rank, Extreme, ExtremeDirection, RankResult};
use super::season::SeasonMapping;
use super::significance::{evaluate, SignificanceConfig, SignificanceVerdict};
use super::summary::{summarize, DistributionStats, DistributionSummary};
use super::window::{resolve, EmptyReason, WindowResolution, WindowSpec};
use crate::error::{EngineError, EngineResult};
use crate::store::{Observation, ObservationStore};
use crate::time::DateRange;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentObservation {
    pub date: NaiveDate,
    pub value: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub aux: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowComparison {
    pub key: String,
    pub spec: WindowSpec,
    #[serde(flatten)]
    pub outcome: WindowOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WindowOutcome {
    /// Comparison unavailable for this window.
    Empty {
        reason: EmptyReason,
        ranges: Vec<DateRange>,
    },
    Available {
        ranges: Vec<DateRange>,
        summary: DistributionStats,
        rank: RankResult,
        min: Extreme,
        max: Extreme,
    },
}

impl WindowComparison {
    pub fn summary(&self) -> DistributionSummary {
        match &self.outcome {
            WindowOutcome::Available { summary, .. } => DistributionSummary::Populated(summary.clone()),
            WindowOutcome::Empty { .. } => DistributionSummary::Empty,
        }
    }

    pub fn rank(&self) -> Option<&RankResult> {
        match &self.outcome {
            WindowOutcome::Available { rank, .. } => Some(rank),
            WindowOutcome::Empty { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.outcome, WindowOutcome::Available { .. })
    }
}

/// Everything the narrative generator gets to know about one (metric, date).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonContext {
    pub metric_id: String,
    pub anchor_date: NaiveDate,
    pub current: CurrentObservation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<PeriodOfInterest>,
    pub primary_window: String,
    pub windows: Vec<WindowComparison>,
    pub verdict: SignificanceVerdict,
}

impl ComparisonContext {
    pub fn window(&self, key: &str) -> Option<&WindowComparison> {
        self.windows.iter().find(|window| window.key == key)
    }
}

/// Orchestrates window resolution, summaries, ranks and the publish decision.
pub struct ComparisonContextBuilder<'a, S: ObservationStore + ?Sized> {
    store: &'a S,
    seasons: &'a SeasonMapping,
}

impl<'a, S: ObservationStore + ?Sized> ComparisonContextBuilder<'a, S> {
    pub fn new(store: &'a S, seasons: &'a SeasonMapping) -> Self {
        Self { store, seasons }
    }

    pub fn build(
        &self,
        metric_id: &str,
        anchor_date: NaiveDate,
        window_specs: &[WindowSpec],
        significance: &SignificanceConfig,
    ) -> EngineResult<ComparisonContext> {
        let current = self
            .store
            .observation_on(metric_id, anchor_date)?
            .filter(|obs| obs.value.is_finite())
            .ok_or_else(|| EngineError::MissingCurrentObservation {
                metric_id: metric_id.to_string(),
                date: anchor_date,
            })?;
        let history = self.store.history_bounds(metric_id)?;

        let mut windows = Vec::with_capacity(window_specs.len());
        for spec in window_specs {
            windows.push(self.compare_window(metric_id, anchor_date, current.value, spec, history)?);
        }

        let primary_window = primary_window_key(window_specs, significance);
        let verdict = match windows.iter().find(|window| window.key == primary_window) {
            Some(window) => evaluate(current.value, &window.summary(), significance),
            None => SignificanceVerdict::insufficient_data(0),
        };

        tracing::debug!(
            metric_id,
            anchor_date = %anchor_date,
            windows = windows.len(),
            available = windows.iter().filter(|w| w.is_available()).count(),
            publish = verdict.is_publish_worthy,
            reason = ?verdict.reason_code,
            "built comparison context"
        );

        Ok(ComparisonContext {
            metric_id: metric_id.to_string(),
            anchor_date,
            current: CurrentObservation {
                date: current.date,
                value: current.value,
                aux: current.aux,
            },
            period: None,
            primary_window,
            windows,
            verdict,
        })
    }

    fn compare_window(
        &self,
        metric_id: &str,
        anchor_date: NaiveDate,
        value: f64,
        spec: &WindowSpec,
        history: Option<DateRange>,
    ) -> EngineResult<WindowComparison> {
        let key = spec.label();
        let ranges = match resolve(spec, anchor_date, self.seasons, history) {
            WindowResolution::Ranges(ranges) => ranges,
            WindowResolution::Empty(reason) => {
                return Ok(empty_window(key, spec, reason, Vec::new()));
            }
        };

        let mut observations: Vec<Observation> = Vec::new();
        for range in &ranges {
            observations.extend(self.store.observations_in(metric_id, *range)?);
        }

        let summary = summarize(observations.iter().map(|obs| obs.value));
        let rank_result = match rank(metric_id, value, &observations) {
            Ok(result) => result,
            Err(EngineError::InsufficientHistory { .. }) => {
                tracing::debug!(metric_id, window = %key, "window has no observations");
                return Ok(empty_window(key, spec, EmptyReason::NoObservations, ranges));
            }
            Err(err) => return Err(err),
        };
        let min = locate_extreme(&observations, ExtremeDirection::Low);
        let max = locate_extreme(&observations, ExtremeDirection::High);

        match (summary, min, max) {
            (DistributionSummary::Populated(summary), Some(min), Some(max)) => Ok(WindowComparison {
                key,
                spec: spec.clone(),
                outcome: WindowOutcome::Available {
                    ranges,
                    summary,
                    rank: rank_result,
                    min,
                    max,
                },
            }),
            _ => Ok(empty_window(key, spec, EmptyReason::NoObservations, ranges)),
        }
    }
}

fn empty_window(
    key: String,
    spec: &WindowSpec,
    reason: EmptyReason,
    ranges: Vec<DateRange>,
) -> WindowComparison {
    WindowComparison {
        key,
        spec: spec.clone(),
        outcome: WindowOutcome::Empty { reason, ranges },
    }
}

pub(crate) fn primary_window_key(window_specs: &[WindowSpec], significance: &SignificanceConfig) -> String {
    significance
        .window
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(ToOwned::to_owned)
        .or_else(|| window_specs.first().map(WindowSpec::label))
        .unwrap_or_default()
}
