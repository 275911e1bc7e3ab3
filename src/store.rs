use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::EngineResult;
use crate::time::DateRange;

/// One synchronized data point of a metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub metric_id: String,
    pub date: NaiveDate,
    pub value: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub aux: BTreeMap<String, f64>,
}

impl Observation {
    pub fn new(metric_id: impl Into<String>, date: NaiveDate, value: f64) -> Self {
        Self {
            metric_id: metric_id.into(),
            date,
            value,
            aux: BTreeMap::new(),
        }
    }

    pub fn with_aux(mut self, name: impl Into<String>, value: f64) -> Self {
        self.aux.insert(name.into(), value);
        self
    }
}

/// Read path into the time series store.
///
/// Implementations must return observations ordered by date and must be safe
/// to read from several workers at once.
pub trait ObservationStore: Send + Sync {
    /// First and last recorded date of the metric, `None` when it has no data.
    fn history_bounds(&self, metric_id: &str) -> EngineResult<Option<DateRange>>;

    fn observation_on(&self, metric_id: &str, date: NaiveDate) -> EngineResult<Option<Observation>>;

    fn observations_in(&self, metric_id: &str, range: DateRange) -> EngineResult<Vec<Observation>>;
}

/// In-memory store keyed by metric and date.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    series: HashMap<String, BTreeMap<NaiveDate, Observation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an observation. Returns `false` (and keeps the existing row)
    /// when the metric already has a value for that date.
    pub fn insert(&mut self, observation: Observation) -> bool {
        let series = self.series.entry(observation.metric_id.clone()).or_default();
        if series.contains_key(&observation.date) {
            return false;
        }
        series.insert(observation.date, observation);
        true
    }

    pub fn extend<I: IntoIterator<Item = Observation>>(&mut self, observations: I) {
        for observation in observations {
            self.insert(observation);
        }
    }

    pub fn metric_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.series.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.series.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads `metric_id,date,value[,aux...]` rows. Extra numeric columns become
    /// auxiliary fields; blank or unparsable aux cells are dropped.
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("failed to open observations file {}", path.display()))?;
        Self::from_csv_reader(reader)
            .with_context(|| format!("failed to load observations from {}", path.display()))
    }

    pub fn from_csv_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let headers = reader.headers().context("missing CSV header row")?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|header| header.eq_ignore_ascii_case(name))
                .with_context(|| format!("CSV header is missing the {name} column"))
        };
        let metric_col = column("metric_id")?;
        let date_col = column("date")?;
        let value_col = column("value")?;
        let aux_cols: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| ![metric_col, date_col, value_col].contains(idx))
            .map(|(idx, name)| (idx, name.to_string()))
            .collect();

        let mut store = MemoryStore::new();
        let mut skipped = 0usize;
        let mut duplicates = 0usize;
        for (line, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("invalid CSV record {}", line + 2))?;
            let metric_id = record.get(metric_col).unwrap_or_default();
            let date = record.get(date_col).and_then(parse_observation_date);
            let value = record
                .get(value_col)
                .and_then(|raw| raw.parse::<f64>().ok())
                .filter(|value| value.is_finite());
            let (Some(date), Some(value)) = (date, value) else {
                skipped += 1;
                continue;
            };
            if metric_id.is_empty() {
                skipped += 1;
                continue;
            }

            let mut observation = Observation::new(metric_id, date, value);
            for (idx, name) in &aux_cols {
                if let Some(aux) = record
                    .get(*idx)
                    .and_then(|raw| raw.parse::<f64>().ok())
                    .filter(|aux| aux.is_finite())
                {
                    observation.aux.insert(name.clone(), aux);
                }
            }
            if !store.insert(observation) {
                duplicates += 1;
            }
        }

        if skipped > 0 {
            tracing::warn!(skipped, "skipped CSV rows without metric, date or finite value");
        }
        if duplicates > 0 {
            tracing::warn!(duplicates, "ignored duplicate (metric_id, date) rows; first row wins");
        }
        tracing::info!(
            metrics = store.series.len(),
            observations = store.len(),
            "loaded observations"
        );
        Ok(store)
    }
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (its calendar date is used).
fn parse_observation_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|ts| ts.date_naive()))
}

impl ObservationStore for MemoryStore {
    fn history_bounds(&self, metric_id: &str) -> EngineResult<Option<DateRange>> {
        let Some(series) = self.series.get(metric_id) else {
            return Ok(None);
        };
        let first = series.keys().next().copied();
        let last = series.keys().next_back().copied();
        Ok(match (first, last) {
            (Some(first), Some(last)) => DateRange::new(first, last),
            _ => None,
        })
    }

    fn observation_on(&self, metric_id: &str, date: NaiveDate) -> EngineResult<Option<Observation>> {
        Ok(self
            .series
            .get(metric_id)
            .and_then(|series| series.get(&date))
            .cloned())
    }

    fn observations_in(&self, metric_id: &str, range: DateRange) -> EngineResult<Vec<Observation>> {
        Ok(self
            .series
            .get(metric_id)
            .map(|series| series.range(range.start..=range.end).map(|(_, obs)| obs.clone()).collect())
            .unwrap_or_default())
    }
}
