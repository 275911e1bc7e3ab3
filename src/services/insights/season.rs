use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{EngineError, EngineResult};
use crate::time::{first_of_month, last_of_month, next_month, previous_month, DateRange};

/// Month → season label mapping. Every calendar month has exactly one label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonMapping {
    labels: [String; 12],
}

/// One run of consecutive months sharing a season label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeasonOccurrence {
    pub label: String,
    pub season_year: i32,
    pub range: DateRange,
}

impl Default for SeasonMapping {
    /// Meteorological seasons.
    fn default() -> Self {
        let label = |month: u32| match month {
            12 | 1 | 2 => "winter",
            3..=5 => "spring",
            6..=8 => "summer",
            _ => "fall",
        };
        Self {
            labels: std::array::from_fn(|idx| label(idx as u32 + 1).to_string()),
        }
    }
}

impl SeasonMapping {
    /// Builds a mapping from `label -> months` groups as written in config.
    pub fn from_groups(groups: &BTreeMap<String, Vec<u32>>) -> EngineResult<Self> {
        let mut slots: [Option<String>; 12] = Default::default();
        for (label, months) in groups {
            let label = label.trim();
            if label.is_empty() {
                return Err(EngineError::invalid_window("season label must not be blank"));
            }
            for month in months {
                if !(1..=12).contains(month) {
                    return Err(EngineError::invalid_window(format!(
                        "season {label} lists invalid month {month}"
                    )));
                }
                let slot = &mut slots[(*month - 1) as usize];
                if let Some(existing) = slot {
                    return Err(EngineError::invalid_window(format!(
                        "month {month} is mapped to both {existing} and {label}"
                    )));
                }
                *slot = Some(label.to_string());
            }
        }

        let missing: Vec<String> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(idx, _)| (idx + 1).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::invalid_window(format!(
                "season mapping does not cover month(s) {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            labels: slots.map(Option::unwrap_or_default),
        })
    }

    pub fn label_for_month(&self, month: u32) -> &str {
        let idx = (month.clamp(1, 12) - 1) as usize;
        &self.labels[idx]
    }

    pub fn label_for(&self, day: NaiveDate) -> &str {
        self.label_for_month(day.month())
    }

    fn same_label(&self, a: u32, b: u32) -> bool {
        self.label_for_month(a) == self.label_for_month(b)
    }

    /// First month `(year, month)` of the season occurrence containing the month.
    fn run_start(&self, year: i32, month: u32) -> (i32, u32) {
        let (mut y, mut m) = (year, month);
        for _ in 0..11 {
            let (py, pm) = previous_month(y, m);
            if !self.same_label(pm, month) {
                return (y, m);
            }
            y = py;
            m = pm;
        }
        // Single label for the whole year: occurrences follow calendar years.
        (year, 1)
    }

    /// Last month `(year, month)` of the occurrence starting at `(year, month)`.
    fn run_end(&self, year: i32, month: u32) -> (i32, u32) {
        let (mut y, mut m) = (year, month);
        for _ in 0..11 {
            let (ny, nm) = next_month(y, m);
            if !self.same_label(nm, month) {
                break;
            }
            y = ny;
            m = nm;
        }
        (y, m)
    }

    /// Season occurrence that contains `day`.
    pub fn occurrence_containing(&self, day: NaiveDate) -> Option<SeasonOccurrence> {
        let (start_year, start_month) = self.run_start(day.year(), day.month());
        self.occurrence_starting(start_year, start_month)
    }

    fn occurrence_starting(&self, year: i32, month: u32) -> Option<SeasonOccurrence> {
        let (end_year, end_month) = self.run_end(year, month);
        Some(SeasonOccurrence {
            label: self.label_for_month(month).to_string(),
            season_year: year,
            range: DateRange::new(
                first_of_month(year, month)?,
                last_of_month(end_year, end_month)?,
            )?,
        })
    }

    /// Occurrence immediately before the one containing `day`.
    pub fn previous_occurrence(&self, day: NaiveDate) -> Option<SeasonOccurrence> {
        let current = self.occurrence_containing(day)?;
        self.occurrence_containing(current.range.start.pred_opt()?)
    }

    pub fn season_year(&self, day: NaiveDate) -> i32 {
        self.run_start(day.year(), day.month()).0
    }

    /// All occurrences of `label` overlapping `bounds`, each clipped to it,
    /// in chronological order.
    pub fn occurrences_within(&self, label: &str, bounds: DateRange) -> Vec<SeasonOccurrence> {
        let mut out = Vec::new();
        let Some(mut cursor) = self.occurrence_containing(bounds.start) else {
            return out;
        };
        while cursor.range.start <= bounds.end {
            if cursor.label == label {
                if let Some(range) = cursor.range.clip(&bounds) {
                    out.push(SeasonOccurrence {
                        range,
                        ..cursor.clone()
                    });
                }
            }
            let Some(next_start) = cursor.range.end.succ_opt() else {
                break;
            };
            let Some(next) = self.occurrence_starting(next_start.year(), next_start.month()) else {
                break;
            };
            cursor = next;
        }
        out
    }
}
