use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::season::SeasonMapping;
use crate::error::{EngineError, EngineResult};
use crate::time::{days_before, month_range, DateRange};

const MIN_SINCE_YEAR: i32 = 1;
const MAX_SINCE_YEAR: i32 = 9999;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowKind {
    TrailingDays {
        days: i64,
    },
    CurrentSeason,
    YearToDate,
    SinceYear {
        year: i32,
        #[serde(default)]
        month_locked: bool,
    },
    AllTime {
        #[serde(default)]
        month_locked: bool,
    },
}

/// A configured comparison window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(flatten)]
    pub kind: WindowKind,
}

impl WindowSpec {
    pub fn new(kind: WindowKind) -> Self {
        Self { key: None, kind }
    }

    pub fn keyed(key: impl Into<String>, kind: WindowKind) -> Self {
        Self {
            key: Some(key.into()),
            kind,
        }
    }

    pub fn trailing_days(days: i64) -> Self {
        Self::new(WindowKind::TrailingDays { days })
    }

    pub fn since_year(year: i32, month_locked: bool) -> Self {
        Self::new(WindowKind::SinceYear { year, month_locked })
    }

    pub fn all_time(month_locked: bool) -> Self {
        Self::new(WindowKind::AllTime { month_locked })
    }

    /// Name of the window in reports; derived from the kind when not configured.
    pub fn label(&self) -> String {
        if let Some(key) = self.key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            return key.to_string();
        }
        match &self.kind {
            WindowKind::TrailingDays { days } => format!("trailing_{days}_days"),
            WindowKind::CurrentSeason => "current_season".to_string(),
            WindowKind::YearToDate => "year_to_date".to_string(),
            WindowKind::SinceYear {
                year,
                month_locked: false,
            } => format!("since_{year}"),
            WindowKind::SinceYear {
                year,
                month_locked: true,
            } => format!("since_{year}_same_month"),
            WindowKind::AllTime {
                month_locked: false,
            } => "all_time".to_string(),
            WindowKind::AllTime { month_locked: true } => "all_time_same_month".to_string(),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        match &self.kind {
            WindowKind::TrailingDays { days } => {
                if *days < 1 {
                    return Err(EngineError::invalid_window(format!(
                        "{}: trailing_days.days must be >= 1 (got {days})",
                        self.label()
                    )));
                }
            }
            WindowKind::SinceYear { year, .. } => {
                if !(MIN_SINCE_YEAR..=MAX_SINCE_YEAR).contains(year) {
                    return Err(EngineError::invalid_window(format!(
                        "{}: since_year.year must be within {MIN_SINCE_YEAR}..={MAX_SINCE_YEAR}",
                        self.label()
                    )));
                }
            }
            WindowKind::CurrentSeason | WindowKind::YearToDate | WindowKind::AllTime { .. } => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    /// The metric has no recorded observations at all.
    NoHistory,
    /// The window lies before the first or outside the recorded history.
    OutsideHistory,
    /// The window resolved to dates without any observation (data gap).
    NoObservations,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowResolution {
    /// Disjoint, chronologically ordered, non-empty ranges.
    Ranges(Vec<DateRange>),
    Empty(EmptyReason),
}

impl WindowResolution {
    fn from_ranges(ranges: Vec<DateRange>) -> Self {
        if ranges.is_empty() {
            Self::Empty(EmptyReason::OutsideHistory)
        } else {
            Self::Ranges(ranges)
        }
    }
}

/// Resolves a window against the anchor date. The anchor date itself is never
/// part of a window.
pub fn resolve(
    spec: &WindowSpec,
    anchor: NaiveDate,
    seasons: &SeasonMapping,
    history: Option<DateRange>,
) -> WindowResolution {
    let Some(history) = history else {
        return WindowResolution::Empty(EmptyReason::NoHistory);
    };
    let Some(yesterday) = anchor.pred_opt() else {
        return WindowResolution::Empty(EmptyReason::OutsideHistory);
    };
    // Everything before the anchor that is also inside recorded history.
    let Some(available) = DateRange::new(history.start, yesterday.min(history.end)) else {
        return WindowResolution::Empty(EmptyReason::OutsideHistory);
    };

    let ranges = match &spec.kind {
        WindowKind::TrailingDays { days } => {
            let days = (*days).max(1) as u64;
            days_before(anchor, days)
                .and_then(|start| DateRange::new(start, yesterday))
                .and_then(|range| range.clip(&available))
                .into_iter()
                .collect()
        }
        WindowKind::CurrentSeason => {
            let label = seasons.label_for(anchor);
            seasons
                .occurrences_within(label, available)
                .into_iter()
                .map(|occurrence| occurrence.range)
                .collect()
        }
        WindowKind::YearToDate => NaiveDate::from_ymd_opt(anchor.year(), 1, 1)
            .and_then(|start| DateRange::new(start, yesterday))
            .and_then(|range| range.clip(&available))
            .into_iter()
            .collect(),
        WindowKind::SinceYear { year, month_locked } => {
            if history.start.year() > *year {
                return WindowResolution::Empty(EmptyReason::OutsideHistory);
            }
            let Some(start) = NaiveDate::from_ymd_opt(*year, 1, 1) else {
                return WindowResolution::Empty(EmptyReason::OutsideHistory);
            };
            let Some(bounds) = DateRange::new(start, yesterday).and_then(|r| r.clip(&available))
            else {
                return WindowResolution::Empty(EmptyReason::OutsideHistory);
            };
            if *month_locked {
                same_month_ranges(anchor.month(), bounds)
            } else {
                vec![bounds]
            }
        }
        WindowKind::AllTime { month_locked } => {
            if *month_locked {
                same_month_ranges(anchor.month(), available)
            } else {
                vec![available]
            }
        }
    };

    WindowResolution::from_ranges(ranges)
}

/// The given calendar month of every year inside `bounds`, clipped to it.
fn same_month_ranges(month: u32, bounds: DateRange) -> Vec<DateRange> {
    (bounds.start.year()..=bounds.end.year())
        .filter_map(|year| month_range(year, month))
        .filter_map(|range| range.clip(&bounds))
        .collect()
}
