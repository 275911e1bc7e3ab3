use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;

use super::period::{PeriodOfInterest, ReferencePeriod};
use super::significance::SignificanceVerdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DueReason {
    Forced,
    NoData,
    AlreadyPublished,
    ConditionNotMet,
    Due,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DueDecision {
    pub is_due: bool,
    pub reason: DueReason,
    pub regular_due_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct DueCheck<'a> {
    pub period: &'a PeriodOfInterest,
    pub has_data: bool,
    pub last_published: Option<NaiveDate>,
    pub verdict: Option<&'a SignificanceVerdict>,
    pub force: bool,
}

/// Date from which a report for the period is regularly expected.
pub fn regular_due_date(period: &PeriodOfInterest) -> NaiveDate {
    match period.kind {
        ReferencePeriod::Daily
        | ReferencePeriod::Weekly
        | ReferencePeriod::Seasonal
        | ReferencePeriod::Irregular => period.start,
        ReferencePeriod::Monthly => period
            .start
            .checked_add_months(Months::new(1))
            .unwrap_or(period.end),
        ReferencePeriod::Yearly => {
            NaiveDate::from_ymd_opt(period.start.year(), 1, 1).unwrap_or(period.start)
        }
    }
}

/// Decides whether a report should be generated now.
///
/// `force` regenerates regardless of the verdict and of earlier publications,
/// but never without data. Irregular periods ignore earlier publications.
pub fn is_due(check: &DueCheck<'_>) -> DueDecision {
    let regular_due_date = regular_due_date(check.period);
    let decision = |is_due: bool, reason: DueReason| DueDecision {
        is_due,
        reason,
        regular_due_date,
    };

    if !check.has_data {
        return decision(false, DueReason::NoData);
    }
    if check.force {
        return decision(true, DueReason::Forced);
    }
    if let Some(last) = check
        .last_published
        .filter(|_| check.period.kind != ReferencePeriod::Irregular)
    {
        if regular_due_date < last {
            return decision(false, DueReason::AlreadyPublished);
        }
    }
    match check.verdict {
        Some(verdict) if verdict.is_publish_worthy => decision(true, DueReason::Due),
        _ => decision(false, DueReason::ConditionNotMet),
    }
}
