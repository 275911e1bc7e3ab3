use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use super::season::SeasonMapping;
use crate::time::{month_range, previous_month, year_range, DateRange};

/// Granularity of the period a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePeriod {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Seasonal,
    Yearly,
    /// The year before publication, for series without a fixed cadence.
    Irregular,
}

impl ReferencePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferencePeriod::Daily => "daily",
            ReferencePeriod::Weekly => "weekly",
            ReferencePeriod::Monthly => "monthly",
            ReferencePeriod::Seasonal => "seasonal",
            ReferencePeriod::Yearly => "yearly",
            ReferencePeriod::Irregular => "irregular",
        }
    }
}

/// Period a report is generated for, with the calendar facts needed to name it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodOfInterest {
    pub kind: ReferencePeriod,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub year: i32,
    pub month: u32,
    pub season: String,
    pub season_year: i32,
}

impl PeriodOfInterest {
    fn new(kind: ReferencePeriod, range: DateRange, seasons: &SeasonMapping) -> Self {
        Self {
            kind,
            start: range.start,
            end: range.end,
            year: range.start.year(),
            month: range.start.month(),
            season: seasons.label_for(range.start).to_string(),
            season_year: seasons.season_year(range.start),
        }
    }

    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start,
            end: self.end,
        }
    }
}

/// Resolves the period a report published on `published` covers.
///
/// Daily reports cover the most recent day with data when the caller knows it,
/// otherwise the day before publication. Irregular reports cover the year up to
/// the day before publication. All other kinds cover the last complete period
/// before the publication date.
pub fn resolve_period(
    kind: ReferencePeriod,
    published: NaiveDate,
    most_recent_day: Option<NaiveDate>,
    seasons: &SeasonMapping,
) -> Option<PeriodOfInterest> {
    let range = match kind {
        ReferencePeriod::Daily => {
            let day = match most_recent_day {
                Some(day) => day,
                None => published.pred_opt()?,
            };
            DateRange::single(day)
        }
        ReferencePeriod::Weekly => {
            let back = published.weekday().num_days_from_monday() as u64 + 7;
            DateRange::new(published.checked_sub_days(Days::new(back))?, published)?
        }
        ReferencePeriod::Monthly => {
            let (year, month) = previous_month(published.year(), published.month());
            month_range(year, month)?
        }
        ReferencePeriod::Seasonal => seasons.previous_occurrence(published)?.range,
        ReferencePeriod::Yearly => year_range(published.year() - 1)?,
        ReferencePeriod::Irregular => DateRange::new(
            published.checked_sub_months(Months::new(12))?,
            published.pred_opt()?,
        )?,
    };
    Some(PeriodOfInterest::new(kind, range, seasons))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::date;

    #[test]
    fn daily_prefers_most_recent_day() {
        let seasons = SeasonMapping::default();
        let period =
            resolve_period(ReferencePeriod::Daily, date(2024, 3, 10), None, &seasons).expect("period");
        assert_eq!(period.start, date(2024, 3, 9));
        assert_eq!(period.end, date(2024, 3, 9));

        let period = resolve_period(
            ReferencePeriod::Daily,
            date(2024, 3, 10),
            Some(date(2024, 3, 6)),
            &seasons,
        )
        .expect("period");
        assert_eq!(period.start, date(2024, 3, 6));
    }

    #[test]
    fn monthly_in_january_is_previous_december() {
        let seasons = SeasonMapping::default();
        let period =
            resolve_period(ReferencePeriod::Monthly, date(2024, 1, 3), None, &seasons).expect("period");
        assert_eq!(period.start, date(2023, 12, 1));
        assert_eq!(period.end, date(2023, 12, 31));
        assert_eq!(period.season, "winter");
        assert_eq!(period.season_year, 2023);
    }

    #[test]
    fn seasonal_in_march_is_the_winter_across_new_year() {
        let seasons = SeasonMapping::default();
        let period = resolve_period(ReferencePeriod::Seasonal, date(2024, 3, 2), None, &seasons)
            .expect("period");
        assert_eq!(period.start, date(2023, 12, 1));
        assert_eq!(period.end, date(2024, 2, 29));
        assert_eq!(period.season, "winter");
        assert_eq!(period.season_year, 2023);
    }

    #[test]
    fn yearly_is_previous_calendar_year() {
        let seasons = SeasonMapping::default();
        let period =
            resolve_period(ReferencePeriod::Yearly, date(2025, 1, 2), None, &seasons).expect("period");
        assert_eq!(period.start, date(2024, 1, 1));
        assert_eq!(period.end, date(2024, 12, 31));
        assert_eq!(period.year, 2024);
    }

    #[test]
    fn weekly_reaches_back_to_previous_monday() {
        let seasons = SeasonMapping::default();
        // Wednesday
        let period =
            resolve_period(ReferencePeriod::Weekly, date(2024, 5, 15), None, &seasons).expect("period");
        assert_eq!(period.start, date(2024, 5, 6));
        assert_eq!(period.end, date(2024, 5, 15));
    }

    #[test]
    fn irregular_covers_the_year_before_publication() {
        let seasons = SeasonMapping::default();
        let period = resolve_period(ReferencePeriod::Irregular, date(2024, 3, 1), None, &seasons)
            .expect("period");
        assert_eq!(period.start, date(2023, 3, 1));
        assert_eq!(period.end, date(2024, 2, 29));
        assert_eq!(ReferencePeriod::Irregular.as_str(), "irregular");
    }
}
