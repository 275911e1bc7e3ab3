use chrono::{Days, NaiveDate};

use crate::store::{MemoryStore, Observation};

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
}

/// One observation per consecutive day starting at `start`.
pub fn daily_series(metric_id: &str, start: NaiveDate, values: &[f64]) -> Vec<Observation> {
    values
        .iter()
        .enumerate()
        .map(|(offset, value)| {
            let day = start
                .checked_add_days(Days::new(offset as u64))
                .expect("date in range");
            Observation::new(metric_id, day, *value)
        })
        .collect()
}

pub fn store_with(observations: Vec<Observation>) -> MemoryStore {
    let mut store = MemoryStore::new();
    store.extend(observations);
    store
}
