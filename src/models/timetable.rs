use serde::{Deserialize, Serialize};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use super::user::TimetableElement;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub id: i64,
    pub start_date_time: NaiveDateTime,
    pub end_date_time: NaiveDateTime,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub rooms: Vec<String>,
    #[serde(default)]
    pub is_cancelled: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Timetable {
    pub user_id: i64,
    pub element: TimetableElement,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub periods: Vec<Period>,
    pub fetched_at: DateTime<Utc>,
}

impl Timetable {
    /// Periods taking place on `date` that were not cancelled, ordered by start.
    pub fn active_periods_on(&self, date: NaiveDate) -> Vec<&Period> {
        let mut periods: Vec<&Period> = self
            .periods
            .iter()
            .filter(|p| !p.is_cancelled && p.start_date_time.date() == date)
            .collect();
        periods.sort_by_key(|p| p.start_date_time);
        periods
    }
}
