use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use serde::Serialize;

/// A calendar month in UTC. `end` is the first day of the following month
/// and is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingPeriod {
    pub fn containing(at: DateTime<Utc>) -> Self {
        let date = at.date_naive();
        let start = date - Days::new(u64::from(date.day0()));
        Self {
            start,
            end: start + Months::new(1),
        }
    }

    pub fn next(self) -> Self {
        Self {
            start: self.end,
            end: self.end + Months::new(1),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }
}
