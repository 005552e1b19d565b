use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The month being processed. Source and archive folders are named after it, e.g. `Oct 2026`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Period(NaiveDate);

impl Period {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn today() -> Self {
        Self(Local::now().date_naive())
    }

    /// Uses `as_of` when given, otherwise today.
    pub fn from_option(as_of: Option<NaiveDate>) -> Self {
        as_of.map(Self).unwrap_or_else(Self::today)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// `Mon YYYY`, e.g. `Oct 2026`.
    pub fn folder_name(&self) -> String {
        self.0.format("%b %Y").to_string()
    }

    /// `Pmm`, e.g. `P10`.
    pub fn code(&self) -> String {
        format!("P{:02}", self.0.month())
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.folder_name())
    }
}

impl FromStr for Period {
    type Err = chrono::ParseError;

    /// Parses `YYYY-MM-DD`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_names() {
        let period: Period = "2026-10-19".parse().unwrap();
        assert_eq!(period.folder_name(), "Oct 2026");
        assert_eq!(period.code(), "P10");
        assert_eq!(period.to_string(), "Oct 2026");

        let jan = Period::new(NaiveDate::from_ymd_opt(2027, 1, 2).unwrap());
        assert_eq!(jan.folder_name(), "Jan 2027");
        assert_eq!(jan.code(), "P01");
    }

    #[test]
    fn test_period_parse_error() {
        assert!("October".parse::<Period>().is_err());
    }

    #[test]
    fn test_from_option() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
        assert_eq!(Period::from_option(Some(date)).date(), date);
        assert_eq!(Period::from_option(None), Period::today());
    }
}
