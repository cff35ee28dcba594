//! Trading Calendars
//!
//! Schedules of core trading sessions per day, always reported in UTC.
//! Equities follow the NYSE calendar, crypto trades around the clock.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{NeuralError, Result};

/// Calendars understood by the framework
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalendarType {
    #[serde(rename = "NYSE")]
    NewYorkStockExchange,
    #[serde(rename = "24/7")]
    TwentyFourSeven,
    #[serde(rename = "24/5")]
    TwentyFourFive,
}

impl CalendarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewYorkStockExchange => "NYSE",
            Self::TwentyFourSeven => "24/7",
            Self::TwentyFourFive => "24/5",
        }
    }

    /// Build the calendar implementation for this type
    pub fn calendar(&self) -> Box<dyn Calendar> {
        match self {
            Self::NewYorkStockExchange => Box::new(NyseCalendar),
            Self::TwentyFourSeven => Box::new(RoundTheClockCalendar { weekends: true }),
            Self::TwentyFourFive => Box::new(RoundTheClockCalendar { weekends: false }),
        }
    }
}

impl std::fmt::Display for CalendarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CalendarType {
    type Err = NeuralError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NYSE" => Ok(Self::NewYorkStockExchange),
            "24/7" => Ok(Self::TwentyFourSeven),
            "24/5" => Ok(Self::TwentyFourFive),
            other => Err(NeuralError::validation(format!(
                "unknown calendar '{}'; expected NYSE|24/7|24/5",
                other
            ))),
        }
    }
}

/// One trading day: core session open and close in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Session {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// A trading calendar. Implement this for markets not covered here.
pub trait Calendar: Send + Sync {
    fn calendar_type(&self) -> CalendarType;

    /// Sessions for every trading day in `[start_date, end_date]`
    fn schedule(&self, start_date: NaiveDate, end_date: NaiveDate) -> Vec<Session>;
}

/// 24/7 and 24/5 markets: sessions span whole UTC days
#[derive(Debug, Clone, Copy)]
pub struct RoundTheClockCalendar {
    weekends: bool,
}

impl Calendar for RoundTheClockCalendar {
    fn calendar_type(&self) -> CalendarType {
        if self.weekends {
            CalendarType::TwentyFourSeven
        } else {
            CalendarType::TwentyFourFive
        }
    }

    fn schedule(&self, start_date: NaiveDate, end_date: NaiveDate) -> Vec<Session> {
        days(start_date, end_date)
            .filter(|date| self.weekends || !is_weekend(*date))
            .map(|date| {
                let start = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
                Session {
                    date,
                    start,
                    end: start + Duration::days(1),
                }
            })
            .collect()
    }
}

/// New York Stock Exchange core hours (09:30-16:00 America/New_York)
#[derive(Debug, Clone, Copy)]
pub struct NyseCalendar;

impl NyseCalendar {
    const OPEN: (u32, u32) = (9, 30);
    const CLOSE: (u32, u32) = (16, 0);
    const EARLY_CLOSE: (u32, u32) = (13, 0);

    pub fn is_trading_day(date: NaiveDate) -> bool {
        !is_weekend(date) && !nyse_holidays(date.year()).contains(&date)
    }

    pub fn is_early_close(date: NaiveDate) -> bool {
        let year = date.year();
        let before_independence = NaiveDate::from_ymd_opt(year, 7, 3);
        let christmas_eve = NaiveDate::from_ymd_opt(year, 12, 24);
        let after_thanksgiving =
            nth_weekday(year, 11, Weekday::Thu, 4).map(|d| d + Duration::days(1));

        Self::is_trading_day(date)
            && (special_dates(SPECIAL_EARLY_CLOSES, year).any(|d| d == date)
                || Some(date) == after_thanksgiving
                || (Some(date) == before_independence && date.weekday() != Weekday::Fri)
                || (Some(date) == christmas_eve && date.weekday() != Weekday::Fri))
    }
}

impl Calendar for NyseCalendar {
    fn calendar_type(&self) -> CalendarType {
        CalendarType::NewYorkStockExchange
    }

    fn schedule(&self, start_date: NaiveDate, end_date: NaiveDate) -> Vec<Session> {
        days(start_date, end_date)
            .filter(|date| Self::is_trading_day(*date))
            .filter_map(|date| {
                let close = if Self::is_early_close(date) {
                    Self::EARLY_CLOSE
                } else {
                    Self::CLOSE
                };
                Some(Session {
                    date,
                    start: new_york_to_utc(date, Self::OPEN)?,
                    end: new_york_to_utc(date, close)?,
                })
            })
            .collect()
    }
}

fn new_york_to_utc(date: NaiveDate, (hour, minute): (u32, u32)) -> Option<DateTime<Utc>> {
    let local = date.and_hms_opt(hour, minute, 0)?;
    New_York
        .from_local_datetime(&local)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

fn days(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// n-th (1-based) given weekday of a month
fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n as u8)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let mut day = next_month.pred_opt()?;
    while day.weekday() != weekday {
        day = day.pred_opt()?;
    }
    Some(day)
}

/// Anonymous Gregorian algorithm
fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

/// Saturday holidays move to Friday, Sunday holidays to Monday
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

/// Unscheduled full-day closures (days of mourning and emergencies)
const SPECIAL_CLOSURES: &[(i32, u32, u32)] = &[
    (2001, 9, 11),
    (2001, 9, 12),
    (2001, 9, 13),
    (2001, 9, 14),
    (2004, 6, 11),
    (2007, 1, 2),
    (2012, 10, 29),
    (2012, 10, 30),
    (2018, 12, 5),
    (2025, 1, 9),
];

/// Unscheduled 13:00 closes
const SPECIAL_EARLY_CLOSES: &[(i32, u32, u32)] = &[(2002, 7, 5)];

fn special_dates(table: &'static [(i32, u32, u32)], year: i32) -> impl Iterator<Item = NaiveDate> {
    table
        .iter()
        .filter(move |(y, _, _)| *y == year)
        .filter_map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
}

/// Full-day NYSE closures for a year
pub fn nyse_holidays(year: i32) -> Vec<NaiveDate> {
    let mut holidays = Vec::with_capacity(10);

    // New Year's Day on a Saturday is not observed on the prior Friday
    if let Some(new_year) = NaiveDate::from_ymd_opt(year, 1, 1) {
        if new_year.weekday() != Weekday::Sat {
            holidays.push(observed(new_year));
        }
    }

    holidays.extend(nth_weekday(year, 1, Weekday::Mon, 3));
    holidays.extend(nth_weekday(year, 2, Weekday::Mon, 3));
    holidays.extend(easter_sunday(year).map(|d| d - Duration::days(2)));
    holidays.extend(last_weekday(year, 5, Weekday::Mon));
    if year >= 2022 {
        holidays.extend(NaiveDate::from_ymd_opt(year, 6, 19).map(observed));
    }
    holidays.extend(NaiveDate::from_ymd_opt(year, 7, 4).map(observed));
    holidays.extend(nth_weekday(year, 9, Weekday::Mon, 1));
    holidays.extend(nth_weekday(year, 11, Weekday::Thu, 4));
    holidays.extend(NaiveDate::from_ymd_opt(year, 12, 25).map(observed));
    holidays.extend(special_dates(SPECIAL_CLOSURES, year));

    holidays
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn nyse_skips_weekends_and_holidays() {
        // 2022-01-01 is a Saturday and not observed; 2022-01-17 is MLK day
        let sessions = NyseCalendar.schedule(date(2022, 1, 1), date(2022, 1, 17));
        let dates: Vec<_> = sessions.iter().map(|s| s.date).collect();

        assert_eq!(dates.first(), Some(&date(2022, 1, 3)));
        assert!(!dates.contains(&date(2022, 1, 17)));
        assert!(!dates.contains(&date(2022, 1, 8)));
        assert_eq!(dates.len(), 10);
    }

    #[test]
    fn nyse_session_is_dst_aware() {
        let winter = NyseCalendar.schedule(date(2022, 1, 3), date(2022, 1, 3));
        assert_eq!(winter[0].start.to_rfc3339(), "2022-01-03T14:30:00+00:00");
        assert_eq!(winter[0].end.to_rfc3339(), "2022-01-03T21:00:00+00:00");

        let summer = NyseCalendar.schedule(date(2022, 6, 1), date(2022, 6, 1));
        assert_eq!(summer[0].start.to_rfc3339(), "2022-06-01T13:30:00+00:00");
    }

    #[test]
    fn nyse_early_close_after_thanksgiving() {
        let sessions = NyseCalendar.schedule(date(2023, 11, 24), date(2023, 11, 24));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].duration(), Duration::minutes(210));
    }

    #[test]
    fn nyse_early_closes_before_independence_day_and_christmas() {
        // 2023-07-03 is a Monday, 2018-12-24 a Monday
        for day in [date(2023, 7, 3), date(2018, 12, 24), date(2002, 7, 5)] {
            let sessions = NyseCalendar.schedule(day, day);
            assert_eq!(sessions.len(), 1, "{}", day);
            assert_eq!(sessions[0].duration(), Duration::minutes(210), "{}", day);
        }

        // July 3 on a Friday is the observed holiday itself
        assert!(NyseCalendar.schedule(date(2020, 7, 3), date(2020, 7, 3)).is_empty());
        assert!(!NyseCalendar::is_early_close(date(2020, 7, 2)));
    }

    #[test]
    fn saturday_holidays_are_observed_on_friday() {
        // 2020-07-04 and 2021-12-25 fall on Saturdays
        assert!(!NyseCalendar::is_trading_day(date(2020, 7, 3)));
        assert!(!NyseCalendar::is_trading_day(date(2021, 12, 24)));
        assert!(NyseCalendar::is_trading_day(date(2021, 12, 27)));
        // and Sunday ones on Monday
        assert!(!NyseCalendar::is_trading_day(date(2022, 12, 26)));
    }

    #[test]
    fn juneteenth_starts_in_2022() {
        assert!(NyseCalendar::is_trading_day(date(2021, 6, 18)));
        // 2022-06-19 is a Sunday
        assert!(!NyseCalendar::is_trading_day(date(2022, 6, 20)));
        assert!(!NyseCalendar::is_trading_day(date(2023, 6, 19)));
    }

    #[test]
    fn unscheduled_closures_have_no_session() {
        for day in [
            date(2025, 1, 9),
            date(2018, 12, 5),
            date(2012, 10, 29),
            date(2012, 10, 30),
            date(2007, 1, 2),
        ] {
            assert!(NyseCalendar.schedule(day, day).is_empty(), "{}", day);
        }
        let week = NyseCalendar.schedule(date(2025, 1, 6), date(2025, 1, 10));
        assert_eq!(week.len(), 4);
    }

    #[test]
    fn good_friday_is_a_holiday() {
        assert!(nyse_holidays(2024).contains(&date(2024, 3, 29)));
        assert!(nyse_holidays(2023).contains(&date(2023, 4, 7)));
    }

    #[test]
    fn twenty_four_five_drops_weekends() {
        let cal = CalendarType::TwentyFourFive.calendar();
        let sessions = cal.schedule(date(2022, 1, 3), date(2022, 1, 9));
        assert_eq!(sessions.len(), 5);
        assert_eq!(sessions[0].duration(), Duration::days(1));

        let cal = CalendarType::TwentyFourSeven.calendar();
        assert_eq!(cal.schedule(date(2022, 1, 3), date(2022, 1, 9)).len(), 7);
    }

    #[test]
    fn calendar_type_parses() {
        assert_eq!(
            "nyse".parse::<CalendarType>().unwrap(),
            CalendarType::NewYorkStockExchange
        );
        assert!("LSE".parse::<CalendarType>().is_err());
    }
}
