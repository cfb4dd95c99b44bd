use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime};

/// The club runs on a fixed civil timezone (UTC-5, no daylight saving).
pub fn club_offset() -> FixedOffset {
    FixedOffset::west_opt(5 * 3600).expect("UTC-5 is a valid fixed offset")
}

fn at_civil_time(date: NaiveDate, time: NaiveTime) -> DateTime<FixedOffset> {
    date.and_time(time)
        .and_local_timezone(club_offset())
        .single()
        .expect("fixed offsets have no gaps or folds")
}

fn end_of_day(date: NaiveDate) -> DateTime<FixedOffset> {
    at_civil_time(
        date,
        NaiveTime::from_hms_opt(23, 59, 59).expect("valid wall time"),
    )
}

/// Monday 00:00:00 through Sunday 23:59:59 in club-local civil time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilWeek {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl CivilWeek {
    /// The civil week enclosing `now`.
    pub fn containing(now: DateTime<FixedOffset>) -> Self {
        let local = now.with_timezone(&club_offset());
        let date = local.date_naive();
        let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
        let sunday = monday + Duration::days(6);

        Self {
            start: at_civil_time(monday, NaiveTime::MIN),
            end: end_of_day(sunday),
        }
    }

    pub fn contains(&self, instant: DateTime<FixedOffset>) -> bool {
        self.start <= instant && instant <= self.end
    }

    /// Friday 12:00:00 of this week: the last instant at which a fine
    /// submission can still substitute for a missed training.
    pub fn fine_deadline(&self) -> DateTime<FixedOffset> {
        let friday = self.start.date_naive() + Duration::days(4);
        at_civil_time(
            friday,
            NaiveTime::from_hms_opt(12, 0, 0).expect("valid wall time"),
        )
    }
}

/// The three instants that tier late monthly payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthCutoffs {
    /// Day 5, 23:59:59.
    pub day5: DateTime<FixedOffset>,
    /// Day 10, 23:59:59.
    pub day10: DateTime<FixedOffset>,
    /// Last calendar day of the month, 23:59:59.
    pub end_of_month: DateTime<FixedOffset>,
}

impl MonthCutoffs {
    pub fn for_month(year: i32, month: u32) -> Option<Self> {
        let day5 = NaiveDate::from_ymd_opt(year, month, 5)?;
        let day10 = NaiveDate::from_ymd_opt(year, month, 10)?;
        let last_day = last_day_of_month(year, month)?;

        Some(Self {
            day5: end_of_day(day5),
            day10: end_of_day(day10),
            end_of_month: end_of_day(last_day),
        })
    }
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(first_of_next - Duration::days(1))
}
