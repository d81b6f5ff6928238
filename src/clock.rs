// =============================================================================
// Clock, market calendar and trigger specs
// =============================================================================
//
// All wall-clock reads in the engine go through the `Clock` trait so tests
// can drive virtual time. The calendar classifies instants against the
// exchange session (NSE: 09:15-15:30 IST, Monday-Friday) and trigger specs
// compute their next fire instant in the exchange's civil timezone.
// =============================================================================

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of the current instant. The only component allowed to touch the
/// system clock is `SystemClock`; everything else receives a `Clock`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ---------------------------------------------------------------------------
// Market calendar
// ---------------------------------------------------------------------------

/// Exchange session calendar: civil timezone plus daily open/close bounds.
///
/// Weekends are non-trading days. Exchange holidays are not modelled; a
/// missed session simply produces an empty scan.
#[derive(Debug, Clone)]
pub struct MarketCalendar {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
}

impl MarketCalendar {
    pub fn new(tz: Tz, open: NaiveTime, close: NaiveTime) -> Self {
        Self { tz, open, close }
    }

    /// NSE cash session: 09:15-15:30 IST.
    pub fn nse() -> Self {
        Self::new(
            chrono_tz::Asia::Kolkata,
            NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        )
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    fn localise(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        // IST has no DST; `single()` only fails on zones with gaps, where the
        // earliest valid mapping is the sane choice for a schedule.
        self.tz
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .expect("local time not representable in exchange timezone")
            .with_timezone(&Utc)
    }

    /// Session open/close for a civil `day`, or `None` on non-trading days.
    pub fn session_bounds(&self, day: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if !self.is_trading_day(day) {
            return None;
        }
        Some((self.localise(day, self.open), self.localise(day, self.close)))
    }

    /// Whether `ts` falls inside a trading session (inclusive bounds).
    pub fn in_session(&self, ts: DateTime<Utc>) -> bool {
        let local_day = ts.with_timezone(&self.tz).date_naive();
        match self.session_bounds(local_day) {
            Some((open, close)) => ts >= open && ts <= close,
            None => false,
        }
    }

    fn next_trading_day(&self, mut date: NaiveDate) -> NaiveDate {
        loop {
            date = date.succ_opt().expect("date overflow");
            if self.is_trading_day(date) {
                return date;
            }
        }
    }

    /// Civil date of `ts` in the exchange timezone.
    pub fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.tz).date_naive()
    }
}

// ---------------------------------------------------------------------------
// Trigger specs
// ---------------------------------------------------------------------------

/// A cron-like schedule, interpreted in the exchange's civil timezone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Every `minutes` minutes during the session, anchored at session open.
    Every { minutes: u32 },
    /// At fixed civil times on each trading day.
    DailyAt { times: Vec<NaiveTime> },
    /// Once per trading day, `minutes` after session close.
    AfterClose { minutes: u32 },
}

impl TriggerSpec {
    /// The first fire instant strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>, calendar: &MarketCalendar) -> DateTime<Utc> {
        let mut day = calendar.local_date(after);
        if !calendar.is_trading_day(day) {
            day = calendar.next_trading_day(day);
        }
        // Two iterations always suffice: today (possibly exhausted) and the
        // next trading day (fresh, so its first slot qualifies).
        loop {
            if let Some(at) = self.next_fire_on(day, after, calendar) {
                return at;
            }
            day = calendar.next_trading_day(day);
        }
    }

    fn next_fire_on(
        &self,
        day: NaiveDate,
        after: DateTime<Utc>,
        calendar: &MarketCalendar,
    ) -> Option<DateTime<Utc>> {
        let (open, close) = calendar.session_bounds(day)?;
        match self {
            Self::Every { minutes } => {
                let step = Duration::minutes((*minutes).max(1) as i64);
                let mut at = open;
                while at <= close {
                    if at > after {
                        return Some(at);
                    }
                    at += step;
                }
                None
            }
            Self::DailyAt { times } => {
                let mut sorted = times.clone();
                sorted.sort();
                sorted
                    .into_iter()
                    .map(|t| calendar.localise(day, t))
                    .find(|at| *at > after)
            }
            Self::AfterClose { minutes } => {
                let at = close + Duration::minutes(*minutes as i64);
                (at > after).then_some(at)
            }
        }
    }
}
