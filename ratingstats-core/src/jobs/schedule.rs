//! Cache regeneration schedule

use chrono::{DateTime, Duration, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// How often the statistics cache is regenerated.
///
/// `manual` disables scheduled regeneration; in that mode saving or deleting
/// a submission invalidates the cache instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    Every3Hours,
    Every6Hours,
    Every12Hours,
    Daily,
    /// Every day at 02:00 local time
    Daily2am,
    TwiceDaily,
    Weekly,
    #[default]
    Manual,
}

impl Schedule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schedule::Every3Hours => "every3hours",
            Schedule::Every6Hours => "every6hours",
            Schedule::Every12Hours => "every12hours",
            Schedule::Daily => "daily",
            Schedule::Daily2am => "daily2am",
            Schedule::TwiceDaily => "twicedaily",
            Schedule::Weekly => "weekly",
            Schedule::Manual => "manual",
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Schedule::Manual)
    }

    /// Delay until the next run, or `None` for `manual`.
    pub fn next_run_delay<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<Duration> {
        match self {
            Schedule::Every3Hours => Some(Duration::hours(3)),
            Schedule::Every6Hours => Some(Duration::hours(6)),
            Schedule::Every12Hours | Schedule::TwiceDaily => Some(Duration::hours(12)),
            Schedule::Daily => Some(Duration::hours(24)),
            Schedule::Weekly => Some(Duration::days(7)),
            Schedule::Daily2am => Some(until_next_2am(now)),
            Schedule::Manual => None,
        }
    }
}

/// Today at 02:00 if it is not yet 02:00, otherwise tomorrow at 02:00.
fn until_next_2am<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let day = if now.hour() < 2 {
        now.date_naive()
    } else {
        now.date_naive() + Duration::days(1)
    };
    let Some(target) = day.and_hms_opt(2, 0, 0) else {
        return Duration::hours(24);
    };

    let tz = now.timezone();
    // 02:00 can fall into a DST gap
    let resolved = tz
        .from_local_datetime(&target)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(target + Duration::hours(1))).earliest());

    match resolved {
        Some(at) => at.signed_duration_since(now.clone()),
        None => Duration::hours(24),
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Schedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "every3hours" => Ok(Schedule::Every3Hours),
            "every6hours" => Ok(Schedule::Every6Hours),
            "every12hours" => Ok(Schedule::Every12Hours),
            "daily" => Ok(Schedule::Daily),
            "daily2am" => Ok(Schedule::Daily2am),
            "twicedaily" => Ok(Schedule::TwiceDaily),
            "weekly" => Ok(Schedule::Weekly),
            "manual" => Ok(Schedule::Manual),
            _ => Err(format!("unknown schedule: {}", s)),
        }
    }
}
