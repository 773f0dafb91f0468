//! Time-of-day handling for the security schedule and the decision of
//! whether the lightweight status poll should run right now.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::macros::format_description;
use time::{OffsetDateTime, Time, UtcOffset};

use crate::reconciler::MergedState;

// ---------------------------------------------------------------------------
// TimeOfDay
// ---------------------------------------------------------------------------

/// Minute-resolution wall-clock time, as the device exchanges it ("HH:MM").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    minutes: u16, // since midnight
}

impl TimeOfDay {
    #[cfg(test)]
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self {
                minutes: hour as u16 * 60 + minute as u16,
            })
        } else {
            None
        }
    }

    pub fn from_time(t: Time) -> Self {
        Self {
            minutes: t.hour() as u16 * 60 + t.minute() as u16,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes / 60, self.minutes % 60)
    }
}

impl FromStr for TimeOfDay {
    type Err = time::error::Parse;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = Time::parse(s.trim(), format_description!("[hour]:[minute]"))?;
        Ok(Self::from_time(t))
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Lenient decoder for device-supplied times: an empty or unparseable value
/// means "no update" instead of failing the whole payload.
pub(crate) fn lenient_time_of_day<'de, D>(deserializer: D) -> Result<Option<TimeOfDay>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| match s.parse() {
        Ok(t) => Some(t),
        Err(e) => {
            if !s.trim().is_empty() {
                tracing::debug!(value = %s, "ignoring malformed time of day: {e}");
            }
            None
        }
    }))
}

/// Current wall-clock time of day at the device's UTC offset.
pub fn time_of_day_now(offset: UtcOffset) -> TimeOfDay {
    TimeOfDay::from_time(OffsetDateTime::now_utc().to_offset(offset).time())
}

// ---------------------------------------------------------------------------
// SecuritySchedule
// ---------------------------------------------------------------------------

/// Daily window during which automatic security monitoring is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySchedule {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl SecuritySchedule {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    /// Whether `now` falls inside `[start, end)`. A window with
    /// `start >= end` wraps past midnight; `start == end` covers the whole day.
    pub fn contains(&self, now: TimeOfDay) -> bool {
        if self.start < self.end {
            now >= self.start && now < self.end
        } else {
            now >= self.start || now < self.end
        }
    }
}

// ---------------------------------------------------------------------------
// Status polling decision
// ---------------------------------------------------------------------------

/// Decide whether the status poll should run at `now`.
///
/// Luminary auto mode always polls so automatic light changes show up.
/// Otherwise polling only happens while security auto mode is on and `now`
/// is inside the schedule window. Without a view there is nothing to merge
/// into, so there is no reason to poll either.
pub fn should_poll_status(
    view: Option<&MergedState>,
    now: TimeOfDay,
    schedule: Option<&SecuritySchedule>,
) -> bool {
    let Some(view) = view else {
        return false;
    };
    if view.auto_modes.luminary {
        return true;
    }
    if !view.auto_modes.security {
        return false;
    }
    schedule.is_some_and(|s| s.contains(now))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::AutoModes;

    fn tod(h: u8, m: u8) -> TimeOfDay {
        TimeOfDay::new(h, m).unwrap()
    }

    fn view_with(security: bool, luminary: bool) -> MergedState {
        MergedState {
            auto_modes: AutoModes {
                security,
                luminary,
                ..AutoModes::default()
            },
            ..MergedState::default()
        }
    }

    // -- TimeOfDay ----------------------------------------------------------

    #[test]
    fn parse_and_display_round_trip() {
        let t: TimeOfDay = "07:05".parse().unwrap();
        assert_eq!(t, tod(7, 5));
        assert_eq!(t.to_string(), "07:05");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("25:00".parse::<TimeOfDay>().is_err());
        assert!("".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn new_rejects_out_of_range() {
        assert!(TimeOfDay::new(24, 0).is_none());
        assert!(TimeOfDay::new(23, 60).is_none());
        assert!(TimeOfDay::new(23, 59).is_some());
    }

    #[test]
    fn serializes_as_hh_mm_string() {
        let json = serde_json::to_string(&tod(22, 0)).unwrap();
        assert_eq!(json, "\"22:00\"");
    }

    // -- SecuritySchedule ---------------------------------------------------

    #[test]
    fn day_window_contains() {
        let s = SecuritySchedule::new(tod(8, 0), tod(20, 0));
        assert!(s.contains(tod(8, 0)));
        assert!(s.contains(tod(12, 0)));
        assert!(!s.contains(tod(20, 0)));
        assert!(!s.contains(tod(21, 0)));
        assert!(!s.contains(tod(7, 59)));
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let s = SecuritySchedule::new(tod(22, 0), tod(6, 0));
        assert!(s.contains(tod(23, 30)));
        assert!(s.contains(tod(0, 0)));
        assert!(s.contains(tod(5, 59)));
        assert!(!s.contains(tod(6, 0)));
        assert!(!s.contains(tod(7, 0)));
        assert!(!s.contains(tod(21, 59)));
    }

    #[test]
    fn equal_bounds_cover_whole_day() {
        let s = SecuritySchedule::new(tod(9, 0), tod(9, 0));
        assert!(s.contains(tod(3, 0)));
        assert!(s.contains(tod(9, 0)));
    }

    // -- should_poll_status -------------------------------------------------

    #[test]
    fn security_auto_inside_day_window_polls() {
        let view = view_with(true, false);
        let s = SecuritySchedule::new(tod(8, 0), tod(20, 0));
        assert!(should_poll_status(Some(&view), tod(12, 0), Some(&s)));
        assert!(!should_poll_status(Some(&view), tod(21, 0), Some(&s)));
    }

    #[test]
    fn security_auto_overnight_window() {
        let view = view_with(true, false);
        let s = SecuritySchedule::new(tod(22, 0), tod(6, 0));
        assert!(should_poll_status(Some(&view), tod(23, 30), Some(&s)));
        assert!(!should_poll_status(Some(&view), tod(7, 0), Some(&s)));
    }

    #[test]
    fn luminary_auto_overrides_schedule() {
        let view = view_with(false, true);
        let s = SecuritySchedule::new(tod(8, 0), tod(20, 0));
        assert!(should_poll_status(Some(&view), tod(21, 0), Some(&s)));
        assert!(should_poll_status(Some(&view), tod(21, 0), None));
    }

    #[test]
    fn security_auto_off_does_not_poll() {
        let view = view_with(false, false);
        let s = SecuritySchedule::new(tod(8, 0), tod(20, 0));
        assert!(!should_poll_status(Some(&view), tod(12, 0), Some(&s)));
    }

    #[test]
    fn missing_schedule_does_not_poll() {
        let view = view_with(true, false);
        assert!(!should_poll_status(Some(&view), tod(12, 0), None));
    }

    #[test]
    fn no_view_does_not_poll() {
        assert!(!should_poll_status(None, tod(12, 0), None));
    }
}
