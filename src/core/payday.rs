//! Payday and streak calculation.
//!
//! A user's pay schedule decides when contributions are expected. Streaks count
//! consecutive paydays that received at least one contribution inside the
//! payday's window `[payday - 1 day, payday + window_days]`.
//!
//! [`compute_streak`] is a pure function of the schedule and the contribution
//! history. It keeps no incremental state, so a streak can always be rebuilt
//! from the ledger alone.

use crate::{
    config::settings::DEFAULT_STREAK_WINDOW_DAYS,
    entities::{PaydaySetting, payday_setting, payday_setting::ScheduleKind},
    errors::{Error, Result},
};
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use sea_orm::{Set, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Payday used when a user never configured a schedule.
pub const DEFAULT_PAYDAY: Weekday = Weekday::Fri;

/// Upper bound on how many pay periods a streak walk will inspect.
const MAX_PERIODS: usize = 5_000;

/// A pay schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaySchedule {
    /// Paid on the same weekday every week.
    Weekly {
        /// Weekday of payment
        day: Weekday,
    },
    /// Paid every 14 days counting from `start` (in both directions).
    Biweekly {
        /// Any date on which a payment happened
        start: NaiveDate,
    },
    /// Paid on fixed days of the month. Days past the end of a short month
    /// fall on that month's last day.
    Monthly {
        /// Days of month, sorted ascending, each in `1..=31`
        dates: Vec<u32>,
    },
}

/// A user's complete payday configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaydaySettings {
    /// `None` means the default schedule (every [`DEFAULT_PAYDAY`])
    pub schedule: Option<PaySchedule>,
    /// Days after payday that still count toward the streak
    pub window_days: u32,
}

impl Default for PaydaySettings {
    fn default() -> Self {
        Self {
            schedule: None,
            window_days: DEFAULT_STREAK_WINDOW_DAYS,
        }
    }
}

/// Streak state derived from a contribution history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakSummary {
    /// Consecutive qualifying paydays ending at the most recent one
    pub current_streak: u32,
    /// Longest run of qualifying paydays in the history
    pub longest_streak: u32,
    /// Next payday strictly after today
    pub next_payday: NaiveDate,
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(28, |last| last.day())
}

const fn shift_month(year: i32, month: u32, forward: bool) -> (i32, u32) {
    match (month, forward) {
        (12, true) => (year + 1, 1),
        (1, false) => (year - 1, 12),
        (m, true) => (year, m + 1),
        (m, false) => (year, m - 1),
    }
}

/// Paydays falling in the given month, ascending.
fn monthly_paydays(dates: &[u32], year: i32, month: u32) -> Vec<NaiveDate> {
    let last = days_in_month(year, month);
    let mut days: Vec<NaiveDate> = dates
        .iter()
        .filter_map(|&d| NaiveDate::from_ymd_opt(year, month, d.min(last)))
        .collect();
    days.sort_unstable();
    days.dedup();
    days
}

fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    let magnitude = Days::new(days.unsigned_abs());
    let shifted = if days >= 0 {
        date.checked_add_days(magnitude)
    } else {
        date.checked_sub_days(magnitude)
    };
    shifted.unwrap_or(date)
}

impl PaySchedule {
    /// Validates and normalizes the schedule.
    pub fn validated(self) -> Result<Self> {
        match self {
            Self::Monthly { mut dates } => {
                if dates.is_empty() {
                    return Err(Error::validation("Monthly schedule needs at least one date"));
                }
                if let Some(bad) = dates.iter().find(|d| !(1..=31).contains(*d)) {
                    return Err(Error::validation(format!(
                        "Monthly payday {bad} is not a day of the month"
                    )));
                }
                dates.sort_unstable();
                dates.dedup();
                Ok(Self::Monthly { dates })
            }
            other => Ok(other),
        }
    }

    /// First payday strictly after `today`. A payday that falls on `today` is skipped.
    #[must_use]
    pub fn next_payday(&self, today: NaiveDate) -> NaiveDate {
        match self {
            Self::Weekly { day } => {
                let ahead = (7 + i64::from(day.num_days_from_monday())
                    - i64::from(today.weekday().num_days_from_monday()))
                    % 7;
                add_days(today, if ahead == 0 { 7 } else { ahead })
            }
            Self::Biweekly { start } => {
                let periods = (today - *start).num_days().div_euclid(14) + 1;
                add_days(*start, periods * 14)
            }
            Self::Monthly { dates } => {
                let this_month = monthly_paydays(dates, today.year(), today.month());
                if let Some(day) = this_month.into_iter().find(|d| *d > today) {
                    return day;
                }
                let (year, month) = shift_month(today.year(), today.month(), true);
                monthly_paydays(dates, year, month)
                    .first()
                    .copied()
                    .unwrap_or(today)
            }
        }
    }

    /// Last payday strictly before `date`.
    #[must_use]
    pub fn previous_payday(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Self::Weekly { day } => {
                let behind = (7 + i64::from(date.weekday().num_days_from_monday())
                    - i64::from(day.num_days_from_monday()))
                    % 7;
                add_days(date, -(if behind == 0 { 7 } else { behind }))
            }
            Self::Biweekly { start } => {
                let periods = ((date - *start).num_days() - 1).div_euclid(14);
                add_days(*start, periods * 14)
            }
            Self::Monthly { dates } => {
                let this_month = monthly_paydays(dates, date.year(), date.month());
                if let Some(day) = this_month.into_iter().rev().find(|d| *d < date) {
                    return day;
                }
                let (year, month) = shift_month(date.year(), date.month(), false);
                monthly_paydays(dates, year, month)
                    .last()
                    .copied()
                    .unwrap_or(date)
            }
        }
    }
}

static DEFAULT_SCHEDULE: PaySchedule = PaySchedule::Weekly { day: DEFAULT_PAYDAY };

impl PaydaySettings {
    fn schedule(&self) -> &PaySchedule {
        self.schedule.as_ref().unwrap_or(&DEFAULT_SCHEDULE)
    }

    /// Next payday strictly after `today`.
    #[must_use]
    pub fn next_payday(&self, today: NaiveDate) -> NaiveDate {
        self.schedule().next_payday(today)
    }
}

/// Whether any of the sorted `dates` falls in `[start, end]`.
fn any_within(dates: &[NaiveDate], start: NaiveDate, end: NaiveDate) -> bool {
    let idx = dates.partition_point(|d| *d < start);
    dates.get(idx).is_some_and(|d| *d <= end)
}

/// Derives the streak summary for one membership.
///
/// The walk starts at the latest payday whose window has opened by `today`
/// (so a contribution made the day before payday already counts) and steps back
/// one pay period at a time. If that payday's window is still open and has no
/// contribution yet, it is skipped rather than treated as a miss.
#[must_use]
pub fn compute_streak(
    settings: &PaydaySettings,
    contributions: &[DateTime<Utc>],
    today: NaiveDate,
) -> StreakSummary {
    let schedule = settings.schedule();
    let window = i64::from(settings.window_days);
    let next_payday = schedule.next_payday(today);

    let mut dates: Vec<NaiveDate> = contributions.iter().map(DateTime::date_naive).collect();
    dates.sort_unstable();
    let Some(&earliest) = dates.first() else {
        return StreakSummary {
            current_streak: 0,
            longest_streak: 0,
            next_payday,
        };
    };

    // Latest payday p with p - 1 day <= today.
    let anchor = schedule.previous_payday(add_days(today, 2));
    let anchor_open = today <= add_days(anchor, window);

    // Qualification flags, newest payday first.
    let mut qualified = Vec::new();
    let mut payday = anchor;
    while add_days(payday, window) >= earliest && qualified.len() < MAX_PERIODS {
        qualified.push(any_within(&dates, add_days(payday, -1), add_days(payday, window)));
        payday = schedule.previous_payday(payday);
    }

    let pending = anchor_open && qualified.first() == Some(&false);
    let settled = if pending { &qualified[1..] } else { &qualified[..] };

    let current = settled.iter().take_while(|q| **q).count();
    let mut longest = 0;
    let mut run = 0;
    for q in settled {
        if *q {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }

    let summary = StreakSummary {
        current_streak: u32::try_from(current).unwrap_or(u32::MAX),
        longest_streak: u32::try_from(longest).unwrap_or(u32::MAX),
        next_payday,
    };
    debug!(?summary, periods = qualified.len(), "Computed streak");
    summary
}

impl TryFrom<&payday_setting::Model> for PaydaySettings {
    type Error = Error;

    fn try_from(row: &payday_setting::Model) -> Result<Self> {
        let Some(kind) = row.kind else {
            return Ok(Self {
                schedule: None,
                window_days: u32::try_from(row.window_days)?,
            });
        };
        let schedule = match kind {
            ScheduleKind::Weekly => {
                let raw = row
                    .weekly_day
                    .as_deref()
                    .ok_or_else(|| Error::validation("Weekly schedule is missing its weekday"))?;
                let day = raw
                    .trim()
                    .parse::<Weekday>()
                    .map_err(|_| Error::validation(format!("Unknown weekday: {raw}")))?;
                PaySchedule::Weekly { day }
            }
            ScheduleKind::Biweekly => PaySchedule::Biweekly {
                start: row
                    .biweekly_start
                    .ok_or_else(|| Error::validation("Biweekly schedule is missing its start date"))?,
            },
            ScheduleKind::Monthly => {
                let raw = row.monthly_dates.as_deref().unwrap_or_default();
                let dates = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<u32>()
                            .map_err(|_| Error::validation(format!("Invalid monthly payday: {s}")))
                    })
                    .collect::<Result<Vec<_>>>()?;
                PaySchedule::Monthly { dates }.validated()?
            }
        };

        Ok(Self {
            schedule: Some(schedule),
            window_days: u32::try_from(row.window_days)?,
        })
    }
}

/// Loads a user's payday settings, falling back to the defaults.
pub async fn get_payday_settings<C>(
    db: &C,
    user_id: i64,
    default_window_days: u32,
) -> Result<PaydaySettings>
where
    C: ConnectionTrait,
{
    let row = PaydaySetting::find()
        .filter(payday_setting::Column::UserId.eq(user_id))
        .one(db)
        .await?;

    row.as_ref().map_or_else(
        || {
            Ok(PaydaySettings {
                schedule: None,
                window_days: default_window_days,
            })
        },
        PaydaySettings::try_from,
    )
}

/// Stores a user's payday settings, replacing any previous schedule.
///
/// `schedule: None` keeps the default schedule but still stores the window.
pub async fn set_payday_settings<C>(db: &C, user_id: i64, settings: PaydaySettings) -> Result<PaydaySettings>
where
    C: ConnectionTrait,
{
    let schedule = settings.schedule.map(PaySchedule::validated).transpose()?;
    let window_days = i32::try_from(settings.window_days)?;

    let existing = PaydaySetting::find()
        .filter(payday_setting::Column::UserId.eq(user_id))
        .one(db)
        .await?;

    let (kind, weekly_day, biweekly_start, monthly_dates) = match &schedule {
        None => (None, None, None, None),
        Some(PaySchedule::Weekly { day }) => (Some(ScheduleKind::Weekly), Some(day.to_string()), None, None),
        Some(PaySchedule::Biweekly { start }) => (Some(ScheduleKind::Biweekly), None, Some(*start), None),
        Some(PaySchedule::Monthly { dates }) => (
            Some(ScheduleKind::Monthly),
            None,
            None,
            Some(
                dates
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        ),
    };

    let row = if let Some(row) = existing {
        let mut active: payday_setting::ActiveModel = row.into();
        active.kind = Set(kind);
        active.weekly_day = Set(weekly_day);
        active.biweekly_start = Set(biweekly_start);
        active.monthly_dates = Set(monthly_dates);
        active.window_days = Set(window_days);
        active.updated_at = Set(Utc::now());
        active.update(db).await?
    } else {
        payday_setting::ActiveModel {
            user_id: Set(user_id),
            kind: Set(kind),
            weekly_day: Set(weekly_day),
            biweekly_start: Set(biweekly_start),
            monthly_dates: Set(monthly_dates),
            window_days: Set(window_days),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await?
    };
    debug!(user_id, ?kind, "Saved payday settings");

    PaydaySettings::try_from(&row)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn weekly(day: Weekday) -> PaydaySettings {
        PaydaySettings {
            schedule: Some(PaySchedule::Weekly { day }),
            window_days: 3,
        }
    }

    #[test]
    fn test_weekly_payday_today_rolls_to_next_week() {
        // 2026-10-16 is a Friday
        let friday = date(2026, 10, 16);
        let next = weekly(Weekday::Fri).next_payday(friday);
        assert_eq!(next, date(2026, 10, 23));
        assert_eq!(next.weekday(), Weekday::Fri);
    }

    #[test]
    fn test_weekly_payday_later_this_week() {
        let monday = date(2026, 10, 12);
        assert_eq!(weekly(Weekday::Wed).next_payday(monday), date(2026, 10, 14));
        assert_eq!(weekly(Weekday::Mon).next_payday(monday), date(2026, 10, 19));
    }

    #[test]
    fn test_default_schedule_is_next_friday() {
        let settings = PaydaySettings::default();
        assert_eq!(settings.next_payday(date(2026, 10, 14)), date(2026, 10, 16));
        assert_eq!(settings.next_payday(date(2026, 10, 16)), date(2026, 10, 23));
    }

    #[test]
    fn test_biweekly_next_payday() {
        let schedule = PaySchedule::Biweekly {
            start: date(2026, 1, 2),
        };
        assert_eq!(schedule.next_payday(date(2026, 1, 2)), date(2026, 1, 16));
        assert_eq!(schedule.next_payday(date(2026, 1, 10)), date(2026, 1, 16));
        assert_eq!(schedule.next_payday(date(2025, 12, 31)), date(2026, 1, 2));
        assert_eq!(schedule.next_payday(date(2025, 12, 1)), date(2025, 12, 5));
    }

    #[test]
    fn test_biweekly_previous_payday() {
        let schedule = PaySchedule::Biweekly {
            start: date(2026, 1, 2),
        };
        assert_eq!(schedule.previous_payday(date(2026, 1, 2)), date(2025, 12, 19));
        assert_eq!(schedule.previous_payday(date(2026, 1, 3)), date(2026, 1, 2));
    }

    #[test]
    fn test_monthly_next_payday() {
        let schedule = PaySchedule::Monthly { dates: vec![1, 15] };
        assert_eq!(schedule.next_payday(date(2026, 3, 10)), date(2026, 3, 15));
        assert_eq!(schedule.next_payday(date(2026, 3, 15)), date(2026, 4, 1));
        assert_eq!(schedule.next_payday(date(2026, 12, 20)), date(2027, 1, 1));
    }

    #[test]
    fn test_monthly_clamps_to_month_end() {
        let schedule = PaySchedule::Monthly { dates: vec![31] };
        assert_eq!(schedule.next_payday(date(2026, 2, 10)), date(2026, 2, 28));
        assert_eq!(schedule.previous_payday(date(2026, 3, 5)), date(2026, 2, 28));
    }

    #[test]
    fn test_monthly_validation() {
        assert!(PaySchedule::Monthly { dates: vec![] }.validated().is_err());
        assert!(PaySchedule::Monthly { dates: vec![0] }.validated().is_err());
        assert!(PaySchedule::Monthly { dates: vec![32] }.validated().is_err());
        assert_eq!(
            PaySchedule::Monthly {
                dates: vec![15, 1, 15]
            }
            .validated()
            .unwrap(),
            PaySchedule::Monthly { dates: vec![1, 15] }
        );
    }

    #[test]
    fn test_streak_empty_history() {
        let summary = compute_streak(&weekly(Weekday::Fri), &[], date(2026, 10, 16));
        assert_eq!(summary.current_streak, 0);
        assert_eq!(summary.longest_streak, 0);
        assert_eq!(summary.next_payday, date(2026, 10, 23));
    }

    #[test]
    fn test_streak_counts_consecutive_paydays() {
        // Fridays: Sep 25, Oct 2, Oct 9, Oct 16
        let history = [at(2026, 9, 25), at(2026, 10, 3), at(2026, 10, 8), at(2026, 10, 16)];
        let summary = compute_streak(&weekly(Weekday::Fri), &history, date(2026, 10, 16));
        assert_eq!(summary.current_streak, 4);
        assert_eq!(summary.longest_streak, 4);
    }

    #[test]
    fn test_streak_stops_at_missed_period() {
        // Sep 18 and Sep 25 qualify, Oct 2 missed, Oct 9 and Oct 16 qualify
        let history = [
            at(2026, 9, 18),
            at(2026, 9, 25),
            at(2026, 10, 9),
            at(2026, 10, 16),
        ];
        let summary = compute_streak(&weekly(Weekday::Fri), &history, date(2026, 10, 16));
        assert_eq!(summary.current_streak, 2);
        assert_eq!(summary.longest_streak, 2);
    }

    #[test]
    fn test_longest_streak_survives_break() {
        let history = [
            at(2026, 9, 4),
            at(2026, 9, 11),
            at(2026, 9, 18),
            at(2026, 10, 16),
        ];
        let summary = compute_streak(&weekly(Weekday::Fri), &history, date(2026, 10, 16));
        assert_eq!(summary.current_streak, 1);
        assert_eq!(summary.longest_streak, 3);
    }

    #[test]
    fn test_window_bounds() {
        let settings = weekly(Weekday::Fri);
        // Thursday before payday counts
        let summary = compute_streak(&settings, &[at(2026, 10, 8)], date(2026, 10, 10));
        assert_eq!(summary.current_streak, 1);
        // Monday after payday (payday + 3) counts
        let summary = compute_streak(&settings, &[at(2026, 10, 12)], date(2026, 10, 12));
        assert_eq!(summary.current_streak, 1);
        // Tuesday after payday (payday + 4) is outside the window
        let summary = compute_streak(&settings, &[at(2026, 10, 13)], date(2026, 10, 13));
        assert_eq!(summary.current_streak, 0);
    }

    #[test]
    fn test_open_window_does_not_break_streak() {
        // Contributed the last two Fridays; today is Thursday before the next one
        let history = [at(2026, 10, 2), at(2026, 10, 9)];
        let summary = compute_streak(&weekly(Weekday::Fri), &history, date(2026, 10, 15));
        assert_eq!(summary.current_streak, 2);
    }

    #[test]
    fn test_closed_window_breaks_streak() {
        let history = [at(2026, 10, 2), at(2026, 10, 9)];
        // Oct 16 window closes Oct 19; on Oct 20 it is a miss
        let summary = compute_streak(&weekly(Weekday::Fri), &history, date(2026, 10, 20));
        assert_eq!(summary.current_streak, 0);
        assert_eq!(summary.longest_streak, 2);
    }

    #[test]
    fn test_streak_is_order_independent() {
        let history = [at(2026, 10, 16), at(2026, 10, 2), at(2026, 10, 9)];
        let summary = compute_streak(&weekly(Weekday::Fri), &history, date(2026, 10, 16));
        assert_eq!(summary.current_streak, 3);
    }

    #[test]
    fn test_monthly_streak() {
        let settings = PaydaySettings {
            schedule: Some(PaySchedule::Monthly { dates: vec![1, 15] }),
            window_days: 3,
        };
        let history = [at(2026, 9, 1), at(2026, 9, 16), at(2026, 10, 2), at(2026, 10, 15)];
        let summary = compute_streak(&settings, &history, date(2026, 10, 16));
        assert_eq!(summary.current_streak, 4);
        assert_eq!(summary.next_payday, date(2026, 11, 1));
    }

    #[test]
    fn test_settings_row_conversion() {
        let row = payday_setting::Model {
            id: 1,
            user_id: 7,
            kind: Some(ScheduleKind::Weekly),
            weekly_day: Some("friday".to_string()),
            biweekly_start: None,
            monthly_dates: None,
            window_days: 2,
            updated_at: Utc::now(),
        };
        let settings = PaydaySettings::try_from(&row).unwrap();
        assert_eq!(
            settings.schedule,
            Some(PaySchedule::Weekly { day: Weekday::Fri })
        );
        assert_eq!(settings.window_days, 2);

        let bad = payday_setting::Model {
            kind: Some(ScheduleKind::Monthly),
            monthly_dates: Some("1,forty".to_string()),
            ..row
        };
        assert!(PaydaySettings::try_from(&bad).is_err());
    }

    #[tokio::test]
    async fn test_payday_settings_round_trip_through_db() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "alice").await?;

        let defaults = get_payday_settings(&db, user.id, 3).await?;
        assert_eq!(defaults, PaydaySettings::default());

        let monthly = PaydaySettings {
            schedule: Some(PaySchedule::Monthly { dates: vec![15, 1] }),
            window_days: 2,
        };
        let saved = set_payday_settings(&db, user.id, monthly).await?;
        assert_eq!(saved.schedule, Some(PaySchedule::Monthly { dates: vec![1, 15] }));

        let weekly_settings = weekly(Weekday::Tue);
        set_payday_settings(&db, user.id, weekly_settings.clone()).await?;
        assert_eq!(get_payday_settings(&db, user.id, 3).await?, weekly_settings);
        assert_eq!(PaydaySetting::find().count(&db).await?, 1);

        set_payday_settings(&db, user.id, PaydaySettings::default()).await?;
        assert_eq!(get_payday_settings(&db, user.id, 3).await?, PaydaySettings::default());
        assert_eq!(PaydaySetting::find().count(&db).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_window_without_schedule_is_stored() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "bob").await?;

        let wide = PaydaySettings {
            schedule: None,
            window_days: 5,
        };
        assert_eq!(set_payday_settings(&db, user.id, wide.clone()).await?, wide);
        assert_eq!(get_payday_settings(&db, user.id, 3).await?, wide);

        // Switching back to a schedule replaces the same row
        set_payday_settings(&db, user.id, weekly(Weekday::Mon)).await?;
        assert_eq!(get_payday_settings(&db, user.id, 3).await?, weekly(Weekday::Mon));
        assert_eq!(PaydaySetting::find().count(&db).await?, 1);
        Ok(())
    }
}
