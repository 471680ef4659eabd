//! Payday setting entity - A user's pay schedule.
//!
//! Stored as flat columns and converted into the closed
//! [`PaySchedule`](crate::core::payday::PaySchedule) type before use.
//! A user without a row, or with no `kind`, uses the default schedule.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Which pay-schedule variant the row describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Paid on the same weekday every week
    #[sea_orm(string_value = "weekly")]
    Weekly,
    /// Paid every 14 days from a start date
    #[sea_orm(string_value = "biweekly")]
    Biweekly,
    /// Paid on fixed days of the month
    #[sea_orm(string_value = "monthly")]
    Monthly,
}

/// Payday setting database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payday_settings")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of the schedule
    #[sea_orm(unique)]
    pub user_id: i64,
    /// Schedule variant, `None` for the default schedule
    pub kind: Option<ScheduleKind>,
    /// Weekday name for weekly schedules (e.g., `"friday"`)
    pub weekly_day: Option<String>,
    /// Anchor date for biweekly schedules
    pub biweekly_start: Option<Date>,
    /// Comma-separated days of month for monthly schedules (e.g., `"1,15"`)
    pub monthly_dates: Option<String>,
    /// Days after payday that still count toward the streak
    pub window_days: i32,
    /// When the schedule last changed
    pub updated_at: DateTimeUtc,
}

/// `PaydaySetting` has no navigable relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
