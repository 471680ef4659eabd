//! Encouragement entity - Short directed messages between savers.
//! Append-only.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Tone of an encouragement
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum EncouragementKind {
    /// General support
    #[sea_orm(string_value = "cheer")]
    Cheer,
    /// Reminder to contribute
    #[sea_orm(string_value = "nudge")]
    Nudge,
    /// Congratulations on a milestone
    #[sea_orm(string_value = "celebration")]
    Celebration,
}

/// Encouragement database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "encouragements")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Sender
    pub from_user_id: i64,
    /// Recipient
    pub to_user_id: i64,
    /// Pool the message is about, if any
    pub pool_id: Option<i64>,
    /// Message body
    pub text: String,
    /// Tone
    pub kind: EncouragementKind,
    /// When it was sent
    pub created_at: DateTimeUtc,
}

/// Encouragements have no navigable relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
