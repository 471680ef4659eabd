//! `UserBadge` entity - Records that a user earned a badge.
//!
//! At most one row exists per (user, badge); a unique index enforces it.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// `UserBadge` database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_badges")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User who earned the badge
    pub user_id: i64,
    /// Badge earned
    pub badge_id: i64,
    /// Pool where it was earned, if any
    pub pool_id: Option<i64>,
    /// When it was earned
    pub earned_at: DateTimeUtc,
}

/// Defines relationships between `UserBadge` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each award references one badge
    #[sea_orm(
        belongs_to = "super::badge::Entity",
        from = "Column::BadgeId",
        to = "super::badge::Column::Id"
    )]
    Badge,
    /// Each award belongs to one user
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::badge::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Badge.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
