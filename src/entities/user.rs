//! User entity - A person saving through one or more pools.
//!
//! Users carry their cumulative points, derived level and aggregate streaks.
//! Users are never deleted; `is_active` is cleared instead.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// User database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Unique identifier for the user
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name shown on leaderboards
    pub name: String,
    /// Cumulative points earned from contributions
    pub points: i64,
    /// Level derived from points
    pub level: i32,
    /// Best current streak across all memberships
    pub current_streak: i32,
    /// Best streak ever observed across all memberships
    pub longest_streak: i32,
    /// Cents returned to the user by completed withdrawals
    pub balance_cents: i64,
    /// Soft-disable flag
    pub is_active: bool,
    /// When the user registered
    pub created_at: DateTimeUtc,
}

/// Defines relationships between User and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One user has many memberships
    #[sea_orm(has_many = "super::membership::Entity")]
    Memberships,
    /// One user has many earned badges
    #[sea_orm(has_many = "super::user_badge::Entity")]
    UserBadges,
}

impl Related<super::membership::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Memberships.def()
    }
}

impl Related<super::user_badge::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserBadges.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
