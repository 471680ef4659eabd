//! Membership entity - Joins a user to a pool.
//!
//! Carries the member's role, per-pool streak state, running contribution total
//! and the penalty-consensus flag. `version` is bumped on every streak/total
//! update so concurrent writers can detect that the row moved under them.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Member role within a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    /// Created the pool
    #[sea_orm(string_value = "owner")]
    Owner,
    /// Joined the pool
    #[sea_orm(string_value = "member")]
    Member,
}

/// Membership database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "memberships")]
pub struct Model {
    /// Unique identifier for the membership
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Pool joined
    pub pool_id: i64,
    /// Member
    pub user_id: i64,
    /// Owner or member
    pub role: MemberRole,
    /// Consecutive pay periods with a qualifying contribution
    pub current_streak: i32,
    /// Longest run ever observed, never decreases
    pub longest_streak: i32,
    /// Number of positive contributions made to this pool
    pub contribution_count: i32,
    /// Sum of this member's contribution amounts in cents
    pub total_contributed_cents: i64,
    /// Timestamp of the latest contribution
    pub last_contribution_at: Option<DateTimeUtc>,
    /// Whether the member agreed to the pool's penalty policy
    pub agreed_to_penalty: bool,
    /// When the member agreed
    pub agreed_at: Option<DateTimeUtc>,
    /// Optimistic concurrency counter
    pub version: i32,
    /// When the user joined the pool
    pub joined_at: DateTimeUtc,
}

/// Defines relationships between Membership and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each membership belongs to one pool
    #[sea_orm(
        belongs_to = "super::pool::Entity",
        from = "Column::PoolId",
        to = "super::pool::Column::Id"
    )]
    Pool,
    /// Each membership belongs to one user
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::pool::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Pool.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
