//! Badge entity - Static catalog of achievements.
//!
//! Each badge unlocks when its `rule` evaluates true against `threshold`.
//! The catalog is seeded from `config.toml` and can grow without code changes.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How rare a badge is
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    /// Everyone gets these
    #[sea_orm(string_value = "common")]
    Common,
    /// Takes a little effort
    #[sea_orm(string_value = "uncommon")]
    Uncommon,
    /// Takes sustained effort
    #[sea_orm(string_value = "rare")]
    Rare,
    /// Few members get here
    #[sea_orm(string_value = "epic")]
    Epic,
    /// Hardly anyone gets here
    #[sea_orm(string_value = "legendary")]
    Legendary,
}

/// Unlock rule evaluated by the reward engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum BadgeRule {
    /// Unlocks on every `threshold`-th contribution to a pool
    #[sea_orm(string_value = "contribution_count")]
    ContributionCount,
    /// Unlocks on the first contribution ever
    #[sea_orm(string_value = "first_contribution")]
    FirstContribution,
    /// Unlocks when the pool streak reaches `threshold`
    #[sea_orm(string_value = "streak")]
    Streak,
    /// Unlocks when the member's pool total reaches `threshold` cents
    #[sea_orm(string_value = "total_contributed")]
    TotalContributed,
    /// Unlocks when the user's points reach `threshold`
    #[sea_orm(string_value = "points")]
    Points,
    /// Unlocks when the pool reaches its goal
    #[sea_orm(string_value = "pool_goal_reached")]
    PoolGoalReached,
}

/// Badge database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "badges")]
pub struct Model {
    /// Unique identifier for the badge
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Unique badge name (e.g., "Consistent Saver")
    #[sea_orm(unique)]
    pub name: String,
    /// What the badge is for
    pub description: String,
    /// Rarity tier
    pub rarity: Rarity,
    /// Unlock rule
    pub rule: BadgeRule,
    /// Rule parameter; meaning depends on `rule`
    pub threshold: i64,
}

/// Defines relationships between Badge and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One badge has many awards
    #[sea_orm(has_many = "super::user_badge::Entity")]
    UserBadges,
}

impl Related<super::user_badge::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserBadges.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
