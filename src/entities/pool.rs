//! Pool entity - A named savings target shared by a group or owned by one person.
//!
//! `accumulated_cents` is a running total of the pool's contributions, kept in
//! step with the ledger inside the same database transaction as each insert.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Whether a pool is shared or personal
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Many members saving together
    #[sea_orm(string_value = "group")]
    Group,
    /// A single owner saving alone
    #[sea_orm(string_value = "solo")]
    Solo,
}

/// Who can discover the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Listed publicly
    #[sea_orm(string_value = "public")]
    Public,
    /// Invite only
    #[sea_orm(string_value = "private")]
    Private,
}

/// Pool database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pools")]
pub struct Model {
    /// Unique identifier for the pool
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Human-readable name (e.g., "Trip to Lisbon")
    pub name: String,
    /// User who created the pool
    pub owner_id: i64,
    /// Group or solo
    pub kind: PoolKind,
    /// Savings goal in cents, zero for open-ended pools
    pub goal_cents: i64,
    /// Sum of all contribution amounts in cents
    pub accumulated_cents: i64,
    /// Optional goal date; no early-withdrawal penalty applies from this day on
    pub target_date: Option<Date>,
    /// Public or private
    pub visibility: Visibility,
    /// Whether early withdrawals are penalised
    pub penalty_enabled: bool,
    /// Penalty as a whole percentage of the requested amount (0-100)
    pub penalty_percentage: i32,
    /// Group pools only: every member must agree before the penalty is enforceable
    pub requires_consensus: bool,
    /// When the pool was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Pool and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One pool has many memberships
    #[sea_orm(has_many = "super::membership::Entity")]
    Memberships,
    /// One pool has many contributions
    #[sea_orm(has_many = "super::contribution::Entity")]
    Contributions,
    /// One pool has many withdrawals
    #[sea_orm(has_many = "super::withdrawal::Entity")]
    Withdrawals,
}

impl Related<super::membership::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Memberships.def()
    }
}

impl Related<super::contribution::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Contributions.def()
    }
}

impl Related<super::withdrawal::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Withdrawals.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
