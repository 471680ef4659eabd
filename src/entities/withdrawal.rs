//! Withdrawal entity - A request to take money back out of a pool.
//!
//! The penalty breakdown is fixed when the request is made. Only `status` and
//! `updated_at` change afterwards.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle of a withdrawal request
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    /// Waiting for the payment provider
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Funds were paid out
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Withdrawn by the requester
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    /// Refused by the payment provider
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

impl WithdrawalStatus {
    /// Whether no further transitions are possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Withdrawal database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "withdrawals")]
pub struct Model {
    /// Unique identifier for the withdrawal
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Pool withdrawn from
    pub pool_id: i64,
    /// Requesting user
    pub user_id: i64,
    /// Amount requested in cents
    pub requested_cents: i64,
    /// Penalty withheld in cents
    pub penalty_cents: i64,
    /// Amount paid to the user: requested minus penalty
    pub net_cents: i64,
    /// Requested before the pool's target date
    pub early_withdrawal: bool,
    /// Current status
    pub status: WithdrawalStatus,
    /// Free-form reason given by the user
    pub reason: String,
    /// When the withdrawal was requested
    pub created_at: DateTimeUtc,
    /// When the status last changed
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Withdrawal and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each withdrawal belongs to one pool
    #[sea_orm(
        belongs_to = "super::pool::Entity",
        from = "Column::PoolId",
        to = "super::pool::Column::Id"
    )]
    Pool,
}

impl Related<super::pool::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Pool.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
