//! Contribution entity - Append-only ledger of money paid into pools.
//!
//! Rows are never edited. Completed withdrawals are recorded as compensating
//! rows with a negative `amount_cents` and the `withdrawal` method tag.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How the contribution was paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card payment
    #[sea_orm(string_value = "card")]
    Card,
    /// Bank transfer
    #[sea_orm(string_value = "bank")]
    Bank,
    /// Cash handed over
    #[sea_orm(string_value = "cash")]
    Cash,
    /// Anything else
    #[sea_orm(string_value = "other")]
    Other,
    /// Compensating record for a completed withdrawal
    #[sea_orm(string_value = "withdrawal")]
    Withdrawal,
}

/// Contribution database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "contributions")]
pub struct Model {
    /// Unique identifier for the contribution
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Pool paid into
    pub pool_id: i64,
    /// Contributing user
    pub user_id: i64,
    /// Amount in cents (negative only for withdrawal compensations)
    pub amount_cents: i64,
    /// Payment method tag
    pub method: PaymentMethod,
    /// Points granted for this contribution
    pub points_awarded: i64,
    /// Whether the member was on a streak longer than one period
    pub streak_bonus: bool,
    /// Caller-supplied key used to make retries safe
    pub idempotency_key: Option<String>,
    /// When the contribution was recorded
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Contribution and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each contribution belongs to one pool
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
