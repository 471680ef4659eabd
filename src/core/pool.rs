//! Pool business logic - creation, membership and ledger reconciliation.
//!
//! A pool's `accumulated_cents` and each membership's `total_contributed_cents`
//! are running totals over the contribution ledger. The ledger is the source of
//! truth; [`reconcile_pool_totals`] rebuilds both totals from it and repairs any drift.

use crate::{
    entities::{
        Contribution, Membership, Pool, contribution, membership, membership::MemberRole, pool,
        pool::{PoolKind, Visibility},
    },
    errors::{Error, Result},
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// Parameters for a new pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPool {
    /// Display name
    pub name: String,
    /// Group or solo
    pub kind: PoolKind,
    /// Goal in cents, zero for open-ended
    pub goal_cents: i64,
    /// Optional goal date
    pub target_date: Option<NaiveDate>,
    /// Public or private
    pub visibility: Visibility,
    /// Early-withdrawal penalty configuration
    pub penalty: PenaltyConfig,
}

/// Early-withdrawal penalty settings of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// Whether early withdrawals are penalised
    pub enabled: bool,
    /// Whole percentage withheld (0-100)
    pub percentage: i32,
    /// Group pools only: every member must agree first
    pub requires_consensus: bool,
}

/// Result of rebuilding one pool's running totals from the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Pool checked
    pub pool_id: i64,
    /// Stored pool total before repair
    pub stored_pool_cents: i64,
    /// Pool total according to the ledger
    pub ledger_pool_cents: i64,
    /// Memberships whose total had drifted
    pub repaired_memberships: usize,
}

impl ReconcileReport {
    /// Whether anything had to be repaired
    #[must_use]
    pub const fn had_drift(&self) -> bool {
        self.stored_pool_cents != self.ledger_pool_cents || self.repaired_memberships > 0
    }
}

fn new_membership(
    pool_id: i64,
    user_id: i64,
    role: MemberRole,
    now: DateTime<Utc>,
) -> membership::ActiveModel {
    membership::ActiveModel {
        pool_id: Set(pool_id),
        user_id: Set(user_id),
        role: Set(role),
        current_streak: Set(0),
        longest_streak: Set(0),
        contribution_count: Set(0),
        total_contributed_cents: Set(0),
        last_contribution_at: Set(None),
        agreed_to_penalty: Set(false),
        agreed_at: Set(None),
        version: Set(0),
        joined_at: Set(now),
        ..Default::default()
    }
}

/// Creates a pool and its owner membership in one transaction.
pub async fn create_pool(
    db: &DatabaseConnection,
    owner_id: i64,
    new_pool: NewPool,
    now: DateTime<Utc>,
) -> Result<(pool::Model, membership::Model)> {
    let name = new_pool.name.trim().to_string();
    if name.is_empty() {
        return Err(Error::validation("Pool name cannot be empty"));
    }
    if new_pool.goal_cents < 0 {
        return Err(Error::InvalidAmount {
            amount: new_pool.goal_cents,
        });
    }
    if !(0..=100).contains(&new_pool.penalty.percentage) {
        return Err(Error::validation(format!(
            "Penalty percentage must be between 0 and 100, got {}",
            new_pool.penalty.percentage
        )));
    }

    let txn = db.begin().await?;
    crate::core::user::require_active_user(&txn, owner_id).await?;

    let pool = pool::ActiveModel {
        name: Set(name),
        owner_id: Set(owner_id),
        kind: Set(new_pool.kind),
        goal_cents: Set(new_pool.goal_cents),
        accumulated_cents: Set(0),
        target_date: Set(new_pool.target_date),
        visibility: Set(new_pool.visibility),
        penalty_enabled: Set(new_pool.penalty.enabled),
        penalty_percentage: Set(new_pool.penalty.percentage),
        requires_consensus: Set(new_pool.penalty.requires_consensus),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let owner = new_membership(pool.id, owner_id, MemberRole::Owner, now)
        .insert(&txn)
        .await?;
    txn.commit().await?;

    info!(pool_id = pool.id, owner_id, kind = ?pool.kind, "Created pool");
    Ok((pool, owner))
}

/// All pools, oldest first.
pub async fn list_pools<C>(db: &C) -> Result<Vec<pool::Model>>
where
    C: ConnectionTrait,
{
    Pool::find()
        .order_by_asc(pool::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Finds a pool by id.
pub async fn get_pool<C>(db: &C, pool_id: i64) -> Result<Option<pool::Model>>
where
    C: ConnectionTrait,
{
    Pool::find_by_id(pool_id).one(db).await.map_err(Into::into)
}

/// Finds a pool or fails with [`Error::PoolNotFound`].
pub async fn require_pool<C>(db: &C, pool_id: i64) -> Result<pool::Model>
where
    C: ConnectionTrait,
{
    get_pool(db, pool_id)
        .await?
        .ok_or(Error::PoolNotFound { pool_id })
}

/// Finds the membership of `user_id` in `pool_id`.
pub async fn get_membership<C>(
    db: &C,
    pool_id: i64,
    user_id: i64,
) -> Result<Option<membership::Model>>
where
    C: ConnectionTrait,
{
    Membership::find()
        .filter(membership::Column::PoolId.eq(pool_id))
        .filter(membership::Column::UserId.eq(user_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a membership or fails with [`Error::MembershipNotFound`].
pub async fn require_membership<C>(db: &C, pool_id: i64, user_id: i64) -> Result<membership::Model>
where
    C: ConnectionTrait,
{
    get_membership(db, pool_id, user_id)
        .await?
        .ok_or(Error::MembershipNotFound { pool_id, user_id })
}

/// All memberships of a pool, earliest joiner first.
pub async fn list_memberships<C>(db: &C, pool_id: i64) -> Result<Vec<membership::Model>>
where
    C: ConnectionTrait,
{
    Membership::find()
        .filter(membership::Column::PoolId.eq(pool_id))
        .order_by_asc(membership::Column::JoinedAt)
        .order_by_asc(membership::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Every membership a user holds.
pub async fn memberships_for_user<C>(db: &C, user_id: i64) -> Result<Vec<membership::Model>>
where
    C: ConnectionTrait,
{
    Membership::find()
        .filter(membership::Column::UserId.eq(user_id))
        .order_by_asc(membership::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Adds a user to a group pool.
///
/// Solo pools only ever contain their owner.
pub async fn join_pool<C>(
    db: &C,
    pool_id: i64,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<membership::Model>
where
    C: ConnectionTrait,
{
    let pool = require_pool(db, pool_id).await?;
    crate::core::user::require_active_user(db, user_id).await?;

    if pool.kind == PoolKind::Solo && pool.owner_id != user_id {
        return Err(Error::validation("Solo pools cannot be joined by other users"));
    }
    if get_membership(db, pool_id, user_id).await?.is_some() {
        return Err(Error::validation(format!(
            "User {user_id} is already a member of pool {pool_id}"
        )));
    }

    let role = if pool.owner_id == user_id {
        MemberRole::Owner
    } else {
        MemberRole::Member
    };
    let membership = new_membership(pool_id, user_id, role, now).insert(db).await?;
    info!(pool_id, user_id, "User joined pool");
    Ok(membership)
}

/// Returns the member's row, creating the owner membership of a solo pool on demand.
pub(crate) async fn membership_for_contribution<C>(
    db: &C,
    pool: &pool::Model,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<membership::Model>
where
    C: ConnectionTrait,
{
    if let Some(existing) = get_membership(db, pool.id, user_id).await? {
        return Ok(existing);
    }
    if pool.kind == PoolKind::Solo && pool.owner_id == user_id {
        info!(pool_id = pool.id, user_id, "Creating owner membership for solo pool");
        return new_membership(pool.id, user_id, MemberRole::Owner, now)
            .insert(db)
            .await
            .map_err(Into::into);
    }
    Err(Error::MembershipNotFound {
        pool_id: pool.id,
        user_id,
    })
}

/// Adds `delta` to the pool's running total with a single UPDATE.
pub(crate) async fn add_to_pool_total<C>(db: &C, pool_id: i64, delta: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    use sea_orm::sea_query::Expr;

    let result = Pool::update_many()
        .col_expr(
            pool::Column::AccumulatedCents,
            Expr::col(pool::Column::AccumulatedCents).add(delta),
        )
        .filter(pool::Column::Id.eq(pool_id))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::PoolNotFound { pool_id });
    }
    Ok(())
}

/// Per-user sums of the pool's ledger.
pub async fn ledger_totals_by_user<C>(db: &C, pool_id: i64) -> Result<HashMap<i64, i64>>
where
    C: ConnectionTrait,
{
    let rows: Vec<(i64, Option<i64>)> = Contribution::find()
        .select_only()
        .column(contribution::Column::UserId)
        .column_as(contribution::Column::AmountCents.sum(), "total")
        .filter(contribution::Column::PoolId.eq(pool_id))
        .group_by(contribution::Column::UserId)
        .into_tuple()
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(user_id, total)| (user_id, total.unwrap_or(0)))
        .collect())
}

/// Rebuilds a pool's running totals from its contribution ledger.
pub async fn reconcile_pool_totals(db: &DatabaseConnection, pool_id: i64) -> Result<ReconcileReport> {
    let txn = db.begin().await?;
    let pool = require_pool(&txn, pool_id).await?;
    let by_user = ledger_totals_by_user(&txn, pool_id).await?;
    let ledger_pool_cents: i64 = by_user.values().sum();

    let mut report = ReconcileReport {
        pool_id,
        stored_pool_cents: pool.accumulated_cents,
        ledger_pool_cents,
        repaired_memberships: 0,
    };

    if pool.accumulated_cents != ledger_pool_cents {
        warn!(
            pool_id,
            stored = pool.accumulated_cents,
            ledger = ledger_pool_cents,
            "Pool total drifted from ledger, repairing"
        );
        let mut active: pool::ActiveModel = pool.into();
        active.accumulated_cents = Set(ledger_pool_cents);
        active.update(&txn).await?;
    }

    for member in list_memberships(&txn, pool_id).await? {
        let expected = by_user.get(&member.user_id).copied().unwrap_or(0);
        if member.total_contributed_cents != expected {
            warn!(
                pool_id,
                user_id = member.user_id,
                stored = member.total_contributed_cents,
                ledger = expected,
                "Membership total drifted from ledger, repairing"
            );
            let version = member.version;
            let mut active: membership::ActiveModel = member.into();
            active.total_contributed_cents = Set(expected);
            active.version = Set(version + 1);
            active.update(&txn).await?;
            report.repaired_memberships += 1;
        }
    }

    txn.commit().await?;
    Ok(report)
}

/// Reconciles every pool. Returns only the reports that found drift.
pub async fn reconcile_all_pools(db: &DatabaseConnection) -> Result<Vec<ReconcileReport>> {
    let pool_ids: Vec<i64> = Pool::find()
        .select_only()
        .column(pool::Column::Id)
        .into_tuple()
        .all(db)
        .await?;

    let mut drifted = Vec::new();
    for pool_id in pool_ids {
        let report = reconcile_pool_totals(db, pool_id).await?;
        if report.had_drift() {
            drifted.push(report);
        }
    }
    Ok(drifted)
}
