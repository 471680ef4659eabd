//! Contribution ledger - the append-only record of money paid into pools.
//!
//! [`record_contribution`] is the one multi-row unit of work in the system: the
//! ledger insert, the pool total, the membership total/streak and the user's
//! points all commit together or not at all. The membership row carries a
//! `version` counter; if it changed between our read and our write the whole
//! unit of work is rolled back and recomputed from the ledger.

use crate::{
    core::{
        payday::{self, StreakSummary},
        pool as pools, reward, user as users,
    },
    entities::{
        Contribution, Membership, contribution, contribution::PaymentMethod, membership, pool,
        user,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait, prelude::*, sea_query::Expr};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// A request to pay into a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionRequest {
    /// Pool to pay into
    pub pool_id: i64,
    /// Acting user
    pub user_id: i64,
    /// Amount in cents, must be positive
    pub amount_cents: i64,
    /// Payment method tag
    pub method: PaymentMethod,
    /// Optional key making retries of the same request safe
    pub idempotency_key: Option<String>,
}

/// Everything committed by one contribution.
#[derive(Debug, Clone)]
pub struct RecordedContribution {
    /// The ledger row
    pub contribution: contribution::Model,
    /// Pool after the commit
    pub pool: pool::Model,
    /// Membership after the commit
    pub membership: membership::Model,
    /// User after the commit
    pub user: user::Model,
    /// Streak state for this membership
    pub streak: StreakSummary,
    /// True when an earlier request with the same idempotency key was returned
    pub replayed: bool,
}

/// Timestamps of a member's positive contributions to a pool, oldest first.
pub async fn contribution_history<C>(db: &C, pool_id: i64, user_id: i64) -> Result<Vec<DateTime<Utc>>>
where
    C: ConnectionTrait,
{
    Contribution::find()
        .select_only()
        .column(contribution::Column::CreatedAt)
        .filter(contribution::Column::PoolId.eq(pool_id))
        .filter(contribution::Column::UserId.eq(user_id))
        .filter(contribution::Column::AmountCents.gt(0))
        .order_by_asc(contribution::Column::CreatedAt)
        .into_tuple()
        .all(db)
        .await
        .map_err(Into::into)
}

/// All contributions of a pool, newest first.
pub async fn list_contributions<C>(db: &C, pool_id: i64) -> Result<Vec<contribution::Model>>
where
    C: ConnectionTrait,
{
    Contribution::find()
        .filter(contribution::Column::PoolId.eq(pool_id))
        .order_by_desc(contribution::Column::CreatedAt)
        .order_by_desc(contribution::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

async fn find_by_idempotency_key<C>(
    db: &C,
    request: &ContributionRequest,
    key: &str,
) -> Result<Option<contribution::Model>>
where
    C: ConnectionTrait,
{
    Contribution::find()
        .filter(contribution::Column::PoolId.eq(request.pool_id))
        .filter(contribution::Column::UserId.eq(request.user_id))
        .filter(contribution::Column::IdempotencyKey.eq(key))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Appends a ledger row and moves both running totals by `amount_cents`.
///
/// Used for compensating records; does not touch streaks, counts or points.
pub(crate) async fn append_compensation<C>(
    db: &C,
    pool_id: i64,
    user_id: i64,
    amount_cents: i64,
    now: DateTime<Utc>,
) -> Result<contribution::Model>
where
    C: ConnectionTrait,
{
    let row = contribution::ActiveModel {
        pool_id: Set(pool_id),
        user_id: Set(user_id),
        amount_cents: Set(amount_cents),
        method: Set(PaymentMethod::Withdrawal),
        points_awarded: Set(0),
        streak_bonus: Set(false),
        idempotency_key: Set(None),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    pools::add_to_pool_total(db, pool_id, amount_cents).await?;
    let member = pools::require_membership(db, pool_id, user_id).await?;
    Membership::update_many()
        .col_expr(
            membership::Column::TotalContributedCents,
            Expr::col(membership::Column::TotalContributedCents).add(amount_cents),
        )
        .col_expr(
            membership::Column::Version,
            Expr::col(membership::Column::Version).add(1),
        )
        .filter(membership::Column::Id.eq(member.id))
        .exec(db)
        .await?;
    Ok(row)
}

/// One attempt at the unit of work. `Ok(None)` means the membership row moved
/// underneath us and the attempt was rolled back.
async fn try_record(
    db: &DatabaseConnection,
    request: &ContributionRequest,
    now: DateTime<Utc>,
    default_window_days: u32,
) -> Result<Option<RecordedContribution>> {
    let txn = db.begin().await?;

    let pool = pools::require_pool(&txn, request.pool_id).await?;
    let user = users::require_active_user(&txn, request.user_id).await?;
    let settings = payday::get_payday_settings(&txn, user.id, default_window_days).await?;

    if let Some(key) = request.idempotency_key.as_deref()
        && let Some(existing) = find_by_idempotency_key(&txn, request, key).await?
    {
        let membership = pools::require_membership(&txn, pool.id, user.id).await?;
        txn.commit().await?;
        debug!(contribution_id = existing.id, "Replaying contribution for idempotency key");
        let streak = StreakSummary {
            current_streak: u32::try_from(membership.current_streak)?,
            longest_streak: u32::try_from(membership.longest_streak)?,
            next_payday: settings.next_payday(now.date_naive()),
        };
        return Ok(Some(RecordedContribution {
            contribution: existing,
            pool,
            membership,
            user,
            streak,
            replayed: true,
        }));
    }

    let member = pools::membership_for_contribution(&txn, &pool, user.id, now).await?;

    let mut history = contribution_history(&txn, pool.id, user.id).await?;
    history.push(now);
    let streak = payday::compute_streak(&settings, &history, now.date_naive());
    let points = reward::points_for_amount(request.amount_cents);

    let inserted = contribution::ActiveModel {
        pool_id: Set(pool.id),
        user_id: Set(user.id),
        amount_cents: Set(request.amount_cents),
        method: Set(request.method),
        points_awarded: Set(points),
        streak_bonus: Set(streak.current_streak > 1),
        idempotency_key: Set(request.idempotency_key.clone()),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await;
    let contribution = match inserted {
        Ok(row) => row,
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            // Another writer committed the same idempotency key first.
            txn.rollback().await?;
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    pools::add_to_pool_total(&txn, pool.id, request.amount_cents).await?;

    let current = i32::try_from(streak.current_streak)?;
    let longest = i32::try_from(streak.longest_streak)?.max(member.longest_streak);
    let updated = Membership::update_many()
        .col_expr(
            membership::Column::TotalContributedCents,
            Expr::col(membership::Column::TotalContributedCents).add(request.amount_cents),
        )
        .col_expr(
            membership::Column::ContributionCount,
            Expr::col(membership::Column::ContributionCount).add(1),
        )
        .col_expr(membership::Column::CurrentStreak, Expr::value(current))
        .col_expr(membership::Column::LongestStreak, Expr::value(longest))
        .col_expr(membership::Column::LastContributionAt, Expr::value(now))
        .col_expr(
            membership::Column::Version,
            Expr::col(membership::Column::Version).add(1),
        )
        .filter(membership::Column::Id.eq(member.id))
        .filter(membership::Column::Version.eq(member.version))
        .exec(&txn)
        .await?;
    if updated.rows_affected == 0 {
        txn.rollback().await?;
        return Ok(None);
    }

    users::add_points(&txn, user.id, points).await?;
    let user = users::refresh_streak_aggregate(&txn, user.id).await?;
    let pool = pools::require_pool(&txn, pool.id).await?;
    let membership = pools::require_membership(&txn, pool.id, user.id).await?;

    txn.commit().await?;

    Ok(Some(RecordedContribution {
        contribution,
        pool,
        membership,
        user,
        streak: StreakSummary {
            longest_streak: u32::try_from(longest)?,
            ..streak
        },
        replayed: false,
    }))
}

/// Records a contribution and updates every derived counter atomically.
///
/// # Errors
/// * [`Error::InvalidAmount`] if `amount_cents <= 0` (checked before any query)
/// * [`Error::PoolNotFound`], [`Error::UserNotFound`], [`Error::MembershipNotFound`]
/// * [`Error::ConcurrencyConflict`] after `max_attempts` version mismatches
#[instrument(skip(db), fields(pool_id = request.pool_id, user_id = request.user_id))]
pub async fn record_contribution(
    db: &DatabaseConnection,
    request: &ContributionRequest,
    now: DateTime<Utc>,
    default_window_days: u32,
    max_attempts: u32,
) -> Result<RecordedContribution> {
    if request.amount_cents <= 0 {
        return Err(Error::InvalidAmount {
            amount: request.amount_cents,
        });
    }
    if request.method == PaymentMethod::Withdrawal {
        return Err(Error::validation(
            "The withdrawal method is reserved for compensating records",
        ));
    }

    for attempt in 1..=max_attempts {
        if let Some(recorded) = try_record(db, request, now, default_window_days).await? {
            if !recorded.replayed {
                info!(
                    contribution_id = recorded.contribution.id,
                    amount_cents = request.amount_cents,
                    points = recorded.contribution.points_awarded,
                    streak = recorded.streak.current_streak,
                    "Recorded contribution"
                );
            }
            return Ok(recorded);
        }
        warn!(attempt, "Membership changed during contribution, retrying");
    }

    Err(Error::ConcurrencyConflict {
        attempts: max_attempts,
    })
}
