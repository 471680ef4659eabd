//! Withdrawal requests and their lifecycle.
//!
//! A request fixes its penalty breakdown up front and starts `pending`. Only a
//! `completed` withdrawal touches money: it appends a compensating negative row
//! to the ledger (keeping pool totals equal to the ledger sum) and credits the
//! net amount to the user's balance.

use crate::{
    core::{
        contribution::append_compensation,
        penalty::{self, PenaltyAssessment},
        pool::{require_membership, require_pool},
        user::{credit_balance, require_active_user},
    },
    entities::{Withdrawal, withdrawal, withdrawal::WithdrawalStatus},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveEnum, QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*};
use tracing::{info, instrument};

/// Longest accepted reason text.
pub const MAX_REASON_LEN: usize = 500;

/// Cents a member could withdraw right now: their ledger total minus what is
/// already reserved by pending requests.
pub async fn available_cents<C>(db: &C, pool_id: i64, user_id: i64) -> Result<i64>
where
    C: ConnectionTrait,
{
    let member = require_membership(db, pool_id, user_id).await?;
    let reserved: Option<i64> = Withdrawal::find()
        .select_only()
        .column_as(withdrawal::Column::RequestedCents.sum(), "reserved")
        .filter(withdrawal::Column::PoolId.eq(pool_id))
        .filter(withdrawal::Column::UserId.eq(user_id))
        .filter(withdrawal::Column::Status.eq(WithdrawalStatus::Pending))
        .into_tuple::<Option<i64>>()
        .one(db)
        .await?
        .flatten();
    Ok(member.total_contributed_cents - reserved.unwrap_or(0))
}

/// Computes what a withdrawal would cost without recording anything.
///
/// A blocked assessment is returned as-is so callers can show the reason.
pub async fn preview_penalty<C>(
    db: &C,
    pool_id: i64,
    user_id: i64,
    amount_cents: i64,
    now: DateTime<Utc>,
) -> Result<PenaltyAssessment>
where
    C: ConnectionTrait,
{
    if amount_cents <= 0 {
        return Err(Error::InvalidAmount {
            amount: amount_cents,
        });
    }
    require_membership(db, pool_id, user_id).await?;
    penalty::assess(db, pool_id, amount_cents, now).await
}

/// Creates a pending withdrawal.
///
/// # Errors
/// * [`Error::InvalidAmount`] if `amount_cents <= 0`
/// * [`Error::ConsensusNotReached`] if the group has not unanimously agreed to the penalty
/// * [`Error::InsufficientFunds`] if more than the available amount is requested
#[instrument(skip(db, reason))]
pub async fn request_withdrawal(
    db: &DatabaseConnection,
    pool_id: i64,
    user_id: i64,
    amount_cents: i64,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(withdrawal::Model, PenaltyAssessment)> {
    if amount_cents <= 0 {
        return Err(Error::InvalidAmount {
            amount: amount_cents,
        });
    }
    let reason = reason.trim();
    if reason.len() > MAX_REASON_LEN {
        return Err(Error::validation(format!(
            "Reason must be at most {MAX_REASON_LEN} bytes"
        )));
    }

    let txn = db.begin().await?;
    require_pool(&txn, pool_id).await?;
    require_active_user(&txn, user_id).await?;

    require_membership(&txn, pool_id, user_id).await?;

    // The consensus gate applies to every member, funded or not
    let assessment = penalty::assess(&txn, pool_id, amount_cents, now)
        .await?
        .ensure_allowed()?;

    let available = available_cents(&txn, pool_id, user_id).await?;
    if amount_cents > available {
        return Err(Error::InsufficientFunds {
            available,
            requested: amount_cents,
        });
    }

    let row = withdrawal::ActiveModel {
        pool_id: Set(pool_id),
        user_id: Set(user_id),
        requested_cents: Set(assessment.requested_cents),
        penalty_cents: Set(assessment.penalty_cents),
        net_cents: Set(assessment.net_cents),
        early_withdrawal: Set(assessment.early_withdrawal),
        status: Set(WithdrawalStatus::Pending),
        reason: Set(reason.to_string()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    info!(
        withdrawal_id = row.id,
        penalty_cents = row.penalty_cents,
        net_cents = row.net_cents,
        "Withdrawal requested"
    );
    Ok((row, assessment))
}

/// Gets a withdrawal by id.
pub async fn get_withdrawal<C>(db: &C, withdrawal_id: i64) -> Result<Option<withdrawal::Model>>
where
    C: ConnectionTrait,
{
    Withdrawal::find_by_id(withdrawal_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Withdrawals of a pool, newest first.
pub async fn list_withdrawals<C>(db: &C, pool_id: i64) -> Result<Vec<withdrawal::Model>>
where
    C: ConnectionTrait,
{
    Withdrawal::find()
        .filter(withdrawal::Column::PoolId.eq(pool_id))
        .order_by_desc(withdrawal::Column::CreatedAt)
        .order_by_desc(withdrawal::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Moves a pending withdrawal to a terminal status.
///
/// Completing applies the money movement in the same transaction as the status change.
#[instrument(skip(db))]
pub async fn transition_withdrawal(
    db: &DatabaseConnection,
    withdrawal_id: i64,
    to: WithdrawalStatus,
    now: DateTime<Utc>,
) -> Result<withdrawal::Model> {
    let txn = db.begin().await?;
    let current = get_withdrawal(&txn, withdrawal_id)
        .await?
        .ok_or(Error::WithdrawalNotFound { withdrawal_id })?;

    if current.status.is_terminal() || !to.is_terminal() {
        return Err(Error::InvalidStatusTransition {
            from: current.status.to_value(),
            to: to.to_value(),
        });
    }

    if to == WithdrawalStatus::Completed {
        append_compensation(
            &txn,
            current.pool_id,
            current.user_id,
            -current.requested_cents,
            now,
        )
        .await?;
        credit_balance(&txn, current.user_id, current.net_cents).await?;
    }

    let mut active: withdrawal::ActiveModel = current.into();
    active.status = Set(to);
    active.updated_at = Set(now);
    let updated = active.update(&txn).await?;
    txn.commit().await?;

    info!(status = %to.to_value(), "Withdrawal status changed");
    Ok(updated)
}

/// Marks a withdrawal as paid out.
pub async fn complete_withdrawal(
    db: &DatabaseConnection,
    withdrawal_id: i64,
    now: DateTime<Utc>,
) -> Result<withdrawal::Model> {
    transition_withdrawal(db, withdrawal_id, WithdrawalStatus::Completed, now).await
}

/// Cancels a withdrawal on behalf of its requester.
pub async fn cancel_withdrawal(
    db: &DatabaseConnection,
    withdrawal_id: i64,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<withdrawal::Model> {
    let current = get_withdrawal(db, withdrawal_id)
        .await?
        .ok_or(Error::WithdrawalNotFound { withdrawal_id })?;
    if current.user_id != user_id {
        return Err(Error::validation(
            "Only the requester can cancel a withdrawal",
        ));
    }
    transition_withdrawal(db, withdrawal_id, WithdrawalStatus::Cancelled, now).await
}

/// Marks a withdrawal as refused.
pub async fn reject_withdrawal(
    db: &DatabaseConnection,
    withdrawal_id: i64,
    now: DateTime<Utc>,
) -> Result<withdrawal::Model> {
    transition_withdrawal(db, withdrawal_id, WithdrawalStatus::Rejected, now).await
}
