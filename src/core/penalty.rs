//! Early-withdrawal penalty policy and the group consensus gate.
//!
//! Rules are applied in order:
//! 1. penalty disabled: nothing withheld
//! 2. target date reached: nothing withheld
//! 3. group pool requiring consensus: blocked until every member agreed
//! 4. otherwise `floor(requested * percentage / 100)` is withheld
//!
//! A blocked request is not the same as a penalty-free one; callers must reject
//! the withdrawal with [`Error::ConsensusNotReached`].

use crate::{
    core::pool::{list_memberships, require_membership, require_pool},
    entities::{membership, pool, pool::PoolKind},
    errors::{Error, Result},
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{Set, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Why a withdrawal cannot proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum BlockReason {
    /// Not every member of the group agreed to the penalty policy
    ConsensusNotReached {
        /// Members that agreed
        agreed: u64,
        /// Members in the pool
        total: u64,
    },
}

/// Result of applying the penalty policy to a requested amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyAssessment {
    /// Requested amount in cents
    pub requested_cents: i64,
    /// Cents withheld
    pub penalty_cents: i64,
    /// Cents paid out: requested minus penalty
    pub net_cents: i64,
    /// Whether the penalty policy applies to this request
    pub applicable: bool,
    /// Withdrawal happens before the pool's target date (or the pool has none)
    pub early_withdrawal: bool,
    /// Set when the withdrawal must be rejected
    pub block_reason: Option<BlockReason>,
}

impl PenaltyAssessment {
    fn exempt(requested_cents: i64, early_withdrawal: bool) -> Self {
        Self {
            requested_cents,
            penalty_cents: 0,
            net_cents: requested_cents,
            applicable: false,
            early_withdrawal,
            block_reason: None,
        }
    }

    /// Converts a blocked assessment into the matching error.
    pub fn ensure_allowed(self) -> Result<Self> {
        match self.block_reason {
            Some(BlockReason::ConsensusNotReached { agreed, total }) => {
                Err(Error::ConsensusNotReached { agreed, total })
            }
            None => Ok(self),
        }
    }
}

/// Agreement tally of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusTally {
    /// Members that agreed
    pub agreed_count: u64,
    /// Members in the pool
    pub total_members: u64,
    /// Every member agreed (and there is at least one member)
    pub all_agreed: bool,
}

/// Counts agreements among `members`.
#[must_use]
pub fn consensus_tally(members: &[membership::Model]) -> ConsensusTally {
    let agreed_count = members.iter().filter(|m| m.agreed_to_penalty).count() as u64;
    let total_members = members.len() as u64;
    ConsensusTally {
        agreed_count,
        total_members,
        all_agreed: total_members > 0 && agreed_count == total_members,
    }
}

/// Applies the penalty policy of `pool` to a withdrawal of `requested_cents` on `today`.
#[must_use]
pub fn compute_penalty(
    pool: &pool::Model,
    members: &[membership::Model],
    requested_cents: i64,
    today: NaiveDate,
) -> PenaltyAssessment {
    let early_withdrawal = pool.target_date.is_none_or(|target| today < target);

    if !pool.penalty_enabled || !early_withdrawal {
        return PenaltyAssessment::exempt(requested_cents, early_withdrawal);
    }

    if pool.kind == PoolKind::Group && pool.requires_consensus {
        let tally = consensus_tally(members);
        if !tally.all_agreed {
            return PenaltyAssessment {
                block_reason: Some(BlockReason::ConsensusNotReached {
                    agreed: tally.agreed_count,
                    total: tally.total_members,
                }),
                ..PenaltyAssessment::exempt(requested_cents, early_withdrawal)
            };
        }
    }

    let penalty_cents = requested_cents.max(0) * i64::from(pool.penalty_percentage) / 100;
    PenaltyAssessment {
        requested_cents,
        penalty_cents,
        net_cents: requested_cents - penalty_cents,
        applicable: true,
        early_withdrawal,
        block_reason: None,
    }
}

/// Loads the pool and its members, then applies [`compute_penalty`].
pub async fn assess<C>(db: &C, pool_id: i64, requested_cents: i64, now: DateTime<Utc>) -> Result<PenaltyAssessment>
where
    C: ConnectionTrait,
{
    let pool = require_pool(db, pool_id).await?;
    let members = list_memberships(db, pool_id).await?;
    Ok(compute_penalty(&pool, &members, requested_cents, now.date_naive()))
}

/// Records one member's agreement to (or withdrawal from) the penalty policy.
///
/// Each member only ever writes their own row, so concurrent calls from
/// different members cannot overwrite each other.
pub async fn set_member_agreement<C>(
    db: &C,
    pool_id: i64,
    user_id: i64,
    agreed: bool,
    now: DateTime<Utc>,
) -> Result<ConsensusTally>
where
    C: ConnectionTrait,
{
    require_pool(db, pool_id).await?;
    let member = require_membership(db, pool_id, user_id).await?;

    let mut active: membership::ActiveModel = member.into();
    active.agreed_to_penalty = Set(agreed);
    active.agreed_at = Set(agreed.then_some(now));
    active.update(db).await?;

    let tally = consensus_tally(&list_memberships(db, pool_id).await?);
    info!(
        pool_id,
        user_id,
        agreed,
        agreed_count = tally.agreed_count,
        total = tally.total_members,
        "Penalty agreement updated"
    );
    Ok(tally)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::pool::join_pool;
    use crate::test_utils::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn member(agreed: bool) -> membership::Model {
        membership::Model {
            id: 1,
            pool_id: 1,
            user_id: 1,
            role: membership::MemberRole::Member,
            current_streak: 0,
            longest_streak: 0,
            contribution_count: 0,
            total_contributed_cents: 0,
            last_contribution_at: None,
            agreed_to_penalty: agreed,
            agreed_at: None,
            version: 0,
            joined_at: Utc::now(),
        }
    }

    fn penalised_pool(kind: PoolKind, requires_consensus: bool) -> pool::Model {
        pool::Model {
            id: 1,
            name: "p".to_string(),
            owner_id: 1,
            kind,
            goal_cents: 0,
            accumulated_cents: 0,
            target_date: None,
            visibility: pool::Visibility::Private,
            penalty_enabled: true,
            penalty_percentage: 10,
            requires_consensus,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_disabled_penalty_not_applicable() {
        let mut pool = penalised_pool(PoolKind::Solo, false);
        pool.penalty_enabled = false;
        let assessment = compute_penalty(&pool, &[member(false)], 10_000, date(2026, 10, 16));
        assert!(!assessment.applicable);
        assert_eq!(assessment.penalty_cents, 0);
        assert_eq!(assessment.net_cents, 10_000);
    }

    #[test]
    fn test_past_target_date_not_applicable() {
        let mut pool = penalised_pool(PoolKind::Group, true);
        pool.penalty_percentage = 90;
        pool.target_date = Some(date(2026, 1, 1));
        // Consensus missing too, but the date rule comes first
        let assessment = compute_penalty(&pool, &[member(false)], 10_000, date(2026, 10, 16));
        assert!(!assessment.applicable);
        assert!(!assessment.early_withdrawal);
        assert_eq!(assessment.penalty_cents, 0);
        assert!(assessment.block_reason.is_none());
    }

    #[test]
    fn test_target_date_day_itself_is_not_early() {
        let mut pool = penalised_pool(PoolKind::Solo, false);
        pool.target_date = Some(date(2026, 10, 16));
        assert!(!compute_penalty(&pool, &[], 100, date(2026, 10, 16)).applicable);
        assert!(compute_penalty(&pool, &[], 100, date(2026, 10, 15)).applicable);
    }

    #[test]
    fn test_consensus_blocks_until_unanimous() {
        let pool = penalised_pool(PoolKind::Group, true);
        let members = [member(true), member(true), member(false)];
        let assessment = compute_penalty(&pool, &members, 10_000, date(2026, 10, 16));
        assert_eq!(
            assessment.block_reason,
            Some(BlockReason::ConsensusNotReached { agreed: 2, total: 3 })
        );
        assert!(matches!(
            assessment.ensure_allowed(),
            Err(Error::ConsensusNotReached { agreed: 2, total: 3 })
        ));

        let members = [member(true), member(true), member(true)];
        let assessment = compute_penalty(&pool, &members, 10_000, date(2026, 10, 16));
        assert!(assessment.applicable);
        assert_eq!(assessment.penalty_cents, 1_000);
    }

    #[test]
    fn test_solo_pool_ignores_consensus_flag() {
        let pool = penalised_pool(PoolKind::Solo, true);
        let assessment = compute_penalty(&pool, &[member(false)], 10_000, date(2026, 10, 16));
        assert!(assessment.applicable);
        assert!(assessment.block_reason.is_none());
    }

    #[test]
    fn test_penalty_is_floored_and_net_balances() {
        let mut pool = penalised_pool(PoolKind::Solo, false);
        pool.penalty_percentage = 15;
        for requested in [1, 99, 333, 10_001, 123_457] {
            let a = compute_penalty(&pool, &[], requested, date(2026, 10, 16));
            assert!(a.applicable);
            assert_eq!(a.penalty_cents, requested * 15 / 100);
            assert_eq!(a.requested_cents - a.penalty_cents, a.net_cents);
        }
    }

    #[test]
    fn test_tally_of_empty_pool_is_not_unanimous() {
        let tally = consensus_tally(&[]);
        assert!(!tally.all_agreed);
    }

    #[tokio::test]
    async fn test_set_member_agreement_updates_tally() -> Result<()> {
        let (db, pool, owner) = setup_with_group_pool().await?;
        let friend = create_test_user(&db, "friend").await?;
        join_pool(&db, pool.id, friend.id, Utc::now()).await?;
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();

        let tally = set_member_agreement(&db, pool.id, owner.id, true, now).await?;
        assert_eq!(tally.agreed_count, 1);
        assert_eq!(tally.total_members, 2);
        assert!(!tally.all_agreed);

        let tally = set_member_agreement(&db, pool.id, friend.id, true, now).await?;
        assert!(tally.all_agreed);

        let member = require_membership(&db, pool.id, friend.id).await?;
        assert_eq!(member.agreed_at, Some(now));

        let tally = set_member_agreement(&db, pool.id, friend.id, false, now).await?;
        assert_eq!(tally.agreed_count, 1);
        let member = require_membership(&db, pool.id, friend.id).await?;
        assert!(member.agreed_at.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_agreement_requires_membership() -> Result<()> {
        let (db, pool, _owner) = setup_with_group_pool().await?;
        let stranger = create_test_user(&db, "stranger").await?;
        let result = set_member_agreement(&db, pool.id, stranger.id, true, Utc::now()).await;
        assert!(matches!(result, Err(Error::MembershipNotFound { .. })));
        Ok(())
    }
}
