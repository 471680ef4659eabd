//! Reward engine - points and badges.
//!
//! Points are computed before the contribution commits and written in the same
//! transaction, so they are never lost. Badges are evaluated afterwards against
//! the committed state. Awarding is idempotent: the `(user, badge)` pair is
//! unique, and re-evaluating the same state never awards twice.

use crate::{
    config::badges::BadgeConfig,
    entities::{
        Badge, Contribution, UserBadge, badge, badge::BadgeRule, contribution, membership, pool,
        user, user_badge,
    },
    errors::Result,
};
use sea_orm::{QueryOrder, Set, SqlErr, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Minimum points for any contribution.
pub const MIN_POINTS: i64 = 5;

/// Points for a contribution: one per dollar (rounded), never less than [`MIN_POINTS`].
#[must_use]
pub fn points_for_amount(amount_cents: i64) -> i64 {
    let dollars = (amount_cents.max(0) + 50) / 100;
    dollars.max(MIN_POINTS)
}

/// Facts the badge rules are evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadgeContext {
    /// User being evaluated
    pub user_id: i64,
    /// Pool the triggering contribution went to
    pub pool_id: i64,
    /// Member's positive contributions to the pool
    pub contribution_count: i32,
    /// Member's current streak in the pool
    pub current_streak: i32,
    /// Member's total in the pool (cents)
    pub total_contributed_cents: i64,
    /// User's lifetime points
    pub user_points: i64,
    /// Pool goal in cents (0 = open-ended)
    pub pool_goal_cents: i64,
    /// Pool total in cents
    pub pool_accumulated_cents: i64,
}

impl BadgeContext {
    /// Builds the context from committed rows.
    #[must_use]
    pub const fn from_state(
        member: &membership::Model,
        user: &user::Model,
        pool: &pool::Model,
    ) -> Self {
        Self {
            user_id: user.id,
            pool_id: pool.id,
            contribution_count: member.contribution_count,
            current_streak: member.current_streak,
            total_contributed_cents: member.total_contributed_cents,
            user_points: user.points,
            pool_goal_cents: pool.goal_cents,
            pool_accumulated_cents: pool.accumulated_cents,
        }
    }
}

/// Outcome of evaluating one contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardOutcome {
    /// Points granted for the contribution
    pub points_awarded: i64,
    /// Whether the member was on a streak longer than one period
    pub streak_bonus: bool,
    /// Badges earned by this evaluation
    pub new_badges: Vec<badge::Model>,
}

/// Whether `badge`'s unlock rule holds for `ctx`.
#[must_use]
pub fn rule_satisfied(badge: &badge::Model, ctx: &BadgeContext) -> bool {
    match badge.rule {
        BadgeRule::ContributionCount => {
            badge.threshold > 0
                && ctx.contribution_count > 0
                && i64::from(ctx.contribution_count) % badge.threshold == 0
        }
        BadgeRule::FirstContribution => ctx.contribution_count >= 1,
        BadgeRule::Streak => i64::from(ctx.current_streak) >= badge.threshold.max(1),
        BadgeRule::TotalContributed => ctx.total_contributed_cents >= badge.threshold.max(1),
        BadgeRule::Points => ctx.user_points >= badge.threshold.max(1),
        BadgeRule::PoolGoalReached => {
            ctx.pool_goal_cents > 0 && ctx.pool_accumulated_cents >= ctx.pool_goal_cents
        }
    }
}

/// Inserts missing catalog entries and refreshes changed ones, keyed by name.
///
/// Returns the number of badges inserted.
pub async fn seed_badge_catalog<C>(db: &C, catalog: &[BadgeConfig]) -> Result<usize>
where
    C: ConnectionTrait,
{
    let mut inserted = 0;
    for entry in catalog {
        let existing = Badge::find()
            .filter(badge::Column::Name.eq(entry.name.as_str()))
            .one(db)
            .await?;

        match existing {
            Some(row)
                if row.description == entry.description
                    && row.rarity == entry.rarity
                    && row.rule == entry.rule
                    && row.threshold == entry.threshold => {}
            Some(row) => {
                let mut active: badge::ActiveModel = row.into();
                active.description = Set(entry.description.clone());
                active.rarity = Set(entry.rarity);
                active.rule = Set(entry.rule);
                active.threshold = Set(entry.threshold);
                active.update(db).await?;
                debug!(badge = %entry.name, "Updated catalog badge");
            }
            None => {
                badge::ActiveModel {
                    name: Set(entry.name.clone()),
                    description: Set(entry.description.clone()),
                    rarity: Set(entry.rarity),
                    rule: Set(entry.rule),
                    threshold: Set(entry.threshold),
                    ..Default::default()
                }
                .insert(db)
                .await?;
                inserted += 1;
            }
        }
    }
    info!(inserted, total = catalog.len(), "Badge catalog seeded");
    Ok(inserted)
}

/// Awards a badge unless the user already holds it.
///
/// Returns the new award, or `None` if it already existed.
pub async fn award_badge<C>(
    db: &C,
    user_id: i64,
    badge_id: i64,
    pool_id: Option<i64>,
) -> Result<Option<user_badge::Model>>
where
    C: ConnectionTrait,
{
    let already = UserBadge::find()
        .filter(user_badge::Column::UserId.eq(user_id))
        .filter(user_badge::Column::BadgeId.eq(badge_id))
        .one(db)
        .await?;
    if already.is_some() {
        return Ok(None);
    }

    let result = user_badge::ActiveModel {
        user_id: Set(user_id),
        badge_id: Set(badge_id),
        pool_id: Set(pool_id),
        earned_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await;

    match result {
        Ok(award) => Ok(Some(award)),
        // Lost a race with a concurrent evaluation; the badge is held either way.
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Evaluates every catalog badge against `ctx` and awards the ones newly earned.
pub async fn evaluate_badges<C>(db: &C, ctx: &BadgeContext) -> Result<Vec<badge::Model>>
where
    C: ConnectionTrait,
{
    let catalog = Badge::find().order_by_asc(badge::Column::Id).all(db).await?;

    let mut earned = Vec::new();
    for badge in catalog {
        if !rule_satisfied(&badge, ctx) {
            continue;
        }
        if award_badge(db, ctx.user_id, badge.id, Some(ctx.pool_id))
            .await?
            .is_some()
        {
            info!(user_id = ctx.user_id, badge = %badge.name, "Badge earned");
            earned.push(badge);
        }
    }
    Ok(earned)
}

/// Reward evaluation for a committed contribution.
pub async fn evaluate<C>(
    db: &C,
    contribution: &contribution::Model,
    member: &membership::Model,
    user: &user::Model,
    pool: &pool::Model,
) -> Result<RewardOutcome>
where
    C: ConnectionTrait,
{
    let ctx = BadgeContext::from_state(member, user, pool);
    let new_badges = evaluate_badges(db, &ctx).await?;
    Ok(RewardOutcome {
        points_awarded: contribution.points_awarded,
        streak_bonus: contribution.streak_bonus,
        new_badges,
    })
}

/// Badges held by a user, with the time each was earned, oldest first.
pub async fn badges_for_user<C>(
    db: &C,
    user_id: i64,
) -> Result<Vec<(user_badge::Model, Option<badge::Model>)>>
where
    C: ConnectionTrait,
{
    UserBadge::find()
        .filter(user_badge::Column::UserId.eq(user_id))
        .order_by_asc(user_badge::Column::EarnedAt)
        .find_also_related(Badge)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Points a user earned in one pool.
pub async fn pool_points_for_user<C>(db: &C, pool_id: i64, user_id: i64) -> Result<i64>
where
    C: ConnectionTrait,
{
    let rows = Contribution::find()
        .filter(contribution::Column::PoolId.eq(pool_id))
        .filter(contribution::Column::UserId.eq(user_id))
        .all(db)
        .await?;
    Ok(rows.iter().map(|c| c.points_awarded).sum())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::config::badges::{CONSISTENT_SAVER, default_catalog};
    use crate::entities::badge::Rarity;
    use crate::test_utils::*;

    fn ctx(count: i32) -> BadgeContext {
        BadgeContext {
            user_id: 1,
            pool_id: 1,
            contribution_count: count,
            current_streak: 0,
            total_contributed_cents: 0,
            user_points: 0,
            pool_goal_cents: 0,
            pool_accumulated_cents: 0,
        }
    }

    fn badge(rule: BadgeRule, threshold: i64) -> badge::Model {
        badge::Model {
            id: 1,
            name: "b".to_string(),
            description: String::new(),
            rarity: Rarity::Common,
            rule,
            threshold,
        }
    }

    #[test]
    fn test_points_floor_applies_to_small_amounts() {
        assert_eq!(points_for_amount(40), 5);
        assert_eq!(points_for_amount(1), 5);
        assert_eq!(points_for_amount(499), 5);
    }

    #[test]
    fn test_points_round_to_nearest_dollar() {
        assert_eq!(points_for_amount(549), 5);
        assert_eq!(points_for_amount(550), 6);
        assert_eq!(points_for_amount(1_000), 10);
        assert_eq!(points_for_amount(12_345), 123);
    }

    #[test]
    fn test_contribution_count_rule_fires_on_multiples() {
        let rule = badge(BadgeRule::ContributionCount, 5);
        assert!(!rule_satisfied(&rule, &ctx(0)));
        assert!(!rule_satisfied(&rule, &ctx(4)));
        assert!(rule_satisfied(&rule, &ctx(5)));
        assert!(!rule_satisfied(&rule, &ctx(6)));
        assert!(rule_satisfied(&rule, &ctx(10)));
        assert!(!rule_satisfied(&badge(BadgeRule::ContributionCount, 0), &ctx(5)));
    }

    #[test]
    fn test_pool_goal_rule_ignores_open_ended_pools() {
        let rule = badge(BadgeRule::PoolGoalReached, 0);
        let mut c = ctx(1);
        c.pool_accumulated_cents = 10_000;
        assert!(!rule_satisfied(&rule, &c));
        c.pool_goal_cents = 10_000;
        assert!(rule_satisfied(&rule, &c));
    }

    #[tokio::test]
    async fn test_seed_catalog_is_idempotent() -> Result<()> {
        let db = setup_test_db().await?;
        let catalog = default_catalog();
        assert_eq!(seed_badge_catalog(&db, &catalog).await?, catalog.len());
        assert_eq!(seed_badge_catalog(&db, &catalog).await?, 0);
        assert_eq!(Badge::find().count(&db).await?, catalog.len() as u64);
        Ok(())
    }

    #[tokio::test]
    async fn test_award_badge_twice_is_noop() -> Result<()> {
        let db = setup_test_db().await?;
        seed_badge_catalog(&db, &default_catalog()).await?;
        let user = create_test_user(&db, "alice").await?;
        let saver = Badge::find()
            .filter(badge::Column::Name.eq(CONSISTENT_SAVER))
            .one(&db)
            .await?
            .unwrap();

        assert!(award_badge(&db, user.id, saver.id, None).await?.is_some());
        assert!(award_badge(&db, user.id, saver.id, None).await?.is_none());

        let count = UserBadge::find()
            .filter(user_badge::Column::UserId.eq(user.id))
            .filter(user_badge::Column::BadgeId.eq(saver.id))
            .count(&db)
            .await?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_reevaluating_same_state_awards_nothing_new() -> Result<()> {
        let db = setup_test_db().await?;
        seed_badge_catalog(&db, &default_catalog()).await?;
        let user = create_test_user(&db, "bob").await?;

        let mut c = ctx(5);
        c.user_id = user.id;
        let first: Vec<String> = evaluate_badges(&db, &c)
            .await?
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert!(first.contains(&CONSISTENT_SAVER.to_string()));
        assert!(first.contains(&"First Deposit".to_string()));

        assert!(evaluate_badges(&db, &c).await?.is_empty());
        assert_eq!(badges_for_user(&db, user.id).await?.len(), first.len());
        Ok(())
    }
}
