//! User business logic - registration, lookup, soft-disable and aggregate upkeep.
//!
//! A user's points are the authoritative reward total and are only ever
//! incremented inside the contribution's database transaction. The user-level
//! streak fields are aggregates: the best current and best longest streak over
//! all of the user's memberships.

use crate::{
    entities::{Membership, User, membership, user},
    errors::{Error, Result},
};
use sea_orm::{QuerySelect, Set, prelude::*, sea_query::Expr};
use tracing::info;

/// Points needed per level.
pub const POINTS_PER_LEVEL: i64 = 100;

/// Level for a points total: 1 at zero points, +1 every [`POINTS_PER_LEVEL`].
#[must_use]
pub fn level_for_points(points: i64) -> i32 {
    i32::try_from(points.max(0) / POINTS_PER_LEVEL + 1).unwrap_or(i32::MAX)
}

/// Registers a new user with zeroed counters.
pub async fn create_user<C>(db: &C, name: String) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(Error::validation("User name cannot be empty"));
    }

    let user = user::ActiveModel {
        name: Set(name),
        points: Set(0),
        level: Set(level_for_points(0)),
        current_streak: Set(0),
        longest_streak: Set(0),
        balance_cents: Set(0),
        is_active: Set(true),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(user_id = user.id, "Registered user");
    Ok(user)
}

/// Finds a user by id, including disabled users.
pub async fn get_user<C>(db: &C, user_id: i64) -> Result<Option<user::Model>>
where
    C: ConnectionTrait,
{
    User::find_by_id(user_id).one(db).await.map_err(Into::into)
}

/// Finds an active user or fails with [`Error::UserNotFound`].
pub async fn require_active_user<C>(db: &C, user_id: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    get_user(db, user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or(Error::UserNotFound { user_id })
}

/// Soft-disables a user. Their history stays in the ledger.
pub async fn disable_user<C>(db: &C, user_id: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    let user = get_user(db, user_id)
        .await?
        .ok_or(Error::UserNotFound { user_id })?;

    let mut active: user::ActiveModel = user.into();
    active.is_active = Set(false);
    let user = active.update(db).await?;
    info!(user_id, "Disabled user");
    Ok(user)
}

/// Adds points to a user and recomputes their level in one statement pair.
pub async fn add_points<C>(db: &C, user_id: i64, points: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    User::update_many()
        .col_expr(user::Column::Points, Expr::col(user::Column::Points).add(points))
        .filter(user::Column::Id.eq(user_id))
        .exec(db)
        .await?;

    let user = get_user(db, user_id)
        .await?
        .ok_or(Error::UserNotFound { user_id })?;

    let level = level_for_points(user.points);
    if level == user.level {
        return Ok(user);
    }
    let mut active: user::ActiveModel = user.into();
    active.level = Set(level);
    active.update(db).await.map_err(Into::into)
}

/// Adds to the user's balance (net amounts of completed withdrawals).
pub async fn credit_balance<C>(db: &C, user_id: i64, cents: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    User::update_many()
        .col_expr(
            user::Column::BalanceCents,
            Expr::col(user::Column::BalanceCents).add(cents),
        )
        .filter(user::Column::Id.eq(user_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Recomputes the user's aggregate streaks from their memberships.
///
/// `longest_streak` is only ever raised.
pub async fn refresh_streak_aggregate<C>(db: &C, user_id: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    let user = get_user(db, user_id)
        .await?
        .ok_or(Error::UserNotFound { user_id })?;

    let best: Option<(Option<i32>, Option<i32>)> = Membership::find()
        .select_only()
        .column_as(membership::Column::CurrentStreak.max(), "current")
        .column_as(membership::Column::LongestStreak.max(), "longest")
        .filter(membership::Column::UserId.eq(user_id))
        .into_tuple()
        .one(db)
        .await?;

    let (current, longest) = best.unwrap_or_default();
    let current = current.unwrap_or(0);
    let longest = longest.unwrap_or(0).max(user.longest_streak);

    if current == user.current_streak && longest == user.longest_streak {
        return Ok(user);
    }
    let mut active: user::ActiveModel = user.into();
    active.current_streak = Set(current);
    active.longest_streak = Set(longest);
    active.update(db).await.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_level_for_points() {
        assert_eq!(level_for_points(0), 1);
        assert_eq!(level_for_points(99), 1);
        assert_eq!(level_for_points(100), 2);
        assert_eq!(level_for_points(1_050), 11);
        assert_eq!(level_for_points(-5), 1);
    }

    #[tokio::test]
    async fn test_create_user_validation() -> Result<()> {
        let db = setup_test_db().await?;
        let result = create_user(&db, "   ".to_string()).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_and_disable_user() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, " alice ").await?;
        assert_eq!(user.name, "alice");
        assert_eq!(user.level, 1);
        assert!(user.is_active);

        disable_user(&db, user.id).await?;
        assert!(matches!(
            require_active_user(&db, user.id).await,
            Err(Error::UserNotFound { .. })
        ));
        // Still present for history
        assert!(get_user(&db, user.id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_add_points_updates_level() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "bob").await?;

        let user_after = add_points(&db, user.id, 60).await?;
        assert_eq!(user_after.points, 60);
        assert_eq!(user_after.level, 1);

        let user_after = add_points(&db, user.id, 60).await?;
        assert_eq!(user_after.points, 120);
        assert_eq!(user_after.level, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_streak_aggregate_never_lowers_longest() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "carol").await?;

        let mut active: user::ActiveModel = user.clone().into();
        active.longest_streak = Set(7);
        active.update(&db).await?;

        let refreshed = refresh_streak_aggregate(&db, user.id).await?;
        assert_eq!(refreshed.current_streak, 0);
        assert_eq!(refreshed.longest_streak, 7);
        Ok(())
    }
}
