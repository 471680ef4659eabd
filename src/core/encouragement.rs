//! Encouragements - short directed messages between savers.

use crate::{
    core::{pool::require_membership, user::require_active_user},
    entities::{Encouragement, encouragement, encouragement::EncouragementKind},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, QuerySelect, Set, prelude::*};
use tracing::debug;

/// Longest accepted message, in characters.
pub const MAX_TEXT_CHARS: usize = 280;

/// Sends an encouragement from one user to another, optionally about a pool.
///
/// When a pool is given both users must be members of it.
pub async fn send_encouragement<C>(
    db: &C,
    from_user_id: i64,
    to_user_id: i64,
    pool_id: Option<i64>,
    text: &str,
    kind: EncouragementKind,
    now: DateTime<Utc>,
) -> Result<encouragement::Model>
where
    C: ConnectionTrait,
{
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::validation("Encouragement text cannot be empty"));
    }
    if text.chars().count() > MAX_TEXT_CHARS {
        return Err(Error::validation(format!(
            "Encouragement text must be at most {MAX_TEXT_CHARS} characters"
        )));
    }
    if from_user_id == to_user_id {
        return Err(Error::validation("Cannot send an encouragement to yourself"));
    }

    require_active_user(db, from_user_id).await?;
    require_active_user(db, to_user_id).await?;
    if let Some(pool_id) = pool_id {
        require_membership(db, pool_id, from_user_id).await?;
        require_membership(db, pool_id, to_user_id).await?;
    }

    let row = encouragement::ActiveModel {
        from_user_id: Set(from_user_id),
        to_user_id: Set(to_user_id),
        pool_id: Set(pool_id),
        text: Set(text.to_string()),
        kind: Set(kind),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    debug!(encouragement_id = row.id, from_user_id, to_user_id, "Encouragement sent");
    Ok(row)
}

/// Encouragements received by a user, newest first.
pub async fn list_encouragements<C>(
    db: &C,
    to_user_id: i64,
    limit: u64,
) -> Result<Vec<encouragement::Model>>
where
    C: ConnectionTrait,
{
    Encouragement::find()
        .filter(encouragement::Column::ToUserId.eq(to_user_id))
        .order_by_desc(encouragement::Column::CreatedAt)
        .order_by_desc(encouragement::Column::Id)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pool::join_pool;
    use crate::test_utils::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_send_and_list_newest_first() -> Result<()> {
        let db = setup_test_db().await?;
        let alice = create_test_user(&db, "alice").await?;
        let bob = create_test_user(&db, "bob").await?;
        let now = Utc::now();

        send_encouragement(&db, alice.id, bob.id, None, "  keep going  ", EncouragementKind::Cheer, now)
            .await?;
        send_encouragement(
            &db,
            alice.id,
            bob.id,
            None,
            "payday tomorrow",
            EncouragementKind::Nudge,
            now + Duration::minutes(1),
        )
        .await?;

        let inbox = list_encouragements(&db, bob.id, 10).await?;
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].text, "payday tomorrow");
        assert_eq!(inbox[1].text, "keep going");
        assert!(list_encouragements(&db, alice.id, 10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_bad_input() -> Result<()> {
        let db = setup_test_db().await?;
        let alice = create_test_user(&db, "alice").await?;
        let bob = create_test_user(&db, "bob").await?;
        let now = Utc::now();

        let blank = send_encouragement(&db, alice.id, bob.id, None, "   ", EncouragementKind::Cheer, now).await;
        assert!(matches!(blank, Err(Error::Validation { .. })));

        let own = send_encouragement(&db, alice.id, alice.id, None, "hi", EncouragementKind::Cheer, now).await;
        assert!(matches!(own, Err(Error::Validation { .. })));

        let long = "a".repeat(MAX_TEXT_CHARS + 1);
        let too_long = send_encouragement(&db, alice.id, bob.id, None, &long, EncouragementKind::Cheer, now).await;
        assert!(matches!(too_long, Err(Error::Validation { .. })));

        let ghost = send_encouragement(&db, alice.id, 999, None, "hi", EncouragementKind::Cheer, now).await;
        assert!(matches!(ghost, Err(Error::UserNotFound { user_id: 999 })));
        Ok(())
    }

    #[tokio::test]
    async fn test_pool_scoped_requires_both_members() -> Result<()> {
        let (db, pool, owner) = setup_with_group_pool().await?;
        let friend = create_test_user(&db, "friend").await?;
        let now = Utc::now();

        let result = send_encouragement(
            &db,
            owner.id,
            friend.id,
            Some(pool.id),
            "join us",
            EncouragementKind::Nudge,
            now,
        )
        .await;
        assert!(matches!(result, Err(Error::MembershipNotFound { .. })));

        join_pool(&db, pool.id, friend.id, Utc::now()).await?;
        let sent = send_encouragement(
            &db,
            owner.id,
            friend.id,
            Some(pool.id),
            "welcome",
            EncouragementKind::Celebration,
            now,
        )
        .await?;
        assert_eq!(sent.pool_id, Some(pool.id));
        Ok(())
    }
}
