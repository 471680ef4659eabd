//! Leaderboard aggregation.
//!
//! Rankings are a read-side projection of the contribution ledger grouped by
//! member. They hold no state of their own; [`LeaderboardCache`] only memoizes
//! them and must be invalidated whenever a pool's ledger grows.

use crate::{
    core::pool::{ledger_totals_by_user, list_memberships, require_pool},
    entities::{Contribution, User, contribution, user},
    errors::Result,
};
use sea_orm::{QuerySelect, prelude::*};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

/// What members are ranked by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    /// Net cents contributed to the pool
    TotalContributed,
    /// Points earned in the pool
    Points,
}

/// One row of a pool leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// 1-based position
    pub rank: usize,
    /// Member
    pub user_id: i64,
    /// Member's display name
    pub name: String,
    /// Net cents contributed
    pub total_cents: i64,
    /// Points earned in this pool
    pub points: i64,
}

async fn points_by_user<C>(db: &C, pool_id: i64) -> Result<HashMap<i64, i64>>
where
    C: ConnectionTrait,
{
    let rows: Vec<(i64, Option<i64>)> = Contribution::find()
        .select_only()
        .column(contribution::Column::UserId)
        .column_as(contribution::Column::PointsAwarded.sum(), "points")
        .filter(contribution::Column::PoolId.eq(pool_id))
        .group_by(contribution::Column::UserId)
        .into_tuple()
        .all(db)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(user_id, points)| (user_id, points.unwrap_or(0)))
        .collect())
}

/// Ranks a pool's members, highest first.
///
/// Ties keep membership join order (earliest first), so the result is deterministic.
pub async fn rank<C>(db: &C, pool_id: i64, by: RankBy) -> Result<Vec<LeaderboardEntry>>
where
    C: ConnectionTrait,
{
    require_pool(db, pool_id).await?;
    let members = list_memberships(db, pool_id).await?;
    let totals = ledger_totals_by_user(db, pool_id).await?;
    let points = points_by_user(db, pool_id).await?;

    let user_ids: Vec<i64> = members.iter().map(|m| m.user_id).collect();
    let names: HashMap<i64, String> = User::find()
        .filter(user::Column::Id.is_in(user_ids))
        .all(db)
        .await?
        .into_iter()
        .map(|u| (u.id, u.name))
        .collect();

    let mut entries: Vec<LeaderboardEntry> = members
        .iter()
        .map(|m| LeaderboardEntry {
            rank: 0,
            user_id: m.user_id,
            name: names.get(&m.user_id).cloned().unwrap_or_default(),
            total_cents: totals.get(&m.user_id).copied().unwrap_or(0),
            points: points.get(&m.user_id).copied().unwrap_or(0),
        })
        .collect();

    // Stable sort keeps join order among equals.
    match by {
        RankBy::TotalContributed => entries.sort_by(|a, b| b.total_cents.cmp(&a.total_cents)),
        RankBy::Points => entries.sort_by(|a, b| b.points.cmp(&a.points)),
    }
    for (idx, entry) in entries.iter_mut().enumerate() {
        entry.rank = idx + 1;
    }
    Ok(entries)
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<(i64, RankBy), Vec<LeaderboardEntry>>,
    // Bumped on every invalidation of a pool
    generations: HashMap<i64, u64>,
}

impl CacheState {
    fn generation(&self, pool_id: i64) -> u64 {
        self.generations.get(&pool_id).copied().unwrap_or(0)
    }
}

/// Memoized leaderboards, keyed by pool and ranking.
///
/// A ranking computed before an invalidation of its pool is never stored.
#[derive(Debug, Clone, Default)]
pub struct LeaderboardCache {
    state: Arc<RwLock<CacheState>>,
}

impl LeaderboardCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached ranking or computes and stores it.
    pub async fn get_or_rank<C>(&self, db: &C, pool_id: i64, by: RankBy) -> Result<Vec<LeaderboardEntry>>
    where
        C: ConnectionTrait,
    {
        let generation = {
            let state = self.state.read().await;
            if let Some(hit) = state.entries.get(&(pool_id, by)) {
                trace!(pool_id, ?by, "Leaderboard cache hit");
                return Ok(hit.clone());
            }
            state.generation(pool_id)
        };

        let ranked = rank(db, pool_id, by).await?;
        self.store(pool_id, by, generation, ranked.clone()).await;
        Ok(ranked)
    }

    async fn store(&self, pool_id: i64, by: RankBy, generation: u64, ranked: Vec<LeaderboardEntry>) -> bool {
        let mut state = self.state.write().await;
        if state.generation(pool_id) != generation {
            trace!(pool_id, ?by, "Discarding ranking computed before invalidation");
            return false;
        }
        state.entries.insert((pool_id, by), ranked);
        true
    }

    /// Drops every cached ranking of a pool.
    pub async fn invalidate(&self, pool_id: i64) {
        let mut state = self.state.write().await;
        state.entries.retain(|(id, _), _| *id != pool_id);
        *state.generations.entry(pool_id).or_default() += 1;
        trace!(pool_id, "Leaderboard cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::pool::{create_pool, join_pool};
    use crate::errors::Error;
    use crate::test_utils::*;
    use chrono::{Duration, TimeZone, Utc};

    #[tokio::test]
    async fn test_rank_orders_by_total_with_join_order_ties() -> Result<()> {
        let (db, pool, owner) = setup_with_group_pool().await?;
        let second = create_test_user(&db, "second").await?;
        let third = create_test_user(&db, "third").await?;
        join_pool(&db, pool.id, second.id, Utc::now()).await?;
        join_pool(&db, pool.id, third.id, Utc::now()).await?;

        insert_raw_contribution(&db, pool.id, third.id, 5_000).await?;
        insert_raw_contribution(&db, pool.id, owner.id, 1_000).await?;
        insert_raw_contribution(&db, pool.id, second.id, 1_000).await?;

        let board = rank(&db, pool.id, RankBy::TotalContributed).await?;
        let order: Vec<i64> = board.iter().map(|e| e.user_id).collect();
        assert_eq!(order, vec![third.id, owner.id, second.id]);
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[0].name, "third");
        assert_eq!(board[2].rank, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_rank_includes_members_without_contributions() -> Result<()> {
        let (db, pool, owner) = setup_with_group_pool().await?;
        let board = rank(&db, pool.id, RankBy::Points).await?;
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].user_id, owner.id);
        assert_eq!(board[0].total_cents, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_rank_unknown_pool() -> Result<()> {
        let db = setup_test_db().await?;
        assert!(matches!(
            rank(&db, 5, RankBy::TotalContributed).await,
            Err(Error::PoolNotFound { pool_id: 5 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_cache_serves_stale_until_invalidated() -> Result<()> {
        let (db, pool, owner) = setup_with_group_pool().await?;
        let cache = LeaderboardCache::new();

        let before = cache.get_or_rank(&db, pool.id, RankBy::TotalContributed).await?;
        assert_eq!(before[0].total_cents, 0);

        insert_raw_contribution(&db, pool.id, owner.id, 700).await?;
        let cached = cache.get_or_rank(&db, pool.id, RankBy::TotalContributed).await?;
        assert_eq!(cached[0].total_cents, 0);

        cache.invalidate(pool.id).await;
        let fresh = cache.get_or_rank(&db, pool.id, RankBy::TotalContributed).await?;
        assert_eq!(fresh[0].total_cents, 700);
        Ok(())
    }

    #[tokio::test]
    async fn test_ties_follow_join_time_not_insert_order() -> Result<()> {
        let db = setup_test_db().await?;
        let owner = create_test_user(&db, "owner").await?;
        let second = create_test_user(&db, "second").await?;
        let third = create_test_user(&db, "third").await?;
        let t0 = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let (pool, _) = create_pool(&db, owner.id, group_pool_params("Ties"), t0).await?;
        join_pool(&db, pool.id, second.id, t0 + Duration::hours(2)).await?;
        join_pool(&db, pool.id, third.id, t0 + Duration::hours(1)).await?;

        for member in [&owner, &second, &third] {
            insert_raw_contribution(&db, pool.id, member.id, 1_000).await?;
        }

        let board = rank(&db, pool.id, RankBy::TotalContributed).await?;
        let order: Vec<i64> = board.iter().map(|e| e.user_id).collect();
        assert_eq!(order, vec![owner.id, third.id, second.id]);
        Ok(())
    }

    #[tokio::test]
    async fn test_ranking_computed_before_invalidation_is_not_cached() -> Result<()> {
        let (db, pool, owner) = setup_with_group_pool().await?;
        let cache = LeaderboardCache::new();

        // A reader misses and ranks, then a contribution lands before it stores
        let generation = cache.state.read().await.generation(pool.id);
        let stale = rank(&db, pool.id, RankBy::TotalContributed).await?;
        insert_raw_contribution(&db, pool.id, owner.id, 900).await?;
        cache.invalidate(pool.id).await;

        assert!(!cache.store(pool.id, RankBy::TotalContributed, generation, stale).await);
        let served = cache.get_or_rank(&db, pool.id, RankBy::TotalContributed).await?;
        assert_eq!(served[0].total_cents, 900);
        Ok(())
    }
}
