//! The engine - one context object exposing every ledger operation.
//!
//! The caller always passes the acting user explicitly. The engine serializes
//! writes per membership, publishes events after commits and keeps the
//! leaderboard cache in step with the ledger.

use crate::{
    config::{badges::BadgeConfig, settings::EngineSettings},
    core::{
        contribution::{self, ContributionRequest},
        encouragement,
        leaderboard::{LeaderboardCache, LeaderboardEntry, RankBy},
        payday::{self, PaydaySettings, StreakSummary},
        penalty::{self, ConsensusTally, PenaltyAssessment},
        pool::{self as pools, NewPool, ReconcileReport},
        reward::{self, BadgeContext},
        user as users, withdrawal,
    },
    entities::{
        badge, contribution as contribution_entity, encouragement as encouragement_entity,
        encouragement::EncouragementKind, membership, pool, pool::Visibility, user, user_badge,
        withdrawal as withdrawal_entity,
    },
    errors::{Error, Result},
    events::{EventBus, EventPayload, Subscription},
};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

/// Attempts made by the background badge retry.
pub const BADGE_RETRY_ATTEMPTS: u32 = 3;
const BADGE_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// What a caller gets back from a contribution.
#[derive(Debug, Clone, Serialize)]
pub struct ContributionReceipt {
    /// The ledger row (or the original row on replay)
    pub contribution: contribution_entity::Model,
    /// Points granted by this contribution
    pub points_awarded: i64,
    /// Contributor's streak in the pool
    pub streak: StreakSummary,
    /// Pool total after the commit
    pub pool_total_cents: i64,
    /// Badges earned by this contribution
    pub new_badges: Vec<badge::Model>,
    /// True when an earlier request with the same idempotency key was returned
    pub replayed: bool,
}

/// What a caller gets back from a withdrawal request.
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalReceipt {
    /// The pending withdrawal
    pub withdrawal: withdrawal_entity::Model,
    /// Penalty breakdown
    pub assessment: PenaltyAssessment,
}

type LockTable<K> = Arc<StdMutex<HashMap<K, Arc<Mutex<()>>>>>;

/// Async mutexes created per key on first use and dropped once nobody holds or awaits them.
#[derive(Debug, Clone)]
struct KeyedLocks<K> {
    table: LockTable<K>,
}

impl<K: Eq + Hash + Copy> KeyedLocks<K> {
    fn new() -> Self {
        Self {
            table: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    async fn lock(&self, key: K) -> KeyedGuard<K> {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(key).or_default())
        };
        KeyedGuard {
            guard: Some(lock.lock_owned().await),
            key,
            table: Arc::clone(&self.table),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct KeyedGuard<K: Eq + Hash> {
    guard: Option<OwnedMutexGuard<()>>,
    key: K,
    table: LockTable<K>,
}

impl<K: Eq + Hash> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Waiters hold a clone of the Arc, so a count of one means the table's copy is the last
        if table.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            table.remove(&self.key);
        }
    }
}

/// Shared engine context. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Engine {
    db: DatabaseConnection,
    events: EventBus,
    leaderboard: LeaderboardCache,
    member_locks: KeyedLocks<(i64, i64)>,
    // Held from commit to publish so event order matches commit order within a pool
    pool_locks: KeyedLocks<i64>,
    settings: Arc<EngineSettings>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Creates an engine on the wall clock.
    #[must_use]
    pub fn new(db: DatabaseConnection, settings: EngineSettings) -> Self {
        Self::with_clock(db, settings, Arc::new(SystemClock))
    }

    /// Creates an engine with an explicit time source.
    #[must_use]
    pub fn with_clock(db: DatabaseConnection, settings: EngineSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            events: EventBus::new(settings.event_channel_capacity),
            leaderboard: LeaderboardCache::new(),
            member_locks: KeyedLocks::new(),
            pool_locks: KeyedLocks::new(),
            settings: Arc::new(settings),
            clock,
        }
    }

    /// Underlying database connection
    #[must_use]
    pub const fn database(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Active settings
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// The event bus
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    async fn lock_membership(&self, pool_id: i64, user_id: i64) -> KeyedGuard<(i64, i64)> {
        self.member_locks.lock((pool_id, user_id)).await
    }

    async fn lock_pool(&self, pool_id: i64) -> KeyedGuard<i64> {
        self.pool_locks.lock(pool_id).await
    }

    // Users and pools

    /// Registers a user.
    pub async fn create_user(&self, name: &str) -> Result<user::Model> {
        users::create_user(&self.db, name.to_string()).await
    }

    /// Soft-disables a user.
    pub async fn disable_user(&self, user_id: i64) -> Result<user::Model> {
        users::disable_user(&self.db, user_id).await
    }

    /// Creates a pool owned by `owner_id`.
    pub async fn create_pool(&self, owner_id: i64, new_pool: NewPool) -> Result<(pool::Model, membership::Model)> {
        pools::create_pool(&self.db, owner_id, new_pool, self.clock.now()).await
    }

    /// Every pool, oldest first.
    pub async fn pools(&self) -> Result<Vec<pool::Model>> {
        pools::list_pools(&self.db).await
    }

    /// Adds `user_id` to a group pool.
    pub async fn join_pool(&self, pool_id: i64, user_id: i64) -> Result<membership::Model> {
        users::require_active_user(&self.db, user_id).await?;
        let member = pools::join_pool(&self.db, pool_id, user_id, self.clock.now()).await?;
        self.leaderboard.invalidate(pool_id).await;
        Ok(member)
    }

    // Ledger

    /// Records a contribution, awards points and badges, and notifies the pool.
    #[instrument(skip(self, request), fields(pool_id = request.pool_id, user_id = request.user_id))]
    pub async fn contribute(&self, request: ContributionRequest) -> Result<ContributionReceipt> {
        if request.amount_cents <= 0 {
            return Err(Error::InvalidAmount {
                amount: request.amount_cents,
            });
        }

        let _member = self.lock_membership(request.pool_id, request.user_id).await;
        let pool_guard = self.lock_pool(request.pool_id).await;
        let now = self.clock.now();
        let recorded = contribution::record_contribution(
            &self.db,
            &request,
            now,
            self.settings.streak_window_days,
            self.settings.max_conflict_retries,
        )
        .await?;

        if recorded.replayed {
            return Ok(ContributionReceipt {
                points_awarded: recorded.contribution.points_awarded,
                contribution: recorded.contribution,
                streak: recorded.streak,
                pool_total_cents: recorded.pool.accumulated_cents,
                new_badges: Vec::new(),
                replayed: true,
            });
        }

        self.leaderboard.invalidate(recorded.pool.id).await;
        self.events
            .publish(
                recorded.pool.id,
                EventPayload::ContributionNew {
                    contribution_id: recorded.contribution.id,
                    user_id: recorded.user.id,
                    amount_cents: recorded.contribution.amount_cents,
                    pool_total_cents: recorded.pool.accumulated_cents,
                    points_awarded: recorded.contribution.points_awarded,
                    current_streak: recorded.streak.current_streak,
                },
                now,
            )
            .await;
        drop(pool_guard);

        // Points are already committed; badges are best-effort from here on
        let outcome = reward::evaluate(
            &self.db,
            &recorded.contribution,
            &recorded.membership,
            &recorded.user,
            &recorded.pool,
        )
        .await;
        let new_badges = match outcome {
            Ok(outcome) => outcome.new_badges,
            Err(e) => {
                warn!(error = %e, "Badge evaluation failed, retrying in background");
                let ctx = BadgeContext::from_state(&recorded.membership, &recorded.user, &recorded.pool);
                spawn_badge_retry(self.db.clone(), ctx);
                Vec::new()
            }
        };

        Ok(ContributionReceipt {
            points_awarded: recorded.contribution.points_awarded,
            contribution: recorded.contribution,
            streak: recorded.streak,
            pool_total_cents: recorded.pool.accumulated_cents,
            new_badges,
            replayed: false,
        })
    }

    /// Contributions of a pool, newest first.
    pub async fn contributions(&self, pool_id: i64) -> Result<Vec<contribution_entity::Model>> {
        pools::require_pool(&self.db, pool_id).await?;
        contribution::list_contributions(&self.db, pool_id).await
    }

    /// Rebuilds one pool's running totals from the ledger.
    pub async fn reconcile_pool(&self, pool_id: i64) -> Result<ReconcileReport> {
        let report = pools::reconcile_pool_totals(&self.db, pool_id).await?;
        self.leaderboard.invalidate(pool_id).await;
        Ok(report)
    }

    /// Rebuilds every pool's running totals from the ledger. Returns the pools that had drifted.
    pub async fn reconcile_all(&self) -> Result<Vec<ReconcileReport>> {
        let reports = pools::reconcile_all_pools(&self.db).await?;
        for report in &reports {
            self.leaderboard.invalidate(report.pool_id).await;
        }
        Ok(reports)
    }

    // Withdrawals and penalties

    /// Shows the penalty a withdrawal would incur without recording it.
    pub async fn preview_penalty(&self, pool_id: i64, user_id: i64, amount_cents: i64) -> Result<PenaltyAssessment> {
        withdrawal::preview_penalty(&self.db, pool_id, user_id, amount_cents, self.clock.now()).await
    }

    /// Requests a withdrawal; fails with [`Error::ConsensusNotReached`] while the group gate is closed.
    #[instrument(skip(self, reason))]
    pub async fn withdraw(
        &self,
        pool_id: i64,
        user_id: i64,
        amount_cents: i64,
        reason: &str,
    ) -> Result<WithdrawalReceipt> {
        let _member = self.lock_membership(pool_id, user_id).await;
        let _pool = self.lock_pool(pool_id).await;
        let now = self.clock.now();
        let (row, assessment) =
            withdrawal::request_withdrawal(&self.db, pool_id, user_id, amount_cents, reason, now).await?;

        self.events
            .publish(
                pool_id,
                EventPayload::WithdrawalRequested {
                    withdrawal_id: row.id,
                    user_id,
                    requested_cents: row.requested_cents,
                    penalty_cents: row.penalty_cents,
                },
                now,
            )
            .await;
        Ok(WithdrawalReceipt {
            withdrawal: row,
            assessment,
        })
    }

    /// Withdrawals of a pool, newest first.
    pub async fn withdrawals(&self, pool_id: i64) -> Result<Vec<withdrawal_entity::Model>> {
        pools::require_pool(&self.db, pool_id).await?;
        withdrawal::list_withdrawals(&self.db, pool_id).await
    }

    /// Marks a withdrawal as paid out and moves the money.
    pub async fn complete_withdrawal(&self, withdrawal_id: i64) -> Result<withdrawal_entity::Model> {
        let current = withdrawal::get_withdrawal(&self.db, withdrawal_id)
            .await?
            .ok_or(Error::WithdrawalNotFound { withdrawal_id })?;
        let _member = self.lock_membership(current.pool_id, current.user_id).await;
        let _pool = self.lock_pool(current.pool_id).await;
        let now = self.clock.now();
        let updated = withdrawal::complete_withdrawal(&self.db, withdrawal_id, now).await?;
        self.leaderboard.invalidate(updated.pool_id).await;
        self.publish_status(&updated, now).await;
        Ok(updated)
    }

    /// Cancels a pending withdrawal on behalf of its requester.
    pub async fn cancel_withdrawal(&self, withdrawal_id: i64, user_id: i64) -> Result<withdrawal_entity::Model> {
        let _pool = self.lock_withdrawal_pool(withdrawal_id).await?;
        let now = self.clock.now();
        let updated = withdrawal::cancel_withdrawal(&self.db, withdrawal_id, user_id, now).await?;
        self.publish_status(&updated, now).await;
        Ok(updated)
    }

    /// Marks a pending withdrawal as refused.
    pub async fn reject_withdrawal(&self, withdrawal_id: i64) -> Result<withdrawal_entity::Model> {
        let _pool = self.lock_withdrawal_pool(withdrawal_id).await?;
        let now = self.clock.now();
        let updated = withdrawal::reject_withdrawal(&self.db, withdrawal_id, now).await?;
        self.publish_status(&updated, now).await;
        Ok(updated)
    }

    async fn lock_withdrawal_pool(&self, withdrawal_id: i64) -> Result<KeyedGuard<i64>> {
        let current = withdrawal::get_withdrawal(&self.db, withdrawal_id)
            .await?
            .ok_or(Error::WithdrawalNotFound { withdrawal_id })?;
        Ok(self.lock_pool(current.pool_id).await)
    }

    async fn publish_status(&self, row: &withdrawal_entity::Model, now: DateTime<Utc>) {
        self.events
            .publish(
                row.pool_id,
                EventPayload::WithdrawalStatusChanged {
                    withdrawal_id: row.id,
                    user_id: row.user_id,
                    status: row.status,
                },
                now,
            )
            .await;
    }

    /// Records a member's agreement to the pool's penalty policy.
    #[instrument(skip(self))]
    pub async fn set_penalty_agreement(&self, pool_id: i64, user_id: i64, agreed: bool) -> Result<ConsensusTally> {
        users::require_active_user(&self.db, user_id).await?;
        let _pool = self.lock_pool(pool_id).await;
        let now = self.clock.now();
        let tally = penalty::set_member_agreement(&self.db, pool_id, user_id, agreed, now).await?;
        self.events
            .publish(
                pool_id,
                EventPayload::PenaltyConsensusChanged {
                    user_id,
                    agreed,
                    agreed_count: tally.agreed_count,
                    total_members: tally.total_members,
                    all_agreed: tally.all_agreed,
                },
                now,
            )
            .await;
        Ok(tally)
    }

    // Read models

    /// Members ranked by net cents contributed.
    pub async fn leaderboard(&self, pool_id: i64) -> Result<Vec<LeaderboardEntry>> {
        self.leaderboard
            .get_or_rank(&self.db, pool_id, RankBy::TotalContributed)
            .await
    }

    /// Members ranked by points earned in the pool.
    pub async fn points_leaderboard(&self, pool_id: i64) -> Result<Vec<LeaderboardEntry>> {
        self.leaderboard.get_or_rank(&self.db, pool_id, RankBy::Points).await
    }

    /// A user's pay schedule.
    pub async fn payday_settings(&self, user_id: i64) -> Result<PaydaySettings> {
        users::get_user(&self.db, user_id)
            .await?
            .ok_or(Error::UserNotFound { user_id })?;
        payday::get_payday_settings(&self.db, user_id, self.settings.streak_window_days).await
    }

    /// Replaces a user's pay schedule.
    pub async fn set_payday_settings(&self, user_id: i64, settings: PaydaySettings) -> Result<PaydaySettings> {
        users::require_active_user(&self.db, user_id).await?;
        let stored = payday::set_payday_settings(&self.db, user_id, settings).await?;
        info!(user_id, "Payday settings updated");
        Ok(stored)
    }

    /// A user's streak across all pools as of now.
    ///
    /// Recomputed from the ledger, so a streak that lapsed since the last
    /// contribution reads as broken. The current streak is the best over the
    /// user's pools; the longest never drops below the stored record.
    pub async fn streak(&self, user_id: i64) -> Result<StreakSummary> {
        let user = users::get_user(&self.db, user_id)
            .await?
            .ok_or(Error::UserNotFound { user_id })?;
        let today = self.clock.now().date_naive();
        let settings = payday::get_payday_settings(&self.db, user_id, self.settings.streak_window_days).await?;

        let mut current_streak = 0;
        let mut longest_streak = u32::try_from(user.longest_streak)?;
        for member in pools::memberships_for_user(&self.db, user_id).await? {
            let history = contribution::contribution_history(&self.db, member.pool_id, user_id).await?;
            let summary = payday::compute_streak(&settings, &history, today);
            current_streak = current_streak.max(summary.current_streak);
            longest_streak = longest_streak.max(summary.longest_streak);
        }

        debug!(user_id, current_streak, longest_streak, "Computed user streak");
        Ok(StreakSummary {
            current_streak,
            longest_streak,
            next_payday: settings.next_payday(today),
        })
    }

    // Rewards

    /// Inserts or refreshes catalog badges.
    pub async fn seed_badges(&self, catalog: &[BadgeConfig]) -> Result<usize> {
        reward::seed_badge_catalog(&self.db, catalog).await
    }

    /// Badges a user holds, oldest first.
    pub async fn badges_for_user(&self, user_id: i64) -> Result<Vec<(user_badge::Model, Option<badge::Model>)>> {
        reward::badges_for_user(&self.db, user_id).await
    }

    /// Re-runs badge rules for one membership. Already-held badges are not awarded again.
    pub async fn reevaluate_badges(&self, user_id: i64, pool_id: i64) -> Result<Vec<badge::Model>> {
        let pool = pools::require_pool(&self.db, pool_id).await?;
        let user = users::get_user(&self.db, user_id)
            .await?
            .ok_or(Error::UserNotFound { user_id })?;
        let member = pools::require_membership(&self.db, pool_id, user_id).await?;
        let ctx = BadgeContext::from_state(&member, &user, &pool);
        reward::evaluate_badges(&self.db, &ctx).await
    }

    // Messaging

    /// Sends an encouragement; pool-scoped messages are published on the pool channel.
    pub async fn send_encouragement(
        &self,
        from_user_id: i64,
        to_user_id: i64,
        pool_id: Option<i64>,
        text: &str,
        kind: EncouragementKind,
    ) -> Result<encouragement_entity::Model> {
        let _pool = match pool_id {
            Some(pool_id) => Some(self.lock_pool(pool_id).await),
            None => None,
        };
        let now = self.clock.now();
        let row =
            encouragement::send_encouragement(&self.db, from_user_id, to_user_id, pool_id, text, kind, now).await?;
        if let Some(pool_id) = row.pool_id {
            self.events
                .publish(
                    pool_id,
                    EventPayload::MessageNew {
                        encouragement_id: row.id,
                        from_user_id,
                        to_user_id,
                        kind,
                    },
                    now,
                )
                .await;
        }
        Ok(row)
    }

    /// Encouragements a user received, newest first.
    pub async fn encouragements(&self, user_id: i64, limit: u64) -> Result<Vec<encouragement_entity::Model>> {
        encouragement::list_encouragements(&self.db, user_id, limit).await
    }

    /// Subscribes to a pool's events.
    ///
    /// Private pools only accept their members.
    pub async fn subscribe(&self, pool_id: i64, subscriber_id: i64) -> Result<Subscription> {
        let pool = pools::require_pool(&self.db, pool_id).await?;
        if pool.visibility == Visibility::Private {
            pools::require_membership(&self.db, pool_id, subscriber_id).await?;
        }
        Ok(self.events.join(pool_id, subscriber_id).await)
    }
}

fn spawn_badge_retry(db: DatabaseConnection, ctx: BadgeContext) {
    tokio::spawn(async move {
        let mut delay = BADGE_RETRY_BASE_DELAY;
        for attempt in 1..=BADGE_RETRY_ATTEMPTS {
            tokio::time::sleep(delay).await;
            match reward::evaluate_badges(&db, &ctx).await {
                Ok(badges) => {
                    info!(user_id = ctx.user_id, attempt, earned = badges.len(), "Badge retry succeeded");
                    return;
                }
                Err(e) => warn!(user_id = ctx.user_id, attempt, error = %e, "Badge retry failed"),
            }
            delay *= 2;
        }
        warn!(
            user_id = ctx.user_id,
            pool_id = ctx.pool_id,
            "Giving up on badge evaluation; run reevaluate_badges to repair"
        );
    });
}
