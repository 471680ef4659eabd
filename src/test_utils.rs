//! Shared test utilities for `PoolBuddy`.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults.

use crate::{
    core::{
        pool::{self, NewPool, PenaltyConfig},
        user,
    },
    engine::Clock,
    entities::{self, contribution::PaymentMethod, pool::PoolKind, pool::Visibility},
    errors::Result,
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::sync::{Mutex, PoisonError};

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates an active test user with zeroed counters.
pub async fn create_test_user(db: &DatabaseConnection, name: &str) -> Result<entities::user::Model> {
    user::create_user(db, name.to_string()).await
}

/// Parameters for a public group pool.
///
/// # Defaults
/// * `goal_cents`: 100 000
/// * `target_date`: None
/// * penalty disabled
pub fn group_pool_params(name: &str) -> NewPool {
    NewPool {
        name: name.to_string(),
        kind: PoolKind::Group,
        goal_cents: 100_000,
        target_date: None,
        visibility: Visibility::Public,
        penalty: PenaltyConfig::default(),
    }
}

/// Parameters for a private solo pool with the same defaults as [`group_pool_params`].
pub fn solo_pool_params(name: &str) -> NewPool {
    NewPool {
        kind: PoolKind::Solo,
        visibility: Visibility::Private,
        ..group_pool_params(name)
    }
}

/// Sets up a database with one user owning a group pool.
/// Returns (db, pool, owner).
pub async fn setup_with_group_pool() -> Result<(
    DatabaseConnection,
    entities::pool::Model,
    entities::user::Model,
)> {
    let db = setup_test_db().await?;
    let owner = create_test_user(&db, "owner").await?;
    let (pool, _) = pool::create_pool(&db, owner.id, group_pool_params("Test Pool"), Utc::now()).await?;
    Ok((db, pool, owner))
}

/// Appends a ledger row without touching any running total.
/// Used to simulate drift and to feed read projections directly.
pub async fn insert_raw_contribution(
    db: &DatabaseConnection,
    pool_id: i64,
    user_id: i64,
    amount_cents: i64,
) -> Result<entities::contribution::Model> {
    entities::contribution::ActiveModel {
        pool_id: Set(pool_id),
        user_id: Set(user_id),
        amount_cents: Set(amount_cents),
        method: Set(PaymentMethod::Other),
        points_awarded: Set(0),
        streak_bonus: Set(false),
        idempotency_key: Set(None),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Starts the clock at `now`.
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    /// Jumps to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_moves_only_when_told() {
        let start = Utc.with_ymd_and_hms(2026, 10, 16, 0, 0, 0).single();
        let Some(start) = start else { return };
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::days(2));
        assert_eq!(clock.now(), start + Duration::days(2));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
