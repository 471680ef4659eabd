//! Database configuration module.
//!
//! This module handles `SQLite` database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs. Every statement is `IF NOT EXISTS`,
//! which makes [`create_tables`] safe to run on every start against a persistent file.

use crate::entities::{
    Badge, Contribution, ContributionColumn, Encouragement, Membership, MembershipColumn,
    PaydaySetting, Pool, User, UserBadge, UserBadgeColumn, Withdrawal,
};
use crate::errors::Result;
use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://pool_buddy.sqlite?mode=rwc";

/// Gets the database URL from environment variable or returns default `SQLite` path.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by `DATABASE_URL`.
///
/// Falls back to a local `SQLite` file (created on demand) if no environment variable is set.
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    debug!("Connecting to database at {}", database_url);
    Database::connect(&database_url).await.map_err(Into::into)
}

async fn create_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

/// Creates all tables and composite unique indexes if they do not exist yet.
///
/// Unique indexes:
/// * one membership per (pool, user)
/// * one award per (user, badge)
/// * one contribution per (pool, user, idempotency key); `NULL` keys never collide
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    create_table(db, &schema, User).await?;
    create_table(db, &schema, Pool).await?;
    create_table(db, &schema, Membership).await?;
    create_table(db, &schema, Contribution).await?;
    create_table(db, &schema, Withdrawal).await?;
    create_table(db, &schema, Badge).await?;
    create_table(db, &schema, UserBadge).await?;
    create_table(db, &schema, Encouragement).await?;
    create_table(db, &schema, PaydaySetting).await?;

    let indexes = [
        Index::create()
            .if_not_exists()
            .name("idx_memberships_pool_user")
            .table(Membership)
            .col(MembershipColumn::PoolId)
            .col(MembershipColumn::UserId)
            .unique()
            .to_owned(),
        Index::create()
            .if_not_exists()
            .name("idx_user_badges_user_badge")
            .table(UserBadge)
            .col(UserBadgeColumn::UserId)
            .col(UserBadgeColumn::BadgeId)
            .unique()
            .to_owned(),
        Index::create()
            .if_not_exists()
            .name("idx_contributions_idempotency")
            .table(Contribution)
            .col(ContributionColumn::PoolId)
            .col(ContributionColumn::UserId)
            .col(ContributionColumn::IdempotencyKey)
            .unique()
            .to_owned(),
    ];
    for index in &indexes {
        db.execute(builder.build(index)).await?;
    }

    info!("Database tables ensured.");
    Ok(())
}
