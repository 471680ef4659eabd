//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod badge;
pub mod contribution;
pub mod encouragement;
pub mod membership;
pub mod payday_setting;
pub mod pool;
pub mod user;
pub mod user_badge;
pub mod withdrawal;

// Re-export specific types to avoid conflicts
pub use badge::{Column as BadgeColumn, Entity as Badge, Model as BadgeModel};
pub use contribution::{
    Column as ContributionColumn, Entity as Contribution, Model as ContributionModel,
};
pub use encouragement::{
    Column as EncouragementColumn, Entity as Encouragement, Model as EncouragementModel,
};
pub use membership::{Column as MembershipColumn, Entity as Membership, Model as MembershipModel};
pub use payday_setting::{
    Column as PaydaySettingColumn, Entity as PaydaySetting, Model as PaydaySettingModel,
};
pub use pool::{Column as PoolColumn, Entity as Pool, Model as PoolModel};
pub use user::{Column as UserColumn, Entity as User, Model as UserModel};
pub use user_badge::{Column as UserBadgeColumn, Entity as UserBadge, Model as UserBadgeModel};
pub use withdrawal::{Column as WithdrawalColumn, Entity as Withdrawal, Model as WithdrawalModel};
