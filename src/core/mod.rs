//! Framework-agnostic business logic.
//!
//! Every function takes the connection (or open transaction) it works on and the
//! acting user's id explicitly.

/// Contribution ledger: recording, history and compensating rows
pub mod contribution;
/// Encouragement messages between savers
pub mod encouragement;
/// Pool rankings and their cache
pub mod leaderboard;
/// Pay schedules, next payday and streak calculation
pub mod payday;
/// Early-withdrawal penalties and the consensus gate
pub mod penalty;
/// Pools, memberships and ledger reconciliation
pub mod pool;
/// Points and badges
pub mod reward;
/// Users, levels and aggregate streaks
pub mod user;
/// Withdrawal requests and their status machine
pub mod withdrawal;
