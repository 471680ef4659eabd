//! Engine settings loaded from environment variables.
//!
//! All values are optional; unset variables fall back to defaults and malformed
//! values are reported as configuration errors.

use crate::errors::{Error, Result};
use std::str::FromStr;

/// Default number of days after payday that still count toward a streak.
pub const DEFAULT_STREAK_WINDOW_DAYS: u32 = 3;
/// Default buffered events per pool channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;
/// Default optimistic retries for a contribution.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

/// Runtime knobs for the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Path of the TOML file holding the badge catalog
    pub badge_config_path: String,
    /// Streak window used when a user has no payday settings row
    pub streak_window_days: u32,
    /// Buffered events per pool channel before slow subscribers start lagging
    pub event_channel_capacity: usize,
    /// Attempts at the contribution unit of work before giving up
    pub max_conflict_retries: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            badge_config_path: "config.toml".to_string(),
            streak_window_days: DEFAULT_STREAK_WINDOW_DAYS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

impl EngineSettings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let settings = Self {
            badge_config_path: lookup("BADGE_CONFIG_PATH").unwrap_or(defaults.badge_config_path),
            streak_window_days: parse_var(&lookup, "STREAK_WINDOW_DAYS", defaults.streak_window_days)?,
            event_channel_capacity: parse_var(
                &lookup,
                "EVENT_CHANNEL_CAPACITY",
                defaults.event_channel_capacity,
            )?,
            max_conflict_retries: parse_var(
                &lookup,
                "MAX_CONFLICT_RETRIES",
                defaults.max_conflict_retries,
            )?,
        };

        if settings.event_channel_capacity == 0 {
            return Err(Error::Config {
                message: "EVENT_CHANNEL_CAPACITY must be greater than zero".to_string(),
            });
        }
        if settings.max_conflict_retries == 0 {
            return Err(Error::Config {
                message: "MAX_CONFLICT_RETRIES must be greater than zero".to_string(),
            });
        }
        Ok(settings)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key).map_or(Ok(default), |raw| {
        raw.trim().parse().map_err(|e| Error::Config {
            message: format!("Invalid value for {key} ({raw:?}): {e}"),
        })
    })
}
