//! Badge catalog loading from config.toml
//!
//! The `[[badges]]` tables in config.toml define the achievements the reward
//! engine can hand out. When the file is absent the built-in catalog is used.

use crate::entities::badge::{BadgeRule, Rarity};
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Name of the badge awarded on every fifth contribution to a pool.
pub const CONSISTENT_SAVER: &str = "Consistent Saver";

/// Configuration structure representing the badge part of config.toml
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Badge definitions to seed
    #[serde(default)]
    pub badges: Vec<BadgeConfig>,
}

/// Configuration for a single badge
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BadgeConfig {
    /// Unique badge name
    pub name: String,
    /// What the badge is for
    pub description: String,
    /// Rarity tier
    pub rarity: Rarity,
    /// Unlock rule
    pub rule: BadgeRule,
    /// Rule parameter (count, streak length, cents or points)
    #[serde(default)]
    pub threshold: i64,
}

impl BadgeConfig {
    fn new(name: &str, description: &str, rarity: Rarity, rule: BadgeRule, threshold: i64) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            rarity,
            rule,
            threshold,
        }
    }
}

/// The catalog used when no config file is present.
#[must_use]
pub fn default_catalog() -> Vec<BadgeConfig> {
    vec![
        BadgeConfig::new(
            "First Deposit",
            "Made a first contribution",
            Rarity::Common,
            BadgeRule::FirstContribution,
            1,
        ),
        BadgeConfig::new(
            CONSISTENT_SAVER,
            "Contributed five times to the same pool",
            Rarity::Uncommon,
            BadgeRule::ContributionCount,
            5,
        ),
        BadgeConfig::new(
            "Streak Starter",
            "Kept a three-payday streak",
            Rarity::Rare,
            BadgeRule::Streak,
            3,
        ),
        BadgeConfig::new(
            "Unstoppable",
            "Kept a ten-payday streak",
            Rarity::Epic,
            BadgeRule::Streak,
            10,
        ),
        BadgeConfig::new(
            "Big Saver",
            "Put $1,000 into a single pool",
            Rarity::Rare,
            BadgeRule::TotalContributed,
            100_000,
        ),
        BadgeConfig::new(
            "Point Collector",
            "Earned 1,000 points",
            Rarity::Epic,
            BadgeRule::Points,
            1_000,
        ),
        BadgeConfig::new(
            "Goal Getter",
            "Helped a pool reach its goal",
            Rarity::Legendary,
            BadgeRule::PoolGoalReached,
            0,
        ),
    ]
}

/// Loads the badge catalog from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A badge has an unknown rarity or rule
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;

    toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads the catalog from `path`, or the default catalog if the file does not exist
/// or defines no badges.
pub fn load_catalog<P: AsRef<Path>>(path: P) -> Result<Vec<BadgeConfig>> {
    let path = path.as_ref();
    if !path.exists() {
        info!("No badge config at {:?}, using built-in catalog", path);
        return Ok(default_catalog());
    }

    let config = load_config(path)?;
    if config.badges.is_empty() {
        return Ok(default_catalog());
    }
    Ok(config.badges)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_badge_config() {
        let toml_str = r#"
            [[badges]]
            name = "Consistent Saver"
            description = "Five contributions"
            rarity = "uncommon"
            rule = "contribution_count"
            threshold = 5

            [[badges]]
            name = "Goal Getter"
            description = "Pool reached its goal"
            rarity = "legendary"
            rule = "pool_goal_reached"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.badges.len(), 2);
        assert_eq!(config.badges[0].rule, BadgeRule::ContributionCount);
        assert_eq!(config.badges[0].threshold, 5);
        assert_eq!(config.badges[1].rarity, Rarity::Legendary);
        assert_eq!(config.badges[1].threshold, 0);
    }

    #[test]
    fn test_unknown_rarity_rejected() {
        let toml_str = r#"
            [[badges]]
            name = "Shiny"
            description = "?"
            rarity = "mythic"
            rule = "points"
        "#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let catalog = load_catalog("definitely/not/here.toml").unwrap();
        assert_eq!(catalog, default_catalog());
        assert!(catalog.iter().any(|b| b.name == CONSISTENT_SAVER));
    }
}
