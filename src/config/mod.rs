/// Badge catalog loading from config.toml
pub mod badges;

/// Database configuration and connection management
pub mod database;

/// Engine settings from environment variables
pub mod settings;
