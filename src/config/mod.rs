/// Database connection and table creation
pub mod database;

/// Service settings loaded from config.toml
pub mod settings;
