//! Service settings loaded from config.toml
//!
//! The TOML file lists the external registries and profile vendors the service
//! talks to, which vendors may supply which registries, and how the
//! reconciliation loop is tuned. Secrets such as API keys live in the same file;
//! deployments are expected to keep it out of version control.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Subscriber registry endpoints
    #[serde(default)]
    pub registries: Vec<RegistryConfig>,
    /// Profile vendor endpoints
    #[serde(default)]
    pub profile_vendors: Vec<ProfileVendorConfig>,
    /// Vendor-to-registry allow-list
    #[serde(default)]
    pub permissions: Vec<PermissionConfig>,
    /// Reconciliation loop tuning
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

/// One subscriber registry endpoint
#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Name, also stored in the `registries` table
    pub name: String,
    /// Base URL; `/activate` and `/deactivate/{iccid}` are appended
    pub endpoint: String,
    /// Sent as `x-api-key`
    pub api_key: String,
    /// Sent as `userid` in activation requests
    pub user_id: String,
    /// Client-side timeout for every call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// One profile vendor endpoint
#[derive(Debug, Deserialize, Clone)]
pub struct ProfileVendorConfig {
    /// Name, also stored in the `profile_vendors` table
    pub name: String,
    /// Base URL of the ES2+ interface
    pub es2plus_endpoint: String,
    /// Host a device downloads the profile from, used in activation codes
    pub activation_host: String,
    /// Sent as `functionRequesterIdentifier`
    pub requester_id: String,
    /// Client-side timeout for every call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Allows `vendor` to supply profiles for `registry`
#[derive(Debug, Deserialize, Clone)]
pub struct PermissionConfig {
    /// Vendor name
    pub vendor: String,
    /// Registry name
    pub registry: String,
}

/// Reconciliation loop tuning
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationConfig {
    /// Seconds between runs
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Top up a pool when fewer than this many resources are ready to use
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: u64,
    /// Upper bound on vendor release calls per pool per run
    #[serde(default = "default_max_to_allocate")]
    pub max_to_allocate: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            low_water_mark: default_low_water_mark(),
            max_to_allocate: default_max_to_allocate(),
        }
    }
}

impl ReconciliationConfig {
    /// Time between two runs
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

const fn default_timeout_secs() -> u64 {
    10
}

const fn default_interval_secs() -> u64 {
    300
}

const fn default_low_water_mark() -> u64 {
    50
}

const fn default_max_to_allocate() -> u64 {
    10
}

impl Settings {
    /// Checks cross references between the sections.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when a permission names an unknown registry or
    /// vendor, a name is listed twice, or the loop interval is zero.
    pub fn validate(&self) -> Result<()> {
        let mut registry_names: Vec<&str> = self.registries.iter().map(|r| r.name.as_str()).collect();
        registry_names.sort_unstable();
        if registry_names.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::Config {
                message: "Duplicate registry name in config".to_string(),
            });
        }

        let mut vendor_names: Vec<&str> =
            self.profile_vendors.iter().map(|v| v.name.as_str()).collect();
        vendor_names.sort_unstable();
        if vendor_names.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::Config {
                message: "Duplicate profile vendor name in config".to_string(),
            });
        }

        for permission in &self.permissions {
            if registry_names.binary_search(&permission.registry.as_str()).is_err() {
                return Err(Error::Config {
                    message: format!(
                        "Permission for vendor '{}' names unknown registry '{}'",
                        permission.vendor, permission.registry
                    ),
                });
            }
            if vendor_names.binary_search(&permission.vendor.as_str()).is_err() {
                return Err(Error::Config {
                    message: format!(
                        "Permission for registry '{}' names unknown vendor '{}'",
                        permission.registry, permission.vendor
                    ),
                });
            }
        }

        if self.reconciliation.interval_secs == 0 {
            return Err(Error::Config {
                message: "reconciliation.interval_secs must be positive".to_string(),
            });
        }

        Ok(())
    }
}

/// Loads and validates settings from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - Required fields are missing
/// - Cross references between sections do not resolve
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path_ref = path.as_ref();
    tracing::debug!("Attempting to load settings from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;

    let settings: Settings = toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse {}: {e}", path_ref.display()),
    })?;
    settings.validate()?;
    Ok(settings)
}

/// Loads settings from `SIM_INVENTORY_CONFIG`, or ./config.toml when unset
pub fn load_default_settings() -> Result<Settings> {
    let path =
        std::env::var("SIM_INVENTORY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_settings(path)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    const SAMPLE: &str = r#"
        [[registries]]
        name = "Foo"
        endpoint = "http://localhost:8080/default/provision"
        api_key = "secret"
        user_id = "sim-inventory"

        [[profile_vendors]]
        name = "Bar"
        es2plus_endpoint = "https://smdp.example.com"
        activation_host = "smdp.example.com"
        requester_id = "requester"
        timeout_secs = 3

        [[permissions]]
        vendor = "Bar"
        registry = "Foo"

        [reconciliation]
        interval_secs = 60
        max_to_allocate = 20
    "#;

    #[test]
    fn test_parse_settings() {
        let settings: Settings = toml::from_str(SAMPLE).unwrap();
        assert_eq!(settings.registries.len(), 1);
        assert_eq!(settings.registries[0].name, "Foo");
        assert_eq!(settings.registries[0].timeout_secs, 10);
        assert_eq!(settings.profile_vendors[0].timeout_secs, 3);
        assert_eq!(settings.permissions[0].vendor, "Bar");
        assert_eq!(settings.reconciliation.interval_secs, 60);
        assert_eq!(settings.reconciliation.low_water_mark, 50);
        assert_eq!(settings.reconciliation.max_to_allocate, 20);
        settings.validate().unwrap();
    }

    #[test]
    fn test_missing_reconciliation_section_uses_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.reconciliation, ReconciliationConfig::default());
        assert!(settings.registries.is_empty());
    }

    #[test]
    fn test_validate_rejects_unknown_permission_target() {
        let mut settings: Settings = toml::from_str(SAMPLE).unwrap();
        settings.permissions.push(PermissionConfig {
            vendor: "Bar".to_string(),
            registry: "Nope".to_string(),
        });
        assert!(matches!(settings.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_validate_rejects_duplicate_registry() {
        let mut settings: Settings = toml::from_str(SAMPLE).unwrap();
        let duplicate = settings.registries[0].clone();
        settings.registries.push(duplicate);
        assert!(matches!(settings.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_load_settings_missing_file() {
        let result = load_settings("/nonexistent/sim-inventory.toml");
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
