//! Configuration file support for espalier
//!
//! Reads from .espalier/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Runtime settings structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Settings {
    /// Anonymous access toggles
    #[serde(default)]
    pub access: AccessConfig,

    /// Path resolution settings
    #[serde(default)]
    pub urls: UrlConfig,

    /// Authorship audit settings
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Global anonymous-access toggles, checked before any per-document flag
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AccessConfig {
    /// Whether anonymous actors may pass read evaluation at all
    /// Default: true
    #[serde(default = "default_true")]
    pub anonymous_read: bool,

    /// Whether anonymous actors may pass write evaluation at all
    /// Default: true
    #[serde(default = "default_true")]
    pub anonymous_write: bool,
}

/// Path resolution configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UrlConfig {
    /// Slug comparison during path resolution. Global, not per-call.
    /// Default: false (case-insensitive)
    #[serde(default)]
    pub case_sensitive: bool,
}

/// IP capture configuration for revision authorship
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuditConfig {
    /// Record the IP address of authenticated revision authors
    /// Default: false
    #[serde(default)]
    pub log_ips_users: bool,

    /// Record the IP address of anonymous revision authors
    /// Default: true
    #[serde(default = "default_true")]
    pub log_ips_anonymous: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            anonymous_read: true,
            anonymous_write: true,
        }
    }
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self {
            case_sensitive: false,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_ips_users: false,
            log_ips_anonymous: true,
        }
    }
}

impl Settings {
    /// Load settings from .espalier/config.toml
    /// Returns default settings if file doesn't exist
    pub fn load() -> Self {
        if let Some(path) = Self::find_config_path() {
            if let Ok(contents) = std::fs::read_to_string(&path) {
                if let Ok(settings) = toml::from_str(&contents) {
                    return settings;
                }
            }
        }
        Self::default()
    }

    /// Find config.toml by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".espalier").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }
}
