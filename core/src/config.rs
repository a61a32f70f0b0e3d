//! Engine configuration.
//!
//! Loaded from a TOML file such as:
//!
//! ```toml
//! [pagination]
//! default_size = 50
//! max_size = 2500
//!
//! [permissions]
//! cache_ttl_secs = 300
//! admin_role = "admin"
//!
//! [conflicts.patient_code_key]
//! code = "PATIENT_CODE_TAKEN"
//! message = "A patient with this code already exists"
//! loc = ["body", "code"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

pub const CONFIG_FILE: &str = "crudql.toml";

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Page size used when the request gives no `limit`
    pub default_size: u32,
    /// Upper bound for a requested `limit`
    pub max_size: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_size: 50,
            max_size: 2500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    pub cache_ttl_secs: u64,
    /// Role whose owner scope uses the entity's admin column, when declared
    pub admin_role: String,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            admin_role: "admin".to_owned(),
        }
    }
}

impl PermissionConfig {
    #[inline]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Domain conflict reported in place of one database constraint violation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConflictRule {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub loc: Vec<String>,
}

// ============================================================================
// EngineConfig
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pagination: PaginationConfig,
    pub permissions: PermissionConfig,
    /// Keyed by constraint name
    pub conflicts: BTreeMap<String, ConflictRule>,
}

impl EngineConfig {
    /// Load from the default config file
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Load from specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.into())
            } else {
                ConfigError::Io(path.into(), e)
            }
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, "<string>")
    }

    fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: origin.to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.into()));
        let PaginationConfig {
            default_size,
            max_size,
        } = self.pagination;

        if default_size == 0 || max_size == 0 {
            return invalid("pagination sizes must be positive");
        }
        if default_size > max_size {
            return invalid("pagination.default_size exceeds pagination.max_size");
        }
        if self.permissions.cache_ttl_secs == 0 {
            return invalid("permissions.cache_ttl_secs must be positive");
        }
        if let Some((name, _)) = self.conflicts.iter().find(|(_, rule)| rule.code.is_empty()) {
            return Err(ConfigError::Invalid(format!("conflict rule {name} has an empty code")));
        }
        Ok(())
    }

    /// Clamps a requested page size to `1..=max_size`, defaulting when absent.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.pagination.default_size)
            .clamp(1, self.pagination.max_size)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
