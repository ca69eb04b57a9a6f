//! Gateway configuration, loaded from TOML.
//!
//! ```toml
//! audit_log_path = "audit.ndjson"
//!
//! [database]
//! url = "sqlite:pharmacy.db"
//! init_sql = "seed.sql"
//!
//! [[tables]]
//! name = "purchases"
//! columns = ["purchase_id", "user_id", "drug_id"]
//!
//! [rate_limit]
//! exempt_trusted = true
//!
//! [policy]
//! review_trusted_ddl = true
//!
//! [limits]
//! max_result_rows = 500
//! statement_timeout_ms = 2000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::audit::AuditError;
use crate::policy::PolicyConfig;
use crate::rate_limit::RateLimitConfig;
use crate::schema::{SchemaError, SchemaRegistry, TableDefinition};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid table definitions: {0}")]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Schema registry contents.
    #[serde(default)]
    pub tables: Vec<TableDefinition>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    /// NDJSON audit trail; disabled when absent.
    #[serde(default)]
    pub audit_log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    /// SQL script run once when the gateway opens the database.
    #[serde(default)]
    pub init_sql: Option<PathBuf>,
}

fn default_database_url() -> String {
    "sqlite::memory:".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            init_sql: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Rows beyond this are dropped from results.
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: usize,

    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

fn default_max_result_rows() -> usize {
    1_000
}

fn default_statement_timeout_ms() -> u64 {
    5_000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_result_rows: default_max_result_rows(),
            statement_timeout_ms: default_statement_timeout_ms(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file. Relative `init_sql` and
    /// `audit_log_path` entries resolve against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Invalid("database.url is empty".into()));
        }
        if self.limits.statement_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "limits.statement_timeout_ms must be positive".into(),
            ));
        }
        if self.rate_limit.burst_window_ms == 0 || self.rate_limit.sustained_window_ms == 0 {
            return Err(ConfigError::Invalid("rate_limit windows must be positive".into()));
        }
        Ok(())
    }

    pub fn registry(&self) -> Result<SchemaRegistry, ConfigError> {
        Ok(SchemaRegistry::from_definitions(&self.tables)?)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(init) = self.database.init_sql.as_mut() {
            resolve(init);
        }
        if let Some(audit) = self.audit_log_path.as_mut() {
            resolve(audit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_toml_str("").unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert!(config.tables.is_empty());
        assert_eq!(config.rate_limit.burst_threshold, 5);
        assert_eq!(config.rate_limit.sustained_lag_ms, 10_000);
        assert!(!config.rate_limit.exempt_trusted);
        assert!(config.policy.review_trusted_ddl);
        assert_eq!(config.limits.max_result_rows, 1_000);
        assert!(config.audit_log_path.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = GatewayConfig::from_toml_str(
            r#"
            audit_log_path = "/var/log/querygate.ndjson"

            [database]
            url = "sqlite:/tmp/pharmacy.db"

            [[tables]]
            name = "purchases"
            columns = ["purchase_id", "user_id"]

            [[tables]]
            name = "drugs"
            columns = ["drug_id", "drug_name"]

            [rate_limit]
            burst_threshold = 3
            exempt_trusted = true

            [policy]
            review_trusted_ddl = false

            [limits]
            max_result_rows = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limit.burst_threshold, 3);
        assert_eq!(config.rate_limit.sustained_threshold, 10);
        assert!(config.rate_limit.exempt_trusted);
        assert!(!config.policy.review_trusted_ddl);
        assert_eq!(config.limits.max_result_rows, 10);
        assert_eq!(config.limits.statement_timeout_ms, 5_000);

        let registry = config.registry().unwrap();
        assert!(registry.has_user_id("purchases"));
        assert!(!registry.has_user_id("drugs"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            GatewayConfig::from_toml_str("[limits]\nstatement_timeout_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            GatewayConfig::from_toml_str("[database]\nurl = 5"),
            Err(ConfigError::Parse(_))
        ));

        let dup = GatewayConfig::from_toml_str(
            "[[tables]]\nname = \"t\"\ncolumns = [\"a\"]\n[[tables]]\nname = \"T\"\ncolumns = [\"b\"]",
        )
        .unwrap();
        assert!(matches!(dup.registry(), Err(ConfigError::Schema(_))));
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("querygate.toml");
        std::fs::write(
            &path,
            "audit_log_path = \"audit.ndjson\"\n[database]\ninit_sql = \"seed.sql\"\n",
        )
        .unwrap();

        let config = GatewayConfig::load(&path).unwrap();
        assert_eq!(config.audit_log_path.unwrap(), tmp.path().join("audit.ndjson"));
        assert_eq!(config.database.init_sql.unwrap(), tmp.path().join("seed.sql"));
    }

    #[test]
    fn test_missing_file() {
        let err = GatewayConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
