//! Configuration validation.

use std::collections::HashSet;

use super::Config;
use crate::core::schema::{KeyMode, ReferencePolicy};
use crate::error::{MigrateError, Result};

const SSL_MODES: &[&str] = &["disable", "require", "verify-ca", "verify-full"];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.r#type != "sqlite" {
        return Err(MigrateError::Config(format!(
            "source.type must be 'sqlite', got '{}'",
            config.source.r#type
        )));
    }
    if config.source.path.is_empty() {
        return Err(MigrateError::Config("source.path is required".into()));
    }
    if config.source.max_connections == 0 {
        return Err(MigrateError::Config(
            "source.max_connections must be at least 1".into(),
        ));
    }

    // Target validation
    if config.target.r#type != "postgres" {
        return Err(MigrateError::Config(format!(
            "target.type must be 'postgres', got '{}'",
            config.target.r#type
        )));
    }
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if !SSL_MODES.contains(&config.target.ssl_mode.to_lowercase().as_str()) {
        return Err(MigrateError::Config(format!(
            "target.ssl_mode '{}' is invalid. Valid options: {}",
            config.target.ssl_mode,
            SSL_MODES.join(", ")
        )));
    }

    validate_migration(config)?;
    validate_tables(config)?;

    for query in &config.reconciliation.queries {
        if query.name.is_empty() || query.sql.trim().is_empty() {
            return Err(MigrateError::Config(
                "reconciliation queries need a name and sql".into(),
            ));
        }
    }

    Ok(())
}

fn validate_migration(config: &Config) -> Result<()> {
    let migration = &config.migration;

    if let Some(0) = migration.workers {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.batch_size {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.operation_timeout_secs {
        return Err(MigrateError::Config(
            "migration.operation_timeout_secs must be at least 1".into(),
        ));
    }
    if migration.error_threshold.max_consecutive_failures == 0 {
        return Err(MigrateError::Config(
            "migration.error_threshold.max_consecutive_failures must be at least 1".into(),
        ));
    }
    if let Some(ratio) = migration.error_threshold.max_failure_ratio {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(MigrateError::Config(format!(
                "migration.error_threshold.max_failure_ratio must be in (0, 1], got {}",
                ratio
            )));
        }
    }
    migration.reference_offset()?;

    Ok(())
}

fn validate_tables(config: &Config) -> Result<()> {
    if config.tables.is_empty() {
        return Err(MigrateError::Config("at least one table is required".into()));
    }

    let mut seen = HashSet::new();
    for table in &config.tables {
        if table.name.is_empty() {
            return Err(MigrateError::Config("tables[].name is required".into()));
        }
        if !seen.insert(table.name.as_str()) {
            return Err(MigrateError::Config(format!(
                "table '{}' is declared more than once",
                table.name
            )));
        }
        if table.primary_key.is_empty() {
            return Err(MigrateError::Config(format!(
                "table '{}': primary_key must not be empty",
                table.name
            )));
        }

        if table.key_mode == KeyMode::Remap {
            match table.natural_key.as_deref() {
                None | Some("") => {
                    return Err(MigrateError::Config(format!(
                        "table '{}': key_mode remap requires natural_key",
                        table.name
                    )));
                }
                Some(nk) if nk == table.primary_key => {
                    return Err(MigrateError::Config(format!(
                        "table '{}': natural_key must differ from primary_key",
                        table.name
                    )));
                }
                Some(_) => {}
            }
            if table.seed_from_target {
                return Err(MigrateError::Config(format!(
                    "table '{}': seed_from_target tables cannot use key_mode remap",
                    table.name
                )));
            }
        }

        if let Some(mapping) = table.columns.iter().find(|m| m.sources().is_empty()) {
            return Err(MigrateError::Config(format!(
                "table '{}': column '{}' lists no source columns",
                table.name,
                mapping.target()
            )));
        }

        for fk in &table.foreign_keys {
            let policy = fk.policy.unwrap_or(config.migration.reference_policy);
            if policy == ReferencePolicy::Default && fk.fallback.is_none() {
                return Err(MigrateError::Config(format!(
                    "table '{}': foreign key '{}' uses the default policy without a fallback",
                    table.name, fk.column
                )));
            }
            if fk.column == table.primary_key {
                return Err(MigrateError::Config(format!(
                    "table '{}': primary key '{}' cannot also be a foreign key",
                    table.name, fk.column
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        MigrationConfig, ReconciliationConfig, ReconciliationQuery, SourceConfig, TargetConfig,
    };
    use crate::core::schema::{ColumnMapping, ForeignKeySpec, PkValue, TableSpec};

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                r#type: "sqlite".to_string(),
                path: "production.db".to_string(),
                max_connections: 4,
            },
            target: TargetConfig {
                r#type: "postgres".to_string(),
                host: "localhost".to_string(),
                port: 5432,
                database: "target_db".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                schema: "public".to_string(),
                ssl_mode: "disable".to_string(),
            },
            migration: MigrationConfig::default(),
            tables: vec![
                TableSpec::new("machines"),
                TableSpec::new("production_orders").foreign_key_to("machine_id", "machines"),
            ],
            reconciliation: ReconciliationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_source_path() {
        let mut config = valid_config();
        config.source.path = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_wrong_source_type() {
        let mut config = valid_config();
        config.source.r#type = "mssql".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_wrong_target_type() {
        let mut config = valid_config();
        config.target.r#type = "mysql".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_ssl_mode() {
        let mut config = valid_config();
        config.target.ssl_mode = "sometimes".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.migration.batch_size = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_reference_offset() {
        let mut config = valid_config();
        config.migration.reference_offset = "SAST".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_failure_ratio_bounds() {
        let mut config = valid_config();
        config.migration.error_threshold.max_failure_ratio = Some(1.5);
        assert!(validate(&config).is_err());
        config.migration.error_threshold.max_failure_ratio = Some(0.25);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_duplicate_table() {
        let mut config = valid_config();
        config.tables.push(TableSpec::new("machines"));
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_remap_requires_natural_key() {
        let mut config = valid_config();
        config.tables[1].key_mode = KeyMode::Remap;
        assert!(validate(&config).is_err());
        config.tables[1].natural_key = Some("order_number".into());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_coalesced_column_needs_sources() {
        let mut config = valid_config();
        config.tables[1].columns = vec![ColumnMapping::Coalesced {
            sources: vec![],
            target: "started_at".into(),
        }];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_default_policy_requires_fallback() {
        let mut config = valid_config();
        config.tables[1].foreign_keys[0].policy = Some(ReferencePolicy::Default);
        assert!(validate(&config).is_err());

        config.tables[1].foreign_keys[0].fallback = Some(PkValue::Int(1));
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_migration_wide_default_policy_requires_fallback() {
        let mut config = valid_config();
        config.migration.reference_policy = ReferencePolicy::Default;
        assert!(validate(&config).is_err());

        config.tables[1].foreign_keys[0] = ForeignKeySpec {
            column: "machine_id".into(),
            references: "machines".into(),
            policy: Some(ReferencePolicy::NullOut),
            fallback: None,
        };
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_empty_reconciliation_query() {
        let mut config = valid_config();
        config.reconciliation.queries.push(ReconciliationQuery {
            name: "empty".into(),
            sql: "  ".into(),
            expect_rows_of: None,
            expect_count: None,
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_456".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_456"),
            "Debug output should not contain actual password value"
        );
    }
}
