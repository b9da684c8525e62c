//! Semantic validation for parsed archive configuration values.

use anyhow::{bail, Result};
use chrono::format::{Item, StrftimeItems};
use tablevault_db::identifier::validate_identifier;
use tablevault_types::artifact::DumpMode;

use crate::config::types::{ArchiveConfig, DatabaseConfig, StorageBackendKind};

fn check_identifier(name: &str, context: &str, errors: &mut Vec<String>) {
    if let Err(reason) = validate_identifier(name) {
        errors.push(format!("{context}: {reason}"));
    }
}

fn validate_database(db: &DatabaseConfig, context: &str, errors: &mut Vec<String>) {
    match db {
        DatabaseConfig::Postgres(pg) => {
            if pg.host.trim().is_empty() {
                errors.push(format!("{context}: host must not be empty"));
            }
            if pg.database.trim().is_empty() {
                errors.push(format!("{context}: database must not be empty"));
            }
            check_identifier(&pg.schema, &format!("{context} schema"), errors);
        }
        DatabaseConfig::Sqlite(sqlite) => {
            if sqlite.path.as_os_str().is_empty() {
                errors.push(format!("{context}: path must not be empty"));
            }
        }
    }
}

/// Check that a tag format renders to a single, path-safe segment.
fn validate_tag_format(format: &str, errors: &mut Vec<String>) {
    if format.trim().is_empty() {
        errors.push("window.tag_format must not be empty".to_string());
        return;
    }
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        errors.push(format!("window.tag_format '{format}' is not a valid strftime pattern"));
        return;
    }
    let sample = chrono::Utc::now().format(format).to_string();
    if sample.contains('/') || sample.contains('\\') || sample == "." || sample == ".." {
        errors.push(format!(
            "window.tag_format '{format}' must render a single path segment, got '{sample}'"
        ));
    }
}

/// Validate a parsed archive configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_archive(config: &ArchiveConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported archive version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.archive.trim().is_empty() {
        errors.push("Archive name must not be empty".to_string());
    }

    validate_database(&config.source, "source", &mut errors);

    check_identifier(&config.registry.table, "registry.table", &mut errors);
    check_identifier(&config.registry.table_column, "registry.table_column", &mut errors);
    check_identifier(&config.registry.key_column, "registry.key_column", &mut errors);
    check_identifier(
        &config.window.timestamp_column,
        "window.timestamp_column",
        &mut errors,
    );

    if let Err(e) = config.window.offset() {
        errors.push(format!("window.utc_offset: {e}"));
    } else {
        let start = config.window.start_at();
        let end = config.window.end_at();
        if let Err(ref e) = start {
            errors.push(format!("window.start: {e}"));
        }
        if let Err(ref e) = end {
            errors.push(format!("window.end: {e}"));
        }
        if let (Ok(start), Ok(end)) = (start, end) {
            match (config.window.mode, start, end) {
                (_, Some(s), Some(e)) if s >= e => errors.push(format!(
                    "window.start ({s}) must be before window.end ({e})"
                )),
                (DumpMode::Full, Some(_), None) | (DumpMode::Full, None, Some(_)) => errors.push(
                    "full mode needs both window.start and window.end, or neither for the previous month"
                        .to_string(),
                ),
                _ => {}
            }
        }
    }

    validate_tag_format(&config.window.tag_format, &mut errors);

    if config.work_dir.as_os_str().is_empty() {
        errors.push("work_dir must not be empty".to_string());
    }

    if let Some(restore) = &config.restore {
        validate_database(&restore.destination, "restore.destination", &mut errors);
        if restore.destination == config.source {
            errors.push("restore.destination must differ from source".to_string());
        }
    }

    if let Some(storage) = &config.storage {
        match storage.backend {
            StorageBackendKind::S3 => {
                if storage.bucket.as_deref().map_or(true, |b| b.trim().is_empty()) {
                    errors.push("storage.bucket is required for the s3 backend".to_string());
                }
            }
            StorageBackendKind::Local => {
                if storage.path.is_none() {
                    errors.push("storage.path is required for the local backend".to_string());
                }
            }
        }
        if storage.max_retries == 0 {
            errors.push("storage.max_retries must be at least 1".to_string());
        }
        if storage.storage_class.trim().is_empty() {
            errors.push("storage.storage_class must not be empty".to_string());
        }
        if storage.retention_days == Some(0) {
            errors.push("storage.retention_days must be at least 1 when set".to_string());
        }
    }

    if config.resources.parallelism == 0 {
        errors.push("resources.parallelism must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!(
            "Archive validation failed:\n  - {}",
            errors.join("\n  - ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_archive_str;

    fn base_yaml() -> String {
        r#"
version: "1.0"
archive: test
source:
  driver: sqlite
  path: ./shop.db
window:
  start: 2023-01-01
  end: 2023-02-01
"#
        .to_string()
    }

    fn validate(yaml: &str) -> Result<()> {
        validate_archive(&parse_archive_str(yaml).unwrap())
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&base_yaml()).is_ok());
    }

    #[test]
    fn test_inverted_window_rejected() {
        let yaml = base_yaml().replace("end: 2023-02-01", "end: 2022-12-01");
        let err = validate(&yaml).unwrap_err().to_string();
        assert!(err.contains("must be before"), "got: {err}");
    }

    #[test]
    fn test_equal_bounds_rejected() {
        let yaml = base_yaml().replace("end: 2023-02-01", "end: 2023-01-01");
        assert!(validate(&yaml).is_err());
    }

    #[test]
    fn test_full_mode_half_window_rejected() {
        let yaml = base_yaml().replace("  end: 2023-02-01\n", "");
        let err = validate(&yaml).unwrap_err().to_string();
        assert!(err.contains("both window.start and window.end"), "got: {err}");
    }

    #[test]
    fn test_incremental_mode_allows_open_end() {
        let yaml = base_yaml().replace("  end: 2023-02-01\n", "  mode: incremental\n");
        assert!(validate(&yaml).is_ok());
    }

    #[test]
    fn test_unsafe_identifiers_rejected() {
        let yaml = format!(
            "{}registry:\n  table: \"archive_manager; DROP TABLE x\"\n",
            base_yaml()
        );
        let err = validate(&yaml).unwrap_err().to_string();
        assert!(err.contains("registry.table"), "got: {err}");
    }

    #[test]
    fn test_storage_requires_retry_and_bucket() {
        let yaml = format!(
            "{}storage:\n  backend: s3\n  max_retries: 0\n",
            base_yaml()
        );
        let err = validate(&yaml).unwrap_err().to_string();
        assert!(err.contains("storage.bucket"), "got: {err}");
        assert!(err.contains("max_retries"), "got: {err}");
    }

    #[test]
    fn test_tag_format_must_be_single_segment() {
        let yaml = format!("{}  tag_format: \"%Y/%m/%d\"\n", base_yaml());
        let err = validate(&yaml).unwrap_err().to_string();
        assert!(err.contains("single path segment"), "got: {err}");
    }

    #[test]
    fn test_invalid_tag_format_rejected() {
        let yaml = format!("{}  tag_format: \"%Q\"\n", base_yaml());
        let err = validate(&yaml).unwrap_err().to_string();
        assert!(err.contains("strftime"), "got: {err}");
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let yaml = format!("{}resources:\n  parallelism: 0\n", base_yaml());
        assert!(validate(&yaml).is_err());
    }

    #[test]
    fn test_restore_into_source_rejected() {
        let yaml = format!(
            "{}restore:\n  destination:\n    driver: sqlite\n    path: ./shop.db\n",
            base_yaml()
        );
        let err = validate(&yaml).unwrap_err().to_string();
        assert!(err.contains("must differ"), "got: {err}");
    }

    #[test]
    fn test_all_errors_reported_together() {
        let yaml = r#"
version: "2.0"
archive: ""
source:
  driver: sqlite
  path: ./shop.db
resources:
  parallelism: 0
"#;
        let err = validate(yaml).unwrap_err().to_string();
        assert!(err.contains("Unsupported archive version"));
        assert!(err.contains("Archive name"));
        assert!(err.contains("parallelism"));
    }
}
