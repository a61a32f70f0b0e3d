use std::io::Write;
use std::time::Duration;

use crudql::config::CONFIG_FILE;
use crudql::{ConfigError, EngineConfig};

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn loads_every_section_from_a_file() {
    let file = write_config(
        r#"
        [pagination]
        default_size = 20
        max_size = 200

        [permissions]
        cache_ttl_secs = 60
        admin_role = "clinic_admin"

        [conflicts.patient_code_key]
        code = "PATIENT_CODE_TAKEN"
        message = "A patient with this code already exists"
        loc = ["body", "code"]
        "#,
    );

    let config = EngineConfig::load_from(file.path()).unwrap();

    assert_eq!(config.pagination.default_size, 20);
    assert_eq!(config.page_size(None), 20);
    assert_eq!(config.page_size(Some(0)), 1);
    assert_eq!(config.page_size(Some(5_000)), 200);
    assert_eq!(config.permissions.cache_ttl(), Duration::from_secs(60));
    assert_eq!(config.permissions.admin_role, "clinic_admin");
    let rule = &config.conflicts["patient_code_key"];
    assert_eq!(rule.code, "PATIENT_CODE_TAKEN");
    assert_eq!(rule.loc, ["body", "code"]);
}

#[test]
fn missing_file_is_reported_with_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE);

    let err = EngineConfig::load_from(&path).unwrap_err();

    assert!(matches!(&err, ConfigError::NotFound(p) if *p == path));
    assert!(err.to_string().ends_with(CONFIG_FILE), "{err}");
}

#[test]
fn malformed_and_inconsistent_files_are_rejected() {
    let file = write_config("[pagination\ndefault_size = 1");
    let err = EngineConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains(&file.path().display().to_string()), "{err}");

    let file = write_config("[pagination]\ndefault_size = 100\nmax_size = 10\n");
    let err = EngineConfig::load_from(file.path()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid config: pagination.default_size exceeds pagination.max_size"
    );

    let file = write_config("[conflicts.patient_code_key]\ncode = \"\"\nmessage = \"taken\"\n");
    let err = EngineConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn config_errors_surface_as_internal_query_errors() {
    let err: crudql::QueryError = EngineConfig::from_toml_str("[permissions]\ncache_ttl_secs = 0\n")
        .unwrap_err()
        .into();
    assert_eq!(err.kind(), crudql::ErrorKind::Internal);
}
