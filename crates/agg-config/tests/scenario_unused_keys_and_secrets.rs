//! Scenario: unused-key guard and secret-literal rejection.
//!
//! GREEN when:
//! - Keys the service never reads are reported under `Warn` and fail under `Fail`.
//! - Keys it does read are never reported.
//! - A literal secret (e.g. a Postgres URL) anywhere in the merged config
//!   aborts loading, and the error never echoes the value.

use agg_config::{load_layered_yaml_from_strings, report_unused_keys, UnusedKeyPolicy};

const YAML_WITH_EXTRAS: &str = r#"
sink:
  base_url: "http://database-service:8000"
  retries: 3
join:
  consistency: "read_merge_write"
redis:
  host: "localhost"
  port: 6379
"#;

#[test]
fn warn_reports_unused_keys_sorted() {
    let loaded = load_layered_yaml_from_strings(&[YAML_WITH_EXTRAS]).unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn).unwrap();

    assert_eq!(
        report.unused_leaf_pointers,
        vec![
            "/redis/host".to_string(),
            "/redis/port".to_string(),
            "/sink/retries".to_string(),
        ]
    );
}

#[test]
fn fail_errors_on_unused_keys() {
    let loaded = load_layered_yaml_from_strings(&[YAML_WITH_EXTRAS]).unwrap();
    let err = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail)
        .unwrap_err()
        .to_string();
    assert!(err.contains("CONFIG_UNUSED_KEYS"), "{err}");
    assert!(err.contains("/redis/host"), "{err}");
}

#[test]
fn base_config_is_clean() {
    let base = include_str!("../../../config/base.yaml");
    let loaded = load_layered_yaml_from_strings(&[base]).unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail).unwrap();
    assert!(report.is_clean());
    loaded.settings().unwrap();
}

#[test]
fn literal_database_url_is_rejected() {
    let yaml = r#"
store:
  backend: "postgres"
  database_url_env: "postgres://agg:hunter2@db:5432/agg"
"#;
    let err = load_layered_yaml_from_strings(&[yaml])
        .unwrap_err()
        .to_string();
    assert!(err.contains("CONFIG_SECRET_DETECTED"), "{err}");
    assert!(err.contains("/store/database_url_env"), "{err}");
    assert!(!err.contains("hunter2"), "{err}");
}
