//! Configuration loading from files and the process environment

use doublecheck_sync::shared::config::{ConfigError, SyncConfig};
use serial_test::serial;
use std::io::Write;

#[test]
#[serial]
fn test_load_merges_file_and_environment() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "max_attempts = 5\nphoto_bucket = \"field-photos\"\nsupabase_url = \"https://proj.supabase.co\""
    )
    .unwrap();

    std::env::set_var("DOUBLECHECK_MAX_ATTEMPTS", "4");
    std::env::set_var("DOUBLECHECK_SUPABASE_KEY", "anon");
    let config = SyncConfig::load(Some(file.path()));
    std::env::remove_var("DOUBLECHECK_MAX_ATTEMPTS");
    std::env::remove_var("DOUBLECHECK_SUPABASE_KEY");

    let config = config.unwrap();
    assert_eq!(config.max_attempts, 4);
    assert_eq!(config.photo_bucket, "field-photos");
    assert_eq!(config.supabase_key.as_deref(), Some("anon"));
    assert_eq!(config.base_delay_ms, 1_000);
}

#[test]
#[serial]
fn test_load_without_file_uses_defaults() {
    let config = SyncConfig::load(Some(std::path::Path::new("/nonexistent/doublecheck.toml"))).unwrap();
    assert_eq!(config, SyncConfig::default());
}

#[test]
#[serial]
fn test_invalid_environment_value_rejected() {
    std::env::set_var("DOUBLECHECK_MAX_CONCURRENT", "0");
    let result = SyncConfig::load(None);
    std::env::remove_var("DOUBLECHECK_MAX_CONCURRENT");

    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}
