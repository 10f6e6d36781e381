use refreshq::config::{Config, ProcessingConfig};
use refreshq::config::secrets::{ExposeSecret, SecretString};
use std::io::Write;

// Environment mutation lives in a single test; tests in one binary share
// the process environment.
#[test]
fn config_from_env_loads_required_and_tunables() {
    unsafe {
        std::env::remove_var("DATABASE_URL");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::set_var("DATABASE_URL", "sqlite::memory:");
        std::env::set_var("REFRESHQ_INSERT_BATCH_SIZE", "7");
        std::env::set_var("REFRESHQ_INTERVAL_MIN_SECS", "1.5");
        std::env::set_var("REFRESHQ_INTERVAL_MAX_SECS", "2.5");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.database_url.expose_secret(), "sqlite::memory:");
    assert!(!config.log_level.is_empty());
    assert_eq!(config.processing.insert_batch_size, 7);
    assert_eq!(config.processing.refresh_interval_min_secs, 1.5);
    assert_eq!(config.processing.refresh_interval_max_secs, 2.5);

    unsafe {
        std::env::set_var("REFRESHQ_INSERT_BATCH_SIZE", "many");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("REFRESHQ_INSERT_BATCH_SIZE");
        std::env::remove_var("REFRESHQ_INTERVAL_MIN_SECS");
        std::env::remove_var("REFRESHQ_INTERVAL_MAX_SECS");
    }
}

fn base_config() -> Config {
    Config {
        database_url: SecretString::from("sqlite::memory:"),
        otel_endpoint: None,
        log_level: "info".to_string(),
        processing: ProcessingConfig::default(),
    }
}

#[test]
fn config_file_overrides_processing() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[processing]\ninsert_batch_size = 3\nmax_connections = 2").unwrap();

    let config = base_config().with_file(file.path()).unwrap();
    assert_eq!(config.processing.insert_batch_size, 3);
    assert_eq!(config.processing.max_connections, 2);
    assert_eq!(
        config.processing.refresh_interval_min_secs,
        ProcessingConfig::default().refresh_interval_min_secs
    );
}

#[test]
fn config_file_keeps_unmentioned_settings() {
    let mut config = base_config();
    config.processing.insert_batch_size = 9;
    config.processing.refresh_interval_min_secs = 1.0;
    config.processing.refresh_interval_max_secs = 2.0;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[processing]\nmax_connections = 4").unwrap();

    let config = config.with_file(file.path()).unwrap();
    assert_eq!(config.processing.max_connections, 4);
    assert_eq!(config.processing.insert_batch_size, 9);
    assert_eq!(config.processing.refresh_interval_min_secs, 1.0);
    assert_eq!(config.processing.refresh_interval_max_secs, 2.0);
}

#[test]
fn config_file_merge_is_validated() {
    let mut config = base_config();
    config.processing.refresh_interval_min_secs = 50.0;
    config.processing.refresh_interval_max_secs = 60.0;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[processing]\nrefresh_interval_max_secs = 10.0").unwrap();

    assert!(config.with_file(file.path()).is_err());
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(base_config().with_file(dir.path().join("absent.toml")).is_err());
}
