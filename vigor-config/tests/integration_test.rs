//! Integration tests for vigor-config

use std::io::Write;
use vigor_config::*;

#[test]
fn test_json_file_layer() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{ "redis_url": "redis://queue:6379/2", "retry": {{ "backoff": "fixed", "base_ms": 250 }} }}"#
    )
    .unwrap();

    let settings = SchedulerSettings::builder().file(file.path()).build().unwrap();

    assert_eq!(settings.redis_url, "redis://queue:6379/2");
    assert_eq!(settings.retry.backoff, BackoffKind::Fixed);
    assert_eq!(settings.retry.base_ms, 250);
    assert_eq!(settings.retry.max_attempts, 3);
}

#[test]
fn test_dotenv_layer_beats_file() {
    let mut toml = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(toml, "concurrency = 2").unwrap();

    let mut dotenv = tempfile::NamedTempFile::new().unwrap();
    writeln!(dotenv, "VIGOR_CONCURRENCY=7").unwrap();
    writeln!(dotenv, "VIGOR_QUEUE_NAME=fitness").unwrap();

    let settings = SchedulerSettings::builder()
        .file(toml.path())
        .dotenv(dotenv.path())
        .build()
        .unwrap();

    assert_eq!(settings.concurrency, 7);
    assert_eq!(settings.queue_name, "fitness");
    assert_eq!(settings.key_prefix(), "vigor:queue:fitness");
}

#[test]
fn test_env_layer_with_custom_prefix() {
    unsafe {
        std::env::set_var("VIGORTEST_POLL_INTERVAL_MS", "250");
    }

    let settings = SchedulerSettings::builder().env("VIGORTEST").build().unwrap();
    assert_eq!(settings.poll_interval_ms, 250);

    unsafe {
        std::env::remove_var("VIGORTEST_POLL_INTERVAL_MS");
    }
}

#[test]
fn test_invalid_redis_url_rejected() {
    let err = SchedulerSettings::builder()
        .set("redis_url", "localhost:6379")
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("redis_url"));
}

#[test]
fn test_unsupported_file_format() {
    let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    let err = SchedulerSettings::builder().file(file.path()).build().unwrap_err();
    assert!(matches!(err, ConfigError::LoadError(_)));
}
