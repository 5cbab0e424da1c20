//! # Configuration Tests
//!
//! Tests for the layered configuration loader. Environment variables are process-wide,
//! so every test here runs serially.

use devotio_server::config::{get_config, ConfigError, CreatorlessPolicyKind};
use serial_test::serial;
use std::env;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const ENV_VARS: &[&str] = &[
    "PORT",
    "DB_URL",
    "JWT_SECRET",
    "TEST_LOCAL_URL",
    "DEVOTIO_GENERATION__STALE_AFTER_SECS",
    "DEVOTIO_BILLING__STARTING_BALANCE",
];

/// Ensures a clean slate before and after each test.
fn clear_env_vars() {
    for var in ENV_VARS {
        env::remove_var(var);
    }
}

fn write_config(dir: &TempDir, content: &str) -> String {
    let path = dir.path().join("config.yml");
    fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

const MINIMAL: &str = r#"
providers:
  local_default:
    provider: "local"
    api_url: "${TEST_LOCAL_URL}"
    model_name: "llama3"
generation:
  provider_chain: ["local_default"]
"#;

#[test]
#[serial]
fn test_defaults_and_substitution() {
    clear_env_vars();
    env::set_var("TEST_LOCAL_URL", "http://localhost:1234/v1/chat/completions");
    let dir = TempDir::new().unwrap();

    let config = get_config(Some(write_config(&dir, MINIMAL).as_str())).unwrap();

    assert_eq!(config.port, 9090);
    assert_eq!(config.db_url, "db/devotio.db");
    assert_eq!(
        config.providers["local_default"].api_url.as_deref(),
        Some("http://localhost:1234/v1/chat/completions")
    );
    assert_eq!(config.generation.stale_after(), Duration::from_secs(300));
    assert_eq!(config.generation.poll_interval(), Duration::from_secs(2));
    assert_eq!(config.generation.creatorless, CreatorlessPolicyKind::Free);
    assert_eq!(config.billing.starting_balance, 50);
    assert_eq!(config.validation.max_input_chars, 500);
    assert_eq!(config.pricing.generation.quick, 5);

    clear_env_vars();
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env_vars();
    env::set_var("PORT", "9999");
    env::set_var("JWT_SECRET", "from-env");
    env::set_var("DEVOTIO_GENERATION__STALE_AFTER_SECS", "42");
    env::set_var("DEVOTIO_BILLING__STARTING_BALANCE", "7");
    let dir = TempDir::new().unwrap();
    let content = format!("port: 8000\n{MINIMAL}\nbilling:\n  starting_balance: 100\n");

    let config = get_config(Some(write_config(&dir, &content).as_str())).unwrap();

    assert_eq!(config.port, 9999);
    assert_eq!(config.jwt_secret, "from-env");
    assert_eq!(config.generation.stale_after_secs, 42);
    assert_eq!(config.billing.starting_balance, 7);

    clear_env_vars();
}

#[test]
#[serial]
fn test_creatorless_policy_is_configurable() {
    clear_env_vars();
    let dir = TempDir::new().unwrap();
    let content = MINIMAL.replace(
        "provider_chain: [\"local_default\"]",
        "provider_chain: [\"local_default\"]\n  creatorless: bill",
    );

    let config = get_config(Some(write_config(&dir, &content).as_str())).unwrap();
    assert_eq!(config.generation.creatorless, CreatorlessPolicyKind::Bill);
}

#[test]
#[serial]
fn test_provider_chain_must_name_known_providers() {
    clear_env_vars();
    let dir = TempDir::new().unwrap();

    let empty = MINIMAL.replace("[\"local_default\"]", "[]");
    let err = get_config(Some(write_config(&dir, &empty).as_str())).unwrap_err();
    assert!(matches!(err, ConfigError::General(ref msg) if msg.contains("at least one")));

    let unknown = MINIMAL.replace("[\"local_default\"]", "[\"missing\"]");
    let err = get_config(Some(write_config(&dir, &unknown).as_str())).unwrap_err();
    assert!(matches!(err, ConfigError::General(ref msg) if msg.contains("missing")));
}

#[test]
#[serial]
fn test_missing_file_is_not_found() {
    clear_env_vars();
    let err = get_config(Some("/definitely/not/here/config.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));
}
