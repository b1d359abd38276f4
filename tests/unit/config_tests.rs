//! Unit tests for client configuration parsing and port resolution.
//!
//! Covers:
//! - empty and absent configuration fall back to defaults
//! - every field can be overridden from TOML
//! - unknown keys and out-of-range values are rejected
//! - port precedence: option, then environment, then file

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;

use interp_client::config::{ClientConfig, CONFIG_ENV, MAX_CHUNK_SIZE};
use interp_client::connection::StartupPolicy;
use interp_client::AppError;

fn assert_config_error(result: interp_client::Result<ClientConfig>, needle: &str) {
    match result {
        Err(AppError::Config(msg)) => assert!(
            msg.contains(needle),
            "error must mention '{needle}', got: {msg}"
        ),
        other => panic!("expected Err(AppError::Config), got: {other:?}"),
    }
}

// ── Parsing ──────────────────────────────────────────────────────────────────

#[test]
fn empty_toml_yields_defaults() {
    let config = ClientConfig::from_toml_str("").expect("empty config is valid");
    assert_eq!(config, ClientConfig::default());
    assert_eq!(config.host, "localhost");
    assert_eq!(config.port, 1961);
    assert_eq!(config.startup_attempts, 3);
    assert_eq!(config.settle_delay_ms, 3000);
    assert_eq!(config.chunk_size, 512);
    assert_eq!(config.cookie_env, "INTERP_COOKIE");
    assert_eq!(config.classpath_env, "CLASSPATH");
    assert!(config.server_command.is_none());
    assert!(config.cookie_file.is_none());
}

#[test]
fn all_fields_are_overridable() {
    let toml = r#"
host = "127.0.0.1"
port = 2000
server_command = "/opt/interp/bin/interp-server"
server_args = ["-q"]
startup_attempts = 5
settle_delay_ms = 250
chunk_size = 4096
cookie_env = "MY_COOKIE"
cookie_file = "/tmp/cookie"
classpath_env = "MY_CP"
"#;
    let config = ClientConfig::from_toml_str(toml).expect("valid config");

    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 2000);
    assert_eq!(
        config.server_command,
        Some(PathBuf::from("/opt/interp/bin/interp-server"))
    );
    assert_eq!(config.server_args, ["-q"]);
    assert_eq!(config.startup_attempts, 5);
    assert_eq!(config.chunk_size, 4096);
    assert_eq!(config.cookie_env, "MY_COOKIE");
    assert_eq!(config.cookie_file, Some(PathBuf::from("/tmp/cookie")));
    assert_eq!(config.classpath_env, "MY_CP");
    assert_eq!(
        config.startup_policy(),
        StartupPolicy {
            attempts: 5,
            settle_delay: Duration::from_millis(250),
        }
    );
}

#[test]
fn default_startup_policy_matches_constants() {
    assert_eq!(ClientConfig::default().startup_policy(), StartupPolicy::default());
}

// ── Validation ───────────────────────────────────────────────────────────────

#[test]
fn unknown_key_is_rejected() {
    assert_config_error(ClientConfig::from_toml_str("colour = true"), "invalid config");
}

#[test]
fn wrong_type_is_rejected() {
    assert_config_error(ClientConfig::from_toml_str("port = \"high\""), "invalid config");
    assert_config_error(ClientConfig::from_toml_str("port = 70000"), "invalid config");
}

#[test]
fn empty_host_is_rejected() {
    assert_config_error(ClientConfig::from_toml_str("host = \" \""), "host must not be empty");
}

#[test]
fn zero_startup_attempts_is_rejected() {
    assert_config_error(
        ClientConfig::from_toml_str("startup_attempts = 0"),
        "startup_attempts must be greater than zero",
    );
}

#[test]
fn chunk_size_bounds_are_enforced() {
    assert_config_error(ClientConfig::from_toml_str("chunk_size = 0"), "chunk_size");
    assert_config_error(
        ClientConfig::from_toml_str(&format!("chunk_size = {}", MAX_CHUNK_SIZE + 1)),
        "chunk_size",
    );
    let config = ClientConfig::from_toml_str(&format!("chunk_size = {MAX_CHUNK_SIZE}"))
        .expect("upper bound is valid");
    assert_eq!(config.chunk_size, MAX_CHUNK_SIZE);
}

#[test]
fn empty_cookie_env_is_rejected() {
    assert_config_error(ClientConfig::from_toml_str("cookie_env = \"\""), "cookie_env");
}

// ── Loading ──────────────────────────────────────────────────────────────────

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "port = 3000").expect("write config");

    let config = ClientConfig::load_from_path(file.path()).expect("load");
    assert_eq!(config.port, 3000);
}

#[test]
fn load_from_missing_path_fails() {
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("absent.toml");
    assert_config_error(ClientConfig::load_from_path(&missing), "failed to read config");
}

#[test]
#[serial]
fn load_without_path_uses_env_then_defaults() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "port = 4000").expect("write config");

    std::env::set_var(CONFIG_ENV, file.path());
    let from_env = ClientConfig::load(None);
    std::env::remove_var(CONFIG_ENV);
    assert_eq!(from_env.expect("load from env").port, 4000);

    let defaults = ClientConfig::load(None).expect("load defaults");
    assert_eq!(defaults, ClientConfig::default());
}

#[test]
#[serial]
fn explicit_path_wins_over_env() {
    let mut explicit = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(explicit, "port = 5000").expect("write config");

    std::env::set_var(CONFIG_ENV, "/nonexistent/interp.toml");
    let config = ClientConfig::load(Some(explicit.path()));
    std::env::remove_var(CONFIG_ENV);

    assert_eq!(config.expect("explicit path").port, 5000);
}

// ── Port resolution ──────────────────────────────────────────────────────────

#[test]
fn option_port_wins() {
    let config = ClientConfig::default();
    assert_eq!(config.resolve_port(Some(2000), Some("3000")).expect("port"), 2000);
}

#[test]
fn env_port_wins_over_config() {
    let config = ClientConfig::default();
    assert_eq!(config.resolve_port(None, Some("3000")).expect("port"), 3000);
}

#[test]
fn config_port_is_the_fallback() {
    let config = ClientConfig {
        port: 4100,
        ..ClientConfig::default()
    };
    assert_eq!(config.resolve_port(None, None).expect("port"), 4100);
}

#[test]
fn invalid_env_port_is_an_error() {
    let config = ClientConfig::default();
    match config.resolve_port(None, Some("nope")) {
        Err(AppError::Config(msg)) => {
            assert!(msg.contains("invalid port number nope"), "got: {msg}");
        }
        other => panic!("expected Err(AppError::Config), got: {other:?}"),
    }
}
