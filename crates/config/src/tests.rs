use std::fs;

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serial_test::serial;
use tempfile::TempDir;

use super::*;

#[derive(Debug, Deserialize)]
struct RedisSection {
    address: String,
    password: Secret<String>,
    #[serde(default)]
    database: i64,
}

fn write(dir: &TempDir, file: &str, contents: &str) {
    fs::write(dir.path().join(file), contents).unwrap();
}

#[test]
fn test_validation_errors() {
    let err = Settings::load(&ConfigOptions::new("", "toml").with_path(".")).unwrap_err();
    assert!(matches!(err, ConfigError::MissingName));

    let err = Settings::load(&ConfigOptions::new("app", "").with_path(".")).unwrap_err();
    assert!(matches!(err, ConfigError::MissingType));

    let err = Settings::load(&ConfigOptions::new("app", "toml")).unwrap_err();
    assert!(matches!(err, ConfigError::MissingPath));

    let err = Settings::load(&ConfigOptions::new("app", "ini").with_path(".")).unwrap_err();
    assert!(matches!(err, ConfigError::UnsupportedType(_)));
}

#[test]
fn test_validation_error_maps_to_configuration_invalid() {
    let err: AppError = ConfigError::MissingName.into();
    assert_eq!(err, AppError::configuration_invalid("config name not found"));
}

#[test]
fn test_missing_file_uses_default_config() {
    let dir = TempDir::new().unwrap();
    let settings =
        Settings::load(&ConfigOptions::new("app", "toml").with_path(dir.path())).unwrap();

    assert!(settings.source_file().is_none());
    assert!(!settings.contains("redis"));
    assert!(settings.section::<RedisSection>("redis").unwrap().is_none());
}

#[test]
fn test_searches_paths_in_order() {
    let empty = TempDir::new().unwrap();
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    write(&first, "app.toml", "app_name = \"first\"\n");
    write(&second, "app.toml", "app_name = \"second\"\n");

    let options = ConfigOptions::new("app", "toml")
        .with_path(empty.path())
        .with_path(first.path())
        .with_path(second.path());
    let settings = Settings::load(&options).unwrap();

    assert_eq!(settings.get_string("app_name").as_deref(), Some("first"));
    assert_eq!(
        settings.source_file(),
        Some(first.path().join("app.toml").as_path())
    );
}

#[test]
fn test_load_yaml_section() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "service.yml",
        "redis:\n  address: redis://cache:6379\n  password: hunter2\n  database: 2\n",
    );

    let settings =
        Settings::load(&ConfigOptions::new("service", "yaml").with_path(dir.path())).unwrap();
    let redis: RedisSection = settings.section("redis").unwrap().unwrap();

    assert_eq!(redis.address, "redis://cache:6379");
    assert_eq!(redis.password.expose_secret(), "hunter2");
    assert_eq!(redis.database, 2);
    assert!(!format!("{:?}", redis).contains("hunter2"));
}

#[test]
fn test_load_json() {
    let dir = TempDir::new().unwrap();
    write(&dir, "app.json", r#"{"server": {"port": 8080}}"#);

    let settings =
        Settings::load(&ConfigOptions::new("app", "JSON").with_path(dir.path())).unwrap();
    assert_eq!(settings.get::<u16>("server.port").unwrap(), 8080);
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    write(&dir, "app.toml", "this is = = not toml");

    let err = Settings::load(&ConfigOptions::new("app", "toml").with_path(dir.path())).unwrap_err();
    assert!(matches!(err, ConfigError::Read(_)));
    assert!(AppError::from(err).to_string().contains("error reading config file"));
}

#[test]
#[serial]
fn test_env_overlay_overrides_file() {
    let dir = TempDir::new().unwrap();
    write(&dir, "app.toml", "[redis]\naddress = \"redis://file:6379\"\npassword = \"\"\n");

    unsafe { std::env::set_var("SVCKIT_TEST_REDIS__ADDRESS", "redis://env:6379") };
    let options = ConfigOptions::new("app", "toml")
        .with_path(dir.path())
        .with_env_prefix("SVCKIT_TEST_");
    let settings = Settings::load(&options);
    unsafe { std::env::remove_var("SVCKIT_TEST_REDIS__ADDRESS") };

    let redis: RedisSection = settings.unwrap().section("redis").unwrap().unwrap();
    assert_eq!(redis.address, "redis://env:6379");
}

#[test]
#[serial]
fn test_from_env() {
    unsafe { std::env::set_var("SVCKIT_ENV_APP_NAME", "orders") };
    let settings = Settings::from_env("SVCKIT_ENV_");
    let name = settings.get_string("app_name");
    unsafe { std::env::remove_var("SVCKIT_ENV_APP_NAME") };

    assert_eq!(name.as_deref(), Some("orders"));
}

#[test]
fn test_load_config_runs_once() {
    let dir = TempDir::new().unwrap();
    write(&dir, "app.toml", "app_name = \"once\"\n");

    let slot = config_slot();
    let options = ConfigOptions::new("app", "toml").with_path(dir.path());
    let first = load_config(&slot, &options).unwrap();

    // 第二次加载（即使换成环境变量）返回同一个实例
    let second = load_config_from_env(&slot, "IGNORED_").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.get_string("app_name").as_deref(), Some("once"));
}

#[test]
fn test_failed_load_is_sticky_until_reset() {
    let slot = config_slot();
    let err = load_config(&slot, &ConfigOptions::new("", "toml")).unwrap_err();
    assert!(matches!(err, AppError::ConfigurationInvalid(_)));

    let dir = TempDir::new().unwrap();
    let valid = ConfigOptions::new("app", "toml").with_path(dir.path());
    assert!(load_config(&slot, &valid).is_err());

    slot.reset();
    assert!(load_config(&slot, &valid).is_ok());
}
