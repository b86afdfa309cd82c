use cs_core::config::*;
use cs_core::types::Platform;

const SAMPLE: &str = r#"
[general]
log_format = "json"

[queue]
batch_size = 25

[retry]
max_retries = 5
base_delay_ms = 200

[[platforms]]
platform = "shopify"
mode = "to_external"
base_url = "https://shop.example.com"
entity_types = ["product", "order"]
webhook_secret_env = "SHOPIFY_WEBHOOK_SECRET"

[platforms.auth]
kind = "header"
header = "X-Shopify-Access-Token"
token_env = "SHOPIFY_TOKEN"

[platforms.options]
api_version = "2024-01"

[[platforms]]
platform = "drupal"
base_url = "https://drupal.example.com"
strict_signature = true

[platforms.auth]
kind = "client_credentials"
token_url = "https://drupal.example.com/oauth/token"
client_id_env = "DRUPAL_CLIENT_ID"
client_secret_env = "DRUPAL_CLIENT_SECRET"
"#;

#[test]
fn parses_full_sample() {
    let cfg = Config::from_toml(SAMPLE).unwrap();
    assert_eq!(cfg.general.log_format, LogFormat::Json);
    assert_eq!(cfg.queue.batch_size, 25);
    assert_eq!(cfg.queue.batch_delay_ms, 500);
    assert_eq!(cfg.retry.max_retries, 5);

    let shop = cfg.platform(Platform::Shopify).unwrap();
    assert!(shop.should_sync_to());
    assert!(!shop.should_sync_from());
    assert_eq!(shop.option("api_version"), Some("2024-01"));
    assert!(matches!(shop.auth, AuthConfig::Header { .. }));
    assert!(shop.require_signature);
    assert_eq!(shop.request_timeout_secs, 30);

    let drupal = cfg.platform(Platform::Drupal).unwrap();
    assert_eq!(drupal.mode, SyncMode::Bidirectional);
    assert!(drupal.strict_signature);
    assert!(matches!(drupal.auth, AuthConfig::ClientCredentials { scope: None, .. }));
}

#[test]
fn roundtrips_through_toml() {
    let cfg = Config::from_toml(SAMPLE).unwrap();
    let text = cfg.to_toml().unwrap();
    let back = Config::from_toml(&text).unwrap();
    assert_eq!(back.platforms.len(), 2);
}

#[test]
fn rejects_zero_retry_budget() {
    let err = Config::from_toml("[retry]\nmax_retries = 0\n").unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn rejects_active_platform_without_url() {
    let err = Config::from_toml("[[platforms]]\nplatform = \"wix\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
    assert!(Config::from_toml("[[platforms]]\nplatform = \"wix\"\nmode = \"disabled\"\n").is_ok());
}

#[test]
fn load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, SAMPLE).unwrap();
    let cfg = Config::load_from(&path).unwrap();
    assert_eq!(cfg.platforms.len(), 2);
    assert!(matches!(
        Config::load_from(dir.path().join("missing.toml")),
        Err(ConfigError::Io(_))
    ));
}

#[test]
fn store_path_expands_home() {
    let store = StoreConfig { path: "/tmp/x.db".into() };
    assert_eq!(store.resolved_path(), std::path::PathBuf::from("/tmp/x.db"));
    let home = StoreConfig::default().resolved_path();
    assert!(home.ends_with(".cms-sync/sync.db"));
}

#[test]
fn shipped_example_config_is_valid() {
    let cfg = Config::from_toml(include_str!("../../../config.example.toml")).unwrap();
    assert_eq!(cfg.platforms.len(), 5);
    assert_eq!(cfg.guard.echo_window_ms, 2000);
    let opti = cfg.platform(Platform::Optimizely).unwrap();
    assert!(opti.strict_signature);
    assert!(matches!(opti.auth, AuthConfig::ClientCredentials { .. }));
    assert!(!cfg.platform(Platform::Wix).unwrap().should_sync_to());
    assert_eq!(cfg.platform(Platform::Drupal).unwrap().option("bundle"), Some("article"));
}
