//! Integration tests for environment and YAML configuration loading.
//!
//! Precedence: env > yaml > defaults.

use serial_test::serial;
use std::env;
use std::io::Write;
use std::time::Duration;

use geo_loadtest::config::Config;
use geo_loadtest::errors::ConfigError;
use geo_loadtest::persona::PersonaKind;
use geo_loadtest::yaml_config::YamlConfig;

/// Clear all env vars that could affect config parsing.
/// Must be called at the start of every test to prevent leakage
/// from other tests (execution order is not guaranteed).
fn clean_env() {
    for var in [
        "BASE_URL",
        "API_KEY",
        "QUERY_POINTS",
        "QUERY_POINTS_NUM",
        "VRP_MAX_PROFILES",
        "VRP_MAX_LOCATIONS",
        "VRP_PROFILES",
        "VRP_TOMTOM_PROBABILITY",
        "VRP_POLL_INTERVAL",
        "VRP_MAX_POLLS",
        "NUM_USERS",
        "SPAWN_RATE",
        "TEST_DURATION",
        "PACING_INTERVAL",
        "PERSONAS",
        "SKIP_TLS_VERIFY",
        "RANDOM_SEED",
        "DEBUG",
        "METRICS_PORT",
    ] {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_base_url_is_required() {
    clean_env();
    assert_eq!(
        Config::from_env().unwrap_err(),
        ConfigError::MissingField {
            field: "BASE_URL".to_string()
        }
    );
}

#[test]
#[serial]
fn test_env_defaults() {
    clean_env();
    env::set_var("BASE_URL", "http://localhost:8989");

    let config = Config::from_env().unwrap();
    assert_eq!(config.api_key, None);
    assert_eq!(config.users, 10);
    assert_eq!(config.spawn_rate, 10.0);
    assert_eq!(config.test_duration, Duration::from_secs(300));
    assert_eq!(config.pacing_interval, Duration::from_secs(1));
    assert_eq!(config.personas.len(), 6);
    assert_eq!(config.personas.total_weight(), 15.0);
    assert!(config.skip_tls_verify);
    assert!(!config.debug_failures);

    clean_env();
}

#[test]
#[serial]
fn test_env_values_are_applied() {
    clean_env();
    env::set_var("BASE_URL", "https://api.example.com/api/1");
    env::set_var("API_KEY", "secret");
    env::set_var("NUM_USERS", "40");
    env::set_var("TEST_DURATION", "2m");
    env::set_var("PACING_INTERVAL", "500ms");
    env::set_var("PERSONAS", "route:2,vrp");
    env::set_var("VRP_PROFILES", "car, small_truck");
    env::set_var("VRP_POLL_INTERVAL", "1s");
    env::set_var("VRP_MAX_POLLS", "50");
    env::set_var("DEBUG", "yes");
    env::set_var("RANDOM_SEED", "1234");

    let config = Config::from_env().unwrap();
    assert_eq!(config.api_key.as_deref(), Some("secret"));
    assert_eq!(config.users, 40);
    assert_eq!(config.spawn_rate, 40.0);
    assert_eq!(config.test_duration, Duration::from_secs(120));
    assert_eq!(config.pacing_interval, Duration::from_millis(500));
    let kinds: Vec<PersonaKind> = config.personas.personas().iter().map(|p| p.kind).collect();
    assert_eq!(kinds, vec![PersonaKind::Route, PersonaKind::Vrp]);
    assert_eq!(config.personas.total_weight(), 12.0);
    assert_eq!(
        config.vrp.profiles,
        vec!["car".to_string(), "small_truck".to_string()]
    );
    assert_eq!(config.vrp.poll_interval, Duration::from_secs(1));
    assert_eq!(config.vrp.max_polls, Some(50));
    assert!(config.debug_failures);
    assert_eq!(config.seed, Some(1234));

    clean_env();
}

#[test]
#[serial]
fn test_invalid_env_values_are_rejected() {
    clean_env();
    env::set_var("BASE_URL", "http://localhost:8989");

    env::set_var("NUM_USERS", "many");
    assert!(matches!(
        Config::from_env(),
        Err(ConfigError::InvalidValue { ref field, .. }) if field == "NUM_USERS"
    ));
    env::remove_var("NUM_USERS");

    env::set_var("PERSONAS", "route:0");
    assert!(matches!(
        Config::from_env(),
        Err(ConfigError::InvalidWeight { .. })
    ));

    env::set_var("PERSONAS", "teleport");
    assert!(matches!(
        Config::from_env(),
        Err(ConfigError::UnknownPersona(_))
    ));
    env::remove_var("PERSONAS");

    env::set_var("VRP_POLL_INTERVAL", "100ms");
    assert!(Config::from_env().is_err());
    env::remove_var("VRP_POLL_INTERVAL");

    env::set_var("VRP_TOMTOM_PROBABILITY", "2");
    assert!(Config::from_env().is_err());

    clean_env();
}

#[test]
#[serial]
fn test_yaml_file_with_env_override() {
    clean_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
baseUrl: "https://yaml.example.com"
users: 25
spawnRate: 5
duration: "10m"
pacing: 2
personas:
  - name: matrix
  - name: route_invalid
    weight: 4
vrp:
  maxLocations: 30
  trafficProbability: 0.5
"#
    )
    .unwrap();

    env::set_var("NUM_USERS", "8");
    env::set_var("VRP_MAX_LOCATIONS", "12");

    let yaml = YamlConfig::from_file(file.path()).unwrap();
    let config = Config::from_yaml_with_env_overrides(&yaml).unwrap();

    assert_eq!(config.base_url, "https://yaml.example.com");
    assert_eq!(config.users, 8);
    assert_eq!(config.spawn_rate, 5.0);
    assert_eq!(config.test_duration, Duration::from_secs(600));
    assert_eq!(config.pacing_interval, Duration::from_secs(2));
    assert_eq!(config.personas.total_weight(), 5.0);
    assert_eq!(config.vrp.max_locations, 12);
    assert_eq!(config.vrp.traffic_probability, 0.5);

    clean_env();
}

#[test]
#[serial]
fn test_missing_yaml_file_is_a_config_error() {
    clean_env();
    let result = YamlConfig::from_file("/nonexistent/geo_loadtest.yaml");
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}
