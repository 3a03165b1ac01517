//! Configuration precedence tests: env > YAML > defaults.

use activitypub_loadtest::config::{Config, ConfigError};
use activitypub_loadtest::load_models::{LoadModel, Stage};
use activitypub_loadtest::scenario::ThinkTime;
use activitypub_loadtest::thresholds::MetricSelector;
use activitypub_loadtest::yaml_config::YamlConfig;
use serial_test::serial;
use std::env;
use std::io::Write;
use std::time::Duration;

/// Clear all env vars that could affect config parsing.
fn clean_env() {
    for var in [
        "TEST_HOST",
        "CONFIG_FILE",
        "MAX_VUS",
        "START_RATE",
        "TIME_UNIT",
        "RAMP_STAGES",
        "SLEEP_TIME",
        "REQUEST_TIMEOUT",
        "MAX_PAGES",
        "GRACEFUL_STOP",
        "SETUP_HOST_SUFFIX",
        "SKIP_TLS_VERIFY",
        "RESOLVE_TARGET_ADDR",
        "CUSTOM_HEADERS",
        "METRICS_PORT",
    ] {
        env::remove_var(var);
    }
}

const PLAN: &str = r#"
version: "1.0"
config:
  baseUrl: "https://yaml.example.com"
  maxVUs: 50
  timeout: "60s"
  maxPages: 25
  skipTlsVerify: true
load:
  startRate: 2
  timeUnit: "1m"
  stages:
    - target: 60
      duration: "5m"
actors:
  - id: /actors/admin
    type: Person
thresholds:
  checks:
    - "rate > 0.95"
"#;

#[test]
#[serial]
fn test_defaults_from_env_only() {
    clean_env();
    env::set_var("TEST_HOST", "http://fedbox.local/");

    let config = Config::from_env().unwrap();

    assert_eq!(config.base_url, "http://fedbox.local");
    assert_eq!(config.max_vus, 100);
    assert_eq!(config.max_pages, 1000);
    assert_eq!(config.request_timeout, Duration::from_secs(30));
    assert_eq!(config.graceful_stop, Duration::from_secs(30));
    assert_eq!(config.setup_host_suffix, ".local");
    assert_eq!(config.metrics_port, 9090);
    assert!(config.sleep_time.is_none());
    assert!(!config.skip_tls_verify);

    match &config.load_model {
        LoadModel::RampingArrivalRate {
            start_rate,
            time_unit,
            stages,
        } => {
            assert_eq!(*start_rate, 0.0);
            assert_eq!(*time_unit, Duration::from_secs(30));
            assert_eq!(
                stages,
                &vec![
                    Stage {
                        target: 200.0,
                        duration: Duration::from_secs(120)
                    },
                    Stage {
                        target: 20.0,
                        duration: Duration::from_secs(10)
                    },
                ]
            );
        }
        other => panic!("unexpected load model {:?}", other),
    }

    assert_eq!(config.actors.len(), 1);
    assert_eq!(config.actors[0].id.as_deref(), Some("http://fedbox.local/"));
    assert_eq!(config.actors[0].kind.as_deref(), Some("Service"));

    assert_eq!(config.thresholds.len(), 6);
    clean_env();
}

#[test]
#[serial]
fn test_missing_test_host() {
    clean_env();
    assert!(matches!(Config::from_env(), Err(ConfigError::MissingBaseUrl)));
}

#[test]
#[serial]
fn test_env_values_are_parsed() {
    clean_env();
    env::set_var("TEST_HOST", "https://social.example");
    env::set_var("MAX_VUS", "7");
    env::set_var("START_RATE", "3");
    env::set_var("TIME_UNIT", "1s");
    env::set_var("RAMP_STAGES", "10:5s");
    env::set_var("SLEEP_TIME", "1s-3s");
    env::set_var("MAX_PAGES", "12");
    env::set_var("METRICS_PORT", "0");
    env::set_var("SKIP_TLS_VERIFY", "true");

    let config = Config::from_env().unwrap();
    assert_eq!(config.max_vus, 7);
    assert_eq!(config.max_pages, 12);
    assert_eq!(config.metrics_port, 0);
    assert!(config.skip_tls_verify);
    assert_eq!(config.load_model.total_duration(), Duration::from_secs(5));
    assert_eq!(config.load_model.time_unit(), Duration::from_secs(1));
    assert_eq!(config.load_model.calculate_current_rate(0.0), 3.0);
    assert_eq!(
        config.sleep_time,
        Some(ThinkTime::Random {
            min: Duration::from_secs(1),
            max: Duration::from_secs(3)
        })
    );
    clean_env();
}

#[test]
#[serial]
fn test_invalid_env_values_are_errors() {
    for (var, value) in [
        ("MAX_VUS", "lots"),
        ("MAX_VUS", "0"),
        ("MAX_VUS", "100001"),
        ("MAX_VUS", "18446744073709551615"),
        ("RAMP_STAGES", "200"),
        ("TIME_UNIT", "soon"),
        ("START_RATE", "-1"),
        ("SLEEP_TIME", "1x"),
        ("TEST_HOST", "fedbox.local"),
    ] {
        clean_env();
        env::set_var("TEST_HOST", "http://fedbox.local");
        env::set_var(var, value);
        let result = Config::from_env();
        assert!(
            matches!(result, Err(ConfigError::InvalidValue { .. })),
            "{}={} should be rejected",
            var,
            value
        );
    }
    clean_env();
}

#[test]
#[serial]
fn test_no_env_override_uses_yaml_values() {
    clean_env();
    let yaml = YamlConfig::from_str(PLAN).unwrap();
    let config = Config::from_yaml_with_env_overrides(&yaml).unwrap();

    assert_eq!(config.base_url, "https://yaml.example.com");
    assert_eq!(config.max_vus, 50);
    assert_eq!(config.max_pages, 25);
    assert_eq!(config.request_timeout, Duration::from_secs(60));
    assert!(config.skip_tls_verify);
    assert_eq!(config.load_model.time_unit(), Duration::from_secs(60));
    assert_eq!(config.load_model.total_duration(), Duration::from_secs(300));

    assert_eq!(
        config.actors[0].id.as_deref(),
        Some("https://yaml.example.com/actors/admin")
    );
    assert_eq!(config.thresholds.len(), 1);
    assert_eq!(config.thresholds[0].metric, MetricSelector::Checks);
}

#[test]
#[serial]
fn test_env_overrides_yaml() {
    clean_env();
    env::set_var("TEST_HOST", "https://env.example.com");
    env::set_var("MAX_VUS", "5");
    env::set_var("RAMP_STAGES", "1:1s");
    env::set_var("SKIP_TLS_VERIFY", "false");

    let yaml = YamlConfig::from_str(PLAN).unwrap();
    let config = Config::from_yaml_with_env_overrides(&yaml).unwrap();

    assert_eq!(config.base_url, "https://env.example.com");
    assert_eq!(config.max_vus, 5);
    assert!(!config.skip_tls_verify);
    assert_eq!(config.load_model.total_duration(), Duration::from_secs(1));
    // Untouched YAML values still apply
    assert_eq!(config.load_model.time_unit(), Duration::from_secs(60));
    assert_eq!(config.max_pages, 25);
    // Actors resolve against the effective base URL
    assert_eq!(
        config.actors[0].id.as_deref(),
        Some("https://env.example.com/actors/admin")
    );
    clean_env();
}

#[test]
#[serial]
fn test_load_reads_config_file() {
    clean_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(PLAN.as_bytes()).unwrap();
    env::set_var("CONFIG_FILE", file.path());

    let config = Config::load().unwrap();
    assert_eq!(config.base_url, "https://yaml.example.com");
    clean_env();
}

#[test]
#[serial]
fn test_load_reports_bad_config_file() {
    clean_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"version: \"1.0\"\nconfig:\n  maxVUs: 0\n").unwrap();
    env::set_var("CONFIG_FILE", file.path());

    let err = Config::load().unwrap_err();
    assert!(matches!(err, ConfigError::Yaml(_)));
    assert!(err.to_string().contains("maxVUs"));
    clean_env();
}
