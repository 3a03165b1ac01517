use std::env;
use std::str::FromStr;
use thiserror::Error;
use tokio::time::Duration;
use tracing::error;

use crate::actor::ActorDescriptor;
use crate::client::ClientConfig;
use crate::config_validation::{RangeValidator, UrlValidator, MAX_VUS_LIMIT};
use crate::load_models::{parse_stages, LoadModel};
use crate::scenario::ThinkTime;
use crate::thresholds::{default_thresholds, Threshold};
use crate::utils::{parse_bool_flag, parse_duration_string};
use crate::walker::DEFAULT_MAX_PAGES;
use crate::yaml_config::{YamlConfig, YamlConfigError};

pub const DEFAULT_MAX_VUS: usize = 100;
pub const DEFAULT_TIME_UNIT: Duration = Duration::from_secs(30);
pub const DEFAULT_RAMP_STAGES: &str = "200:120s,20:10s";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);
pub const DEFAULT_SETUP_HOST_SUFFIX: &str = ".local";
pub const DEFAULT_METRICS_PORT: u16 = 9090;

/// Errors that can occur while assembling the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("TEST_HOST environment variable (or config.baseUrl in CONFIG_FILE) must be set")]
    MissingBaseUrl,

    #[error("Invalid {var} value '{value}': {message}")]
    InvalidValue {
        var: String,
        value: String,
        message: String,
    },

    #[error(transparent)]
    Yaml(#[from] YamlConfigError),
}

impl ConfigError {
    fn invalid(var: &str, value: &str, message: impl ToString) -> Self {
        ConfigError::InvalidValue {
            var: var.to_string(),
            value: value.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'text' or 'json', got '{}'", other)),
        }
    }
}

/// Main configuration for the load test.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub actors: Vec<ActorDescriptor>,
    pub load_model: LoadModel,
    pub max_vus: usize,
    pub request_timeout: Duration,
    pub max_pages: usize,
    pub sleep_time: Option<ThinkTime>,
    pub graceful_stop: Duration,
    pub setup_host_suffix: String,
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub custom_headers: Option<String>,
    pub metrics_port: u16,
    pub thresholds: Vec<Threshold>,
}

/// Reads an optional env var, treating an empty value as unset.
fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    env_var(name)
        .map(|v| v.trim().parse::<T>().map_err(|e| ConfigError::invalid(name, &v, e)))
        .transpose()
}

fn env_duration(name: &str) -> Result<Option<Duration>, ConfigError> {
    env_var(name)
        .map(|v| parse_duration_string(&v).map_err(|e| ConfigError::invalid(name, &v, e)))
        .transpose()
}

fn yaml_duration(
    value: &Option<crate::yaml_config::YamlDuration>,
) -> Result<Option<Duration>, ConfigError> {
    Ok(value.as_ref().map(|d| d.to_std_duration()).transpose()?)
}

impl Config {
    /// Loads configuration from `CONFIG_FILE` when set, else from the
    /// environment alone.
    pub fn load() -> Result<Self, ConfigError> {
        match env_var("CONFIG_FILE") {
            Some(path) => {
                let yaml = YamlConfig::from_file(&path)?;
                Self::from_yaml_with_env_overrides(&yaml)
            }
            None => Self::from_env(),
        }
    }

    /// Loads configuration from environment variables and defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::build(None)
    }

    /// Builds configuration from a YAML plan; environment variables override
    /// individual values (env > YAML > defaults).
    pub fn from_yaml_with_env_overrides(yaml: &YamlConfig) -> Result<Self, ConfigError> {
        Self::build(Some(yaml))
    }

    fn build(yaml: Option<&YamlConfig>) -> Result<Self, ConfigError> {
        let yaml_global = yaml.map(|y| y.config.clone()).unwrap_or_default();

        let base_url = env_var("TEST_HOST")
            .or(yaml_global.base_url.clone())
            .ok_or(ConfigError::MissingBaseUrl)?;
        UrlValidator::validate(&base_url)
            .map_err(|e| ConfigError::invalid("TEST_HOST", &base_url, e))?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let load_model = Self::parse_load_model(yaml)?;

        let max_vus = env_parse::<usize>("MAX_VUS")?
            .or(yaml_global.max_vus)
            .unwrap_or(DEFAULT_MAX_VUS);
        RangeValidator::validate_u64(max_vus as u64, 1, MAX_VUS_LIMIT, "MAX_VUS")
            .map_err(|e| ConfigError::invalid("MAX_VUS", &max_vus.to_string(), e))?;

        let request_timeout = match env_duration("REQUEST_TIMEOUT")? {
            Some(d) => d,
            None => yaml_duration(&yaml_global.timeout)?.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        };

        let max_pages = env_parse::<usize>("MAX_PAGES")?
            .or(yaml_global.max_pages)
            .unwrap_or(DEFAULT_MAX_PAGES);
        if max_pages == 0 {
            return Err(ConfigError::invalid("MAX_PAGES", "0", "must be at least 1"));
        }

        let sleep_time = match env_var("SLEEP_TIME") {
            Some(v) => Some(ThinkTime::parse(&v).map_err(|e| ConfigError::invalid("SLEEP_TIME", &v, e))?),
            None => yaml_global
                .sleep_time
                .as_ref()
                .map(|t| t.to_think_time())
                .transpose()?,
        };

        let graceful_stop = match env_duration("GRACEFUL_STOP")? {
            Some(d) => d,
            None => yaml_duration(&yaml_global.graceful_stop)?.unwrap_or(DEFAULT_GRACEFUL_STOP),
        };

        let setup_host_suffix = env_var("SETUP_HOST_SUFFIX")
            .or(yaml_global.setup_host_suffix.clone())
            .unwrap_or_else(|| DEFAULT_SETUP_HOST_SUFFIX.to_string());

        let skip_tls_verify = env_var("SKIP_TLS_VERIFY")
            .map(|v| parse_bool_flag(&v))
            .or(yaml_global.skip_tls_verify)
            .unwrap_or(false);

        let resolve_target_addr = env_var("RESOLVE_TARGET_ADDR");
        let custom_headers = env_var("CUSTOM_HEADERS").or(yaml_global.custom_headers.clone());

        let metrics_port = env_parse::<u16>("METRICS_PORT")?.unwrap_or(DEFAULT_METRICS_PORT);

        let actors = Self::resolve_actors(yaml, &base_url);

        let thresholds = match yaml {
            Some(y) if !y.thresholds.is_empty() => y.to_thresholds()?,
            _ => default_thresholds(),
        };

        Ok(Config {
            base_url,
            actors,
            load_model,
            max_vus,
            request_timeout,
            max_pages,
            sleep_time,
            graceful_stop,
            setup_host_suffix,
            skip_tls_verify,
            resolve_target_addr,
            custom_headers,
            metrics_port,
            thresholds,
        })
    }

    /// Ramp from START_RATE / TIME_UNIT / RAMP_STAGES, falling back to the
    /// YAML `load` section (ramp or constant rate) and then the defaults.
    fn parse_load_model(yaml: Option<&YamlConfig>) -> Result<LoadModel, ConfigError> {
        let yaml_load = yaml.and_then(|y| y.load.as_ref());

        let start_rate = match env_parse::<f64>("START_RATE")? {
            Some(rate) if !rate.is_finite() || rate < 0.0 => {
                return Err(ConfigError::invalid("START_RATE", &rate.to_string(), "must be >= 0"));
            }
            Some(rate) => rate,
            None => yaml_load.map(|l| l.start_rate).unwrap_or(0.0),
        };

        let time_unit = match env_duration("TIME_UNIT")? {
            Some(d) => d,
            None => match yaml_load.and_then(|l| l.time_unit.as_ref()) {
                Some(d) => d.to_std_duration()?,
                None => DEFAULT_TIME_UNIT,
            },
        };
        if time_unit.is_zero() {
            return Err(ConfigError::invalid("TIME_UNIT", "0", "must be greater than zero"));
        }

        // A constant-rate plan applies unless the ramp is overridden from env.
        if let Some(load) = yaml_load {
            if load.is_constant() && env_var("START_RATE").is_none() && env_var("RAMP_STAGES").is_none() {
                return Ok(load.to_load_model(time_unit)?);
            }
        }

        let stages = match env_var("RAMP_STAGES") {
            Some(v) => parse_stages(&v).map_err(|e| ConfigError::invalid("RAMP_STAGES", &v, e))?,
            None => match yaml_load {
                Some(load) if !load.stages.is_empty() => load.to_stages()?,
                _ => parse_stages(DEFAULT_RAMP_STAGES)
                    .map_err(|e| ConfigError::invalid("RAMP_STAGES", DEFAULT_RAMP_STAGES, e))?,
            },
        };

        Ok(LoadModel::RampingArrivalRate {
            start_rate,
            time_unit,
            stages,
        })
    }

    /// YAML actors (relative ids resolved against the base URL), or the
    /// service actor at the base URL root.
    fn resolve_actors(yaml: Option<&YamlConfig>, base_url: &str) -> Vec<ActorDescriptor> {
        let configured = yaml.map(|y| y.actors.clone()).unwrap_or_default();
        if configured.is_empty() {
            return vec![ActorDescriptor::service_root(base_url)];
        }

        configured
            .into_iter()
            .map(|mut actor| {
                if actor.id.is_none() {
                    error!(name = ?actor.name, "Configured actor has no \"id\"; it will be skipped");
                }
                actor.resolve_against(base_url);
                actor
            })
            .collect()
    }

    /// Creates a ClientConfig from this Config.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: self.request_timeout,
            skip_tls_verify: self.skip_tls_verify,
            resolve_target_addr: self.resolve_target_addr.clone(),
            custom_headers: self.custom_headers.clone(),
        }
    }

    /// Log format from LOG_FORMAT. Read separately so logging can be set up
    /// before the rest of the configuration is parsed.
    pub fn log_format_from_env() -> LogFormat {
        env_var("LOG_FORMAT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(LogFormat::Text)
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self, parsed_headers: &reqwest::header::HeaderMap) {
        println!("Starting ActivityPub load test:");
        println!("  Base URL: {}", self.base_url);
        println!("  Load Model: {:?}", self.load_model);
        println!("  Total Duration: {:?}", self.load_model.total_duration());
        println!("  Max VUs: {}", self.max_vus);
        println!("  Request Timeout: {:?}", self.request_timeout);
        println!("  Max Pages per Collection: {}", self.max_pages);
        println!("  Sleep Time: {:?}", self.sleep_time);
        println!("  Graceful Stop: {:?}", self.graceful_stop);
        println!("  Skip TLS Verify: {}", self.skip_tls_verify);
        println!("  Actors:");
        for actor in &self.actors {
            println!(
                "    {} ({})",
                actor.id.as_deref().unwrap_or("<missing id>"),
                actor.kind.as_deref().unwrap_or("any type")
            );
        }
        println!("  Thresholds:");
        for threshold in &self.thresholds {
            println!(
                "    {}: {}{}",
                threshold.metric,
                threshold.source,
                if threshold.abort_on_fail { " (abortOnFail)" } else { "" }
            );
        }
        println!("  Request Headers:");
        for (name, value) in parsed_headers.iter() {
            println!(
                "    {}: {}",
                name,
                value.to_str().unwrap_or("<non-ASCII or sensitive value>")
            );
        }
    }
}

/// Printed when configuration fails to load.
pub fn print_config_help() {
    eprintln!("Required environment variables:");
    eprintln!("  TEST_HOST              Base URL of the ActivityPub service (e.g. http://fedbox.local)");
    eprintln!("                         (or config.baseUrl in the YAML file)");
    eprintln!();
    eprintln!("Optional environment variables:");
    eprintln!("  CONFIG_FILE            YAML test plan (actors, load, thresholds)");
    eprintln!("  MAX_VUS                Maximum concurrent virtual users (default: {})", DEFAULT_MAX_VUS);
    eprintln!("  START_RATE             Starting iteration rate (default: 0)");
    eprintln!("  TIME_UNIT              Rate time unit (default: 30s)");
    eprintln!("  RAMP_STAGES            target:duration list (default: {})", DEFAULT_RAMP_STAGES);
    eprintln!("  SLEEP_TIME             End-of-iteration pause, '2s' or '1s-3s' (default: none)");
    eprintln!("  REQUEST_TIMEOUT        Per-request timeout (default: 30s)");
    eprintln!("  MAX_PAGES              Page cap per collection (default: {})", DEFAULT_MAX_PAGES);
    eprintln!("  GRACEFUL_STOP          Wait for in-flight iterations (default: 30s)");
    eprintln!("  SETUP_HOST_SUFFIX      Host suffix that enables setup (default: {})", DEFAULT_SETUP_HOST_SUFFIX);
    eprintln!("  SKIP_TLS_VERIFY        Accept invalid certificates (default: false)");
    eprintln!("  RESOLVE_TARGET_ADDR    DNS override, 'hostname:ip:port'");
    eprintln!("  CUSTOM_HEADERS         'Name:Value' list, '\\,' escapes a comma");
    eprintln!("  METRICS_PORT           Prometheus port, 0 disables (default: {})", DEFAULT_METRICS_PORT);
    eprintln!("  METRIC_NAMESPACE       Prometheus namespace (default: activitypub_loadtest)");
    eprintln!("  LOG_FORMAT             'text' or 'json' (default: text)");
    eprintln!("  RUST_LOG               Log filter (default: info)");
    eprintln!();
    eprintln!("Duration format: 10ms, 30s, 5m, 2h, 1d");
}
