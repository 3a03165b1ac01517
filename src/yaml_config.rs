//! YAML test plan support.
//!
//! A YAML file (`CONFIG_FILE`) describes the target, the ramp, the actors to
//! walk and the thresholds to enforce. Environment variables still override
//! individual values; see [`crate::config::Config::from_yaml_with_env_overrides`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration as StdDuration;
use thiserror::Error;

use crate::actor::ActorDescriptor;
use crate::config_validation::{
    ActorValidator, RangeValidator, StageValidator, UrlValidator, ValidationContext,
    MAX_VUS_LIMIT,
};
use crate::load_models::{LoadModel, Stage};
use crate::scenario::ThinkTime;
use crate::thresholds::{Threshold, ThresholdError};

/// Schema versions this build understands.
pub const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

/// Errors that can occur when loading or parsing YAML configuration.
#[derive(Error, Debug)]
pub enum YamlConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Invalid threshold for '{metric}': {source}")]
    Threshold {
        metric: String,
        #[source]
        source: ThresholdError,
    },
}

/// Duration format for YAML (e.g., "30s", "5m", or a bare number of seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YamlDuration {
    Seconds(u64),
    String(String),
}

impl YamlDuration {
    pub fn to_std_duration(&self) -> Result<StdDuration, YamlConfigError> {
        match self {
            YamlDuration::Seconds(s) => Ok(StdDuration::from_secs(*s)),
            YamlDuration::String(s) => crate::utils::parse_duration_string(s)
                .map_err(|e| YamlConfigError::Validation(format!("Invalid duration '{}': {}", s, e))),
        }
    }
}

/// Metadata about the test plan.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct YamlMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Global configuration settings. Every field is optional so a plan can
/// carry only actors or thresholds and take the rest from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct YamlGlobalConfig {
    pub base_url: Option<String>,
    pub timeout: Option<YamlDuration>,
    #[serde(rename = "maxVUs")]
    pub max_vus: Option<usize>,
    pub max_pages: Option<usize>,
    pub sleep_time: Option<YamlThinkTime>,
    pub graceful_stop: Option<YamlDuration>,
    pub skip_tls_verify: Option<bool>,
    pub custom_headers: Option<String>,
    pub setup_host_suffix: Option<String>,
}

/// End-of-iteration pause in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YamlThinkTime {
    /// Random pause with min/max range
    Random { min: YamlDuration, max: YamlDuration },

    /// Fixed pause (e.g. "3s") or a "1s-3s" range string
    Fixed(YamlDuration),
}

impl YamlThinkTime {
    pub fn to_think_time(&self) -> Result<ThinkTime, YamlConfigError> {
        match self {
            YamlThinkTime::Fixed(YamlDuration::String(s)) => {
                ThinkTime::parse(s).map_err(YamlConfigError::Validation)
            }
            YamlThinkTime::Fixed(duration) => Ok(ThinkTime::Fixed(duration.to_std_duration()?)),
            YamlThinkTime::Random { min, max } => Ok(ThinkTime::Random {
                min: min.to_std_duration()?,
                max: max.to_std_duration()?,
            }),
        }
    }
}

/// One ramp stage in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlStage {
    pub target: f64,
    pub duration: YamlDuration,
}

/// Arrival-rate schedule in YAML.
///
/// `rate` + `duration` selects a constant rate; otherwise `startRate` and
/// `stages` describe a ramp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlLoad {
    #[serde(default)]
    pub start_rate: f64,
    pub time_unit: Option<YamlDuration>,
    #[serde(default)]
    pub stages: Vec<YamlStage>,
    pub rate: Option<f64>,
    pub duration: Option<YamlDuration>,
}

impl YamlLoad {
    pub fn to_stages(&self) -> Result<Vec<Stage>, YamlConfigError> {
        self.stages
            .iter()
            .map(|s| {
                Ok(Stage {
                    target: s.target,
                    duration: s.duration.to_std_duration()?,
                })
            })
            .collect()
    }

    pub fn is_constant(&self) -> bool {
        self.rate.is_some()
    }

    /// Builds the load model, with `default_time_unit` when `timeUnit` is absent.
    pub fn to_load_model(&self, default_time_unit: StdDuration) -> Result<LoadModel, YamlConfigError> {
        let time_unit = match &self.time_unit {
            Some(d) => d.to_std_duration()?,
            None => default_time_unit,
        };

        if let Some(rate) = self.rate {
            let duration = self
                .duration
                .as_ref()
                .ok_or_else(|| YamlConfigError::Validation("load.duration is required with load.rate".to_string()))?
                .to_std_duration()?;
            return Ok(LoadModel::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
            });
        }

        Ok(LoadModel::RampingArrivalRate {
            start_rate: self.start_rate,
            time_unit,
            stages: self.to_stages()?,
        })
    }
}

/// A threshold entry: a bare expression or the long form with abort options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YamlThreshold {
    Expression(String),
    Detailed {
        threshold: String,
        #[serde(rename = "abortOnFail", default)]
        abort_on_fail: bool,
        #[serde(rename = "delayAbortEval")]
        delay_abort_eval: Option<YamlDuration>,
    },
}

/// Root YAML configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlConfig {
    pub version: String,

    #[serde(default)]
    pub metadata: YamlMetadata,

    #[serde(default)]
    pub config: YamlGlobalConfig,

    pub load: Option<YamlLoad>,

    #[serde(default)]
    pub actors: Vec<ActorDescriptor>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<YamlThreshold>>,
}

impl YamlConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, YamlConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, YamlConfigError> {
        let config: YamlConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), YamlConfigError> {
        let mut ctx = ValidationContext::new();

        ctx.enter("version");
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            ctx.field_error(format!(
                "Unsupported version '{}'. Supported: {}",
                self.version,
                SUPPORTED_VERSIONS.join(", ")
            ));
        }
        ctx.exit();

        ctx.enter("config");
        if let Some(base_url) = &self.config.base_url {
            ctx.check("baseUrl", || UrlValidator::validate(base_url));
        }
        if let Some(max_vus) = self.config.max_vus {
            ctx.check("maxVUs", || {
                RangeValidator::validate_u64(max_vus as u64, 1, MAX_VUS_LIMIT, "maxVUs")
            });
        }
        if let Some(max_pages) = self.config.max_pages {
            ctx.check("maxPages", || {
                RangeValidator::validate_u64(max_pages as u64, 1, u32::MAX as u64, "maxPages")
            });
        }
        for (field, duration) in [
            ("timeout", &self.config.timeout),
            ("gracefulStop", &self.config.graceful_stop),
        ] {
            if let Some(d) = duration {
                ctx.enter(field);
                if let Err(e) = d.to_std_duration() {
                    ctx.field_error(e.to_string());
                }
                ctx.exit();
            }
        }
        if let Some(sleep_time) = &self.config.sleep_time {
            ctx.enter("sleepTime");
            if let Err(e) = sleep_time.to_think_time() {
                ctx.field_error(e.to_string());
            }
            ctx.exit();
        }
        ctx.exit(); // config

        if let Some(load) = &self.load {
            ctx.enter("load");
            ctx.check("startRate", || {
                RangeValidator::validate_non_negative_f64(load.start_rate, "startRate")
            });
            if let Some(time_unit) = &load.time_unit {
                ctx.enter("timeUnit");
                match time_unit.to_std_duration() {
                    Ok(d) if d.is_zero() => ctx.field_error("timeUnit must be greater than zero".to_string()),
                    Ok(_) => {}
                    Err(e) => ctx.field_error(e.to_string()),
                }
                ctx.exit();
            }
            if let Some(rate) = load.rate {
                ctx.check("rate", || RangeValidator::validate_non_negative_f64(rate, "rate"));
                ctx.enter("duration");
                match load.duration.as_ref().map(|d| d.to_std_duration()) {
                    Some(Ok(d)) if d.is_zero() => ctx.field_error("duration must be greater than zero".to_string()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => ctx.field_error(e.to_string()),
                    None => ctx.field_error("duration is required with rate".to_string()),
                }
                ctx.exit();
            } else {
                ctx.enter("stages");
                match load.to_stages() {
                    Ok(stages) => {
                        if let Err(e) = StageValidator::validate(&stages) {
                            ctx.field_error(e.to_string());
                        }
                    }
                    Err(e) => ctx.field_error(e.to_string()),
                }
                ctx.exit();
            }
            ctx.exit(); // load
        }

        // A missing id is reported at load time and skipped during the run.
        ctx.enter("actors");
        for (idx, actor) in self.actors.iter().enumerate() {
            if actor.id.is_some() {
                ctx.check(&format!("[{}]", idx), || ActorValidator::validate(actor));
            }
        }
        ctx.exit();

        ctx.enter("thresholds");
        if let Err(e) = self.to_thresholds() {
            ctx.field_error(e.to_string());
        }
        ctx.exit();

        ctx.into_result()
            .map_err(|e| YamlConfigError::Validation(e.to_string()))
    }

    /// Converts the `thresholds` map into parsed thresholds.
    pub fn to_thresholds(&self) -> Result<Vec<Threshold>, YamlConfigError> {
        let mut thresholds = Vec::new();
        for (metric, entries) in &self.thresholds {
            for entry in entries {
                let (expression, abort_on_fail, delay) = match entry {
                    YamlThreshold::Expression(e) => (e.as_str(), false, StdDuration::ZERO),
                    YamlThreshold::Detailed {
                        threshold,
                        abort_on_fail,
                        delay_abort_eval,
                    } => {
                        let delay = match delay_abort_eval {
                            Some(d) => d.to_std_duration()?,
                            None => StdDuration::ZERO,
                        };
                        (threshold.as_str(), *abort_on_fail, delay)
                    }
                };
                let parsed = Threshold::parse(metric, expression, abort_on_fail, delay).map_err(
                    |source| YamlConfigError::Threshold {
                        metric: metric.clone(),
                        source,
                    },
                )?;
                thresholds.push(parsed);
            }
        }
        Ok(thresholds)
    }
}
