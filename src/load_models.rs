use std::str::FromStr;
use tokio::time::Duration;

use crate::utils::parse_duration_string;

/// One step of a ramping arrival-rate schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Iterations per time unit reached at the end of the stage.
    pub target: f64,

    /// How long it takes to move from the previous rate to `target`.
    pub duration: Duration,
}

impl FromStr for Stage {
    type Err = String;

    /// Parses `target:duration`, e.g. `200:120s`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (target_str, duration_str) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("Invalid stage '{}'. Expected 'target:duration'", s.trim()))?;

        let target: f64 = target_str
            .trim()
            .parse()
            .map_err(|e| format!("Invalid stage target '{}': {}", target_str.trim(), e))?;
        if !target.is_finite() || target < 0.0 {
            return Err(format!("Stage target must be >= 0, got {}", target));
        }

        let duration = parse_duration_string(duration_str)?;
        Ok(Stage { target, duration })
    }
}

/// Parses a comma-separated stage list such as `200:120s,20:10s`.
pub fn parse_stages(s: &str) -> Result<Vec<Stage>, String> {
    let stages = s
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(Stage::from_str)
        .collect::<Result<Vec<_>, _>>()?;

    if stages.is_empty() {
        return Err("At least one ramp stage is required".to_string());
    }
    Ok(stages)
}

/// Arrival-rate schedules for starting scenario iterations.
///
/// Rates are expressed as iterations per `time_unit`, independent of how
/// many virtual users are busy.
#[derive(Debug, Clone)]
pub enum LoadModel {
    /// Fixed iteration rate for a fixed duration.
    ConstantArrivalRate {
        rate: f64,
        time_unit: Duration,
        duration: Duration,
    },

    /// Linear ramp through a list of stages.
    /// Starts at `start_rate` and interpolates linearly to each stage's
    /// target over that stage's duration.
    RampingArrivalRate {
        start_rate: f64,
        time_unit: Duration,
        stages: Vec<Stage>,
    },
}

impl LoadModel {
    /// Total length of the schedule.
    pub fn total_duration(&self) -> Duration {
        match self {
            LoadModel::ConstantArrivalRate { duration, .. } => *duration,
            LoadModel::RampingArrivalRate { stages, .. } => {
                stages.iter().map(|s| s.duration).sum()
            }
        }
    }

    /// Target iterations per `time_unit` at `elapsed_total_secs`.
    pub fn calculate_current_rate(&self, elapsed_total_secs: f64) -> f64 {
        match self {
            LoadModel::ConstantArrivalRate { rate, .. } => *rate,
            LoadModel::RampingArrivalRate {
                start_rate, stages, ..
            } => Self::calculate_ramp_rate(*start_rate, stages, elapsed_total_secs),
        }
    }

    /// Target iterations per second at `elapsed_total_secs`.
    pub fn calculate_current_rps(&self, elapsed_total_secs: f64) -> f64 {
        let unit_secs = self.time_unit().as_secs_f64();
        if unit_secs <= 0.0 {
            return 0.0;
        }
        self.calculate_current_rate(elapsed_total_secs) / unit_secs
    }

    pub fn time_unit(&self) -> Duration {
        match self {
            LoadModel::ConstantArrivalRate { time_unit, .. }
            | LoadModel::RampingArrivalRate { time_unit, .. } => *time_unit,
        }
    }

    fn calculate_ramp_rate(start_rate: f64, stages: &[Stage], elapsed_total_secs: f64) -> f64 {
        let mut from = start_rate;
        let mut stage_start = 0.0;

        for stage in stages {
            let stage_secs = stage.duration.as_secs_f64();
            let stage_end = stage_start + stage_secs;

            if elapsed_total_secs < stage_end {
                return Self::linear_interpolate(
                    from,
                    stage.target,
                    elapsed_total_secs - stage_start,
                    stage_secs,
                );
            }

            from = stage.target;
            stage_start = stage_end;
        }

        // Past the last stage: hold its target
        from
    }

    fn linear_interpolate(from: f64, to: f64, elapsed: f64, duration: f64) -> f64 {
        if duration <= 0.0 {
            return to;
        }
        from + (to - from) * (elapsed / duration)
    }
}
