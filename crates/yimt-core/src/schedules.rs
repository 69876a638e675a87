//! Learning rate schedules.
//!
//! Schedules are looked up by name in a static table. The table also
//! records the name of each schedule's first parameter, which is filled
//! with the optimizer's initial learning rate when the configuration leaves
//! it out.

use std::f64::consts::PI;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{YimtError, YimtResult};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoamDecay {
    pub scale: f64,
    pub model_dim: f64,
    pub warmup_steps: f64,
}

impl NoamDecay {
    pub fn learning_rate(&self, step: u64) -> f64 {
        let step = step as f64 + 1.0;
        self.scale
            * self.model_dim.powf(-0.5)
            * step.powf(-0.5).min(step * self.warmup_steps.powf(-1.5))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RsqrtDecay {
    pub scale: f64,
    pub warmup_steps: f64,
}

impl RsqrtDecay {
    pub fn learning_rate(&self, step: u64) -> f64 {
        self.scale / (step as f64).max(self.warmup_steps).sqrt()
    }
}

/// Linear warmup from `initial_learning_rate` to `learning_rate`, then
/// inverse square root decay.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvSqrtDecay {
    pub learning_rate: f64,
    pub warmup_steps: f64,
    #[serde(default)]
    pub initial_learning_rate: f64,
}

impl InvSqrtDecay {
    pub fn learning_rate(&self, step: u64) -> f64 {
        let step = step as f64 + 1.0;
        if step <= self.warmup_steps {
            self.initial_learning_rate
                + (self.learning_rate - self.initial_learning_rate) * step / self.warmup_steps
        } else {
            self.learning_rate * (self.warmup_steps / step).sqrt()
        }
    }
}

fn default_max_step() -> u64 {
    1_000_000
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CosineAnnealing {
    pub eta_max: f64,
    #[serde(default)]
    pub eta_min: f64,
    #[serde(default = "default_max_step")]
    pub max_step: u64,
    #[serde(default)]
    pub warmup_steps: Option<u64>,
}

impl CosineAnnealing {
    pub fn learning_rate(&self, step: u64) -> f64 {
        if let Some(warmup_steps) = self.warmup_steps {
            if step < warmup_steps {
                return self.eta_max * step as f64 / warmup_steps as f64;
            }
        }
        let progress = step as f64 / self.max_step as f64;
        self.eta_min + 0.5 * (self.eta_max - self.eta_min) * (1.0 + (PI * progress).cos())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExponentialDecay {
    pub initial_learning_rate: f64,
    pub decay_steps: f64,
    pub decay_rate: f64,
    #[serde(default)]
    pub staircase: bool,
}

impl ExponentialDecay {
    pub fn learning_rate(&self, step: u64) -> f64 {
        let mut exponent = step as f64 / self.decay_steps;
        if self.staircase {
            exponent = exponent.floor();
        }
        self.initial_learning_rate * self.decay_rate.powf(exponent)
    }
}

/// `values[i]` applies while `step <= boundaries[i]`, the last value after
/// the last boundary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PiecewiseConstantDecay {
    pub boundaries: Vec<u64>,
    pub values: Vec<f64>,
}

impl PiecewiseConstantDecay {
    pub fn learning_rate(&self, step: u64) -> f64 {
        let index = self.boundaries.iter().take_while(|&&b| step > b).count();
        self.values[index.min(self.values.len() - 1)]
    }
}

fn default_end_learning_rate() -> f64 {
    0.0001
}

fn default_power() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolynomialDecay {
    pub initial_learning_rate: f64,
    pub decay_steps: f64,
    #[serde(default = "default_end_learning_rate")]
    pub end_learning_rate: f64,
    #[serde(default = "default_power")]
    pub power: f64,
}

impl PolynomialDecay {
    pub fn learning_rate(&self, step: u64) -> f64 {
        let step = (step as f64).min(self.decay_steps);
        (self.initial_learning_rate - self.end_learning_rate)
            * (1.0 - step / self.decay_steps).powf(self.power)
            + self.end_learning_rate
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LearningRateSchedule {
    Noam(NoamDecay),
    Rsqrt(RsqrtDecay),
    InvSqrt(InvSqrtDecay),
    CosineAnnealing(CosineAnnealing),
    Exponential(ExponentialDecay),
    PiecewiseConstant(PiecewiseConstantDecay),
    Polynomial(PolynomialDecay),
}

impl LearningRateSchedule {
    pub fn learning_rate(&self, step: u64) -> f64 {
        match self {
            LearningRateSchedule::Noam(s) => s.learning_rate(step),
            LearningRateSchedule::Rsqrt(s) => s.learning_rate(step),
            LearningRateSchedule::InvSqrt(s) => s.learning_rate(step),
            LearningRateSchedule::CosineAnnealing(s) => s.learning_rate(step),
            LearningRateSchedule::Exponential(s) => s.learning_rate(step),
            LearningRateSchedule::PiecewiseConstant(s) => s.learning_rate(step),
            LearningRateSchedule::Polynomial(s) => s.learning_rate(step),
        }
    }

    /// Builds a schedule from its registered name and parameters.
    pub fn from_name(name: &str, params: toml::Table) -> YimtResult<Self> {
        let entry = lookup(name)?;
        (entry.build)(params)
    }

    fn validate(self) -> YimtResult<Self> {
        let problem = match &self {
            LearningRateSchedule::PiecewiseConstant(s) if s.values.len() != s.boundaries.len() + 1 => {
                Some(format!(
                    "PiecewiseConstantDecay needs {} values for {} boundaries, got {}",
                    s.boundaries.len() + 1,
                    s.boundaries.len(),
                    s.values.len()
                ))
            }
            LearningRateSchedule::CosineAnnealing(s) if s.max_step == 0 => {
                Some("CosineAnnealing max_step must be positive".to_string())
            }
            _ => None,
        };
        match problem {
            Some(problem) => Err(YimtError::InvalidConfig(problem)),
            None => Ok(self),
        }
    }
}

struct ScheduleEntry {
    name: &'static str,
    /// Parameter receiving the initial learning rate when absent.
    first_param: Option<&'static str>,
    build: fn(toml::Table) -> YimtResult<LearningRateSchedule>,
}

fn parse_params<T: DeserializeOwned>(name: &str, params: toml::Table) -> YimtResult<T> {
    toml::Value::Table(params)
        .try_into()
        .map_err(|e| YimtError::InvalidConfig(format!("invalid parameters for {name}: {e}")))
}

const SCHEDULES: &[ScheduleEntry] = &[
    ScheduleEntry {
        name: "NoamDecay",
        first_param: Some("scale"),
        build: |p| Ok(LearningRateSchedule::Noam(parse_params("NoamDecay", p)?)),
    },
    ScheduleEntry {
        name: "RsqrtDecay",
        first_param: Some("scale"),
        build: |p| Ok(LearningRateSchedule::Rsqrt(parse_params("RsqrtDecay", p)?)),
    },
    ScheduleEntry {
        name: "InvSqrtDecay",
        first_param: Some("learning_rate"),
        build: |p| Ok(LearningRateSchedule::InvSqrt(parse_params("InvSqrtDecay", p)?)),
    },
    ScheduleEntry {
        name: "CosineAnnealing",
        first_param: Some("eta_max"),
        build: |p| {
            Ok(LearningRateSchedule::CosineAnnealing(parse_params(
                "CosineAnnealing",
                p,
            )?))
        },
    },
    ScheduleEntry {
        name: "ExponentialDecay",
        first_param: Some("initial_learning_rate"),
        build: |p| {
            Ok(LearningRateSchedule::Exponential(parse_params(
                "ExponentialDecay",
                p,
            )?))
        },
    },
    ScheduleEntry {
        name: "PiecewiseConstantDecay",
        first_param: None,
        build: |p| {
            Ok(LearningRateSchedule::PiecewiseConstant(parse_params(
                "PiecewiseConstantDecay",
                p,
            )?))
        },
    },
    ScheduleEntry {
        name: "PolynomialDecay",
        first_param: Some("initial_learning_rate"),
        build: |p| {
            Ok(LearningRateSchedule::Polynomial(parse_params(
                "PolynomialDecay",
                p,
            )?))
        },
    },
];

fn lookup(name: &str) -> YimtResult<&'static ScheduleEntry> {
    SCHEDULES.iter().find(|entry| entry.name == name).ok_or_else(|| {
        YimtError::InvalidConfig(format!(
            "unknown learning rate schedule {name}, expected one of: {}",
            schedule_names().join(", ")
        ))
    })
}

/// Names accepted by [`make_learning_rate_schedule`].
pub fn schedule_names() -> Vec<&'static str> {
    SCHEDULES.iter().map(|entry| entry.name).collect()
}

/// Wraps a schedule with a start offset, a step duration and a floor.
///
/// The wrapped schedule sees `max(step - start_step, 0) / step_duration`
/// and the result is never below `minimum_learning_rate`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleWrapper {
    schedule: LearningRateSchedule,
    step_start: u64,
    step_duration: u64,
    minimum_learning_rate: f64,
}

impl ScheduleWrapper {
    pub fn new(
        schedule: LearningRateSchedule,
        step_start: u64,
        step_duration: u64,
        minimum_learning_rate: f64,
    ) -> YimtResult<Self> {
        if step_duration == 0 {
            return Err(YimtError::InvalidConfig(
                "schedule step_duration must be positive".to_string(),
            ));
        }
        Ok(Self {
            schedule,
            step_start,
            step_duration,
            minimum_learning_rate,
        })
    }

    pub fn schedule(&self) -> &LearningRateSchedule {
        &self.schedule
    }

    pub fn learning_rate(&self, step: u64) -> f64 {
        let step = step.saturating_sub(self.step_start) / self.step_duration;
        self.schedule
            .learning_rate(step)
            .max(self.minimum_learning_rate)
    }
}

/// Builds a wrapped schedule from its name and parameters.
///
/// When the schedule's first parameter is missing from `schedule_params`,
/// it is set to `initial_learning_rate`.
pub fn make_learning_rate_schedule(
    initial_learning_rate: Option<f64>,
    schedule_type: &str,
    schedule_params: Option<toml::Table>,
    schedule_step_duration: u64,
    start_step: u64,
    minimum_learning_rate: f64,
) -> YimtResult<ScheduleWrapper> {
    let entry = lookup(schedule_type)?;
    let mut params = schedule_params.unwrap_or_default();
    if let (Some(first_param), Some(initial_learning_rate)) = (entry.first_param, initial_learning_rate) {
        params
            .entry(first_param)
            .or_insert(toml::Value::Float(initial_learning_rate));
    }
    let schedule = (entry.build)(params)?.validate()?;
    log::debug!("Built learning rate schedule {}: {:?}", entry.name, schedule);
    ScheduleWrapper::new(schedule, start_step, schedule_step_duration, minimum_learning_rate)
}

fn default_step_duration() -> u64 {
    1
}

/// `[schedule]` section of a run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(rename = "type")]
    pub schedule_type: String,
    #[serde(default)]
    pub initial_learning_rate: Option<f64>,
    #[serde(default)]
    pub params: toml::Table,
    #[serde(default = "default_step_duration")]
    pub step_duration: u64,
    #[serde(default)]
    pub start_step: u64,
    #[serde(default)]
    pub minimum_learning_rate: f64,
}

impl ScheduleConfig {
    pub fn build(&self) -> YimtResult<ScheduleWrapper> {
        make_learning_rate_schedule(
            self.initial_learning_rate,
            &self.schedule_type,
            Some(self.params.clone()),
            self.step_duration,
            self.start_step,
            self.minimum_learning_rate,
        )
    }
}
