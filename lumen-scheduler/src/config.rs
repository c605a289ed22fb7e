use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SchedulerKind {
    #[serde(rename = "EulerDiscreteScheduler")]
    EulerDiscrete,
    #[serde(rename = "HeunDiscreteScheduler")]
    HeunDiscrete,
    #[serde(rename = "DDIMScheduler")]
    Ddim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaSchedule {
    Linear,
    ScaledLinear,
}

/// How inference timesteps are spread over the training range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestepSpacing {
    Leading,
    Linspace,
    Trailing,
}

/// Scheduler configuration, deserializable from a diffusers-style
/// `scheduler_config.json`. Defaults describe SDXL base 1.0.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchedulerConfig {
    #[serde(rename = "_class_name", default = "default_kind")]
    pub kind: SchedulerKind,
    #[serde(default = "default_num_train_timesteps")]
    pub num_train_timesteps: usize,
    #[serde(default = "default_beta_start")]
    pub beta_start: f64,
    #[serde(default = "default_beta_end")]
    pub beta_end: f64,
    #[serde(default = "default_beta_schedule")]
    pub beta_schedule: BetaSchedule,
    #[serde(default = "default_timestep_spacing")]
    pub timestep_spacing: TimestepSpacing,
    #[serde(default = "default_steps_offset")]
    pub steps_offset: usize,
    #[serde(default = "default_prediction_type")]
    pub prediction_type: String,
    /// DDIM only: use alpha 1.0 instead of the first cumulative alpha past
    /// the end of the schedule.
    #[serde(default)]
    pub set_alpha_to_one: bool,
}

fn default_kind() -> SchedulerKind {
    SchedulerKind::EulerDiscrete
}

fn default_num_train_timesteps() -> usize {
    1000
}

fn default_beta_start() -> f64 {
    0.00085
}

fn default_beta_end() -> f64 {
    0.012
}

fn default_beta_schedule() -> BetaSchedule {
    BetaSchedule::ScaledLinear
}

fn default_timestep_spacing() -> TimestepSpacing {
    TimestepSpacing::Leading
}

fn default_steps_offset() -> usize {
    1
}

fn default_prediction_type() -> String {
    "epsilon".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            num_train_timesteps: default_num_train_timesteps(),
            beta_start: default_beta_start(),
            beta_end: default_beta_end(),
            beta_schedule: default_beta_schedule(),
            timestep_spacing: default_timestep_spacing(),
            steps_offset: default_steps_offset(),
            prediction_type: default_prediction_type(),
            set_alpha_to_one: false,
        }
    }
}

impl SchedulerConfig {
    pub fn with_kind(kind: SchedulerKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }
}
