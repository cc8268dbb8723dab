use thiserror::Error;

pub const MIN_TTL_DAYS: u32 = 1;
pub const MAX_TTL_DAYS: u32 = 365;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Lifetime requested for hosted anchors.
    pub host_ttl_days: u32,
    /// Poll ticks after which a still-pending operation is reported as stalled.
    /// Also the minimum gap between repeated stall warnings for one operation.
    pub stall_warning_ticks: u64,
    /// Single-slot flow: park a successful resolve in `Resolved` instead of
    /// returning to `None`.
    pub retain_resolved_mode: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be an integer, got '{value}'")]
    NotANumber { var: &'static str, value: String },
    #[error("{var} must be a boolean, got '{value}'")]
    NotABool { var: &'static str, value: String },
    #[error("host ttl must be between 1 and 365 days, got {0}")]
    TtlOutOfRange(u32),
    #[error("stall warning threshold must be at least one tick")]
    ZeroStallThreshold,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            host_ttl_days: 1,
            stall_warning_ticks: 600,
            retain_resolved_mode: false,
        }
    }
}

impl ManagerConfig {
    /// Reads `ANCHOR_HOST_TTL_DAYS`, `ANCHOR_STALL_WARNING_TICKS` and
    /// `ANCHOR_RETAIN_RESOLVED_MODE`; unset or blank variables keep defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ManagerConfig::default();
        let config = ManagerConfig {
            host_ttl_days: parse_number("ANCHOR_HOST_TTL_DAYS")?.unwrap_or(defaults.host_ttl_days),
            stall_warning_ticks: parse_number("ANCHOR_STALL_WARNING_TICKS")?
                .unwrap_or(defaults.stall_warning_ticks),
            retain_resolved_mode: parse_bool("ANCHOR_RETAIN_RESOLVED_MODE")?
                .unwrap_or(defaults.retain_resolved_mode),
        };
        config.validate()
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if !(MIN_TTL_DAYS..=MAX_TTL_DAYS).contains(&self.host_ttl_days) {
            return Err(ConfigError::TtlOutOfRange(self.host_ttl_days));
        }
        if self.stall_warning_ticks == 0 {
            return Err(ConfigError::ZeroStallThreshold);
        }
        Ok(self)
    }

    pub fn with_host_ttl_days(mut self, days: u32) -> Self {
        self.host_ttl_days = days;
        self
    }

    pub fn with_stall_warning_ticks(mut self, ticks: u64) -> Self {
        self.stall_warning_ticks = ticks;
        self
    }

    pub fn with_retain_resolved_mode(mut self, retain: bool) -> Self {
        self.retain_resolved_mode = retain;
        self
    }
}

fn env_value(var: &'static str) -> Option<String> {
    std::env::var(var).ok().and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_number<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env_value(var) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::NotANumber { var, value }),
    }
}

fn parse_bool(var: &'static str) -> Result<Option<bool>, ConfigError> {
    match env_value(var) {
        None => Ok(None),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::NotABool { var, value }),
        },
    }
}
