use std::fs;
use std::path::{Path, PathBuf};

use anchor_core::CloudAnchorState;
use anchor_lifecycle::ManagerConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::cli::{Cli, Flow};
use crate::script::{self, Step};

#[derive(Debug, Error)]
pub enum SimConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("host outcome must be terminal, got {0}")]
    HostOutcomeNotTerminal(CloudAnchorState),
}

/// Contents of the `--config` file. Every field is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    pub frame_ms: u64,
    pub latency_ticks: u64,
    pub max_frames: u64,
    /// Terminal state for every auto-completed host task.
    pub host_outcome: CloudAnchorState,
    pub host_ttl_days: Option<u32>,
    pub retain_resolved_mode: Option<bool>,
    pub steps: Vec<Step>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            frame_ms: 16,
            latency_ticks: 3,
            max_frames: 120,
            host_outcome: CloudAnchorState::Success,
            host_ttl_days: None,
            retain_resolved_mode: None,
            steps: Vec::new(),
        }
    }
}

impl SimConfig {
    pub fn load(path: &Path) -> Result<Self, SimConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| SimConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|err| SimConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// Reads `--config` if given, then applies command-line overrides.
    pub fn resolve(cli: &Cli) -> Result<Self, SimConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(frame_ms) = cli.frame_ms {
            config.frame_ms = frame_ms;
        }
        if let Some(latency) = cli.latency_ticks {
            config.latency_ticks = latency;
        }
        if let Some(max_frames) = cli.max_frames {
            config.max_frames = max_frames;
        }
        if config.steps.is_empty() {
            config.steps = match cli.flow {
                Flow::Single => script::default_single_script(),
                Flow::Multi => script::default_multi_script(),
            };
        }
        if !config.host_outcome.is_returnable() {
            return Err(SimConfigError::HostOutcomeNotTerminal(config.host_outcome));
        }
        Ok(config)
    }

    /// File settings layered over the environment-derived manager config.
    pub fn manager_config(&self, base: ManagerConfig) -> ManagerConfig {
        let mut config = base;
        if let Some(days) = self.host_ttl_days {
            config = config.with_host_ttl_days(days);
        }
        if let Some(retain) = self.retain_resolved_mode {
            config = config.with_retain_resolved_mode(retain);
        }
        config
    }
}
