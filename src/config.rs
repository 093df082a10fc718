// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YAML configuration (`spec §6`): one `Config` struct matching every
//! documented key, with the documented defaults, deserialized with
//! `serde` + `serde_yaml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::filter::TopicFilter;
use crate::handler::HandlerConfig;
use crate::pending::PendingBound;
use crate::state::State;
use crate::writer::{FileNaming, ResourceLimits};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub dds: DdsConfig,
    pub recorder: RecorderSettings,
    pub remote_controller: RemoteControllerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DdsConfig {
    pub domain: u32,
    pub whitelist: Vec<String>,
    pub blocklist: Vec<String>,
    pub allowlist: Vec<String>,
}

impl Default for DdsConfig {
    fn default() -> Self {
        Self {
            domain: 0,
            whitelist: Vec::new(),
            blocklist: Vec::new(),
            allowlist: Vec::new(),
        }
    }
}

impl DdsConfig {
    /// `whitelist`/`allowlist` both mean "record only these topics"; an
    /// explicit `blocklist` excludes from whatever the whitelist admits.
    /// Absent all three, every discovered topic is recorded.
    pub fn topic_filter(&self) -> Option<TopicFilter> {
        let include: Vec<String> = self
            .whitelist
            .iter()
            .chain(self.allowlist.iter())
            .cloned()
            .collect();
        if !include.is_empty() {
            return Some(TopicFilter::include(include));
        }
        if !self.blocklist.is_empty() {
            return Some(TopicFilter::exclude(self.blocklist.clone()));
        }
        None
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RecorderSettings {
    pub buffer_size: usize,
    pub event_window: u64,
    pub cleanup_period: Option<u64>,
    pub max_pending_samples: i64,
    pub only_with_schema: bool,
    pub output: OutputConfig,
    pub log_publish_time: bool,
    pub record_types: bool,
    pub ros2_types: bool,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            event_window: 20,
            cleanup_period: None,
            max_pending_samples: 5000,
            only_with_schema: false,
            output: OutputConfig::default(),
            log_publish_time: false,
            record_types: true,
            ros2_types: false,
        }
    }
}

impl RecorderSettings {
    /// Default is `2 * event_window` per design notes §9 discovery-delay
    /// reasoning: a schema that resolves within one window's worth of
    /// slack after the last flush still gets a cleanup pass before it's
    /// declared stale.
    pub fn cleanup_period_secs(&self) -> u64 {
        self.cleanup_period.unwrap_or(self.event_window * 2)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OutputConfig {
    pub filename: String,
    pub path: String,
    pub timestamp_format: Option<String>,
    pub local_timestamp: bool,
    pub resource_limits: ResourceLimitsConfig,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            filename: "output".into(),
            path: ".".into(),
            timestamp_format: None,
            local_timestamp: false,
            resource_limits: ResourceLimitsConfig::default(),
        }
    }
}

/// Which container a given `output.filename` selects. Not a distinct
/// config key: the filename's extension picks the container, the way the
/// teacher's own `OutputFormat::from_extension` worked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Chunked,
    Relational,
}

impl OutputConfig {
    pub fn container_kind(&self) -> ContainerKind {
        match Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
        {
            Some("db") | Some("sqlite") | Some("sqlite3") => ContainerKind::Relational,
            _ => ContainerKind::Chunked,
        }
    }

    pub fn file_naming(&self) -> FileNaming {
        let path = PathBuf::from(&self.path);
        let stem = Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output")
            .to_string();
        let extension: &'static str = match self.container_kind() {
            ContainerKind::Relational => "db",
            ContainerKind::Chunked => "rec",
        };
        FileNaming {
            path,
            base_name: stem,
            extension,
            timestamp_format: self.timestamp_format.clone(),
            local_timestamp: self.local_timestamp,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ResourceLimitsConfig {
    pub max_file_size: Option<u64>,
    pub max_size: Option<u64>,
    pub file_rotation: bool,
    pub log_rotation: bool,
    pub safety_margin: u64,
}

impl Default for ResourceLimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: None,
            max_size: None,
            file_rotation: false,
            log_rotation: false,
            safety_margin: crate::writer::MIN_SAFETY_MARGIN,
        }
    }
}

impl ResourceLimitsConfig {
    pub fn to_resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            max_file_size: self.max_file_size,
            max_size: self.max_size,
            file_rotation: self.file_rotation,
            log_rotation: self.log_rotation,
            safety_margin: self.safety_margin,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RemoteControllerConfig {
    pub enable: bool,
    pub domain: u32,
    pub initial_state: String,
    pub command_topic_name: String,
    pub status_topic_name: String,
}

impl Default for RemoteControllerConfig {
    fn default() -> Self {
        Self {
            enable: false,
            domain: 0,
            initial_state: "RUNNING".into(),
            command_topic_name: "DdsRecorderCommand".into(),
            status_topic_name: "DdsRecorderStatus".into(),
        }
    }
}

impl Config {
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Parse `remote-controller.initial-state`, matching `spec §6`.
    pub fn initial_state(&self) -> Result<State, ConfigError> {
        match self.remote_controller.initial_state.to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(State::Running),
            "PAUSED" => Ok(State::Paused),
            "STOPPED" => Ok(State::Stopped),
            other => Err(ConfigError::Invalid(format!(
                "remote-controller.initial-state must be RUNNING, PAUSED, or STOPPED, got {other:?}"
            ))),
        }
    }

    /// Validate cross-field invariants that can't be expressed through
    /// `serde` defaults alone (design notes §9.3).
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.initial_state()?;
        if self.recorder.output.container_kind() == ContainerKind::Relational {
            self.recorder
                .output
                .resource_limits
                .to_resource_limits()
                .reconcile_for_single_file_container()
                .map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }

    pub fn pending_bound(&self) -> PendingBound {
        PendingBound::from(self.recorder.max_pending_samples)
    }

    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            buffer_size: self.recorder.buffer_size,
            event_window: Duration::from_secs(self.recorder.event_window),
            cleanup_period: Duration::from_secs(self.recorder.cleanup_period_secs()),
            pending_bound: self.pending_bound(),
            only_with_schema: self.recorder.only_with_schema,
            log_publish_time: self.recorder.log_publish_time,
        }
    }

    pub fn resource_limits(&self) -> Result<ResourceLimits, ConfigError> {
        let limits = self.recorder.output.resource_limits.to_resource_limits();
        let limits = if self.recorder.output.container_kind() == ContainerKind::Relational {
            limits
                .reconcile_for_single_file_container()
                .map_err(ConfigError::Invalid)?
        } else {
            limits
        };
        Ok(limits.normalized())
    }

    pub fn topic_filter(&self) -> Option<TopicFilter> {
        self.dds.topic_filter()
    }
}
