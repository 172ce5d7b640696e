#![forbid(unsafe_code)]

//! Tunables of a [`TreeMirror`](crate::TreeMirror) as plain data.
//!
//! Defaults reproduce the timings the mirror was tuned with; a deployment
//! can override them from a file when built with the `config-file`
//! feature:
//!
//! ```toml
//! # treesync.toml
//! flush_period_ms = 500
//! startup_delay_ms = 2000
//! refresh_mode = "in_place"
//! focus_item = "Accelerator"
//! ```
//!
//! ```rust,ignore
//! let config = MirrorConfig::from_toml_file("treesync.toml")?.validated()?;
//! ```

#[cfg(feature = "config-file")]
use std::path::Path;

#[cfg(feature = "config-file")]
use serde::{Deserialize, Serialize};
use thiserror::Error;
use treesync_runtime::{IndicatorConfig, ThrottleConfig};
use web_time::Duration;

/// How a flush makes the view re-read a node's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config-file", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-file", serde(rename_all = "snake_case"))]
pub enum RefreshMode {
    /// Swap the node for a fresh one (new id); selection is rewritten.
    #[default]
    Replace,
    /// Keep the node and bump its revision.
    InPlace,
}

/// Mirror configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct MirrorConfig {
    /// Minimum spacing between content flushes.
    pub flush_period_ms: u64,
    /// Delay between the first update of a burst and its flush.
    pub accumulation_delay_ms: u64,
    /// How long to let a freshly started source settle before building the
    /// view. Zero builds immediately.
    pub startup_delay_ms: u64,
    /// Quiet time after the last structural change before the change
    /// indicator hides.
    pub indicator_quiet_ms: u64,
    pub refresh_mode: RefreshMode,
    /// Top-level node to expand once the initial view is built.
    pub focus_item: Option<String>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            flush_period_ms: 200,
            accumulation_delay_ms: 20,
            startup_delay_ms: 0,
            indicator_quiet_ms: 1000,
            refresh_mode: RefreshMode::Replace,
            focus_item: None,
        }
    }
}

impl MirrorConfig {
    #[must_use]
    pub fn with_flush_period(mut self, period: Duration) -> Self {
        self.flush_period_ms = duration_ms(period);
        self
    }

    #[must_use]
    pub fn with_accumulation_delay(mut self, delay: Duration) -> Self {
        self.accumulation_delay_ms = duration_ms(delay);
        self
    }

    #[must_use]
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay_ms = duration_ms(delay);
        self
    }

    #[must_use]
    pub fn with_indicator_quiet(mut self, quiet: Duration) -> Self {
        self.indicator_quiet_ms = duration_ms(quiet);
        self
    }

    #[must_use]
    pub fn with_refresh_mode(mut self, mode: RefreshMode) -> Self {
        self.refresh_mode = mode;
        self
    }

    #[must_use]
    pub fn with_focus_item(mut self, name: impl Into<String>) -> Self {
        self.focus_item = Some(name.into());
        self
    }

    #[must_use]
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    #[must_use]
    pub fn to_throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig::default()
            .dormant(Duration::from_millis(self.flush_period_ms))
            .accumulation(Duration::from_millis(self.accumulation_delay_ms))
    }

    #[must_use]
    pub fn to_indicator_config(&self) -> IndicatorConfig {
        IndicatorConfig {
            quiet_period: Duration::from_millis(self.indicator_quiet_ms),
        }
    }

    /// Check every field. An empty list means the config is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.flush_period_ms == 0 {
            errors.push("flush_period_ms must be > 0".into());
        }
        if self.accumulation_delay_ms > self.flush_period_ms {
            errors.push(format!(
                "accumulation_delay_ms ({}) must not exceed flush_period_ms ({})",
                self.accumulation_delay_ms, self.flush_period_ms
            ));
        }
        if self.indicator_quiet_ms == 0 {
            errors.push("indicator_quiet_ms must be > 0".into());
        }
        if let Some(focus) = &self.focus_item
            && (focus.is_empty() || focus.contains('/'))
        {
            errors.push(format!("focus_item must be a single node name, got {focus:?}"));
        }
        errors
    }

    /// `self` if valid, otherwise every problem found.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load from a TOML string.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "config-file")]
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "config-file")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Errors loading or validating a [`MirrorConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
    #[cfg(feature = "config-file")]
    #[error("TOML parse error: {0}")]
    Toml(#[source] toml::de::Error),
    #[cfg(feature = "config-file")]
    #[error("JSON parse error: {0}")]
    Json(#[source] serde_json::Error),
    #[error("validation errors: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_validates_clean() {
        let errors = MirrorConfig::default().validate();
        assert!(errors.is_empty(), "default should validate: {errors:?}");
    }

    #[test]
    fn derived_configs_follow_fields() {
        let config = MirrorConfig::default()
            .with_flush_period(Duration::from_millis(500))
            .with_accumulation_delay(Duration::from_millis(50))
            .with_indicator_quiet(Duration::from_secs(3));
        let throttle = config.to_throttle_config();
        assert_eq!(throttle.dormant, Duration::from_millis(500));
        assert_eq!(throttle.accumulation, Duration::from_millis(50));
        assert_eq!(
            config.to_indicator_config().quiet_period,
            Duration::from_secs(3)
        );
    }

    #[test]
    fn validate_catches_zero_period_and_bad_focus() {
        let config = MirrorConfig {
            flush_period_ms: 0,
            focus_item: Some("a/b".into()),
            ..MirrorConfig::default()
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(errors[0].contains("flush_period_ms"));
    }

    #[test]
    fn validated_reports_all_problems() {
        let err = MirrorConfig::default()
            .with_indicator_quiet(Duration::ZERO)
            .validated()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref e) if e.len() == 1));
        assert!(err.to_string().contains("indicator_quiet_ms"));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn partial_toml_keeps_defaults() {
        let config = MirrorConfig::from_toml_str(
            "startup_delay_ms = 2000\nrefresh_mode = \"in_place\"\n",
        )
        .unwrap();
        assert_eq!(config.startup_delay(), Duration::from_secs(2));
        assert_eq!(config.refresh_mode, RefreshMode::InPlace);
        assert_eq!(config.flush_period_ms, 200);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn bad_json_is_a_json_error() {
        assert!(matches!(
            MirrorConfig::from_json_str("{ \"flush_period_ms\": \"soon\" }"),
            Err(ConfigError::Json(_))
        ));
    }
}
