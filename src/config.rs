use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::constants::{config, drag, positioning, timing, tracking};
use crate::drag::DragOptions;
use crate::geometry::Size;
use crate::positioning::PositionOptions;
use crate::tracker::TrackOptions;

/// Runtime tunables, saved as JSON under the platform config dir
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// trace / debug / info / warn / error (`LOG_LEVEL` wins when set)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub tooltip: TooltipSettings,
    #[serde(default)]
    pub drag: DragSettings,
    #[serde(default)]
    pub tracking: TrackingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingSettings {
    #[serde(default = "default_settling_delay_ms")]
    pub settling_delay_ms: u64,
    /// Grace period on the last step before the tour completes by itself
    #[serde(default = "default_auto_complete_delay_ms")]
    pub auto_complete_delay_ms: u64,
    #[serde(default = "default_target_retry_interval_ms")]
    pub target_retry_interval_ms: u64,
    #[serde(default = "default_target_retry_attempts")]
    pub target_retry_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TooltipSettings {
    #[serde(default = "default_tooltip_margin")]
    pub margin: f64,
    #[serde(default = "default_tooltip_gap")]
    pub gap: f64,
    /// Used until the host reports a measured size
    #[serde(default = "default_tooltip_width")]
    pub default_width: f64,
    #[serde(default = "default_tooltip_height")]
    pub default_height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DragSettings {
    #[serde(default = "default_true")]
    pub clamp_to_viewport: bool,
    #[serde(default = "default_drag_margin")]
    pub margin: f64,
    #[serde(default = "default_move_threshold")]
    pub move_threshold: f64,
    /// Snap threshold in pixels (0 = disabled)
    #[serde(default = "default_snap_threshold")]
    pub snap_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSettings {
    /// Spotlight padding when a step does not set its own
    #[serde(default = "default_padding")]
    pub padding: f64,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_settling_delay_ms() -> u64 {
    timing::SETTLING_DELAY_MS
}

fn default_auto_complete_delay_ms() -> u64 {
    timing::AUTO_COMPLETE_DELAY_MS
}

fn default_target_retry_interval_ms() -> u64 {
    timing::TARGET_RETRY_INTERVAL_MS
}

fn default_target_retry_attempts() -> u32 {
    timing::TARGET_RETRY_ATTEMPTS
}

fn default_tooltip_margin() -> f64 {
    positioning::VIEWPORT_MARGIN
}

fn default_tooltip_gap() -> f64 {
    positioning::TARGET_GAP
}

fn default_tooltip_width() -> f64 {
    positioning::DEFAULT_TOOLTIP_WIDTH
}

fn default_tooltip_height() -> f64 {
    positioning::DEFAULT_TOOLTIP_HEIGHT
}

fn default_true() -> bool {
    true
}

fn default_drag_margin() -> f64 {
    drag::VIEWPORT_MARGIN
}

fn default_move_threshold() -> f64 {
    drag::MOVE_THRESHOLD
}

fn default_snap_threshold() -> f64 {
    drag::SNAP_THRESHOLD
}

fn default_padding() -> f64 {
    tracking::DEFAULT_PADDING
}

fn default_tolerance() -> f64 {
    tracking::BOUNDS_TOLERANCE
}

fn default_throttle_ms() -> u64 {
    tracking::DEFAULT_THROTTLE_MS
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            settling_delay_ms: default_settling_delay_ms(),
            auto_complete_delay_ms: default_auto_complete_delay_ms(),
            target_retry_interval_ms: default_target_retry_interval_ms(),
            target_retry_attempts: default_target_retry_attempts(),
        }
    }
}

impl Default for TooltipSettings {
    fn default() -> Self {
        Self {
            margin: default_tooltip_margin(),
            gap: default_tooltip_gap(),
            default_width: default_tooltip_width(),
            default_height: default_tooltip_height(),
        }
    }
}

impl Default for DragSettings {
    fn default() -> Self {
        Self {
            clamp_to_viewport: default_true(),
            margin: default_drag_margin(),
            move_threshold: default_move_threshold(),
            snap_threshold: default_snap_threshold(),
        }
    }
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            padding: default_padding(),
            tolerance: default_tolerance(),
            throttle_ms: default_throttle_ms(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            timing: TimingSettings::default(),
            tooltip: TooltipSettings::default(),
            drag: DragSettings::default(),
            tracking: TrackingSettings::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(config::APP_DIR);
        path.push(config::FILENAME);
        path
    }

    /// Load from the default location, writing a default file if none exists
    pub fn load() -> Result<Self> {
        Self::load_or_create(&Self::path())
    }

    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No config file found, generating default");
            let mut config = Self::default();
            config.apply_env_overrides();
            config.save_to(path)?;
            return Ok(config);
        }
        Self::load_from(path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let mut config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))?;
        config.apply_env_overrides();
        config.validate_and_clamp();
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, json).with_context(|| format!("Failed to write config to {}", path.display()))?;
        info!(path = %path.display(), "Saved config");
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(ms) = parse_env("SPOTLIGHT_SETTLING_DELAY_MS") {
            self.timing.settling_delay_ms = ms;
        }
        if let Some(ms) = parse_env("SPOTLIGHT_AUTO_COMPLETE_DELAY_MS") {
            self.timing.auto_complete_delay_ms = ms;
        }
    }

    /// Replace nonsensical values with defaults so the runtime never sees them
    fn validate_and_clamp(&mut self) {
        let valid = |value: f64| value.is_finite() && value >= 0.0;

        if !valid(self.tooltip.margin) {
            warn!(margin = self.tooltip.margin, "Invalid tooltip margin, using default");
            self.tooltip.margin = default_tooltip_margin();
        }
        if !valid(self.tooltip.gap) {
            warn!(gap = self.tooltip.gap, "Invalid tooltip gap, using default");
            self.tooltip.gap = default_tooltip_gap();
        }
        if !valid(self.tooltip.default_width) || self.tooltip.default_width == 0.0 {
            warn!(width = self.tooltip.default_width, "Invalid default tooltip width, using default");
            self.tooltip.default_width = default_tooltip_width();
        }
        if !valid(self.tooltip.default_height) || self.tooltip.default_height == 0.0 {
            warn!(height = self.tooltip.default_height, "Invalid default tooltip height, using default");
            self.tooltip.default_height = default_tooltip_height();
        }
        if !valid(self.drag.margin) {
            warn!(margin = self.drag.margin, "Invalid drag margin, using default");
            self.drag.margin = default_drag_margin();
        }
        if !valid(self.drag.move_threshold) {
            warn!(threshold = self.drag.move_threshold, "Invalid move threshold, using default");
            self.drag.move_threshold = default_move_threshold();
        }
        if !valid(self.drag.snap_threshold) {
            warn!(threshold = self.drag.snap_threshold, "Invalid snap threshold, disabling snapping");
            self.drag.snap_threshold = 0.0;
        }
        if !valid(self.tracking.padding) {
            warn!(padding = self.tracking.padding, "Invalid tracking padding, using default");
            self.tracking.padding = default_padding();
        }
        if !valid(self.tracking.tolerance) {
            warn!(tolerance = self.tracking.tolerance, "Invalid tracking tolerance, using default");
            self.tracking.tolerance = default_tolerance();
        }
    }

    pub fn settling_delay(&self) -> Duration {
        Duration::from_millis(self.timing.settling_delay_ms)
    }

    pub fn auto_complete_delay(&self) -> Duration {
        Duration::from_millis(self.timing.auto_complete_delay_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.timing.target_retry_interval_ms)
    }

    pub fn default_tooltip_size(&self) -> Size {
        Size::new(self.tooltip.default_width, self.tooltip.default_height)
    }

    pub fn position_options(&self) -> PositionOptions {
        PositionOptions {
            margin: self.tooltip.margin,
            gap: self.tooltip.gap,
        }
    }

    pub fn drag_options(&self) -> DragOptions {
        DragOptions {
            clamp_to_viewport: self.drag.clamp_to_viewport,
            margin: self.drag.margin,
            move_threshold: self.drag.move_threshold,
            snap_threshold: self.drag.snap_threshold,
        }
    }

    /// Tracking options for a step, `padding` overriding the configured default
    pub fn track_options(&self, padding: Option<f64>) -> TrackOptions {
        TrackOptions {
            padding: padding.unwrap_or(self.tracking.padding),
            throttle: Duration::from_millis(self.tracking.throttle_ms),
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &str) -> Option<T> {
    let raw = env::var(var).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = var, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}
