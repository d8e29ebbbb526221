//! Application-wide constants
//!
//! Defaults for every tunable the runtime exposes. `RuntimeConfig` falls back
//! to these when a field is missing from the config file.

/// Tour sequencing timings (milliseconds)
pub mod timing {
    /// Pause after asking the host to prepare a view, before measuring geometry
    pub const SETTLING_DELAY_MS: u64 = 300;

    /// Grace period on the last step before the tour completes by itself
    pub const AUTO_COMPLETE_DELAY_MS: u64 = 2000;

    /// Interval between attempts to resolve a step target that is not in the page yet
    pub const TARGET_RETRY_INTERVAL_MS: u64 = 250;

    /// Give up resolving a missing target after this many retries
    pub const TARGET_RETRY_ATTEMPTS: u32 = 20;
}

/// Element tracker constants
pub mod tracking {
    /// Bounds changes at or below this many units on every edge are ignored
    pub const BOUNDS_TOLERANCE: f64 = 1.0;

    /// Padding applied around a highlighted element when a step specifies none
    pub const DEFAULT_PADDING: f64 = 8.0;

    /// Minimum time between two recomputations of the same entry (0 = every frame)
    pub const DEFAULT_THROTTLE_MS: u64 = 0;
}

/// Tooltip positioning constants
pub mod positioning {
    /// Distance kept between the tooltip and the viewport edges
    pub const VIEWPORT_MARGIN: f64 = 16.0;

    /// Distance between the tooltip and the spotlight
    pub const TARGET_GAP: f64 = 12.0;

    /// Tooltip width used before the real size has been measured
    pub const DEFAULT_TOOLTIP_WIDTH: f64 = 320.0;

    /// Tooltip height used before the real size has been measured
    pub const DEFAULT_TOOLTIP_HEIGHT: f64 = 180.0;

    /// Measured sizes within this many units of the current one are ignored
    pub const MEASURE_TOLERANCE: f64 = 1.0;
}

/// Drag controller constants
pub mod drag {
    /// Distance kept from the viewport edges while dragging
    pub const VIEWPORT_MARGIN: f64 = 8.0;

    /// Pointer travel below this is still a click
    pub const MOVE_THRESHOLD: f64 = 3.0;

    /// Snap to a viewport edge when this close (0 = disabled)
    pub const SNAP_THRESHOLD: f64 = 12.0;
}

/// Storage keys used by `TourPreferences`
pub mod keys {
    pub const SEEN_INTRO: &str = "tour.seen_intro";
    pub const COMPLETED_TOURS: &str = "tour.completed";
    pub const SKIP_ANIMATIONS: &str = "tour.skip_animations";
    pub const PREFERENCES: &str = "tour.preferences";
}

/// Config and data file locations
pub mod config {
    /// Directory name under the platform config/data dirs
    pub const APP_DIR: &str = "spotlight-tour";

    /// Runtime configuration file name
    pub const FILENAME: &str = "config.json";

    /// Preferences file name (data dir)
    pub const PREFERENCES_FILENAME: &str = "preferences.json";
}

/// Headless player constants
pub mod player {
    /// Simulated frame interval (~60 Hz)
    pub const FRAME_INTERVAL_MS: u64 = 16;
}
