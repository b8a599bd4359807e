//! Dashboard loop settings: history size, readout selection, plot and
//! tolerance rules.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::{tolerance::ToleranceRule, view::ViewMode};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MonitorConfig {
    /// Samples kept for plotting, export and `expected = "current"`.
    #[validate(range(min = 1, max = 10_000_000, message = "History capacity must be between 1 and 10000000"))]
    pub history_capacity: usize,

    /// Print the readout every N samples.
    #[validate(range(min = 1, message = "Report interval must be at least 1 sample"))]
    pub report_every: u64,

    /// Terms shown in the readout. Empty shows every catalog term.
    pub display: Vec<String>,

    /// Vector term whose norm is shown as speed.
    pub speed_term: Option<String>,

    /// Vector term plotted as the trajectory.
    pub trajectory_term: Option<String>,

    #[validate(nested)]
    pub plot: PlotConfig,

    #[validate(nested)]
    pub tolerances: Vec<ToleranceRule>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            history_capacity: 1000,
            report_every: 10,
            display: Vec::new(),
            speed_term: Some("Velocity (m/s)".into()),
            trajectory_term: Some("Position (m)".into()),
            plot: PlotConfig::default(),
            tolerances: Vec::new(),
        }
    }
}

/// ASCII trajectory plot printed with each readout.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PlotConfig {
    pub enabled: bool,

    /// `"xy"`, `"yz"`, `"xz"` or `"3d"`. The 3D view prints its X-Y projection.
    pub mode: ViewMode,

    #[validate(range(min = 8, max = 400))]
    pub width: usize,

    #[validate(range(min = 4, max = 200))]
    pub height: usize,

    /// Zoom steps applied at start; negative zooms out.
    #[validate(range(min = -20, max = 20))]
    pub zoom_steps: i32,
}

impl Default for PlotConfig {
    fn default() -> Self {
        PlotConfig {
            enabled: false,
            mode: ViewMode::default(),
            width: 72,
            height: 20,
            zoom_steps: 0,
        }
    }
}
