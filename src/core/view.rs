//! Plot view model for the trajectory display.
//!
//! Holds what the user can change about the plot (2-D axis pair or 3-D,
//! zoom level) and turns a list of points into axis limits. Rendering is a
//! plain character grid so the dashboard can print it in a terminal.

use std::fmt;

use serde::{Deserialize, Serialize};
use trickwatch_varserver::Component;

/// Zoom step applied by [`PlotView::zoom_in`] and [`PlotView::zoom_out`].
pub const ZOOM_STEP: f64 = 1.5;

/// Which two position components a 2-D plot shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisPair {
    #[default]
    Xy,
    Yz,
    Xz,
}

impl AxisPair {
    pub const ALL: [AxisPair; 3] = [AxisPair::Xy, AxisPair::Yz, AxisPair::Xz];

    /// Horizontal and vertical components.
    pub fn components(&self) -> (Component, Component) {
        match self {
            AxisPair::Xy => (Component::X, Component::Y),
            AxisPair::Yz => (Component::Y, Component::Z),
            AxisPair::Xz => (Component::X, Component::Z),
        }
    }

    /// Positions of the two components in an `[x, y, z]` point.
    pub fn indices(&self) -> (usize, usize) {
        match self {
            AxisPair::Xy => (0, 1),
            AxisPair::Yz => (1, 2),
            AxisPair::Xz => (0, 2),
        }
    }

    /// X-Y -> Y-Z -> X-Z -> X-Y
    pub fn next(&self) -> AxisPair {
        match self {
            AxisPair::Xy => AxisPair::Yz,
            AxisPair::Yz => AxisPair::Xz,
            AxisPair::Xz => AxisPair::Xy,
        }
    }
}

impl fmt::Display for AxisPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, v) = self.components();
        write!(f, "{h}-{v}")
    }
}

/// Plot dimensionality. Config spelling: `"xy"`, `"yz"`, `"xz"` or `"3d"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ViewMode {
    Planar(AxisPair),
    Spatial,
}

impl Default for ViewMode {
    fn default() -> Self {
        ViewMode::Spatial
    }
}

impl TryFrom<String> for ViewMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().replace('-', "").as_str() {
            "xy" => Ok(ViewMode::Planar(AxisPair::Xy)),
            "yz" => Ok(ViewMode::Planar(AxisPair::Yz)),
            "xz" => Ok(ViewMode::Planar(AxisPair::Xz)),
            "3d" => Ok(ViewMode::Spatial),
            _ => Err(format!(
                "unknown view mode '{value}', expected xy, yz, xz or 3d"
            )),
        }
    }
}

impl From<ViewMode> for String {
    fn from(mode: ViewMode) -> Self {
        match mode {
            ViewMode::Planar(AxisPair::Xy) => "xy".into(),
            ViewMode::Planar(AxisPair::Yz) => "yz".into(),
            ViewMode::Planar(AxisPair::Xz) => "xz".into(),
            ViewMode::Spatial => "3d".into(),
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewMode::Planar(axes) => write!(f, "2D {axes}"),
            ViewMode::Spatial => f.write_str("3D"),
        }
    }
}

/// Closed interval on one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min: f64,
    pub max: f64,
}

impl Extent {
    /// Smallest interval containing every finite value; `None` if there are none.
    pub fn of(values: impl IntoIterator<Item = f64>) -> Option<Extent> {
        values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some(Extent { min: v, max: v }),
                Some(e) => Some(Extent {
                    min: e.min.min(v),
                    max: e.max.max(v),
                }),
            })
    }

    pub fn center(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Same center, span divided by `zoom`.
    pub fn zoomed(&self, zoom: f64) -> Extent {
        let half = self.span() / zoom / 2.0;
        let center = self.center();
        Extent {
            min: center - half,
            max: center + half,
        }
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }
}

/// Current plot settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotView {
    pub mode: ViewMode,
    zoom: f64,
}

impl Default for PlotView {
    fn default() -> Self {
        PlotView::new(ViewMode::default())
    }
}

impl PlotView {
    pub fn new(mode: ViewMode) -> Self {
        PlotView { mode, zoom: 1.0 }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn zoom_in(&mut self) {
        self.zoom *= ZOOM_STEP;
    }

    pub fn zoom_out(&mut self) {
        self.zoom /= ZOOM_STEP;
    }

    /// Back to the full data extent. The view mode is kept.
    pub fn reset(&mut self) {
        self.zoom = 1.0;
    }

    /// Switches between 3-D and the X-Y plane.
    pub fn toggle_dimensions(&mut self) {
        self.mode = match self.mode {
            ViewMode::Spatial => ViewMode::Planar(AxisPair::Xy),
            ViewMode::Planar(_) => ViewMode::Spatial,
        };
    }

    /// Cycles the axis pair of a 2-D plot. No effect in 3-D.
    pub fn cycle_axes(&mut self) {
        if let ViewMode::Planar(axes) = self.mode {
            self.mode = ViewMode::Planar(axes.next());
        }
    }

    /// Horizontal and vertical limits for 2-D points.
    pub fn bounds(&self, points: &[(f64, f64)]) -> Option<[Extent; 2]> {
        let x = Extent::of(points.iter().map(|p| p.0))?;
        let y = Extent::of(points.iter().map(|p| p.1))?;
        Some([x.zoomed(self.zoom), y.zoomed(self.zoom)])
    }

    /// X, Y and Z limits for 3-D points.
    pub fn bounds3(&self, points: &[[f64; 3]]) -> Option<[Extent; 3]> {
        let x = Extent::of(points.iter().map(|p| p[0]))?;
        let y = Extent::of(points.iter().map(|p| p[1]))?;
        let z = Extent::of(points.iter().map(|p| p[2]))?;
        Some([
            x.zoomed(self.zoom),
            y.zoomed(self.zoom),
            z.zoomed(self.zoom),
        ])
    }
}

/// Character used for the trail.
pub const TRAIL: char = '.';
/// Character used for the newest point.
pub const CURRENT: char = '@';

/// Draws `points` into a `width` x `height` character grid.
///
/// The last point is the current position. Points outside `bounds` are
/// clipped. The vertical axis grows upward. A zero-span axis puts every
/// point on the middle row or column.
pub fn render_ascii(points: &[(f64, f64)], bounds: [Extent; 2], width: usize, height: usize) -> String {
    if width == 0 || height == 0 {
        return String::new();
    }
    let mut grid = vec![vec![' '; width]; height];

    let cell = |v: f64, extent: &Extent, cells: usize| -> usize {
        if extent.span() <= 0.0 {
            return cells / 2;
        }
        let t = (v - extent.min) / extent.span();
        ((t * (cells - 1) as f64).round() as usize).min(cells - 1)
    };

    let last = points.len().saturating_sub(1);
    for (i, &(x, y)) in points.iter().enumerate() {
        if !bounds[0].contains(x) || !bounds[1].contains(y) {
            continue;
        }
        let col = cell(x, &bounds[0], width);
        let row = height - 1 - cell(y, &bounds[1], height);
        grid[row][col] = if i == last { CURRENT } else { TRAIL };
    }

    grid.into_iter()
        .map(|row| row.into_iter().collect::<String>().trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
