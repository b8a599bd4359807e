//! Terminal readout.
//!
//! Every `report_every` samples the dashboard prints the selected terms,
//! the speed, the number of points held, the tolerance state and, when
//! enabled, an ASCII plot of the trajectory. Tolerance breaches are printed
//! as soon as they happen. View controls redraw the plot straight away.

use std::{fmt::Write as _, io::Write, path::Path};

use trickwatch_varserver::Value;

use super::{
    catalog::Catalog,
    control::Control,
    history::History,
    monitor::{MonitorError, MonitorReport, Sink, SinkError, Update},
    tolerance::Breach,
    view::{render_ascii, AxisPair, Extent, PlotView, ViewMode},
};
use crate::config::monitor::{MonitorConfig, PlotConfig};

struct Plot {
    view: PlotView,
    width: usize,
    height: usize,
}

pub struct ConsoleDashboard<W> {
    out: W,
    /// Labels shown in the readout, in order.
    display: Vec<String>,
    speed_term: Option<String>,
    trajectory_term: Option<String>,
    report_every: u64,
    plot: Option<Plot>,
}

impl<W: Write + Send> ConsoleDashboard<W> {
    /// Resolves the configured terms against `catalog`. An empty display
    /// list shows every term.
    pub fn new(catalog: &Catalog, config: &MonitorConfig, out: W) -> Result<Self, MonitorError> {
        let display = if config.display.is_empty() {
            catalog.labels().map(str::to_string).collect()
        } else {
            for term in &config.display {
                catalog.require(term)?;
            }
            config.display.clone()
        };
        if let Some(term) = &config.speed_term {
            catalog.require_vector(term)?;
        }
        if let Some(term) = &config.trajectory_term {
            catalog.require_vector(term)?;
        }

        let plot = match (&config.trajectory_term, &config.plot) {
            (Some(_), PlotConfig { enabled: true, .. }) => Some(Plot::from_config(&config.plot)),
            _ => None,
        };

        Ok(ConsoleDashboard {
            out,
            display,
            speed_term: config.speed_term.clone(),
            trajectory_term: config.trajectory_term.clone(),
            report_every: config.report_every.max(1),
            plot,
        })
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// The readout for one update.
    pub fn render(&self, update: &Update<'_>) -> String {
        let mut text = String::new();
        let snapshot = &update.sample.snapshot;

        match update.sample.sim_time {
            Some(t) => {
                let _ = writeln!(text, "Sample #{} at t={:.2}s:", update.count, t);
            }
            None => {
                let _ = writeln!(text, "Sample #{}:", update.count);
            }
        }

        let width = self.display.iter().map(|l| l.len()).max().unwrap_or(0);
        for label in &self.display {
            let value = match snapshot.get(label) {
                Some(Value::Vector([x, y, z])) => {
                    format!("X={x:+.4e}  Y={y:+.4e}  Z={z:+.4e}")
                }
                Some(Value::Scalar(v)) => format!("{v:+.4e}"),
                None => "-".to_string(),
            };
            let _ = writeln!(text, "  {label:<width$}  {value}");
        }

        if let Some(speed) = self
            .speed_term
            .as_deref()
            .and_then(|term| snapshot.magnitude(term))
        {
            let _ = writeln!(text, "  Speed: {speed:.4e} m/s");
        }
        let _ = writeln!(text, "  Points: {}", update.history.len());

        if !update.armed.is_empty() || !update.tripped.is_empty() {
            let _ = writeln!(
                text,
                "  Tolerances: {} armed, {} tripped",
                update.armed.len(),
                update.tripped.len()
            );
            for breach in update.tripped {
                let _ = writeln!(text, "    ! {breach}");
            }
        }

        if let (Some(plot), Some(term)) = (&self.plot, &self.trajectory_term) {
            text.push_str(&plot.render(update.history, term));
        }
        text
    }
}

impl Plot {
    fn from_config(config: &PlotConfig) -> Self {
        let mut view = PlotView::new(config.mode);
        for _ in 0..config.zoom_steps.unsigned_abs() {
            if config.zoom_steps > 0 {
                view.zoom_in();
            } else {
                view.zoom_out();
            }
        }
        Plot {
            view,
            width: config.width,
            height: config.height,
        }
    }

    fn render(&self, history: &History, term: &str) -> String {
        match self.view.mode {
            ViewMode::Planar(axes) => {
                let points = history.points(term, axes);
                let Some(bounds) = self.view.bounds(&points) else {
                    return String::new();
                };
                let title = format!("{term} ({})", self.view.mode);
                self.panel(&title, axes, &points, bounds)
            }
            // Three projections sharing the limits of the 3-D extent.
            ViewMode::Spatial => {
                let points = history.points3(term);
                let Some(limits) = self.view.bounds3(&points) else {
                    return String::new();
                };
                AxisPair::ALL
                    .iter()
                    .map(|&axes| {
                        let (h, v) = axes.indices();
                        let flat: Vec<(f64, f64)> = points.iter().map(|p| (p[h], p[v])).collect();
                        let title = format!("{term} (3D, {axes})");
                        self.panel(&title, axes, &flat, [limits[h], limits[v]])
                    })
                    .collect()
            }
        }
    }

    fn panel(&self, title: &str, axes: AxisPair, points: &[(f64, f64)], bounds: [Extent; 2]) -> String {
        let mut text = String::new();
        let (h, v) = axes.components();
        let _ = writeln!(
            text,
            "  {title}  zoom x{:.2}  {h}: [{:.3e}, {:.3e}]  {v}: [{:.3e}, {:.3e}]",
            self.view.zoom(),
            bounds[0].min,
            bounds[0].max,
            bounds[1].min,
            bounds[1].max
        );
        let border = format!("  +{}+", "-".repeat(self.width));
        let _ = writeln!(text, "{border}");
        let grid = render_ascii(points, bounds, self.width, self.height);
        for row in grid.split('\n') {
            let _ = writeln!(text, "  |{row:<width$}|", width = self.width);
        }
        let _ = writeln!(text, "{border}");
        text
    }

    fn apply(&mut self, control: Control) {
        match control {
            Control::ZoomIn => self.view.zoom_in(),
            Control::ZoomOut => self.view.zoom_out(),
            Control::ResetZoom => self.view.reset(),
            Control::ToggleDimensions => self.view.toggle_dimensions(),
            Control::CycleAxes => self.view.cycle_axes(),
            Control::Clear | Control::Save => {}
        }
    }
}

#[async_trait::async_trait]
impl<W: Write + Send> Sink for ConsoleDashboard<W> {
    fn name(&self) -> &str {
        "console"
    }

    async fn on_sample(&mut self, update: &Update<'_>) -> Result<(), SinkError> {
        if update.count % self.report_every != 0 {
            return Ok(());
        }
        let text = self.render(update);
        writeln!(self.out, "{text}")?;
        self.out.flush()?;
        Ok(())
    }

    async fn on_breach(&mut self, breach: &Breach) -> Result<(), SinkError> {
        let at = breach
            .sim_time
            .map(|t| format!(" at t={t:.2}s"))
            .unwrap_or_default();
        writeln!(self.out, "TOLERANCE TRIPPED{at}: {breach}")?;
        self.out.flush()?;
        Ok(())
    }

    async fn on_control(&mut self, control: Control, history: &History) -> Result<(), SinkError> {
        if control == Control::Clear {
            writeln!(self.out, "Trajectory cleared")?;
        } else if control.is_view() {
            match (&mut self.plot, &self.trajectory_term) {
                (Some(plot), Some(term)) => {
                    plot.apply(control);
                    writeln!(self.out, "View: {}, zoom x{:.2}", plot.view.mode, plot.view.zoom())?;
                    write!(self.out, "{}", plot.render(history, term))?;
                }
                _ => writeln!(self.out, "Plot is disabled; set [monitor.plot] enabled = true")?,
            }
        }
        self.out.flush()?;
        Ok(())
    }

    async fn on_saved(&mut self, path: &Path) -> Result<(), SinkError> {
        writeln!(self.out, "Data saved to: {}", path.display())?;
        self.out.flush()?;
        Ok(())
    }

    async fn finish(&mut self, report: &MonitorReport) -> Result<(), SinkError> {
        writeln!(self.out, "Total samples received: {}", report.samples)?;
        if !report.breaches.is_empty() {
            writeln!(self.out, "Tolerance breaches: {}", report.breaches.len())?;
        }
        if let Some(path) = &report.saved_csv {
            writeln!(
                self.out,
                "Simulation data automatically saved to: {}",
                path.display()
            )?;
        }
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use trickwatch_varserver::{Component, Snapshot};

    use super::*;
    use crate::{
        config::terms::CatalogConfig,
        core::{
            catalog::CatalogError,
            history::Sample,
            tolerance::Limit,
            view::AxisPair,
        },
    };

    fn catalog() -> Arc<Catalog> {
        Arc::new(Catalog::from_config(&CatalogConfig::default()).unwrap())
    }

    fn sample(t: f64, x: f64, y: f64) -> Sample {
        Sample::new(
            Snapshot::new(vec![
                ("Position (m)".into(), Value::Vector([x, y, 0.0])),
                ("Velocity (m/s)".into(), Value::Vector([3.0, 4.0, 0.0])),
                ("Acceleration (m/s^2)".into(), Value::Vector([0.0, 0.0, -9.81])),
                ("UTC Seconds (s)".into(), Value::Scalar(t)),
            ]),
            "UTC Seconds (s)",
        )
    }

    fn history(n: usize) -> History {
        let mut history = History::new(100);
        for i in 0..n {
            history.push(sample(i as f64, i as f64, (i * i) as f64));
        }
        history
    }

    fn update<'a>(history: &'a History, tripped: &'a [Breach]) -> Update<'a> {
        Update {
            count: history.len() as u64,
            sample: history.latest().unwrap(),
            history,
            armed: &[],
            tripped,
        }
    }

    #[test]
    fn test_render_readout() {
        let config = MonitorConfig {
            display: vec!["Velocity (m/s)".into(), "UTC Seconds (s)".into()],
            ..Default::default()
        };
        let dashboard = ConsoleDashboard::new(&catalog(), &config, Vec::new()).unwrap();
        let history = history(3);
        let text = dashboard.render(&update(&history, &[]));

        assert!(text.starts_with("Sample #3 at t=2.00s:\n"));
        assert!(text.contains("  Velocity (m/s)   X=+3.0000e0  Y=+4.0000e0  Z=+0.0000e0\n"));
        assert!(text.contains("  UTC Seconds (s)  +2.0000e0\n"));
        assert!(text.contains("  Speed: 5.0000e0 m/s\n"));
        assert!(text.contains("  Points: 3\n"));
        assert!(!text.contains("Position"));
        assert!(!text.contains("Tolerances"));
    }

    #[test]
    fn test_render_tripped() {
        let dashboard =
            ConsoleDashboard::new(&catalog(), &MonitorConfig::default(), Vec::new()).unwrap();
        let history = history(1);
        let breach = Breach {
            term: "Position (m)".into(),
            component: Component::X,
            limit: Limit::Max,
            bound: 1.0,
            value: 2.0,
            sim_time: Some(0.0),
        };
        let text = dashboard.render(&update(&history, std::slice::from_ref(&breach)));
        assert!(text.contains("  Tolerances: 0 armed, 1 tripped\n"));
        assert!(text.contains("    ! Position (m) (X) breached MAX tolerance of 1 and reached 2\n"));
    }

    #[test]
    fn test_render_plot() {
        let config = MonitorConfig {
            plot: PlotConfig {
                enabled: true,
                mode: ViewMode::Planar(AxisPair::Xy),
                width: 10,
                height: 5,
                zoom_steps: 0,
            },
            ..Default::default()
        };
        let dashboard = ConsoleDashboard::new(&catalog(), &config, Vec::new()).unwrap();
        let history = history(3);
        let text = dashboard.render(&update(&history, &[]));

        assert!(text.contains("Position (m) (2D X-Y)  zoom x1.00"));
        assert!(text.contains("  +----------+\n"));
        // (0,0) bottom-left, (2,4) top-right is the current point.
        assert!(text.contains("  |         @|\n"));
        assert!(text.contains("  |.         |\n"));
    }

    fn plotting(mode: ViewMode) -> MonitorConfig {
        MonitorConfig {
            plot: PlotConfig {
                enabled: true,
                mode,
                width: 10,
                height: 5,
                zoom_steps: 0,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_view_controls_redraw() {
        let config = plotting(ViewMode::Planar(AxisPair::Xy));
        let mut dashboard = ConsoleDashboard::new(&catalog(), &config, Vec::new()).unwrap();
        let history = history(3);

        let steps = [
            (Control::ZoomIn, "View: 2D X-Y, zoom x1.50"),
            (Control::ZoomOut, "View: 2D X-Y, zoom x1.00"),
            (Control::ZoomOut, "View: 2D X-Y, zoom x0.67"),
            (Control::ResetZoom, "View: 2D X-Y, zoom x1.00"),
            (Control::CycleAxes, "View: 2D Y-Z, zoom x1.00"),
            (Control::ToggleDimensions, "View: 3D, zoom x1.00"),
        ];
        for (control, expected) in steps {
            dashboard.on_control(control, &history).await.unwrap();
            let out = String::from_utf8(std::mem::take(&mut dashboard.out)).unwrap();
            assert!(out.starts_with(expected), "{control}: {out}");
            assert!(out.contains("  +----------+\n"));
        }
    }

    #[test]
    fn test_render_3d_panels() {
        let dashboard =
            ConsoleDashboard::new(&catalog(), &plotting(ViewMode::Spatial), Vec::new()).unwrap();
        let history = history(3);
        let text = dashboard.render(&update(&history, &[]));

        assert!(text.contains("Position (m) (3D, X-Y)  zoom x1.00"));
        assert!(text.contains("Position (m) (3D, Y-Z)"));
        assert!(text.contains("Position (m) (3D, X-Z)"));
        // Z is constant, so its axis collapses to the middle row.
        assert!(text.contains("Z: [0.000e0, 0.000e0]"));
    }

    #[tokio::test]
    async fn test_controls_without_plot() {
        let mut dashboard =
            ConsoleDashboard::new(&catalog(), &MonitorConfig::default(), Vec::new()).unwrap();
        let history = history(1);
        dashboard.on_control(Control::ZoomIn, &history).await.unwrap();
        dashboard.on_control(Control::Clear, &history).await.unwrap();
        dashboard.on_control(Control::Save, &history).await.unwrap();
        dashboard
            .on_saved(Path::new("out/run_2026-01-01_00-00-00.csv"))
            .await
            .unwrap();

        let out = String::from_utf8(dashboard.into_inner()).unwrap();
        assert_eq!(
            out,
            "Plot is disabled; set [monitor.plot] enabled = true\n\
             Trajectory cleared\n\
             Data saved to: out/run_2026-01-01_00-00-00.csv\n"
        );
    }

    #[test]
    fn test_unknown_display_term() {
        let config = MonitorConfig {
            display: vec!["Altitude (m)".into()],
            ..Default::default()
        };
        assert!(matches!(
            ConsoleDashboard::new(&catalog(), &config, Vec::new()),
            Err(MonitorError::Catalog(CatalogError::UnknownTerm(_)))
        ));
    }

    #[test]
    fn test_scalar_trajectory_rejected() {
        let config = MonitorConfig {
            trajectory_term: Some("UTC Seconds (s)".into()),
            ..Default::default()
        };
        assert!(matches!(
            ConsoleDashboard::new(&catalog(), &config, Vec::new()),
            Err(MonitorError::Catalog(CatalogError::NotAVector(_)))
        ));
    }

    #[tokio::test]
    async fn test_sink_reports_every_n() {
        let config = MonitorConfig {
            report_every: 2,
            ..Default::default()
        };
        let mut dashboard = ConsoleDashboard::new(&catalog(), &config, Vec::new()).unwrap();

        let mut history = History::new(10);
        for i in 0..4 {
            history.push(sample(i as f64, 0.0, 0.0));
            let update = update(&history, &[]);
            dashboard.on_sample(&update).await.unwrap();
        }
        dashboard
            .finish(&MonitorReport {
                samples: 4,
                ..Default::default()
            })
            .await
            .unwrap();

        let out = String::from_utf8(dashboard.into_inner()).unwrap();
        assert!(!out.contains("Sample #1"));
        assert!(out.contains("Sample #2 at"));
        assert!(!out.contains("Sample #3"));
        assert!(out.contains("Sample #4 at"));
        assert!(out.ends_with("Total samples received: 4\n"));
    }

    #[tokio::test]
    async fn test_breach_printed_immediately() {
        let mut dashboard =
            ConsoleDashboard::new(&catalog(), &MonitorConfig::default(), Vec::new()).unwrap();
        let breach = Breach {
            term: "Velocity (m/s)".into(),
            component: Component::N,
            limit: Limit::Min,
            bound: 10.0,
            value: 5.0,
            sim_time: Some(12.5),
        };
        dashboard.on_breach(&breach).await.unwrap();
        let out = String::from_utf8(dashboard.into_inner()).unwrap();
        assert_eq!(
            out,
            "TOLERANCE TRIPPED at t=12.50s: Velocity (m/s) (N) breached MIN tolerance of 10 and reached 5\n"
        );
    }
}
