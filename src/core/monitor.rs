//! The dashboard loop.
//!
//! The `Monitor` waits for the variable server connection to become ready,
//! then for every snapshot: records it in the history, arms pending
//! tolerances, evaluates armed ones and hands the result to each [`Sink`].
//! Keyboard [`Control`]s are applied between samples. When the stream ends
//! or the token is cancelled it saves the history to CSV (if auto-save is
//! on) and lets every sink finish.

use std::{
    future,
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use tokio::{
    sync::mpsc,
    time::{sleep, Duration},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trickwatch_varserver::Snapshot;

use super::{
    catalog::{Catalog, CatalogError},
    control::Control,
    export::{CsvExporter, ExportError, TermLogger},
    history::{History, Sample},
    readiness::Readiness,
    tolerance::{ArmedRule, Breach, ToleranceError, ToleranceMonitor, ToleranceRule},
};
use crate::config::monitor::MonitorConfig;

const READINESS_REMINDER: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Export(#[from] ExportError),
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Invalid tolerance: {0}")]
    Tolerance(#[from] ToleranceError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// What a sink sees after each sample.
#[derive(Debug, Clone, Copy)]
pub struct Update<'a> {
    /// Samples received so far, this one included.
    pub count: u64,
    pub sample: &'a Sample,
    pub history: &'a History,
    pub armed: &'a [ArmedRule],
    pub tripped: &'a [Breach],
}

/// Totals returned when the monitor stops.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorReport {
    pub samples: u64,
    pub breaches: Vec<Breach>,
    pub saved_csv: Option<PathBuf>,
}

/// Consumer of monitor output.
#[async_trait::async_trait]
pub trait Sink: Send {
    fn name(&self) -> &str;

    async fn on_sample(&mut self, update: &Update<'_>) -> Result<(), SinkError>;

    /// Called once per tripped rule, after `on_sample` for the same sample.
    async fn on_breach(&mut self, _breach: &Breach) -> Result<(), SinkError> {
        Ok(())
    }

    /// Called after the monitor has applied `control` to its own state.
    async fn on_control(&mut self, _control: Control, _history: &History) -> Result<(), SinkError> {
        Ok(())
    }

    /// Called after an on-demand CSV save.
    async fn on_saved(&mut self, _path: &Path) -> Result<(), SinkError> {
        Ok(())
    }

    async fn finish(&mut self, _report: &MonitorReport) -> Result<(), SinkError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl Sink for TermLogger {
    fn name(&self) -> &str {
        "term-logger"
    }

    async fn on_sample(&mut self, update: &Update<'_>) -> Result<(), SinkError> {
        self.append(&update.sample.snapshot)?;
        Ok(())
    }
}

enum Start {
    Ready,
    First(Snapshot),
    Stop,
}

pub struct Monitor {
    catalog: Arc<Catalog>,
    history: History,
    tolerances: ToleranceMonitor,
    /// `expected = "current"` rules waiting for their start time.
    pending: Vec<ToleranceRule>,
    readiness: Readiness,
    sinks: Vec<Box<dyn Sink>>,
    exporter: Option<CsvExporter>,
    auto_save: bool,
    controls: Option<mpsc::Receiver<Control>>,
}

impl Monitor {
    /// Arms every tolerance that has a fixed expected value. Rules using the
    /// current value are checked now and armed on the first sample at or
    /// after their start time.
    pub fn new(
        catalog: Arc<Catalog>,
        config: &MonitorConfig,
        readiness: Readiness,
    ) -> Result<Self, MonitorError> {
        let mut tolerances = ToleranceMonitor::new(&catalog);
        let mut pending = Vec::new();
        for rule in &config.tolerances {
            match tolerances.arm(rule.clone(), None) {
                Ok(_) => {}
                Err(ToleranceError::NoData(_)) => pending.push(rule.clone()),
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Monitor {
            catalog,
            history: History::new(config.history_capacity),
            tolerances,
            pending,
            readiness,
            sinks: Vec::new(),
            exporter: None,
            auto_save: false,
            controls: None,
        })
    }

    pub fn with_sink(mut self, sink: Box<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Target of the save control, and of a final save on stop when
    /// `auto_save` is set.
    pub fn with_exporter(mut self, exporter: CsvExporter, auto_save: bool) -> Self {
        self.exporter = Some(exporter);
        self.auto_save = auto_save;
        self
    }

    pub fn with_controls(mut self, controls: mpsc::Receiver<Control>) -> Self {
        self.controls = Some(controls);
        self
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn tolerances(&self) -> &ToleranceMonitor {
        &self.tolerances
    }

    /// Runs until `snapshots` closes or `cancel` fires.
    pub async fn run(
        mut self,
        mut snapshots: mpsc::Receiver<Snapshot>,
        cancel: CancellationToken,
    ) -> MonitorReport {
        let mut report = MonitorReport::default();

        let first = match wait_ready(&self.readiness, &mut snapshots, &cancel).await {
            Start::Stop => None,
            Start::Ready => Some(None),
            Start::First(snapshot) => Some(Some(snapshot)),
        };

        if let Some(first) = first {
            info!("Monitoring {} terms", self.catalog.len());
            if let Some(snapshot) = first {
                self.handle(snapshot, &mut report).await;
            }
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("Monitor cancelled");
                        break;
                    }
                    next = snapshots.recv() => match next {
                        Some(snapshot) => self.handle(snapshot, &mut report).await,
                        None => {
                            info!("Snapshot stream closed");
                            break;
                        }
                    },
                    control = next_control(&mut self.controls) => match control {
                        Some(control) => self.apply(control).await,
                        None => {
                            debug!("Control input closed");
                            self.controls = None;
                        }
                    }
                }
            }
        }

        self.finish(&mut report).await;
        report
    }

    async fn handle(&mut self, snapshot: Snapshot, report: &mut MonitorReport) {
        self.history
            .push(Sample::new(snapshot, self.catalog.time_term()));
        let Some(sample) = self.history.latest() else {
            return;
        };
        report.samples += 1;

        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|rule| rule.start_time.reached(sample.sim_time));
        self.pending = waiting;
        for rule in due {
            if let Err(e) = self.tolerances.arm(rule, Some(sample)) {
                warn!("Dropping tolerance: {e}");
            }
        }

        let breaches = self.tolerances.evaluate(sample);

        let update = Update {
            count: report.samples,
            sample,
            history: &self.history,
            armed: self.tolerances.armed(),
            tripped: self.tolerances.tripped(),
        };
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.on_sample(&update).await {
                error!("Sink '{}' failed on sample: {}", sink.name(), e);
            }
            for breach in &breaches {
                if let Err(e) = sink.on_breach(breach).await {
                    error!("Sink '{}' failed on breach: {}", sink.name(), e);
                }
            }
        }

        report.breaches.extend(breaches);
    }

    async fn apply(&mut self, control: Control) {
        debug!("Control: {control}");
        match control {
            Control::Clear => {
                self.history.clear();
                info!("Trajectory history cleared");
            }
            Control::Save => {
                if let Some(path) = self.save() {
                    for sink in self.sinks.iter_mut() {
                        if let Err(e) = sink.on_saved(&path).await {
                            error!("Sink '{}' failed on save: {}", sink.name(), e);
                        }
                    }
                }
            }
            _ => {}
        }

        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.on_control(control, &self.history).await {
                error!("Sink '{}' failed on control: {}", sink.name(), e);
            }
        }
    }

    fn save(&self) -> Option<PathBuf> {
        let Some(exporter) = &self.exporter else {
            warn!("No CSV exporter configured, nothing saved");
            return None;
        };
        match exporter.save(&self.history, &self.catalog) {
            Ok(Some(path)) => Some(path),
            Ok(None) => {
                warn!("No data to save");
                None
            }
            Err(e) => {
                error!("Failed to save CSV: {}", e);
                None
            }
        }
    }

    async fn finish(&mut self, report: &mut MonitorReport) {
        if self.auto_save {
            report.saved_csv = self.save();
        }

        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.finish(report).await {
                error!("Sink '{}' failed to finish: {}", sink.name(), e);
            }
        }
        info!(
            "Monitor stopped after {} samples, {} tolerance breaches",
            report.samples,
            report.breaches.len()
        );
    }
}

/// Next keyboard control; pends forever once input is gone.
async fn next_control(controls: &mut Option<mpsc::Receiver<Control>>) -> Option<Control> {
    match controls {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

/// A snapshot arriving counts as ready: it can only come from a live
/// connection.
async fn wait_ready(
    readiness: &Readiness,
    snapshots: &mut mpsc::Receiver<Snapshot>,
    cancel: &CancellationToken,
) -> Start {
    let mut rx = readiness.subscribe();
    if rx.borrow().is_ready() {
        info!("Variable server already connected");
        return Start::Ready;
    }

    warn!("Waiting for connection... Current: {}", *rx.borrow());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Start::Stop,
            changed = rx.changed() => {
                if changed.is_err() {
                    debug!("Readiness tracker dropped");
                    return Start::Ready;
                }
                let state = rx.borrow().clone();
                if state.is_ready() {
                    info!("Variable server connected");
                    return Start::Ready;
                }
                warn!("Still not ready: {}", state);
            }
            next = snapshots.recv() => match next {
                Some(snapshot) => return Start::First(snapshot),
                None => {
                    warn!("Snapshot stream closed before the connection became ready");
                    return Start::Stop;
                }
            },
            _ = sleep(READINESS_REMINDER) => {
                warn!("Still waiting for connection... Current: {}", *rx.borrow());
            }
        }
    }
}
