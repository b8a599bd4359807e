//! Writing telemetry to disk.
//!
//! - [`CsvExporter`] dumps the whole history to a timestamped CSV file, on
//!   request or automatically when the monitor stops.
//! - [`TermLogger`] appends every new value of selected terms to one text
//!   file per term, for feeding external plotting tools while the
//!   simulation runs.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use time::{macros::format_description, OffsetDateTime};
use tracing::{debug, info};
use trickwatch_varserver::{ChannelKind, Component, Snapshot, Value};

use super::{
    catalog::{Catalog, CatalogError},
    history::{History, Sample},
};
use crate::config::export::ExportConfig;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Quotes a CSV field when it contains a separator, quote or line break.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_line(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

#[derive(Debug, Clone)]
pub struct CsvExporter {
    dir: PathBuf,
    prefix: String,
}

impl CsvExporter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        CsvExporter {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        CsvExporter::new(&config.csv_dir, &config.csv_prefix)
    }

    /// `<prefix>_YYYY-MM-DD_HH-MM-SS.csv`
    pub fn file_name(&self, stamp: OffsetDateTime) -> Result<String, ExportError> {
        let stamp = stamp.format(format_description!(
            "[year]-[month]-[day]_[hour]-[minute]-[second]"
        ))?;
        Ok(format!("{}_{stamp}.csv", self.prefix))
    }

    /// Time column, then every other term; vectors take three columns.
    pub fn header(catalog: &Catalog) -> Vec<String> {
        let mut header = vec![catalog.time_term().to_string()];
        for channel in catalog.channels() {
            if channel.label == catalog.time_term() {
                continue;
            }
            match channel.kind {
                ChannelKind::Scalar { .. } => header.push(channel.label.clone()),
                ChannelKind::Vector { .. } => header.extend(
                    Component::AXES
                        .iter()
                        .map(|c| format!("{} {c}", channel.label)),
                ),
            }
        }
        header
    }

    /// One row in [`CsvExporter::header`] order. Missing values stay empty.
    pub fn row(sample: &Sample, catalog: &Catalog) -> Vec<String> {
        let text = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        let mut row = vec![text(sample.sim_time)];
        for channel in catalog.channels() {
            if channel.label == catalog.time_term() {
                continue;
            }
            match channel.kind {
                ChannelKind::Scalar { .. } => {
                    row.push(text(sample.snapshot.component(&channel.label, Component::N)))
                }
                ChannelKind::Vector { .. } => row.extend(
                    Component::AXES
                        .iter()
                        .map(|c| text(sample.snapshot.component(&channel.label, *c))),
                ),
            }
        }
        row
    }

    pub fn render(history: &History, catalog: &Catalog) -> String {
        let mut out = csv_line(&Self::header(catalog));
        for sample in history.iter() {
            out.push_str(&csv_line(&Self::row(sample, catalog)));
        }
        out
    }

    /// Saves with the current local time in the file name.
    pub fn save(&self, history: &History, catalog: &Catalog) -> Result<Option<PathBuf>, ExportError> {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        self.save_at(history, catalog, now)
    }

    /// Writes the history and returns the path, or `None` when the history
    /// is empty and nothing was written.
    pub fn save_at(
        &self,
        history: &History,
        catalog: &Catalog,
        stamp: OffsetDateTime,
    ) -> Result<Option<PathBuf>, ExportError> {
        if history.is_empty() {
            debug!("History is empty, no CSV written");
            return Ok(None);
        }
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let path = self.dir.join(self.file_name(stamp)?);
        fs::write(&path, Self::render(history, catalog)).map_err(io_err(&path))?;
        info!("Saved {} samples to {}", history.len(), path.display());
        Ok(Some(path))
    }
}

/// Appends values of selected terms to `<dir>/<label>.txt`.
#[derive(Debug, Clone)]
pub struct TermLogger {
    dir: PathBuf,
    terms: Vec<String>,
}

impl TermLogger {
    /// Checks every term against the catalog. A non-empty selection always
    /// includes the time term so the logs can be lined up.
    pub fn new(dir: impl Into<PathBuf>, terms: &[String], catalog: &Catalog) -> Result<Self, ExportError> {
        let mut selected = Vec::with_capacity(terms.len() + 1);
        for term in terms {
            catalog.require(term)?;
            if !selected.contains(term) {
                selected.push(term.clone());
            }
        }
        let time_term = catalog.time_term().to_string();
        if !selected.is_empty() && !selected.contains(&time_term) {
            selected.push(time_term);
        }
        Ok(TermLogger {
            dir: dir.into(),
            terms: selected,
        })
    }

    pub fn from_config(config: &ExportConfig, catalog: &Catalog) -> Result<Self, ExportError> {
        TermLogger::new(&config.term_log_dir, &config.log_terms, catalog)
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Spaces become `_`; path separators too, so labels like
    /// `"Velocity (m/s)"` stay inside `dir`.
    pub fn path_for(&self, label: &str) -> PathBuf {
        let name: String = label
            .chars()
            .map(|c| match c {
                ' ' | '/' | '\\' => '_',
                c => c,
            })
            .collect();
        self.dir.join(format!("{name}.txt"))
    }

    /// Creates the directory and the (possibly empty) log files.
    pub fn prepare(&self) -> Result<(), ExportError> {
        if self.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        for term in &self.terms {
            let path = self.path_for(term);
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(io_err(&path))?;
        }
        debug!("Logging {} terms to {}", self.terms.len(), self.dir.display());
        Ok(())
    }

    /// Appends one line per selected term present in `snapshot`. Vectors
    /// are written as `x,y,z`.
    pub fn append(&self, snapshot: &Snapshot) -> Result<(), ExportError> {
        for term in &self.terms {
            let Some(value) = snapshot.get(term) else {
                continue;
            };
            let line = match value {
                Value::Scalar(v) => format!("{v}\n"),
                Value::Vector([x, y, z]) => format!("{x},{y},{z}\n"),
            };
            let path = self.path_for(term);
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(io_err(&path))?;
            file.write_all(line.as_bytes()).map_err(io_err(&path))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::config::terms::CatalogConfig;

    fn catalog() -> Catalog {
        Catalog::from_config(&CatalogConfig::default()).unwrap()
    }

    fn sample(t: f64) -> Sample {
        Sample::new(
            Snapshot::new(vec![
                ("Position (m)".into(), Value::Vector([1.0, 2.0, 3.0])),
                ("Velocity (m/s)".into(), Value::Vector([4.0, 5.0, 6.0])),
                ("Acceleration (m/s^2)".into(), Value::Vector([7.0, 8.0, 9.5])),
                ("UTC Seconds (s)".into(), Value::Scalar(t)),
            ]),
            "UTC Seconds (s)",
        )
    }

    #[test]
    fn test_header_expands_vectors() {
        let header = CsvExporter::header(&catalog());
        assert_eq!(header.len(), 10);
        assert_eq!(header[0], "UTC Seconds (s)");
        assert_eq!(header[1], "Position (m) X");
        assert_eq!(header[9], "Acceleration (m/s^2) Z");
    }

    #[test]
    fn test_row_order() {
        let row = CsvExporter::row(&sample(100.25), &catalog());
        assert_eq!(
            row,
            vec!["100.25", "1", "2", "3", "4", "5", "6", "7", "8", "9.5"]
        );
    }

    #[test]
    fn test_field_quoting() {
        assert_eq!(csv_field("Env Force X[Y,Z] (N) X"), "\"Env Force X[Y,Z] (N) X\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("plain"), "plain");
    }

    #[test]
    fn test_file_name() {
        let exporter = CsvExporter::new(".", "orion_trajectory");
        assert_eq!(
            exporter
                .file_name(datetime!(2024-03-05 07:08:09 UTC))
                .unwrap(),
            "orion_trajectory_2024-03-05_07-08-09.csv"
        );
    }

    #[test]
    fn test_save_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = CsvExporter::new(dir.path(), "run");
        let mut history = History::new(10);
        history.push(sample(1.0));
        history.push(sample(2.0));

        let path = exporter
            .save_at(&history, &catalog(), datetime!(2024-01-01 00:00:00 UTC))
            .unwrap()
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "run_2024-01-01_00-00-00.csv");

        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("UTC Seconds (s),Position (m) X,"));
        assert!(lines[2].starts_with("2,1,2,3,"));
    }

    #[test]
    fn test_empty_history_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = CsvExporter::new(dir.path(), "run");
        assert!(exporter
            .save(&History::new(10), &catalog())
            .unwrap()
            .is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_term_logger_adds_time_term() {
        let logger = TermLogger::new("/tmp", &["Position (m)".into()], &catalog()).unwrap();
        assert_eq!(logger.terms(), ["Position (m)", "UTC Seconds (s)"]);

        let empty = TermLogger::new("/tmp", &[], &catalog()).unwrap();
        assert!(empty.is_empty());

        assert!(matches!(
            TermLogger::new("/tmp", &["Nope".into()], &catalog()),
            Err(ExportError::Catalog(CatalogError::UnknownTerm(_)))
        ));
    }

    #[test]
    fn test_term_logger_appends() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TermLogger::new(
            dir.path().join("graphing_data"),
            &["Velocity (m/s)".into()],
            &catalog(),
        )
        .unwrap();
        logger.prepare().unwrap();
        logger.append(&sample(1.0).snapshot).unwrap();
        logger.append(&sample(2.0).snapshot).unwrap();

        let velocity = logger.path_for("Velocity (m/s)");
        assert!(velocity.ends_with("graphing_data/Velocity_(m_s).txt"));
        assert_eq!(fs::read_to_string(velocity).unwrap(), "4,5,6\n4,5,6\n");
        assert_eq!(
            fs::read_to_string(logger.path_for("UTC Seconds (s)")).unwrap(),
            "1\n2\n"
        );
    }
}
