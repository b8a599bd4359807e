//! CSV export and per-term log file settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory CSV files are written to.
    pub csv_dir: PathBuf,

    /// File name prefix; the local timestamp and `.csv` are appended.
    #[validate(length(min = 1, max = 128, message = "CSV prefix must be between 1 and 128 characters"))]
    pub csv_prefix: String,

    /// Write the history to CSV when the monitor stops.
    pub auto_save: bool,

    /// Directory for per-term `.txt` logs.
    pub term_log_dir: PathBuf,

    /// Terms whose every value is appended to `<term_log_dir>/<label>.txt`.
    /// The time term is added automatically when this is not empty.
    pub log_terms: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            csv_dir: PathBuf::from("."),
            csv_prefix: "orion_trajectory".into(),
            auto_save: true,
            term_log_dir: PathBuf::from("./graphing_data"),
            log_terms: Vec::new(),
        }
    }
}
