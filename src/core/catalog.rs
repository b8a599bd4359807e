//! The catalog of terms a dashboard can show.
//!
//! Built from `[catalog]` in the config, optionally extended by a terms file
//! of `Label : variable` lines. The catalog owns the label list used for
//! autocomplete and produces the variable server subscription.

use std::{
    fs,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info};
use trickwatch_varserver::{Channel, Subscription, SubscriptionError};

use crate::config::terms::CatalogConfig;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Cannot read terms file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin}:{line}: {reason}")]
    Line {
        origin: String,
        line: usize,
        reason: String,
    },

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error("Time term '{0}' is not in the catalog")]
    MissingTimeTerm(String),

    #[error("Time term '{0}' must be a scalar")]
    VectorTimeTerm(String),

    #[error("Unknown term '{0}'")]
    UnknownTerm(String),

    #[error("Term '{0}' is not a vector")]
    NotAVector(String),
}

#[derive(Debug, Clone)]
pub struct Catalog {
    subscription: Subscription,
    time_term: String,
}

impl Catalog {
    /// Validates labels and the time term.
    pub fn new(channels: Vec<Channel>, time_term: impl Into<String>) -> Result<Self, CatalogError> {
        let time_term = time_term.into();
        let subscription = Subscription::new(channels)?;
        match subscription.channel(&time_term) {
            None => return Err(CatalogError::MissingTimeTerm(time_term)),
            Some(channel) if channel.is_vector() => {
                return Err(CatalogError::VectorTimeTerm(time_term))
            }
            Some(_) => {}
        }
        Ok(Catalog {
            subscription,
            time_term,
        })
    }

    /// Configured terms followed by the terms file, if any.
    pub fn from_config(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let mut channels = config
            .terms
            .iter()
            .map(|t| t.to_channel())
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(path) = &config.terms_file {
            let extra = load_terms_file(path)?;
            info!("Loaded {} terms from {}", extra.len(), path.display());
            channels.extend(extra);
        }

        let catalog = Catalog::new(channels, config.time_term.clone())?;
        debug!(
            "Catalog has {} terms ({} variables)",
            catalog.len(),
            catalog.subscription.width()
        );
        Ok(catalog)
    }

    pub fn time_term(&self) -> &str {
        &self.time_term
    }

    pub fn channels(&self) -> &[Channel] {
        self.subscription.channels()
    }

    pub fn get(&self, label: &str) -> Option<&Channel> {
        self.subscription.channel(label)
    }

    /// Like [`Catalog::get`] but an unknown label is an error.
    pub fn require(&self, label: &str) -> Result<&Channel, CatalogError> {
        self.get(label)
            .ok_or_else(|| CatalogError::UnknownTerm(label.to_string()))
    }

    /// Like [`Catalog::require`] but the term must also be a vector.
    pub fn require_vector(&self, label: &str) -> Result<&Channel, CatalogError> {
        let channel = self.require(label)?;
        if !channel.is_vector() {
            return Err(CatalogError::NotAVector(label.to_string()));
        }
        Ok(channel)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.channels().iter().map(|c| c.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.channels().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels().is_empty()
    }

    /// Labels starting with `prefix`, ignoring case, in catalog order.
    /// Surrounding whitespace in `prefix` is ignored; empty matches all.
    pub fn search(&self, prefix: &str) -> Vec<&str> {
        let prefix = prefix.trim().to_lowercase();
        self.labels()
            .filter(|label| label.to_lowercase().starts_with(&prefix))
            .collect()
    }

    pub fn subscription(&self) -> Subscription {
        self.subscription.clone()
    }
}

pub fn load_terms_file(path: &Path) -> Result<Vec<Channel>, CatalogError> {
    let text = fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_terms(&text, &path.display().to_string())
}

/// Parses `Label : variable` lines. Blank lines and `#` comments are skipped.
pub fn parse_terms(text: &str, origin: &str) -> Result<Vec<Channel>, CatalogError> {
    let mut channels = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let err = |reason: String| CatalogError::Line {
            origin: origin.to_string(),
            line: index + 1,
            reason,
        };
        let (label, notation) = line
            .split_once(':')
            .ok_or_else(|| err("expected 'Label : variable'".into()))?;
        let channel = Channel::parse_notation(label, notation).map_err(|e| err(e.to_string()))?;
        channels.push(channel);
    }
    Ok(channels)
}
