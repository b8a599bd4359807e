//! Tolerance alerts.
//!
//! A rule watches one component of one term and trips when the value leaves
//! the band `[expected - below, expected + above]`. Each rule trips at most
//! once; afterwards it is kept only as a record of when and how it tripped.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use trickwatch_varserver::Component;
use validator::Validate;

use super::{catalog::Catalog, history::Sample};

#[derive(Debug, Error, PartialEq)]
pub enum ToleranceError {
    #[error("Unknown term '{0}'")]
    UnknownTerm(String),

    #[error("Term '{term}' is a scalar and has no {component} component")]
    ComponentMismatch { term: String, component: Component },

    #[error("Cannot use the current value of '{0}' before any data has arrived")]
    NoData(String),
}

/// Centre of the tolerance band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NumberOrWord", into = "NumberOrWord")]
pub enum Expected {
    Value(f64),
    /// The live value at the moment the rule is armed.
    Current,
}

/// When a rule starts being checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NumberOrWord", into = "NumberOrWord")]
pub enum StartTime {
    #[default]
    Now,
    /// Once simulation time reaches this value.
    At(f64),
}

impl StartTime {
    /// Whether checking has begun at `sim_time`. Never true for `At` while the
    /// time is unknown.
    pub fn reached(&self, sim_time: Option<f64>) -> bool {
        match self {
            StartTime::Now => true,
            StartTime::At(start) => sim_time.is_some_and(|t| t >= *start),
        }
    }
}

/// Config spelling for [`Expected`] and [`StartTime`]: a number or a keyword.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum NumberOrWord {
    Number(f64),
    Word(String),
}

impl TryFrom<NumberOrWord> for Expected {
    type Error = String;

    fn try_from(raw: NumberOrWord) -> Result<Self, Self::Error> {
        match raw {
            NumberOrWord::Number(v) => Ok(Expected::Value(v)),
            NumberOrWord::Word(w) if w.trim().eq_ignore_ascii_case("current") => Ok(Expected::Current),
            NumberOrWord::Word(w) => Err(format!("expected a number or \"current\", got '{w}'")),
        }
    }
}

impl From<Expected> for NumberOrWord {
    fn from(value: Expected) -> Self {
        match value {
            Expected::Value(v) => NumberOrWord::Number(v),
            Expected::Current => NumberOrWord::Word("current".into()),
        }
    }
}

impl TryFrom<NumberOrWord> for StartTime {
    type Error = String;

    fn try_from(raw: NumberOrWord) -> Result<Self, Self::Error> {
        match raw {
            NumberOrWord::Number(t) => Ok(StartTime::At(t)),
            NumberOrWord::Word(w) if w.trim().eq_ignore_ascii_case("now") => Ok(StartTime::Now),
            NumberOrWord::Word(w) => Err(format!("expected a time or \"now\", got '{w}'")),
        }
    }
}

impl From<StartTime> for NumberOrWord {
    fn from(value: StartTime) -> Self {
        match value {
            StartTime::Now => NumberOrWord::Word("now".into()),
            StartTime::At(t) => NumberOrWord::Number(t),
        }
    }
}

fn default_component() -> Component {
    Component::N
}

/// A tolerance as configured.
///
/// ```toml
/// [[monitor.tolerances]]
/// term = "Position (m)"
/// component = "Z"
/// expected = "current"
/// above = 500.0
/// below = 500.0
/// start_time = 7.9e8
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ToleranceRule {
    #[validate(length(min = 1, message = "Tolerance term must not be empty"))]
    pub term: String,

    #[serde(default = "default_component")]
    pub component: Component,

    pub expected: Expected,

    /// Allowed deviation above `expected`.
    #[validate(range(min = 0.0, message = "Deviation above must be non-negative"))]
    pub above: f64,

    /// Allowed deviation below `expected`.
    #[validate(range(min = 0.0, message = "Deviation below must be non-negative"))]
    pub below: f64,

    #[serde(default)]
    pub start_time: StartTime,
}

/// Which side of the band was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Max,
    Min,
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Max => f.write_str("MAX"),
            Limit::Min => f.write_str("MIN"),
        }
    }
}

/// A tripped rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub term: String,
    pub component: Component,
    pub limit: Limit,
    /// The bound that was crossed.
    pub bound: f64,
    /// The value that crossed it.
    pub value: f64,
    /// Simulation time of the sample, if known.
    pub sim_time: Option<f64>,
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) breached {} tolerance of {} and reached {}",
            self.term, self.component, self.limit, self.bound, self.value
        )
    }
}

/// A rule with its expected value resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmedRule {
    pub rule: ToleranceRule,
    pub expected: f64,
}

impl ArmedRule {
    pub fn upper(&self) -> f64 {
        self.expected + self.rule.above
    }

    pub fn lower(&self) -> f64 {
        self.expected - self.rule.below
    }

    fn check(&self, value: f64) -> Option<(Limit, f64)> {
        if value > self.upper() {
            Some((Limit::Max, self.upper()))
        } else if value < self.lower() {
            Some((Limit::Min, self.lower()))
        } else {
            None
        }
    }
}

/// Armed and tripped tolerances for one dashboard.
#[derive(Debug, Clone, Default)]
pub struct ToleranceMonitor {
    /// Term label -> is vector.
    terms: HashMap<String, bool>,
    armed: Vec<ArmedRule>,
    tripped: Vec<Breach>,
}

impl ToleranceMonitor {
    pub fn new(catalog: &Catalog) -> Self {
        ToleranceMonitor {
            terms: catalog
                .channels()
                .iter()
                .map(|c| (c.label.clone(), c.is_vector()))
                .collect(),
            armed: Vec::new(),
            tripped: Vec::new(),
        }
    }

    /// Checks the rule against the catalog and resolves `Expected::Current`
    /// from `latest`.
    pub fn arm(&mut self, rule: ToleranceRule, latest: Option<&Sample>) -> Result<&ArmedRule, ToleranceError> {
        let is_vector = *self
            .terms
            .get(&rule.term)
            .ok_or_else(|| ToleranceError::UnknownTerm(rule.term.clone()))?;
        if !is_vector && rule.component != Component::N {
            return Err(ToleranceError::ComponentMismatch {
                term: rule.term.clone(),
                component: rule.component,
            });
        }

        let expected = match rule.expected {
            Expected::Value(v) => v,
            Expected::Current => latest
                .and_then(|s| s.snapshot.component(&rule.term, rule.component))
                .ok_or_else(|| ToleranceError::NoData(rule.term.clone()))?,
        };

        info!(
            "Tolerance armed on {} ({}): [{}, {}]",
            rule.term,
            rule.component,
            expected - rule.below,
            expected + rule.above
        );
        self.armed.push(ArmedRule { rule, expected });
        let last = self.armed.len() - 1;
        Ok(&self.armed[last])
    }

    /// Checks every active rule against `sample`. Rules that trip are
    /// removed from the armed set and returned.
    pub fn evaluate(&mut self, sample: &Sample) -> Vec<Breach> {
        let mut breaches = Vec::new();
        self.armed.retain(|armed| {
            if !armed.rule.start_time.reached(sample.sim_time) {
                return true;
            }
            let Some(value) = sample
                .snapshot
                .component(&armed.rule.term, armed.rule.component)
            else {
                return true;
            };
            match armed.check(value) {
                None => true,
                Some((limit, bound)) => {
                    breaches.push(Breach {
                        term: armed.rule.term.clone(),
                        component: armed.rule.component,
                        limit,
                        bound,
                        value,
                        sim_time: sample.sim_time,
                    });
                    false
                }
            }
        });

        for breach in &breaches {
            warn!("Tolerance tripped: {breach}");
        }
        self.tripped.extend(breaches.iter().cloned());
        breaches
    }

    pub fn armed(&self) -> &[ArmedRule] {
        &self.armed
    }

    pub fn tripped(&self) -> &[Breach] {
        &self.tripped
    }
}
