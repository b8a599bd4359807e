//! Term catalog configuration.
//!
//! A term is a labelled simulation variable. Scalars name one variable;
//! vectors name a base plus three component suffixes. Both the long form and
//! the compact comma notation are accepted:
//!
//! ```toml
//! [catalog]
//! time_term = "UTC Seconds (s)"
//!
//! [[catalog.terms]]
//! label = "UTC Seconds (s)"
//! variable = "Sim.Orion_1.NEnv.itsSTimeModel.itsSTimeOutput.TimeData.UTC_Seconds_From_Epoch"
//!
//! [[catalog.terms]]
//! label = "Position (m)"
//! variable = "Sim.Orion_1.Dyn.DVehModel.State.VState[0].R_CG_from_ECI_in_ECI"
//! components = ["[0]", "[1]", "[2]"]
//!
//! [[catalog.terms]]
//! label = "Ammonia 1 X[Y,Z] (N)"
//! variable = "Sim.Orion_1.CEV.itsCmModel.itsCmOutput.DVehEffectorData.ForceInEffFrame,[0][0], [0][1], [0][2]"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use trickwatch_varserver::{Channel, ChannelKind, SubscriptionError};
use validator::Validate;

const VSTATE: &str = "Sim.Orion_1.Dyn.DVehModel.State.VState[0]";
const UTC: &str = "Sim.Orion_1.NEnv.itsSTimeModel.itsSTimeOutput.TimeData.UTC_Seconds_From_Epoch";

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct TermConfig {
    #[validate(length(min = 1, message = "Term label must not be empty"))]
    pub label: String,

    #[validate(length(min = 1, message = "Term variable must not be empty"))]
    pub variable: String,

    /// Component suffixes appended to `variable`. Makes the term a vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(equal = 3, message = "A vector term needs exactly 3 components"))]
    pub components: Option<Vec<String>>,
}

impl TermConfig {
    pub fn scalar(label: &str, variable: &str) -> Self {
        TermConfig {
            label: label.into(),
            variable: variable.into(),
            components: None,
        }
    }

    pub fn vector(label: &str, variable: &str) -> Self {
        TermConfig {
            label: label.into(),
            variable: variable.into(),
            components: Some(vec!["[0]".into(), "[1]".into(), "[2]".into()]),
        }
    }

    pub fn to_channel(&self) -> Result<Channel, SubscriptionError> {
        match &self.components {
            None => Channel::parse_notation(&self.label, &self.variable),
            Some(c) => {
                let [x, y, z] = <[String; 3]>::try_from(c.clone()).map_err(|c| {
                    SubscriptionError::ComponentCount {
                        label: self.label.clone(),
                        got: c.len(),
                    }
                })?;
                Channel::parse_notation(
                    &self.label,
                    &format!("{},{x},{y},{z}", self.variable),
                )
            }
        }
    }

    pub fn from_channel(channel: &Channel) -> Self {
        match &channel.kind {
            ChannelKind::Scalar { variable } => TermConfig::scalar(&channel.label, variable),
            ChannelKind::Vector { base, components } => TermConfig {
                label: channel.label.clone(),
                variable: base.clone(),
                components: Some(components.to_vec()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CatalogConfig {
    #[validate(nested)]
    pub terms: Vec<TermConfig>,

    /// Label of the scalar term holding simulation time.
    #[validate(length(min = 1, message = "Time term must not be empty"))]
    pub time_term: String,

    /// Extra `Label : variable` lines appended after `terms`.
    pub terms_file: Option<PathBuf>,
}

impl Default for CatalogConfig {
    /// The Orion trajectory set.
    fn default() -> Self {
        CatalogConfig {
            terms: vec![
                TermConfig::vector("Position (m)", &format!("{VSTATE}.R_CG_from_ECI_in_ECI")),
                TermConfig::vector("Velocity (m/s)", &format!("{VSTATE}.V_CG_rel_ECI_in_ECI")),
                TermConfig::vector(
                    "Acceleration (m/s^2)",
                    &format!("{VSTATE}.A_CG_rel_ECI_in_ECI"),
                ),
                TermConfig::scalar("UTC Seconds (s)", UTC),
            ],
            time_term: "UTC Seconds (s)".into(),
            terms_file: None,
        }
    }
}
