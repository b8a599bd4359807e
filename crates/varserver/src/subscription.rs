//! Named outputs built on top of the positional variable list.
//!
//! The server only knows an ordered list of variable names. Dashboards think
//! in labelled channels: a scalar such as `"UTC Seconds (s)"`, or a 3-vector
//! such as `"Position (m)"` that expands to `...R_CG_from_ECI_in_ECI[0]`,
//! `[1]` and `[2]`. A [`Subscription`] keeps that mapping and turns every
//! [`Frame`] into a labelled [`Snapshot`].

use std::{collections::HashSet, fmt, str::FromStr};

use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};

use super::{
    error::{ProtocolError, SubscriptionError},
    protocol::Frame,
};

/// Which part of a value to read.
///
/// `N` is the scalar itself, or the Euclidean norm of a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Component {
    X,
    Y,
    Z,
    N,
}

impl Component {
    pub const AXES: [Component; 3] = [Component::X, Component::Y, Component::Z];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::X => "X",
            Component::Y => "Y",
            Component::Z => "Z",
            Component::N => "N",
        }
    }

    /// Index into a vector, `None` for `N`.
    pub fn index(&self) -> Option<usize> {
        match self {
            Component::X => Some(0),
            Component::Y => Some(1),
            Component::Z => Some(2),
            Component::N => None,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "X" => Ok(Component::X),
            "Y" => Ok(Component::Y),
            "Z" => Ok(Component::Z),
            "N" => Ok(Component::N),
            other => Err(format!("unknown component '{other}', expected X, Y, Z or N")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelKind {
    Scalar { variable: String },
    Vector { base: String, components: [String; 3] },
}

/// A labelled output made of one or three server variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub label: String,
    pub kind: ChannelKind,
}

impl Channel {
    pub fn scalar(label: impl Into<String>, variable: impl Into<String>) -> Self {
        Channel {
            label: label.into(),
            kind: ChannelKind::Scalar {
                variable: variable.into(),
            },
        }
    }

    /// Vector whose components are `base` followed by `[0]`, `[1]`, `[2]`.
    pub fn vector(label: impl Into<String>, base: impl Into<String>) -> Self {
        Channel {
            label: label.into(),
            kind: ChannelKind::Vector {
                base: base.into(),
                components: ["[0]".into(), "[1]".into(), "[2]".into()],
            },
        }
    }

    /// Parses the compact notation used in term lists.
    ///
    /// `"Base,[0], [1], [2]"` is a vector with those three suffixes; a term
    /// without a comma is a scalar variable.
    pub fn parse_notation(label: &str, notation: &str) -> Result<Self, SubscriptionError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(SubscriptionError::Empty("label"));
        }

        let parts: Vec<&str> = notation.split(',').map(str::trim).collect();
        let base = parts[0];
        if base.is_empty() {
            return Err(SubscriptionError::Empty("variable"));
        }

        let channel = match parts.len() {
            1 => Channel::scalar(label, base),
            4 => Channel {
                label: label.to_string(),
                kind: ChannelKind::Vector {
                    base: base.to_string(),
                    components: [
                        parts[1].to_string(),
                        parts[2].to_string(),
                        parts[3].to_string(),
                    ],
                },
            },
            n => {
                return Err(SubscriptionError::ComponentCount {
                    label: label.to_string(),
                    got: n - 1,
                })
            }
        };
        channel.check_variables()?;
        Ok(channel)
    }

    /// Full server variable names, in wire order.
    pub fn variables(&self) -> Vec<String> {
        match &self.kind {
            ChannelKind::Scalar { variable } => vec![variable.clone()],
            ChannelKind::Vector { base, components } => {
                components.iter().map(|c| format!("{base}{c}")).collect()
            }
        }
    }

    /// Number of value fields this channel consumes.
    pub fn width(&self) -> usize {
        match self.kind {
            ChannelKind::Scalar { .. } => 1,
            ChannelKind::Vector { .. } => 3,
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self.kind, ChannelKind::Vector { .. })
    }

    fn check_variables(&self) -> Result<(), SubscriptionError> {
        for variable in self.variables() {
            if variable.trim().is_empty() {
                return Err(SubscriptionError::Empty("variable"));
            }
            if variable.contains(['"', '\n', '\r']) {
                return Err(SubscriptionError::InvalidVariable(variable));
            }
        }
        Ok(())
    }
}

/// A decoded channel value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(f64),
    Vector([f64; 3]),
}

impl Value {
    /// Reads one component. Scalars only answer to `N`.
    pub fn component(&self, component: Component) -> Option<f64> {
        match (self, component.index()) {
            (Value::Scalar(v), None) => Some(*v),
            (Value::Scalar(_), Some(_)) => None,
            (Value::Vector(v), Some(i)) => Some(v[i]),
            (Value::Vector(_), None) => Some(self.magnitude()),
        }
    }

    /// Absolute value for scalars, Euclidean norm for vectors.
    pub fn magnitude(&self) -> f64 {
        match self {
            Value::Scalar(v) => v.abs(),
            Value::Vector([x, y, z]) => (x * x + y * y + z * z).sqrt(),
        }
    }
}

/// All channel values from one server line, in subscription order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    values: Vec<(String, Value)>,
}

impl Snapshot {
    pub fn new(values: Vec<(String, Value)>) -> Self {
        Snapshot { values }
    }

    pub fn get(&self, label: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v)
    }

    pub fn component(&self, label: &str, component: Component) -> Option<f64> {
        self.get(label).and_then(|v| v.component(component))
    }

    pub fn magnitude(&self, label: &str) -> Option<f64> {
        self.get(label).map(Value::magnitude)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(l, v)| (l.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (label, value) in &self.values {
            map.serialize_entry(label, value)?;
        }
        map.end()
    }
}

/// The ordered set of channels requested from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    channels: Vec<Channel>,
    width: usize,
}

impl Subscription {
    pub fn new(channels: Vec<Channel>) -> Result<Self, SubscriptionError> {
        if channels.is_empty() {
            return Err(SubscriptionError::NoChannels);
        }

        let mut seen = HashSet::new();
        for channel in &channels {
            if !seen.insert(channel.label.as_str()) {
                return Err(SubscriptionError::DuplicateLabel(channel.label.clone()));
            }
            channel.check_variables()?;
        }

        let width = channels.iter().map(Channel::width).sum();
        Ok(Subscription { channels, width })
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, label: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.label == label)
    }

    /// Flat list of server variables, in the order values come back.
    pub fn variables(&self) -> Vec<String> {
        self.channels.iter().flat_map(Channel::variables).collect()
    }

    /// Number of value fields a complete line carries.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Assigns positional fields to channels.
    pub fn decode(&self, frame: &Frame) -> Result<Snapshot, ProtocolError> {
        let fields = frame.values(self.width)?;
        let mut offset = 0;
        let values = self
            .channels
            .iter()
            .map(|channel| {
                let value = match channel.kind {
                    ChannelKind::Scalar { .. } => Value::Scalar(fields[offset]),
                    ChannelKind::Vector { .. } => {
                        Value::Vector([fields[offset], fields[offset + 1], fields[offset + 2]])
                    }
                };
                offset += channel.width();
                (channel.label.clone(), value)
            })
            .collect();
        Ok(Snapshot { values })
    }
}
