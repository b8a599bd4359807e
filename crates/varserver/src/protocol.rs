//! Wire format of the Trick variable server.
//!
//! The client talks to the server in plain text. Commands are Python-like
//! calls terminated by a newline:
//!
//! ```text
//! trick.var_pause()
//! trick.var_clear()
//! trick.var_add("Sim.Orion_1.NEnv.itsSTimeModel.itsSTimeOutput.TimeData.UTC_Seconds_From_Epoch")
//! trick.var_unpause()
//! ```
//!
//! The server answers with one line per cycle. Fields are separated by tabs;
//! the first field is a message indicator and the remaining fields are the
//! subscribed values in the order they were added:
//!
//! ```text
//! 0\t6.7781e+06\t0.0\t0.0\t...\t7.9e+08\n
//! ```

use std::fmt;

use super::error::ProtocolError;

/// A single variable server directive.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Pause,
    Clear,
    Add(String),
    Cycle(f64),
    Unpause,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Pause => f.write_str("trick.var_pause()"),
            Command::Clear => f.write_str("trick.var_clear()"),
            Command::Add(name) => write!(f, "trick.var_add(\"{name}\")"),
            Command::Cycle(seconds) => write!(f, "trick.var_cycle({seconds})"),
            Command::Unpause => f.write_str("trick.var_unpause()"),
        }
    }
}

impl Command {
    /// The command as sent on the socket, newline included.
    pub fn to_wire(&self) -> String {
        format!("{self}\n")
    }
}

/// Commands that replace whatever the server is streaming with `names`.
///
/// Pausing first keeps the server from emitting half-built lines while the
/// variable list is being changed.
pub fn subscribe_script<S: AsRef<str>>(names: &[S], cycle: Option<f64>) -> Vec<Command> {
    let mut script = Vec::with_capacity(names.len() + 4);
    script.push(Command::Pause);
    script.push(Command::Clear);
    script.extend(names.iter().map(|n| Command::Add(n.as_ref().to_string())));
    if let Some(seconds) = cycle {
        script.push(Command::Cycle(seconds));
    }
    script.push(Command::Unpause);
    script
}

/// Commands sent before hanging up.
pub fn teardown_script() -> Vec<Command> {
    vec![Command::Pause, Command::Clear]
}

/// Concatenates a script into one buffer so it goes out in a single write.
pub fn encode(script: &[Command]) -> String {
    script.iter().map(Command::to_wire).collect()
}

/// One raw line from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub indicator: String,
    pub fields: Vec<String>,
}

impl Frame {
    /// Splits a received line. Trailing `\r` and `\n` are ignored.
    pub fn parse(line: &str) -> Result<Frame, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let mut parts = line.split('\t');
        let indicator = parts.next().unwrap_or_default().to_string();
        let fields = parts.map(str::to_string).collect();
        Ok(Frame { indicator, fields })
    }

    /// The first `expected` value fields as numbers.
    ///
    /// Fields past `expected` are ignored. Indexes in errors count the
    /// indicator as field 0, matching the position on the wire.
    pub fn values(&self, expected: usize) -> Result<Vec<f64>, ProtocolError> {
        if self.fields.len() < expected {
            return Err(ProtocolError::Incomplete {
                expected,
                got: self.fields.len(),
            });
        }
        self.fields[..expected]
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                raw.trim()
                    .parse::<f64>()
                    .map_err(|_| ProtocolError::InvalidNumber {
                        index: i + 1,
                        value: raw.clone(),
                    })
            })
            .collect()
    }
}
