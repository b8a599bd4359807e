//! Keyboard controls for a running dashboard.
//!
//! Each line typed on stdin is one command:
//!
//! | Key | Action |
//! |---|---|
//! | `+` | zoom in |
//! | `-` | zoom out |
//! | `r` | reset zoom |
//! | `3` | toggle 2D / 3D |
//! | `a` | next axis pair (2D) |
//! | `c` | clear the trajectory history |
//! | `s` | save the history to CSV now |

use std::{fmt, io::BufRead, str::FromStr, thread};

use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const HELP: &str =
    "Controls: + zoom in, - zoom out, r reset zoom, 3 toggle 2D/3D, a next axes, c clear, s save";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    ZoomIn,
    ZoomOut,
    ResetZoom,
    ToggleDimensions,
    CycleAxes,
    Clear,
    Save,
}

impl Control {
    /// Controls that only change how the plot is drawn.
    pub fn is_view(&self) -> bool {
        !matches!(self, Control::Clear | Control::Save)
    }
}

impl FromStr for Control {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "+" | "=" => Ok(Control::ZoomIn),
            "-" | "_" => Ok(Control::ZoomOut),
            "r" | "reset" => Ok(Control::ResetZoom),
            "3" | "3d" | "2d" => Ok(Control::ToggleDimensions),
            "a" | "axes" => Ok(Control::CycleAxes),
            "c" | "clear" => Ok(Control::Clear),
            "s" | "save" => Ok(Control::Save),
            other => Err(format!("Unknown control '{other}'. {HELP}")),
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Control::ZoomIn => "zoom in",
            Control::ZoomOut => "zoom out",
            Control::ResetZoom => "reset zoom",
            Control::ToggleDimensions => "toggle 2D/3D",
            Control::CycleAxes => "next axes",
            Control::Clear => "clear trajectory",
            Control::Save => "save data",
        };
        f.write_str(name)
    }
}

/// Reads controls from `input` on a dedicated thread.
///
/// Blocking reads stay off the runtime so a terminal waiting for input never
/// holds up shutdown. The channel closes at end of input.
pub fn spawn_reader<R>(input: R) -> std::io::Result<mpsc::Receiver<Control>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    thread::Builder::new()
        .name("trickwatch-controls".into())
        .spawn(move || {
            for line in input.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Control input failed: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Control>() {
                    Ok(control) => {
                        if tx.blocking_send(control).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("{e}"),
                }
            }
            debug!("Control input closed");
        })?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_parse_keys() {
        let cases = [
            ("+", Control::ZoomIn),
            ("-", Control::ZoomOut),
            (" R ", Control::ResetZoom),
            ("3", Control::ToggleDimensions),
            ("a", Control::CycleAxes),
            ("clear", Control::Clear),
            ("s", Control::Save),
        ];
        for (key, control) in cases {
            assert_eq!(key.parse::<Control>(), Ok(control), "key {key:?}");
        }
        assert!("x".parse::<Control>().unwrap_err().contains("Controls:"));
        assert!(Control::CycleAxes.is_view());
        assert!(!Control::Save.is_view());
    }

    #[tokio::test]
    async fn test_reader_skips_unknown_and_closes_at_eof() {
        let input = Cursor::new("+\n\nbogus\n3\ns\n");
        let mut rx = spawn_reader(input).unwrap();

        let mut got = Vec::new();
        while let Some(control) = rx.recv().await {
            got.push(control);
        }
        assert_eq!(got, [Control::ZoomIn, Control::ToggleDimensions, Control::Save]);
    }
}
