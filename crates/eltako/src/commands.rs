use serde::Deserialize;

use crate::error::{Error, Result};

/// A high-level command as received from the command bus.
///
/// The `action` field is case-insensitive; an absent or empty action
/// defaults to `set`.
#[derive(Debug, Deserialize)]
pub struct RawCommand {
    /// Requested action.
    #[serde(default)]
    pub action: String,
    /// Target position in percent, used by `set` and `tilt`.
    #[serde(default)]
    pub position: i32,
}

/// The low-level instruction a shading actor consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Drive the blind to a position.
    Set,
    /// Run the tilt emulation sequence around a position.
    Tilt,
}

/// A normalized low-level command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Instruction kind.
    pub action: Action,
    /// Target position in percent.
    pub position: i32,
}

impl Command {
    const fn set(position: i32) -> Self {
        Self {
            action: Action::Set,
            position,
        }
    }

    const fn tilt(position: i32) -> Self {
        Self {
            action: Action::Tilt,
            position,
        }
    }
}

/// Parses a `JSON` payload from the command bus into a [`Command`].
///
/// The mapping is a fixed table: `close` drives to 0, `open` to 100,
/// `set` to the given position, `tilt` runs the tilt sequence at the
/// given position, and `closeAndOpenBlinds` tilts at 0.
///
/// # Errors
///
/// A [`crate::error::ErrorKind::Validation`] error when the payload is
/// not valid `JSON` or names an unknown action.
pub fn parse(payload: &[u8]) -> Result<Command> {
    let raw: RawCommand = serde_json::from_slice(payload)
        .map_err(|e| Error::validation(format!("malformed command: {e}")))?;

    match raw.action.to_lowercase().as_str() {
        "close" => Ok(Command::set(0)),
        "open" => Ok(Command::set(100)),
        "set" | "" => Ok(Command::set(raw.position)),
        "closeandopenblinds" => Ok(Command::tilt(0)),
        "tilt" => Ok(Command::tilt(raw.position)),
        action => Err(Error::validation(format!("invalid action `{action}`"))),
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;

    use super::{Command, parse};

    fn parse_str(payload: &str) -> crate::error::Result<Command> {
        parse(payload.as_bytes())
    }

    #[test]
    fn close_drives_to_zero() {
        assert_eq!(parse_str(r#"{"action":"close"}"#), Ok(Command::set(0)));
    }

    #[test]
    fn open_drives_to_hundred() {
        assert_eq!(parse_str(r#"{"action":"open"}"#), Ok(Command::set(100)));
    }

    #[test]
    fn set_uses_the_given_position() {
        assert_eq!(
            parse_str(r#"{"action":"set","position":30}"#),
            Ok(Command::set(30))
        );
    }

    #[test]
    fn empty_action_defaults_to_set() {
        assert_eq!(
            parse_str(r#"{"action":"","position":42}"#),
            Ok(Command::set(42))
        );
        assert_eq!(parse_str(r#"{"position":42}"#), Ok(Command::set(42)));
    }

    #[test]
    fn action_matching_is_case_insensitive() {
        assert_eq!(
            parse_str(r#"{"action":"CloseAndOpenBlinds"}"#),
            Ok(Command::tilt(0))
        );
        assert_eq!(
            parse_str(r#"{"action":"TILT","position":50}"#),
            Ok(Command::tilt(50))
        );
    }

    #[test]
    fn unknown_action_fails_validation() {
        let error = parse_str(r#"{"action":"bogus"}"#).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[test]
    fn malformed_json_fails_validation() {
        let error = parse_str("not json").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);
    }
}
