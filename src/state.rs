// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The recorder's state machine, control-plane commands, and status
//! messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the four live states, plus the terminal `Closed` pseudo-state
/// reported on the status topic but never held as the Handler's own state
/// (closing always performs a `Stop` first, then the process exits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Running,
    Paused,
    Suspended,
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Running => "RUNNING",
            State::Paused => "PAUSED",
            State::Suspended => "SUSPENDED",
            State::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Reported on the status topic; `Closed`/`Unknown` never appear as a
/// Handler state but are valid values of `current`/`previous`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedState {
    Live(State),
    Closed,
    Unknown,
}

impl fmt::Display for ReportedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportedState::Live(s) => write!(f, "{s}"),
            ReportedState::Closed => f.write_str("CLOSED"),
            ReportedState::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// A parsed control-plane command (`spec §4.1`, `§6`).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Pause,
    Suspend,
    Stop,
    /// Permitted only in `Paused`. `next_state` comes from the optional
    /// JSON `args` field, e.g. `{"next_state":"RUNNING"}`.
    Event { next_state: Option<State> },
    Close,
    /// Any command string that doesn't match the enumeration above.
    Unknown(String),
}

/// Parse a command string and optional JSON `args` payload.
///
/// Matching is case-insensitive, per `spec §4.7`. Unknown strings become
/// `Command::Unknown` rather than an error: per `§4.1`, they are logged and
/// ignored by the Controller, never raised as a parse failure.
pub fn parse_command(command: &str, args: Option<&str>) -> Command {
    match command.to_ascii_lowercase().as_str() {
        "start" => Command::Start,
        "pause" => Command::Pause,
        "suspend" => Command::Suspend,
        "stop" => Command::Stop,
        "event" => Command::Event {
            next_state: args.and_then(parse_event_args),
        },
        "close" => Command::Close,
        other => Command::Unknown(other.to_string()),
    }
}

fn parse_event_args(args: &str) -> Option<State> {
    #[derive(Deserialize)]
    struct EventArgs {
        next_state: Option<String>,
    }
    let parsed: EventArgs = serde_json::from_str(args).ok()?;
    match parsed.next_state?.to_ascii_uppercase().as_str() {
        "RUNNING" => Some(State::Running),
        "STOPPED" => Some(State::Stopped),
        _ => None,
    }
}

/// Published on the status topic after every successful transition
/// (`spec §4.7`, testable property 10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    pub current: String,
    pub previous: String,
    pub info: Option<String>,
}

impl StatusMessage {
    pub fn new(previous: ReportedState, current: ReportedState, info: Option<String>) -> Self {
        Self {
            current: current.to_string(),
            previous: previous.to_string(),
            info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_case_insensitively() {
        assert_eq!(parse_command("START", None), Command::Start);
        assert_eq!(parse_command("Stop", None), Command::Stop);
        assert_eq!(parse_command("cLoSe", None), Command::Close);
    }

    #[test]
    fn unknown_command_is_not_an_error() {
        assert_eq!(
            parse_command("reticulate", None),
            Command::Unknown("reticulate".to_string())
        );
    }

    #[test]
    fn event_args_select_next_state() {
        let cmd = parse_command("event", Some(r#"{"next_state":"RUNNING"}"#));
        assert_eq!(
            cmd,
            Command::Event {
                next_state: Some(State::Running)
            }
        );
    }

    #[test]
    fn event_without_args_stays_paused() {
        assert_eq!(parse_command("event", None), Command::Event { next_state: None });
    }
}
