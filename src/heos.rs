//! HEOS CLI adapter: URI-style request lines over TCP, one JSON line per reply
//!
//! Requests look like `heos://player/set_volume?pid=1&level=20\r\n`. Every
//! reply carries a `heos` header echoing the command path and a `result`
//! field; the command path is the correlation key.

use crate::command::Command;
use crate::error::{RemoteError, Result};
use crate::protocol::{Protocol, Reply};
use crate::session::{ConnectionState, SessionConfig};
use crate::subscription::DeviceEvent;
use crate::transport::Endpoint;
use crate::types::{Player, PlayerId};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write;
use std::time::Duration;

/// HEOS CLI control port
pub const HEOS_PORT: u16 = 1255;

const SCHEME: &str = "heos://";
const LINE_END: &str = "\r\n";
const SUCCESS: &str = "success";
const EVENT_PREFIX: &str = "event/";
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

/// HEOS commands this crate can send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeosCommand {
    GetPlayers,
    SetVolume,
    VolumeUp,
    VolumeDown,
    SetMute,
    ToggleMute,
    /// `browse/play_input`, the HEOS CLI path; some firmware examples use `player/play_input`
    PlayInput,
    RegisterForChangeEvents,
}

impl HeosCommand {
    /// Command path, which is also the correlation key of replies
    pub fn path(self) -> &'static str {
        match self {
            Self::GetPlayers => "player/get_players",
            Self::SetVolume => "player/set_volume",
            Self::VolumeUp => "player/volume_up",
            Self::VolumeDown => "player/volume_down",
            Self::SetMute => "player/set_mute",
            Self::ToggleMute => "player/toggle_mute",
            Self::PlayInput => "browse/play_input",
            Self::RegisterForChangeEvents => "system/register_for_change_events",
        }
    }
}

/// Build a command line for `kind` with query parameters in the given order
pub fn request(kind: HeosCommand, params: &[(&str, String)]) -> Command<HeosCommand> {
    let mut line = format!("{}{}", SCHEME, kind.path());
    for (i, (name, value)) in params.iter().enumerate() {
        let separator = if i == 0 { '?' } else { '&' };
        let _ = write!(line, "{}{}={}", separator, name, value);
    }
    line.push_str(LINE_END);

    Command::new(kind, line, kind.path())
}

/// A request line decoded back into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeosRequest {
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl HeosRequest {
    /// Parse `heos://group/command?k=v&k=v`, with or without the line terminator
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end();
        let rest = line
            .strip_prefix(SCHEME)
            .ok_or_else(|| RemoteError::InvalidResponse(format!("Not a HEOS request: {}", line)))?;

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        Ok(Self {
            path: path.to_string(),
            params: query.map(split_pairs).unwrap_or_default(),
        })
    }

    /// Value of the first parameter called `name`
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

fn split_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Reply line structure
#[derive(Debug, Clone, Deserialize)]
struct Response {
    heos: Header,
}

/// Reply header
#[derive(Debug, Clone, Deserialize)]
struct Header {
    command: String,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    message: String,
}

impl Header {
    /// Human-readable failure text (`text=` of the message, else the whole message)
    fn failure_text(&self) -> String {
        split_pairs(&self.message)
            .into_iter()
            .find(|(key, _)| key == "text")
            .map(|(_, text)| text)
            .unwrap_or_else(|| self.message.clone())
    }
}

/// Extract the player list from a `player/get_players` reply
pub fn parse_players(reply: &Value) -> Result<Vec<Player>> {
    let payload = reply
        .get("payload")
        .cloned()
        .ok_or_else(|| RemoteError::InvalidResponse("No payload in get_players reply".to_string()))?;

    Ok(serde_json::from_value(payload)?)
}

/// Line-JSON protocol adapter for HEOS receivers
///
/// Holds the player id every player command addresses. The handshake is
/// player discovery, skipped when the caller resumes with a known id.
#[derive(Debug, Default)]
pub struct HeosProtocol {
    player_id: Mutex<Option<PlayerId>>,
}

impl HeosProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Player addressed by player commands, known after a successful connect
    pub fn player_id(&self) -> Option<PlayerId> {
        *self.player_id.lock()
    }
}

impl Protocol for HeosProtocol {
    type Kind = HeosCommand;
    type Resume = PlayerId;

    const NAME: &'static str = "HEOS";
    const HANDSHAKE_STATE: ConnectionState = ConnectionState::Connecting;
    const CLOSED_STATE: ConnectionState = ConnectionState::Disconnected;

    fn default_config() -> SessionConfig {
        SessionConfig::new(HEOS_PORT).with_response_timeout(RESPONSE_TIMEOUT)
    }

    fn endpoint(&self, address: &str, config: &SessionConfig) -> Endpoint {
        Endpoint::Tcp {
            host: address.to_string(),
            port: config.port,
        }
    }

    fn resume(&self, resume: Option<PlayerId>) {
        *self.player_id.lock() = resume;
    }

    fn handshake(&self, _seq: u64, config: &SessionConfig) -> Result<Option<Command<HeosCommand>>> {
        if self.player_id().is_some() {
            return Ok(None);
        }
        Ok(Some(
            request(HeosCommand::GetPlayers, &[]).with_timeout(config.handshake_timeout),
        ))
    }

    fn is_handshake(kind: HeosCommand) -> bool {
        kind == HeosCommand::GetPlayers
    }

    fn complete_handshake(&self, reply: &Value) -> Result<()> {
        let players = parse_players(reply)?;
        let player = players
            .first()
            .ok_or_else(|| RemoteError::Handshake("Receiver reported no players".to_string()))?;

        tracing::info!("HEOS player id: {} ({})", player.pid, player.name);
        *self.player_id.lock() = Some(player.pid);
        Ok(())
    }

    fn interpret(&self, text: &str, in_flight: Option<&Command<HeosCommand>>) -> Reply {
        let text = text.trim_end();
        if text.is_empty() {
            return Reply::Ignored;
        }

        let decoded = serde_json::from_str::<Value>(text).and_then(|value| {
            let response = serde_json::from_value::<Response>(value.clone())?;
            Ok((value, response.heos))
        });
        let (value, header) = match decoded {
            Ok(decoded) => decoded,
            Err(e) if in_flight.is_some() => return Reply::Resolved(Err(e.into())),
            Err(e) => {
                tracing::warn!("HEOS undecodable line: {}", e);
                return Reply::Ignored;
            }
        };

        if header.command.starts_with(EVENT_PREFIX) {
            return Reply::Event(DeviceEvent {
                kind: header.command,
                payload: value,
            });
        }

        let Some(command) = in_flight else {
            return Reply::Ignored;
        };

        if header.command != command.key() {
            return Reply::Resolved(Err(RemoteError::CommandMismatch {
                expected: command.key().to_string(),
                received: header.command,
            }));
        }

        if header.result.as_deref() != Some(SUCCESS) {
            return Reply::Resolved(Err(RemoteError::CommandFailed {
                command: header.command.clone(),
                detail: header.failure_text(),
            }));
        }

        Reply::Resolved(Ok(value))
    }
}
