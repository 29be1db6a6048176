use crate::command::Command;
use crate::error::Result;
use crate::session::{ConnectionState, SessionConfig};
use crate::subscription::DeviceEvent;
use crate::transport::Endpoint;
use serde_json::Value;
use std::fmt;

/// Verdict of a protocol adapter on one incoming message
#[derive(Debug)]
pub enum Reply {
    /// Answer to the in-flight command, successful or not
    Resolved(Result<Value>),
    /// Handshake completion that arrived outside the in-flight command
    Handshake(Value),
    /// Unsolicited device message for event subscribers
    Event(DeviceEvent),
    /// Nothing to act on; keep waiting
    Ignored,
}

/// Wire-level behaviour a [`CommandSession`](crate::CommandSession) needs from a device protocol
///
/// The session owns queueing, ordering, timeouts and the connection state
/// machine. An adapter only encodes the handshake, says where to connect,
/// and interprets incoming text against the command currently in flight.
pub trait Protocol: Send + Sync + 'static {
    /// Operations this protocol can queue
    type Kind: Copy + fmt::Debug + PartialEq + Send + Sync + 'static;

    /// Caller-retained value that lets a reconnect skip one-time setup
    type Resume: Send;

    /// Short device tag used in log lines
    const NAME: &'static str;

    /// State while the handshake command is outstanding
    const HANDSHAKE_STATE: ConnectionState;

    /// State after the link closes, by peer or by request
    const CLOSED_STATE: ConnectionState;

    /// Default timeouts and port for this protocol
    fn default_config() -> SessionConfig;

    /// Where to open the link for a device at `address`
    fn endpoint(&self, address: &str, config: &SessionConfig) -> Endpoint;

    /// Accept the caller's resume value before a new connection attempt
    fn resume(&self, resume: Option<Self::Resume>);

    /// Handshake command to run first on a fresh link, if any
    fn handshake(&self, seq: u64, config: &SessionConfig) -> Result<Option<Command<Self::Kind>>>;

    /// Whether commands of this kind may run before the session is ready
    ///
    /// Once ready, such commands are dispatched like any other.
    fn is_handshake(kind: Self::Kind) -> bool;

    /// Record what a successful handshake reply carries
    fn complete_handshake(&self, reply: &Value) -> Result<()>;

    /// Classify one incoming message
    fn interpret(&self, text: &str, in_flight: Option<&Command<Self::Kind>>) -> Reply;
}
