//! Async command sessions for home-theater devices
//!
//! This library drives two kinds of network-controlled devices from one
//! command-session core:
//!
//! - HEOS-capable AV receivers (Denon/Marantz) over the line-based HEOS CLI on TCP port 1255
//! - LG webOS TVs over the SSAP WebSocket API on port 3000, including first-time pairing
//!
//! Each device gets a [`CommandSession`] that queues commands, sends them one
//! at a time in submission order, matches each reply to the command in
//! flight and gives up on a command after its timeout.
//!
//! # Quick Start
//!
//! ```no_run
//! use av_remote::{InputId, InputSource, Receiver, Television};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let receiver = Receiver::new();
//!     let tv = Television::new();
//!
//!     receiver.connect("192.168.1.40", None).await?;
//!     tv.connect("192.168.1.41", None).await?;
//!
//!     // Movie night
//!     receiver.play_input(InputSource::OpticalIn1)?;
//!     receiver.set_volume(20)?;
//!     tv.switch_input(InputId::Hdmi2)?;
//!
//!     // Persist these to skip discovery and pairing next time
//!     println!("pid={:?} key={:?}", receiver.player_id(), tv.client_key());
//!
//!     receiver.disconnect().await;
//!     tv.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Transport**: TCP line links and WebSocket links bridged to channels
//! - **Session**: Per-device queue, worker task and connection state machine
//! - **Protocol**: Adapters that encode handshakes and classify replies (HEOS, webOS)
//! - **Facades**: [`Receiver`] and [`Television`] control methods
//! - **Types**: Players, inputs and volume limits

mod command;
mod error;
pub mod heos;
mod protocol;
mod receiver;
mod session;
mod subscription;
mod television;
mod transport;
mod types;
pub mod webos;

// Public exports
pub use command::{Command, ResultCallback};
pub use error::{RemoteError, Result};
pub use heos::{HeosCommand, HeosProtocol};
pub use protocol::{Protocol, Reply};
pub use receiver::Receiver;
pub use session::{CommandSession, ConnectionState, SessionConfig};
pub use subscription::{DeviceEvent, EventReceiver};
pub use television::Television;
pub use transport::{Endpoint, Link};
pub use types::{
    ClientKey, InputId, InputSource, Player, PlayerId, DEFAULT_VOLUME_STEP, MAX_VOLUME,
    MAX_VOLUME_STEP,
};
pub use webos::{Uri, WebOsCommand, WebOsProtocol};
