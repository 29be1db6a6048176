use crate::error::{RemoteError, Result};
use crate::session::{CommandSession, ConnectionState, SessionConfig};
use crate::subscription::EventReceiver;
use crate::types::{ClientKey, InputId, MAX_VOLUME};
use crate::webos::{self, Uri, WebOsProtocol};
use serde_json::{json, Value};

/// Control surface for an LG webOS TV
///
/// The first connect without a client key shows a pairing prompt on the TV
/// and waits for it to be accepted. Store [`client_key`](Self::client_key)
/// afterwards and pass it to later connects to skip the prompt.
///
/// # Example
///
/// ```no_run
/// use av_remote::{InputId, Television};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let tv = Television::new();
///     tv.connect("192.168.1.41", None).await?;
///     println!("client key: {:?}", tv.client_key());
///
///     tv.switch_input(InputId::Hdmi2)?;
///     tv.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct Television {
    session: CommandSession<WebOsProtocol>,
}

impl Television {
    pub fn new() -> Self {
        Self {
            session: CommandSession::new(WebOsProtocol::new()),
        }
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            session: CommandSession::with_config(WebOsProtocol::new(), config),
        }
    }

    /// Connect and register with the TV at `host`
    pub async fn connect(&self, host: &str, client_key: Option<ClientKey>) -> Result<()> {
        self.session.connect(host, client_key).await
    }

    /// Finish queued commands and close the connection
    pub async fn disconnect(&self) {
        self.session.disconnect().await
    }

    /// Pairing token, known after a successful connect
    pub fn client_key(&self) -> Option<ClientKey> {
        self.session.protocol().client_key()
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Subscribe to messages the TV sends without being asked
    pub fn subscribe(&self) -> EventReceiver {
        self.session.subscribe()
    }

    /// Underlying command session
    pub fn session(&self) -> &CommandSession<WebOsProtocol> {
        &self.session
    }

    pub fn switch_input(&self, input: InputId) -> Result<()> {
        self.request(Uri::SwitchInput, json!({ "inputId": input.as_str() }))
    }

    /// Set the absolute volume (0-100)
    pub fn set_volume(&self, level: u8) -> Result<()> {
        if level > MAX_VOLUME {
            return Err(RemoteError::invalid_argument(
                "volume",
                format!("{} is above {}", level, MAX_VOLUME),
            ));
        }
        self.request(Uri::SetVolume, json!({ "volume": level }))
    }

    pub fn volume_up(&self) -> Result<()> {
        self.request(Uri::VolumeUp, json!({}))
    }

    pub fn volume_down(&self) -> Result<()> {
        self.request(Uri::VolumeDown, json!({}))
    }

    pub fn set_mute(&self, mute: bool) -> Result<()> {
        self.request(Uri::SetMute, json!({ "mute": mute }))
    }

    /// Put the TV into standby
    pub fn turn_off(&self) -> Result<()> {
        self.request(Uri::TurnOff, json!({}))
    }

    /// Show a notification bubble on screen
    pub fn show_toast(&self, message: &str) -> Result<()> {
        if message.trim().is_empty() {
            return Err(RemoteError::invalid_argument("message", "toast text is empty"));
        }
        self.request(Uri::CreateToast, json!({ "message": message }))
    }

    fn request(&self, uri: Uri, payload: Value) -> Result<()> {
        if self.session.submit_with(|seq| webos::request(seq, uri, payload)) {
            Ok(())
        } else {
            Err(RemoteError::NotConnected)
        }
    }
}

impl Default for Television {
    fn default() -> Self {
        Self::new()
    }
}
