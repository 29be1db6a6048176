//! webOS SSAP adapter: JSON messages over a WebSocket
//!
//! Every request carries an `id` that the TV echoes in its reply. Before any
//! request is accepted the client must register, either by showing the
//! pairing prompt on the TV or by presenting a previously issued client key.

use crate::command::Command;
use crate::error::{RemoteError, Result};
use crate::protocol::{Protocol, Reply};
use crate::session::{ConnectionState, SessionConfig};
use crate::subscription::DeviceEvent;
use crate::transport::Endpoint;
use crate::types::ClientKey;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};

/// webOS SSAP WebSocket port
pub const WEBOS_PORT: u16 = 3000;

const ID_PREFIX: &str = "abcdef";
const ID_OFFSET: u64 = 100_000;
const CLIENT_KEY: &str = "client-key";

/// Signed manifest LG's own remote app registers with (`pairingType: PROMPT`)
const PAIRING_MANIFEST: &str = r#"{"forcePairing":false,"pairingType":"PROMPT","manifest":{"manifestVersion":1,"appVersion":"1.1","signed":{"created":"20140509","appId":"com.lge.test","vendorId":"com.lge","localizedAppNames":{"":"LG Remote App","ko-KR":"리모컨 앱","zxx-XX":"ЛГ Rэмotэ AПП"},"localizedVendorNames":{"":"LG Electronics"},"permissions":["TEST_SECURE","CONTROL_INPUT_TEXT","CONTROL_MOUSE_AND_KEYBOARD","READ_INSTALLED_APPS","READ_LGE_SDX","READ_NOTIFICATIONS","SEARCH","WRITE_SETTINGS","WRITE_NOTIFICATION_ALERT","CONTROL_POWER","READ_CURRENT_CHANNEL","READ_RUNNING_APPS","READ_UPDATE_INFO","UPDATE_FROM_REMOTE_APP","READ_LGE_TV_INPUT_EVENTS","READ_TV_CURRENT_TIME"],"serial":"2f930e2d2cfe083771f68e4fe7bb07"},"permissions":["LAUNCH","LAUNCH_WEBAPP","APP_TO_APP","CLOSE","TEST_OPEN","TEST_PROTECTED","CONTROL_AUDIO","CONTROL_DISPLAY","CONTROL_INPUT_JOYSTICK","CONTROL_INPUT_MEDIA_RECORDING","CONTROL_INPUT_MEDIA_PLAYBACK","CONTROL_INPUT_TV","CONTROL_POWER","READ_APP_STATUS","READ_CURRENT_CHANNEL","READ_INPUT_DEVICE_LIST","READ_NETWORK_STATE","READ_RUNNING_APPS","READ_TV_CHANNEL_LIST","WRITE_NOTIFICATION_TOAST","READ_POWER_STATE","READ_COUNTRY_INFO","READ_SETTINGS","CONTROL_TV_SCREEN","CONTROL_TV_STANBY","CONTROL_FAVORITE_GROUP","CONTROL_USER_INFO","CHECK_BLUETOOTH_DEVICE","CONTROL_BLUETOOTH","CONTROL_TIMER_INFO","STB_INTERNAL_CONNECTION","CONTROL_RECORDING","READ_RECORDING_STATE","WRITE_RECORDING_LIST","READ_RECORDING_LIST","READ_RECORDING_SCHEDULE","WRITE_RECORDING_SCHEDULE","READ_STORAGE_DEVICE_LIST","READ_TV_PROGRAM_INFO","CONTROL_BOX_CHANNEL","READ_TV_ACR_AUTH_TOKEN","READ_TV_CONTENT_STATE","READ_TV_CURRENT_TIME","ADD_LAUNCHER_CHANNEL","SET_CHANNEL_SKIP","RELEASE_CHANNEL_SKIP","CONTROL_CHANNEL_BLOCK","DELETE_SELECT_CHANNEL","CONTROL_CHANNEL_GROUP","SCAN_TV_CHANNELS","CONTROL_TV_POWER","CONTROL_WOL"],"signatures":[{"signatureVersion":1,"signature":"eyJhbGdvcml0aG0iOiJSU0EtU0hBMjU2Iiwia2V5SWQiOiJ0ZXN0LXNpZ25pbmctY2VydCIsInNpZ25hdHVyZVZlcnNpb24iOjF9.hrVRgjCwXVvE2OOSpDZ58hR+59aFNwYDyjQgKk3auukd7pcegmE2CzPCa0bJ0ZsRAcKkCTJrWo5iDzNhMBWRyaMOv5zWSrthlf7G128qvIlpMT0YNY+n/FaOHE73uLrS/g7swl3/qH/BGFG2Hu4RlL48eb3lLKqTt2xKHdCs6Cd4RMfJPYnzgvI4BNrFUKsjkcu+WD4OO2A27Pq1n50cMchmcaXadJhGrOqH5YmHdOCj5NSHzJYrsW0HPlpuAx/ECMeIZYDh6RMqaFM2DXzdKX9NmmyqzJ3o/0lkk/N97gfVRLW5hA29yeAwaCViZNCP8iC9aO0q9fQojoa7NQnAtw=="}]}}"#;

/// SSAP endpoints this crate can call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uri {
    SwitchInput,
    SetVolume,
    VolumeUp,
    VolumeDown,
    SetMute,
    TurnOff,
    CreateToast,
}

impl Uri {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SwitchInput => "ssap://tv/switchInput",
            Self::SetVolume => "ssap://audio/setVolume",
            Self::VolumeUp => "ssap://audio/volumeUp",
            Self::VolumeDown => "ssap://audio/volumeDown",
            Self::SetMute => "ssap://audio/setMute",
            Self::TurnOff => "ssap://system/turnOff",
            Self::CreateToast => "ssap://system.notifications/createToast",
        }
    }
}

/// Kinds of message the TV session queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebOsCommand {
    Register,
    Request(Uri),
}

/// Message type field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MessageType {
    Register,
    Registered,
    Request,
    Response,
    Error,
    #[serde(other)]
    Other,
}

/// Incoming message structure
#[derive(Debug, Clone, Deserialize)]
struct Incoming {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    message_type: MessageType,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Request id for sequence number `seq`
pub fn request_id(seq: u64) -> String {
    format!("{}{}", ID_PREFIX, ID_OFFSET + seq)
}

/// Build a `request` message for `uri`
pub fn request(seq: u64, uri: Uri, payload: Value) -> Command<WebOsCommand> {
    let id = request_id(seq);
    let message = json!({
        "id": id,
        "type": "request",
        "uri": uri.as_str(),
        "payload": payload,
    });

    Command::new(WebOsCommand::Request(uri), message.to_string(), id)
}

/// Build a `register` message, presenting `client_key` when one is known
pub fn register(seq: u64, client_key: Option<&str>) -> Result<Command<WebOsCommand>> {
    let id = request_id(seq);
    let payload = match client_key {
        Some(key) => json!({ CLIENT_KEY: key }),
        None => serde_json::from_str(PAIRING_MANIFEST)?,
    };
    let message = json!({
        "id": id,
        "type": "register",
        "payload": payload,
    });

    Ok(Command::new(WebOsCommand::Register, message.to_string(), id))
}

/// WebSocket-JSON protocol adapter for LG webOS TVs
///
/// Holds the pairing token. Without one, connecting shows a prompt on the TV
/// and the token it issues is kept for the caller to persist and pass back.
#[derive(Debug, Default)]
pub struct WebOsProtocol {
    client_key: Mutex<Option<ClientKey>>,
}

impl WebOsProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairing token issued or confirmed by the TV
    pub fn client_key(&self) -> Option<ClientKey> {
        self.client_key.lock().clone()
    }
}

impl Protocol for WebOsProtocol {
    type Kind = WebOsCommand;
    type Resume = ClientKey;

    const NAME: &'static str = "LGTV";
    const HANDSHAKE_STATE: ConnectionState = ConnectionState::Registering;
    const CLOSED_STATE: ConnectionState = ConnectionState::Halted;

    fn default_config() -> SessionConfig {
        SessionConfig::new(WEBOS_PORT)
    }

    fn endpoint(&self, address: &str, config: &SessionConfig) -> Endpoint {
        Endpoint::WebSocket {
            url: format!("ws://{}:{}", address, config.port),
        }
    }

    fn resume(&self, resume: Option<ClientKey>) {
        *self.client_key.lock() = resume.filter(|key| !key.is_empty());
    }

    fn handshake(&self, seq: u64, config: &SessionConfig) -> Result<Option<Command<WebOsCommand>>> {
        let key = self.client_key();
        let window = match key {
            Some(_) => config.handshake_timeout,
            None => {
                tracing::info!("LGTV pairing: accept the prompt on the TV");
                config.pairing_timeout
            }
        };
        Ok(Some(register(seq, key.as_deref())?.with_timeout(window)))
    }

    fn is_handshake(kind: WebOsCommand) -> bool {
        kind == WebOsCommand::Register
    }

    fn complete_handshake(&self, reply: &Value) -> Result<()> {
        let mut current = self.client_key.lock();
        match reply.get(CLIENT_KEY).and_then(Value::as_str) {
            Some(key) if !key.is_empty() => {
                tracing::info!("LGTV client key: {}", key);
                *current = Some(key.to_string());
                Ok(())
            }
            _ if current.is_some() => Ok(()),
            _ => Err(RemoteError::Handshake(
                "registered message carried no client key".to_string(),
            )),
        }
    }

    fn interpret(&self, text: &str, in_flight: Option<&Command<WebOsCommand>>) -> Reply {
        let message = match serde_json::from_str::<Incoming>(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("LGTV undecodable message: {}", e);
                return Reply::Ignored;
            }
        };

        let addressed = in_flight.filter(|command| message.id.as_deref() == Some(command.key()));

        match (message.message_type, addressed) {
            (MessageType::Registered, Some(_)) => Reply::Resolved(Ok(message.payload)),
            (MessageType::Registered, None) => Reply::Handshake(message.payload),
            (MessageType::Response, Some(command)) if command.kind() == WebOsCommand::Register => {
                // Pairing prompt is on screen; `registered` follows once accepted
                tracing::info!("LGTV waiting for the pairing prompt to be accepted");
                Reply::Ignored
            }
            (MessageType::Response, Some(command)) => {
                if message.payload.get("returnValue").and_then(Value::as_bool) != Some(true) {
                    tracing::warn!("LGTV {:?} returned failure: {}", command.kind(), message.payload);
                }
                Reply::Resolved(Ok(message.payload))
            }
            (MessageType::Error, Some(command)) => Reply::Resolved(Err(RemoteError::CommandFailed {
                command: format!("{:?}", command.kind()),
                detail: message.error.unwrap_or_else(|| "unknown error".to_string()),
            })),
            (message_type, _) => Reply::Event(DeviceEvent {
                kind: format!("{:?}", message_type).to_lowercase(),
                payload: message.payload,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(command: &Command<WebOsCommand>) -> Value {
        serde_json::from_str(command.payload()).unwrap()
    }

    fn resolved(reply: Reply) -> Result<Value> {
        match reply {
            Reply::Resolved(result) => result,
            other => panic!("expected a resolution, got {:?}", other),
        }
    }

    #[test]
    fn request_ids_are_prefixed_and_offset() {
        assert_eq!(request_id(1), "abcdef100001");
        assert_eq!(request_id(42), "abcdef100042");
    }

    #[test]
    fn switch_input_request_shape() {
        let command = request(3, Uri::SwitchInput, json!({ "inputId": "HDMI_2" }));
        let message = decode(&command);

        assert_eq!(command.key(), "abcdef100003");
        assert_eq!(message["id"], "abcdef100003");
        assert_eq!(message["type"], "request");
        assert_eq!(message["uri"], "ssap://tv/switchInput");
        assert_eq!(message["payload"]["inputId"], "HDMI_2");
    }

    #[test]
    fn first_registration_sends_pairing_manifest() {
        let protocol = WebOsProtocol::new();
        let config = WebOsProtocol::default_config();
        let command = protocol.handshake(1, &config).unwrap().unwrap();
        let message = decode(&command);

        assert_eq!(command.timeout(), Some(config.pairing_timeout));
        assert_eq!(message["type"], "register");
        assert_eq!(message["payload"]["pairingType"], "PROMPT");
        assert!(message["payload"].get(CLIENT_KEY).is_none());
    }

    #[test]
    fn known_key_sends_only_the_key() {
        let protocol = WebOsProtocol::new();
        let config = WebOsProtocol::default_config();
        protocol.resume(Some("a1b2c3".to_string()));

        let command = protocol.handshake(7, &config).unwrap().unwrap();
        let message = decode(&command);

        assert_eq!(command.timeout(), Some(config.handshake_timeout));
        assert_eq!(message["payload"], json!({ "client-key": "a1b2c3" }));
    }

    #[test]
    fn empty_resume_key_means_pairing() {
        let protocol = WebOsProtocol::new();
        protocol.resume(Some(String::new()));
        assert_eq!(protocol.client_key(), None);
    }

    #[test]
    fn pairing_prompt_ack_keeps_waiting_then_registered_resolves() {
        let protocol = WebOsProtocol::new();
        let command = register(1, None).unwrap();

        let prompt = r#"{"type":"response","id":"abcdef100001","payload":{"pairingType":"PROMPT","returnValue":true}}"#;
        assert!(matches!(protocol.interpret(prompt, Some(&command)), Reply::Ignored));

        let registered = r#"{"type":"registered","id":"abcdef100001","payload":{"client-key":"fresh-key"}}"#;
        let payload = resolved(protocol.interpret(registered, Some(&command))).unwrap();
        protocol.complete_handshake(&payload).unwrap();
        assert_eq!(protocol.client_key().as_deref(), Some("fresh-key"));
    }

    #[test]
    fn registered_with_other_id_is_routed_to_handshake() {
        let protocol = WebOsProtocol::new();
        let registered = r#"{"type":"registered","id":"abcdef199999","payload":{"client-key":"k"}}"#;
        assert!(matches!(protocol.interpret(registered, None), Reply::Handshake(_)));
    }

    #[test]
    fn return_value_false_still_resolves() {
        let protocol = WebOsProtocol::new();
        let command = request(2, Uri::SwitchInput, json!({ "inputId": "HDMI_1" }));
        let reply = r#"{"type":"response","id":"abcdef100002","payload":{"returnValue":false}}"#;

        let payload = resolved(protocol.interpret(reply, Some(&command))).unwrap();
        assert_eq!(payload["returnValue"], false);
    }

    #[test]
    fn error_message_fails_command() {
        let protocol = WebOsProtocol::new();
        let command = request(2, Uri::TurnOff, json!({}));
        let reply = r#"{"type":"error","id":"abcdef100002","error":"401 insufficient permissions","payload":{}}"#;

        let err = resolved(protocol.interpret(reply, Some(&command))).unwrap_err();
        assert!(matches!(err, RemoteError::CommandFailed { ref detail, .. } if detail.starts_with("401")));
    }

    #[test]
    fn reply_for_another_id_is_an_event() {
        let protocol = WebOsProtocol::new();
        let command = request(2, Uri::SetVolume, json!({ "volume": 10 }));
        let reply = r#"{"type":"response","id":"abcdef100009","payload":{"returnValue":true}}"#;

        match protocol.interpret(reply, Some(&command)) {
            Reply::Event(event) => assert_eq!(event.kind, "response"),
            other => panic!("expected an event, got {:?}", other),
        }
        assert!(matches!(protocol.interpret("{oops", Some(&command)), Reply::Ignored));
    }

    #[test]
    fn registered_without_key_fails_first_pairing() {
        let protocol = WebOsProtocol::new();
        assert!(protocol.complete_handshake(&json!({})).is_err());

        protocol.resume(Some("kept".to_string()));
        protocol.complete_handshake(&json!({})).unwrap();
        assert_eq!(protocol.client_key().as_deref(), Some("kept"));
    }
}
