use crate::command::Command;
use crate::error::{RemoteError, Result};
use crate::heos::{self, parse_players, HeosCommand, HeosProtocol};
use crate::session::{CommandSession, ConnectionState, SessionConfig};
use crate::subscription::EventReceiver;
use crate::types::{InputSource, Player, PlayerId, MAX_VOLUME, MAX_VOLUME_STEP};
use tokio::sync::oneshot;

/// Control surface for a HEOS-capable AV receiver
///
/// Every control method validates its arguments, builds the matching HEOS
/// command and queues it. `Ok(())` means the command was accepted for
/// sending, not that the receiver applied it; failures on the wire are
/// logged by the session.
///
/// # Example
///
/// ```no_run
/// use av_remote::{InputSource, Receiver};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let receiver = Receiver::new();
///     receiver.connect("192.168.1.40", None).await?;
///
///     receiver.play_input(InputSource::OpticalIn1)?;
///     receiver.set_volume(20)?;
///
///     // Keep the id so the next connect can skip discovery
///     let pid = receiver.player_id();
///     receiver.disconnect().await;
///     receiver.connect("192.168.1.40", pid).await?;
///     Ok(())
/// }
/// ```
pub struct Receiver {
    session: CommandSession<HeosProtocol>,
}

impl Receiver {
    pub fn new() -> Self {
        Self {
            session: CommandSession::new(HeosProtocol::new()),
        }
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            session: CommandSession::with_config(HeosProtocol::new(), config),
        }
    }

    /// Connect to the receiver at `host`
    ///
    /// Without a `player_id` the first player reported by the receiver is
    /// selected; with one, discovery is skipped.
    pub async fn connect(&self, host: &str, player_id: Option<PlayerId>) -> Result<()> {
        self.session.connect(host, player_id).await
    }

    /// Finish queued commands and close the connection
    pub async fn disconnect(&self) {
        self.session.disconnect().await
    }

    /// Player addressed by control methods
    pub fn player_id(&self) -> Option<PlayerId> {
        self.session.protocol().player_id()
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Subscribe to `event/...` messages (see [`register_for_change_events`](Self::register_for_change_events))
    pub fn subscribe(&self) -> EventReceiver {
        self.session.subscribe()
    }

    /// Underlying command session
    pub fn session(&self) -> &CommandSession<HeosProtocol> {
        &self.session
    }

    /// Ask the receiver for its players and wait for the answer
    pub async fn get_players(&self) -> Result<Vec<Player>> {
        let (tx, rx) = oneshot::channel();
        let command = heos::request(HeosCommand::GetPlayers, &[]).on_result(move |reply| {
            let _ = tx.send(parse_players(&reply));
        });
        self.submit(command)?;

        rx.await.map_err(|_| RemoteError::CommandFailed {
            command: HeosCommand::GetPlayers.path().to_string(),
            detail: "no successful reply".to_string(),
        })?
    }

    /// Set the absolute volume (0-100)
    pub fn set_volume(&self, level: u8) -> Result<()> {
        if level > MAX_VOLUME {
            return Err(RemoteError::invalid_argument(
                "volume",
                format!("{} is above {}", level, MAX_VOLUME),
            ));
        }
        self.player_command(HeosCommand::SetVolume, &[("level", level.to_string())])
    }

    /// Raise the volume by `step` (1-10)
    pub fn volume_up(&self, step: u8) -> Result<()> {
        check_step(step)?;
        self.player_command(HeosCommand::VolumeUp, &[("step", step.to_string())])
    }

    /// Lower the volume by `step` (1-10)
    pub fn volume_down(&self, step: u8) -> Result<()> {
        check_step(step)?;
        self.player_command(HeosCommand::VolumeDown, &[("step", step.to_string())])
    }

    pub fn set_mute(&self, mute: bool) -> Result<()> {
        self.player_command(HeosCommand::SetMute, &[("state", on_off(mute).to_string())])
    }

    pub fn toggle_mute(&self) -> Result<()> {
        self.player_command(HeosCommand::ToggleMute, &[])
    }

    /// Switch the player to a physical input
    pub fn play_input(&self, input: InputSource) -> Result<()> {
        self.player_command(HeosCommand::PlayInput, &[("input", input.as_str().to_string())])
    }

    /// Turn unsolicited change events on or off for this connection
    pub fn register_for_change_events(&self, enable: bool) -> Result<()> {
        self.submit(heos::request(
            HeosCommand::RegisterForChangeEvents,
            &[("enable", on_off(enable).to_string())],
        ))
    }

    fn player_command(&self, kind: HeosCommand, params: &[(&str, String)]) -> Result<()> {
        if self.state() != ConnectionState::Ready {
            return Err(RemoteError::NotConnected);
        }
        let pid = self.player_id().ok_or(RemoteError::NoPlayer)?;

        let mut all = Vec::with_capacity(params.len() + 1);
        all.push(("pid", pid.to_string()));
        all.extend(params.iter().cloned());
        self.submit(heos::request(kind, &all))
    }

    fn submit(&self, command: Command<HeosCommand>) -> Result<()> {
        if self.session.submit(command) {
            Ok(())
        } else {
            Err(RemoteError::NotConnected)
        }
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

fn check_step(step: u8) -> Result<()> {
    if step == 0 || step > MAX_VOLUME_STEP {
        return Err(RemoteError::invalid_argument(
            "step",
            format!("{} is outside 1..={}", step, MAX_VOLUME_STEP),
        ));
    }
    Ok(())
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heos::HeosRequest;
    use crate::transport::Link;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Avr {
        sent: mpsc::UnboundedReceiver<String>,
        reply: mpsc::UnboundedSender<String>,
    }

    impl Avr {
        async fn next(&mut self) -> HeosRequest {
            let line = self.sent.recv().await.unwrap();
            assert!(line.ends_with("\r\n"), "unterminated line {:?}", line);
            HeosRequest::parse(&line).unwrap()
        }

        fn ok(&self, command: &str, payload: Option<serde_json::Value>) {
            let mut reply = json!({ "heos": { "command": command, "result": "success", "message": "" } });
            if let Some(payload) = payload {
                reply["payload"] = payload;
            }
            self.reply.send(format!("{}\r\n", reply)).unwrap();
        }
    }

    async fn connected(pid: Option<PlayerId>) -> (Receiver, Avr) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let mut avr = Avr {
            sent: out_rx,
            reply: in_tx,
        };
        let receiver = Receiver::new();

        if pid.is_some() {
            receiver
                .session()
                .attach(Link::from_channels(out_tx, in_rx), pid)
                .await
                .unwrap();
            return (receiver, avr);
        }

        let (attached, request) = tokio::join!(
            receiver.session().attach(Link::from_channels(out_tx, in_rx), None),
            async {
                let request = avr.next().await;
                avr.ok(
                    "player/get_players",
                    Some(json!([{ "name": "AVR", "pid": 314 }])),
                );
                request
            }
        );
        attached.unwrap();
        assert_eq!(request.path, "player/get_players");
        (receiver, avr)
    }

    #[tokio::test(start_paused = true)]
    async fn connect_discovers_player_id() {
        let (receiver, _avr) = connected(None).await;
        assert_eq!(receiver.state(), ConnectionState::Ready);
        assert_eq!(receiver.player_id(), Some(314));
        receiver.disconnect().await;
        assert_eq!(receiver.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn set_volume_addresses_player() {
        let (receiver, mut avr) = connected(Some(-1434712)).await;

        receiver.set_volume(20).unwrap();
        let request = avr.next().await;
        assert_eq!(request.path, "player/set_volume");
        assert_eq!(
            request.params,
            vec![
                ("pid".to_string(), "-1434712".to_string()),
                ("level".to_string(), "20".to_string())
            ]
        );
        avr.ok("player/set_volume", None);
        receiver.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_arguments_are_rejected_before_sending() {
        let (receiver, mut avr) = connected(Some(1)).await;

        assert!(matches!(
            receiver.set_volume(101),
            Err(RemoteError::InvalidArgument { name: "volume", .. })
        ));
        assert!(receiver.volume_up(0).is_err());
        assert!(receiver.volume_down(11).is_err());

        receiver.volume_down(10).unwrap();
        let request = avr.next().await;
        assert_eq!(request.path, "player/volume_down");
        assert_eq!(request.param("step"), Some("10"));
        avr.ok("player/volume_down", None);
        receiver.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn inputs_mute_and_events_encode_their_parameters() {
        let (receiver, mut avr) = connected(Some(7)).await;

        receiver.play_input(InputSource::CoaxIn2).unwrap();
        receiver.set_mute(true).unwrap();
        receiver.toggle_mute().unwrap();
        receiver.register_for_change_events(false).unwrap();

        let request = avr.next().await;
        assert_eq!(request.path, "browse/play_input");
        assert_eq!(request.param("input"), Some("inputs/coax_in_2"));
        avr.ok("browse/play_input", None);

        let request = avr.next().await;
        assert_eq!(request.param("state"), Some("on"));
        avr.ok("player/set_mute", None);

        let request = avr.next().await;
        assert_eq!(request.path, "player/toggle_mute");
        assert_eq!(request.param("pid"), Some("7"));
        avr.ok("player/toggle_mute", None);

        let request = avr.next().await;
        assert_eq!(request.path, "system/register_for_change_events");
        assert_eq!(request.param("enable"), Some("off"));
        assert_eq!(request.param("pid"), None);
        avr.ok("system/register_for_change_events", None);

        receiver.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn get_players_waits_for_reply() {
        let (receiver, mut avr) = connected(Some(1)).await;

        let (players, _) = tokio::join!(receiver.get_players(), async {
            assert_eq!(avr.next().await.path, "player/get_players");
            avr.ok(
                "player/get_players",
                Some(json!([{ "name": "Den", "pid": 1 }, { "name": "Patio", "pid": 2 }])),
            );
        });
        let players = players.unwrap();
        assert_eq!(players.len(), 2);
        assert_eq!(players[1].name, "Patio");
        assert_eq!(receiver.state(), ConnectionState::Ready);

        receiver.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn get_players_fails_when_unanswered() {
        let (receiver, mut avr) = connected(Some(1)).await;

        let (players, _) = tokio::join!(receiver.get_players(), avr.next());
        assert!(matches!(players, Err(RemoteError::CommandFailed { .. })));
        assert_eq!(receiver.state(), ConnectionState::Ready);

        receiver.disconnect().await;
    }

    #[test]
    fn commands_need_a_connection() {
        let receiver = Receiver::new();
        assert!(matches!(receiver.set_volume(10), Err(RemoteError::NotConnected)));
        assert!(matches!(
            receiver.register_for_change_events(true),
            Err(RemoteError::NotConnected)
        ));
        assert!(matches!(receiver.set_volume(200), Err(RemoteError::InvalidArgument { .. })));
    }
}
