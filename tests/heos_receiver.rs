use av_remote::{
    ConnectionState, HeosProtocol, InputSource, Protocol, Receiver, RemoteError, SessionConfig,
};
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

/// One accepted connection to the fake receiver
struct Avr {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl Avr {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, write) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    /// Next request line, CR stripped
    async fn line(&mut self) -> Option<String> {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .unwrap()
            .unwrap()?;
        Some(line.trim_end_matches('\r').to_string())
    }

    async fn send(&mut self, value: serde_json::Value) {
        let text = format!("{}\r\n", value);
        // Split the reply to exercise line reassembly
        let (head, tail) = text.split_at(text.len() / 2);
        self.write.write_all(head.as_bytes()).await.unwrap();
        self.write.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.write.write_all(tail.as_bytes()).await.unwrap();
    }

    async fn ok(&mut self, command: &str, message: &str) {
        self.send(json!({ "heos": { "command": command, "result": "success", "message": message } }))
            .await;
    }
}

async fn listener() -> (TcpListener, SessionConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, HeosProtocol::default_config().with_port(port))
}

#[tokio::test]
async fn discovers_player_then_sets_volume() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (listener, config) = listener().await;

    let device = tokio::spawn(async move {
        let mut avr = Avr::accept(&listener).await;

        assert_eq!(avr.line().await.as_deref(), Some("heos://player/get_players"));
        avr.send(json!({
            "heos": { "command": "player/get_players", "result": "success", "message": "" },
            "payload": [{ "name": "Living Room", "pid": -1434712, "model": "Denon AVR-X2700H" }]
        }))
        .await;

        assert_eq!(
            avr.line().await.as_deref(),
            Some("heos://browse/play_input?pid=-1434712&input=inputs/usbdac")
        );
        avr.ok("browse/play_input", "pid=-1434712&input=inputs/usbdac").await;

        assert_eq!(
            avr.line().await.as_deref(),
            Some("heos://player/set_volume?pid=-1434712&level=20")
        );
        avr.ok("player/set_volume", "pid=-1434712&level=20").await;

        // Connection closes once the queue drains
        assert_eq!(avr.line().await, None);
    });

    let receiver = Receiver::with_config(config);
    receiver.connect("127.0.0.1", None).await.unwrap();
    assert_eq!(receiver.state(), ConnectionState::Ready);
    assert_eq!(receiver.player_id(), Some(-1434712));

    receiver.play_input(InputSource::UsbDac).unwrap();
    receiver.set_volume(20).unwrap();
    receiver.disconnect().await;

    assert_eq!(receiver.state(), ConnectionState::Disconnected);
    device.await.unwrap();
}

#[tokio::test]
async fn known_player_skips_discovery_and_events_reach_subscribers() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (listener, config) = listener().await;

    let device = tokio::spawn(async move {
        let mut avr = Avr::accept(&listener).await;

        assert_eq!(
            avr.line().await.as_deref(),
            Some("heos://system/register_for_change_events?enable=on")
        );
        avr.ok("system/register_for_change_events", "enable=on").await;
        avr.send(json!({
            "heos": { "command": "event/player_volume_changed", "message": "pid=9&level=33&mute=off" }
        }))
        .await;

        assert_eq!(avr.line().await.as_deref(), Some("heos://player/toggle_mute?pid=9"));
        avr.ok("player/toggle_mute", "pid=9").await;
        assert_eq!(avr.line().await, None);
    });

    let receiver = Receiver::with_config(config);
    let mut events = receiver.subscribe();
    receiver.connect("127.0.0.1", Some(9)).await.unwrap();
    receiver.register_for_change_events(true).unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, "event/player_volume_changed");
    assert_eq!(event.payload["heos"]["message"], "pid=9&level=33&mute=off");

    receiver.toggle_mute().unwrap();
    receiver.disconnect().await;
    device.await.unwrap();
}

#[tokio::test]
async fn failed_command_does_not_block_the_next() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (listener, config) = listener().await;

    let device = tokio::spawn(async move {
        let mut avr = Avr::accept(&listener).await;

        assert!(avr.line().await.unwrap().starts_with("heos://player/set_mute"));
        avr.send(json!({
            "heos": { "command": "player/set_mute", "result": "fail", "message": "eid=2&text=ID Not Valid" }
        }))
        .await;

        // No answer for this one; the session moves on after its timeout
        assert!(avr.line().await.unwrap().starts_with("heos://player/volume_up"));

        assert_eq!(
            avr.line().await.as_deref(),
            Some("heos://player/volume_down?pid=3&step=5")
        );
        avr.ok("player/volume_down", "pid=3&step=5").await;
        assert_eq!(avr.line().await, None);
    });

    let receiver = Receiver::with_config(config);
    receiver.connect("127.0.0.1", Some(3)).await.unwrap();
    receiver.set_mute(true).unwrap();
    receiver.volume_up(av_remote::DEFAULT_VOLUME_STEP).unwrap();
    receiver.volume_down(av_remote::DEFAULT_VOLUME_STEP).unwrap();
    receiver.disconnect().await;
    device.await.unwrap();
}

#[tokio::test]
async fn peer_hangup_closes_session() {
    let (listener, config) = listener().await;

    let device = tokio::spawn(async move {
        let avr = Avr::accept(&listener).await;
        drop(avr);
    });

    let receiver = Receiver::with_config(config);
    receiver.connect("127.0.0.1", Some(1)).await.unwrap();
    device.await.unwrap();

    let mut waited = Duration::ZERO;
    while receiver.state() != ConnectionState::Disconnected && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    assert_eq!(receiver.state(), ConnectionState::Disconnected);
    assert!(matches!(receiver.set_volume(10), Err(RemoteError::NotConnected)));
}

#[tokio::test]
async fn refused_connection_is_reported() {
    let (listener, config) = listener().await;
    drop(listener);

    let receiver = Receiver::with_config(config);
    assert!(receiver.connect("127.0.0.1", None).await.is_err());
    assert_eq!(receiver.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn trickled_partial_reply_does_not_extend_deadline() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (listener, config) = listener().await;
    let window = config.response_timeout;

    let device = tokio::spawn(async move {
        let Avr { mut lines, mut write } = Avr::accept(&listener).await;

        let first = lines.next_line().await.unwrap().unwrap();
        assert!(first.starts_with("heos://player/set_volume"));
        let sent = tokio::time::Instant::now();

        // Bytes keep arriving but never complete a line
        let trickle = async {
            loop {
                write.write_all(b"{").await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        let next = tokio::select! {
            _ = trickle => unreachable!(),
            line = tokio::time::timeout(Duration::from_secs(5), lines.next_line()) => {
                line.unwrap().unwrap().unwrap()
            }
        };
        let gap = sent.elapsed();

        assert_eq!(next.trim_end_matches('\r'), "heos://player/toggle_mute?pid=2");
        assert!(gap >= window - Duration::from_millis(50), "next line after {:?}", gap);
        assert!(gap < window * 2, "next line after {:?}", gap);

        // Left unanswered; the session closes after its timeout
        assert_eq!(lines.next_line().await.unwrap(), None);
    });

    let receiver = Receiver::with_config(config);
    receiver.connect("127.0.0.1", Some(2)).await.unwrap();
    receiver.set_volume(40).unwrap();
    receiver.toggle_mute().unwrap();
    receiver.disconnect().await;
    device.await.unwrap();
}
