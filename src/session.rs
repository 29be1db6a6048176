use crate::command::Command;
use crate::error::{RemoteError, Result};
use crate::protocol::{Protocol, Reply};
use crate::subscription::{DeviceEvent, EventReceiver};
use crate::transport::Link;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};

const EVENT_CAPACITY: usize = 100;

/// Slack added to the handshake window before `connect` gives up on it
const HANDSHAKE_MARGIN: Duration = Duration::from_millis(500);

/// Connection lifecycle of a [`CommandSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link; initial state for line-based devices
    Disconnected,
    /// Link is up, handshake (if any) not finished
    Connecting,
    /// Link is up, waiting for the TV to confirm registration
    Registering,
    /// Ordinary commands are dispatched
    Ready,
    /// Link was closed; a fresh `connect` is required
    Halted,
}

impl ConnectionState {
    /// Whether a link is currently attached
    pub fn is_open(self) -> bool {
        !matches!(self, Self::Disconnected | Self::Halted)
    }
}

/// Timeouts and port used by a [`CommandSession`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Device control port
    pub port: u16,
    /// Grace period for establishing the transport
    pub connect_timeout: Duration,
    /// How long an ordinary command waits for its reply
    pub response_timeout: Duration,
    /// How long a resumed handshake may take
    pub handshake_timeout: Duration,
    /// How long first-time pairing waits for the user to accept on the device
    pub pairing_timeout: Duration,
}

impl SessionConfig {
    /// Create a configuration for `port` with general-purpose timeouts
    pub fn new(port: u16) -> Self {
        Self {
            port,
            connect_timeout: Duration::from_secs(3),
            response_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(5),
            pairing_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_pairing_timeout(mut self, timeout: Duration) -> Self {
        self.pairing_timeout = timeout;
        self
    }
}

struct Queue<K> {
    commands: VecDeque<Command<K>>,
    /// Request sequence; first value handed out is 1
    next_seq: u64,
}

/// State shared between the session handle and its worker task
struct Shared<P: Protocol> {
    protocol: P,
    config: SessionConfig,
    queue: Mutex<Queue<P::Kind>>,
    wakeup: Notify,
    state: watch::Sender<ConnectionState>,
    /// Commands queued or in flight
    outstanding: watch::Sender<usize>,
    events: broadcast::Sender<DeviceEvent>,
}

struct Worker {
    handle: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

enum Step {
    Next,
    LinkLost,
    HandshakeFailed,
}

enum Outcome {
    Reply(Result<Value>),
    TimedOut,
    LinkLost,
}

enum Idle {
    Woken,
    Received(Option<String>),
    Shutdown,
}

/// Per-device command queue, worker task and connection state machine
///
/// A session is created once per device and reused across connect and
/// disconnect cycles. Callers submit [`Command`]s from any task; a single
/// worker sends them strictly in submission order and waits for each reply
/// (matched by the protocol adapter) or for the command's timeout before
/// sending the next one.
///
/// # Example
///
/// ```no_run
/// use av_remote::{CommandSession, HeosProtocol};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let session = CommandSession::new(HeosProtocol::new());
///     session.connect("192.168.1.40", None).await?;
///     println!("player id: {:?}", session.protocol().player_id());
///     session.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct CommandSession<P: Protocol> {
    shared: Arc<Shared<P>>,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl<P: Protocol> CommandSession<P> {
    /// Create a session with the protocol's default configuration
    pub fn new(protocol: P) -> Self {
        Self::with_config(protocol, P::default_config())
    }

    pub fn with_config(protocol: P, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(P::CLOSED_STATE);
        let (outstanding, _) = watch::channel(0);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                protocol,
                config,
                queue: Mutex::new(Queue {
                    commands: VecDeque::new(),
                    next_seq: 0,
                }),
                wakeup: Notify::new(),
                state,
                outstanding,
                events,
            }),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    pub fn protocol(&self) -> &P {
        &self.shared.protocol
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Subscribe to unsolicited device messages
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.shared.events.subscribe())
    }

    /// Connect to the device at `address` and run the protocol handshake
    ///
    /// An existing connection is drained and closed first. The queue is
    /// cleared, one worker task is started, and if the protocol has a
    /// handshake this call returns only once it completed or failed.
    pub async fn connect(&self, address: &str, resume: Option<P::Resume>) -> Result<()> {
        let mut worker = self.worker.lock().await;
        self.stop(&mut worker).await;

        let endpoint = self.shared.protocol.endpoint(address, &self.shared.config);
        let link = Link::open(&endpoint, self.shared.config.connect_timeout).await?;
        self.start(&mut worker, link, resume).await
    }

    /// Like [`connect`](Self::connect), over a link the caller already opened
    pub async fn attach(&self, link: Link, resume: Option<P::Resume>) -> Result<()> {
        let mut worker = self.worker.lock().await;
        self.stop(&mut worker).await;
        self.start(&mut worker, link, resume).await
    }

    /// Wait until every queued command is resolved, then close the link
    ///
    /// Does nothing when the session is not connected.
    pub async fn disconnect(&self) {
        let mut worker = self.worker.lock().await;
        self.stop(&mut worker).await;
    }

    /// Queue a command; returns `false` (and drops it) unless the session is ready
    pub fn submit(&self, command: Command<P::Kind>) -> bool {
        self.shared.enqueue(|_| command)
    }

    /// Queue a command built from the next request sequence number
    pub fn submit_with(&self, build: impl FnOnce(u64) -> Command<P::Kind>) -> bool {
        self.shared.enqueue(build)
    }

    async fn start(
        &self,
        slot: &mut Option<Worker>,
        link: Link,
        resume: Option<P::Resume>,
    ) -> Result<()> {
        let shared = &self.shared;
        shared.protocol.resume(resume);
        shared.reset();
        shared.state.send_replace(ConnectionState::Connecting);
        tracing::info!("{} connected", P::NAME);

        let handshake = {
            let mut queue = shared.queue.lock();
            queue.next_seq += 1;
            shared.protocol.handshake(queue.next_seq, &shared.config)
        };
        let handshake = match handshake {
            Ok(handshake) => handshake,
            Err(e) => {
                shared.teardown();
                return Err(e);
            }
        };

        let bound = handshake
            .as_ref()
            .map(|command| command.timeout().unwrap_or(shared.config.handshake_timeout) + HANDSHAKE_MARGIN);
        match handshake {
            Some(command) => {
                shared.state.send_replace(P::HANDSHAKE_STATE);
                shared.push(command);
            }
            None => {
                shared.state.send_replace(ConnectionState::Ready);
            }
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run(shared.clone(), link, shutdown_rx));
        *slot = Some(Worker { handle, shutdown });

        let Some(bound) = bound else {
            return Ok(());
        };

        let mut state_rx = shared.state.subscribe();
        let reached = timeout(
            bound,
            state_rx.wait_for(|s| *s == ConnectionState::Ready || *s == P::CLOSED_STATE),
        )
        .await
        .ok()
        .and_then(|settled| settled.ok())
        .map(|state| *state);

        if reached == Some(ConnectionState::Ready) {
            tracing::info!("{} handshake complete", P::NAME);
            return Ok(());
        }

        if let Some(worker) = slot.take() {
            worker.handle.abort();
            let _ = worker.handle.await;
        }
        shared.teardown();

        let detail = match reached {
            Some(_) => "handshake did not complete".to_string(),
            None => format!("no handshake reply within {:?}", bound),
        };
        tracing::error!("{} handshake failed: {}", P::NAME, detail);
        Err(RemoteError::Handshake(detail))
    }

    async fn stop(&self, slot: &mut Option<Worker>) {
        let Some(mut worker) = slot.take() else {
            return;
        };

        let mut outstanding = self.shared.outstanding.subscribe();
        let drained = async move {
            let _ = outstanding.wait_for(|n| *n == 0).await;
        };
        let finished = tokio::select! {
            _ = drained => false,
            _ = &mut worker.handle => true,
        };

        if !finished {
            let _ = worker.shutdown.send(());
            if let Err(e) = worker.handle.await {
                tracing::error!("{} command handler failed: {}", P::NAME, e);
                self.shared.teardown();
            }
        }
        tracing::info!("{} disconnected", P::NAME);
    }
}

impl<P: Protocol> Shared<P> {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn enqueue(&self, build: impl FnOnce(u64) -> Command<P::Kind>) -> bool {
        let mut queue = self.queue.lock();
        queue.next_seq += 1;
        let command = build(queue.next_seq);

        let state = self.state();
        if state != ConnectionState::Ready {
            tracing::warn!("{} dropped {:?}: session is {:?}", P::NAME, command.kind(), state);
            return false;
        }

        tracing::debug!("{} queued {:?}", P::NAME, command.kind());
        queue.commands.push_back(command);
        self.outstanding.send_modify(|n| *n += 1);
        drop(queue);

        self.wakeup.notify_one();
        true
    }

    /// Queue a handshake command ahead of anything else
    fn push(&self, command: Command<P::Kind>) {
        self.queue.lock().commands.push_front(command);
        self.outstanding.send_modify(|n| *n += 1);
        self.wakeup.notify_one();
    }

    fn reset(&self) {
        let residual = {
            let mut queue = self.queue.lock();
            let residual = queue.commands.len();
            queue.commands.clear();
            residual
        };
        if residual > 0 {
            tracing::debug!("{} discarded {} stale command(s)", P::NAME, residual);
        }
        self.outstanding.send_replace(0);
    }

    /// Enter the closed state and drop whatever is still queued
    fn teardown(&self) {
        let residual = {
            let mut queue = self.queue.lock();
            self.state.send_replace(P::CLOSED_STATE);
            let residual = queue.commands.len();
            queue.commands.clear();
            residual
        };
        if residual > 0 {
            tracing::warn!("{} dropped {} queued command(s) on close", P::NAME, residual);
        }
        self.outstanding.send_replace(0);
    }

    fn finish_one(&self) {
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }

    fn publish(&self, event: DeviceEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn complete_handshake(&self, reply: &Value) -> Result<()> {
        self.protocol.complete_handshake(reply)?;
        if self.state() != ConnectionState::Ready {
            self.state.send_replace(ConnectionState::Ready);
        }
        Ok(())
    }

    /// Handle a message that arrived with no command in flight
    fn route(&self, text: &str) {
        tracing::debug!("{} recv: {}", P::NAME, text.trim_end());
        match self.protocol.interpret(text, None) {
            Reply::Handshake(reply) => {
                if let Err(e) = self.complete_handshake(&reply) {
                    tracing::warn!("{} ignored registration: {}", P::NAME, e);
                }
            }
            Reply::Event(event) => self.publish(event),
            Reply::Resolved(_) => {
                tracing::debug!("{} discarding reply with nothing in flight", P::NAME);
            }
            Reply::Ignored => {}
        }
    }

    /// Route anything that arrived before the next command is sent
    fn drain_stale(&self, link: &mut Link) {
        while let Some(text) = link.try_recv() {
            self.route(&text);
        }
    }

    async fn dispatch(&self, link: &mut Link, command: Command<P::Kind>) -> Step {
        let state = self.state();
        let handshake = state != ConnectionState::Ready && P::is_handshake(command.kind());
        if !handshake && state != ConnectionState::Ready {
            tracing::warn!("{} dropped {:?}: session is {:?}", P::NAME, command.kind(), state);
            return Step::Next;
        }

        self.drain_stale(link);

        tracing::debug!("{} send: {}", P::NAME, command.payload().trim_end());
        if link.send(command.payload().to_string()).is_err() {
            tracing::warn!("{} link closed before {:?} was sent", P::NAME, command.kind());
            return Step::LinkLost;
        }

        let window = command.timeout().unwrap_or(self.config.response_timeout);
        let deadline = Instant::now() + window;
        let outcome = loop {
            let message = match timeout_at(deadline, link.recv()).await {
                Ok(message) => message,
                Err(_) => break Outcome::TimedOut,
            };
            let Some(text) = message else {
                break Outcome::LinkLost;
            };

            tracing::debug!("{} recv: {}", P::NAME, text.trim_end());
            match self.protocol.interpret(&text, Some(&command)) {
                Reply::Resolved(result) => break Outcome::Reply(result),
                Reply::Handshake(reply) => {
                    if handshake {
                        break Outcome::Reply(Ok(reply));
                    }
                    if let Err(e) = self.complete_handshake(&reply) {
                        tracing::warn!("{} ignored registration: {}", P::NAME, e);
                    }
                }
                Reply::Event(event) => self.publish(event),
                Reply::Ignored => {}
            }
        };

        match outcome {
            Outcome::Reply(Ok(reply)) => {
                if handshake {
                    if let Err(e) = self.complete_handshake(&reply) {
                        tracing::error!("{} handshake rejected: {}", P::NAME, e);
                        return Step::HandshakeFailed;
                    }
                }
                tracing::debug!("{} {:?} succeeded", P::NAME, command.kind());
                command.resolve(reply);
                Step::Next
            }
            Outcome::Reply(Err(e)) => {
                tracing::warn!("{} {:?} failed: {}", P::NAME, command.kind(), e);
                if handshake {
                    Step::HandshakeFailed
                } else {
                    Step::Next
                }
            }
            Outcome::TimedOut => {
                tracing::warn!("{} {:?} missing response after {:?}", P::NAME, command.kind(), window);
                if handshake {
                    Step::HandshakeFailed
                } else {
                    Step::Next
                }
            }
            Outcome::LinkLost => {
                tracing::warn!("{} link closed while waiting for {:?}", P::NAME, command.kind());
                Step::LinkLost
            }
        }
    }
}

/// Worker loop: one per connected session
async fn run<P: Protocol>(shared: Arc<Shared<P>>, mut link: Link, mut shutdown: oneshot::Receiver<()>) {
    tracing::info!("{} command handler started", P::NAME);

    let reason = loop {
        let next = shared.queue.lock().commands.pop_front();
        let Some(command) = next else {
            let idle = tokio::select! {
                _ = shared.wakeup.notified() => Idle::Woken,
                message = link.recv() => Idle::Received(message),
                _ = &mut shutdown => Idle::Shutdown,
            };
            match idle {
                Idle::Woken => continue,
                Idle::Received(Some(text)) => {
                    shared.route(&text);
                    continue;
                }
                Idle::Received(None) => break "link closed",
                Idle::Shutdown => break "disconnect requested",
            }
        };

        let step = shared.dispatch(&mut link, command).await;
        shared.finish_one();
        match step {
            Step::Next => {}
            Step::LinkLost => break "link closed",
            Step::HandshakeFailed => break "handshake failed",
        }
    };

    drop(link);
    shared.teardown();
    tracing::info!("{} command handler stopped: {}", P::NAME, reason);
}
