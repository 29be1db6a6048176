use crate::error::{RemoteError, Result};
use serde_json::Value;
use tokio::sync::broadcast;

/// Unsolicited message pushed by a device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    /// HEOS event command (e.g. `event/player_volume_changed`) or webOS message type
    pub kind: String,

    /// Decoded message body
    pub payload: Value,
}

/// Receiver for device events
///
/// A slow subscriber does not stall the session. When it falls behind, the
/// oldest events are skipped and delivery resumes with the oldest one still
/// buffered; [`skipped`](Self::skipped) counts what was lost.
pub struct EventReceiver {
    rx: broadcast::Receiver<DeviceEvent>,
    skipped: u64,
}

impl EventReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<DeviceEvent>) -> Self {
        Self { rx, skipped: 0 }
    }

    /// Number of events dropped because this receiver fell behind
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Receive the next device event
    ///
    /// Fails with `ConnectionClosed` once the owning session is dropped.
    pub async fn recv(&mut self) -> Result<DeviceEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Ok(event),
                Err(broadcast::error::RecvError::Lagged(n)) => self.skip(n),
                Err(broadcast::error::RecvError::Closed) => return Err(RemoteError::ConnectionClosed),
            }
        }
    }

    /// Next buffered device event, `None` if nothing is waiting
    pub fn try_recv(&mut self) -> Result<Option<DeviceEvent>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Ok(Some(event)),
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.skip(n),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(RemoteError::ConnectionClosed)
                }
            }
        }
    }

    fn skip(&mut self, n: u64) {
        tracing::warn!("Event subscriber fell behind, skipped {} event(s)", n);
        self.skipped += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(n: u64) -> DeviceEvent {
        DeviceEvent {
            kind: "event/player_volume_changed".to_string(),
            payload: json!({ "level": n }),
        }
    }

    #[test]
    fn lagging_subscriber_skips_to_oldest_buffered_event() {
        let (tx, rx) = broadcast::channel(2);
        let mut events = EventReceiver::new(rx);
        assert!(events.try_recv().unwrap().is_none());

        for n in 0..5 {
            tx.send(event(n)).unwrap();
        }
        assert_eq!(events.try_recv().unwrap(), Some(event(3)));
        assert_eq!(events.skipped(), 3);
        assert_eq!(events.try_recv().unwrap(), Some(event(4)));
        assert!(events.try_recv().unwrap().is_none());

        drop(tx);
        assert!(matches!(events.try_recv(), Err(RemoteError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn recv_resumes_after_lag_and_reports_close() {
        let (tx, rx) = broadcast::channel(1);
        let mut events = EventReceiver::new(rx);

        tx.send(event(1)).unwrap();
        tx.send(event(2)).unwrap();
        assert_eq!(events.recv().await.unwrap(), event(2));
        assert_eq!(events.skipped(), 1);

        drop(tx);
        assert!(matches!(events.recv().await, Err(RemoteError::ConnectionClosed)));
    }
}
