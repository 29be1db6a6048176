use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Callback invoked with the decoded reply of a successful command
pub type ResultCallback = Box<dyn FnOnce(Value) + Send + 'static>;

/// A single outgoing request plus its matching, timeout and callback contract
///
/// Commands are built by the device facades (or directly by callers of
/// [`CommandSession`](crate::CommandSession)) and owned by the session queue
/// until the worker resolves them. Dropping a command drops its callback
/// without calling it.
pub struct Command<K> {
    kind: K,
    payload: String,
    key: String,
    timeout: Option<Duration>,
    on_result: Option<ResultCallback>,
}

impl<K: Copy> Command<K> {
    /// Create a command from its kind, encoded wire text and correlation key
    pub fn new(kind: K, payload: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            key: key.into(),
            timeout: None,
            on_result: None,
        }
    }

    /// Override the session's response timeout for this command
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the callback invoked when the device confirms this command
    pub fn on_result(mut self, callback: impl FnOnce(Value) + Send + 'static) -> Self {
        self.on_result = Some(Box::new(callback));
        self
    }

    pub fn kind(&self) -> K {
        self.kind
    }

    /// Encoded wire text
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Value a response must carry to answer this command
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn resolve(self, value: Value) {
        if let Some(callback) = self.on_result {
            callback(value);
        }
    }
}

impl<K: fmt::Debug> fmt::Debug for Command<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("payload", &self.payload.trim_end())
            .field("timeout", &self.timeout)
            .field("has_callback", &self.on_result.is_some())
            .finish()
    }
}
