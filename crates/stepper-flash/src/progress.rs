//! Progress line events streamed to the operator.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LineOrigin {
    #[serde(rename = "stdout")]
    Out,
    #[serde(rename = "stderr")]
    Err,
}

impl LineOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineOrigin::Out => "stdout",
            LineOrigin::Err => "stderr",
        }
    }
}

/// One line of process output, without its trailing newline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineEvent {
    pub line: String,
    pub origin: LineOrigin,
}

impl LineEvent {
    pub fn new(line: impl Into<String>, origin: LineOrigin) -> Self {
        Self {
            line: line.into(),
            origin,
        }
    }
}

/// Sending half of the progress stream.
///
/// Cheap to clone; every stage gets a clone. Sends never fail from the
/// caller's point of view: once the receiver is gone (operator disconnected)
/// lines are dropped and the pipeline keeps running.
#[derive(Debug, Clone, Default)]
pub struct LineSink {
    tx: Option<mpsc::UnboundedSender<LineEvent>>,
}

impl LineSink {
    /// Wrap an existing sender.
    pub fn new(tx: mpsc::UnboundedSender<LineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Create a sink together with the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// A sink that drops every line.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: LineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// Emit an informational (stdout) line.
    pub fn out(&self, line: impl Into<String>) {
        self.emit(LineEvent::new(line, LineOrigin::Out));
    }

    /// Emit an error (stderr) line.
    pub fn err(&self, line: impl Into<String>) {
        self.emit(LineEvent::new(line, LineOrigin::Err));
    }
}
