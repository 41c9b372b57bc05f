//! Session-wide terminal state and cancellation.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Why the session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    /// The operator closed the window or asked to quit.
    Quit,
    /// The device closed the video stream.
    DeviceDisconnected,
    /// A fatal error in some component.
    Failed(String),
}

impl Terminal {
    /// Clean shutdowns map to a zero exit status.
    pub fn is_clean(&self) -> bool {
        matches!(self, Terminal::Quit)
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Quit => f.write_str("quit requested"),
            Terminal::DeviceDisconnected => f.write_str("device disconnected"),
            Terminal::Failed(reason) => write!(f, "{reason}"),
        }
    }
}

/// Shared handle every pipeline task observes.
///
/// The first call to [`Liveness::terminate`] records the reason and
/// cancels the token; later calls are ignored.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    token: CancellationToken,
    terminal: Arc<Mutex<Option<Terminal>>>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `reason` if nothing was recorded yet, then cancel.
    /// Returns whether this call set the terminal state.
    pub fn terminate(&self, reason: Terminal) -> bool {
        let first = {
            let mut slot = self.terminal.lock();
            if slot.is_none() {
                info!(reason = %reason, "session terminating");
                *slot = Some(reason);
                true
            } else {
                debug!(ignored = %reason, "session already terminating");
                false
            }
        };
        self.token.cancel();
        first
    }

    pub fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the session has been terminated.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The recorded reason, if the session has ended.
    pub fn terminal(&self) -> Option<Terminal> {
        self.terminal.lock().clone()
    }
}
