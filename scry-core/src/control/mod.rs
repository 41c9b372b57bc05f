//! Controller: the host end of the control connection.
//!
//! One writer task owns the write half and drains a queue, so messages
//! reach the device whole and in `send` order. One reader task owns the
//! read half and queues device events. Neither direction can block the
//! other.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::codec::ControlCodec;
use crate::error::{ProtocolError, SendError};
use crate::message::{ControlMessage, DeviceEvent};
use crate::session::{Liveness, Terminal};
use crate::task::TaskSet;

/// Sending half, cheap to clone for other producers (file pusher, console).
#[derive(Debug, Clone)]
pub struct ControlSender {
    tx: Option<mpsc::UnboundedSender<ControlMessage>>,
}

impl ControlSender {
    /// A sender that refuses everything; used when control is off.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue a message. Never blocks; ordering is preserved.
    pub fn send(&self, msg: ControlMessage) -> Result<(), SendError> {
        let tx = self.tx.as_ref().ok_or(SendError::Disabled)?;
        tx.send(msg).map_err(|_| SendError::Closed)
    }
}

/// Handle owned by the renderer.
#[derive(Debug)]
pub struct Controller {
    sender: ControlSender,
    events: Option<mpsc::UnboundedReceiver<DeviceEvent>>,
}

impl Controller {
    /// Spawn the writer and reader tasks over `stream`.
    pub fn spawn<S>(stream: S, liveness: Liveness, tasks: &mut TaskSet) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let sink = FramedWrite::new(write_half, ControlCodec);
        let source = FramedRead::new(read_half, ControlCodec);

        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tasks.spawn("control-writer", write_loop(sink, msg_rx, liveness.clone()));
        tasks.spawn("control-reader", read_loop(source, event_tx, liveness));

        Self {
            sender: ControlSender { tx: Some(msg_tx) },
            events: Some(event_rx),
        }
    }

    /// A controller that sends nothing and never yields events.
    pub fn disabled() -> Self {
        Self {
            sender: ControlSender::disabled(),
            events: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_enabled()
    }

    pub fn sender(&self) -> ControlSender {
        self.sender.clone()
    }

    pub fn send(&self, msg: ControlMessage) -> Result<(), SendError> {
        self.sender.send(msg)
    }

    /// The next queued device event, without waiting.
    pub fn poll_device_event(&mut self) -> Option<DeviceEvent> {
        self.events.as_mut()?.try_recv().ok()
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, ControlCodec>,
    mut rx: mpsc::UnboundedReceiver<ControlMessage>,
    liveness: Liveness,
) where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    loop {
        let msg = tokio::select! {
            biased;
            _ = liveness.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        let tag = msg.tag();
        let sent = tokio::select! {
            biased;
            _ = liveness.cancelled() => break,
            sent = sink.send(msg) => sent,
        };
        match sent {
            Ok(()) => written += 1,
            Err(ProtocolError::Io(e)) => {
                error!(error = %e, "control channel write failed");
                liveness.terminate(Terminal::Failed(format!("control channel broken: {e}")));
                break;
            }
            Err(e) => warn!(error = %e, tag, "dropping unencodable control message"),
        }
    }
    debug!(written, "control writer stopped");
}

async fn read_loop<R>(
    mut source: FramedRead<R, ControlCodec>,
    events: mpsc::UnboundedSender<DeviceEvent>,
    liveness: Liveness,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = liveness.cancelled() => break,
            next = source.next() => next,
        };
        match next {
            Some(Ok(event)) => {
                debug!(?event, "device event");
                if events.send(event).is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                error!(error = %e, "control channel read failed");
                liveness.terminate(Terminal::Failed(format!("control channel broken: {e}")));
                break;
            }
            None => {
                info!("device closed the control channel");
                break;
            }
        }
    }
    debug!("control reader stopped");
}
