//! # scry-core
//!
//! Mirroring pipeline for an Android device reached over a bridge tunnel.
//!
//! This crate contains:
//! - **Wire types**: `DeviceHeader`, `PacketHeader`, `Packet`, `ControlMessage`, `DeviceEvent`
//! - **Codecs**: `VideoCodec`, `ControlCodec` and `DeviceCodec` for framed I/O via `tokio_util`
//! - **Session**: bridge seam, server launch, tunnel and handshake (`Session`)
//! - **Pipeline**: video ingest, decode driver, frame buffer, controller and renderer loop
//! - **Recorder**: remuxing of the raw stream into MP4 or Matroska
//! - **Task**: `TaskSet` for tracking the session's spawned work
//! - **Error**: typed, `thiserror`-based error hierarchy folded into `ScryError`

pub mod codec;
pub mod control;
pub mod decode;
pub mod error;
pub mod fixed;
pub mod flags;
pub mod frame;
pub mod header;
pub mod ingest;
pub mod message;
pub mod packet;
pub mod pipeline;
pub mod record;
pub mod render;
pub mod session;
pub mod task;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{ControlCodec, DEFAULT_MAX_PAYLOAD, DeviceCodec, VideoCodec};
pub use control::{ControlSender, Controller};
pub use decode::{DecodeDriver, DecodeEngine, PassthroughDecoder};
pub use error::{
    ConnectionError, DecodeError, ProtocolError, RecordError, ScryError, SendError, StreamError,
};
pub use fixed::{Position, UFixed16, UFixed32};
pub use flags::{MetaState, PacketFlags};
pub use frame::{Frame, FrameBuffer, FramePolicy};
pub use header::{DeviceHeader, FrameSize, HANDSHAKE_TIMEOUT, PacketHeader};
pub use ingest::{IngestTargets, VideoIngest};
pub use message::{ControlMessage, DeviceEvent, KeyAction, ScreenPowerMode, TouchAction};
pub use packet::Packet;
pub use pipeline::{Pipeline, PipelineConfig, PipelineReport};
pub use record::{RecordFormat, Recorder, RecordingSink};
pub use render::{
    DeviceCommand, DisplaySink, InputEvent, RendererConfig, RendererLoop, WindowCommand,
    WindowGeometry,
};
pub use session::{
    AdbBridge, Bridge, Crop, DeviceInfo, Liveness, ServerParams, ServerProcess, Session,
    SessionConfig, Terminal,
};
pub use task::TaskSet;
