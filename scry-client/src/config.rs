//! Client configuration.
//!
//! Loaded from TOML, then overridden by command-line flags, then turned
//! into the session and pipeline settings of `scry-core`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use scry_core::frame::FramePolicy;
use scry_core::pipeline::DEFAULT_PUSH_TARGET;
use scry_core::record::{RecordFormat, RecordingSink};
use scry_core::render::{RendererConfig, WindowGeometry};
use scry_core::session::server::DEFAULT_BIT_RATE;
use scry_core::{Crop, FrameSize, PipelineConfig, RecordError, ServerParams, SessionConfig};

/// Local port of the reverse tunnel when none is configured.
pub const DEFAULT_LOCAL_PORT: u16 = 27183;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid crop {value:?}: {reason}")]
    Crop { value: String, reason: String },

    #[error("no-display mode needs a recording target")]
    NothingToDo,

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Top-level configuration for the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub device: DeviceConfig,
    pub server: ServerConfig,
    pub display: DisplayConfig,
    pub input: InputConfig,
    pub record: RecordConfig,
    pub logging: LoggingConfig,
}

/// Which device and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device serial; empty picks the only online device.
    pub serial: String,
    /// Local end of the reverse tunnel.
    pub local_port: u16,
    pub show_touches: bool,
    pub turn_screen_off: bool,
}

/// Parameters handed to the device server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Local server binary. `SCRY_SERVER_PATH` overrides it.
    pub path: PathBuf,
    /// Longest video side in pixels, 0 for native.
    pub max_size: u16,
    pub bit_rate: u32,
    /// 0 leaves the frame rate unlimited.
    pub max_fps: u16,
    /// `width:height:x:y`, empty for no crop.
    pub crop: String,
    /// Seconds to wait for the device to connect back.
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Mirror on screen. Off is only valid while recording.
    pub enabled: bool,
    /// Window title; empty uses the device name.
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    /// 0 derives the side from the device aspect ratio.
    pub width: u32,
    pub height: u32,
    pub borderless: bool,
    pub always_on_top: bool,
    pub fullscreen: bool,
    /// Present every decoded frame instead of only the newest.
    pub render_expired_frames: bool,
    pub show_fps: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Forward input to the device.
    pub control: bool,
    /// Send letters and space as text rather than key events.
    pub prefer_text: bool,
    /// Device directory dropped files are pushed to.
    pub push_target: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    /// Output file; empty disables recording.
    pub path: String,
    /// `mp4` or `mkv`; empty infers from the file extension.
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial: String::new(),
            local_port: DEFAULT_LOCAL_PORT,
            show_touches: false,
            turn_screen_off: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            path: ServerParams::default().server_path,
            max_size: 0,
            bit_rate: DEFAULT_BIT_RATE,
            max_fps: 0,
            crop: String::new(),
            connect_timeout_secs: 10,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            title: String::new(),
            x: None,
            y: None,
            width: 0,
            height: 0,
            borderless: false,
            always_on_top: false,
            fullscreen: false,
            render_expired_frames: false,
            show_fps: false,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            control: true,
            prefer_text: false,
            push_target: DEFAULT_PUSH_TARGET.into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::debug!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Reject combinations that cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.display.enabled && self.record.path.is_empty() {
            return Err(ConfigError::NothingToDo);
        }
        self.crop()?;
        self.recording()?;
        Ok(())
    }

    pub fn crop(&self) -> Result<Option<Crop>, ConfigError> {
        if self.server.crop.is_empty() {
            return Ok(None);
        }
        self.server
            .crop
            .parse()
            .map(Some)
            .map_err(|reason| ConfigError::Crop {
                value: self.server.crop.clone(),
                reason,
            })
    }

    pub fn recording(&self) -> Result<Option<RecordingSink>, ConfigError> {
        if self.record.path.is_empty() {
            return Ok(None);
        }
        let format = if self.record.format.is_empty() {
            None
        } else {
            Some(self.record.format.parse::<RecordFormat>()?)
        };
        Ok(Some(RecordingSink::new(&self.record.path, format)?))
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let timeout = Duration::from_secs(self.server.connect_timeout_secs);
        Ok(SessionConfig {
            serial: Some(self.device.serial.clone()).filter(|s| !s.is_empty()),
            local_port: self.device.local_port,
            server: ServerParams {
                server_path: self.server.path.clone(),
                max_size: self.server.max_size,
                bit_rate: self.server.bit_rate,
                max_fps: self.server.max_fps,
                crop: self.crop()?,
                control: self.input.control,
                ..ServerParams::default()
            },
            accept_timeout: timeout,
            show_touches: self.device.show_touches,
            ..SessionConfig::default()
        })
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        let frame_policy = if self.display.render_expired_frames {
            FramePolicy::Lossless
        } else {
            FramePolicy::LatestOnly
        };
        Ok(PipelineConfig {
            frame_policy,
            display: self.display.enabled,
            control: self.input.control,
            record: self.recording()?,
            renderer: RendererConfig {
                prefer_text: self.input.prefer_text,
                show_fps: self.display.show_fps,
                ..RendererConfig::default()
            },
            push_target: self.input.push_target.clone(),
            turn_screen_off: self.device.turn_screen_off,
            ..PipelineConfig::default()
        })
    }

    /// Initial window for a device of `frame` size named `device_name`.
    pub fn geometry(&self, device_name: &str, frame: FrameSize) -> WindowGeometry {
        let title = if self.display.title.is_empty() {
            device_name
        } else {
            &self.display.title
        };
        let mut geometry = WindowGeometry::new(title, frame, self.display.width, self.display.height);
        geometry.x = self.display.x;
        geometry.y = self.display.y;
        geometry.borderless = self.display.borderless;
        geometry.always_on_top = self.display.always_on_top;
        geometry.fullscreen = self.display.fullscreen;
        geometry
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ClientConfig::default()).unwrap();
        assert!(text.contains("bit_rate"));
        assert!(text.contains("push_target"));
        assert!(!text.contains("x ="));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&ClientConfig::default()).unwrap();
        let parsed: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.bit_rate, 8_000_000);
        assert_eq!(parsed.device.local_port, DEFAULT_LOCAL_PORT);
        assert_eq!(parsed.input.push_target, "/sdcard/");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: ClientConfig = toml::from_str("[record]\npath = \"out.mkv\"\n").unwrap();
        assert!(parsed.display.enabled);
        let sink = parsed.recording().unwrap().unwrap();
        assert_eq!(sink.format, RecordFormat::Matroska);
    }

    #[test]
    fn load_and_write_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scry.toml");
        assert_eq!(ClientConfig::load(&path).logging.level, "info");
        ClientConfig::write_default(&path).unwrap();
        assert_eq!(ClientConfig::load(&path).server.bit_rate, DEFAULT_BIT_RATE);

        std::fs::write(&path, "[server\nbroken").unwrap();
        assert_eq!(ClientConfig::load(&path).server.max_fps, 0);
    }

    #[test]
    fn no_display_requires_recording() {
        let mut cfg = ClientConfig::default();
        cfg.display.enabled = false;
        assert!(matches!(cfg.validate(), Err(ConfigError::NothingToDo)));
        cfg.record.path = "capture.mp4".into();
        cfg.validate().unwrap();
    }

    #[test]
    fn bad_record_target_is_rejected() {
        let mut cfg = ClientConfig::default();
        cfg.record.path = "capture.avi".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Record(_))));
        cfg.record.format = "mkv".into();
        cfg.validate().unwrap();
        cfg.record.format = "webm".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn converts_to_core_settings() {
        let mut cfg = ClientConfig::default();
        cfg.device.serial = "emulator-5554".into();
        cfg.server.crop = "1080:1080:0:600".into();
        cfg.input.control = false;
        cfg.display.render_expired_frames = true;

        let session = cfg.session_config().unwrap();
        assert_eq!(session.serial.as_deref(), Some("emulator-5554"));
        assert!(!session.server.control);
        assert_eq!(session.server.crop.unwrap().to_string(), "1080:1080:0:600");

        let pipeline = cfg.pipeline_config().unwrap();
        assert_eq!(pipeline.frame_policy, FramePolicy::Lossless);
        assert!(!pipeline.control);

        cfg.server.crop = "0:10:0:0".into();
        assert!(matches!(cfg.crop(), Err(ConfigError::Crop { .. })));
    }

    #[test]
    fn geometry_uses_device_name_and_aspect() {
        let mut cfg = ClientConfig::default();
        cfg.display.height = 1170;
        cfg.display.always_on_top = true;
        let g = cfg.geometry("Pixel 7", FrameSize::new(1080, 2340));
        assert_eq!(g.title, "Pixel 7");
        assert_eq!((g.width, g.height), (540, 1170));
        assert!(g.always_on_top);
    }
}
