//! scry: mirror and control an Android device.
//!
//! ```text
//! scry                          Mirror the only connected device
//! scry -s <serial> -r out.mkv   Mirror and record a given device
//! scry --config <path>          Use custom config TOML
//! scry --gen-config             Dump default config and exit
//! ```
//!
//! Exits with 0 after a clean quit and 1 when the session could not be
//! established or ended in failure, including a device disconnect.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use scry_core::pipeline::DEFAULT_SHUTDOWN_GRACE;
use scry_core::{AdbBridge, Pipeline, PipelineReport, ScryError, Session};

use scry_client::config::ClientConfig;
use scry_client::console;
use scry_client::display::HeadlessSink;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "scry", version, about = "Android screen mirroring and control")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(long, default_value = "scry.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Serial of the device to mirror.
    #[arg(short, long)]
    serial: Option<String>,

    /// Local port of the tunnel.
    #[arg(short, long)]
    port: Option<u16>,

    /// Local server binary to push to the device.
    #[arg(long, env = "SCRY_SERVER_PATH")]
    server: Option<PathBuf>,

    /// Encode at this bit rate (bits per second).
    #[arg(long)]
    bit_rate: Option<u32>,

    /// Limit the longest video side, in pixels.
    #[arg(short, long)]
    max_size: Option<u16>,

    /// Limit the frame rate.
    #[arg(long)]
    max_fps: Option<u16>,

    /// Crop the device screen: width:height:x:y.
    #[arg(long)]
    crop: Option<String>,

    /// Do not send input to the device.
    #[arg(short = 'n', long)]
    no_control: bool,

    /// Do not mirror on screen; requires --record.
    #[arg(short = 'N', long)]
    no_display: bool,

    /// Record the stream to this file.
    #[arg(short, long)]
    record: Option<PathBuf>,

    /// Container of the recording: mp4 or mkv.
    #[arg(long)]
    record_format: Option<String>,

    /// Present every frame instead of only the newest.
    #[arg(long)]
    render_expired_frames: bool,

    /// Inject letters and space as text.
    #[arg(long)]
    prefer_text: bool,

    /// Device directory for dropped files.
    #[arg(long)]
    push_target: Option<String>,

    /// Turn the device screen off right after connecting.
    #[arg(short = 'S', long)]
    turn_screen_off: bool,

    /// Show touches on the device while mirroring.
    #[arg(short = 't', long)]
    show_touches: bool,

    /// Log the frame rate every second.
    #[arg(long)]
    show_fps: bool,

    /// Start fullscreen.
    #[arg(short, long)]
    fullscreen: bool,

    #[arg(long)]
    window_title: Option<String>,

    #[arg(long, allow_negative_numbers = true)]
    window_x: Option<i32>,

    #[arg(long, allow_negative_numbers = true)]
    window_y: Option<i32>,

    #[arg(long)]
    window_width: Option<u32>,

    #[arg(long)]
    window_height: Option<u32>,

    #[arg(long)]
    window_borderless: bool,

    #[arg(long)]
    always_on_top: bool,
}

impl Cli {
    /// Flags win over the config file.
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(serial) = &self.serial {
            config.device.serial = serial.clone();
        }
        if let Some(port) = self.port {
            config.device.local_port = port;
        }
        if let Some(server) = &self.server {
            config.server.path = server.clone();
        }
        if let Some(bit_rate) = self.bit_rate {
            config.server.bit_rate = bit_rate;
        }
        if let Some(max_size) = self.max_size {
            config.server.max_size = max_size;
        }
        if let Some(max_fps) = self.max_fps {
            config.server.max_fps = max_fps;
        }
        if let Some(crop) = &self.crop {
            config.server.crop = crop.clone();
        }
        if let Some(record) = &self.record {
            config.record.path = record.display().to_string();
        }
        if let Some(format) = &self.record_format {
            config.record.format = format.clone();
        }
        if let Some(target) = &self.push_target {
            config.input.push_target = target.clone();
        }
        if let Some(title) = &self.window_title {
            config.display.title = title.clone();
        }
        config.display.x = self.window_x.or(config.display.x);
        config.display.y = self.window_y.or(config.display.y);
        if let Some(width) = self.window_width {
            config.display.width = width;
        }
        if let Some(height) = self.window_height {
            config.display.height = height;
        }

        config.input.control &= !self.no_control;
        config.display.enabled &= !self.no_display;
        config.display.render_expired_frames |= self.render_expired_frames;
        config.input.prefer_text |= self.prefer_text;
        config.device.turn_screen_off |= self.turn_screen_off;
        config.device.show_touches |= self.show_touches;
        config.display.show_fps |= self.show_fps;
        config.display.fullscreen |= self.fullscreen;
        config.display.borderless |= self.window_borderless;
        config.display.always_on_top |= self.always_on_top;
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.gen_config {
        return match toml::to_string_pretty(&ClientConfig::default()) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("cannot render default config: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let mut config = ClientConfig::load(&cli.config);
    cli.apply(&mut config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("scry v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    match run(&config).await {
        Ok(report) if report.is_clean() => ExitCode::SUCCESS,
        Ok(report) => {
            error!(terminal = %report.terminal, "session ended abnormally");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &ClientConfig) -> Result<PipelineReport, ScryError> {
    let session_config = config
        .session_config()
        .map_err(|e| ScryError::Terminated(e.to_string()))?;
    let pipeline_config = config
        .pipeline_config()
        .map_err(|e| ScryError::Terminated(e.to_string()))?;

    // ── 1. Connect ──────────────────────────────────────────────

    let bridge = Arc::new(AdbBridge::default());
    let session = Session::connect(bridge, session_config).await?;
    let geometry = config.geometry(session.device_name(), session.frame_size());

    // ── 2. Start the pipeline ───────────────────────────────────

    let mut pipeline = Pipeline::start(session, pipeline_config).await?;

    let (events, input) = mpsc::unbounded_channel();
    let console = tokio::spawn(console::run(
        tokio::io::stdin(),
        events,
        pipeline.liveness().token().clone(),
    ));

    // ── 3. Render until the session ends ────────────────────────

    let renderer = pipeline.renderer(HeadlessSink::new(input), geometry);
    let outcome = renderer.run().await;

    // ── 4. Shutdown ─────────────────────────────────────────────

    info!("shutting down");
    let report = pipeline.shutdown(DEFAULT_SHUTDOWN_GRACE).await;
    console.abort();
    let _ = console.await;

    if report.recording_degraded {
        warn!("recording timestamps were corrected; playback may stutter");
    }
    outcome?;
    Ok(report)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "scry",
            "-s",
            "emulator-5554",
            "--bit-rate",
            "2000000",
            "-m",
            "1024",
            "--crop",
            "1080:1080:0:0",
            "-n",
            "-N",
            "-r",
            "out.mkv",
            "--render-expired-frames",
            "--window-x",
            "-20",
            "-S",
        ]);
        let mut config = ClientConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.device.serial, "emulator-5554");
        assert_eq!(config.server.bit_rate, 2_000_000);
        assert_eq!(config.server.max_size, 1024);
        assert_eq!(config.server.crop, "1080:1080:0:0");
        assert!(!config.input.control);
        assert!(!config.display.enabled);
        assert_eq!(config.record.path, "out.mkv");
        assert!(config.display.render_expired_frames);
        assert_eq!(config.display.x, Some(-20));
        assert!(config.device.turn_screen_off);
        config.validate().unwrap();
    }

    #[test]
    fn absent_flags_keep_config() {
        let mut config = ClientConfig::default();
        config.server.max_fps = 30;
        config.display.show_fps = true;
        Cli::parse_from(["scry"]).apply(&mut config);
        assert_eq!(config.server.max_fps, 30);
        assert!(config.display.show_fps);
        assert!(config.input.control);
    }
}
