//! On-device mirroring server: launch parameters and process handle.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, warn};

/// Abstract socket name the server connects to through the reverse tunnel.
pub const DEFAULT_SOCKET_NAME: &str = "scry";
/// Where the server binary is pushed on the device.
pub const DEFAULT_DEVICE_PATH: &str = "/data/local/tmp/scry-server.jar";
/// Entry point passed to `app_process`.
pub const DEFAULT_MAIN_CLASS: &str = "io.scry.server.Server";
/// Default video bit rate in bits per second.
pub const DEFAULT_BIT_RATE: u32 = 8_000_000;

const TERMINATE_GRACE: Duration = Duration::from_secs(2);

// ── Crop ─────────────────────────────────────────────────────────

/// Device-side crop rectangle, `width:height:x:y` in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    pub width: u16,
    pub height: u16,
    pub x: u16,
    pub y: u16,
}

impl fmt::Display for Crop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.width, self.height, self.x, self.y)
    }
}

impl FromStr for Crop {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [w, h, x, y] = parts.as_slice() else {
            return Err(format!("crop must be width:height:x:y, got {s:?}"));
        };
        let parse = |v: &str| {
            v.trim()
                .parse::<u16>()
                .map_err(|e| format!("invalid crop component {v:?}: {e}"))
        };
        let crop = Crop {
            width: parse(w)?,
            height: parse(h)?,
            x: parse(x)?,
            y: parse(y)?,
        };
        if crop.width == 0 || crop.height == 0 {
            return Err("crop width and height must be non-zero".into());
        }
        Ok(crop)
    }
}

// ── ServerParams ─────────────────────────────────────────────────

/// Everything needed to push and start the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerParams {
    /// Local server binary pushed before launch.
    pub server_path: PathBuf,
    /// Destination of the push on the device.
    pub device_path: String,
    pub main_class: String,
    pub socket_name: String,
    /// Longest side in pixels, 0 for the native size.
    pub max_size: u16,
    pub bit_rate: u32,
    /// 0 leaves the frame rate unlimited.
    pub max_fps: u16,
    pub crop: Option<Crop>,
    /// Whether the server should read the control socket.
    pub control: bool,
}

impl Default for ServerParams {
    fn default() -> Self {
        Self {
            server_path: PathBuf::from("scry-server.jar"),
            device_path: DEFAULT_DEVICE_PATH.into(),
            main_class: DEFAULT_MAIN_CLASS.into(),
            socket_name: DEFAULT_SOCKET_NAME.into(),
            max_size: 0,
            bit_rate: DEFAULT_BIT_RATE,
            max_fps: 0,
            crop: None,
            control: true,
        }
    }
}

impl ServerParams {
    /// Positional arguments after the main class.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            self.socket_name.clone(),
            self.max_size.to_string(),
            self.bit_rate.to_string(),
            self.max_fps.to_string(),
            self.crop.map_or_else(|| "-".to_owned(), |c| c.to_string()),
            self.control.to_string(),
        ]
    }

    /// The remote shell command line starting the server.
    pub fn shell_command(&self) -> Vec<String> {
        let mut cmd = vec![
            format!("CLASSPATH={}", self.device_path),
            "app_process".into(),
            "/".into(),
            self.main_class.clone(),
        ];
        cmd.extend(self.to_args());
        cmd
    }
}

// ── ServerProcess ────────────────────────────────────────────────

/// Handle on the bridge process running the server.
///
/// The child is killed on drop; [`ServerProcess::terminate`] waits for it.
#[derive(Debug, Default)]
pub struct ServerProcess {
    child: Option<Child>,
}

impl ServerProcess {
    pub fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    /// A handle with no local process, for bridges that manage it elsewhere.
    pub fn detached() -> Self {
        Self { child: None }
    }

    pub fn is_attached(&self) -> bool {
        self.child.is_some()
    }

    /// Stop the server and reap the bridge process. Idempotent.
    pub async fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!(%status, "server already exited");
            return;
        }
        if let Err(e) = child.start_kill() {
            warn!(error = %e, "failed to signal server process");
        }
        match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "server process reaped"),
            Ok(Err(e)) => warn!(error = %e, "failed to reap server process"),
            Err(_) => warn!("server process did not exit in time"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_parses_and_prints() {
        let crop: Crop = "1224:1440:0:0".parse().unwrap();
        assert_eq!(crop.width, 1224);
        assert_eq!(crop.to_string(), "1224:1440:0:0");
        assert!("1:2:3".parse::<Crop>().is_err());
        assert!("0:10:0:0".parse::<Crop>().is_err());
        assert!("a:b:c:d".parse::<Crop>().is_err());
    }

    #[test]
    fn args_follow_params() {
        let params = ServerParams {
            max_size: 1024,
            max_fps: 30,
            crop: Some(Crop {
                width: 100,
                height: 200,
                x: 1,
                y: 2,
            }),
            control: false,
            ..Default::default()
        };
        assert_eq!(
            params.to_args(),
            ["scry", "1024", "8000000", "30", "100:200:1:2", "false"]
        );
        let cmd = params.shell_command();
        assert_eq!(cmd[0], "CLASSPATH=/data/local/tmp/scry-server.jar");
        assert_eq!(cmd[3], DEFAULT_MAIN_CLASS);
    }

    #[tokio::test]
    async fn detached_terminate_is_noop() {
        let mut proc = ServerProcess::detached();
        proc.terminate().await;
        proc.terminate().await;
        assert!(!proc.is_attached());
    }
}
