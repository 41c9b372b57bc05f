//! The device-bridge seam.
//!
//! [`Bridge`] covers everything the session asks of the external bridge
//! utility. [`AdbBridge`] shells out to `adb`; tests substitute their own
//! implementation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::server::{ServerParams, ServerProcess};
use crate::error::ConnectionError;

/// One line of the bridge's device listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    /// `device`, `offline`, `unauthorized`, ...
    pub state: String,
}

impl DeviceInfo {
    pub fn new(serial: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            state: state.into(),
        }
    }

    /// Ready to accept commands.
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

/// Operations the session performs through the bridge utility.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Devices currently known to the bridge, online or not.
    async fn devices(&self) -> Result<Vec<DeviceInfo>, ConnectionError>;

    /// Copy a local file to the device.
    async fn push(&self, serial: &str, local: &Path, remote: &str) -> Result<(), ConnectionError>;

    /// Forward the device's abstract socket `socket_name` to `local_port` on the host.
    async fn reverse(
        &self,
        serial: &str,
        socket_name: &str,
        local_port: u16,
    ) -> Result<(), ConnectionError>;

    async fn remove_reverse(&self, serial: &str, socket_name: &str) -> Result<(), ConnectionError>;

    /// Start the mirroring server; it connects back through the tunnel.
    async fn launch_server(
        &self,
        serial: &str,
        params: &ServerParams,
    ) -> Result<ServerProcess, ConnectionError>;

    /// Toggle the device's "show touches" developer setting.
    async fn set_show_touches(&self, serial: &str, enabled: bool) -> Result<(), ConnectionError>;
}

// ── AdbBridge ────────────────────────────────────────────────────

/// [`Bridge`] backed by the `adb` executable.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    program: PathBuf,
}

impl Default for AdbBridge {
    fn default() -> Self {
        Self::new(std::env::var_os("ADB").map_or_else(|| PathBuf::from("adb"), PathBuf::from))
    }
}

impl AdbBridge {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, serial: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(serial) = serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Run to completion; only the exit status and stdout matter.
    async fn run(&self, serial: Option<&str>, args: &[&str]) -> Result<String, ConnectionError> {
        let rendered = args.join(" ");
        debug!(command = %rendered, serial = serial.unwrap_or("-"), "running adb");
        let output = self
            .command(serial)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.unavailable(e))?;
        if !output.status.success() {
            return Err(ConnectionError::BridgeFailed {
                command: rendered,
                status: output.status.code(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn unavailable(&self, e: std::io::Error) -> ConnectionError {
        ConnectionError::BridgeUnavailable(format!("{}: {e}", self.program.display()))
    }
}

#[async_trait]
impl Bridge for AdbBridge {
    async fn devices(&self) -> Result<Vec<DeviceInfo>, ConnectionError> {
        let stdout = self.run(None, &["devices"]).await?;
        Ok(parse_devices(&stdout))
    }

    async fn push(&self, serial: &str, local: &Path, remote: &str) -> Result<(), ConnectionError> {
        let local = local.to_string_lossy();
        self.run(Some(serial), &["push", &local, remote]).await?;
        info!(serial, local = %local, remote, "pushed file");
        Ok(())
    }

    async fn reverse(
        &self,
        serial: &str,
        socket_name: &str,
        local_port: u16,
    ) -> Result<(), ConnectionError> {
        let remote = format!("localabstract:{socket_name}");
        let local = format!("tcp:{local_port}");
        self.run(Some(serial), &["reverse", &remote, &local]).await?;
        Ok(())
    }

    async fn remove_reverse(&self, serial: &str, socket_name: &str) -> Result<(), ConnectionError> {
        let remote = format!("localabstract:{socket_name}");
        self.run(Some(serial), &["reverse", "--remove", &remote])
            .await?;
        Ok(())
    }

    async fn launch_server(
        &self,
        serial: &str,
        params: &ServerParams,
    ) -> Result<ServerProcess, ConnectionError> {
        let child = self
            .command(Some(serial))
            .arg("shell")
            .args(params.shell_command())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.unavailable(e))?;
        info!(serial, pid = child.id(), "server launched");
        Ok(ServerProcess::new(child))
    }

    async fn set_show_touches(&self, serial: &str, enabled: bool) -> Result<(), ConnectionError> {
        let value = if enabled { "1" } else { "0" };
        self.run(
            Some(serial),
            &["shell", "settings", "put", "system", "show_touches", value],
        )
        .await?;
        Ok(())
    }
}

/// Parse `adb devices` output, skipping the banner and daemon chatter.
pub fn parse_devices(stdout: &str) -> Vec<DeviceInfo> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = fields.next()?;
            Some(DeviceInfo::new(serial, state))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_listing() {
        let out = "* daemon not running; starting now at tcp:5037\n\
                   * daemon started successfully\n\
                   List of devices attached\n\
                   emulator-5554\tdevice\n\
                   R58M123ABC\tunauthorized\n\
                   \n";
        let devices = parse_devices(out);
        assert_eq!(
            devices,
            vec![
                DeviceInfo::new("emulator-5554", "device"),
                DeviceInfo::new("R58M123ABC", "unauthorized"),
            ]
        );
        assert!(devices[0].is_online());
        assert!(!devices[1].is_online());
    }

    #[test]
    fn empty_listing() {
        assert!(parse_devices("List of devices attached\n\n").is_empty());
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let bridge = AdbBridge::new("/nonexistent/scry-test-adb");
        let err = bridge.devices().await.unwrap_err();
        assert!(matches!(err, ConnectionError::BridgeUnavailable(_)));
    }
}
