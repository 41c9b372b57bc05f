//! Session/tunnel manager.
//!
//! [`Session::connect`] selects a device, pushes and launches the server
//! through a reverse tunnel, accepts the video then the control
//! connection, and reads the handshake. The session owns both sockets
//! until the pipeline takes them, and owns the server process until
//! [`Session::disconnect`].

pub mod bridge;
pub mod liveness;
pub mod server;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::error::ConnectionError;
use crate::header::{DeviceHeader, FrameSize, HANDSHAKE_TIMEOUT};

pub use bridge::{AdbBridge, Bridge, DeviceInfo};
pub use liveness::{Liveness, Terminal};
pub use server::{Crop, ServerParams, ServerProcess};

/// How long to wait for the server to connect back.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

// ── SessionConfig ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Explicit device serial; required when several devices are online.
    pub serial: Option<String>,
    /// Local tunnel port, 0 for an ephemeral one.
    pub local_port: u16,
    pub server: ServerParams,
    pub accept_timeout: Duration,
    pub handshake_timeout: Duration,
    pub show_touches: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            serial: None,
            local_port: 0,
            server: ServerParams::default(),
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            show_touches: false,
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

/// A live connection to one device.
pub struct Session {
    serial: String,
    header: DeviceHeader,
    video: Option<TcpStream>,
    control: Option<TcpStream>,
    bridge: Arc<dyn Bridge>,
    server: ServerProcess,
    liveness: Liveness,
    show_touches: bool,
    disconnected: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("serial", &self.serial)
            .field("header", &self.header)
            .field("disconnected", &self.disconnected)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub async fn connect(
        bridge: Arc<dyn Bridge>,
        config: SessionConfig,
    ) -> Result<Self, ConnectionError> {
        let serial = select_device(bridge.as_ref(), config.serial.as_deref()).await?;
        info!(serial = %serial, "device selected");

        let server_path = &config.server.server_path;
        if tokio::fs::metadata(server_path).await.is_err() {
            return Err(ConnectionError::ServerMissing(server_path.clone()));
        }
        bridge
            .push(&serial, server_path, &config.server.device_path)
            .await?;

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, config.local_port)).await?;
        let port = listener.local_addr()?.port();
        let socket_name = config.server.socket_name.as_str();
        bridge.reverse(&serial, socket_name, port).await?;
        debug!(port, socket = socket_name, "reverse tunnel open");

        let mut server = match bridge.launch_server(&serial, &config.server).await {
            Ok(server) => server,
            Err(e) => {
                remove_tunnel(bridge.as_ref(), &serial, socket_name).await;
                return Err(e);
            }
        };

        let established = establish(&listener, &config).await;
        // Both connections are in; anything else knocking is refused.
        drop(listener);
        remove_tunnel(bridge.as_ref(), &serial, socket_name).await;

        let (video, control, header) = match established {
            Ok(parts) => parts,
            Err(e) => {
                server.terminate().await;
                return Err(e);
            }
        };
        info!(
            device = %header.device_name,
            width = header.frame_size.width,
            height = header.frame_size.height,
            "handshake complete"
        );

        if config.show_touches {
            if let Err(e) = bridge.set_show_touches(&serial, true).await {
                warn!(error = %e, "could not enable show touches");
            }
        }

        Ok(Self {
            serial,
            header,
            video: Some(video),
            control: Some(control),
            bridge,
            server,
            liveness: Liveness::new(),
            show_touches: config.show_touches,
            disconnected: false,
        })
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn device_name(&self) -> &str {
        &self.header.device_name
    }

    pub fn frame_size(&self) -> FrameSize {
        self.header.frame_size
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn bridge(&self) -> Arc<dyn Bridge> {
        Arc::clone(&self.bridge)
    }

    /// Hand the video socket to the ingest task. `None` once taken.
    pub fn take_video(&mut self) -> Option<TcpStream> {
        self.video.take()
    }

    /// Hand the control socket to the controller. `None` once taken.
    pub fn take_control(&mut self) -> Option<TcpStream> {
        self.control.take()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Close both channels, stop the server and restore device settings.
    ///
    /// Tasks holding a taken socket observe the terminal state through
    /// [`Liveness`] and drop it themselves. Safe to call more than once.
    pub async fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        self.liveness.terminate(Terminal::Quit);
        self.video = None;
        self.control = None;

        if self.show_touches {
            if let Err(e) = self.bridge.set_show_touches(&self.serial, false).await {
                warn!(error = %e, "could not restore show touches");
            }
        }
        self.server.terminate().await;
        info!(serial = %self.serial, "session closed");
    }
}

// ── Connection steps ─────────────────────────────────────────────

/// Pick the device to mirror.
///
/// With a selector only that serial qualifies; without one exactly one
/// device must be online.
pub async fn select_device(
    bridge: &dyn Bridge,
    selector: Option<&str>,
) -> Result<String, ConnectionError> {
    let devices = bridge.devices().await?;
    for d in devices.iter().filter(|d| !d.is_online()) {
        debug!(serial = %d.serial, state = %d.state, "ignoring device");
    }
    let mut online = devices.into_iter().filter(DeviceInfo::is_online);

    match selector {
        Some(wanted) => online
            .find(|d| d.serial == wanted)
            .map(|d| d.serial)
            .ok_or_else(|| ConnectionError::NoDevice {
                selector: Some(wanted.to_owned()),
            }),
        None => {
            let mut online: Vec<DeviceInfo> = online.collect();
            match online.len() {
                0 => Err(ConnectionError::NoDevice { selector: None }),
                1 => Ok(online.remove(0).serial),
                count => Err(ConnectionError::AmbiguousDevice { count }),
            }
        }
    }
}

async fn establish(
    listener: &TcpListener,
    config: &SessionConfig,
) -> Result<(TcpStream, TcpStream, DeviceHeader), ConnectionError> {
    let mut video = accept(listener, "video connection", config.accept_timeout).await?;
    let control = accept(listener, "control connection", config.accept_timeout).await?;
    let header = DeviceHeader::read_from(&mut video, config.handshake_timeout).await?;
    Ok((video, control, header))
}

async fn accept(
    listener: &TcpListener,
    stage: &'static str,
    timeout: Duration,
) -> Result<TcpStream, ConnectionError> {
    match tokio::time::timeout(timeout, listener.accept()).await {
        Ok(Ok((stream, peer))) => {
            debug!(%peer, stage, "accepted");
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ConnectionError::Timeout {
            stage,
            after: timeout,
        }),
    }
}

async fn remove_tunnel(bridge: &dyn Bridge, serial: &str, socket_name: &str) {
    if let Err(e) = bridge.remove_reverse(serial, socket_name).await {
        warn!(error = %e, "could not remove reverse tunnel");
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;

    struct Listing(Vec<DeviceInfo>);

    #[async_trait]
    impl Bridge for Listing {
        async fn devices(&self) -> Result<Vec<DeviceInfo>, ConnectionError> {
            Ok(self.0.clone())
        }
        async fn push(&self, _: &str, _: &Path, _: &str) -> Result<(), ConnectionError> {
            Ok(())
        }
        async fn reverse(&self, _: &str, _: &str, _: u16) -> Result<(), ConnectionError> {
            Ok(())
        }
        async fn remove_reverse(&self, _: &str, _: &str) -> Result<(), ConnectionError> {
            Ok(())
        }
        async fn launch_server(
            &self,
            _: &str,
            _: &ServerParams,
        ) -> Result<ServerProcess, ConnectionError> {
            Ok(ServerProcess::detached())
        }
        async fn set_show_touches(&self, _: &str, _: bool) -> Result<(), ConnectionError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn selects_single_online_device() {
        let bridge = Listing(vec![
            DeviceInfo::new("a", "offline"),
            DeviceInfo::new("b", "device"),
        ]);
        assert_eq!(select_device(&bridge, None).await.unwrap(), "b");
    }

    #[tokio::test]
    async fn several_devices_need_a_selector() {
        let bridge = Listing(vec![
            DeviceInfo::new("a", "device"),
            DeviceInfo::new("b", "device"),
        ]);
        assert!(matches!(
            select_device(&bridge, None).await,
            Err(ConnectionError::AmbiguousDevice { count: 2 })
        ));
        assert_eq!(select_device(&bridge, Some("a")).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn selector_must_match_an_online_device() {
        let bridge = Listing(vec![DeviceInfo::new("a", "unauthorized")]);
        assert!(matches!(
            select_device(&bridge, Some("a")).await,
            Err(ConnectionError::NoDevice { selector: Some(_) })
        ));
        assert!(matches!(
            select_device(&Listing(vec![]), None).await,
            Err(ConnectionError::NoDevice { selector: None })
        ));
    }

    #[tokio::test]
    async fn missing_server_binary_fails_before_tunnel() {
        let bridge: Arc<dyn Bridge> = Arc::new(Listing(vec![DeviceInfo::new("a", "device")]));
        let config = SessionConfig {
            server: ServerParams {
                server_path: "/nonexistent/scry-server.jar".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            Session::connect(bridge, config).await,
            Err(ConnectionError::ServerMissing(_))
        ));
    }
}
