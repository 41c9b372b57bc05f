//! Operator console.
//!
//! Reads commands from stdin, one per line, and turns them into the same
//! input events a window would produce. Ctrl-C closes the session.
//!
//! ```text
//! home | back | menu | app-switch | power | volume-up | volume-down
//! expand | collapse | rotate | screen-off | screen-on
//! get-clipboard | clip <text> | paste <text> | text <text>
//! tap <x> <y> | scroll <x> <y> <dx> <dy> | push <path>
//! fps | fullscreen | fit | pixel-perfect | on-top | quit
//! ```
//!
//! Coordinates are window pixels.

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scry_core::render::{DeviceCommand, InputEvent, POINTER_ID_MOUSE, WindowCommand};
use scry_core::TouchAction;

/// Parse one console line. Blank lines yield no events.
pub fn parse_line(line: &str) -> Result<Vec<InputEvent>, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let event = match word.to_ascii_lowercase().as_str() {
        "" => return Ok(Vec::new()),
        "quit" | "q" => InputEvent::Close,
        "home" => InputEvent::Command(DeviceCommand::Home),
        "back" => InputEvent::Command(DeviceCommand::Back),
        "menu" => InputEvent::Command(DeviceCommand::Menu),
        "app-switch" => InputEvent::Command(DeviceCommand::AppSwitch),
        "power" => InputEvent::Command(DeviceCommand::Power),
        "volume-up" => InputEvent::Command(DeviceCommand::VolumeUp),
        "volume-down" => InputEvent::Command(DeviceCommand::VolumeDown),
        "expand" => InputEvent::Command(DeviceCommand::ExpandNotificationPanel),
        "collapse" => InputEvent::Command(DeviceCommand::CollapseNotificationPanel),
        "rotate" => InputEvent::Command(DeviceCommand::RotateDevice),
        "screen-off" => InputEvent::Command(DeviceCommand::ScreenOff),
        "screen-on" => InputEvent::Command(DeviceCommand::ScreenOn),
        "get-clipboard" => InputEvent::Command(DeviceCommand::GetClipboard),
        "clip" | "paste" => InputEvent::Command(DeviceCommand::SetClipboard {
            text: rest.to_owned(),
            paste: word.eq_ignore_ascii_case("paste"),
        }),
        "text" if !rest.is_empty() => InputEvent::Text(rest.to_owned()),
        "push" if !rest.is_empty() => InputEvent::FileDropped(PathBuf::from(rest)),
        "fps" => InputEvent::ToggleFps,
        "fullscreen" => InputEvent::Window(WindowCommand::ToggleFullscreen),
        "fit" => InputEvent::Window(WindowCommand::ResizeToFit),
        "pixel-perfect" => InputEvent::Window(WindowCommand::PixelPerfect),
        "on-top" => InputEvent::Window(WindowCommand::ToggleAlwaysOnTop),
        "tap" => {
            let [x, y] = numbers::<2>(rest)?;
            let touch = |action| InputEvent::Pointer {
                pointer_id: POINTER_ID_MOUSE,
                action,
                x,
                y,
                pressure: 1.0,
            };
            return Ok(vec![touch(TouchAction::Down), touch(TouchAction::Up)]);
        }
        "scroll" => {
            let [x, y, hscroll, vscroll] = numbers::<4>(rest)?;
            InputEvent::Scroll {
                x,
                y,
                hscroll,
                vscroll,
            }
        }
        other => return Err(format!("unknown command: {other}")),
    };
    Ok(vec![event])
}

fn numbers<const N: usize>(args: &str) -> Result<[i32; N], String> {
    let parsed = args
        .split_whitespace()
        .map(|s| s.parse::<i32>().map_err(|e| format!("{s}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    parsed
        .try_into()
        .map_err(|v: Vec<i32>| format!("expected {N} numbers, got {}", v.len()))
}

/// Forward commands from `input` until it ends or `cancel` fires.
pub async fn run<R>(input: R, events: mpsc::UnboundedSender<InputEvent>, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                let _ = events.send(InputEvent::Close);
                break;
            }
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => match parse_line(&line) {
                Ok(parsed) => {
                    for event in parsed {
                        if events.send(event).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!("{e}"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "console read failed");
                break;
            }
        }
    }
    // Input ended: keep waiting for Ctrl-C so a detached stdin does not
    // end the session.
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::signal::ctrl_c() => {
            let _ = events.send(InputEvent::Close);
        }
    }
    // The sender drops here and the sink reports the window closed.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_commands() {
        assert_eq!(
            parse_line("  HOME ").unwrap(),
            vec![InputEvent::Command(DeviceCommand::Home)]
        );
        assert_eq!(
            parse_line("paste hello world").unwrap(),
            vec![InputEvent::Command(DeviceCommand::SetClipboard {
                text: "hello world".into(),
                paste: true,
            })]
        );
        assert_eq!(parse_line("").unwrap(), Vec::new());
        assert_eq!(parse_line("q").unwrap(), vec![InputEvent::Close]);
    }

    #[test]
    fn tap_is_down_then_up() {
        let events = parse_line("tap 10 20").unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            InputEvent::Pointer { action: TouchAction::Down, x: 10, y: 20, .. }
        ));
        assert!(matches!(
            events[1],
            InputEvent::Pointer { action: TouchAction::Up, .. }
        ));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_line("tap 10").is_err());
        assert!(parse_line("scroll 1 2 x 4").is_err());
        assert!(parse_line("text").is_err());
        assert!(parse_line("launch").is_err());
    }

    #[tokio::test]
    async fn forwards_lines_until_cancelled() {
        let input = tokio_test::io::Builder::new()
            .read(b"home\nbogus\npush /tmp/a.apk\n")
            .build();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(input, tx, cancel.clone()));

        assert_eq!(
            rx.recv().await,
            Some(InputEvent::Command(DeviceCommand::Home))
        );
        assert_eq!(
            rx.recv().await,
            Some(InputEvent::FileDropped(PathBuf::from("/tmp/a.apk")))
        );
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }
}
