//! Video ingest: socket bytes in, packets out to the decoder and recorder.

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info};

use crate::codec::VideoCodec;
use crate::error::StreamError;
use crate::packet::Packet;
use crate::session::{Liveness, Terminal};

/// Where ingested packets go. Either side may be absent.
#[derive(Debug, Default)]
pub struct IngestTargets {
    /// Bounded: a slow decoder applies backpressure to the socket.
    pub decoder: Option<mpsc::Sender<Packet>>,
    /// Unbounded: recording never stalls the video path.
    pub recorder: Option<mpsc::UnboundedSender<Packet>>,
}

/// Reads packets off the video connection in arrival order.
pub struct VideoIngest<R> {
    frames: FramedRead<R, VideoCodec>,
    received: u64,
}

impl<R> VideoIngest<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, max_payload: usize) -> Self {
        Self {
            frames: FramedRead::new(reader, VideoCodec::new(max_payload)),
            received: 0,
        }
    }

    /// Packets read so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// The next complete packet; `Ok(None)` at a clean end of stream.
    pub async fn next_packet(&mut self) -> Result<Option<Packet>, StreamError> {
        let next = self.frames.next().await.transpose()?;
        if next.is_some() {
            self.received += 1;
        }
        Ok(next)
    }

    /// Forward packets until the stream ends or the session is cancelled.
    ///
    /// End of stream terminates the session as a device disconnect and a
    /// stream error as a failure.
    pub async fn run(mut self, liveness: Liveness, mut targets: IngestTargets) {
        info!("video ingest started");
        loop {
            let next = tokio::select! {
                biased;
                _ = liveness.cancelled() => break,
                next = self.next_packet() => next,
            };

            let packet = match next {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    info!(packets = self.received, "video stream ended");
                    liveness.terminate(Terminal::DeviceDisconnected);
                    break;
                }
                Err(e) => {
                    error!(error = %e, "video stream failed");
                    liveness.terminate(Terminal::Failed(e.to_string()));
                    break;
                }
            };

            if let Some(recorder) = &targets.recorder {
                if recorder.send(packet.clone()).is_err() {
                    debug!("recorder gone; no longer tapping packets");
                    targets.recorder = None;
                }
            }

            if let Some(decoder) = &targets.decoder {
                let sent = tokio::select! {
                    biased;
                    _ = liveness.cancelled() => break,
                    sent = decoder.send(packet) => sent,
                };
                if sent.is_err() {
                    debug!("decoder gone; stopping ingest");
                    break;
                }
            }
        }
        debug!(packets = self.received, "video ingest stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DEFAULT_MAX_PAYLOAD;
    use bytes::BytesMut;
    use tokio_util::codec::Encoder;

    fn wire(packets: &[Packet]) -> Vec<u8> {
        let mut codec = VideoCodec::default();
        let mut buf = BytesMut::new();
        for p in packets {
            codec.encode(p.clone(), &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[tokio::test]
    async fn forwards_in_order_then_reports_disconnect() {
        let packets = vec![
            Packet::config(vec![0x67]),
            Packet::media(1000, true, vec![1]),
            Packet::media(1016, false, vec![2]),
        ];
        let reader = tokio_test::io::Builder::new().read(&wire(&packets)).build();
        let (dec_tx, mut dec_rx) = mpsc::channel(8);
        let (rec_tx, mut rec_rx) = mpsc::unbounded_channel();
        let live = Liveness::new();

        VideoIngest::new(reader, DEFAULT_MAX_PAYLOAD)
            .run(
                live.clone(),
                IngestTargets {
                    decoder: Some(dec_tx),
                    recorder: Some(rec_tx),
                },
            )
            .await;

        for expected in &packets {
            assert_eq!(dec_rx.recv().await.as_ref(), Some(expected));
            assert_eq!(rec_rx.recv().await.as_ref(), Some(expected));
        }
        assert!(dec_rx.recv().await.is_none());
        assert_eq!(live.terminal(), Some(Terminal::DeviceDisconnected));
    }

    #[tokio::test]
    async fn oversized_packet_fails_session() {
        let bytes = wire(&[Packet::media(1, true, vec![0; 64])]);
        let reader = tokio_test::io::Builder::new().read(&bytes).build();
        let live = Liveness::new();
        VideoIngest::new(reader, 16)
            .run(live.clone(), IngestTargets::default())
            .await;
        assert!(matches!(live.terminal(), Some(Terminal::Failed(_))));
    }

    #[tokio::test]
    async fn cancellation_unblocks_pending_read() {
        let (near, _far) = tokio::io::duplex(64);
        let live = Liveness::new();
        let task = tokio::spawn(
            VideoIngest::new(near, DEFAULT_MAX_PAYLOAD).run(live.clone(), IngestTargets::default()),
        );
        live.terminate(Terminal::Quit);
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn next_packet_reassembles_split_reads() {
        let bytes = wire(&[Packet::media(42, false, vec![7; 10])]);
        let reader = tokio_test::io::Builder::new()
            .read(&bytes[..5])
            .read(&bytes[5..15])
            .read(&bytes[15..])
            .build();
        let mut ingest = VideoIngest::new(reader, DEFAULT_MAX_PAYLOAD);
        let p = ingest.next_packet().await.unwrap().unwrap();
        assert_eq!(p.pts(), 42);
        assert!(ingest.next_packet().await.unwrap().is_none());
        assert_eq!(ingest.received(), 1);
    }
}
