//! Matroska writer.
//!
//! The segment and every cluster are written with unknown size, so the
//! file is valid at any point and needs no seeking back on close.
//! Timestamps use a 1 µs scale; since block offsets are 16-bit, a new
//! cluster starts on every key frame and whenever the offset would
//! overflow.

use std::io::Write;

use tracing::debug;

use super::ContainerWriter;
use super::h264::{self, ParameterSets};
use crate::error::RecordError;
use crate::header::FrameSize;

const EBML: u32 = 0x1A45_DFA3;
const EBML_VERSION: u32 = 0x4286;
const EBML_READ_VERSION: u32 = 0x42F7;
const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
const DOC_TYPE: u32 = 0x4282;
const DOC_TYPE_VERSION: u32 = 0x4287;
const DOC_TYPE_READ_VERSION: u32 = 0x4285;

const SEGMENT: u32 = 0x1853_8067;
const INFO: u32 = 0x1549_A966;
const TIMESTAMP_SCALE: u32 = 0x2A_D7B1;
const MUXING_APP: u32 = 0x4D80;
const WRITING_APP: u32 = 0x5741;

const TRACKS: u32 = 0x1654_AE6B;
const TRACK_ENTRY: u32 = 0xAE;
const TRACK_NUMBER: u32 = 0xD7;
const TRACK_UID: u32 = 0x73C5;
const TRACK_TYPE: u32 = 0x83;
const CODEC_ID: u32 = 0x86;
const CODEC_PRIVATE: u32 = 0x63A2;
const VIDEO: u32 = 0xE0;
const PIXEL_WIDTH: u32 = 0xB0;
const PIXEL_HEIGHT: u32 = 0xBA;

const CLUSTER: u32 = 0x1F43_B675;
const CLUSTER_TIMESTAMP: u32 = 0xE7;
const SIMPLE_BLOCK: u32 = 0xA3;

/// Nanoseconds per timestamp tick.
const NS_PER_TICK: u64 = 1_000;
const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
const APP_NAME: &str = concat!("scry ", env!("CARGO_PKG_VERSION"));

// ── EBML encoding ────────────────────────────────────────────────

fn put_id(buf: &mut Vec<u8>, id: u32) {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    buf.extend_from_slice(&bytes[skip..]);
}

/// Element data size as a variable-length integer of minimal width.
fn put_size(buf: &mut Vec<u8>, size: u64) {
    let mut len = 1;
    // All-ones is reserved for "unknown".
    while len < 8 && size >= (1u64 << (7 * len)) - 1 {
        len += 1;
    }
    let marked = size | (1u64 << (7 * len));
    buf.extend_from_slice(&marked.to_be_bytes()[8 - len..]);
}

fn put_uint(buf: &mut Vec<u8>, id: u32, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    put_id(buf, id);
    put_size(buf, (8 - skip) as u64);
    buf.extend_from_slice(&bytes[skip..]);
}

fn put_bytes(buf: &mut Vec<u8>, id: u32, data: &[u8]) {
    put_id(buf, id);
    put_size(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

fn put_master<F>(buf: &mut Vec<u8>, id: u32, build: F)
where
    F: FnOnce(&mut Vec<u8>),
{
    let mut body = Vec::new();
    build(&mut body);
    put_bytes(buf, id, &body);
}

// ── Writer ───────────────────────────────────────────────────────

pub struct MatroskaWriter<W: Write> {
    out: W,
    frame_size: FrameSize,
    base_pts: Option<u64>,
    /// Timestamp of the open cluster, in ticks.
    cluster: Option<u64>,
    clusters: u64,
}

impl<W: Write> MatroskaWriter<W> {
    pub fn new(out: W, frame_size: FrameSize) -> Self {
        Self {
            out,
            frame_size,
            base_pts: None,
            cluster: None,
            clusters: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn open_cluster(&mut self, buf: &mut Vec<u8>, ticks: u64) {
        put_id(buf, CLUSTER);
        buf.extend_from_slice(&UNKNOWN_SIZE);
        put_uint(buf, CLUSTER_TIMESTAMP, ticks);
        self.cluster = Some(ticks);
        self.clusters += 1;
    }
}

impl<W: Write + Send> ContainerWriter for MatroskaWriter<W> {
    fn write_header(&mut self, params: &ParameterSets) -> Result<(), RecordError> {
        let mut buf = Vec::with_capacity(256);
        put_master(&mut buf, EBML, |b| {
            put_uint(b, EBML_VERSION, 1);
            put_uint(b, EBML_READ_VERSION, 1);
            put_uint(b, EBML_MAX_ID_LENGTH, 4);
            put_uint(b, EBML_MAX_SIZE_LENGTH, 8);
            put_bytes(b, DOC_TYPE, b"matroska");
            put_uint(b, DOC_TYPE_VERSION, 4);
            put_uint(b, DOC_TYPE_READ_VERSION, 2);
        });

        put_id(&mut buf, SEGMENT);
        buf.extend_from_slice(&UNKNOWN_SIZE);

        put_master(&mut buf, INFO, |b| {
            put_uint(b, TIMESTAMP_SCALE, NS_PER_TICK);
            put_bytes(b, MUXING_APP, APP_NAME.as_bytes());
            put_bytes(b, WRITING_APP, APP_NAME.as_bytes());
        });

        let (width, height) = (self.frame_size.width, self.frame_size.height);
        put_master(&mut buf, TRACKS, |b| {
            put_master(b, TRACK_ENTRY, |t| {
                put_uint(t, TRACK_NUMBER, 1);
                put_uint(t, TRACK_UID, 1);
                put_uint(t, TRACK_TYPE, 1); // video
                put_bytes(t, CODEC_ID, b"V_MPEG4/ISO/AVC");
                put_bytes(t, CODEC_PRIVATE, &params.decoder_config());
                put_master(t, VIDEO, |v| {
                    put_uint(v, PIXEL_WIDTH, width as u64);
                    put_uint(v, PIXEL_HEIGHT, height as u64);
                });
            });
        });

        self.out.write_all(&buf)?;
        self.out.flush()?;
        debug!(codec = %params.codec_string(), "matroska header written");
        Ok(())
    }

    fn write_packet(&mut self, pts: u64, key_frame: bool, payload: &[u8]) -> Result<(), RecordError> {
        let base = *self.base_pts.get_or_insert(pts);
        let ticks = pts.saturating_sub(base) * 1_000 / NS_PER_TICK;

        let mut buf = Vec::with_capacity(payload.len() + 32);
        let offset = match self.cluster {
            Some(start) if !key_frame && ticks.saturating_sub(start) <= i16::MAX as u64 => {
                ticks.saturating_sub(start)
            }
            Some(start) if key_frame && ticks == start => 0,
            _ => {
                self.open_cluster(&mut buf, ticks);
                0
            }
        };

        let data = h264::to_length_prefixed(payload);
        put_id(&mut buf, SIMPLE_BLOCK);
        put_size(&mut buf, (4 + data.len()) as u64);
        buf.push(0x81); // track 1
        buf.extend_from_slice(&(offset as i16).to_be_bytes());
        buf.push(if key_frame { 0x80 } else { 0x00 });
        buf.extend_from_slice(&data);

        self.out.write_all(&buf)?;
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), RecordError> {
        debug!(clusters = self.clusters, "matroska finished");
        self.out.flush()?;
        Ok(())
    }
}
