//! Fragmented MP4 writer.
//!
//! The header (`ftyp` + `moov`) is written once the parameter sets are
//! known; each sample then becomes its own `moof` + `mdat` fragment. A
//! sample's duration is only known when the next one arrives, so one
//! sample is held back. Everything before the held sample is already on
//! disk and playable.

use std::io::Write;

use tracing::debug;

use super::ContainerWriter;
use super::h264::{self, ParameterSets};
use crate::error::RecordError;
use crate::header::FrameSize;

/// Timestamps are stored in microseconds, the stream's own unit.
const TIMESCALE: u32 = 1_000_000;
/// Duration given to the final sample when nothing follows it.
const DEFAULT_SAMPLE_DURATION: u32 = 16_667;
const TRACK_ID: u32 = 1;

#[derive(Debug)]
struct HeldSample {
    pts: u64,
    key_frame: bool,
    data: Vec<u8>,
}

pub struct Mp4Writer<W: Write> {
    out: W,
    frame_size: FrameSize,
    sequence: u32,
    base_pts: Option<u64>,
    held: Option<HeldSample>,
    last_duration: u32,
}

impl<W: Write> Mp4Writer<W> {
    pub fn new(out: W, frame_size: FrameSize) -> Self {
        Self {
            out,
            frame_size,
            sequence: 1,
            base_pts: None,
            held: None,
            last_duration: DEFAULT_SAMPLE_DURATION,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_fragment(&mut self, sample: &HeldSample, duration: u32) -> Result<(), RecordError> {
        let base = self.base_pts.unwrap_or(sample.pts);
        let decode_time = sample.pts.saturating_sub(base);
        let fragment = build_fragment(
            self.sequence,
            decode_time,
            duration,
            &sample.data,
            sample.key_frame,
        );
        self.sequence = self.sequence.wrapping_add(1);
        self.out.write_all(&fragment)?;
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> ContainerWriter for Mp4Writer<W> {
    fn write_header(&mut self, params: &ParameterSets) -> Result<(), RecordError> {
        let init = build_init_segment(self.frame_size, params);
        self.out.write_all(&init)?;
        self.out.flush()?;
        debug!(codec = %params.codec_string(), "mp4 header written");
        Ok(())
    }

    fn write_packet(&mut self, pts: u64, key_frame: bool, payload: &[u8]) -> Result<(), RecordError> {
        self.base_pts.get_or_insert(pts);
        let sample = HeldSample {
            pts,
            key_frame,
            data: h264::to_length_prefixed(payload),
        };
        if let Some(prev) = self.held.take() {
            let duration = u32::try_from(pts.saturating_sub(prev.pts))
                .unwrap_or(u32::MAX)
                .max(1);
            self.last_duration = duration;
            self.write_fragment(&prev, duration)?;
        }
        self.held = Some(sample);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), RecordError> {
        if let Some(last) = self.held.take() {
            let duration = self.last_duration;
            self.write_fragment(&last, duration)?;
        }
        self.out.flush()?;
        Ok(())
    }
}

// ── Boxes ────────────────────────────────────────────────────────

fn write_box<F>(buf: &mut Vec<u8>, kind: &[u8; 4], build: F)
where
    F: FnOnce(&mut Vec<u8>),
{
    let start = buf.len();
    buf.extend_from_slice(&[0; 4]);
    buf.extend_from_slice(kind);
    build(buf);
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

/// Version + flags header of a full box.
fn full_box_header(buf: &mut Vec<u8>, version: u8, flags: u32) {
    buf.push(version);
    buf.extend_from_slice(&flags.to_be_bytes()[1..]);
}

const IDENTITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

fn matrix(buf: &mut Vec<u8>) {
    for v in IDENTITY_MATRIX {
        buf.extend_from_slice(&v.to_be_bytes());
    }
}

fn build_init_segment(size: FrameSize, params: &ParameterSets) -> Vec<u8> {
    let (width, height) = (size.width, size.height);
    let mut buf = Vec::with_capacity(1024);

    write_box(&mut buf, b"ftyp", |b| {
        b.extend_from_slice(b"isom");
        b.extend_from_slice(&0x200u32.to_be_bytes());
        b.extend_from_slice(b"isomiso6avc1mp41");
    });

    write_box(&mut buf, b"moov", |moov| {
        write_box(moov, b"mvhd", |b| {
            full_box_header(b, 0, 0);
            b.extend_from_slice(&[0; 8]); // creation, modification
            b.extend_from_slice(&TIMESCALE.to_be_bytes());
            b.extend_from_slice(&0u32.to_be_bytes()); // duration: fragmented
            b.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate
            b.extend_from_slice(&0x0100u16.to_be_bytes()); // volume
            b.extend_from_slice(&[0; 10]);
            matrix(b);
            b.extend_from_slice(&[0; 24]);
            b.extend_from_slice(&(TRACK_ID + 1).to_be_bytes()); // next track id
        });

        write_box(moov, b"trak", |trak| {
            write_box(trak, b"tkhd", |b| {
                full_box_header(b, 0, 0x7); // enabled, in movie, in preview
                b.extend_from_slice(&[0; 8]);
                b.extend_from_slice(&TRACK_ID.to_be_bytes());
                b.extend_from_slice(&[0; 4]);
                b.extend_from_slice(&0u32.to_be_bytes()); // duration
                b.extend_from_slice(&[0; 8]);
                b.extend_from_slice(&[0; 8]); // layer, group, volume, reserved
                matrix(b);
                b.extend_from_slice(&(width << 16).to_be_bytes());
                b.extend_from_slice(&(height << 16).to_be_bytes());
            });

            write_box(trak, b"mdia", |mdia| {
                write_box(mdia, b"mdhd", |b| {
                    full_box_header(b, 0, 0);
                    b.extend_from_slice(&[0; 8]);
                    b.extend_from_slice(&TIMESCALE.to_be_bytes());
                    b.extend_from_slice(&0u32.to_be_bytes());
                    b.extend_from_slice(&0x55C4u16.to_be_bytes()); // "und"
                    b.extend_from_slice(&[0; 2]);
                });
                write_box(mdia, b"hdlr", |b| {
                    full_box_header(b, 0, 0);
                    b.extend_from_slice(&[0; 4]);
                    b.extend_from_slice(b"vide");
                    b.extend_from_slice(&[0; 12]);
                    b.extend_from_slice(b"VideoHandler\0");
                });
                write_box(mdia, b"minf", |minf| {
                    write_box(minf, b"vmhd", |b| {
                        full_box_header(b, 0, 1);
                        b.extend_from_slice(&[0; 8]);
                    });
                    write_box(minf, b"dinf", |dinf| {
                        write_box(dinf, b"dref", |b| {
                            full_box_header(b, 0, 0);
                            b.extend_from_slice(&1u32.to_be_bytes());
                            write_box(b, b"url ", |u| full_box_header(u, 0, 1));
                        });
                    });
                    write_box(minf, b"stbl", |stbl| {
                        write_box(stbl, b"stsd", |b| {
                            full_box_header(b, 0, 0);
                            b.extend_from_slice(&1u32.to_be_bytes());
                            write_avc1(b, width, height, params);
                        });
                        // Sample tables stay empty; samples live in fragments.
                        for kind in [b"stts", b"stsc", b"stco"] {
                            write_box(stbl, kind, |b| {
                                full_box_header(b, 0, 0);
                                b.extend_from_slice(&0u32.to_be_bytes());
                            });
                        }
                        write_box(stbl, b"stsz", |b| {
                            full_box_header(b, 0, 0);
                            b.extend_from_slice(&[0; 8]);
                        });
                    });
                });
            });
        });

        write_box(moov, b"mvex", |mvex| {
            write_box(mvex, b"trex", |b| {
                full_box_header(b, 0, 0);
                b.extend_from_slice(&TRACK_ID.to_be_bytes());
                b.extend_from_slice(&1u32.to_be_bytes()); // sample description index
                b.extend_from_slice(&DEFAULT_SAMPLE_DURATION.to_be_bytes());
                b.extend_from_slice(&[0; 8]); // size, flags
            });
        });
    });

    buf
}

fn write_avc1(buf: &mut Vec<u8>, width: u32, height: u32, params: &ParameterSets) {
    write_box(buf, b"avc1", |b| {
        b.extend_from_slice(&[0; 6]);
        b.extend_from_slice(&1u16.to_be_bytes()); // data reference index
        b.extend_from_slice(&[0; 16]);
        b.extend_from_slice(&(width as u16).to_be_bytes());
        b.extend_from_slice(&(height as u16).to_be_bytes());
        b.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // 72 dpi
        b.extend_from_slice(&0x0048_0000u32.to_be_bytes());
        b.extend_from_slice(&[0; 4]);
        b.extend_from_slice(&1u16.to_be_bytes()); // frame count
        b.extend_from_slice(&[0; 32]); // compressor name
        b.extend_from_slice(&0x0018u16.to_be_bytes()); // depth
        b.extend_from_slice(&0xFFFFu16.to_be_bytes());
        write_box(b, b"avcC", |c| c.extend_from_slice(&params.decoder_config()));
    });
}

fn build_fragment(
    sequence: u32,
    decode_time: u64,
    duration: u32,
    sample: &[u8],
    key_frame: bool,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(sample.len() + 128);
    let mut data_offset_at = 0;

    write_box(&mut buf, b"moof", |moof| {
        write_box(moof, b"mfhd", |b| {
            full_box_header(b, 0, 0);
            b.extend_from_slice(&sequence.to_be_bytes());
        });
        write_box(moof, b"traf", |traf| {
            write_box(traf, b"tfhd", |b| {
                full_box_header(b, 0, 0x02_0000); // default-base-is-moof
                b.extend_from_slice(&TRACK_ID.to_be_bytes());
            });
            write_box(traf, b"tfdt", |b| {
                full_box_header(b, 1, 0);
                b.extend_from_slice(&decode_time.to_be_bytes());
            });
            write_box(traf, b"trun", |b| {
                // data offset, duration, size, flags present
                full_box_header(b, 0, 0x0001 | 0x0100 | 0x0200 | 0x0400);
                b.extend_from_slice(&1u32.to_be_bytes());
                data_offset_at = b.len();
                b.extend_from_slice(&0u32.to_be_bytes());
                b.extend_from_slice(&duration.to_be_bytes());
                b.extend_from_slice(&(sample.len() as u32).to_be_bytes());
                let flags: u32 = if key_frame { 0x0200_0000 } else { 0x0101_0000 };
                b.extend_from_slice(&flags.to_be_bytes());
            });
        });
    });

    // Offset from the start of moof to the first sample byte.
    let data_offset = (buf.len() + 8) as u32;
    buf[data_offset_at..data_offset_at + 4].copy_from_slice(&data_offset.to_be_bytes());

    write_box(&mut buf, b"mdat", |b| b.extend_from_slice(sample));
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::h264::tests::{CONFIG, IDR};

    /// Top-level boxes as `(kind, size)`.
    fn boxes(data: &[u8]) -> Vec<(String, usize)> {
        let mut out = Vec::new();
        let mut i = 0;
        while i + 8 <= data.len() {
            let size = u32::from_be_bytes(data[i..i + 4].try_into().unwrap()) as usize;
            out.push((String::from_utf8_lossy(&data[i + 4..i + 8]).into_owned(), size));
            i += size;
        }
        assert_eq!(i, data.len(), "boxes must tile the file");
        out
    }

    #[test]
    fn header_and_fragments_tile() {
        let params = ParameterSets::from_annex_b(CONFIG).unwrap();
        let mut w = Mp4Writer::new(Vec::new(), FrameSize::new(1080, 2340));
        w.write_header(&params).unwrap();
        w.write_packet(1000, true, IDR).unwrap();
        w.write_packet(1016, false, IDR).unwrap();
        w.write_packet(1033, false, IDR).unwrap();
        w.finish().unwrap();

        let kinds: Vec<String> = boxes(&w.into_inner()).into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            ["ftyp", "moov", "moof", "mdat", "moof", "mdat", "moof", "mdat"]
        );
    }

    #[test]
    fn sample_is_held_until_next() {
        let params = ParameterSets::from_annex_b(CONFIG).unwrap();
        let mut w = Mp4Writer::new(Vec::new(), FrameSize::new(16, 16));
        w.write_header(&params).unwrap();
        w.write_packet(0, true, IDR).unwrap();
        let header_only = boxes(&w.out).len();
        assert_eq!(header_only, 2);
        w.write_packet(500, false, IDR).unwrap();
        assert_eq!(boxes(&w.out).len(), 4);
    }

    #[test]
    fn fragment_offsets_point_into_mdat() {
        let frag = build_fragment(7, 123, 16_000, &[9, 9, 9], true);
        let moof_len = u32::from_be_bytes(frag[0..4].try_into().unwrap()) as usize;
        assert_eq!(&frag[moof_len + 4..moof_len + 8], b"mdat");
        assert_eq!(&frag[moof_len + 8..], &[9, 9, 9]);
    }
}
