//! Just enough H.264 bitstream handling to remux without decoding.

use crate::error::RecordError;

const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_AUD: u8 = 9;

/// Bytes per NAL length prefix in converted samples.
pub const NAL_LENGTH_SIZE: usize = 4;

/// Split an Annex-B byte stream into NAL units, start codes removed.
///
/// Input without any start code comes back as a single unit.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    // (start code offset, payload offset)
    let mut marks = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let code = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            marks.push((code, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }
    if marks.is_empty() {
        return if data.is_empty() { Vec::new() } else { vec![data] };
    }
    marks
        .iter()
        .enumerate()
        .filter_map(|(n, &(_, begin))| {
            let end = marks.get(n + 1).map_or(data.len(), |&(code, _)| code);
            (begin < end).then(|| &data[begin..end])
        })
        .collect()
}

fn nal_type(nal: &[u8]) -> u8 {
    nal.first().map_or(0, |b| b & 0x1F)
}

/// The parameter sets carried by a configuration packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

impl ParameterSets {
    pub fn from_annex_b(config: &[u8]) -> Result<Self, RecordError> {
        let mut sps = None;
        let mut pps = None;
        for nal in split_annex_b(config) {
            match nal_type(nal) {
                NAL_SPS => sps = Some(nal.to_vec()),
                NAL_PPS => pps = Some(nal.to_vec()),
                _ => {}
            }
        }
        let sps = sps.ok_or(RecordError::InvalidConfig("no sequence parameter set"))?;
        let pps = pps.ok_or(RecordError::InvalidConfig("no picture parameter set"))?;
        if sps.len() < 4 {
            return Err(RecordError::InvalidConfig("sequence parameter set too short"));
        }
        Ok(Self { sps, pps })
    }

    /// `avc1.PPCCLL` as used in codec strings.
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02X}{:02X}{:02X}",
            self.sps[1], self.sps[2], self.sps[3]
        )
    }

    /// AVCDecoderConfigurationRecord (the `avcC` body, also the
    /// Matroska codec private data).
    pub fn decoder_config(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(11 + self.sps.len() + self.pps.len());
        out.push(1); // configuration version
        out.push(self.sps[1]); // profile
        out.push(self.sps[2]); // compatibility
        out.push(self.sps[3]); // level
        out.push(0xFC | (NAL_LENGTH_SIZE as u8 - 1));
        out.push(0xE0 | 1); // one SPS
        out.extend_from_slice(&(self.sps.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.sps);
        out.push(1); // one PPS
        out.extend_from_slice(&(self.pps.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.pps);
        out
    }
}

/// Rewrite an Annex-B access unit with 4-byte length prefixes.
///
/// Parameter sets and delimiters are dropped; they live in the
/// container header instead.
pub fn to_length_prefixed(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 16);
    for nal in split_annex_b(payload) {
        if matches!(nal_type(nal), NAL_SPS | NAL_PPS | NAL_AUD) {
            continue;
        }
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// SPS + PPS as a device would send them in a configuration packet.
    pub(crate) const CONFIG: &[u8] = &[
        0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1E, 0x9A, 0x74, 0x05, //
        0, 0, 0, 1, 0x68, 0xCE, 0x38, 0x80,
    ];

    /// One IDR slice.
    pub(crate) const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x80, 0x20, 0x11];

    #[test]
    fn splits_three_and_four_byte_start_codes() {
        let data = [0, 0, 0, 1, 0x67, 1, 2, 0, 0, 1, 0x68, 3, 0, 0, 0, 1, 0x65, 4];
        let nals = split_annex_b(&data);
        assert_eq!(nals, vec![&[0x67, 1, 2][..], &[0x68, 3][..], &[0x65, 4][..]]);
    }

    #[test]
    fn raw_payload_is_one_unit() {
        assert_eq!(split_annex_b(&[0x65, 1, 2]), vec![&[0x65, 1, 2][..]]);
        assert!(split_annex_b(&[]).is_empty());
    }

    #[test]
    fn extracts_parameter_sets() {
        let ps = ParameterSets::from_annex_b(CONFIG).unwrap();
        assert_eq!(ps.sps[0], 0x67);
        assert_eq!(ps.pps, vec![0x68, 0xCE, 0x38, 0x80]);
        assert_eq!(ps.codec_string(), "avc1.42C01E");
        let avcc = ps.decoder_config();
        assert_eq!(&avcc[..6], &[1, 0x42, 0xC0, 0x1E, 0xFF, 0xE1]);
    }

    #[test]
    fn config_without_pps_is_rejected() {
        let err = ParameterSets::from_annex_b(&CONFIG[..11]).unwrap_err();
        assert!(matches!(err, RecordError::InvalidConfig(_)));
    }

    #[test]
    fn length_prefixing_drops_parameter_sets() {
        let mut au = CONFIG.to_vec();
        au.extend_from_slice(IDR);
        let out = to_length_prefixed(&au);
        assert_eq!(&out[..4], &5u32.to_be_bytes());
        assert_eq!(&out[4..], &IDR[4..]);
    }
}
