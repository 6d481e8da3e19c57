//! Minimal H.264 bitstream generation
//!
//! Builds Annex B access units (SPS + PPS + IDR slice) for a flat grey
//! picture at any resolution. Every macroblock is coded as I_16x16 with DC
//! prediction and no residual, so the slice needs one byte per macroblock
//! and no transform. Constrained baseline profile, CAVLC.

use bytes::{BufMut, Bytes, BytesMut};

use super::format::Resolution;

const START_CODE: [u8; 4] = [0, 0, 0, 1];

const NAL_IDR: u8 = 0x65;
const NAL_SPS: u8 = 0x67;
const NAL_PPS: u8 = 0x68;

const PROFILE_BASELINE: u8 = 66;
/// constraint_set0..2 flags, matching profile-level-id 42e01f
const CONSTRAINT_FLAGS: u8 = 0xE0;
const LEVEL_3_1: u8 = 31;

/// mb_type I_16x16_2_0_0 ue(3), intra_chroma_pred_mode ue(0),
/// mb_qp_delta se(0), Intra16x16DCLevel coeff_token for zero coefficients
const GREY_MACROBLOCK: u8 = 0b0010_0111;

/// MSB-first bit writer for RBSP payloads
#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    used: u8,
}

impl BitWriter {
    fn bit(&mut self, bit: bool) {
        self.current = (self.current << 1) | bit as u8;
        self.used += 1;
        if self.used == 8 {
            self.bytes.push(self.current);
            self.current = 0;
            self.used = 0;
        }
    }

    fn bits(&mut self, value: u32, count: u8) {
        for i in (0..count).rev() {
            self.bit((value >> i) & 1 == 1);
        }
    }

    /// Unsigned Exp-Golomb
    fn ue(&mut self, value: u32) {
        let code = value + 1;
        let len = 32 - code.leading_zeros() as u8;
        self.bits(0, len - 1);
        self.bits(code, len);
    }

    /// Signed Exp-Golomb
    fn se(&mut self, value: i32) {
        let mapped = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            value.unsigned_abs() * 2
        };
        self.ue(mapped);
    }

    /// rbsp_trailing_bits
    fn finish(mut self) -> Vec<u8> {
        self.bit(true);
        while self.used != 0 {
            self.bit(false);
        }
        self.bytes
    }
}

/// Macroblock grid covering a resolution
fn macroblocks(resolution: Resolution) -> (u32, u32) {
    (resolution.width.div_ceil(16), resolution.height.div_ceil(16))
}

fn sps(resolution: Resolution) -> Vec<u8> {
    let (mbs_w, mbs_h) = macroblocks(resolution);
    let crop_right = (mbs_w * 16 - resolution.width) / 2;
    let crop_bottom = (mbs_h * 16 - resolution.height) / 2;

    let mut w = BitWriter::default();
    w.bits(PROFILE_BASELINE as u32, 8);
    w.bits(CONSTRAINT_FLAGS as u32, 8);
    w.bits(LEVEL_3_1 as u32, 8);
    w.ue(0); // seq_parameter_set_id
    w.ue(0); // log2_max_frame_num_minus4
    w.ue(2); // pic_order_cnt_type
    w.ue(1); // max_num_ref_frames
    w.bit(false); // gaps_in_frame_num_value_allowed_flag
    w.ue(mbs_w - 1);
    w.ue(mbs_h - 1);
    w.bit(true); // frame_mbs_only_flag
    w.bit(true); // direct_8x8_inference_flag
    if crop_right > 0 || crop_bottom > 0 {
        w.bit(true);
        w.ue(0);
        w.ue(crop_right);
        w.ue(0);
        w.ue(crop_bottom);
    } else {
        w.bit(false);
    }
    w.bit(false); // vui_parameters_present_flag
    w.finish()
}

fn pps() -> Vec<u8> {
    let mut w = BitWriter::default();
    w.ue(0); // pic_parameter_set_id
    w.ue(0); // seq_parameter_set_id
    w.bit(false); // entropy_coding_mode_flag (CAVLC)
    w.bit(false); // bottom_field_pic_order_in_frame_present_flag
    w.ue(0); // num_slice_groups_minus1
    w.ue(0); // num_ref_idx_l0_default_active_minus1
    w.ue(0); // num_ref_idx_l1_default_active_minus1
    w.bit(false); // weighted_pred_flag
    w.bits(0, 2); // weighted_bipred_idc
    w.se(0); // pic_init_qp_minus26
    w.se(0); // pic_init_qs_minus26
    w.se(0); // chroma_qp_index_offset
    w.bit(false); // deblocking_filter_control_present_flag
    w.bit(false); // constrained_intra_pred_flag
    w.bit(false); // redundant_pic_cnt_present_flag
    w.finish()
}

fn idr_slice(resolution: Resolution, idr_pic_id: u32) -> Vec<u8> {
    let (mbs_w, mbs_h) = macroblocks(resolution);

    let mut w = BitWriter::default();
    w.ue(0); // first_mb_in_slice
    w.ue(7); // slice_type: I, all slices
    w.ue(0); // pic_parameter_set_id
    w.bits(0, 4); // frame_num
    w.ue(idr_pic_id);
    w.bit(false); // no_output_of_prior_pics_flag
    w.bit(false); // long_term_reference_flag
    w.se(0); // slice_qp_delta
    for _ in 0..mbs_w * mbs_h {
        w.bits(GREY_MACROBLOCK as u32, 8);
    }
    w.finish()
}

/// Insert emulation prevention bytes into an RBSP
fn escape(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + rbsp.len() / 64);
    let mut zeros = 0;
    for &byte in rbsp {
        if zeros == 2 && byte <= 3 {
            out.push(3);
            zeros = 0;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
    out
}

fn put_nal(buf: &mut BytesMut, header: u8, rbsp: &[u8]) {
    buf.put_slice(&START_CODE);
    buf.put_u8(header);
    buf.put_slice(&escape(rbsp));
}

/// Self-contained grey key frame: SPS, PPS and one IDR slice
///
/// Consecutive IDR pictures must carry different `idr_pic_id`s.
pub fn grey_access_unit(resolution: Resolution, idr_pic_id: u32) -> Bytes {
    let mut buf = BytesMut::new();
    put_nal(&mut buf, NAL_SPS, &sps(resolution));
    put_nal(&mut buf, NAL_PPS, &pps());
    put_nal(&mut buf, NAL_IDR, &idr_slice(resolution, idr_pic_id));
    buf.freeze()
}

/// Split an Annex B stream into NAL units (without start codes)
pub fn nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let mut end = starts.get(n + 1).map_or(data.len(), |next| next - 3);
            while end > start && data[end - 1] == 0 {
                end -= 1;
            }
            &data[start..end]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exp_golomb() {
        let mut w = BitWriter::default();
        w.ue(7);
        assert_eq!(w.finish(), vec![0b0001_0001]);

        let mut w = BitWriter::default();
        w.se(-1);
        assert_eq!(w.finish(), vec![0b0111_0000]);

        let mut w = BitWriter::default();
        w.ue(3);
        w.bits(GREY_MACROBLOCK as u32, 3);
        assert_eq!(w.finish(), vec![GREY_MACROBLOCK, 0b1000_0000]);
    }

    #[test]
    fn test_pps_bytes() {
        assert_eq!(pps(), vec![0xCE, 0x38, 0x80]);
    }

    #[test]
    fn test_access_unit_layout() {
        let au = grey_access_unit(Resolution::new(160, 120), 0);
        let nals = nal_units(&au);
        assert_eq!(nals.len(), 3);
        assert_eq!(nals[0][..4], [NAL_SPS, PROFILE_BASELINE, CONSTRAINT_FLAGS, LEVEL_3_1]);
        assert_eq!(nals[1], &[NAL_PPS, 0xCE, 0x38, 0x80]);
        assert_eq!(nals[2][0], NAL_IDR);

        // 17 header bits + 80 one-byte macroblocks + stop bit
        assert_eq!(nals[2].len(), 1 + 83);
    }

    #[test]
    fn test_idr_pic_id_changes_slice() {
        let res = Resolution::new(320, 180);
        assert_ne!(grey_access_unit(res, 0), grey_access_unit(res, 1));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape(&[0, 0, 1, 0, 0, 0]), vec![0, 0, 3, 1, 0, 0, 3, 0]);
        assert_eq!(escape(&[0, 0, 4]), vec![0, 0, 4]);
    }
}
