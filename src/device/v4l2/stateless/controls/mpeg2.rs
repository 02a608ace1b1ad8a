// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use bytes::BufMut;

use crate::codec::mpeg2::PictureHeader;
use crate::codec::mpeg2::QuantMatrixExtension;
use crate::codec::mpeg2::SequenceHeader;
use crate::codec::mpeg2::DEFAULT_INTRA_QUANTISER_MATRIX;
use crate::codec::mpeg2::DEFAULT_NON_INTRA_QUANTISER_MATRIX;
use crate::device::v4l2::stateless::controls::ControlRecord;
use crate::device::v4l2::stateless::controls::V4L2_CID_CODEC_BASE;

pub const V4L2_CID_MPEG_VIDEO_MPEG2_SLICE_PARAMS: u32 = V4L2_CID_CODEC_BASE + 250;
pub const V4L2_CID_MPEG_VIDEO_MPEG2_SEQUENCE: u32 = V4L2_CID_CODEC_BASE + 251;
pub const V4L2_CID_MPEG_VIDEO_MPEG2_PICTURE: u32 = V4L2_CID_CODEC_BASE + 252;
pub const V4L2_CID_MPEG_VIDEO_MPEG2_QUANTIZATION: u32 = V4L2_CID_CODEC_BASE + 253;

pub const V4L2_CTRL_TYPE_MPEG2_SLICE_PARAMS: u32 = 0x0130;
pub const V4L2_CTRL_TYPE_MPEG2_SEQUENCE: u32 = 0x0131;
pub const V4L2_CTRL_TYPE_MPEG2_PICTURE: u32 = 0x0132;
pub const V4L2_CTRL_TYPE_MPEG2_QUANTIZATION: u32 = 0x0133;

pub const V4L2_MPEG2_SEQ_FLAG_PROGRESSIVE: u32 = 0x0001;

pub const V4L2_MPEG2_PIC_FLAG_TOP_FIELD_FIRST: u32 = 0x0001;
pub const V4L2_MPEG2_PIC_FLAG_FRAME_PRED_DCT: u32 = 0x0002;
pub const V4L2_MPEG2_PIC_FLAG_CONCEALMENT_MV: u32 = 0x0004;
pub const V4L2_MPEG2_PIC_FLAG_Q_SCALE_TYPE: u32 = 0x0008;
pub const V4L2_MPEG2_PIC_FLAG_INTRA_VLC: u32 = 0x0010;
pub const V4L2_MPEG2_PIC_FLAG_ALT_SCAN: u32 = 0x0020;
pub const V4L2_MPEG2_PIC_FLAG_REPEAT_FIRST: u32 = 0x0040;
pub const V4L2_MPEG2_PIC_FLAG_PROGRESSIVE: u32 = 0x0080;
pub const V4L2_MPEG2_PIC_FLAG_LOAD_INTRA: u32 = 0x0100;
pub const V4L2_MPEG2_PIC_FLAG_LOAD_NON_INTRA: u32 = 0x0200;
pub const V4L2_MPEG2_PIC_FLAG_LOAD_CHROMA_INTRA: u32 = 0x0400;
pub const V4L2_MPEG2_PIC_FLAG_LOAD_CHROMA_NON_INTRA: u32 = 0x0800;

/// `struct v4l2_ctrl_mpeg2_sequence`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct V4l2CtrlMpeg2Sequence {
    pub horizontal_size: u16,
    pub vertical_size: u16,
    pub vbv_buffer_size: u32,
    pub profile_and_level_indication: u16,
    pub chroma_format: u8,
    pub reserved: u8,
    pub flags: u32,
}

impl From<&SequenceHeader> for V4l2CtrlMpeg2Sequence {
    fn from(seq: &SequenceHeader) -> Self {
        let mut flags = 0;
        if seq.progressive_sequence {
            flags |= V4L2_MPEG2_SEQ_FLAG_PROGRESSIVE;
        }

        Self {
            horizontal_size: seq.horizontal_size,
            vertical_size: seq.vertical_size,
            vbv_buffer_size: seq.vbv_buffer_size,
            profile_and_level_indication: seq.profile_and_level_indication.into(),
            chroma_format: seq.chroma_format,
            reserved: 0,
            flags,
        }
    }
}

impl ControlRecord for V4l2CtrlMpeg2Sequence {
    const ID: u32 = V4L2_CID_MPEG_VIDEO_MPEG2_SEQUENCE;
    const TYPE: u32 = V4L2_CTRL_TYPE_MPEG2_SEQUENCE;

    fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.horizontal_size);
        buf.put_u16_le(self.vertical_size);
        buf.put_u32_le(self.vbv_buffer_size);
        buf.put_u16_le(self.profile_and_level_indication);
        buf.put_u8(self.chroma_format);
        buf.put_u8(self.reserved);
        buf.put_u32_le(self.flags);
    }
}

/// `struct v4l2_ctrl_mpeg2_picture`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct V4l2CtrlMpeg2Picture {
    pub picture_coding_type: u8,
    pub f_code: [[u8; 2]; 2],
    pub intra_dc_precision: u8,
    pub picture_structure: u8,
    pub reserved: u8,
    pub flags: u32,
}

impl V4l2CtrlMpeg2Picture {
    /// Builds the picture control. The load flags are set for every matrix present in `quant`.
    pub fn new(pic: &PictureHeader, quant: Option<&QuantMatrixExtension>) -> Self {
        let mut flags = 0;
        for (set, bit) in [
            (pic.top_field_first, V4L2_MPEG2_PIC_FLAG_TOP_FIELD_FIRST),
            (pic.frame_pred_frame_dct, V4L2_MPEG2_PIC_FLAG_FRAME_PRED_DCT),
            (pic.concealment_motion_vectors, V4L2_MPEG2_PIC_FLAG_CONCEALMENT_MV),
            (pic.q_scale_type, V4L2_MPEG2_PIC_FLAG_Q_SCALE_TYPE),
            (pic.intra_vlc_format, V4L2_MPEG2_PIC_FLAG_INTRA_VLC),
            (pic.alternate_scan, V4L2_MPEG2_PIC_FLAG_ALT_SCAN),
            (pic.repeat_first_field, V4L2_MPEG2_PIC_FLAG_REPEAT_FIRST),
            (pic.progressive_frame, V4L2_MPEG2_PIC_FLAG_PROGRESSIVE),
        ] {
            if set {
                flags |= bit;
            }
        }

        if let Some(quant) = quant {
            for (loaded, bit) in [
                (quant.intra_quantiser_matrix.is_some(), V4L2_MPEG2_PIC_FLAG_LOAD_INTRA),
                (quant.non_intra_quantiser_matrix.is_some(), V4L2_MPEG2_PIC_FLAG_LOAD_NON_INTRA),
                (
                    quant.chroma_intra_quantiser_matrix.is_some(),
                    V4L2_MPEG2_PIC_FLAG_LOAD_CHROMA_INTRA,
                ),
                (
                    quant.chroma_non_intra_quantiser_matrix.is_some(),
                    V4L2_MPEG2_PIC_FLAG_LOAD_CHROMA_NON_INTRA,
                ),
            ] {
                if loaded {
                    flags |= bit;
                }
            }
        }

        Self {
            picture_coding_type: pic.picture_coding_type as u8,
            f_code: pic.f_code,
            intra_dc_precision: pic.intra_dc_precision,
            picture_structure: pic.picture_structure as u8,
            reserved: 0,
            flags,
        }
    }
}

impl ControlRecord for V4l2CtrlMpeg2Picture {
    const ID: u32 = V4L2_CID_MPEG_VIDEO_MPEG2_PICTURE;
    const TYPE: u32 = V4L2_CTRL_TYPE_MPEG2_PICTURE;

    fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.picture_coding_type);
        buf.put_slice(&self.f_code[0]);
        buf.put_slice(&self.f_code[1]);
        buf.put_u8(self.intra_dc_precision);
        buf.put_u8(self.picture_structure);
        buf.put_u8(self.reserved);
        buf.put_u32_le(self.flags);
    }
}

/// `struct v4l2_ctrl_mpeg2_slice_params`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct V4l2CtrlMpeg2SliceParams {
    /// Timestamp of the CAPTURE buffer used for backward prediction, in ns.
    pub backward_ref_ts: u64,
    /// Timestamp of the CAPTURE buffer used for forward prediction, in ns.
    pub forward_ref_ts: u64,
    pub quantiser_scale_code: u32,
    pub reserved: u32,
}

impl ControlRecord for V4l2CtrlMpeg2SliceParams {
    const ID: u32 = V4L2_CID_MPEG_VIDEO_MPEG2_SLICE_PARAMS;
    const TYPE: u32 = V4L2_CTRL_TYPE_MPEG2_SLICE_PARAMS;

    fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.backward_ref_ts);
        buf.put_u64_le(self.forward_ref_ts);
        buf.put_u32_le(self.quantiser_scale_code);
        buf.put_u32_le(self.reserved);
    }
}

/// `struct v4l2_ctrl_mpeg2_quantization`, matrices in zigzag scan order.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct V4l2CtrlMpeg2Quantization {
    pub intra_quantiser_matrix: [u8; 64],
    pub non_intra_quantiser_matrix: [u8; 64],
    pub chroma_intra_quantiser_matrix: [u8; 64],
    pub chroma_non_intra_quantiser_matrix: [u8; 64],
}

impl Default for V4l2CtrlMpeg2Quantization {
    fn default() -> Self {
        Self {
            intra_quantiser_matrix: DEFAULT_INTRA_QUANTISER_MATRIX,
            non_intra_quantiser_matrix: DEFAULT_NON_INTRA_QUANTISER_MATRIX,
            chroma_intra_quantiser_matrix: DEFAULT_INTRA_QUANTISER_MATRIX,
            chroma_non_intra_quantiser_matrix: DEFAULT_NON_INTRA_QUANTISER_MATRIX,
        }
    }
}

impl From<&QuantMatrixExtension> for V4l2CtrlMpeg2Quantization {
    fn from(quant: &QuantMatrixExtension) -> Self {
        let intra = quant
            .intra_quantiser_matrix
            .unwrap_or(DEFAULT_INTRA_QUANTISER_MATRIX);
        let non_intra = quant
            .non_intra_quantiser_matrix
            .unwrap_or(DEFAULT_NON_INTRA_QUANTISER_MATRIX);

        // Chroma matrices default to their luma counterpart. See 6.3.11.
        Self {
            intra_quantiser_matrix: intra,
            non_intra_quantiser_matrix: non_intra,
            chroma_intra_quantiser_matrix: quant.chroma_intra_quantiser_matrix.unwrap_or(intra),
            chroma_non_intra_quantiser_matrix: quant
                .chroma_non_intra_quantiser_matrix
                .unwrap_or(non_intra),
        }
    }
}

impl ControlRecord for V4l2CtrlMpeg2Quantization {
    const ID: u32 = V4L2_CID_MPEG_VIDEO_MPEG2_QUANTIZATION;
    const TYPE: u32 = V4L2_CTRL_TYPE_MPEG2_QUANTIZATION;

    fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&self.intra_quantiser_matrix);
        buf.put_slice(&self.non_intra_quantiser_matrix);
        buf.put_slice(&self.chroma_intra_quantiser_matrix);
        buf.put_slice(&self.chroma_non_intra_quantiser_matrix);
    }
}
