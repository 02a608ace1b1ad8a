// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use bytes::BufMut;
use enumn::N;

use crate::codec::h265::parser::Pps;
use crate::codec::h265::parser::ScalingLists;
use crate::codec::h265::parser::Slice;
use crate::codec::h265::parser::SliceHeader;
use crate::codec::h265::parser::SliceType;
use crate::codec::h265::parser::Sps;
use crate::codec::h265::picture::PictureData;
use crate::device::v4l2::stateless::controls::flag;
use crate::device::v4l2::stateless::controls::saturate_i8;
use crate::device::v4l2::stateless::controls::saturate_u8;
use crate::device::v4l2::stateless::controls::ControlRecord;
use crate::device::v4l2::stateless::controls::MalformedHeader;
use crate::device::v4l2::stateless::controls::V4L2_CID_CODEC_BASE;

pub const V4L2_CID_MPEG_VIDEO_HEVC_SPS: u32 = V4L2_CID_CODEC_BASE + 1008;
pub const V4L2_CID_MPEG_VIDEO_HEVC_PPS: u32 = V4L2_CID_CODEC_BASE + 1009;
pub const V4L2_CID_MPEG_VIDEO_HEVC_SLICE_PARAMS: u32 = V4L2_CID_CODEC_BASE + 1010;
pub const V4L2_CID_MPEG_VIDEO_HEVC_SCALING_MATRIX: u32 = V4L2_CID_CODEC_BASE + 1011;

pub const V4L2_CTRL_TYPE_HEVC_SPS: u32 = 0x0120;
pub const V4L2_CTRL_TYPE_HEVC_PPS: u32 = 0x0121;
pub const V4L2_CTRL_TYPE_HEVC_SLICE_PARAMS: u32 = 0x0122;
pub const V4L2_CTRL_TYPE_HEVC_SCALING_MATRIX: u32 = 0x0123;

pub const V4L2_HEVC_DPB_ENTRIES_NUM_MAX: usize = 16;
/// Number of usable slots of the reference index and weight arrays.
pub const V4L2_HEVC_REF_IDX_NUM_MAX: usize = 15;
pub const V4L2_HEVC_ENTRY_POINT_OFFSETS_MAX: usize = 256;
pub const V4L2_HEVC_TILE_COLUMNS_MAX: usize = 20;
pub const V4L2_HEVC_TILE_ROWS_MAX: usize = 22;

/// RPS subset a DPB entry belongs to, from the point of view of the current picture.
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum DpbEntryRps {
    #[default]
    Unused = 0,
    StCurrBefore = 1,
    StCurrAfter = 2,
    LtCurr = 3,
}

const fn up_right_diagonal<const N: usize, const ROWS: usize>() -> [usize; N] {
    // Generics can't be used in const operations for now, so [0; ROWS * ROWS]
    // is rejected by the compiler
    assert!(ROWS * ROWS == N);

    let mut i = 0;
    let mut x = 0i32;
    let mut y = 0i32;
    let mut ret = [0; N];

    loop {
        while y >= 0 {
            if x < (ROWS as i32) && y < (ROWS as i32) {
                ret[i] = (x + ROWS as i32 * y) as usize;
                i += 1;
            }
            y -= 1;
            x += 1;
        }

        y = x;
        x = 0;
        if i >= N {
            break;
        }
    }

    ret
}

const UP_RIGHT_DIAGONAL_4X4: [usize; 16] = up_right_diagonal::<16, 4>();
const UP_RIGHT_DIAGONAL_8X8: [usize; 64] = up_right_diagonal::<64, 8>();

fn get_raster_from_up_right_diagonal_8x8(src: &[u8; 64], dst: &mut [u8; 64]) {
    for (i, &coef) in src.iter().enumerate() {
        dst[UP_RIGHT_DIAGONAL_8X8[i]] = coef;
    }
}

fn get_raster_from_up_right_diagonal_4x4(src: &[u8; 16], dst: &mut [u8; 16]) {
    for (i, &coef) in src.iter().enumerate() {
        dst[UP_RIGHT_DIAGONAL_4X4[i]] = coef;
    }
}

/// `struct v4l2_ctrl_hevc_sps`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct V4l2CtrlHevcSps {
    pub pic_width_in_luma_samples: u16,
    pub pic_height_in_luma_samples: u16,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub sps_max_dec_pic_buffering_minus1: u8,
    pub sps_max_num_reorder_pics: u8,
    pub sps_max_latency_increase_plus1: u8,
    pub log2_min_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    pub log2_min_luma_transform_block_size_minus2: u8,
    pub log2_diff_max_min_luma_transform_block_size: u8,
    pub max_transform_hierarchy_depth_inter: u8,
    pub max_transform_hierarchy_depth_intra: u8,
    pub pcm_sample_bit_depth_luma_minus1: u8,
    pub pcm_sample_bit_depth_chroma_minus1: u8,
    pub log2_min_pcm_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_pcm_luma_coding_block_size: u8,
    pub num_short_term_ref_pic_sets: u8,
    pub num_long_term_ref_pics_sps: u8,
    pub chroma_format_idc: u8,
    pub separate_colour_plane_flag: u8,
    pub scaling_list_enabled_flag: u8,
    pub amp_enabled_flag: u8,
    pub sample_adaptive_offset_enabled_flag: u8,
    pub pcm_enabled_flag: u8,
    pub pcm_loop_filter_disabled_flag: u8,
    pub long_term_ref_pics_present_flag: u8,
    pub sps_temporal_mvp_enabled_flag: u8,
    pub strong_intra_smoothing_enabled_flag: u8,
}

impl From<&Sps> for V4l2CtrlHevcSps {
    fn from(sps: &Sps) -> Self {
        let tid = sps.highest_tid();

        let mut ctrl = Self {
            pic_width_in_luma_samples: sps.pic_width_in_luma_samples,
            pic_height_in_luma_samples: sps.pic_height_in_luma_samples,
            bit_depth_luma_minus8: sps.bit_depth_luma.saturating_sub(8),
            bit_depth_chroma_minus8: sps.bit_depth_chroma.saturating_sub(8),
            log2_max_pic_order_cnt_lsb_minus4: sps.log2_max_pic_order_cnt_lsb.saturating_sub(4),
            sps_max_dec_pic_buffering_minus1: sps.max_dec_pic_buffering[tid].saturating_sub(1),
            sps_max_num_reorder_pics: sps.max_num_reorder_pics[tid],
            sps_max_latency_increase_plus1: saturate_u8(sps.max_latency_increase_plus1[tid]),
            log2_min_luma_coding_block_size_minus3: sps.log2_min_cb_size.saturating_sub(3),
            log2_diff_max_min_luma_coding_block_size: sps.log2_diff_max_min_luma_coding_block_size,
            log2_min_luma_transform_block_size_minus2: sps.log2_min_tb_size.saturating_sub(2),
            log2_diff_max_min_luma_transform_block_size: sps
                .log2_max_tb_size
                .saturating_sub(sps.log2_min_tb_size),
            max_transform_hierarchy_depth_inter: sps.max_transform_hierarchy_depth_inter,
            max_transform_hierarchy_depth_intra: sps.max_transform_hierarchy_depth_intra,
            num_short_term_ref_pic_sets: sps.num_short_term_ref_pic_sets,
            num_long_term_ref_pics_sps: sps.num_long_term_ref_pics_sps,
            chroma_format_idc: sps.chroma_format_idc,
            separate_colour_plane_flag: flag(sps.separate_colour_plane_flag),
            scaling_list_enabled_flag: flag(sps.scaling_list_enabled_flag),
            amp_enabled_flag: flag(sps.amp_enabled_flag),
            sample_adaptive_offset_enabled_flag: flag(sps.sample_adaptive_offset_enabled_flag),
            pcm_enabled_flag: flag(sps.pcm_enabled_flag),
            long_term_ref_pics_present_flag: flag(sps.long_term_ref_pics_present_flag),
            sps_temporal_mvp_enabled_flag: flag(sps.temporal_mvp_enabled_flag),
            strong_intra_smoothing_enabled_flag: flag(sps.strong_intra_smoothing_enabled_flag),
            ..Default::default()
        };

        if sps.pcm_enabled_flag {
            let pcm = &sps.pcm;
            ctrl.pcm_sample_bit_depth_luma_minus1 = pcm.bit_depth_luma.saturating_sub(1);
            ctrl.pcm_sample_bit_depth_chroma_minus1 = pcm.bit_depth_chroma.saturating_sub(1);
            ctrl.log2_min_pcm_luma_coding_block_size_minus3 =
                pcm.log2_min_pcm_cb_size.saturating_sub(3);
            ctrl.log2_diff_max_min_pcm_luma_coding_block_size = pcm
                .log2_max_pcm_cb_size
                .saturating_sub(pcm.log2_min_pcm_cb_size);
            ctrl.pcm_loop_filter_disabled_flag = flag(pcm.loop_filter_disabled_flag);
        }

        ctrl
    }
}

impl ControlRecord for V4l2CtrlHevcSps {
    const ID: u32 = V4L2_CID_MPEG_VIDEO_HEVC_SPS;
    const TYPE: u32 = V4L2_CTRL_TYPE_HEVC_SPS;

    fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.pic_width_in_luma_samples);
        buf.put_u16_le(self.pic_height_in_luma_samples);
        buf.put_slice(&[
            self.bit_depth_luma_minus8,
            self.bit_depth_chroma_minus8,
            self.log2_max_pic_order_cnt_lsb_minus4,
            self.sps_max_dec_pic_buffering_minus1,
            self.sps_max_num_reorder_pics,
            self.sps_max_latency_increase_plus1,
            self.log2_min_luma_coding_block_size_minus3,
            self.log2_diff_max_min_luma_coding_block_size,
            self.log2_min_luma_transform_block_size_minus2,
            self.log2_diff_max_min_luma_transform_block_size,
            self.max_transform_hierarchy_depth_inter,
            self.max_transform_hierarchy_depth_intra,
            self.pcm_sample_bit_depth_luma_minus1,
            self.pcm_sample_bit_depth_chroma_minus1,
            self.log2_min_pcm_luma_coding_block_size_minus3,
            self.log2_diff_max_min_pcm_luma_coding_block_size,
            self.num_short_term_ref_pic_sets,
            self.num_long_term_ref_pics_sps,
            self.chroma_format_idc,
            self.separate_colour_plane_flag,
            self.scaling_list_enabled_flag,
            self.amp_enabled_flag,
            self.sample_adaptive_offset_enabled_flag,
            self.pcm_enabled_flag,
            self.pcm_loop_filter_disabled_flag,
            self.long_term_ref_pics_present_flag,
            self.sps_temporal_mvp_enabled_flag,
            self.strong_intra_smoothing_enabled_flag,
        ]);
    }
}

/// `struct v4l2_ctrl_hevc_pps`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct V4l2CtrlHevcPps {
    pub dependent_slice_segment_flag: u8,
    pub output_flag_present_flag: u8,
    pub num_extra_slice_header_bits: u8,
    pub sign_data_hiding_enabled_flag: u8,
    pub cabac_init_present_flag: u8,
    pub init_qp_minus26: i8,
    pub constrained_intra_pred_flag: u8,
    pub transform_skip_enabled_flag: u8,
    pub cu_qp_delta_enabled_flag: u8,
    pub diff_cu_qp_delta_depth: u8,
    pub pps_cb_qp_offset: i8,
    pub pps_cr_qp_offset: i8,
    pub pps_slice_chroma_qp_offsets_present_flag: u8,
    pub weighted_pred_flag: u8,
    pub weighted_bipred_flag: u8,
    pub transquant_bypass_enabled_flag: u8,
    pub tiles_enabled_flag: u8,
    pub entropy_coding_sync_enabled_flag: u8,
    pub num_tile_columns_minus1: u8,
    pub num_tile_rows_minus1: u8,
    pub column_width_minus1: [u16; V4L2_HEVC_TILE_COLUMNS_MAX],
    pub row_height_minus1: [u16; V4L2_HEVC_TILE_ROWS_MAX],
    pub loop_filter_across_tiles_enabled_flag: u8,
    pub pps_loop_filter_across_slices_enabled_flag: u8,
    pub deblocking_filter_override_enabled_flag: u8,
    pub pps_disable_deblocking_filter_flag: u8,
    pub pps_beta_offset_div2: i8,
    pub pps_tc_offset_div2: i8,
    pub lists_modification_present_flag: u8,
    pub log2_parallel_merge_level_minus2: u8,
    pub slice_segment_header_extension_present_flag: u8,
    pub scaling_list_enable_flag: u8,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
}

/// Converts tile sizes in CTBs to their minus1 form, checking them against the picture size.
/// Returns the tile count minus 1.
fn fill_tile_sizes(
    kind: &'static str,
    count: u32,
    sizes: &[u32],
    picture_span: u32,
    dst: &mut [u16],
) -> Result<u8, MalformedHeader> {
    if count == 0 || count as usize > dst.len() {
        return Err(MalformedHeader::InvalidTileCount {
            kind,
            count,
            max: dst.len(),
        });
    }

    if sizes.len() != count as usize {
        return Err(MalformedHeader::TileCountMismatch {
            kind,
            len: sizes.len(),
            count,
        });
    }

    for (index, (&size, out)) in sizes.iter().zip(dst.iter_mut()).enumerate() {
        *out = size
            .checked_sub(1)
            .and_then(|s| u16::try_from(s).ok())
            .ok_or(MalformedHeader::InvalidTileSize { kind, index, size })?;
    }

    let sum = sizes.iter().map(|&s| u64::from(s)).sum::<u64>();
    if sum != u64::from(picture_span) {
        return Err(MalformedHeader::TileSpanMismatch {
            kind,
            sum,
            expected: picture_span,
        });
    }

    // `count` fits since it is bounded by the array capacity.
    Ok((count - 1) as u8)
}

impl TryFrom<(&Pps, &Sps)> for V4l2CtrlHevcPps {
    type Error = MalformedHeader;

    fn try_from((pps, sps): (&Pps, &Sps)) -> Result<Self, Self::Error> {
        let mut ctrl = Self {
            dependent_slice_segment_flag: flag(pps.dependent_slice_segments_enabled_flag),
            output_flag_present_flag: flag(pps.output_flag_present_flag),
            num_extra_slice_header_bits: pps.num_extra_slice_header_bits,
            sign_data_hiding_enabled_flag: flag(pps.sign_data_hiding_enabled_flag),
            cabac_init_present_flag: flag(pps.cabac_init_present_flag),
            init_qp_minus26: pps.init_qp_minus26,
            constrained_intra_pred_flag: flag(pps.constrained_intra_pred_flag),
            transform_skip_enabled_flag: flag(pps.transform_skip_enabled_flag),
            cu_qp_delta_enabled_flag: flag(pps.cu_qp_delta_enabled_flag),
            diff_cu_qp_delta_depth: pps.diff_cu_qp_delta_depth,
            pps_cb_qp_offset: pps.cb_qp_offset,
            pps_cr_qp_offset: pps.cr_qp_offset,
            pps_slice_chroma_qp_offsets_present_flag: flag(
                pps.slice_chroma_qp_offsets_present_flag,
            ),
            weighted_pred_flag: flag(pps.weighted_pred_flag),
            weighted_bipred_flag: flag(pps.weighted_bipred_flag),
            transquant_bypass_enabled_flag: flag(pps.transquant_bypass_enabled_flag),
            tiles_enabled_flag: flag(pps.tiles_enabled_flag),
            entropy_coding_sync_enabled_flag: flag(pps.entropy_coding_sync_enabled_flag),
            loop_filter_across_tiles_enabled_flag: flag(pps.loop_filter_across_tiles_enabled_flag),
            pps_loop_filter_across_slices_enabled_flag: flag(
                pps.loop_filter_across_slices_enabled_flag,
            ),
            deblocking_filter_override_enabled_flag: flag(
                pps.deblocking_filter_override_enabled_flag,
            ),
            pps_disable_deblocking_filter_flag: flag(pps.deblocking_filter_disabled_flag),
            pps_beta_offset_div2: pps.beta_offset_div2,
            pps_tc_offset_div2: pps.tc_offset_div2,
            lists_modification_present_flag: flag(pps.lists_modification_present_flag),
            log2_parallel_merge_level_minus2: pps.log2_parallel_merge_level.saturating_sub(2),
            slice_segment_header_extension_present_flag: flag(
                pps.slice_segment_header_extension_present_flag,
            ),
            scaling_list_enable_flag: flag(pps.scaling_list_data_present_flag),
            num_ref_idx_l0_default_active_minus1: pps.num_ref_idx_l0_default_active_minus1,
            num_ref_idx_l1_default_active_minus1: pps.num_ref_idx_l1_default_active_minus1,
            ..Default::default()
        };

        if pps.tiles_enabled_flag {
            let invalid_ctb_size = || MalformedHeader::InvalidCtbSize {
                log2_min_cb_size: sps.log2_min_cb_size,
                log2_diff_max_min: sps.log2_diff_max_min_luma_coding_block_size,
            };

            ctrl.num_tile_columns_minus1 = fill_tile_sizes(
                "column",
                pps.num_tile_columns,
                &pps.column_width,
                sps.pic_width_in_ctbs().ok_or_else(invalid_ctb_size)?,
                &mut ctrl.column_width_minus1,
            )?;
            ctrl.num_tile_rows_minus1 = fill_tile_sizes(
                "row",
                pps.num_tile_rows,
                &pps.row_height,
                sps.pic_height_in_ctbs().ok_or_else(invalid_ctb_size)?,
                &mut ctrl.row_height_minus1,
            )?;

            log::debug!(
                "tiles enabled: {}x{}",
                pps.num_tile_columns,
                pps.num_tile_rows
            );
        }

        Ok(ctrl)
    }
}

impl ControlRecord for V4l2CtrlHevcPps {
    const ID: u32 = V4L2_CID_MPEG_VIDEO_HEVC_PPS;
    const TYPE: u32 = V4L2_CTRL_TYPE_HEVC_PPS;

    fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.dependent_slice_segment_flag);
        buf.put_u8(self.output_flag_present_flag);
        buf.put_u8(self.num_extra_slice_header_bits);
        buf.put_u8(self.sign_data_hiding_enabled_flag);
        buf.put_u8(self.cabac_init_present_flag);
        buf.put_i8(self.init_qp_minus26);
        buf.put_u8(self.constrained_intra_pred_flag);
        buf.put_u8(self.transform_skip_enabled_flag);
        buf.put_u8(self.cu_qp_delta_enabled_flag);
        buf.put_u8(self.diff_cu_qp_delta_depth);
        buf.put_i8(self.pps_cb_qp_offset);
        buf.put_i8(self.pps_cr_qp_offset);
        buf.put_u8(self.pps_slice_chroma_qp_offsets_present_flag);
        buf.put_u8(self.weighted_pred_flag);
        buf.put_u8(self.weighted_bipred_flag);
        buf.put_u8(self.transquant_bypass_enabled_flag);
        buf.put_u8(self.tiles_enabled_flag);
        buf.put_u8(self.entropy_coding_sync_enabled_flag);
        buf.put_u8(self.num_tile_columns_minus1);
        buf.put_u8(self.num_tile_rows_minus1);
        for width in self.column_width_minus1 {
            buf.put_u16_le(width);
        }
        for height in self.row_height_minus1 {
            buf.put_u16_le(height);
        }
        buf.put_u8(self.loop_filter_across_tiles_enabled_flag);
        buf.put_u8(self.pps_loop_filter_across_slices_enabled_flag);
        buf.put_u8(self.deblocking_filter_override_enabled_flag);
        buf.put_u8(self.pps_disable_deblocking_filter_flag);
        buf.put_i8(self.pps_beta_offset_div2);
        buf.put_i8(self.pps_tc_offset_div2);
        buf.put_u8(self.lists_modification_present_flag);
        buf.put_u8(self.log2_parallel_merge_level_minus2);
        buf.put_u8(self.slice_segment_header_extension_present_flag);
        buf.put_u8(self.scaling_list_enable_flag);
        buf.put_u8(self.num_ref_idx_l0_default_active_minus1);
        buf.put_u8(self.num_ref_idx_l1_default_active_minus1);
    }
}

/// `struct v4l2_ctrl_hevc_scaling_matrix`, all lists in raster order.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct V4l2CtrlHevcScalingMatrix {
    pub scaling_list_4x4: [[u8; 16]; 6],
    pub scaling_list_8x8: [[u8; 64]; 6],
    pub scaling_list_16x16: [[u8; 64]; 6],
    pub scaling_list_32x32: [[u8; 64]; 2],
    pub scaling_list_dc_coef_16x16: [u8; 6],
    pub scaling_list_dc_coef_32x32: [u8; 2],
}

impl Default for V4l2CtrlHevcScalingMatrix {
    fn default() -> Self {
        Self {
            scaling_list_4x4: [[0; 16]; 6],
            scaling_list_8x8: [[0; 64]; 6],
            scaling_list_16x16: [[0; 64]; 6],
            scaling_list_32x32: [[0; 64]; 2],
            scaling_list_dc_coef_16x16: [0; 6],
            scaling_list_dc_coef_32x32: [0; 2],
        }
    }
}

fn dc_coef(minus8: i16) -> Result<u8, MalformedHeader> {
    let value = i32::from(minus8) + 8;
    u8::try_from(value)
        .ok()
        .filter(|&dc| dc != 0)
        .ok_or(MalformedHeader::ScalingDcOutOfRange { value })
}

impl TryFrom<&ScalingLists> for V4l2CtrlHevcScalingMatrix {
    type Error = MalformedHeader;

    fn try_from(scaling_lists: &ScalingLists) -> Result<Self, Self::Error> {
        let mut ctrl = Self::default();

        for i in 0..6 {
            get_raster_from_up_right_diagonal_4x4(
                &scaling_lists.scaling_list_4x4[i],
                &mut ctrl.scaling_list_4x4[i],
            );
            get_raster_from_up_right_diagonal_8x8(
                &scaling_lists.scaling_list_8x8[i],
                &mut ctrl.scaling_list_8x8[i],
            );
            get_raster_from_up_right_diagonal_8x8(
                &scaling_lists.scaling_list_16x16[i],
                &mut ctrl.scaling_list_16x16[i],
            );
            ctrl.scaling_list_dc_coef_16x16[i] =
                dc_coef(scaling_lists.scaling_list_dc_coef_minus8_16x16[i])?;
        }

        // Only matrixId 0 (intra) and 3 (inter) exist for 32x32.
        for i in 0..2 {
            get_raster_from_up_right_diagonal_8x8(
                &scaling_lists.scaling_list_32x32[i * 3],
                &mut ctrl.scaling_list_32x32[i],
            );
            ctrl.scaling_list_dc_coef_32x32[i] =
                dc_coef(scaling_lists.scaling_list_dc_coef_minus8_32x32[i * 3])?;
        }

        Ok(ctrl)
    }
}

impl ControlRecord for V4l2CtrlHevcScalingMatrix {
    const ID: u32 = V4L2_CID_MPEG_VIDEO_HEVC_SCALING_MATRIX;
    const TYPE: u32 = V4L2_CTRL_TYPE_HEVC_SCALING_MATRIX;

    fn write<B: BufMut>(&self, buf: &mut B) {
        for list in &self.scaling_list_4x4 {
            buf.put_slice(list);
        }
        for list in &self.scaling_list_8x8 {
            buf.put_slice(list);
        }
        for list in &self.scaling_list_16x16 {
            buf.put_slice(list);
        }
        for list in &self.scaling_list_32x32 {
            buf.put_slice(list);
        }
        buf.put_slice(&self.scaling_list_dc_coef_16x16);
        buf.put_slice(&self.scaling_list_dc_coef_32x32);
    }
}

/// Returns the scaling lists in effect for a picture: the PPS lists if present, else the SPS
/// lists if enabled, else none.
pub fn scaling_lists_for<'a>(sps: &'a Sps, pps: &'a Pps) -> Option<&'a ScalingLists> {
    if pps.scaling_list_data_present_flag {
        Some(&pps.scaling_list)
    } else if sps.scaling_list_enabled_flag {
        Some(&sps.scaling_list)
    } else {
        None
    }
}

/// `struct v4l2_hevc_dpb_entry`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct V4l2HevcDpbEntry {
    pub buffer_tag: u32,
    pub rps: u8,
    pub field_pic: u8,
    pub reserved: [u8; 2],
    pub pic_order_cnt: [i32; 2],
}

impl V4l2HevcDpbEntry {
    fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.buffer_tag);
        buf.put_u8(self.rps);
        buf.put_u8(self.field_pic);
        buf.put_slice(&self.reserved);
        buf.put_i32_le(self.pic_order_cnt[0]);
        buf.put_i32_le(self.pic_order_cnt[1]);
    }
}

/// `struct v4l2_hevc_pred_weight_table`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct V4l2HevcPredWeightTable {
    pub luma_log2_weight_denom: u8,
    pub delta_chroma_log2_weight_denom: i8,

    pub delta_luma_weight_l0: [i8; V4L2_HEVC_DPB_ENTRIES_NUM_MAX],
    pub luma_offset_l0: [i8; V4L2_HEVC_DPB_ENTRIES_NUM_MAX],
    pub delta_chroma_weight_l0: [[i8; 2]; V4L2_HEVC_DPB_ENTRIES_NUM_MAX],
    pub chroma_offset_l0: [[i8; 2]; V4L2_HEVC_DPB_ENTRIES_NUM_MAX],

    pub delta_luma_weight_l1: [i8; V4L2_HEVC_DPB_ENTRIES_NUM_MAX],
    pub luma_offset_l1: [i8; V4L2_HEVC_DPB_ENTRIES_NUM_MAX],
    pub delta_chroma_weight_l1: [[i8; 2]; V4L2_HEVC_DPB_ENTRIES_NUM_MAX],
    pub chroma_offset_l1: [[i8; 2]; V4L2_HEVC_DPB_ENTRIES_NUM_MAX],

    pub reserved: [u8; 2],
}

impl V4l2HevcPredWeightTable {
    /// Builds the table from the slice's explicit weights. The table stays zeroed unless the
    /// slice uses explicit weighted prediction.
    pub fn from_slice_header(hdr: &SliceHeader, sps: &Sps, pps: &Pps) -> Self {
        let mut table = Self::default();

        let weighted = match hdr.type_ {
            SliceType::P => pps.weighted_pred_flag,
            SliceType::B => pps.weighted_bipred_flag,
            SliceType::I => false,
        };
        if !weighted {
            return table;
        }

        let pwt = &hdr.pred_weight_table;
        table.luma_log2_weight_denom = pwt.luma_log2_weight_denom;
        if sps.chroma_format_idc != 0 {
            table.delta_chroma_log2_weight_denom = saturate_i8(
                i32::from(pwt.chroma_log2_weight_denom) - i32::from(pwt.luma_log2_weight_denom),
            );
        }

        // Both denominators are in the range 0..=7.
        let luma_weight_denom = 1i32 << pwt.luma_log2_weight_denom.min(7);
        let chroma_weight_denom = 1i32 << pwt.chroma_log2_weight_denom.min(7);

        let num_l0 = usize::from(hdr.num_ref_idx_l0_active).min(V4L2_HEVC_REF_IDX_NUM_MAX);
        for i in 0..num_l0 {
            table.delta_luma_weight_l0[i] =
                saturate_i8(i32::from(pwt.luma_weight_l0[i]) - luma_weight_denom);
            table.luma_offset_l0[i] = saturate_i8(pwt.luma_offset_l0[i].into());
            for j in 0..2 {
                table.delta_chroma_weight_l0[i][j] =
                    saturate_i8(i32::from(pwt.chroma_weight_l0[i][j]) - chroma_weight_denom);
                table.chroma_offset_l0[i][j] = saturate_i8(pwt.chroma_offset_l0[i][j].into());
            }
        }

        if !hdr.type_.is_b() {
            return table;
        }

        let num_l1 = usize::from(hdr.num_ref_idx_l1_active).min(V4L2_HEVC_REF_IDX_NUM_MAX);
        for i in 0..num_l1 {
            table.delta_luma_weight_l1[i] =
                saturate_i8(i32::from(pwt.luma_weight_l1[i]) - luma_weight_denom);
            table.luma_offset_l1[i] = saturate_i8(pwt.luma_offset_l1[i].into());
            for j in 0..2 {
                table.delta_chroma_weight_l1[i][j] =
                    saturate_i8(i32::from(pwt.chroma_weight_l1[i][j]) - chroma_weight_denom);
                table.chroma_offset_l1[i][j] = saturate_i8(pwt.chroma_offset_l1[i][j].into());
            }
        }

        table
    }

    fn write<B: BufMut>(&self, buf: &mut B) {
        fn put_i8s<B: BufMut>(buf: &mut B, values: impl IntoIterator<Item = i8>) {
            for v in values {
                buf.put_i8(v);
            }
        }

        buf.put_u8(self.luma_log2_weight_denom);
        buf.put_i8(self.delta_chroma_log2_weight_denom);

        put_i8s(buf, self.delta_luma_weight_l0);
        put_i8s(buf, self.luma_offset_l0);
        put_i8s(buf, self.delta_chroma_weight_l0.into_iter().flatten());
        put_i8s(buf, self.chroma_offset_l0.into_iter().flatten());

        put_i8s(buf, self.delta_luma_weight_l1);
        put_i8s(buf, self.luma_offset_l1);
        put_i8s(buf, self.delta_chroma_weight_l1.into_iter().flatten());
        put_i8s(buf, self.chroma_offset_l1.into_iter().flatten());

        buf.put_slice(&self.reserved);
    }
}

/// `struct v4l2_ctrl_hevc_slice_params`
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct V4l2CtrlHevcSliceParams {
    pub bit_size: u32,
    pub data_bit_offset: u32,

    // ISO/IEC 23008-2, ITU-T Rec. H.265: NAL unit header
    pub nal_unit_type: u8,
    pub nuh_temporal_id_plus1: u8,

    // ISO/IEC 23008-2, ITU-T Rec. H.265: General slice segment header
    pub slice_type: u8,
    pub colour_plane_id: u8,
    pub slice_pic_order_cnt: i32,
    pub slice_sao_luma_flag: u8,
    pub slice_sao_chroma_flag: u8,
    pub slice_temporal_mvp_enabled_flag: u8,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub mvd_l1_zero_flag: u8,
    pub cabac_init_flag: u8,
    pub collocated_from_l0_flag: u8,
    pub collocated_ref_idx: u8,
    pub five_minus_max_num_merge_cand: u8,
    pub use_integer_mv_flag: u8,
    pub slice_qp_delta: i8,
    pub slice_cb_qp_offset: i8,
    pub slice_cr_qp_offset: i8,
    pub slice_act_y_qp_offset: i8,
    pub slice_act_cb_qp_offset: i8,
    pub slice_act_cr_qp_offset: i8,
    pub slice_deblocking_filter_disabled_flag: u8,
    pub slice_beta_offset_div2: i8,
    pub slice_tc_offset_div2: i8,
    pub slice_loop_filter_across_slices_enabled_flag: u8,

    // ISO/IEC 23008-2, ITU-T Rec. H.265: Picture timing SEI message
    pub pic_struct: u8,

    pub num_rps_poc_st_curr_before: u8,
    pub num_rps_poc_st_curr_after: u8,
    pub num_rps_poc_lt_curr: u8,
    pub num_active_dpb_entries: u8,
    pub reserved: [u8; 2],

    pub slice_segment_addr: u32,

    pub dpb: [V4l2HevcDpbEntry; V4L2_HEVC_DPB_ENTRIES_NUM_MAX],
    pub ref_idx_l0: [u8; V4L2_HEVC_DPB_ENTRIES_NUM_MAX],
    pub ref_idx_l1: [u8; V4L2_HEVC_DPB_ENTRIES_NUM_MAX],

    // ISO/IEC 23008-2, ITU-T Rec. H.265: Weighted prediction parameter
    pub pred_weight_table: V4l2HevcPredWeightTable,

    pub num_entry_point_offsets: u32,
    pub entry_point_offset_minus1: [u32; V4L2_HEVC_ENTRY_POINT_OFFSETS_MAX],
}

impl Default for V4l2CtrlHevcSliceParams {
    fn default() -> Self {
        Self {
            bit_size: 0,
            data_bit_offset: 0,
            nal_unit_type: 0,
            nuh_temporal_id_plus1: 0,
            slice_type: 0,
            colour_plane_id: 0,
            slice_pic_order_cnt: 0,
            slice_sao_luma_flag: 0,
            slice_sao_chroma_flag: 0,
            slice_temporal_mvp_enabled_flag: 0,
            num_ref_idx_l0_active_minus1: 0,
            num_ref_idx_l1_active_minus1: 0,
            mvd_l1_zero_flag: 0,
            cabac_init_flag: 0,
            collocated_from_l0_flag: 0,
            collocated_ref_idx: 0,
            five_minus_max_num_merge_cand: 0,
            use_integer_mv_flag: 0,
            slice_qp_delta: 0,
            slice_cb_qp_offset: 0,
            slice_cr_qp_offset: 0,
            slice_act_y_qp_offset: 0,
            slice_act_cb_qp_offset: 0,
            slice_act_cr_qp_offset: 0,
            slice_deblocking_filter_disabled_flag: 0,
            slice_beta_offset_div2: 0,
            slice_tc_offset_div2: 0,
            slice_loop_filter_across_slices_enabled_flag: 0,
            pic_struct: 0,
            num_rps_poc_st_curr_before: 0,
            num_rps_poc_st_curr_after: 0,
            num_rps_poc_lt_curr: 0,
            num_active_dpb_entries: 0,
            reserved: [0; 2],
            slice_segment_addr: 0,
            dpb: Default::default(),
            ref_idx_l0: Default::default(),
            ref_idx_l1: Default::default(),
            pred_weight_table: Default::default(),
            num_entry_point_offsets: 0,
            entry_point_offset_minus1: [0; V4L2_HEVC_ENTRY_POINT_OFFSETS_MAX],
        }
    }
}

impl V4l2CtrlHevcSliceParams {
    /// Fills the fields coming from the slice segment header and the NAL unit header. The DPB,
    /// the reference indices and the RPS sizes are left empty.
    pub fn from_slice(slice: &Slice, picture: &PictureData, sps: &Sps, pps: &Pps) -> Self {
        let hdr = &slice.header;

        let mut ctrl = Self {
            data_bit_offset: hdr.header_bit_size,
            nal_unit_type: slice.nalu.type_ as u8,
            nuh_temporal_id_plus1: slice.nalu.nuh_temporal_id_plus1,
            slice_type: hdr.type_ as u8,
            colour_plane_id: hdr.colour_plane_id,
            slice_pic_order_cnt: picture.pic_order_cnt_val,
            slice_sao_luma_flag: flag(hdr.sao_luma_flag),
            slice_sao_chroma_flag: flag(hdr.sao_chroma_flag),
            slice_temporal_mvp_enabled_flag: flag(hdr.temporal_mvp_enabled_flag),
            num_ref_idx_l0_active_minus1: hdr.num_ref_idx_l0_active.saturating_sub(1),
            num_ref_idx_l1_active_minus1: hdr.num_ref_idx_l1_active.saturating_sub(1),
            mvd_l1_zero_flag: flag(hdr.mvd_l1_zero_flag),
            cabac_init_flag: flag(hdr.cabac_init_flag),
            collocated_from_l0_flag: flag(hdr.collocated_from_l0_flag),
            collocated_ref_idx: if hdr.temporal_mvp_enabled_flag {
                hdr.collocated_ref_idx
            } else {
                0
            },
            five_minus_max_num_merge_cand: if hdr.type_.is_i() {
                0
            } else {
                5u8.saturating_sub(hdr.max_num_merge_cand)
            },
            slice_qp_delta: hdr.qp_delta,
            slice_cb_qp_offset: hdr.cb_qp_offset,
            slice_cr_qp_offset: hdr.cr_qp_offset,
            slice_deblocking_filter_disabled_flag: flag(hdr.deblocking_filter_disabled_flag),
            slice_beta_offset_div2: hdr.beta_offset_div2,
            slice_tc_offset_div2: hdr.tc_offset_div2,
            slice_loop_filter_across_slices_enabled_flag: flag(
                hdr.loop_filter_across_slices_enabled_flag,
            ),
            pic_struct: picture.pic_struct,
            slice_segment_addr: hdr.segment_address,
            pred_weight_table: V4l2HevcPredWeightTable::from_slice_header(hdr, sps, pps),
            ..Default::default()
        };

        ctrl.set_entry_point_offsets(&hdr.entry_point_offsets);

        ctrl
    }

    /// Sets the DPB entries, keeping at most `V4L2_HEVC_DPB_ENTRIES_NUM_MAX` of them.
    pub fn set_dpb_entries(&mut self, entries: &[V4l2HevcDpbEntry]) -> &mut Self {
        let num = entries.len().min(V4L2_HEVC_DPB_ENTRIES_NUM_MAX);
        self.dpb = Default::default();
        self.dpb[..num].copy_from_slice(&entries[..num]);
        self.num_active_dpb_entries = num as u8;
        self
    }

    /// The active part of the DPB array.
    pub fn dpb_entries(&self) -> &[V4l2HevcDpbEntry] {
        let num = usize::from(self.num_active_dpb_entries).min(V4L2_HEVC_DPB_ENTRIES_NUM_MAX);
        &self.dpb[..num]
    }

    pub fn set_num_rps_poc(
        &mut self,
        st_curr_before: usize,
        st_curr_after: usize,
        lt_curr: usize,
    ) -> &mut Self {
        let clamp = |n: usize| u8::try_from(n).unwrap_or(u8::MAX);
        self.num_rps_poc_st_curr_before = clamp(st_curr_before);
        self.num_rps_poc_st_curr_after = clamp(st_curr_after);
        self.num_rps_poc_lt_curr = clamp(lt_curr);
        self
    }

    /// Sets the entry point offsets, given as actual byte offsets. Offsets beyond
    /// `V4L2_HEVC_ENTRY_POINT_OFFSETS_MAX` are dropped; the number of dropped offsets is
    /// returned.
    pub fn set_entry_point_offsets(&mut self, offsets: &[u32]) -> usize {
        let num = offsets.len().min(V4L2_HEVC_ENTRY_POINT_OFFSETS_MAX);

        self.entry_point_offset_minus1 = [0; V4L2_HEVC_ENTRY_POINT_OFFSETS_MAX];
        for (dst, offset) in self.entry_point_offset_minus1.iter_mut().zip(offsets) {
            *dst = offset.saturating_sub(1);
        }
        self.num_entry_point_offsets = num as u32;

        offsets.len() - num
    }
}

impl ControlRecord for V4l2CtrlHevcSliceParams {
    const ID: u32 = V4L2_CID_MPEG_VIDEO_HEVC_SLICE_PARAMS;
    const TYPE: u32 = V4L2_CTRL_TYPE_HEVC_SLICE_PARAMS;

    fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.bit_size);
        buf.put_u32_le(self.data_bit_offset);

        buf.put_u8(self.nal_unit_type);
        buf.put_u8(self.nuh_temporal_id_plus1);

        buf.put_u8(self.slice_type);
        buf.put_u8(self.colour_plane_id);
        buf.put_i32_le(self.slice_pic_order_cnt);
        buf.put_u8(self.slice_sao_luma_flag);
        buf.put_u8(self.slice_sao_chroma_flag);
        buf.put_u8(self.slice_temporal_mvp_enabled_flag);
        buf.put_u8(self.num_ref_idx_l0_active_minus1);
        buf.put_u8(self.num_ref_idx_l1_active_minus1);
        buf.put_u8(self.mvd_l1_zero_flag);
        buf.put_u8(self.cabac_init_flag);
        buf.put_u8(self.collocated_from_l0_flag);
        buf.put_u8(self.collocated_ref_idx);
        buf.put_u8(self.five_minus_max_num_merge_cand);
        buf.put_u8(self.use_integer_mv_flag);
        buf.put_i8(self.slice_qp_delta);
        buf.put_i8(self.slice_cb_qp_offset);
        buf.put_i8(self.slice_cr_qp_offset);
        buf.put_i8(self.slice_act_y_qp_offset);
        buf.put_i8(self.slice_act_cb_qp_offset);
        buf.put_i8(self.slice_act_cr_qp_offset);
        buf.put_u8(self.slice_deblocking_filter_disabled_flag);
        buf.put_i8(self.slice_beta_offset_div2);
        buf.put_i8(self.slice_tc_offset_div2);
        buf.put_u8(self.slice_loop_filter_across_slices_enabled_flag);

        buf.put_u8(self.pic_struct);

        buf.put_u8(self.num_rps_poc_st_curr_before);
        buf.put_u8(self.num_rps_poc_st_curr_after);
        buf.put_u8(self.num_rps_poc_lt_curr);
        buf.put_u8(self.num_active_dpb_entries);
        buf.put_slice(&self.reserved);

        buf.put_u32_le(self.slice_segment_addr);

        for entry in &self.dpb {
            entry.write(buf);
        }
        buf.put_slice(&self.ref_idx_l0);
        buf.put_slice(&self.ref_idx_l1);

        self.pred_weight_table.write(buf);

        buf.put_u32_le(self.num_entry_point_offsets);
        for offset in self.entry_point_offset_minus1 {
            buf.put_u32_le(offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use byteorder::ByteOrder;
    use byteorder::LittleEndian;

    use super::*;
    use crate::codec::h265::parser::NaluHeader;
    use crate::codec::h265::parser::NaluType;
    use crate::codec::h265::parser::PcmParams;
    use crate::codec::h265::parser::PredWeightTable;

    fn serialize<R: ControlRecord>(record: &R) -> Vec<u8> {
        record.to_ext_control().payload.to_vec()
    }

    fn sps_1080p() -> Sps {
        Sps {
            pic_width_in_luma_samples: 1920,
            pic_height_in_luma_samples: 1080,
            log2_min_cb_size: 3,
            log2_diff_max_min_luma_coding_block_size: 3,
            log2_min_tb_size: 2,
            log2_max_tb_size: 5,
            ..Default::default()
        }
    }

    #[test]
    fn record_sizes() {
        assert_eq!(V4l2CtrlHevcSps::SIZE, 32);
        assert_eq!(V4l2CtrlHevcPps::SIZE, 116);
        assert_eq!(V4l2CtrlHevcScalingMatrix::SIZE, 1000);
        assert_eq!(V4l2CtrlHevcSliceParams::SIZE, 1560);
        assert_eq!(std::mem::size_of::<V4l2HevcDpbEntry>(), 16);
        assert_eq!(std::mem::size_of::<V4l2HevcPredWeightTable>(), 196);

        assert_eq!(serialize(&V4l2CtrlHevcSps::default()).len(), V4l2CtrlHevcSps::SIZE);
        assert_eq!(serialize(&V4l2CtrlHevcPps::default()).len(), V4l2CtrlHevcPps::SIZE);
        assert_eq!(
            serialize(&V4l2CtrlHevcScalingMatrix::default()).len(),
            V4l2CtrlHevcScalingMatrix::SIZE
        );
        assert_eq!(
            serialize(&V4l2CtrlHevcSliceParams::default()).len(),
            V4l2CtrlHevcSliceParams::SIZE
        );
    }

    #[test]
    fn control_ids() {
        assert_eq!(V4L2_CID_MPEG_VIDEO_HEVC_SPS, 0x0099_0cf0);
        assert_eq!(V4L2_CID_MPEG_VIDEO_HEVC_SCALING_MATRIX, 0x0099_0cf3);

        let ctrl = V4l2CtrlHevcPps::default().to_ext_control();
        assert_eq!(ctrl.id, V4L2_CID_MPEG_VIDEO_HEVC_PPS);
        assert_eq!(ctrl.type_, V4L2_CTRL_TYPE_HEVC_PPS);
        assert_eq!(ctrl.size(), 116);
    }

    #[test]
    fn sequence_translation() {
        let mut sps = Sps {
            bit_depth_luma: 10,
            bit_depth_chroma: 9,
            log2_max_pic_order_cnt_lsb: 8,
            max_sub_layers: 2,
            max_dec_pic_buffering: [3, 5, 0, 0, 0, 0, 0],
            max_num_reorder_pics: [1, 2, 0, 0, 0, 0, 0],
            max_latency_increase_plus1: [0, 4, 0, 0, 0, 0, 0],
            pcm: PcmParams {
                bit_depth_luma: 8,
                bit_depth_chroma: 8,
                log2_min_pcm_cb_size: 3,
                log2_max_pcm_cb_size: 5,
                loop_filter_disabled_flag: true,
            },
            sample_adaptive_offset_enabled_flag: true,
            ..sps_1080p()
        };

        let ctrl = V4l2CtrlHevcSps::from(&sps);
        assert_eq!(ctrl.pic_width_in_luma_samples, 1920);
        assert_eq!(ctrl.pic_height_in_luma_samples, 1080);
        assert_eq!(ctrl.bit_depth_luma_minus8, 2);
        assert_eq!(ctrl.bit_depth_chroma_minus8, 1);
        assert_eq!(ctrl.log2_max_pic_order_cnt_lsb_minus4, 4);
        // Highest sub-layer values.
        assert_eq!(ctrl.sps_max_dec_pic_buffering_minus1, 4);
        assert_eq!(ctrl.sps_max_num_reorder_pics, 2);
        assert_eq!(ctrl.sps_max_latency_increase_plus1, 4);
        assert_eq!(ctrl.log2_min_luma_coding_block_size_minus3, 0);
        assert_eq!(ctrl.log2_diff_max_min_luma_coding_block_size, 3);
        assert_eq!(ctrl.log2_min_luma_transform_block_size_minus2, 0);
        assert_eq!(ctrl.log2_diff_max_min_luma_transform_block_size, 3);
        assert_eq!(ctrl.sample_adaptive_offset_enabled_flag, 1);
        // PCM disabled: PCM fields stay zeroed.
        assert_eq!(ctrl.pcm_sample_bit_depth_luma_minus1, 0);
        assert_eq!(ctrl.pcm_loop_filter_disabled_flag, 0);

        sps.pcm_enabled_flag = true;
        let ctrl = V4l2CtrlHevcSps::from(&sps);
        assert_eq!(ctrl.pcm_enabled_flag, 1);
        assert_eq!(ctrl.pcm_sample_bit_depth_luma_minus1, 7);
        assert_eq!(ctrl.pcm_sample_bit_depth_chroma_minus1, 7);
        assert_eq!(ctrl.log2_min_pcm_luma_coding_block_size_minus3, 0);
        assert_eq!(ctrl.log2_diff_max_min_pcm_luma_coding_block_size, 2);
        assert_eq!(ctrl.pcm_loop_filter_disabled_flag, 1);

        let bytes = serialize(&ctrl);
        assert_eq!(LittleEndian::read_u16(&bytes[0..2]), 1920);
        assert_eq!(LittleEndian::read_u16(&bytes[2..4]), 1080);
        assert_eq!(bytes[4], 2);
        assert_eq!(bytes[27], 1);
    }

    #[test]
    fn picture_params_tiles() {
        let sps = sps_1080p();
        let pps = Pps {
            tiles_enabled_flag: true,
            num_tile_columns: 3,
            num_tile_rows: 2,
            column_width: vec![10, 10, 10],
            row_height: vec![9, 8],
            log2_parallel_merge_level: 4,
            beta_offset_div2: -2,
            tc_offset_div2: 3,
            init_qp_minus26: -4,
            ..Default::default()
        };

        let ctrl = V4l2CtrlHevcPps::try_from((&pps, &sps)).unwrap();
        assert_eq!(ctrl.tiles_enabled_flag, 1);
        assert_eq!(ctrl.num_tile_columns_minus1, 2);
        assert_eq!(ctrl.num_tile_rows_minus1, 1);
        assert_eq!(&ctrl.column_width_minus1[..4], &[9, 9, 9, 0]);
        assert_eq!(&ctrl.row_height_minus1[..3], &[8, 7, 0]);
        assert_eq!(ctrl.log2_parallel_merge_level_minus2, 2);
        assert_eq!(ctrl.pps_beta_offset_div2, -2);
        assert_eq!(ctrl.pps_tc_offset_div2, 3);

        // Round trip: adding one back yields the input sizes.
        let widths = ctrl.column_width_minus1[..3]
            .iter()
            .map(|&w| u32::from(w) + 1)
            .collect::<Vec<_>>();
        assert_eq!(widths, pps.column_width);

        let bytes = serialize(&ctrl);
        assert_eq!(bytes[5] as i8, -4);
        assert_eq!(bytes[18], 2);
        assert_eq!(LittleEndian::read_u16(&bytes[20..22]), 9);
        assert_eq!(LittleEndian::read_u16(&bytes[60..62]), 8);
        assert_eq!(bytes[108] as i8, -2);
        assert_eq!(bytes[111], 2);
    }

    #[test]
    fn picture_params_without_tiles_ignores_geometry() {
        let sps = sps_1080p();
        let pps = Pps {
            num_tile_columns: 40,
            column_width: vec![1],
            ..Default::default()
        };

        let ctrl = V4l2CtrlHevcPps::try_from((&pps, &sps)).unwrap();
        assert_eq!(ctrl.num_tile_columns_minus1, 0);
        assert_eq!(ctrl.column_width_minus1, [0; V4L2_HEVC_TILE_COLUMNS_MAX]);
    }

    #[test]
    fn picture_params_malformed_tiles() {
        let sps = sps_1080p();
        let tiled = Pps {
            tiles_enabled_flag: true,
            num_tile_columns: 1,
            num_tile_rows: 1,
            column_width: vec![30],
            row_height: vec![17],
            ..Default::default()
        };
        assert!(V4l2CtrlHevcPps::try_from((&tiled, &sps)).is_ok());

        let pps = Pps {
            num_tile_columns: 21,
            column_width: vec![1; 21],
            ..tiled.clone()
        };
        assert_eq!(
            V4l2CtrlHevcPps::try_from((&pps, &sps)),
            Err(MalformedHeader::InvalidTileCount {
                kind: "column",
                count: 21,
                max: V4L2_HEVC_TILE_COLUMNS_MAX
            })
        );

        let pps = Pps {
            num_tile_rows: 23,
            ..tiled.clone()
        };
        assert!(matches!(
            V4l2CtrlHevcPps::try_from((&pps, &sps)),
            Err(MalformedHeader::InvalidTileCount { kind: "row", .. })
        ));

        let pps = Pps {
            num_tile_columns: 2,
            ..tiled.clone()
        };
        assert_eq!(
            V4l2CtrlHevcPps::try_from((&pps, &sps)),
            Err(MalformedHeader::TileCountMismatch {
                kind: "column",
                len: 1,
                count: 2
            })
        );

        let pps = Pps {
            num_tile_columns: 2,
            column_width: vec![30, 0],
            ..tiled.clone()
        };
        assert_eq!(
            V4l2CtrlHevcPps::try_from((&pps, &sps)),
            Err(MalformedHeader::InvalidTileSize {
                kind: "column",
                index: 1,
                size: 0
            })
        );

        let pps = Pps {
            row_height: vec![16],
            ..tiled.clone()
        };
        assert_eq!(
            V4l2CtrlHevcPps::try_from((&pps, &sps)),
            Err(MalformedHeader::TileSpanMismatch {
                kind: "row",
                sum: 16,
                expected: 17
            })
        );

        let huge_ctbs = Sps {
            log2_diff_max_min_luma_coding_block_size: 30,
            ..sps_1080p()
        };
        assert_eq!(
            V4l2CtrlHevcPps::try_from((&tiled, &huge_ctbs)),
            Err(MalformedHeader::InvalidCtbSize {
                log2_min_cb_size: 3,
                log2_diff_max_min: 30
            })
        );
    }

    #[test]
    fn scaling_matrix_raster_order() {
        let mut lists = ScalingLists::default();
        for i in 0..6 {
            lists.scaling_list_4x4[i] = std::array::from_fn(|k| k as u8);
            lists.scaling_list_8x8[i] = std::array::from_fn(|k| k as u8);
        }
        lists.scaling_list_32x32[0] = [1; 64];
        lists.scaling_list_32x32[3] = [3; 64];
        lists.scaling_list_dc_coef_minus8_16x16 = [0, 1, 2, 3, 4, 5];
        lists.scaling_list_dc_coef_minus8_32x32 = [10, 0, 0, 20, 0, 0];

        let ctrl = V4l2CtrlHevcScalingMatrix::try_from(&lists).unwrap();

        // Up-right diagonal scan: (0,0), (0,1), (1,0), (0,2), (1,1), (2,0)...
        assert_eq!(
            ctrl.scaling_list_4x4[0],
            [0, 2, 5, 9, 1, 4, 8, 12, 3, 7, 11, 14, 6, 10, 13, 15]
        );
        assert_eq!(ctrl.scaling_list_8x8[5][0], 0);
        assert_eq!(ctrl.scaling_list_8x8[5][8], 1);
        assert_eq!(ctrl.scaling_list_8x8[5][1], 2);
        assert_eq!(ctrl.scaling_list_8x8[5][63], 63);

        assert_eq!(ctrl.scaling_list_32x32[0], [1; 64]);
        assert_eq!(ctrl.scaling_list_32x32[1], [3; 64]);
        assert_eq!(ctrl.scaling_list_dc_coef_16x16, [8, 9, 10, 11, 12, 13]);
        assert_eq!(ctrl.scaling_list_dc_coef_32x32, [18, 28]);

        let bytes = serialize(&ctrl);
        assert_eq!(bytes[992..998], [8, 9, 10, 11, 12, 13]);
        assert_eq!(bytes[998..1000], [18, 28]);
    }

    #[test]
    fn scaling_matrix_dc_out_of_range() {
        let mut lists = ScalingLists::default();
        lists.scaling_list_dc_coef_minus8_16x16[2] = -8;
        assert_eq!(
            V4l2CtrlHevcScalingMatrix::try_from(&lists),
            Err(MalformedHeader::ScalingDcOutOfRange { value: 0 })
        );

        let mut lists = ScalingLists::default();
        lists.scaling_list_dc_coef_minus8_32x32[3] = 248;
        assert_eq!(
            V4l2CtrlHevcScalingMatrix::try_from(&lists),
            Err(MalformedHeader::ScalingDcOutOfRange { value: 256 })
        );
    }

    #[test]
    fn scaling_list_selection() {
        let mut sps = Sps::default();
        let mut pps = Pps::default();
        assert!(scaling_lists_for(&sps, &pps).is_none());

        sps.scaling_list_enabled_flag = true;
        sps.scaling_list.scaling_list_4x4[0][0] = 1;
        assert_eq!(scaling_lists_for(&sps, &pps).unwrap().scaling_list_4x4[0][0], 1);

        pps.scaling_list_data_present_flag = true;
        pps.scaling_list.scaling_list_4x4[0][0] = 2;
        assert_eq!(scaling_lists_for(&sps, &pps).unwrap().scaling_list_4x4[0][0], 2);
    }

    fn weighted_header(type_: SliceType) -> SliceHeader {
        let mut pwt = PredWeightTable {
            luma_log2_weight_denom: 6,
            chroma_log2_weight_denom: 7,
            ..Default::default()
        };
        pwt.luma_weight_l0[0] = 70;
        pwt.luma_offset_l0[0] = -3;
        pwt.chroma_weight_l0[0] = [128, 120];
        pwt.chroma_offset_l0[0] = [5, -5];
        pwt.luma_weight_l0[1] = 500;
        pwt.luma_weight_l1[0] = 60;

        SliceHeader {
            type_,
            num_ref_idx_l0_active: 2,
            num_ref_idx_l1_active: 1,
            pred_weight_table: pwt,
            ..Default::default()
        }
    }

    #[test]
    fn pred_weight_table_p_slice() {
        let sps = Sps::default();
        let pps = Pps {
            weighted_pred_flag: true,
            ..Default::default()
        };

        let table = V4l2HevcPredWeightTable::from_slice_header(
            &weighted_header(SliceType::P),
            &sps,
            &pps,
        );
        assert_eq!(table.luma_log2_weight_denom, 6);
        assert_eq!(table.delta_chroma_log2_weight_denom, 1);
        assert_eq!(table.delta_luma_weight_l0[0], 6);
        assert_eq!(table.luma_offset_l0[0], -3);
        assert_eq!(table.delta_chroma_weight_l0[0], [0, -8]);
        assert_eq!(table.chroma_offset_l0[0], [5, -5]);
        // 500 - 64 does not fit the field.
        assert_eq!(table.delta_luma_weight_l0[1], i8::MAX);
        // List 1 is only used by B slices.
        assert_eq!(table.delta_luma_weight_l1[0], 0);

        let bytes = {
            let mut buf = Vec::new();
            table.write(&mut buf);
            buf
        };
        assert_eq!(bytes.len(), 196);
        assert_eq!(bytes[2] as i8, 6);
        assert_eq!(bytes[18] as i8, -3);
    }

    #[test]
    fn pred_weight_table_b_slice() {
        let sps = Sps::default();
        let hdr = weighted_header(SliceType::B);

        // weighted_pred_flag only applies to P slices.
        let pps = Pps {
            weighted_pred_flag: true,
            ..Default::default()
        };
        let table = V4l2HevcPredWeightTable::from_slice_header(&hdr, &sps, &pps);
        assert_eq!(table, V4l2HevcPredWeightTable::default());

        let pps = Pps {
            weighted_bipred_flag: true,
            ..Default::default()
        };
        let table = V4l2HevcPredWeightTable::from_slice_header(&hdr, &sps, &pps);
        assert_eq!(table.delta_luma_weight_l0[0], 6);
        assert_eq!(table.delta_luma_weight_l1[0], -4);
    }

    #[test]
    fn pred_weight_table_monochrome() {
        let sps = Sps {
            chroma_format_idc: 0,
            ..Default::default()
        };
        let pps = Pps {
            weighted_pred_flag: true,
            ..Default::default()
        };

        let table = V4l2HevcPredWeightTable::from_slice_header(
            &weighted_header(SliceType::P),
            &sps,
            &pps,
        );
        assert_eq!(table.delta_chroma_log2_weight_denom, 0);
        assert_eq!(table.delta_luma_weight_l0[0], 6);
    }

    #[test]
    fn pred_weight_table_intra_is_zeroed() {
        let pps = Pps {
            weighted_pred_flag: true,
            weighted_bipred_flag: true,
            ..Default::default()
        };

        let table = V4l2HevcPredWeightTable::from_slice_header(
            &weighted_header(SliceType::I),
            &Sps::default(),
            &pps,
        );
        assert_eq!(table, V4l2HevcPredWeightTable::default());
    }

    #[test]
    fn slice_params_from_slice() {
        let data = [0x02, 0x01, 0xd0, 0x00];
        let hdr = SliceHeader {
            type_: SliceType::P,
            num_ref_idx_l0_active: 3,
            max_num_merge_cand: 2,
            temporal_mvp_enabled_flag: false,
            collocated_ref_idx: 2,
            qp_delta: -3,
            segment_address: 120,
            header_bit_size: 37,
            entry_point_offsets: vec![10, 1, 0],
            ..Default::default()
        };
        let slice = Slice {
            nalu: NaluHeader::parse(&data).unwrap(),
            header: hdr,
            data: &data,
        };
        let mut picture = PictureData::new(NaluType::TrailR, -6, 4);
        picture.pic_struct = 1;

        let ctrl =
            V4l2CtrlHevcSliceParams::from_slice(&slice, &picture, &Sps::default(), &Pps::default());
        assert_eq!(ctrl.bit_size, 0);
        assert_eq!(ctrl.data_bit_offset, 37);
        assert_eq!(ctrl.nal_unit_type, NaluType::TrailR as u8);
        assert_eq!(ctrl.nuh_temporal_id_plus1, 1);
        assert_eq!(ctrl.slice_type, SliceType::P as u8);
        assert_eq!(ctrl.slice_pic_order_cnt, -6);
        assert_eq!(ctrl.num_ref_idx_l0_active_minus1, 2);
        assert_eq!(ctrl.num_ref_idx_l1_active_minus1, 0);
        assert_eq!(ctrl.five_minus_max_num_merge_cand, 3);
        assert_eq!(ctrl.collocated_ref_idx, 0);
        assert_eq!(ctrl.pic_struct, 1);
        assert_eq!(ctrl.num_entry_point_offsets, 3);
        assert_eq!(&ctrl.entry_point_offset_minus1[..4], &[9, 0, 0, 0]);
        assert_eq!(ctrl.num_active_dpb_entries, 0);

        let bytes = serialize(&ctrl);
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]), 37);
        assert_eq!(bytes[10], SliceType::P as u8);
        assert_eq!(LittleEndian::read_i32(&bytes[12..16]), -6);
        assert_eq!(bytes[27] as i8, -3);
        assert_eq!(LittleEndian::read_u32(&bytes[44..48]), 120);
        assert_eq!(LittleEndian::read_u32(&bytes[532..536]), 3);
        assert_eq!(LittleEndian::read_u32(&bytes[536..540]), 9);
    }

    #[test]
    fn slice_params_intra_merge_cand() {
        let data = [0x26, 0x01];
        let slice = Slice {
            nalu: NaluHeader::parse(&data).unwrap(),
            header: SliceHeader {
                max_num_merge_cand: 2,
                ..Default::default()
            },
            data: &data,
        };
        let picture = PictureData::new(NaluType::IdrWRadl, 0, 0);

        let ctrl =
            V4l2CtrlHevcSliceParams::from_slice(&slice, &picture, &Sps::default(), &Pps::default());
        assert_eq!(ctrl.slice_type, SliceType::I as u8);
        assert_eq!(ctrl.five_minus_max_num_merge_cand, 0);
    }

    #[test]
    fn slice_params_dpb_layout() {
        let mut ctrl = V4l2CtrlHevcSliceParams::default();
        let entries = (0..20)
            .map(|i| V4l2HevcDpbEntry {
                buffer_tag: i,
                rps: DpbEntryRps::StCurrAfter as u8,
                pic_order_cnt: [i as i32 * 2; 2],
                ..Default::default()
            })
            .collect::<Vec<_>>();

        ctrl.set_dpb_entries(&entries).set_num_rps_poc(3, 2, 300);
        ctrl.ref_idx_l0[0] = 7;
        ctrl.ref_idx_l1[15] = 9;
        assert_eq!(ctrl.num_active_dpb_entries, 16);
        assert_eq!(ctrl.dpb_entries().len(), 16);
        assert_eq!(ctrl.num_rps_poc_lt_curr, u8::MAX);

        let bytes = serialize(&ctrl);
        assert_eq!(bytes[38], 3);
        assert_eq!(bytes[39], 2);
        assert_eq!(bytes[41], 16);
        // Second DPB entry.
        assert_eq!(LittleEndian::read_u32(&bytes[64..68]), 1);
        assert_eq!(bytes[68], DpbEntryRps::StCurrAfter as u8);
        assert_eq!(LittleEndian::read_i32(&bytes[72..76]), 2);
        assert_eq!(LittleEndian::read_i32(&bytes[76..80]), 2);
        assert_eq!(bytes[304], 7);
        assert_eq!(bytes[335], 9);
    }

    #[test]
    fn entry_point_clamping() {
        let mut ctrl = V4l2CtrlHevcSliceParams::default();
        let offsets = (1..=300).collect::<Vec<u32>>();

        let dropped = ctrl.set_entry_point_offsets(&offsets);
        assert_eq!(dropped, 44);
        assert_eq!(ctrl.num_entry_point_offsets, 256);
        assert_eq!(ctrl.entry_point_offset_minus1[0], 0);
        assert_eq!(ctrl.entry_point_offset_minus1[255], 255);

        let dropped = ctrl.set_entry_point_offsets(&[5]);
        assert_eq!(dropped, 0);
        assert_eq!(ctrl.num_entry_point_offsets, 1);
        assert_eq!(ctrl.entry_point_offset_minus1[..2], [4, 0]);
    }
}
