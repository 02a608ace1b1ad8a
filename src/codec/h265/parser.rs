// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parsed H.265 syntax consumed by the request decoder.
//!
//! Bitstream parsing itself happens outside of this crate. The types in this module describe the
//! header state the parser hands over for every picture and slice: values are either the syntax
//! elements as coded or, where noted, the variables derived from them in ITU-T H.265.

use anyhow::anyhow;
use bitreader::BitReader;
use enumn::N;

/// Maximum number of temporal sub-layers.
pub const MAX_SUB_LAYERS: usize = 7;

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum NaluType {
    #[default]
    TrailN = 0,
    TrailR = 1,
    TsaN = 2,
    TsaR = 3,
    StsaN = 4,
    StsaR = 5,
    RadlN = 6,
    RadlR = 7,
    RaslN = 8,
    RaslR = 9,
    RsvVclN10 = 10,
    RsvVclR11 = 11,
    RsvVclN12 = 12,
    RsvVclR13 = 13,
    RsvVclN14 = 14,
    RsvVclR15 = 15,
    BlaWLp = 16,
    BlaWRadl = 17,
    BlaNLp = 18,
    IdrWRadl = 19,
    IdrNLp = 20,
    CraNut = 21,
    RsvIrapVcl22 = 22,
    RsvIrapVcl23 = 23,
    RsvVcl24 = 24,
    RsvVcl25 = 25,
    RsvVcl26 = 26,
    RsvVcl27 = 27,
    RsvVcl28 = 28,
    RsvVcl29 = 29,
    RsvVcl30 = 30,
    RsvVcl31 = 31,
    VpsNut = 32,
    SpsNut = 33,
    PpsNut = 34,
    AudNut = 35,
    EosNut = 36,
    EobNut = 37,
    FdNut = 38,
    PrefixSeiNut = 39,
    SuffixSeiNut = 40,
    RsvNvcl41 = 41,
    RsvNvcl42 = 42,
    RsvNvcl43 = 43,
    RsvNvcl44 = 44,
    RsvNvcl45 = 45,
    RsvNvcl46 = 46,
    RsvNvcl47 = 47,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NaluHeader {
    /// The NALU type.
    pub type_: NaluType,
    /// Specifies the identifier of the layer to which a VCL NAL unit belongs.
    pub nuh_layer_id: u8,
    /// Minus 1 specifies a temporal identifier for the NAL unit. The value of
    /// nuh_temporal_id_plus1 shall not be equal to 0.
    pub nuh_temporal_id_plus1: u8,
}

impl NaluHeader {
    /// Length of the header in bytes. See 7.3.1.2.
    pub const LEN: usize = 2;

    /// Reads the two-byte NAL unit header at the start of `data`.
    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let data = data
            .get(..Self::LEN)
            .ok_or_else(|| anyhow!("NAL unit too short for a header"))?;
        let mut r = BitReader::new(data);

        // Skip forbidden_zero_bit
        r.skip(1)?;

        let header = Self {
            type_: NaluType::n(r.read_u32(6)?).ok_or(anyhow!("Invalid NALU type"))?,
            nuh_layer_id: r.read_u8(6)?,
            nuh_temporal_id_plus1: r.read_u8(3)?,
        };

        if header.nuh_temporal_id_plus1 == 0 {
            return Err(anyhow!("nuh_temporal_id_plus1 shall not be 0"));
        }

        Ok(header)
    }
}

/// PCM sample parameters. Only meaningful when `pcm_enabled_flag` is set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PcmParams {
    /// Same as PcmBitDepthY.
    pub bit_depth_luma: u8,
    /// Same as PcmBitDepthC.
    pub bit_depth_chroma: u8,
    /// Same as Log2MinIpcmCbSizeY.
    pub log2_min_pcm_cb_size: u8,
    /// Same as Log2MaxIpcmCbSizeY.
    pub log2_max_pcm_cb_size: u8,
    pub loop_filter_disabled_flag: bool,
}

/// Scaling lists as coded, in up-right diagonal scan order.
///
/// The parser fills in the default lists of 7.4.5 when scaling lists are enabled without explicit
/// data, so the contents are always the effective lists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScalingLists {
    /// plus 8 specifies the value of ScalingFactor[ 2 ][ matrixId ][ 0 ][ 0 ].
    pub scaling_list_dc_coef_minus8_16x16: [i16; 6],
    /// plus 8 specifies the value of ScalingFactor[ 3 ][ matrixId ][ 0 ][ 0 ].
    /// Only matrixId 0 and 3 are used.
    pub scaling_list_dc_coef_minus8_32x32: [i16; 6],
    pub scaling_list_4x4: [[u8; 16]; 6],
    pub scaling_list_8x8: [[u8; 64]; 6],
    pub scaling_list_16x16: [[u8; 64]; 6],
    /// Only matrixId 0 and 3 are used.
    pub scaling_list_32x32: [[u8; 64]; 6],
}

impl Default for ScalingLists {
    fn default() -> Self {
        // Flat lists, i.e. what scaling_list_enabled_flag == 0 implies.
        Self {
            scaling_list_dc_coef_minus8_16x16: [8; 6],
            scaling_list_dc_coef_minus8_32x32: [8; 6],
            scaling_list_4x4: [[16; 16]; 6],
            scaling_list_8x8: [[16; 64]; 6],
            scaling_list_16x16: [[16; 64]; 6],
            scaling_list_32x32: [[16; 64]; 6],
        }
    }
}

/// A H.265 Sequence Parameter Set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sps {
    pub seq_parameter_set_id: u8,
    pub chroma_format_idc: u8,
    pub separate_colour_plane_flag: bool,
    pub pic_width_in_luma_samples: u16,
    pub pic_height_in_luma_samples: u16,
    /// Same as BitDepthY.
    pub bit_depth_luma: u8,
    /// Same as BitDepthC.
    pub bit_depth_chroma: u8,
    /// log2_max_pic_order_cnt_lsb_minus4 + 4.
    pub log2_max_pic_order_cnt_lsb: u8,
    /// sps_max_sub_layers_minus1 + 1.
    pub max_sub_layers: u8,
    /// sps_max_dec_pic_buffering_minus1 + 1, per sub-layer.
    pub max_dec_pic_buffering: [u8; MAX_SUB_LAYERS],
    pub max_num_reorder_pics: [u8; MAX_SUB_LAYERS],
    pub max_latency_increase_plus1: [u32; MAX_SUB_LAYERS],
    /// Same as MinCbLog2SizeY.
    pub log2_min_cb_size: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    /// Same as MinTbLog2SizeY.
    pub log2_min_tb_size: u8,
    /// Same as MaxTbLog2SizeY.
    pub log2_max_tb_size: u8,
    pub max_transform_hierarchy_depth_inter: u8,
    pub max_transform_hierarchy_depth_intra: u8,
    pub scaling_list_enabled_flag: bool,
    pub scaling_list: ScalingLists,
    pub amp_enabled_flag: bool,
    pub sample_adaptive_offset_enabled_flag: bool,
    pub pcm_enabled_flag: bool,
    pub pcm: PcmParams,
    pub num_short_term_ref_pic_sets: u8,
    pub long_term_ref_pics_present_flag: bool,
    pub num_long_term_ref_pics_sps: u8,
    pub temporal_mvp_enabled_flag: bool,
    pub strong_intra_smoothing_enabled_flag: bool,
}

impl Sps {
    /// Index of the highest temporal sub-layer, used to select the per-layer limits.
    pub fn highest_tid(&self) -> usize {
        usize::from(self.max_sub_layers.clamp(1, MAX_SUB_LAYERS as u8) - 1)
    }

    pub fn width(&self) -> u16 {
        self.pic_width_in_luma_samples
    }

    pub fn height(&self) -> u16 {
        self.pic_height_in_luma_samples
    }

    /// Same as CtbLog2SizeY, or `None` if it is outside of the 4..=6 range allowed by ITU-T
    /// H.265 7.4.3.2.1.
    pub fn ctb_log2_size(&self) -> Option<u8> {
        self.log2_min_cb_size
            .checked_add(self.log2_diff_max_min_luma_coding_block_size)
            .filter(|size| (4..=6).contains(size))
    }

    /// Same as PicWidthInCtbsY.
    pub fn pic_width_in_ctbs(&self) -> Option<u32> {
        let ctb_size = 1u32 << self.ctb_log2_size()?;
        Some(u32::from(self.pic_width_in_luma_samples).div_ceil(ctb_size))
    }

    /// Same as PicHeightInCtbsY.
    pub fn pic_height_in_ctbs(&self) -> Option<u32> {
        let ctb_size = 1u32 << self.ctb_log2_size()?;
        Some(u32::from(self.pic_height_in_luma_samples).div_ceil(ctb_size))
    }

    /// Number of pictures the DPB must be able to hold for this sequence.
    pub fn max_dpb_size(&self) -> usize {
        usize::from(self.max_dec_pic_buffering[self.highest_tid()])
    }
}

impl Default for Sps {
    fn default() -> Self {
        Self {
            seq_parameter_set_id: 0,
            chroma_format_idc: 1,
            separate_colour_plane_flag: false,
            pic_width_in_luma_samples: 0,
            pic_height_in_luma_samples: 0,
            bit_depth_luma: 8,
            bit_depth_chroma: 8,
            log2_max_pic_order_cnt_lsb: 4,
            max_sub_layers: 1,
            max_dec_pic_buffering: [1; MAX_SUB_LAYERS],
            max_num_reorder_pics: [0; MAX_SUB_LAYERS],
            max_latency_increase_plus1: [0; MAX_SUB_LAYERS],
            log2_min_cb_size: 3,
            log2_diff_max_min_luma_coding_block_size: 0,
            log2_min_tb_size: 2,
            log2_max_tb_size: 2,
            max_transform_hierarchy_depth_inter: 0,
            max_transform_hierarchy_depth_intra: 0,
            scaling_list_enabled_flag: false,
            scaling_list: Default::default(),
            amp_enabled_flag: false,
            sample_adaptive_offset_enabled_flag: false,
            pcm_enabled_flag: false,
            pcm: Default::default(),
            num_short_term_ref_pic_sets: 0,
            long_term_ref_pics_present_flag: false,
            num_long_term_ref_pics_sps: 0,
            temporal_mvp_enabled_flag: false,
            strong_intra_smoothing_enabled_flag: false,
        }
    }
}

/// A H.265 Picture Parameter Set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pps {
    pub pic_parameter_set_id: u8,
    pub seq_parameter_set_id: u8,
    pub dependent_slice_segments_enabled_flag: bool,
    pub output_flag_present_flag: bool,
    pub num_extra_slice_header_bits: u8,
    pub sign_data_hiding_enabled_flag: bool,
    pub cabac_init_present_flag: bool,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub init_qp_minus26: i8,
    pub constrained_intra_pred_flag: bool,
    pub transform_skip_enabled_flag: bool,
    pub cu_qp_delta_enabled_flag: bool,
    pub diff_cu_qp_delta_depth: u8,
    pub cb_qp_offset: i8,
    pub cr_qp_offset: i8,
    pub slice_chroma_qp_offsets_present_flag: bool,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_flag: bool,
    pub transquant_bypass_enabled_flag: bool,
    pub tiles_enabled_flag: bool,
    pub entropy_coding_sync_enabled_flag: bool,
    /// num_tile_columns_minus1 + 1.
    pub num_tile_columns: u32,
    /// num_tile_rows_minus1 + 1.
    pub num_tile_rows: u32,
    /// Width of each tile column in CTBs, as derived by 6.5.1.
    pub column_width: Vec<u32>,
    /// Height of each tile row in CTBs, as derived by 6.5.1.
    pub row_height: Vec<u32>,
    pub loop_filter_across_tiles_enabled_flag: bool,
    pub loop_filter_across_slices_enabled_flag: bool,
    pub deblocking_filter_override_enabled_flag: bool,
    pub deblocking_filter_disabled_flag: bool,
    pub beta_offset_div2: i8,
    pub tc_offset_div2: i8,
    pub scaling_list_data_present_flag: bool,
    pub scaling_list: ScalingLists,
    pub lists_modification_present_flag: bool,
    /// log2_parallel_merge_level_minus2 + 2.
    pub log2_parallel_merge_level: u8,
    pub slice_segment_header_extension_present_flag: bool,
}

impl Default for Pps {
    fn default() -> Self {
        Self {
            pic_parameter_set_id: 0,
            seq_parameter_set_id: 0,
            dependent_slice_segments_enabled_flag: false,
            output_flag_present_flag: false,
            num_extra_slice_header_bits: 0,
            sign_data_hiding_enabled_flag: false,
            cabac_init_present_flag: false,
            num_ref_idx_l0_default_active_minus1: 0,
            num_ref_idx_l1_default_active_minus1: 0,
            init_qp_minus26: 0,
            constrained_intra_pred_flag: false,
            transform_skip_enabled_flag: false,
            cu_qp_delta_enabled_flag: false,
            diff_cu_qp_delta_depth: 0,
            cb_qp_offset: 0,
            cr_qp_offset: 0,
            slice_chroma_qp_offsets_present_flag: false,
            weighted_pred_flag: false,
            weighted_bipred_flag: false,
            transquant_bypass_enabled_flag: false,
            tiles_enabled_flag: false,
            entropy_coding_sync_enabled_flag: false,
            num_tile_columns: 1,
            num_tile_rows: 1,
            column_width: vec![],
            row_height: vec![],
            loop_filter_across_tiles_enabled_flag: true,
            loop_filter_across_slices_enabled_flag: false,
            deblocking_filter_override_enabled_flag: false,
            deblocking_filter_disabled_flag: false,
            beta_offset_div2: 0,
            tc_offset_div2: 0,
            scaling_list_data_present_flag: false,
            scaling_list: Default::default(),
            lists_modification_present_flag: false,
            log2_parallel_merge_level: 2,
            slice_segment_header_extension_present_flag: false,
        }
    }
}

/// Explicit weighted prediction parameters of a slice.
///
/// Unlike the coded pred_weight_table(), weights and chroma offsets are the derived variables
/// (LumaWeightL0, ChromaWeightL0, ChromaOffsetL0...), with the implied defaults already filled in
/// for entries whose flags are not set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredWeightTable {
    pub luma_log2_weight_denom: u8,
    /// Same as ChromaLog2WeightDenom.
    pub chroma_log2_weight_denom: u8,

    pub luma_weight_l0: [i16; 15],
    pub luma_offset_l0: [i16; 15],
    pub chroma_weight_l0: [[i16; 2]; 15],
    pub chroma_offset_l0: [[i16; 2]; 15],

    pub luma_weight_l1: [i16; 15],
    pub luma_offset_l1: [i16; 15],
    pub chroma_weight_l1: [[i16; 2]; 15],
    pub chroma_offset_l1: [[i16; 2]; 15],
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
/// See table 7-7 in ITU-T H.265.
pub enum SliceType {
    B = 0,
    #[default]
    P = 1,
    I = 2,
}

impl SliceType {
    /// Whether this is a P slice. See table 7-7 in ITU-T H.265.
    pub fn is_p(&self) -> bool {
        matches!(self, SliceType::P)
    }

    /// Whether this is a B slice. See table 7-7 in ITU-T H.265.
    pub fn is_b(&self) -> bool {
        matches!(self, SliceType::B)
    }

    /// Whether this is an I slice. See table 7-7 in ITU-T H.265.
    pub fn is_i(&self) -> bool {
        matches!(self, SliceType::I)
    }
}

/// A slice segment header, with dependent segments already completed from the last independent
/// one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceHeader {
    pub first_slice_segment_in_pic_flag: bool,
    pub dependent_slice_segment_flag: bool,
    pub segment_address: u32,
    pub type_: SliceType,
    pub colour_plane_id: u8,
    pub sao_luma_flag: bool,
    pub sao_chroma_flag: bool,
    pub temporal_mvp_enabled_flag: bool,
    /// num_ref_idx_l0_active_minus1 + 1, or 0 for I slices.
    pub num_ref_idx_l0_active: u8,
    /// num_ref_idx_l1_active_minus1 + 1, or 0 for I and P slices.
    pub num_ref_idx_l1_active: u8,
    pub mvd_l1_zero_flag: bool,
    pub cabac_init_flag: bool,
    pub collocated_from_l0_flag: bool,
    pub collocated_ref_idx: u8,
    /// Same as MaxNumMergeCand.
    pub max_num_merge_cand: u8,
    pub qp_delta: i8,
    pub cb_qp_offset: i8,
    pub cr_qp_offset: i8,
    pub deblocking_filter_disabled_flag: bool,
    pub beta_offset_div2: i8,
    pub tc_offset_div2: i8,
    pub loop_filter_across_slices_enabled_flag: bool,
    pub pred_weight_table: PredWeightTable,
    /// entry_point_offset_minus1[ i ] + 1, i.e. the actual offsets in bytes.
    pub entry_point_offsets: Vec<u32>,
    /// Number of bits from the start of the NAL unit to the first bit of the slice data.
    pub header_bit_size: u32,
}

impl Default for SliceHeader {
    fn default() -> Self {
        Self {
            first_slice_segment_in_pic_flag: true,
            dependent_slice_segment_flag: false,
            segment_address: 0,
            type_: SliceType::I,
            colour_plane_id: 0,
            sao_luma_flag: false,
            sao_chroma_flag: false,
            temporal_mvp_enabled_flag: false,
            num_ref_idx_l0_active: 0,
            num_ref_idx_l1_active: 0,
            mvd_l1_zero_flag: false,
            cabac_init_flag: false,
            collocated_from_l0_flag: true,
            collocated_ref_idx: 0,
            max_num_merge_cand: 5,
            qp_delta: 0,
            cb_qp_offset: 0,
            cr_qp_offset: 0,
            deblocking_filter_disabled_flag: false,
            beta_offset_div2: 0,
            tc_offset_div2: 0,
            loop_filter_across_slices_enabled_flag: false,
            pred_weight_table: Default::default(),
            entry_point_offsets: vec![],
            header_bit_size: 0,
        }
    }
}

/// A slice segment as handed over by the parser.
#[derive(Clone, Debug)]
pub struct Slice<'a> {
    /// The NAL unit header of the slice segment.
    pub nalu: NaluHeader,
    /// The parsed slice segment header.
    pub header: SliceHeader,
    /// The whole NAL unit, without start code.
    pub data: &'a [u8],
}
