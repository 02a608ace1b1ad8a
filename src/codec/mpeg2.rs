// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parsed MPEG-2 video headers, as handed over by the bitstream parser.

use enumn::N;

/// Default intra quantiser matrix, in zigzag scan order. See 6.3.11.
pub const DEFAULT_INTRA_QUANTISER_MATRIX: [u8; 64] = [
    8, 16, 16, 19, 16, 19, 22, 22, 22, 22, 22, 22, 26, 24, 26, 27, 27, 27, 26, 26, 26, 26, 27, 27,
    27, 29, 29, 29, 34, 34, 34, 29, 29, 29, 27, 27, 29, 29, 32, 32, 34, 34, 37, 38, 37, 35, 35, 34,
    35, 38, 38, 40, 40, 40, 48, 48, 46, 46, 56, 56, 58, 69, 69, 83,
];

/// Default non-intra quantiser matrix. See 6.3.11.
pub const DEFAULT_NON_INTRA_QUANTISER_MATRIX: [u8; 64] = [16; 64];

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PictureCodingType {
    #[default]
    I = 1,
    P = 2,
    B = 3,
    D = 4,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PictureStructure {
    TopField = 1,
    BottomField = 2,
    #[default]
    Frame = 3,
}

/// Sequence header and sequence extension values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SequenceHeader {
    /// horizontal_size_value combined with horizontal_size_extension.
    pub horizontal_size: u16,
    /// vertical_size_value combined with vertical_size_extension.
    pub vertical_size: u16,
    /// vbv_buffer_size_value combined with vbv_buffer_size_extension.
    pub vbv_buffer_size: u32,
    pub profile_and_level_indication: u8,
    pub chroma_format: u8,
    pub progressive_sequence: bool,
}

/// Picture header and picture coding extension values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PictureHeader {
    pub picture_coding_type: PictureCodingType,
    pub f_code: [[u8; 2]; 2],
    pub intra_dc_precision: u8,
    pub picture_structure: PictureStructure,
    pub top_field_first: bool,
    pub frame_pred_frame_dct: bool,
    pub concealment_motion_vectors: bool,
    pub q_scale_type: bool,
    pub intra_vlc_format: bool,
    pub alternate_scan: bool,
    pub repeat_first_field: bool,
    pub progressive_frame: bool,
}

/// Matrices loaded by a quant matrix extension or sequence header, in zigzag scan order. `None`
/// means the matrix was not loaded and the default applies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuantMatrixExtension {
    pub intra_quantiser_matrix: Option<[u8; 64]>,
    pub non_intra_quantiser_matrix: Option<[u8; 64]>,
    pub chroma_intra_quantiser_matrix: Option<[u8; 64]>,
    pub chroma_non_intra_quantiser_matrix: Option<[u8; 64]>,
}

impl QuantMatrixExtension {
    /// Whether any matrix was explicitly loaded.
    pub fn any_loaded(&self) -> bool {
        self.intra_quantiser_matrix.is_some()
            || self.non_intra_quantiser_matrix.is_some()
            || self.chroma_intra_quantiser_matrix.is_some()
            || self.chroma_non_intra_quantiser_matrix.is_some()
    }
}

/// Values of the first slice of the picture needed by the hardware.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceHeader {
    pub quantiser_scale_code: u8,
}
