// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::backend::RequestSink;
use crate::codec::mpeg2::PictureCodingType;
use crate::codec::mpeg2::PictureHeader;
use crate::codec::mpeg2::QuantMatrixExtension;
use crate::codec::mpeg2::SequenceHeader;
use crate::codec::mpeg2::SliceHeader;
use crate::decoder::stateless::PictureState;
use crate::decoder::stateless::RequestDecoder;
use crate::decoder::stateless::RequestError;
use crate::decoder::stateless::RequestResult;
use crate::decoder::stateless::StatelessCodec;
use crate::decoder::StreamInfo;
use crate::device::v4l2::stateless::controls::mpeg2::V4l2CtrlMpeg2Picture;
use crate::device::v4l2::stateless::controls::mpeg2::V4l2CtrlMpeg2Quantization;
use crate::device::v4l2::stateless::controls::mpeg2::V4l2CtrlMpeg2Sequence;
use crate::device::v4l2::stateless::controls::mpeg2::V4l2CtrlMpeg2SliceParams;
use crate::device::v4l2::stateless::controls::ControlRecord;
use crate::device::v4l2::stateless::controls::ExtControl;
use crate::Fourcc;
use crate::Resolution;

/// Size of a macroblock, in luma samples.
const MB_SIZE: u32 = 16;

impl From<&SequenceHeader> for StreamInfo {
    fn from(seq: &SequenceHeader) -> Self {
        StreamInfo {
            coded_format: Mpeg2::CODED_FORMAT,
            coded_resolution: Resolution {
                width: u32::from(seq.horizontal_size).next_multiple_of(MB_SIZE),
                height: u32::from(seq.vertical_size).next_multiple_of(MB_SIZE),
            },
            // Forward and backward references, plus the picture being decoded.
            min_num_frames: 3,
        }
    }
}

#[derive(Default)]
pub struct Mpeg2DecoderState {
    /// Last sequence header and its control.
    sequence: Option<(SequenceHeader, ExtControl)>,
}

/// Everything needed to decode one MPEG-2 picture.
#[derive(Debug)]
pub struct Mpeg2Picture<'a> {
    /// Timestamp of the CAPTURE buffer to decode into.
    pub timestamp: u64,
    pub header: &'a PictureHeader,
    /// Quantization matrices, if the picture comes with a quant matrix extension.
    pub quant: Option<&'a QuantMatrixExtension>,
    pub slice: &'a SliceHeader,
    /// Timestamp of the forward reference, for P and B pictures.
    pub forward_ref_ts: Option<u64>,
    /// Timestamp of the backward reference, for B pictures.
    pub backward_ref_ts: Option<u64>,
    /// All the slices of the picture, start codes included.
    pub data: &'a [u8],
}

/// Marker type for the MPEG-2 request decoder.
pub struct Mpeg2;

impl StatelessCodec for Mpeg2 {
    const CODED_FORMAT: Fourcc = Fourcc::new(b"MG2S");
    type DecoderState = Mpeg2DecoderState;
}

fn reference_ts(picture: &Mpeg2Picture, which: &str, ts: Option<u64>, needed: bool) -> u64 {
    match ts {
        Some(ts) => ts,
        None => {
            if needed {
                log::warn!(
                    "{:?} picture {} has no {} reference",
                    picture.header.picture_coding_type,
                    picture.timestamp,
                    which
                );
            }
            0
        }
    }
}

impl<S> RequestDecoder<Mpeg2, S>
where
    S: RequestSink,
{
    /// Queues a single request decoding `picture`, which belongs to the sequence `seq`.
    pub fn decode_picture(
        &mut self,
        seq: &SequenceHeader,
        picture: &Mpeg2Picture,
    ) -> RequestResult<()> {
        if picture.data.is_empty() {
            return Err(RequestError::InvalidState {
                operation: "decode a picture without data",
                state: PictureState::Empty,
            });
        }

        let seq_control = match &self.codec.sequence {
            Some((cached, control)) if cached == seq => control.clone(),
            _ => {
                let control = V4l2CtrlMpeg2Sequence::from(seq).to_ext_control();
                self.codec.sequence = Some((seq.clone(), control.clone()));
                control
            }
        };

        self.update_stream_info(StreamInfo::from(seq))?;

        let coding_type = picture.header.picture_coding_type;
        let slice_params = V4l2CtrlMpeg2SliceParams {
            forward_ref_ts: reference_ts(
                picture,
                "forward",
                picture.forward_ref_ts,
                matches!(coding_type, PictureCodingType::P | PictureCodingType::B),
            ),
            backward_ref_ts: reference_ts(
                picture,
                "backward",
                picture.backward_ref_ts,
                coding_type == PictureCodingType::B,
            ),
            quantiser_scale_code: u32::from(picture.slice.quantiser_scale_code),
            reserved: 0,
        };

        let mut controls = vec![
            seq_control,
            V4l2CtrlMpeg2Picture::new(picture.header, picture.quant).to_ext_control(),
            slice_params.to_ext_control(),
        ];
        if let Some(quant) = picture.quant.filter(|q| q.any_loaded()) {
            controls.push(V4l2CtrlMpeg2Quantization::from(quant).to_ext_control());
        }

        self.queue_request(picture.timestamp, &controls, picture.data)
    }
}
