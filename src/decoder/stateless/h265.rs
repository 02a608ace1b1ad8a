// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod v4l2;

use std::rc::Rc;

use bytes::BufMut;
use bytes::BytesMut;

use crate::backend::RequestSink;
use crate::codec::h265::dpb::Dpb;
use crate::codec::h265::dpb::RefPicSet;
use crate::codec::h265::parser::Pps;
use crate::codec::h265::parser::Slice;
use crate::codec::h265::parser::Sps;
use crate::codec::h265::picture::RcPictureData;
use crate::decoder::stateless::h265::v4l2::build_slice_params;
use crate::decoder::stateless::DecodeMode;
use crate::decoder::stateless::Diagnostic;
use crate::decoder::stateless::PictureState;
use crate::decoder::stateless::RequestDecoder;
use crate::decoder::stateless::RequestError;
use crate::decoder::stateless::RequestResult;
use crate::decoder::stateless::StatelessCodec;
use crate::decoder::StreamInfo;
use crate::device::v4l2::stateless::controls::h265::scaling_lists_for;
use crate::device::v4l2::stateless::controls::h265::V4l2CtrlHevcPps;
use crate::device::v4l2::stateless::controls::h265::V4l2CtrlHevcScalingMatrix;
use crate::device::v4l2::stateless::controls::h265::V4l2CtrlHevcSliceParams;
use crate::device::v4l2::stateless::controls::h265::V4l2CtrlHevcSps;
use crate::device::v4l2::stateless::controls::ControlRecord;
use crate::device::v4l2::stateless::controls::ExtControl;
use crate::device::v4l2::stateless::controls::MalformedHeader;
use crate::Fourcc;
use crate::Resolution;

impl From<&Sps> for StreamInfo {
    fn from(sps: &Sps) -> Self {
        StreamInfo {
            coded_format: H265::CODED_FORMAT,
            coded_resolution: Resolution {
                width: sps.width().into(),
                height: sps.height().into(),
            },
            // One extra buffer for the picture being decoded.
            min_num_frames: sps.max_dpb_size() + 1,
        }
    }
}

/// Serialized SPS, PPS and scaling matrix controls, along with the parameter sets they were
/// derived from.
struct ParameterControls {
    sps: Rc<Sps>,
    pps: Rc<Pps>,
    controls: Vec<ExtControl>,
}

impl ParameterControls {
    fn new(sps: &Rc<Sps>, pps: &Rc<Pps>) -> Result<Self, MalformedHeader> {
        let mut controls = vec![
            V4l2CtrlHevcSps::from(sps.as_ref()).to_ext_control(),
            V4l2CtrlHevcPps::try_from((pps.as_ref(), sps.as_ref()))?.to_ext_control(),
        ];

        if let Some(scaling_lists) = scaling_lists_for(sps, pps) {
            controls.push(V4l2CtrlHevcScalingMatrix::try_from(scaling_lists)?.to_ext_control());
        }

        Ok(Self {
            sps: Rc::clone(sps),
            pps: Rc::clone(pps),
            controls,
        })
    }

    fn matches(&self, sps: &Rc<Sps>, pps: &Rc<Pps>) -> bool {
        let same_sps = Rc::ptr_eq(&self.sps, sps) || self.sps == *sps;
        let same_pps = Rc::ptr_eq(&self.pps, pps) || self.pps == *pps;

        same_sps && same_pps
    }
}

/// State of the H.265 request decoder that persists across pictures.
#[derive(Default)]
pub struct H265DecoderState {
    /// Controls of the parameter sets used by the last picture.
    active: Option<ParameterControls>,
}

/// A picture being assembled, created by `begin_picture` and owned by the caller until
/// `end_picture` or `abort_picture`.
pub struct H265Picture {
    pic: RcPictureData,
    sps: Rc<Sps>,
    pps: Rc<Pps>,
    /// SPS, PPS and optional scaling matrix, attached to every request of the picture.
    param_controls: Vec<ExtControl>,
    /// Slice parameters of the next request.
    slice_params: Box<V4l2CtrlHevcSliceParams>,
    /// Slice data of the next request.
    bitstream: BytesMut,
    state: PictureState,
    num_requests: usize,
    diagnostics: Vec<Diagnostic>,
}

impl H265Picture {
    pub fn picture(&self) -> &RcPictureData {
        &self.pic
    }

    pub fn state(&self) -> PictureState {
        self.state
    }

    /// Slice parameters of the request being assembled, or of the last queued one.
    pub fn slice_params(&self) -> &V4l2CtrlHevcSliceParams {
        &self.slice_params
    }

    /// Data that has not been queued yet.
    pub fn pending_data(&self) -> &[u8] {
        &self.bitstream
    }

    /// Number of requests queued for this picture.
    pub fn num_requests(&self) -> usize {
        self.num_requests
    }

    /// Non-fatal conditions met while assembling the picture.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

/// Marker type for the H.265 request decoder.
pub struct H265;

impl StatelessCodec for H265 {
    const CODED_FORMAT: Fourcc = Fourcc::new(b"S265");
    type DecoderState = H265DecoderState;
}

/// Size in bits of `len` bytes of slice data, if it fits the `bit_size` field.
fn bit_size(len: usize) -> Option<u32> {
    len.checked_mul(8).and_then(|bits| u32::try_from(bits).ok())
}

impl<S> RequestDecoder<H265, S>
where
    S: RequestSink,
{
    /// Starts assembling `picture`, coded with the parameter sets `sps` and `pps`.
    ///
    /// The parameter set controls are only rebuilt when `sps` or `pps` differ from the ones of the
    /// previous picture, and the sink is told about the new stream format when it changed. A
    /// `MalformedHeader` error only affects this picture.
    pub fn begin_picture(
        &mut self,
        sps: &Rc<Sps>,
        pps: &Rc<Pps>,
        picture: &RcPictureData,
    ) -> RequestResult<H265Picture> {
        let param_controls = match &self.codec.active {
            Some(active) if active.matches(sps, pps) => active.controls.clone(),
            _ => {
                log::debug!(
                    "building controls for SPS {} / PPS {}",
                    sps.seq_parameter_set_id,
                    pps.pic_parameter_set_id
                );
                let active = ParameterControls::new(sps, pps)?;
                let controls = active.controls.clone();
                self.codec.active = Some(active);
                controls
            }
        };

        self.update_stream_info(StreamInfo::from(sps.as_ref()))?;

        log::debug!(
            "begin picture POC {} (tag {})",
            picture.borrow().pic_order_cnt_val,
            picture.borrow().buffer_tag
        );

        Ok(H265Picture {
            pic: Rc::clone(picture),
            sps: Rc::clone(sps),
            pps: Rc::clone(pps),
            param_controls,
            slice_params: Default::default(),
            bitstream: BytesMut::new(),
            state: PictureState::Empty,
            num_requests: 0,
            diagnostics: vec![],
        })
    }

    /// Adds `slice` to `picture`.
    ///
    /// `dpb` holds the pictures decoded so far, `rps` and the reference picture lists are the ones
    /// derived for this slice. In slice-based mode, the data of the previous slice is queued
    /// first.
    pub fn decode_slice(
        &mut self,
        picture: &mut H265Picture,
        slice: &Slice,
        dpb: &Dpb,
        rps: &RefPicSet,
        ref_pic_list0: &[Option<RcPictureData>],
        ref_pic_list1: &[Option<RcPictureData>],
    ) -> RequestResult<()> {
        if picture.state == PictureState::Submitted {
            return Err(RequestError::InvalidState {
                operation: "decode a slice",
                state: picture.state,
            });
        }

        let build_params = match self.config.decode_mode {
            DecodeMode::SliceBased => {
                if !picture.bitstream.is_empty() {
                    self.flush(picture)?;
                }
                true
            }
            DecodeMode::FrameBased => picture.state == PictureState::Empty,
        };

        let start_code = self.config.start_code.bytes();

        if build_params {
            let mut params = build_slice_params(
                slice,
                &picture.pic,
                &picture.sps,
                &picture.pps,
                dpb,
                rps,
                ref_pic_list0,
                ref_pic_list1,
                &mut picture.diagnostics,
            );
            params.data_bit_offset += (start_code.len() * 8) as u32;
            *picture.slice_params = params;
        }

        picture.bitstream.put_slice(start_code);
        picture.bitstream.put_slice(slice.data);
        picture.state = PictureState::Accumulating;

        Ok(())
    }

    /// Queues the pending data of `picture`. No slice can be added afterwards.
    pub fn end_picture(&mut self, picture: &mut H265Picture) -> RequestResult<()> {
        if picture.state != PictureState::Accumulating {
            return Err(RequestError::InvalidState {
                operation: "end the picture",
                state: picture.state,
            });
        }

        self.flush(picture)?;
        picture.state = PictureState::Submitted;

        log::debug!(
            "end picture POC {}: {} request(s)",
            picture.pic.borrow().pic_order_cnt_val,
            picture.num_requests
        );

        Ok(())
    }

    /// Drops `picture`. Requests already queued for it are not recalled.
    pub fn abort_picture(&mut self, picture: H265Picture) {
        log::debug!(
            "aborting picture POC {} in state {:?}, {} byte(s) discarded",
            picture.pic.borrow().pic_order_cnt_val,
            picture.state,
            picture.bitstream.len()
        );
    }

    /// Queues a request with the pending data of `picture`. The data is only cleared if the sink
    /// accepted the request.
    fn flush(&mut self, picture: &mut H265Picture) -> RequestResult<()> {
        let len = picture.bitstream.len();
        picture.slice_params.bit_size =
            bit_size(len).ok_or(RequestError::BitstreamTooLarge { len })?;

        let mut controls = Vec::with_capacity(picture.param_controls.len() + 1);
        controls.extend_from_slice(&picture.param_controls);
        controls.push(picture.slice_params.to_ext_control());

        let capture_id = u64::from(picture.pic.borrow().buffer_tag);
        self.queue_request(capture_id, &controls, &picture.bitstream)?;

        picture.bitstream.clear();
        picture.num_requests += 1;

        Ok(())
    }
}
