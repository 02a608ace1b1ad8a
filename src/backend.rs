// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hardware submission channel.
//!
//! A sink is whatever ends up handing requests to the decoding hardware, most likely a V4L2
//! stateless decoder device. The request decoders only rely on the [`RequestSink`] trait, so the
//! actual device plumbing can live outside of this crate.

pub mod dummy;

use crate::decoder::StreamInfo;
use crate::device::v4l2::stateless::controls::ExtControl;

/// A decode job: the controls and bitstream data to decode into one CAPTURE buffer.
#[derive(Debug)]
pub struct DecodeRequest<'a> {
    /// Identifies the CAPTURE buffer to decode into: the buffer tag for H.265, the timestamp for
    /// MPEG-2.
    pub capture_id: u64,
    /// Serialized controls, in the order they must be set.
    pub controls: &'a [ExtControl],
    /// Bitstream data for the OUTPUT buffer.
    pub bitstream: &'a [u8],
}

impl DecodeRequest<'_> {
    /// Returns the control with id `id`, if it is part of the request.
    pub fn control(&self, id: u32) -> Option<&ExtControl> {
        self.controls.iter().find(|c| c.id == id)
    }
}

/// Receives the decode requests built by a request decoder.
///
/// Calls are blocking and processed in order. Errors are reported back to the caller of the
/// decoder operation that triggered them, without retry.
pub trait RequestSink {
    /// Called before the first request of a stream and whenever the coded format or resolution
    /// changes.
    fn set_format(&mut self, stream_info: &StreamInfo) -> anyhow::Result<()>;

    /// Queues a decode request to the hardware.
    fn queue_request(&mut self, request: &DecodeRequest<'_>) -> anyhow::Result<()>;
}

impl<S: RequestSink + ?Sized> RequestSink for Box<S> {
    fn set_format(&mut self, stream_info: &StreamInfo) -> anyhow::Result<()> {
        self.as_mut().set_format(stream_info)
    }

    fn queue_request(&mut self, request: &DecodeRequest<'_>) -> anyhow::Result<()> {
        self.as_mut().queue_request(request)
    }
}
