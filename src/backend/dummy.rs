// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy sink whose only purpose is to let the decoders
//! run so we can test them in isolation.
//!
//! Requests are recorded instead of being sent to hardware, and the sink can be told to fail
//! after a given number of requests.

use anyhow::anyhow;
use byteorder::ByteOrder;
use byteorder::LittleEndian;

use crate::backend::DecodeRequest;
use crate::backend::RequestSink;
use crate::decoder::StreamInfo;
use crate::device::v4l2::stateless::controls::ExtControl;

/// A request as seen by the [`DummySink`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub capture_id: u64,
    pub controls: Vec<ExtControl>,
    pub bitstream: Vec<u8>,
    /// CRC32 of the control payloads followed by the bitstream.
    pub crc: u32,
}

impl RecordedRequest {
    fn new(request: &DecodeRequest<'_>) -> Self {
        let mut hasher = crc32fast::Hasher::new();
        for control in request.controls {
            hasher.update(&control.payload);
        }
        hasher.update(request.bitstream);

        Self {
            capture_id: request.capture_id,
            controls: request.controls.to_vec(),
            bitstream: request.bitstream.to_vec(),
            crc: hasher.finalize(),
        }
    }

    pub fn control(&self, id: u32) -> Option<&ExtControl> {
        self.controls.iter().find(|c| c.id == id)
    }

    /// Ids of the attached controls, in order.
    pub fn control_ids(&self) -> Vec<u32> {
        self.controls.iter().map(|c| c.id).collect()
    }

    /// Reads a little-endian `u32` at `offset` in the payload of control `id`.
    pub fn read_u32(&self, id: u32, offset: usize) -> Option<u32> {
        let payload = &self.control(id)?.payload;
        payload.get(offset..offset + 4).map(LittleEndian::read_u32)
    }

    /// Reads a little-endian `i32` at `offset` in the payload of control `id`.
    pub fn read_i32(&self, id: u32, offset: usize) -> Option<i32> {
        let payload = &self.control(id)?.payload;
        payload.get(offset..offset + 4).map(LittleEndian::read_i32)
    }

    /// Reads the byte at `offset` in the payload of control `id`.
    pub fn read_u8(&self, id: u32, offset: usize) -> Option<u8> {
        self.control(id)?.payload.get(offset).copied()
    }
}

/// Sink recording every request it receives.
#[derive(Debug, Default)]
pub struct DummySink {
    /// Requests received so far.
    pub requests: Vec<RecordedRequest>,
    /// Formats received so far.
    pub formats: Vec<StreamInfo>,
    /// Number of requests to accept before failing, if any.
    fail_after: Option<usize>,
}

impl DummySink {
    pub fn new() -> Self {
        Default::default()
    }

    /// Makes the sink reject every request once `num_requests` have been accepted.
    pub fn fail_after(mut self, num_requests: usize) -> Self {
        self.fail_after = Some(num_requests);
        self
    }
}

impl RequestSink for DummySink {
    fn set_format(&mut self, stream_info: &StreamInfo) -> anyhow::Result<()> {
        self.formats.push(*stream_info);
        Ok(())
    }

    fn queue_request(&mut self, request: &DecodeRequest<'_>) -> anyhow::Result<()> {
        if matches!(self.fail_after, Some(n) if self.requests.len() >= n) {
            return Err(anyhow!(
                "dummy sink refused request for capture {}",
                request.capture_id
            ));
        }

        let recorded = RecordedRequest::new(request);
        log::debug!(
            "recorded request for capture {}: crc {:#010x}",
            recorded.capture_id,
            recorded.crc
        );
        self.requests.push(recorded);

        Ok(())
    }
}
