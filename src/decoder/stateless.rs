// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Stateless request decoders.
//!
//! A request decoder turns parsed headers into decode requests for a [`RequestSink`]. It does not
//! parse the bitstream, manage the DPB or allocate buffers: the caller drives it picture by
//! picture with the state its parser produced.
//!
//! The codec-specific operations are implemented on [`RequestDecoder`] for each type implementing
//! [`StatelessCodec`].

pub mod h265;
pub mod mpeg2;

use std::str::FromStr;

use thiserror::Error;

use crate::backend::DecodeRequest;
use crate::backend::RequestSink;
use crate::decoder::StreamInfo;
use crate::device::v4l2::stateless::controls::ExtControl;
use crate::device::v4l2::stateless::controls::MalformedHeader;
use crate::Fourcc;

/// How slices are grouped into decode requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeMode {
    /// One request per slice.
    #[default]
    SliceBased,
    /// One request per picture, with all slices concatenated.
    FrameBased,
}

impl FromStr for DecodeMode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slice" | "slice-based" => Ok(DecodeMode::SliceBased),
            "frame" | "frame-based" => Ok(DecodeMode::FrameBased),
            _ => Err("unrecognized decode mode. Valid values: slice, frame"),
        }
    }
}

/// Whether slices are prefixed with a start code in the OUTPUT buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartCode {
    #[default]
    None,
    AnnexB,
}

impl StartCode {
    /// Bytes to insert before each slice.
    pub fn bytes(&self) -> &'static [u8] {
        match self {
            StartCode::None => &[],
            StartCode::AnnexB => &[0x00, 0x00, 0x01],
        }
    }
}

impl FromStr for StartCode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(StartCode::None),
            "annexb" | "annex-b" => Ok(StartCode::AnnexB),
            _ => Err("unrecognized start code. Valid values: none, annexb"),
        }
    }
}

/// Options the sink's driver dictates for the whole session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestDecoderConfig {
    pub decode_mode: DecodeMode,
    pub start_code: StartCode,
}

/// Lifecycle of a picture being assembled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PictureState {
    /// No slice received yet.
    #[default]
    Empty,
    /// At least one slice received, data may be pending.
    Accumulating,
    /// The last request of the picture has been queued.
    Submitted,
}

/// Non-fatal conditions met while assembling a picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The slice has more entry points than the control can hold. The excess was dropped.
    EntryPointOverflow { count: usize, max: usize },
    /// Entry `index` of reference list `list` has no matching DPB entry and was mapped to index 0.
    ReferenceNotFound { list: u8, index: usize },
}

/// Error returned by the request decoder operations.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    MalformedHeader(#[from] MalformedHeader),
    /// The sink failed to queue a request. Data of the failed request is kept in the picture.
    #[error(transparent)]
    SinkSubmitFailure(anyhow::Error),
    /// The sink rejected the stream format.
    #[error(transparent)]
    SinkFormatFailure(anyhow::Error),
    /// The pending data is too large for its size in bits to fit the slice parameters.
    #[error("{len} bytes of slice data cannot be described in a single request")]
    BitstreamTooLarge { len: usize },
    #[error("cannot {operation} in picture state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: PictureState,
    },
}

pub type RequestResult<T> = Result<T, RequestError>;

pub trait StatelessCodec {
    /// Coded format of the OUTPUT queue.
    const CODED_FORMAT: Fourcc;
    /// State that needs to be kept between pictures.
    type DecoderState: Default;
}

/// A decoder that assembles decode requests for a stateless codec.
///
/// A request decoder is defined by two generic parameters: the codec, represented by a type
/// implementing [`StatelessCodec`], and the sink requests are sent to. The codec is fixed for the
/// whole session:
///
/// ```text
/// let decoder: RequestDecoder<H265, DummySink>;
/// ```
pub struct RequestDecoder<C, S>
where
    C: StatelessCodec,
    S: RequestSink,
{
    /// The sink decode requests are queued to.
    sink: S,

    config: RequestDecoderConfig,

    /// Stream format last announced to the sink.
    stream_info: Option<StreamInfo>,

    /// Number of requests queued since creation.
    num_requests: u64,

    /// Codec-specific state.
    codec: C::DecoderState,
}

impl<C, S> RequestDecoder<C, S>
where
    C: StatelessCodec,
    S: RequestSink,
{
    pub fn new(sink: S, config: RequestDecoderConfig) -> Self {
        Self {
            sink,
            config,
            stream_info: None,
            num_requests: 0,
            codec: Default::default(),
        }
    }

    pub fn config(&self) -> &RequestDecoderConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Stream format last accepted by the sink, if any.
    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.stream_info.as_ref()
    }

    /// Number of decode requests queued since the decoder was created.
    pub fn num_requests(&self) -> u64 {
        self.num_requests
    }

    /// Announces `stream_info` to the sink if it differs from the current one.
    fn update_stream_info(&mut self, stream_info: StreamInfo) -> RequestResult<()> {
        if self.stream_info.as_ref() == Some(&stream_info) {
            return Ok(());
        }

        log::debug!("new stream format: {:?}", stream_info);
        self.sink
            .set_format(&stream_info)
            .map_err(RequestError::SinkFormatFailure)?;
        self.stream_info = Some(stream_info);

        Ok(())
    }

    fn queue_request(
        &mut self,
        capture_id: u64,
        controls: &[ExtControl],
        bitstream: &[u8],
    ) -> RequestResult<()> {
        let request = DecodeRequest {
            capture_id,
            controls,
            bitstream,
        };

        self.sink
            .queue_request(&request)
            .map_err(RequestError::SinkSubmitFailure)?;
        self.num_requests += 1;

        log::debug!(
            "queued request #{} for capture {}: {} controls, {} bytes",
            self.num_requests,
            capture_id,
            controls.len(),
            bitstream.len()
        );

        Ok(())
    }
}
