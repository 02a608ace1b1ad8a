// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Binary control records of the V4L2 stateless codec API.
//!
//! Each record mirrors a `#[repr(C)]` kernel structure. Records serialize themselves field by
//! field in little-endian order, including explicit padding, so the serialized payload always has
//! the size of the structure.

pub mod h265;
pub mod mpeg2;

use std::fmt;

use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use thiserror::Error;

/// `V4L2_CTRL_CLASS_CODEC | 0x900`.
pub const V4L2_CID_CODEC_BASE: u32 = 0x0099_0900;

/// A serialized control, ready to be attached to a request.
#[derive(Clone, PartialEq, Eq)]
pub struct ExtControl {
    pub id: u32,
    pub type_: u32,
    pub payload: Bytes,
}

impl ExtControl {
    pub fn size(&self) -> u32 {
        self.payload.len() as u32
    }
}

impl fmt::Debug for ExtControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtControl")
            .field("id", &format_args!("{:#010x}", self.id))
            .field("type_", &format_args!("{:#06x}", self.type_))
            .field("size", &self.payload.len())
            .finish()
    }
}

/// A fixed-layout control record.
pub trait ControlRecord: Sized {
    /// Control id, `V4L2_CID_*`.
    const ID: u32;
    /// Control type, `V4L2_CTRL_TYPE_*`.
    const TYPE: u32;
    /// Size of the serialized record.
    const SIZE: usize = std::mem::size_of::<Self>();

    /// Writes the record into `buf`, exactly `Self::SIZE` bytes.
    fn write<B: BufMut>(&self, buf: &mut B);

    fn to_ext_control(&self) -> ExtControl {
        let mut payload = BytesMut::with_capacity(Self::SIZE);
        self.write(&mut payload);
        debug_assert_eq!(payload.len(), Self::SIZE);

        ExtControl {
            id: Self::ID,
            type_: Self::TYPE,
            payload: payload.freeze(),
        }
    }
}

/// Header values that cannot be represented in the control records.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedHeader {
    #[error("invalid number of tile {kind}s {count}, expected 1..={max}")]
    InvalidTileCount {
        kind: &'static str,
        count: u32,
        max: usize,
    },
    #[error("{len} tile {kind} sizes given for {count} tile {kind}s")]
    TileCountMismatch {
        kind: &'static str,
        len: usize,
        count: u32,
    },
    #[error("tile {kind} {index} has invalid size {size}")]
    InvalidTileSize {
        kind: &'static str,
        index: usize,
        size: u32,
    },
    #[error("tile {kind}s span {sum} CTBs but the picture is {expected} CTBs")]
    TileSpanMismatch {
        kind: &'static str,
        sum: u64,
        expected: u32,
    },
    #[error("invalid CTB size 1 << ({log2_min_cb_size} + {log2_diff_max_min})")]
    InvalidCtbSize {
        log2_min_cb_size: u8,
        log2_diff_max_min: u8,
    },
    #[error("scaling list DC coefficient {value} out of range")]
    ScalingDcOutOfRange { value: i32 },
}

pub(crate) fn flag(value: bool) -> u8 {
    u8::from(value)
}

/// Saturates `value` into the range of a signed 8-bit control field.
pub(crate) fn saturate_i8(value: i32) -> i8 {
    value.clamp(i8::MIN.into(), i8::MAX.into()) as i8
}

/// Saturates `value` into the range of an unsigned 8-bit control field.
pub(crate) fn saturate_u8(value: u32) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}
