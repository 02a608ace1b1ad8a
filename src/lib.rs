// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Control assembly for stateless V4L2 request API decoders.
//!
//! Given the header state produced by a bitstream parser, this crate builds the binary control
//! records a stateless decoder driver expects and groups slice data into decode requests. The
//! hardware channel itself is abstracted behind [`backend::RequestSink`].

pub mod backend;
pub mod codec;
pub mod decoder;
pub mod device;

use std::fmt;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

impl From<Resolution> for (u32, u32) {
    fn from(value: Resolution) -> Self {
        (value.width, value.height)
    }
}

/// A FOURCC code, stored the way V4L2 expects it (first character in the lowest byte).
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Fourcc(u32);

impl Fourcc {
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(u32::from_le_bytes(*code))
    }

    pub fn to_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for Fourcc {
    fn from(fourcc: u32) -> Self {
        Self(fourcc)
    }
}

impl From<&[u8; 4]> for Fourcc {
    fn from(code: &[u8; 4]) -> Self {
        Self::new(code)
    }
}

impl From<Fourcc> for u32 {
    fn from(fourcc: Fourcc) -> Self {
        fourcc.0
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();
        for b in bytes {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x} ({})", self.0, self)
    }
}
