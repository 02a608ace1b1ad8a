// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod stateless;

use crate::Fourcc;
use crate::Resolution;

/// Stream parameters the sink needs to configure its queues.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    /// Coded format of the OUTPUT queue.
    pub coded_format: Fourcc,
    /// Coded resolution of the stream.
    pub coded_resolution: Resolution,
    /// Minimum number of CAPTURE buffers needed to decode the stream.
    pub min_num_frames: usize,
}
