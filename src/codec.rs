// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parsed bitstream state for the supported codecs.

pub mod h265;
pub mod mpeg2;
