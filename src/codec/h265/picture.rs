// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::cell::RefCell;
use std::rc::Rc;

use crate::codec::h265::parser::NaluType;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Reference {
    #[default]
    None,
    ShortTerm,
    LongTerm,
}

/// Data associated with a decoded or in-flight h.265 picture.
///
/// The parser owns the POC computation and the reference marking; the request decoder only reads
/// these values to describe the picture and its references to the hardware.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct PictureData {
    pub nalu_type: NaluType,
    /// Same as PicOrderCntVal.
    pub pic_order_cnt_val: i32,
    /// Tag of the CAPTURE buffer the picture is decoded into.
    pub buffer_tag: u32,
    /// Whether the picture was coded as two fields.
    pub field_pic: bool,
    /// pic_struct from the picture timing SEI, if any was received.
    pub pic_struct: u8,

    reference: Reference,
}

/// Shared handle to a picture, as held by the DPB and the reference lists.
pub type RcPictureData = Rc<RefCell<PictureData>>;

impl PictureData {
    pub fn new(nalu_type: NaluType, pic_order_cnt_val: i32, buffer_tag: u32) -> Self {
        Self {
            nalu_type,
            pic_order_cnt_val,
            buffer_tag,
            ..Default::default()
        }
    }

    /// Wraps the picture into a shareable handle.
    pub fn into_rc(self) -> RcPictureData {
        Rc::new(RefCell::new(self))
    }

    /// Whether the current picture is a reference, either ShortTerm or LongTerm.
    pub fn is_ref(&self) -> bool {
        !matches!(self.reference, Reference::None)
    }

    pub fn set_reference(&mut self, reference: Reference) {
        log::debug!(
            "Set reference of POC {} (tag {}) to {:?}",
            self.pic_order_cnt_val,
            self.buffer_tag,
            reference
        );

        self.reference = reference;
    }
}
