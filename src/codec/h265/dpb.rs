// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::cell::Ref;
use std::rc::Rc;

use anyhow::anyhow;

use crate::codec::h265::picture::PictureData;
use crate::codec::h265::picture::RcPictureData;
use crate::codec::h265::picture::Reference;

/// Maximum number of pictures the DPB can hold.
pub const MAX_DPB_SIZE: usize = 16;

/// The subsets of the current picture's reference picture set that can be used for inter
/// prediction, see 8.3.2.
#[derive(Clone, Debug, Default)]
pub struct RefPicSet {
    pub st_curr_before: Vec<Option<RcPictureData>>,
    pub st_curr_after: Vec<Option<RcPictureData>>,
    pub lt_curr: Vec<Option<RcPictureData>>,
}

/// The decoded picture buffer: previously decoded pictures that may still be referenced.
///
/// Bumping and output are handled by the caller. The request decoder only walks the stored
/// pictures, in storage order, to describe them to the hardware.
#[derive(Debug, Default)]
pub struct Dpb {
    /// List of `PictureData` of decoded pictures.
    entries: Vec<RcPictureData>,
}

impl Dpb {
    /// Returns an iterator over the underlying H265 pictures stored in the
    /// DPB.
    pub fn pictures(&self) -> impl Iterator<Item = Ref<'_, PictureData>> {
        self.entries.iter().map(|h| h.borrow())
    }

    /// Returns the length of the DPB.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a reference to the whole DPB entries.
    pub fn entries(&self) -> &[RcPictureData] {
        &self.entries
    }

    /// Finds a reference picture in the DPB using `poc`.
    pub fn find_ref_by_poc(&self, poc: i32) -> Option<RcPictureData> {
        let position = self
            .pictures()
            .position(|p| p.is_ref() && p.pic_order_cnt_val == poc);

        log::debug!("find_ref_by_poc: {}, found position {:?}", poc, position);
        Some(self.entries[position?].clone())
    }

    /// Removes all pictures which are marked as "unused for reference".
    pub fn remove_unused(&mut self) {
        log::debug!("Removing unused pictures from DPB.");
        self.entries.retain(|e| {
            let pic = e.borrow();
            let retain = pic.is_ref();
            log::debug!("Retaining pic POC: {}: {}", pic.pic_order_cnt_val, retain);
            retain
        })
    }

    /// Store a decoded picture in the DPB, marking it as used for short-term reference.
    pub fn store_picture(&mut self, picture: RcPictureData) -> anyhow::Result<()> {
        if self.entries.len() >= MAX_DPB_SIZE {
            return Err(anyhow!("Can't add a picture to the DPB: DPB is full."));
        }

        if self.entries.iter().any(|e| Rc::ptr_eq(e, &picture)) {
            return Err(anyhow!("Picture is already in the DPB"));
        }

        let mut pic = picture.borrow_mut();
        log::debug!(
            "Stored picture POC {:?}, the DPB length is {:?}",
            pic.pic_order_cnt_val,
            self.entries.len()
        );

        // C.3.4.
        // After all the slices of the current picture have been decoded, this
        // picture is marked as "used for short-term reference".
        pic.set_reference(Reference::ShortTerm);
        drop(pic);

        self.entries.push(picture);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h265::parser::NaluType;

    #[test]
    fn store_and_remove() {
        let mut dpb = Dpb::default();

        let a = PictureData::new(NaluType::IdrWRadl, 0, 0).into_rc();
        let b = PictureData::new(NaluType::TrailR, 4, 1).into_rc();

        dpb.store_picture(a.clone()).unwrap();
        assert!(dpb.store_picture(a.clone()).is_err());
        dpb.store_picture(b.clone()).unwrap();

        assert!(a.borrow().is_ref());
        assert_eq!(dpb.len(), 2);
        assert!(Rc::ptr_eq(&dpb.find_ref_by_poc(4).unwrap(), &b));

        a.borrow_mut().set_reference(Reference::None);
        assert!(dpb.find_ref_by_poc(0).is_none());

        dpb.remove_unused();
        assert_eq!(dpb.len(), 1);
        assert!(Rc::ptr_eq(&dpb.entries()[0], &b));
    }

    #[test]
    fn store_when_full() {
        let mut dpb = Dpb::default();
        for i in 0..MAX_DPB_SIZE {
            let pic = PictureData::new(NaluType::TrailR, i as i32, i as u32).into_rc();
            dpb.store_picture(pic).unwrap();
        }

        let extra = PictureData::new(NaluType::TrailR, 100, 100).into_rc();
        assert!(dpb.store_picture(extra).is_err());
        assert_eq!(dpb.len(), MAX_DPB_SIZE);
    }
}
