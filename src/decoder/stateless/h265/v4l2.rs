// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Description of the reference pictures of a slice in terms of V4L2 DPB entries.

use std::rc::Rc;

use crate::codec::h265::dpb::Dpb;
use crate::codec::h265::dpb::RefPicSet;
use crate::codec::h265::parser::Pps;
use crate::codec::h265::parser::Slice;
use crate::codec::h265::parser::SliceType;
use crate::codec::h265::parser::Sps;
use crate::codec::h265::picture::PictureData;
use crate::codec::h265::picture::RcPictureData;
use crate::decoder::stateless::Diagnostic;
use crate::device::v4l2::stateless::controls::flag;
use crate::device::v4l2::stateless::controls::h265::DpbEntryRps;
use crate::device::v4l2::stateless::controls::h265::V4l2CtrlHevcSliceParams;
use crate::device::v4l2::stateless::controls::h265::V4l2HevcDpbEntry;
use crate::device::v4l2::stateless::controls::h265::V4L2_HEVC_DPB_ENTRIES_NUM_MAX;
use crate::device::v4l2::stateless::controls::h265::V4L2_HEVC_ENTRY_POINT_OFFSETS_MAX;
use crate::device::v4l2::stateless::controls::h265::V4L2_HEVC_REF_IDX_NUM_MAX;

/// Returns the RPS subset `buffer_tag` belongs to. Subsets are searched in the order
/// StCurrBefore, StCurrAfter, LtCurr and the first match wins.
pub fn classify_rps(buffer_tag: u32, rps: &RefPicSet) -> DpbEntryRps {
    let subsets = [
        (&rps.st_curr_before, DpbEntryRps::StCurrBefore),
        (&rps.st_curr_after, DpbEntryRps::StCurrAfter),
        (&rps.lt_curr, DpbEntryRps::LtCurr),
    ];

    for (subset, kind) in subsets {
        let found = subset
            .iter()
            .flatten()
            .any(|pic| pic.borrow().buffer_tag == buffer_tag);
        if found {
            return kind;
        }
    }

    DpbEntryRps::Unused
}

/// Builds the DPB entries for the current slice: every short or long term reference of `dpb`
/// other than `current`, in DPB order.
pub fn build_dpb(dpb: &Dpb, current: &RcPictureData, rps: &RefPicSet) -> Vec<V4l2HevcDpbEntry> {
    let mut entries = Vec::with_capacity(V4L2_HEVC_DPB_ENTRIES_NUM_MAX);

    for handle in dpb.entries() {
        if Rc::ptr_eq(handle, current) {
            continue;
        }

        let pic = handle.borrow();
        if !pic.is_ref() {
            continue;
        }

        if entries.len() == V4L2_HEVC_DPB_ENTRIES_NUM_MAX {
            log::warn!(
                "more than {} references in the DPB, ignoring POC {}",
                V4L2_HEVC_DPB_ENTRIES_NUM_MAX,
                pic.pic_order_cnt_val
            );
            continue;
        }

        entries.push(V4l2HevcDpbEntry {
            buffer_tag: pic.buffer_tag,
            rps: classify_rps(pic.buffer_tag, rps) as u8,
            field_pic: flag(pic.field_pic),
            reserved: [0; 2],
            pic_order_cnt: [pic.pic_order_cnt_val; 2],
        });
    }

    entries
}

/// Finds the index of `target` in `entries`, matching both its buffer tag and its POC.
pub fn find_ref_idx(entries: &[V4l2HevcDpbEntry], target: &PictureData) -> Option<u8> {
    entries
        .iter()
        .take(V4L2_HEVC_DPB_ENTRIES_NUM_MAX)
        .position(|e| {
            e.buffer_tag == target.buffer_tag && e.pic_order_cnt[0] == target.pic_order_cnt_val
        })
        .map(|i| i as u8)
}

/// Like [`find_ref_idx`], but missing references resolve to index 0.
pub fn resolve_ref_idx(entries: &[V4l2HevcDpbEntry], target: Option<&RcPictureData>) -> u8 {
    target
        .and_then(|t| find_ref_idx(entries, &t.borrow()))
        .unwrap_or(0)
}

/// Fills `ref_idx` from the reference picture list `list`. Entries that do not resolve are
/// recorded in `diagnostics`.
fn fill_ref_idx(
    entries: &[V4l2HevcDpbEntry],
    list_id: u8,
    list: &[Option<RcPictureData>],
    ref_idx: &mut [u8; V4L2_HEVC_DPB_ENTRIES_NUM_MAX],
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (index, (entry, dst)) in list
        .iter()
        .zip(ref_idx.iter_mut())
        .take(V4L2_HEVC_REF_IDX_NUM_MAX)
        .enumerate()
    {
        if let Some(pic) = entry {
            let pic = pic.borrow();
            if find_ref_idx(entries, &pic).is_none() {
                log::debug!(
                    "RefPicList{}[{}] (POC {}) is not in the DPB, using index 0",
                    list_id,
                    index,
                    pic.pic_order_cnt_val
                );
                diagnostics.push(Diagnostic::ReferenceNotFound {
                    list: list_id,
                    index,
                });
            }
        }

        *dst = resolve_ref_idx(entries, entry.as_ref());
    }
}

/// Builds the complete slice parameters control for `slice`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn build_slice_params(
    slice: &Slice,
    picture: &RcPictureData,
    sps: &Sps,
    pps: &Pps,
    dpb: &Dpb,
    rps: &RefPicSet,
    ref_pic_list0: &[Option<RcPictureData>],
    ref_pic_list1: &[Option<RcPictureData>],
    diagnostics: &mut Vec<Diagnostic>,
) -> V4l2CtrlHevcSliceParams {
    let mut params = V4l2CtrlHevcSliceParams::from_slice(slice, &picture.borrow(), sps, pps);

    let count = slice.header.entry_point_offsets.len();
    if count > V4L2_HEVC_ENTRY_POINT_OFFSETS_MAX {
        log::warn!(
            "slice has {} entry points, only {} are supported",
            count,
            V4L2_HEVC_ENTRY_POINT_OFFSETS_MAX
        );
        diagnostics.push(Diagnostic::EntryPointOverflow {
            count,
            max: V4L2_HEVC_ENTRY_POINT_OFFSETS_MAX,
        });
    }

    let entries = build_dpb(dpb, picture, rps);
    params.set_dpb_entries(&entries).set_num_rps_poc(
        rps.st_curr_before.len(),
        rps.st_curr_after.len(),
        rps.lt_curr.len(),
    );

    let slice_type = slice.header.type_;
    if !slice_type.is_i() {
        fill_ref_idx(&entries, 0, ref_pic_list0, &mut params.ref_idx_l0, diagnostics);
    }
    if slice_type == SliceType::B {
        fill_ref_idx(&entries, 1, ref_pic_list1, &mut params.ref_idx_l1, diagnostics);
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h265::parser::NaluHeader;
    use crate::codec::h265::parser::NaluType;
    use crate::codec::h265::parser::SliceHeader;
    use crate::codec::h265::picture::Reference;

    fn pic(poc: i32, tag: u32) -> RcPictureData {
        PictureData::new(NaluType::TrailR, poc, tag).into_rc()
    }

    fn entry(tag: u32, poc: i32) -> V4l2HevcDpbEntry {
        V4l2HevcDpbEntry {
            buffer_tag: tag,
            pic_order_cnt: [poc; 2],
            ..Default::default()
        }
    }

    #[test]
    fn empty_store() {
        let _ = env_logger::try_init();

        let dpb = Dpb::default();
        let current = pic(0, 0);
        let data = [0x02, 0x01];
        let slice = Slice {
            nalu: NaluHeader::parse(&data).unwrap(),
            header: SliceHeader {
                type_: SliceType::B,
                num_ref_idx_l0_active: 1,
                num_ref_idx_l1_active: 1,
                ..Default::default()
            },
            data: &data,
        };

        let mut diagnostics = vec![];
        let params = build_slice_params(
            &slice,
            &current,
            &Sps::default(),
            &Pps::default(),
            &dpb,
            &RefPicSet::default(),
            &[None],
            &[None],
            &mut diagnostics,
        );

        assert!(build_dpb(&dpb, &current, &RefPicSet::default()).is_empty());
        assert_eq!(params.num_active_dpb_entries, 0);
        assert_eq!(params.ref_idx_l0, [0; 16]);
        assert_eq!(params.ref_idx_l1, [0; 16]);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn classification_precedence() {
        let a = pic(4, 1);
        let b = pic(8, 2);
        let c = pic(-4, 3);

        let rps = RefPicSet {
            st_curr_before: vec![None, Some(a.clone())],
            st_curr_after: vec![Some(b.clone()), Some(a.clone())],
            lt_curr: vec![Some(c.clone()), Some(b)],
        };

        assert_eq!(classify_rps(1, &rps), DpbEntryRps::StCurrBefore);
        assert_eq!(classify_rps(2, &rps), DpbEntryRps::StCurrAfter);
        assert_eq!(classify_rps(3, &rps), DpbEntryRps::LtCurr);
        assert_eq!(classify_rps(4, &rps), DpbEntryRps::Unused);
        assert_eq!(classify_rps(1, &RefPicSet::default()), DpbEntryRps::Unused);
    }

    #[test]
    fn dpb_skips_current_and_non_references() {
        let mut dpb = Dpb::default();
        let a = pic(0, 10);
        let b = pic(4, 11);
        let c = pic(8, 12);
        let current = pic(12, 13);

        for p in [&a, &b, &c, &current] {
            dpb.store_picture(p.clone()).unwrap();
        }
        b.borrow_mut().set_reference(Reference::None);
        c.borrow_mut().set_reference(Reference::LongTerm);
        c.borrow_mut().field_pic = true;

        let rps = RefPicSet {
            st_curr_before: vec![Some(a.clone())],
            lt_curr: vec![Some(c.clone())],
            ..Default::default()
        };

        let entries = build_dpb(&dpb, &current, &rps);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].buffer_tag, 10);
        assert_eq!(entries[0].rps, DpbEntryRps::StCurrBefore as u8);
        assert_eq!(entries[0].pic_order_cnt, [0, 0]);
        assert_eq!(entries[1].buffer_tag, 12);
        assert_eq!(entries[1].rps, DpbEntryRps::LtCurr as u8);
        assert_eq!(entries[1].field_pic, 1);
        assert_eq!(entries[1].pic_order_cnt, [8, 8]);
    }

    #[test]
    fn resolve_index() {
        let entries = [entry(5, 0), entry(6, 4), entry(6, 8)];

        assert_eq!(resolve_ref_idx(&entries, None), 0);
        assert_eq!(resolve_ref_idx(&entries, Some(&pic(4, 6))), 1);
        assert_eq!(resolve_ref_idx(&entries, Some(&pic(8, 6))), 2);
        // Tag matches but POC does not.
        assert_eq!(resolve_ref_idx(&entries, Some(&pic(12, 6))), 0);
        assert_eq!(find_ref_idx(&entries, &pic(12, 6).borrow()), None);
        assert_eq!(resolve_ref_idx(&[], Some(&pic(0, 5))), 0);
    }

    #[test]
    fn unresolved_references_are_diagnosed() {
        let entries = [entry(5, 0), entry(6, 4)];
        let stranger = pic(16, 9);
        let list = vec![Some(pic(4, 6)), None, Some(stranger), Some(pic(0, 5))];

        let mut ref_idx = [0xffu8; V4L2_HEVC_DPB_ENTRIES_NUM_MAX];
        let mut diagnostics = vec![];
        fill_ref_idx(&entries, 1, &list, &mut ref_idx, &mut diagnostics);

        assert_eq!(&ref_idx[..5], &[1, 0, 0, 0, 0xff]);
        for (entry, &idx) in list.iter().zip(ref_idx.iter()) {
            assert_eq!(idx, resolve_ref_idx(&entries, entry.as_ref()));
        }
        assert_eq!(
            diagnostics,
            vec![Diagnostic::ReferenceNotFound { list: 1, index: 2 }]
        );
    }

    #[test]
    fn at_most_fifteen_references_per_list() {
        let entries = [entry(1, 0)];
        let list = vec![Some(pic(0, 1)); 20];

        let mut ref_idx = [0xffu8; V4L2_HEVC_DPB_ENTRIES_NUM_MAX];
        let mut diagnostics = vec![];
        fill_ref_idx(&entries, 0, &list, &mut ref_idx, &mut diagnostics);

        assert_eq!(&ref_idx[..15], &[0; 15]);
        assert_eq!(ref_idx[15], 0xff);
    }

    #[test]
    fn entry_point_overflow() {
        let data = [0x02, 0x01];
        let slice = Slice {
            nalu: NaluHeader::parse(&data).unwrap(),
            header: SliceHeader {
                entry_point_offsets: vec![2; 300],
                ..Default::default()
            },
            data: &data,
        };

        let mut diagnostics = vec![];
        let params = build_slice_params(
            &slice,
            &pic(0, 0),
            &Sps::default(),
            &Pps::default(),
            &Dpb::default(),
            &RefPicSet::default(),
            &[],
            &[],
            &mut diagnostics,
        );

        assert_eq!(params.num_entry_point_offsets, 256);
        assert!(params.entry_point_offset_minus1.iter().all(|&o| o == 1));
        assert_eq!(
            diagnostics,
            vec![Diagnostic::EntryPointOverflow {
                count: 300,
                max: 256
            }]
        );
    }

    #[test]
    fn p_slice_with_five_references() {
        let _ = env_logger::try_init();

        // Three references before the current picture and two after it.
        let before = [pic(2, 0), pic(4, 1), pic(6, 2)];
        let after = [pic(10, 3), pic(12, 4)];
        let current = pic(8, 5);

        let mut dpb = Dpb::default();
        for p in before.iter().chain(after.iter()) {
            dpb.store_picture(p.clone()).unwrap();
        }

        let rps = RefPicSet {
            st_curr_before: vec![
                Some(before[2].clone()),
                Some(before[1].clone()),
                Some(before[0].clone()),
            ],
            st_curr_after: vec![Some(after[0].clone()), Some(after[1].clone())],
            lt_curr: vec![],
        };
        let list0 = vec![
            Some(before[2].clone()),
            Some(before[1].clone()),
            Some(after[0].clone()),
            Some(before[0].clone()),
        ];

        let data = [0x02, 0x01];
        let slice = Slice {
            nalu: NaluHeader::parse(&data).unwrap(),
            header: SliceHeader {
                type_: SliceType::P,
                num_ref_idx_l0_active: 4,
                ..Default::default()
            },
            data: &data,
        };

        let mut diagnostics = vec![];
        let params = build_slice_params(
            &slice,
            &current,
            &Sps::default(),
            &Pps::default(),
            &dpb,
            &rps,
            &list0,
            &[Some(after[1].clone())],
            &mut diagnostics,
        );

        assert_eq!(params.num_active_dpb_entries, 5);
        let rps_kinds = params.dpb_entries().iter().map(|e| e.rps).collect::<Vec<_>>();
        assert_eq!(rps_kinds, vec![1, 1, 1, 2, 2]);
        assert_eq!(params.num_rps_poc_st_curr_before, 3);
        assert_eq!(params.num_rps_poc_st_curr_after, 2);
        assert_eq!(params.num_rps_poc_lt_curr, 0);

        // DPB order is storage order: POC 2, 4, 6, 10, 12.
        assert_eq!(&params.ref_idx_l0[..5], &[2, 1, 3, 0, 0]);
        // List 1 is ignored for P slices.
        assert_eq!(params.ref_idx_l1, [0; 16]);
        assert_eq!(params.num_ref_idx_l0_active_minus1, 3);
        assert_eq!(params.pred_weight_table.delta_luma_weight_l0, [0; 16]);
        assert!(diagnostics.is_empty());
    }
}
