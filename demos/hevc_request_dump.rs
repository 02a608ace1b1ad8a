// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Runs a synthetic H.265 sequence through the request decoder and dumps the requests it
//! produces.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use argh::FromArgs;
use cros_v4l2_request::backend::dummy::DummySink;
use cros_v4l2_request::codec::h265::dpb::Dpb;
use cros_v4l2_request::codec::h265::dpb::RefPicSet;
use cros_v4l2_request::codec::h265::parser::NaluHeader;
use cros_v4l2_request::codec::h265::parser::NaluType;
use cros_v4l2_request::codec::h265::parser::Pps;
use cros_v4l2_request::codec::h265::parser::Slice;
use cros_v4l2_request::codec::h265::parser::SliceHeader;
use cros_v4l2_request::codec::h265::parser::SliceType;
use cros_v4l2_request::codec::h265::parser::Sps;
use cros_v4l2_request::codec::h265::picture::PictureData;
use cros_v4l2_request::codec::h265::picture::RcPictureData;
use cros_v4l2_request::codec::h265::picture::Reference;
use cros_v4l2_request::decoder::stateless::h265::H265;
use cros_v4l2_request::decoder::stateless::DecodeMode;
use cros_v4l2_request::decoder::stateless::RequestDecoder;
use cros_v4l2_request::decoder::stateless::RequestDecoderConfig;
use cros_v4l2_request::decoder::stateless::StartCode;

/// Dumps the V4L2 requests built for a synthetic I/P/B H.265 sequence
#[derive(Debug, FromArgs)]
struct Args {
    /// how slices are grouped into requests (slice or frame). Default: slice
    #[argh(option, default = "DecodeMode::SliceBased")]
    mode: DecodeMode,

    /// number of pictures to generate. Default: 7
    #[argh(option, default = "7")]
    frames: u32,

    /// number of slices per picture. Default: 2
    #[argh(option, default = "2")]
    slices: u32,

    /// whether to prefix slices with an Annex B start code
    #[argh(switch)]
    annexb: bool,

    /// output file to write the controls and data of each request to
    #[argh(option)]
    output: Option<PathBuf>,
}

/// A picture of the synthetic sequence, in decoding order.
struct SyntheticPicture {
    slice_type: SliceType,
    nalu_type: NaluType,
    poc: i32,
    before: Vec<i32>,
    after: Vec<i32>,
}

/// Decoding order I0 P4 B2 P8 B6..., B pictures are not used for reference.
fn synthetic_picture(index: u32) -> SyntheticPicture {
    let index = index as i32;

    if index == 0 {
        SyntheticPicture {
            slice_type: SliceType::I,
            nalu_type: NaluType::IdrWRadl,
            poc: 0,
            before: vec![],
            after: vec![],
        }
    } else if index % 2 == 1 {
        let poc = 4 * ((index + 1) / 2);
        SyntheticPicture {
            slice_type: SliceType::P,
            nalu_type: NaluType::TrailR,
            poc,
            before: vec![poc - 4],
            after: vec![],
        }
    } else {
        let poc = 4 * (index / 2) - 2;
        SyntheticPicture {
            slice_type: SliceType::B,
            nalu_type: NaluType::TrailN,
            poc,
            before: vec![poc - 2],
            after: vec![poc + 2],
        }
    }
}

fn nal_unit(nalu_type: NaluType, picture: u32, slice: u32) -> Vec<u8> {
    let mut data = vec![(nalu_type as u8) << 1, 0x01];
    data.extend((0..24u32).map(|i| (picture * 31 + slice * 7 + i) as u8));
    data
}

fn refs(dpb: &Dpb, pocs: &[i32]) -> Vec<Option<RcPictureData>> {
    pocs.iter().map(|&poc| dpb.find_ref_by_poc(poc)).collect()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Args = argh::from_env();

    let config = RequestDecoderConfig {
        decode_mode: args.mode,
        start_code: if args.annexb {
            StartCode::AnnexB
        } else {
            StartCode::None
        },
    };
    let mut decoder = RequestDecoder::<H265, _>::new(DummySink::new(), config);

    let sps = Rc::new(Sps {
        pic_width_in_luma_samples: 320,
        pic_height_in_luma_samples: 240,
        log2_min_cb_size: 3,
        log2_diff_max_min_luma_coding_block_size: 3,
        log2_max_tb_size: 5,
        max_dec_pic_buffering: [3; 7],
        temporal_mvp_enabled_flag: true,
        ..Default::default()
    });
    let pps = Rc::new(Pps::default());
    let mut dpb = Dpb::default();
    let mut diagnostics = vec![];

    for index in 0..args.frames {
        let desc = synthetic_picture(index);
        let pic = PictureData::new(desc.nalu_type, desc.poc, index).into_rc();

        let rps = RefPicSet {
            st_curr_before: refs(&dpb, &desc.before),
            st_curr_after: refs(&dpb, &desc.after),
            lt_curr: vec![],
        };
        let list0 = [rps.st_curr_before.clone(), rps.st_curr_after.clone()].concat();
        let list1 = [rps.st_curr_after.clone(), rps.st_curr_before.clone()].concat();

        let num_ref_idx_l0_active = if desc.slice_type.is_i() { 0 } else { list0.len() };
        let num_ref_idx_l1_active = if desc.slice_type.is_b() { list1.len() } else { 0 };

        let mut picture = decoder.begin_picture(&sps, &pps, &pic)?;

        for slice_index in 0..args.slices {
            let data = nal_unit(desc.nalu_type, index, slice_index);
            let header = SliceHeader {
                first_slice_segment_in_pic_flag: slice_index == 0,
                segment_address: slice_index * 10,
                type_: desc.slice_type,
                num_ref_idx_l0_active: num_ref_idx_l0_active as u8,
                num_ref_idx_l1_active: num_ref_idx_l1_active as u8,
                header_bit_size: 37,
                ..Default::default()
            };
            let slice = Slice {
                nalu: NaluHeader::parse(&data)?,
                header,
                data: &data,
            };

            decoder.decode_slice(&mut picture, &slice, &dpb, &rps, &list0, &list1)?;
        }

        decoder.end_picture(&mut picture)?;
        diagnostics.extend_from_slice(picture.diagnostics());

        if desc.nalu_type != NaluType::TrailN {
            // Keep the last two references only.
            if dpb.len() == 2 {
                if let Some(oldest) = dpb.entries().first() {
                    oldest.borrow_mut().set_reference(Reference::None);
                }
                dpb.remove_unused();
            }
            dpb.store_picture(pic)?;
        }
    }

    let mut output = args
        .output
        .as_ref()
        .map(|p| File::create(p).with_context(|| format!("creating {}", p.display())))
        .transpose()?;

    let sink = decoder.into_sink();
    for request in &sink.requests {
        println!(
            "capture {:3}: {} controls, {:5} bytes, crc {:#010x}",
            request.capture_id,
            request.controls.len(),
            request.bitstream.len(),
            request.crc
        );

        if let Some(output) = &mut output {
            for control in &request.controls {
                output.write_all(&control.payload)?;
            }
            output.write_all(&request.bitstream)?;
        }
    }

    println!(
        "{} requests for {} pictures, {} diagnostic(s)",
        sink.requests.len(),
        args.frames,
        diagnostics.len()
    );
    for diagnostic in &diagnostics {
        println!("  {:?}", diagnostic);
    }

    Ok(())
}
