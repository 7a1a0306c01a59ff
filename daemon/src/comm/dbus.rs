// This file is part of prcd, an application to manage partial reconfiguration of FPGA tiles together with their accelerator drivers.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// prcd is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// prcd is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! The `com.canonical.prcd` DBus service.
//!
//! - `/com/canonical/prcd/control` ([`control_interface`]) - Requests that change tiles
//! - `/com/canonical/prcd/status` ([`status_interface`]) - Read-only queries
//!
//! Replies are human-readable strings, one line per item. Errors are returned as
//! `zbus::fdo::Error`s converted from [`PrcdError`].

pub mod control_interface;
pub mod status_interface;

use crate::error::PrcdError;
use crate::reconfig::bitstream::ImageHandle;
use crate::reconfig::controller::BitstreamRequest;
use crate::reconfig::tile::TileId;
use crate::reconfig::tile_manager::DriverCapabilities;

/// Collect the arguments of a load or reconfigure call.
pub(crate) fn bitstream_request(
    name: &str,
    driver: &str,
    size: u32,
    tile_id: u32,
    data: Vec<u8>,
) -> BitstreamRequest {
    BitstreamRequest {
        name: name.to_string(),
        driver: driver.to_string(),
        size,
        tile_id,
        data,
    }
}

/// Helper function to check that a tile id names one of the reconfigurable tiles.
pub(crate) fn validate_tile_id(tile_id: u32) -> Result<TileId, PrcdError> {
    TileId::try_from(tile_id)
}

/// One line per image: `<name> driver=<driver> size=<bytes> addr=<phys>`.
pub(crate) fn format_bitstreams(images: &[ImageHandle]) -> String {
    images
        .iter()
        .map(|image| {
            format!(
                "{} driver={} size={} addr={:#x}",
                image.name(),
                image.driver(),
                image.size(),
                image.phys_addr()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line per template: `<name> ioctl=<cmd> arg_size=<bytes> [flags]`.
pub(crate) fn format_templates(templates: &[(&str, DriverCapabilities)]) -> String {
    templates
        .iter()
        .map(|(name, caps)| {
            let mut line = format!(
                "{name} ioctl={:#010x} arg_size={}",
                caps.ioctl_cm, caps.arg_size
            );
            for (flag, set) in [
                ("xfer_input_ok", caps.xfer_input_ok),
                ("prep_xfer", caps.prep_xfer),
                ("dpr", caps.dpr),
            ] {
                if set {
                    line += " ";
                    line += flag;
                }
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    #[rstest]
    #[case::first(0, ok(anything()))]
    #[case::last(4, ok(anything()))]
    #[case::past_the_end(5, err(displays_as(contains_substring("PrcdError::InvalidTile"))))]
    fn tile_ids_are_validated<M: for<'a> Matcher<&'a std::result::Result<TileId, PrcdError>>>(
        #[case] tile_id: u32,
        #[case] condition: M,
    ) {
        expect_that!(&validate_tile_id(tile_id), condition);
    }

    #[gtest]
    fn bitstreams_are_listed_one_per_line() {
        let harness = Harness::new();
        let first = harness.stage(2, "fir_v1", "fir_drv", 64);
        let second = harness.stage(2, "mac_v1", "mac_drv", 32);

        let listing = format_bitstreams(&[first, second]);

        expect_that!(
            listing,
            eq("fir_v1 driver=fir_drv size=64 addr=0x30000000\n\
                mac_v1 driver=mac_drv size=32 addr=0x30000040")
        );
        expect_that!(format_bitstreams(&[]), eq(""));
    }

    #[gtest]
    fn templates_list_their_capabilities() {
        let caps = DriverCapabilities {
            ioctl_cm: 0x4018_5300,
            arg_size: 24,
            xfer_input_ok: true,
            prep_xfer: false,
            dpr: true,
        };

        expect_that!(
            format_templates(&[("fir_drv", caps)]),
            eq("fir_drv ioctl=0x40185300 arg_size=24 xfer_input_ok dpr")
        );
    }

    #[gtest]
    fn request_fields_are_kept() {
        let request = bitstream_request("fir_v1", "fir_drv", 3, 2, vec![1, 2, 3]);
        expect_that!(request.name, eq("fir_v1"));
        expect_that!(request.tile_id, eq(2u32));
        assert_eq!(request.data, vec![1u8, 2, 3]);
    }
}
