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

//! Built-in accelerator driver templates.
//!
//! Each accelerator is a type carrying the `#[accelerator_driver]` attribute, which generates a
//! `register_template()` function. Templates are registered once at daemon startup and looked
//! up by the driver name carried in each bitstream request.
//!
//! # Adding an accelerator
//!
//! ```rust,ignore
//! #[accelerator_driver(name = "conv_drv", compatible = "sld,conv_vivado")]
//! #[derive(Debug, Default)]
//! pub struct ConvAccelerator;
//!
//! impl AcceleratorOps for ConvAccelerator {
//!     fn capabilities(&self) -> DriverCapabilities { ... }
//! }
//! ```
//!
//! then call `ConvAccelerator::register_template()` from [`register_templates`].

pub mod fir;
pub mod mac;

use fir::FirAccelerator;
use mac::MacAccelerator;

/// `_IOW(ty, nr, size)` as encoded by Linux.
pub const fn ioctl_write(ty: u8, nr: u8, size: usize) -> u32 {
    (1 << 30) | ((size as u32 & 0x3FFF) << 16) | ((ty as u32) << 8) | nr as u32
}

/// Ioctl type shared by the accelerator drivers.
pub const ACCELERATOR_IOCTL_TYPE: u8 = b'S';

pub fn register_templates() {
    FirAccelerator::register_template();
    MacAccelerator::register_template();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconfig::tile_manager::template_for;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    fn write_ioctl_encoding() {
        expect_that!(ioctl_write(b'S', 0, 24), eq(0x4018_5300u32));
    }

    #[gtest]
    #[rstest]
    #[case::fir("fir_drv", "sld,fir_vivado")]
    #[case::mac("mac_drv", "sld,mac_vivado")]
    fn built_in_templates_are_registered(#[case] name: &str, #[case] compatible: &str) {
        register_templates();

        let template = template_for(name).unwrap();

        expect_that!(template.name(), eq(name));
        expect_that!(template.compatible(), eq(compatible));
        expect_that!(template.capabilities().arg_size, gt(0usize));
    }
}
