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

//! FIR filter accelerator.

use crate::accelerators::{ACCELERATOR_IOCTL_TYPE, ioctl_write};
use crate::reconfig::tile_manager::{AcceleratorOps, DriverCapabilities};
use prcd_macros::accelerator_driver;

/// Argument of the FIR access ioctl.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FirAccess {
    pub run: u32,
    pub coherence: u32,
    pub p2p: u32,
    pub taps: u32,
    pub samples: u32,
    pub src_offset: u32,
    pub dst_offset: u32,
}

#[accelerator_driver(name = "fir_drv", compatible = "sld,fir_vivado")]
#[derive(Debug, Default)]
pub struct FirAccelerator;

impl AcceleratorOps for FirAccelerator {
    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            ioctl_cm: ioctl_write(ACCELERATOR_IOCTL_TYPE, 0, size_of::<FirAccess>()),
            arg_size: size_of::<FirAccess>(),
            xfer_input_ok: true,
            prep_xfer: true,
            dpr: false,
        }
    }
}
