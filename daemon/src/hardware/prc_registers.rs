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

//! Register map of the Partial Reconfiguration Controller (PRC).
//!
//! ```text
//! 0x00  status (read) / control (write)
//! 0x04  software reconfigure trigger
//! 0x08  interrupt status, write 1 to clear
//! 0x80  trigger descriptor: control
//! 0x84  trigger descriptor: bitstream physical address
//! 0x88  trigger descriptor: bitstream size in bytes
//! ```

/// Status register on read, control register on write.
pub const CONTROL: u64 = 0x0;
/// Any write here starts streaming the armed bitstream into the fabric.
pub const SW_TRIGGER: u64 = 0x4;
/// Pending interrupt causes. Writing a set bit back acknowledges it.
pub const IRQ_STATUS: u64 = 0x8;

/// Base of the trigger descriptor block.
pub const TRIGGER_OFFSET: u64 = 0x80;
pub const TRIGGER_CONTROL: u64 = TRIGGER_OFFSET;
pub const TRIGGER_ADDRESS: u64 = TRIGGER_OFFSET + 0x4;
pub const TRIGGER_SIZE: u64 = TRIGGER_OFFSET + 0x8;

/// Bytes mapped for the PRC register window.
pub const PRC_WINDOW_LEN: usize = 0x100;

/// Control values.
pub const PRC_START: u32 = 0x1;
pub const PRC_STOP: u32 = 0x0;

/// Value written to [`SW_TRIGGER`].
pub const TRIGGER_PULSE: u32 = 0x0;

/// Status register bit definitions
pub mod status {
    /// Set while the controller is shut down and safe to re-arm.
    pub const SHUTDOWN: u32 = 1 << 7;
    /// Field holding the controller's progress code.
    pub const CODE_MASK: u32 = 0x7;
    /// Progress code reported once a bitstream has been fully loaded.
    pub const RECONFIG_DONE: u32 = 0x7;

    /// Whether a status word reports a finished reconfiguration.
    pub const fn is_completion(status: u32) -> bool {
        status & CODE_MASK == RECONFIG_DONE
    }
}
