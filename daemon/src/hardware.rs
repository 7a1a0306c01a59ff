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

//! Access to the memory-mapped hardware of the SoC.
//!
//! Every piece of hardware the daemon touches (the shared PRC register window and the per-tile
//! decoupler registers) is reached through the [`RegisterIo`] trait. In production the trait is
//! implemented by [`MemDeviceWindow`], which maps a window of a memory device node such as
//! `/dev/mem` and performs volatile 32-bit accesses on it. Tests substitute an in-memory register
//! model.
//!
//! # Modules
//!
//! - [`prc_registers`] - Register map of the Partial Reconfiguration Controller
//! - [`decoupler`] - Per-tile bus isolation
//! - [`interrupt`] - The PRC interrupt line, delivered through a UIO node

pub mod decoupler;
pub mod interrupt;
pub mod prc_registers;

use crate::error::PrcdError;
use log::debug;
use memmap2::{MmapOptions, MmapRaw};
use nix::libc::O_SYNC;
use nix::unistd::{SysconfVar, sysconf};
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// 32-bit register access relative to the start of a register window.
pub trait RegisterIo: Send + Sync {
    /// Read the register at `offset` bytes from the window base.
    fn read32(&self, offset: u64) -> Result<u32, PrcdError>;

    /// Write `value` to the register at `offset` bytes from the window base.
    fn write32(&self, offset: u64, value: u32) -> Result<(), PrcdError>;
}

/// A register window located at a physical address, mapped from a memory device node.
#[derive(Debug)]
pub struct MemDeviceWindow {
    device: PathBuf,
    base: u64,
    len: usize,
    /// Distance from the page-aligned start of the mapping to `base`.
    page_offset: usize,
    map: MmapRaw,
}

fn page_size() -> Result<u64, PrcdError> {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => Ok(size as u64),
        other => Err(PrcdError::Internal(format!(
            "cannot determine the page size: {other:?}"
        ))),
    }
}

impl MemDeviceWindow {
    /// Map `len` bytes of `device` starting at physical address `base`.
    ///
    /// The device is opened with `O_SYNC` so the mapping is uncached.
    ///
    /// # Arguments
    ///
    /// * `device` - The memory device node, typically `/dev/mem`
    /// * `base` - Physical address of the first register in the window, 4-byte aligned
    /// * `len` - Size of the window in bytes
    ///
    /// # Returns: `Result<MemDeviceWindow, PrcdError>`
    /// * `Ok(MemDeviceWindow)` - The mapped window
    /// * `Err(PrcdError::MapFailed)` - If the device cannot be opened or mapped
    pub fn open(device: &Path, base: u64, len: usize) -> Result<Self, PrcdError> {
        if base % 4 != 0 || len == 0 {
            return Err(PrcdError::Argument(format!(
                "register window of {len:#x} bytes at {base:#x} is empty or misaligned"
            )));
        }
        let map_failed = |e| PrcdError::MapFailed {
            file: device.to_path_buf(),
            base,
            e,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(O_SYNC)
            .open(device)
            .map_err(map_failed)?;
        let page_offset = (base % page_size()?) as usize;
        let map = MmapOptions::new()
            .offset(base - page_offset as u64)
            .len(page_offset + len)
            .map_raw(&file)
            .map_err(map_failed)?;
        debug!("Mapped {len:#x} bytes of {device:?} at {base:#x}");
        Ok(MemDeviceWindow {
            device: device.to_path_buf(),
            base,
            len,
            page_offset,
            map,
        })
    }

    fn register(&self, offset: u64) -> Result<*mut u32, PrcdError> {
        let offset = usize::try_from(offset)
            .ok()
            .filter(|offset| offset % 4 == 0 && offset + 4 <= self.len)
            .ok_or_else(|| {
                PrcdError::Internal(format!(
                    "register {offset:#x} is outside the {:#x} byte window at {:#x} of {:?}",
                    self.len, self.base, self.device
                ))
            })?;
        // SAFETY: page_offset + offset + 4 <= page_offset + len, the length of the mapping.
        let register = unsafe { self.map.as_mut_ptr().add(self.page_offset + offset) };
        Ok(register.cast::<u32>())
    }
}

impl RegisterIo for MemDeviceWindow {
    fn read32(&self, offset: u64) -> Result<u32, PrcdError> {
        let register = self.register(offset)?;
        // SAFETY: read_volatile is required for MMIO since the hardware changes the value.
        // The pointer lies inside the live mapping and is 4-byte aligned (base and offset are).
        Ok(unsafe { std::ptr::read_volatile(register) })
    }

    fn write32(&self, offset: u64, value: u32) -> Result<(), PrcdError> {
        let register = self.register(offset)?;
        // SAFETY: write_volatile is required for MMIO since the write has side effects.
        // The pointer lies inside the live mapping and is 4-byte aligned.
        unsafe { std::ptr::write_volatile(register, value) };
        Ok(())
    }
}
