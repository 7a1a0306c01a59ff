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

//! Per-tile bus decoupling.
//!
//! Each tile sits behind a decoupler (the tile's monitor register) that isolates its bus
//! interface from the rest of the SoC. A tile must be decoupled while its fabric region is being
//! rewritten so that the half-configured accelerator cannot drive the NoC.
//!
//! Writes are confirmed by reading the register back. A mismatch is the only failure this module
//! reports. Both directions are idempotent.

use crate::error::PrcdError;
use crate::hardware::RegisterIo;
use crate::reconfig::tile::TileId;
use log::{debug, trace};
use std::fmt;
use std::sync::Arc;

/// Register value that isolates the tile.
pub const DECOUPLED: u32 = 1;
/// Register value that reconnects the tile.
pub const COUPLED: u32 = 0;

const DECOUPLER_REG: u64 = 0x0;
/// Bytes mapped for one tile's decoupler.
pub const DECOUPLER_WINDOW_LEN: usize = 0x4;

pub struct TileDecoupler {
    tile: TileId,
    register: Arc<dyn RegisterIo>,
}

impl fmt::Debug for TileDecoupler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileDecoupler")
            .field("tile", &self.tile)
            .finish_non_exhaustive()
    }
}

impl TileDecoupler {
    pub fn new(tile: TileId, register: Arc<dyn RegisterIo>) -> Self {
        TileDecoupler { tile, register }
    }

    /// Isolate the tile's bus interface.
    pub fn decouple(&self) -> Result<(), PrcdError> {
        debug!("decoupling tile {}", self.tile);
        self.set(DECOUPLED)
    }

    /// Reconnect the tile's bus interface.
    pub fn couple(&self) -> Result<(), PrcdError> {
        debug!("coupling tile {}", self.tile);
        self.set(COUPLED)
    }

    /// Read the current decoupler register value.
    pub fn status(&self) -> Result<u32, PrcdError> {
        self.register.read32(DECOUPLER_REG)
    }

    fn set(&self, value: u32) -> Result<(), PrcdError> {
        self.register.write32(DECOUPLER_REG, value)?;
        let read = self.status()?;
        trace!("tile {} decoupler read back {read}", self.tile);
        if read != value {
            return Err(PrcdError::DecoupleVerifyFailed {
                tile: self.tile.index(),
                written: value,
                read,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimulatedRegister;
    use googletest::prelude::*;

    fn decoupler_for(register: &Arc<SimulatedRegister>) -> TileDecoupler {
        TileDecoupler::new(TileId::new(2).unwrap(), register.clone())
    }

    #[gtest]
    fn decouple_then_couple_leaves_the_register_as_found() {
        let register = Arc::new(SimulatedRegister::default());
        let decoupler = decoupler_for(&register);
        let before = decoupler.status().unwrap();

        decoupler.decouple().unwrap();
        expect_that!(decoupler.status(), ok(eq(&DECOUPLED)));
        decoupler.couple().unwrap();

        expect_that!(decoupler.status(), ok(eq(&before)));
        expect_that!(register.writes(), eq(&vec![DECOUPLED, COUPLED]));
    }

    #[gtest]
    fn decouple_is_idempotent() {
        let register = Arc::new(SimulatedRegister::default());
        let decoupler = decoupler_for(&register);

        decoupler.decouple().unwrap();
        decoupler.decouple().unwrap();

        expect_that!(decoupler.status(), ok(eq(&DECOUPLED)));
        expect_that!(register.writes(), eq(&vec![DECOUPLED, DECOUPLED]));
    }

    #[gtest]
    fn stuck_register_fails_verification() {
        let register = Arc::new(SimulatedRegister::stuck_at(COUPLED));
        let decoupler = decoupler_for(&register);

        let result = decoupler.decouple();

        assert_that!(
            result,
            err(displays_as(contains_substring(
                "tile 2 decoupler read back 0 after writing 1"
            )))
        );
    }
}
