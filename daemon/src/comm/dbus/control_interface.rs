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

use crate::comm::dbus::bitstream_request;
use crate::reconfig::controller::PrcController;
use log::info;
use std::sync::Arc;
use zbus::{fdo, interface};

pub struct ControlInterface {
    controller: Arc<PrcController>,
}

impl ControlInterface {
    pub fn new(controller: Arc<PrcController>) -> Self {
        ControlInterface { controller }
    }
}

#[interface(name = "com.canonical.prcd.control")]
impl ControlInterface {
    /// Stage a bitstream for a tile, loading it immediately if the tile is still empty.
    async fn load_bitstream(
        &self,
        name: &str,
        driver: &str,
        size: u32,
        tile_id: u32,
        data: Vec<u8>,
    ) -> Result<String, fdo::Error> {
        info!(
            "load_bitstream called with name: {name}, driver: {driver}, size: {size}, tile_id: {tile_id} \
             and {} bytes of data",
            data.len()
        );
        let request = bitstream_request(name, driver, size, tile_id, data);
        let outcome = self.controller.load_bitstream(request).await?;
        Ok(format!("{name} on tile {tile_id}: {outcome}"))
    }

    /// Switch a tile to one of its staged bitstreams.
    async fn reconfigure(
        &self,
        name: &str,
        driver: &str,
        size: u32,
        tile_id: u32,
        data: Vec<u8>,
    ) -> Result<String, fdo::Error> {
        info!("reconfigure called with name: {name}, driver: {driver} and tile_id: {tile_id}");
        let request = bitstream_request(name, driver, size, tile_id, data);
        let outcome = self.controller.reconfigure(&request).await?;
        Ok(format!("{name} on tile {tile_id}: {outcome}"))
    }

    /// Decouple (`status` 1) or couple (`status` 0) a tile directly.
    async fn set_decoupler(&self, tile_id: i32, status: u8) -> Result<String, fdo::Error> {
        info!("set_decoupler called with tile_id: {tile_id} and status: {status}");
        self.controller.set_decoupler(tile_id, status)?;
        Ok(format!("Decoupler of tile {tile_id} set to {status}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::decoupler::DECOUPLED;
    use crate::reconfig::tile::TileId;
    use crate::testing::Harness;
    use googletest::prelude::*;

    #[gtest]
    #[tokio::test]
    async fn errors_cross_the_bus_as_fdo_errors() {
        let harness = Harness::new();
        let interface = ControlInterface::new(harness.controller.clone());

        let result = interface
            .reconfigure("fir_v1", "fir_drv", 0, 2, Vec::new())
            .await;

        expect_that!(
            result,
            err(displays_as(contains_substring("PrcdError::NotFound")))
        );
    }

    #[gtest]
    #[tokio::test]
    async fn set_decoupler_reports_the_new_status() {
        let harness = Harness::new();
        let interface = ControlInterface::new(harness.controller.clone());

        let reply = interface.set_decoupler(1, 1).await;

        expect_that!(reply, ok(eq("Decoupler of tile 1 set to 1")));
        expect_that!(
            harness.controller.decoupler_status(TileId::new(1).unwrap()),
            ok(eq(&DECOUPLED))
        );
    }
}
