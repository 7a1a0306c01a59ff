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

use crate::comm::dbus::{format_bitstreams, format_templates, validate_tile_id};
use crate::reconfig::controller::PrcController;
use log::info;
use std::sync::Arc;
use zbus::{fdo, interface};

pub struct StatusInterface {
    controller: Arc<PrcController>,
}

impl StatusInterface {
    pub fn new(controller: Arc<PrcController>) -> Self {
        StatusInterface { controller }
    }
}

#[interface(name = "com.canonical.prcd.status")]
impl StatusInterface {
    async fn get_engine_state(&self) -> Result<String, fdo::Error> {
        info!("get_engine_state called");
        Ok(self.controller.engine_state().to_string())
    }

    async fn get_tile_status(&self, tile_id: u32) -> Result<String, fdo::Error> {
        info!("get_tile_status called with tile_id: {tile_id}");
        let tile = validate_tile_id(tile_id)?;
        Ok(self.controller.tile_status(tile).to_string())
    }

    async fn get_tile_statuses(&self) -> Result<String, fdo::Error> {
        info!("get_tile_statuses called");
        Ok(self
            .controller
            .tile_statuses()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn list_bitstreams(&self, tile_id: u32) -> Result<String, fdo::Error> {
        info!("list_bitstreams called with tile_id: {tile_id}");
        let tile = validate_tile_id(tile_id)?;
        Ok(format_bitstreams(&self.controller.list_bitstreams(tile)?))
    }

    async fn get_decoupler(&self, tile_id: u32) -> Result<String, fdo::Error> {
        info!("get_decoupler called with tile_id: {tile_id}");
        let tile = validate_tile_id(tile_id)?;
        Ok(self.controller.decoupler_status(tile)?.to_string())
    }

    async fn get_driver_templates(&self) -> Result<String, fdo::Error> {
        info!("get_driver_templates called");
        Ok(format_templates(&self.controller.driver_templates()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use googletest::prelude::*;

    #[gtest]
    #[tokio::test]
    async fn idle_daemon_reports_empty_tiles() {
        let harness = Harness::new();
        let interface = StatusInterface::new(harness.controller.clone());

        expect_that!(interface.get_engine_state().await, ok(eq("idle")));
        expect_that!(interface.list_bitstreams(2).await, ok(eq("")));
        expect_that!(interface.get_decoupler(4).await, ok(eq("0")));
        expect_that!(
            interface.get_tile_statuses().await.map(|s| s.lines().count()),
            ok(eq(&5usize))
        );
    }

    #[gtest]
    #[tokio::test]
    async fn out_of_range_tile_is_invalid_args() {
        let harness = Harness::new();
        let interface = StatusInterface::new(harness.controller.clone());

        let result = interface.get_tile_status(9).await;

        expect_that!(format!("{result:?}"), contains_substring("InvalidArgs"));
    }

    #[gtest]
    #[tokio::test]
    async fn staged_bitstreams_are_listed() {
        let harness = Harness::new();
        harness.stage(2, "fir_v1", "fir_drv", 16);
        let interface = StatusInterface::new(harness.controller.clone());

        expect_that!(
            interface.list_bitstreams(2).await,
            ok(starts_with("fir_v1 driver=fir_drv size=16"))
        );
    }
}
