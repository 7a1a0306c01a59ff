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

use zbus::{Result, proxy};
#[proxy(
    default_service = "com.canonical.prcd",
    interface = "com.canonical.prcd.control",
    default_path = "/com/canonical/prcd/control"
)]
pub trait Control {
    async fn load_bitstream(
        &self,
        name: &str,
        driver: &str,
        size: u32,
        tile_id: u32,
        data: &[u8],
    ) -> Result<String>;

    async fn reconfigure(
        &self,
        name: &str,
        driver: &str,
        size: u32,
        tile_id: u32,
        data: &[u8],
    ) -> Result<String>;

    async fn set_decoupler(&self, tile_id: i32, status: u8) -> Result<String>;
}
