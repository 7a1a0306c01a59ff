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

use crate::proxies::control_proxy;
use zbus::Connection;

const DECOUPLED: u8 = 1;
const COUPLED: u8 = 0;

/// Sends the dbus command to set a tile's decoupler
async fn call_set_decoupler(tile_id: i32, status: u8) -> Result<String, zbus::Error> {
    let connection = Connection::system().await?;
    let proxy = control_proxy::ControlProxy::new(&connection).await?;
    proxy.set_decoupler(tile_id, status).await
}

/// Argument parser for the decouple and couple commands
pub async fn decoupler_handler(tile_id: i32, decouple: bool) -> Result<String, zbus::Error> {
    let status = if decouple { DECOUPLED } else { COUPLED };
    call_set_decoupler(tile_id, status).await
}
