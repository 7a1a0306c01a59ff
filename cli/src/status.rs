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

use crate::proxies::status_proxy;
use zbus::Connection;

/// Number of reconfigurable tiles the daemon manages.
const TILE_COUNT: u32 = 5;

async fn status_proxy() -> Result<status_proxy::StatusProxy<'static>, zbus::Error> {
    let connection = Connection::system().await?;
    status_proxy::StatusProxy::new(&connection).await
}

/// Argument parser for the status command
pub async fn status_handler(tile_id: Option<u32>) -> Result<String, zbus::Error> {
    let proxy = status_proxy().await?;
    let engine = proxy.get_engine_state().await?;
    let tiles = match tile_id {
        Some(tile_id) => proxy.get_tile_status(tile_id).await?,
        None => proxy.get_tile_statuses().await?,
    };
    Ok(format!(
        "---- ENGINE ----\n\
        {engine}\n\
        \n---- TILES ----\n\
        {tiles}"
    ))
}

/// Argument parser for the list command
pub async fn list_handler(tile_id: Option<u32>) -> Result<String, zbus::Error> {
    let proxy = status_proxy().await?;
    let mut ret_string = String::new();
    let tiles = match tile_id {
        Some(tile_id) => tile_id..tile_id + 1,
        None => 0..TILE_COUNT,
    };
    for tile in tiles {
        let bitstreams = proxy.list_bitstreams(tile).await?;
        ret_string += format!("---- TILE {tile} ----\n").as_str();
        if !bitstreams.is_empty() {
            ret_string += format!("{bitstreams}\n").as_str();
        }
    }
    if tile_id.is_none() {
        let drivers = proxy.get_driver_templates().await?;
        ret_string += format!("\n---- DRIVERS ----\n{drivers}\n").as_str();
    }
    Ok(ret_string)
}
