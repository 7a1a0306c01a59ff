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
use std::path::Path;
use zbus::Connection;

/// Sends the dbus command to stage (and possibly load) a bitstream
async fn call_load_bitstream(
    name: &str,
    driver: &str,
    tile_id: u32,
    data: &[u8],
) -> Result<String, zbus::Error> {
    let size = u32::try_from(data.len()).map_err(|_| {
        zbus::Error::Failure(format!("bitstream of {} bytes is too large", data.len()))
    })?;
    let connection = Connection::system().await?;
    let proxy = control_proxy::ControlProxy::new(&connection).await?;
    proxy
        .load_bitstream(name, driver, size, tile_id, data)
        .await
}

/// Sends the dbus command to switch a tile to a staged bitstream
async fn call_reconfigure(name: &str, tile_id: u32) -> Result<String, zbus::Error> {
    let connection = Connection::system().await?;
    let proxy = control_proxy::ControlProxy::new(&connection).await?;
    proxy.reconfigure(name, "", 0, tile_id, &[]).await
}

/// The name a bitstream file is staged under when none is given: its file stem.
fn default_bitstream_name(file_path: &str) -> Result<String, zbus::Error> {
    Path::new(file_path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            zbus::Error::Failure(format!("cannot derive a bitstream name from {file_path:?}"))
        })
}

/// Argument parser for the load command
pub async fn load_handler(
    file_path: &str,
    tile_id: u32,
    driver: &str,
    name: &Option<String>,
) -> Result<String, zbus::Error> {
    let name = match name {
        Some(name) => name.clone(),
        None => default_bitstream_name(file_path)?,
    };
    let data = std::fs::read(file_path)
        .map_err(|e| zbus::Error::Failure(format!("failed to read {file_path:?}: {e}")))?;
    call_load_bitstream(&name, driver, tile_id, &data).await
}

/// Argument parser for the reconfigure command
pub async fn reconfigure_handler(name: &str, tile_id: u32) -> Result<String, zbus::Error> {
    call_reconfigure(name, tile_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    #[rstest]
    #[case::extension("/lib/firmware/fir_v1.pbs", "fir_v1")]
    #[case::no_extension("mac_v2", "mac_v2")]
    #[case::dotted("fir.v3.bin", "fir.v3")]
    fn name_defaults_to_file_stem(#[case] path: &str, #[case] expected: &str) {
        expect_that!(default_bitstream_name(path), ok(eq(expected)));
    }

    #[gtest]
    fn directory_only_path_has_no_name() {
        expect_that!(
            default_bitstream_name("/"),
            err(displays_as(contains_substring("cannot derive a bitstream name")))
        );
    }
}
