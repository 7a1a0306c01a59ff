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

//! Partial reconfiguration daemon (prcd) - System service for swapping accelerators on FPGA tiles.
//!
//! The daemon owns the SoC's Partial Reconfiguration Controller (PRC). Clients stage bitstreams
//! for a tile and ask for a tile to be switched to one of them; the daemon isolates the tile,
//! streams the bitstream through the PRC, waits for the completion interrupt, reconnects the
//! tile and finally swaps the tile's accelerator driver.
//!
//! # DBus Service
//!
//! - **Service Name**: `com.canonical.prcd`
//! - **Status Interface**: `/com/canonical/prcd/status` - Read-only operations
//! - **Control Interface**: `/com/canonical/prcd/control` - Write operations
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (`trace`, `debug`, `info`, `warn`, `error`
//!   or `off`). Defaults to `info`
//!
//! # Architecture
//!
//! At startup the daemon:
//! 1. Registers the built-in accelerator driver templates
//! 2. Maps the PRC and decoupler registers and the DMA carve-out described by the config
//! 3. Starts the driver hot-swap worker and the interrupt thread
//! 4. Connects to the system DBus and advertises the service
//! 5. Waits indefinitely for incoming DBus requests
//!
//! See the [`reconfig`] module for how a request flows through the daemon.

use log::info;
use std::error::Error;
use std::future::pending;
use std::sync::Arc;
use tokio::sync::mpsc;
use zbus::connection;

mod accelerators;
mod comm;
mod config;
mod error;
mod hardware;
mod reconfig;
mod system_io;
#[cfg(test)]
mod testing;

use crate::comm::dbus::{control_interface::ControlInterface, status_interface::StatusInterface};
use crate::config::system_config;
use crate::hardware::MemDeviceWindow;
use crate::hardware::decoupler::DECOUPLER_WINDOW_LEN;
use crate::hardware::interrupt::{UioInterrupt, spawn_interrupt_thread};
use crate::hardware::prc_registers::PRC_WINDOW_LEN;
use crate::reconfig::bitstream::{BitstreamRegistry, UdmaBufRegion};
use crate::reconfig::completion::CompletionTracker;
use crate::reconfig::controller::PrcController;
use crate::reconfig::engine::ReconfigurationEngine;
use crate::reconfig::tile::{TileArena, TileId};
use crate::reconfig::tile_manager::{SysfsDriverBus, TileManager, run_hotswap_worker};

/// Main entry point for the prcd daemon.
///
/// # Returns: `Result<(), Box<dyn Error>>`
/// * `Ok(())` - Never returns under normal operation (runs until terminated)
/// * `Err(Box<dyn Error>)` - Initialization error (hardware unreachable, DBus connection failed, etc.)
///
/// # Examples
///
/// ```bash
/// # Run with default logging (info level)
/// prcd
///
/// # Trace every register access
/// RUST_LOG=trace prcd
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    accelerators::register_templates();
    let config = system_config();

    let prc_registers = Arc::new(MemDeviceWindow::open(
        &config.mem_device,
        config.prc_base(),
        PRC_WINDOW_LEN,
    )?);
    let (hotswap_tx, hotswap_rx) = mpsc::channel(config.hotswap_queue_depth);
    let tracker = Arc::new(CompletionTracker::new(prc_registers.clone(), hotswap_tx));
    let engine = Arc::new(ReconfigurationEngine::new(
        prc_registers,
        tracker.clone(),
        config.completion_timeout,
    ));
    let decouplers = TileId::all()
        .map(|tile| {
            MemDeviceWindow::open(
                &config.mem_device,
                config.decoupler_addr(tile),
                DECOUPLER_WINDOW_LEN,
            )
            .map(Arc::new)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let tiles = Arc::new(TileArena::new(&config.tile_nodes, |tile| {
        decouplers[tile.index()].clone()
    }));
    let region = UdmaBufRegion::open(&config.dma_device, &config.dma_sysfs_dir)?;
    let registry = Arc::new(BitstreamRegistry::new(Arc::new(region)));
    let controller = Arc::new(PrcController::new(registry, tiles.clone(), engine));

    let manager = TileManager::new(Arc::new(SysfsDriverBus::new(&config.platform_bus_dir)));
    tokio::spawn(run_hotswap_worker(hotswap_rx, tiles, manager));
    let irq_source = UioInterrupt::open(&config.irq_device)?;
    let _irq_thread = spawn_interrupt_thread(irq_source, tracker)?;

    let status_interface = StatusInterface::new(controller.clone());
    let control_interface = ControlInterface::new(controller);

    let _conn = connection::Builder::system()?
        .name("com.canonical.prcd")?
        .serve_at("/com/canonical/prcd/status", status_interface)?
        .serve_at("/com/canonical/prcd/control", control_interface)?
        .build()
        .await?;

    info!("Started com.canonical.prcd dbus service");
    pending::<()>().await;

    Ok(())
}
