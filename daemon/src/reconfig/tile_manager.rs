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

//! Accelerator driver hot-swap.
//!
//! Accelerator drivers are described by shared [`DriverTemplate`]s, registered at daemon startup
//! by types carrying the `#[accelerator_driver]` attribute (see [`crate::accelerators`]). When a
//! tile is loaded with a new bitstream, a tile-local [`TileDriver`] is cloned from the template
//! named by the bitstream and registered in place of the tile's previous driver.
//!
//! # Driver naming
//!
//! A tile-local driver is called `<template>_<tile node>` and matches devices named after the
//! template, named after the tile's device-tree node, or compatible with `sld` or the template's
//! own compatible string. Tiles without a device-tree node cannot host a driver.
//!
//! # Hot-swap
//!
//! Swaps never run in interrupt context. The completion tracker posts the tile id to a bounded
//! queue and [`run_hotswap_worker`] performs the swap under the tile lock, so a swap never
//! overlaps with a reconfiguration of the same tile.

use crate::error::PrcdError;
use crate::reconfig::tile::{Tile, TileArena, TileId, TileState};
use crate::system_io::{fs_read_dir, fs_write};
use log::{debug, error, info, trace, warn};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc;

/// Compatible string shared by every accelerator tile.
pub const SLD_COMPATIBLE: &str = "sld";

/// What an accelerator driver offers to user space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverCapabilities {
    /// The driver's access ioctl command.
    pub ioctl_cm: u32,
    /// Size of the ioctl argument structure in bytes.
    pub arg_size: usize,
    /// The driver checks transfer arguments before starting the accelerator.
    pub xfer_input_ok: bool,
    /// The driver programs its own registers before each transfer.
    pub prep_xfer: bool,
    /// The driver is bound to a dynamically reconfigured tile.
    pub dpr: bool,
}

/// Callbacks of an accelerator driver.
pub trait AcceleratorOps: Send + Sync + fmt::Debug {
    fn capabilities(&self) -> DriverCapabilities;

    /// Called after the driver has been registered for a tile.
    fn probe(&self, driver: &TileDriver) -> Result<(), PrcdError> {
        trace!("probing {}", driver.name());
        Ok(())
    }

    /// Called after the driver has been unregistered from a tile.
    fn remove(&self, driver: &TileDriver) {
        trace!("removing {}", driver.name());
    }
}

/// A shared accelerator driver description that tile-local drivers are cloned from.
#[derive(Debug, Clone)]
pub struct DriverTemplate {
    name: &'static str,
    compatible: &'static str,
    ops: Arc<dyn AcceleratorOps>,
}

impl DriverTemplate {
    pub fn new(name: &'static str, compatible: &'static str, ops: Arc<dyn AcceleratorOps>) -> Self {
        DriverTemplate {
            name,
            compatible,
            ops,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn compatible(&self) -> &'static str {
        self.compatible
    }

    pub fn capabilities(&self) -> DriverCapabilities {
        self.ops.capabilities()
    }
}

/// Type alias for template constructor functions stored in the template registry.
type TemplateConstructor = fn() -> DriverTemplate;

/// Global registry of driver templates, keyed by driver name.
static TEMPLATE_REGISTRY: OnceLock<Mutex<HashMap<&'static str, TemplateConstructor>>> =
    OnceLock::new();

fn template_registry() -> &'static Mutex<HashMap<&'static str, TemplateConstructor>> {
    TEMPLATE_REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register a driver template under `name`. Registering a name twice replaces the template.
pub fn register_template(name: &'static str, constructor: TemplateConstructor) {
    let mut registry = template_registry()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    debug!("Registering driver template {name}");
    registry.insert(name, constructor);
}

/// Look up the template for a driver name.
///
/// # Returns: `Result<DriverTemplate, PrcdError>`
/// * `Ok(DriverTemplate)` - A fresh instance of the registered template
/// * `Err(PrcdError::NoDriverMatch)` - If no template is registered under `name`
pub fn template_for(name: &str) -> Result<DriverTemplate, PrcdError> {
    let registry = template_registry()
        .lock()
        .map_err(|_| PrcdError::Internal("couldn't lock TEMPLATE_REGISTRY".into()))?;
    registry
        .get(name)
        .map(|constructor| constructor())
        .ok_or_else(|| PrcdError::NoDriverMatch(format!("no driver template is named {name:?}")))
}

/// Names of every registered template, sorted.
pub fn template_names() -> Result<Vec<&'static str>, PrcdError> {
    let registry = template_registry()
        .lock()
        .map_err(|_| PrcdError::Internal("couldn't lock TEMPLATE_REGISTRY".into()))?;
    let mut names: Vec<&'static str> = registry.keys().copied().collect();
    names.sort_unstable();
    Ok(names)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEntry {
    /// Matches a device by node name.
    Name(String),
    /// Matches a device by compatible string.
    Compatible(String),
}

/// A driver owned by one tile, cloned from a [`DriverTemplate`].
#[derive(Debug, Clone)]
pub struct TileDriver {
    name: String,
    template: &'static str,
    tile: TileId,
    node: String,
    match_table: Vec<MatchEntry>,
    capabilities: DriverCapabilities,
    ops: Arc<dyn AcceleratorOps>,
}

impl TileDriver {
    /// Clone `template` for the tile `tile` whose device-tree node is `node`.
    pub fn instantiate(
        template: &DriverTemplate,
        tile: TileId,
        node: &str,
    ) -> Result<Self, PrcdError> {
        if node.is_empty() {
            return Err(PrcdError::NoDriverMatch(format!(
                "tile {tile} has no device-tree node to bind {} to",
                template.name
            )));
        }
        Ok(TileDriver {
            name: format!("{}_{node}", template.name),
            template: template.name,
            tile,
            node: node.to_string(),
            match_table: vec![
                MatchEntry::Name(template.name.to_string()),
                MatchEntry::Name(node.to_string()),
                MatchEntry::Compatible(SLD_COMPATIBLE.to_string()),
                MatchEntry::Compatible(template.compatible.to_string()),
            ],
            capabilities: DriverCapabilities {
                dpr: true,
                ..template.capabilities()
            },
            ops: template.ops.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the template this driver was cloned from.
    pub fn template(&self) -> &'static str {
        self.template
    }

    pub fn tile(&self) -> TileId {
        self.tile
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn match_table(&self) -> &[MatchEntry] {
        &self.match_table
    }

    pub fn capabilities(&self) -> DriverCapabilities {
        self.capabilities
    }

    pub fn ops(&self) -> &dyn AcceleratorOps {
        self.ops.as_ref()
    }
}

/// Where tile drivers get bound to their devices.
pub trait DriverBus: Send + Sync {
    fn register(&self, driver: &TileDriver) -> Result<(), PrcdError>;
    fn unregister(&self, driver: &TileDriver) -> Result<(), PrcdError>;
}

/// Binds drivers through the platform bus in sysfs using `driver_override`.
#[derive(Debug, Clone)]
pub struct SysfsDriverBus {
    bus_dir: PathBuf,
}

impl SysfsDriverBus {
    pub fn new(bus_dir: &Path) -> Self {
        SysfsDriverBus {
            bus_dir: bus_dir.to_path_buf(),
        }
    }

    /// Find the platform device instantiated from the tile's device-tree node.
    ///
    /// Platform devices are named `<unit address>.<node>`, or just `<node>` when they have no
    /// unit address.
    fn device_for(&self, driver: &TileDriver) -> Result<String, PrcdError> {
        let suffix = format!(".{}", driver.node());
        fs_read_dir(&self.bus_dir.join("devices"))?
            .into_iter()
            .find(|device| device == driver.node() || device.ends_with(&suffix))
            .ok_or_else(|| {
                PrcdError::NoDriverMatch(format!(
                    "no platform device matches tile node {:?}",
                    driver.node()
                ))
            })
    }
}

impl DriverBus for SysfsDriverBus {
    fn register(&self, driver: &TileDriver) -> Result<(), PrcdError> {
        let device = self.device_for(driver)?;
        let device_dir = self.bus_dir.join("devices").join(&device);
        fs_write(&device_dir.join("driver_override"), false, driver.name())?;
        fs_write(&self.bus_dir.join("drivers_probe"), false, &device)?;
        info!("Bound {} to {device}", driver.name());
        Ok(())
    }

    fn unregister(&self, driver: &TileDriver) -> Result<(), PrcdError> {
        let device = self.device_for(driver)?;
        let device_dir = self.bus_dir.join("devices").join(&device);
        let unbind = device_dir.join("driver/unbind");
        if unbind.exists() {
            fs_write(&unbind, false, &device)?;
        } else {
            warn!("{device} was not bound to {}", driver.name());
        }
        fs_write(&device_dir.join("driver_override"), false, "\n")?;
        info!("Unbound {} from {device}", driver.name());
        Ok(())
    }
}

/// Swaps tile drivers on a [`DriverBus`].
#[derive(Clone)]
pub struct TileManager {
    bus: Arc<dyn DriverBus>,
}

impl fmt::Debug for TileManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileManager").finish_non_exhaustive()
    }
}

impl TileManager {
    pub fn new(bus: Arc<dyn DriverBus>) -> Self {
        TileManager { bus }
    }

    /// Replace the tile's driver with one cloned from `template`.
    ///
    /// The caller must hold the tile lock, whose guarded state is passed as `state`. If the
    /// outgoing driver cannot be unregistered it stays recorded and nothing else changes. If the
    /// incoming driver fails to register or probe, the tile is left without a driver.
    ///
    /// # Returns: `Result<(), PrcdError>`
    /// * `Ok(())` - The tile's driver is now cloned from `template`
    /// * `Err(PrcdError::NoDriverMatch)` - If the tile has no device-tree node or device
    /// * `Err(PrcdError)` - If the bus or the driver's probe callback failed
    pub fn swap(
        &self,
        tile: &Tile,
        state: &mut TileState,
        template: &DriverTemplate,
    ) -> Result<(), PrcdError> {
        let incoming = TileDriver::instantiate(template, tile.id(), tile.node())?;

        if let Some(outgoing) = state.driver.take() {
            if let Err(e) = self.bus.unregister(&outgoing) {
                state.driver = Some(outgoing);
                return Err(e);
            }
            outgoing.ops().remove(&outgoing);
        }

        self.bus.register(&incoming)?;
        if let Err(e) = incoming.ops().probe(&incoming) {
            if let Err(unregister_error) = self.bus.unregister(&incoming) {
                error!(
                    "Failed to unregister {} after probe failure: {unregister_error}",
                    incoming.name()
                );
            }
            return Err(e);
        }
        info!(
            "Tile {} now driven by {} (template {})",
            tile.id(),
            incoming.name(),
            incoming.template()
        );
        state.driver = Some(incoming);
        Ok(())
    }

    /// Replace the tile's driver with a fresh one for the tile's current bitstream.
    ///
    /// The driver is swapped even when the incoming bitstream names the same template as the
    /// outgoing one, since the fabric behind it changed. Only a driver already registered for this
    /// very bitstream is kept.
    pub fn swap_to_current(&self, tile: &Tile, state: &mut TileState) -> Result<(), PrcdError> {
        let Some(image) = tile.current() else {
            warn!("Tile {} has no bitstream loaded, keeping its driver", tile.id());
            return Ok(());
        };
        if state
            .driver_image
            .as_ref()
            .is_some_and(|bound| Arc::ptr_eq(bound, &image))
        {
            debug!(
                "Tile {} driver already registered for {:?}",
                tile.id(),
                image.name()
            );
            return Ok(());
        }
        let template = template_for(image.driver())?;
        match self.swap(tile, state, &template) {
            Ok(()) => {
                state.driver_image = Some(image);
                Ok(())
            }
            Err(e) => {
                if state.driver.is_none() {
                    state.driver_image = None;
                }
                Err(e)
            }
        }
    }
}

/// Consume the hot-swap queue until every sender is dropped.
pub async fn run_hotswap_worker(
    mut queue: mpsc::Receiver<TileId>,
    tiles: Arc<TileArena>,
    manager: TileManager,
) {
    info!("Driver hot-swap worker started");
    while let Some(id) = queue.recv().await {
        let tile = tiles.get(id);
        let mut state = tile.lock().await;
        if let Err(e) = manager.swap_to_current(tile, &mut state) {
            error!("Driver hot-swap for tile {id} failed: {e}");
        }
    }
    info!("Driver hot-swap queue closed");
}
