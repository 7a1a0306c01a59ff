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

//! Request handling for bitstream loads, reconfigurations and manual decoupling.
//!
//! [`PrcController`] ties the registry, the tiles and the engine together. Every request that may
//! change what a tile runs takes that tile's lock first and keeps it until the tile's current
//! bitstream has been updated, so the hot-swap worker (which takes the same lock) always sees
//! the outcome of the transaction that woke it. Asking for the bitstream a tile already runs is
//! answered from the tile's published current image and takes no lock at all.

use crate::error::PrcdError;
use crate::hardware::decoupler::{COUPLED, DECOUPLED};
use crate::reconfig::bitstream::{BitstreamRegistry, BoundedName, ImageHandle};
use crate::reconfig::engine::{EngineState, ReconfigurationEngine};
use crate::reconfig::tile::{Tile, TileArena, TileId, TileState};
use crate::reconfig::tile_manager::{DriverCapabilities, template_for, template_names};
use log::{info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A load or reconfigure request as received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitstreamRequest {
    pub name: String,
    pub driver: String,
    pub size: u32,
    pub tile_id: u32,
    pub data: Vec<u8>,
}

/// What a request did to its tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The bitstream was staged and the tile kept its current bitstream.
    Staged,
    /// The requested bitstream was already running on the tile.
    AlreadyActive,
    Reconfigured { elapsed: Duration },
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOutcome::Staged => write!(f, "staged"),
            RequestOutcome::AlreadyActive => write!(f, "already active"),
            RequestOutcome::Reconfigured { elapsed } => {
                write!(f, "reconfigured in {}us", elapsed.as_micros())
            }
        }
    }
}

/// A snapshot of one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileStatus {
    pub tile: TileId,
    pub node: String,
    pub decoupler: Option<u32>,
    /// `None` while a transaction or hot-swap holds the tile.
    pub detail: Option<TileDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileDetail {
    pub current: Option<String>,
    pub driver: Option<String>,
    pub last_reconfiguration: Option<Duration>,
}

impl fmt::Display for TileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let or_none = |value: Option<&str>| value.unwrap_or("none").to_string();
        let decoupler = match self.decoupler {
            Some(COUPLED) => "coupled".to_string(),
            Some(DECOUPLED) => "decoupled".to_string(),
            Some(other) => format!("{other:#x}"),
            None => "unreadable".to_string(),
        };
        write!(f, "tile {} ({}): decoupler={decoupler}", self.tile, self.node)?;
        match &self.detail {
            None => write!(f, " busy"),
            Some(detail) => {
                write!(
                    f,
                    " current={} driver={}",
                    or_none(detail.current.as_deref()),
                    or_none(detail.driver.as_deref())
                )?;
                if let Some(elapsed) = detail.last_reconfiguration {
                    write!(f, " last_reconfiguration={}us", elapsed.as_micros())?;
                }
                Ok(())
            }
        }
    }
}

/// Marks an image as in flight on a tile until dropped, including when the request is cancelled.
struct PendingImage<'a> {
    state: &'a mut TileState,
}

impl<'a> PendingImage<'a> {
    fn set(state: &'a mut TileState, image: ImageHandle) -> Self {
        state.pending = Some(image);
        Self { state }
    }
}

impl Drop for PendingImage<'_> {
    fn drop(&mut self) {
        self.state.pending = None;
    }
}

fn runs(tile: &Tile, image: &ImageHandle) -> bool {
    tile.current()
        .is_some_and(|current| Arc::ptr_eq(&current, image))
}

#[derive(Debug)]
pub struct PrcController {
    registry: Arc<BitstreamRegistry>,
    tiles: Arc<TileArena>,
    engine: Arc<ReconfigurationEngine>,
}

impl PrcController {
    pub fn new(
        registry: Arc<BitstreamRegistry>,
        tiles: Arc<TileArena>,
        engine: Arc<ReconfigurationEngine>,
    ) -> Self {
        PrcController {
            registry,
            tiles,
            engine,
        }
    }

    /// Stage a bitstream, and load it straight away if its tile has never been loaded.
    ///
    /// The staged image is kept even if the immediate load fails.
    ///
    /// # Returns: `Result<RequestOutcome, PrcdError>`
    /// * `Ok(RequestOutcome::Staged)` - The tile already runs a bitstream and was left alone
    /// * `Ok(RequestOutcome::Reconfigured)` - The tile was empty and now runs the new bitstream
    /// * `Err(PrcdError)` - Staging or the immediate reconfiguration failed
    pub async fn load_bitstream(
        &self,
        request: BitstreamRequest,
    ) -> Result<RequestOutcome, PrcdError> {
        let tile_id = TileId::try_from(request.tile_id)?;
        let name = BoundedName::new(&request.name)?;
        let driver = BoundedName::new(&request.driver)?;
        if request.size == 0 {
            return Err(PrcdError::Argument(format!(
                "bitstream {name} has a size of zero"
            )));
        }
        template_for(driver.as_str())?;

        let image = self.registry.stage(
            tile_id,
            name,
            driver,
            request.size as usize,
            &request.data,
        )?;
        drop(request);

        let tile = self.tiles.get(tile_id);
        let mut state = tile.lock().await;
        if tile.current().is_some() {
            return Ok(RequestOutcome::Staged);
        }
        self.activate_locked(tile, &mut state, image)
            .await
            .inspect_err(|e| warn!("Keeping staged bitstream after failed first load: {e}"))
    }

    /// Make the staged bitstream `request.name` the one running on `request.tile_id`.
    ///
    /// Only the name and the tile of the request are used. If the tile already runs that
    /// bitstream this returns straight away, even while the tile is busy.
    pub async fn reconfigure(&self, request: &BitstreamRequest) -> Result<RequestOutcome, PrcdError> {
        let tile_id = TileId::try_from(request.tile_id)?;
        let image = self.registry.find(tile_id, &request.name)?;
        let tile = self.tiles.get(tile_id);
        if runs(tile, &image) {
            info!("Tile {tile_id} already runs {:?}", image.name());
            return Ok(RequestOutcome::AlreadyActive);
        }
        let mut state = tile.lock().await;
        self.activate_locked(tile, &mut state, image).await
    }

    async fn activate_locked(
        &self,
        tile: &Tile,
        state: &mut TileState,
        image: ImageHandle,
    ) -> Result<RequestOutcome, PrcdError> {
        if runs(tile, &image) {
            info!("Tile {} already runs {:?}", tile.id(), image.name());
            return Ok(RequestOutcome::AlreadyActive);
        }

        let result = {
            let _pending = PendingImage::set(state, image.clone());
            self.engine.reconfigure(tile, &image).await
        };
        let elapsed = result?;

        tile.set_current(state, image);
        state.last_reconfiguration = Some(elapsed);
        Ok(RequestOutcome::Reconfigured { elapsed })
    }

    /// Decouple (`status` 1) or couple (`status` 0) a tile by hand, bypassing the engine.
    pub fn set_decoupler(&self, tile_id: i32, status: u8) -> Result<(), PrcdError> {
        let tile = self.tiles.get(TileId::try_from(tile_id)?);
        match u32::from(status) {
            DECOUPLED => tile.decoupler().decouple(),
            COUPLED => tile.decoupler().couple(),
            other => Err(PrcdError::Argument(format!(
                "decoupler status must be {COUPLED} or {DECOUPLED}, not {other}"
            ))),
        }
    }

    pub fn engine_state(&self) -> EngineState {
        self.engine.state()
    }

    /// Snapshot a tile without waiting for its lock.
    pub fn tile_status(&self, tile_id: TileId) -> TileStatus {
        let tile = self.tiles.get(tile_id);
        let detail = tile.try_lock().map(|state| TileDetail {
            current: tile.current().map(|image| image.name().to_string()),
            driver: state.driver.as_ref().map(|driver| driver.name().to_string()),
            last_reconfiguration: state.last_reconfiguration,
        });
        let decoupler = tile
            .decoupler()
            .status()
            .inspect_err(|e| warn!("Failed to read decoupler of tile {tile_id}: {e}"))
            .ok();
        TileStatus {
            tile: tile_id,
            node: tile.node().to_string(),
            decoupler,
            detail,
        }
    }

    pub fn tile_statuses(&self) -> Vec<TileStatus> {
        self.tiles.iter().map(|tile| self.tile_status(tile.id())).collect()
    }

    pub fn list_bitstreams(&self, tile_id: TileId) -> Result<Vec<ImageHandle>, PrcdError> {
        self.registry.list(tile_id)
    }

    pub fn decoupler_status(&self, tile_id: TileId) -> Result<u32, PrcdError> {
        self.tiles.get(tile_id).decoupler().status()
    }

    pub fn driver_templates(&self) -> Result<Vec<(&'static str, DriverCapabilities)>, PrcdError> {
        template_names()?
            .into_iter()
            .map(|name| Ok((name, template_for(name)?.capabilities())))
            .collect()
    }
}
