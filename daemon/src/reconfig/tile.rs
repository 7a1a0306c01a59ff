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

//! Reconfigurable tiles.
//!
//! The SoC has a fixed number of tiles, so they live in an arena sized once at start-up and
//! indexed by [`TileId`]. Each tile owns its decoupler and a lock protecting its reconfiguration
//! state. The lock is held for the whole of a transaction on that tile and by the hot-swap
//! worker while it swaps the tile's driver, so different tiles progress independently.
//!
//! The bitstream a tile currently runs is also published outside the lock, so callers can tell
//! whether a tile already runs an image without waiting behind a transaction.

use crate::config::TILE_COUNT;
use crate::error::PrcdError;
use crate::hardware::RegisterIo;
use crate::hardware::decoupler::TileDecoupler;
use crate::reconfig::bitstream::ImageHandle;
use crate::reconfig::tile_manager::TileDriver;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, watch};

/// A validated tile index in `0..TILE_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(usize);

impl TileId {
    pub fn new(raw: i64) -> Result<Self, PrcdError> {
        match usize::try_from(raw) {
            Ok(index) if index < TILE_COUNT => Ok(TileId(index)),
            _ => Err(PrcdError::InvalidTile { tile: raw }),
        }
    }

    pub fn index(self) -> usize {
        self.0
    }

    pub fn all() -> impl Iterator<Item = TileId> {
        (0..TILE_COUNT).map(TileId)
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for TileId {
    type Error = PrcdError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        TileId::new(i64::from(value))
    }
}

impl TryFrom<i32> for TileId {
    type Error = PrcdError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        TileId::new(i64::from(value))
    }
}

/// Reconfiguration state of one tile, guarded by the tile lock.
#[derive(Debug, Default)]
pub struct TileState {
    /// Bitstream being loaded by an in-flight transaction.
    pub pending: Option<ImageHandle>,
    /// Tile-local driver record currently registered for the tile.
    pub driver: Option<TileDriver>,
    /// Bitstream that `driver` was registered for.
    pub driver_image: Option<ImageHandle>,
    /// Time between the trigger pulse and the completion interrupt of the last transaction.
    pub last_reconfiguration: Option<Duration>,
}

#[derive(Debug)]
pub struct Tile {
    id: TileId,
    node: String,
    decoupler: TileDecoupler,
    current: watch::Sender<Option<ImageHandle>>,
    state: Mutex<TileState>,
}

impl Tile {
    pub fn id(&self) -> TileId {
        self.id
    }

    /// Device-tree node name of the tile, empty if the tile has none.
    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn decoupler(&self) -> &TileDecoupler {
        &self.decoupler
    }

    /// Bitstream currently loaded in the tile's fabric. Never waits for the tile lock.
    pub fn current(&self) -> Option<ImageHandle> {
        self.current.borrow().clone()
    }

    /// Record `image` as loaded. Only called with the tile lock held, whose state is `_locked`.
    pub fn set_current(&self, _locked: &mut TileState, image: ImageHandle) {
        self.current.send_replace(Some(image));
    }

    /// Take the tile lock.
    pub async fn lock(&self) -> MutexGuard<'_, TileState> {
        self.state.lock().await
    }

    /// Take the tile lock only if no transaction or hot-swap currently holds it.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, TileState>> {
        self.state.try_lock().ok()
    }
}

/// All tiles of the SoC, indexed by [`TileId`].
#[derive(Debug)]
pub struct TileArena {
    tiles: Box<[Tile]>,
}

impl TileArena {
    /// # Arguments
    ///
    /// * `nodes` - Device-tree node name of every tile
    /// * `decoupler_register` - Builds the decoupler register handle of a tile
    pub fn new(
        nodes: &[String; TILE_COUNT],
        mut decoupler_register: impl FnMut(TileId) -> Arc<dyn RegisterIo>,
    ) -> Self {
        let tiles = TileId::all()
            .map(|id| Tile {
                id,
                node: nodes[id.index()].clone(),
                decoupler: TileDecoupler::new(id, decoupler_register(id)),
                current: watch::Sender::new(None),
                state: Mutex::new(TileState::default()),
            })
            .collect();
        TileArena { tiles }
    }

    pub fn get(&self, id: TileId) -> &Tile {
        &self.tiles[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    #[rstest]
    #[case::first(0)]
    #[case::last(4)]
    fn accepts_tiles_in_range(#[case] raw: i64) {
        expect_that!(TileId::new(raw).map(TileId::index), ok(eq(&(raw as usize))));
    }

    #[gtest]
    #[rstest]
    #[case::negative(-1)]
    #[case::past_the_end(5)]
    #[case::huge(i64::MAX)]
    fn rejects_tiles_out_of_range(#[case] raw: i64) {
        expect_that!(
            TileId::new(raw),
            err(displays_as(contains_substring("is not a reconfigurable tile id")))
        );
    }
}
