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

//! Completion of reconfiguration transactions.
//!
//! The PRC raises its interrupt on a line that may be shared with other causes, so every
//! interrupt is classified from the status register. Only the completion pattern finishes the
//! in-flight transaction: its waiter is woken with the time elapsed since the trigger, and the
//! tile is posted to the hot-swap worker. The driver swap itself never runs in interrupt context.

use crate::config::TILE_COUNT;
use crate::error::PrcdError;
use crate::hardware::RegisterIo;
use crate::hardware::prc_registers::{CONTROL, IRQ_STATUS, status};
use crate::reconfig::tile::TileId;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// What an interrupt turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqOutcome {
    Completed { tile: TileId, elapsed: Duration },
    /// Not a completion, or no transaction was waiting for one.
    Ignored { status: u32 },
}

#[derive(Debug)]
struct InFlight {
    tile: TileId,
    triggered_at: Instant,
}

#[derive(Debug, Default)]
struct TrackerState {
    in_flight: Option<InFlight>,
    waiters: [Option<oneshot::Sender<Duration>>; TILE_COUNT],
}

pub struct CompletionTracker {
    registers: Arc<dyn RegisterIo>,
    hotswap: mpsc::Sender<TileId>,
    state: Mutex<TrackerState>,
}

impl std::fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl CompletionTracker {
    /// # Arguments
    ///
    /// * `registers` - The PRC register window, read from interrupt context
    /// * `hotswap` - Queue consumed by the hot-swap worker
    pub fn new(registers: Arc<dyn RegisterIo>, hotswap: mpsc::Sender<TileId>) -> Self {
        CompletionTracker {
            registers,
            hotswap,
            state: Mutex::new(TrackerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `tile` as the in-flight transaction and return the signal its completion fires.
    ///
    /// Must be called before the trigger pulse so that an early interrupt is not lost. Elapsed
    /// time is measured from this call, or from [`CompletionTracker::mark_triggered`].
    ///
    /// # Returns: `Result<oneshot::Receiver<Duration>, PrcdError>`
    /// * `Ok(Receiver)` - Resolves with the reconfiguration time once the tile completes
    /// * `Err(PrcdError::Internal)` - If another transaction is still in flight
    pub fn expect(&self, tile: TileId) -> Result<oneshot::Receiver<Duration>, PrcdError> {
        let mut state = self.state();
        if let Some(other) = &state.in_flight {
            return Err(PrcdError::Internal(format!(
                "tile {} is still awaiting completion, cannot track tile {tile}",
                other.tile
            )));
        }
        let (sender, receiver) = oneshot::channel();
        state.waiters[tile.index()] = Some(sender);
        state.in_flight = Some(InFlight {
            tile,
            triggered_at: Instant::now(),
        });
        debug!("Awaiting completion of tile {tile}");
        Ok(receiver)
    }

    /// Restart the elapsed-time measurement of `tile` just before its trigger pulse.
    pub fn mark_triggered(&self, tile: TileId) {
        if let Some(in_flight) = self.state().in_flight.as_mut().filter(|f| f.tile == tile) {
            in_flight.triggered_at = Instant::now();
        }
    }

    /// Stop waiting for `tile`. A later completion interrupt is then ignored.
    pub fn abandon(&self, tile: TileId) {
        let mut state = self.state();
        if state.in_flight.as_ref().is_some_and(|f| f.tile == tile) {
            state.in_flight = None;
        }
        state.waiters[tile.index()] = None;
        debug!("Abandoned completion of tile {tile}");
    }

    /// Service one PRC interrupt.
    ///
    /// Reads the status register, acknowledges every pending interrupt cause and, if the status
    /// reports a finished reconfiguration, completes the in-flight transaction.
    ///
    /// # Returns: `Result<IrqOutcome, PrcdError>`
    /// * `Ok(IrqOutcome::Completed)` - The in-flight tile was woken and queued for a driver swap
    /// * `Ok(IrqOutcome::Ignored)` - The interrupt was not a completion of a tracked transaction
    /// * `Err(PrcdError)` - If the PRC registers could not be accessed
    pub fn handle_irq(&self) -> Result<IrqOutcome, PrcdError> {
        let status = self.registers.read32(CONTROL)?;
        let pending = self.registers.read32(IRQ_STATUS)?;
        if pending != 0 {
            self.registers.write32(IRQ_STATUS, pending)?;
        }

        if !status::is_completion(status) {
            warn!("Ignoring PRC interrupt with status {status:#010x}");
            return Ok(IrqOutcome::Ignored { status });
        }

        let mut state = self.state();
        let Some(in_flight) = state.in_flight.take() else {
            warn!("PRC reported completion but no reconfiguration is in flight");
            return Ok(IrqOutcome::Ignored { status });
        };
        let tile = in_flight.tile;
        let elapsed = in_flight.triggered_at.elapsed();
        match state.waiters[tile.index()].take() {
            Some(waiter) => {
                if waiter.send(elapsed).is_err() {
                    warn!("Requester for tile {tile} stopped waiting before completion");
                }
            }
            None => warn!("No waiter registered for tile {tile}"),
        }
        drop(state);

        info!("Tile {tile} reconfigured in {elapsed:?}");
        if let Err(e) = self.hotswap.try_send(tile) {
            error!("Failed to queue driver hot-swap for tile {tile}: {e}");
        }
        Ok(IrqOutcome::Completed { tile, elapsed })
    }
}
