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

//! The PRC register sequence.
//!
//! The PRC has a single register window shared by every tile, so the daemon runs at most one
//! register-sequence transaction at a time. A transaction owns the global register lock from
//! the moment the tile is decoupled until it is coupled again after the completion interrupt:
//!
//! ```text
//! Idle -> Stopped -> TriggerArmed -> Running -> Completing -> Idle
//! ```
//!
//! Any failure before the trigger pulse aborts the transaction back to `Idle` without coupling
//! the tile, which stays isolated until a later transaction succeeds or it is coupled by hand.
//! The same holds when the caller stops waiting: dropping the transaction at any point releases
//! the register lock and forgets the tile's pending completion.

use crate::error::PrcdError;
use crate::hardware::RegisterIo;
use crate::hardware::prc_registers::{
    CONTROL, PRC_START, PRC_STOP, SW_TRIGGER, TRIGGER_ADDRESS, TRIGGER_CONTROL, TRIGGER_PULSE,
    TRIGGER_SIZE, status,
};
use crate::reconfig::bitstream::BitstreamImage;
use crate::reconfig::completion::CompletionTracker;
use crate::reconfig::tile::{Tile, TileId};
use log::{debug, info, trace, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Stopped,
    TriggerArmed,
    Running,
    Completing,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Stopped => "stopped",
            EngineState::TriggerArmed => "trigger_armed",
            EngineState::Running => "running",
            EngineState::Completing => "completing",
        };
        f.write_str(name)
    }
}

pub struct ReconfigurationEngine {
    registers: Mutex<Arc<dyn RegisterIo>>,
    state: std::sync::Mutex<EngineState>,
    tracker: Arc<CompletionTracker>,
    completion_timeout: Option<Duration>,
}

impl fmt::Debug for ReconfigurationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconfigurationEngine")
            .field("state", &self.state())
            .field("completion_timeout", &self.completion_timeout)
            .finish_non_exhaustive()
    }
}

/// Exclusive use of the PRC registers.
///
/// Dropping it returns the engine to `Idle` and abandons any completion it still awaits.
pub struct PrcTransaction<'a> {
    registers: MutexGuard<'a, Arc<dyn RegisterIo>>,
    state: &'a std::sync::Mutex<EngineState>,
    tracker: &'a CompletionTracker,
    awaiting: Option<TileId>,
}

fn read_state(state: &std::sync::Mutex<EngineState>) -> EngineState {
    *state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_state(state: &std::sync::Mutex<EngineState>, next: EngineState) {
    let mut current = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    trace!("PRC engine {} -> {next}", *current);
    *current = next;
}

impl PrcTransaction<'_> {
    pub fn state(&self) -> EngineState {
        read_state(self.state)
    }

    fn require(&self, expected: EngineState, action: &str) -> Result<(), PrcdError> {
        let current = self.state();
        if current != expected {
            return Err(PrcdError::Internal(format!(
                "cannot {action} while the PRC engine is {current}"
            )));
        }
        Ok(())
    }

    /// Shut the controller down so that its trigger can be rewritten.
    ///
    /// # Returns: `Result<(), PrcdError>`
    /// * `Ok(())` - The status register reports shutdown; the engine is `Stopped`
    /// * `Err(PrcdError::StopFailed)` - If the controller is still running after the write
    pub fn stop(&mut self) -> Result<(), PrcdError> {
        self.registers.write32(CONTROL, PRC_STOP)?;
        let read = self.registers.read32(CONTROL)?;
        if read & status::SHUTDOWN == 0 {
            return Err(PrcdError::StopFailed { status: read });
        }
        write_state(self.state, EngineState::Stopped);
        Ok(())
    }

    /// Point the trigger descriptor at a bitstream in DMA memory.
    ///
    /// A zero size is written through unchanged; requests are validated before they get here.
    pub fn arm(&mut self, address: u64, size: usize) -> Result<(), PrcdError> {
        self.require(EngineState::Stopped, "arm the trigger")?;
        let address = u32::try_from(address).map_err(|_| {
            PrcdError::Argument(format!(
                "bitstream at {address:#x} is outside the PRC's 32-bit address space"
            ))
        })?;
        let size = u32::try_from(size).map_err(|_| {
            PrcdError::Argument(format!("bitstream of {size} bytes is too large for the PRC"))
        })?;
        self.registers.write32(TRIGGER_CONTROL, 0)?;
        self.registers.write32(TRIGGER_ADDRESS, address)?;
        self.registers.write32(TRIGGER_SIZE, size)?;
        debug!("Armed PRC trigger with {size} bytes at {address:#010x}");
        write_state(self.state, EngineState::TriggerArmed);
        Ok(())
    }

    /// Bring the controller out of shutdown.
    ///
    /// # Returns: `Result<(), PrcdError>`
    /// * `Ok(())` - The status register reports the controller running; the engine is `Running`
    /// * `Err(PrcdError::StartFailed)` - If the controller is still shut down after the write
    pub fn start(&mut self) -> Result<(), PrcdError> {
        self.require(EngineState::TriggerArmed, "start the controller")?;
        self.registers.write32(CONTROL, PRC_START)?;
        let read = self.registers.read32(CONTROL)?;
        if read & status::SHUTDOWN != 0 {
            return Err(PrcdError::StartFailed { status: read });
        }
        write_state(self.state, EngineState::Running);
        Ok(())
    }

    /// Register `tile` with the completion tracker for the rest of this transaction.
    pub fn expect_completion(
        &mut self,
        tile: TileId,
    ) -> Result<oneshot::Receiver<Duration>, PrcdError> {
        let completion = self.tracker.expect(tile)?;
        self.awaiting = Some(tile);
        Ok(completion)
    }

    /// Fire the software trigger. The controller starts streaming the armed bitstream.
    pub fn pulse(&mut self) -> Result<(), PrcdError> {
        self.require(EngineState::Running, "pulse the trigger")?;
        if let Some(tile) = self.awaiting {
            self.tracker.mark_triggered(tile);
        }
        self.registers.write32(SW_TRIGGER, TRIGGER_PULSE)?;
        write_state(self.state, EngineState::Completing);
        Ok(())
    }

    /// The awaited completion arrived; there is nothing left to abandon.
    fn completed(&mut self) {
        self.awaiting = None;
    }
}

impl Drop for PrcTransaction<'_> {
    fn drop(&mut self) {
        if let Some(tile) = self.awaiting.take() {
            self.tracker.abandon(tile);
        }
        write_state(self.state, EngineState::Idle);
    }
}

impl ReconfigurationEngine {
    /// # Arguments
    ///
    /// * `registers` - The PRC register window
    /// * `tracker` - Completion tracker fed by the PRC interrupt
    /// * `completion_timeout` - Give up on a transaction after this long, or never if `None`
    pub fn new(
        registers: Arc<dyn RegisterIo>,
        tracker: Arc<CompletionTracker>,
        completion_timeout: Option<Duration>,
    ) -> Self {
        ReconfigurationEngine {
            registers: Mutex::new(registers),
            state: std::sync::Mutex::new(EngineState::Idle),
            tracker,
            completion_timeout,
        }
    }

    pub fn state(&self) -> EngineState {
        read_state(&self.state)
    }

    /// Wait for the global register lock and start a transaction.
    pub async fn begin(&self) -> PrcTransaction<'_> {
        let registers = self.registers.lock().await;
        PrcTransaction {
            registers,
            state: &self.state,
            tracker: &self.tracker,
            awaiting: None,
        }
    }

    /// Load `image` into `tile` and block until the hardware reports completion.
    ///
    /// The caller must hold the tile lock. The tile is recoupled only once the completion
    /// interrupt for this tile has arrived.
    ///
    /// # Returns: `Result<Duration, PrcdError>`
    /// * `Ok(Duration)` - Time between the trigger pulse and the completion interrupt
    /// * `Err(PrcdError::Internal)` - If another tile's completion is still being awaited
    /// * `Err(PrcdError::StopFailed | StartFailed)` - The register sequence was aborted
    /// * `Err(PrcdError::DecoupleVerifyFailed)` - The decoupler did not take the new value
    /// * `Err(PrcdError::IrqTimeout)` - No completion within the configured timeout
    pub async fn reconfigure(
        &self,
        tile: &Tile,
        image: &BitstreamImage,
    ) -> Result<Duration, PrcdError> {
        let mut transaction = self.begin().await;
        info!(
            "Reconfiguring tile {} with {:?} ({} bytes)",
            tile.id(),
            image.name(),
            image.size()
        );
        let completion = transaction.expect_completion(tile.id())?;
        tile.decoupler().decouple()?;
        transaction.stop()?;
        transaction.arm(image.phys_addr(), image.size())?;
        transaction.start()?;
        transaction.pulse()?;

        let woken = match self.completion_timeout {
            None => completion.await,
            Some(timeout) => match tokio::time::timeout(timeout, completion).await {
                Ok(woken) => woken,
                Err(_) => {
                    warn!("Tile {} left decoupled after completion timeout", tile.id());
                    return Err(PrcdError::IrqTimeout {
                        tile: tile.id().index(),
                        timeout,
                    });
                }
            },
        };
        let elapsed = woken.map_err(|_| {
            PrcdError::Internal(format!(
                "completion signal for tile {} was dropped",
                tile.id()
            ))
        })?;
        transaction.completed();

        tile.decoupler().couple()?;
        info!("Tile {} now runs {:?}", tile.id(), image.name());
        Ok(elapsed)
    }
}
