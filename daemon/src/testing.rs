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

//! In-memory stand-ins for the SoC, shared by the unit tests.

use crate::config::{HOTSWAP_QUEUE_DEPTH, SystemConfig};
use crate::error::PrcdError;
use crate::hardware::RegisterIo;
use crate::hardware::prc_registers::{
    CONTROL, IRQ_STATUS, PRC_START, PRC_STOP, SW_TRIGGER, status,
};
use crate::reconfig::bitstream::{
    BitstreamRegistry, BoundedName, DmaBuffer, DmaRegion, ImageHandle, bump_allocate,
};
use crate::reconfig::completion::CompletionTracker;
use crate::reconfig::controller::{BitstreamRequest, PrcController};
use crate::reconfig::engine::ReconfigurationEngine;
use crate::reconfig::tile::{TileArena, TileId};
use crate::reconfig::tile_manager::{
    AcceleratorOps, DriverBus, DriverCapabilities, DriverTemplate, TileDriver, TileManager,
    register_template, run_hotswap_worker,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct RegisterModel {
    value: u32,
    stuck: Option<u32>,
    writes: Vec<u32>,
}

/// A single read/write register, optionally stuck at a fixed value.
#[derive(Debug, Default)]
pub struct SimulatedRegister {
    model: Mutex<RegisterModel>,
}

impl SimulatedRegister {
    pub fn stuck_at(value: u32) -> Self {
        SimulatedRegister {
            model: Mutex::new(RegisterModel {
                value,
                stuck: Some(value),
                writes: Vec::new(),
            }),
        }
    }

    pub fn writes(&self) -> Vec<u32> {
        self.model.lock().unwrap().writes.clone()
    }
}

impl RegisterIo for SimulatedRegister {
    fn read32(&self, _offset: u64) -> Result<u32, PrcdError> {
        let model = self.model.lock().unwrap();
        Ok(model.stuck.unwrap_or(model.value))
    }

    fn write32(&self, _offset: u64, value: u32) -> Result<(), PrcdError> {
        let mut model = self.model.lock().unwrap();
        model.writes.push(value);
        model.value = value;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PrcModel {
    status: u32,
    irq_pending: u32,
    other: HashMap<u64, u32>,
    writes: Vec<(u64, u32)>,
    fail_stop: bool,
    fail_start: bool,
}

/// Behavioural model of the PRC register window.
///
/// Stopping sets the shutdown bit, starting clears it and the progress code, and any write to
/// the software trigger immediately reports a finished reconfiguration with its interrupt
/// pending. Every write is logged.
#[derive(Debug, Default)]
pub struct SimulatedPrc {
    model: Mutex<PrcModel>,
}

impl SimulatedPrc {
    /// Make the controller ignore stop requests.
    pub fn fail_stop(&self) {
        self.model.lock().unwrap().fail_stop = true;
    }

    /// Make the controller stay in shutdown when started.
    pub fn fail_start(&self) {
        self.model.lock().unwrap().fail_start = true;
    }

    /// Raise an interrupt cause that is not a completion.
    pub fn raise_unrelated_irq(&self) {
        self.model.lock().unwrap().irq_pending |= 0x2;
    }

    pub fn writes(&self) -> Vec<(u64, u32)> {
        self.model.lock().unwrap().writes.clone()
    }
}

impl RegisterIo for SimulatedPrc {
    fn read32(&self, offset: u64) -> Result<u32, PrcdError> {
        let model = self.model.lock().unwrap();
        Ok(match offset {
            CONTROL => model.status,
            IRQ_STATUS => model.irq_pending,
            _ => model.other.get(&offset).copied().unwrap_or(0),
        })
    }

    fn write32(&self, offset: u64, value: u32) -> Result<(), PrcdError> {
        let mut model = self.model.lock().unwrap();
        model.writes.push((offset, value));
        match (offset, value) {
            (CONTROL, PRC_STOP) if !model.fail_stop => model.status |= status::SHUTDOWN,
            (CONTROL, PRC_START) if !model.fail_start => {
                model.status &= !(status::SHUTDOWN | status::CODE_MASK)
            }
            (CONTROL, _) => {}
            (SW_TRIGGER, _) => {
                model.status = (model.status & !status::CODE_MASK) | status::RECONFIG_DONE;
                model.irq_pending |= 0x1;
            }
            (IRQ_STATUS, acknowledged) => model.irq_pending &= !acknowledged,
            _ => {
                model.other.insert(offset, value);
            }
        }
        Ok(())
    }
}

/// DMA memory backed by a heap buffer.
#[derive(Debug)]
pub struct HeapDmaRegion {
    phys_base: u64,
    next_free: Mutex<u64>,
    memory: Mutex<Vec<u8>>,
}

impl HeapDmaRegion {
    pub fn new(capacity: usize, phys_base: u64) -> Self {
        HeapDmaRegion {
            phys_base,
            next_free: Mutex::new(0),
            memory: Mutex::new(vec![0; capacity]),
        }
    }

    pub fn contents(&self, buffer: &DmaBuffer) -> Vec<u8> {
        let start = buffer.offset as usize;
        self.memory.lock().unwrap()[start..start + buffer.len].to_vec()
    }
}

impl DmaRegion for HeapDmaRegion {
    fn allocate(&self, size: usize) -> Result<DmaBuffer, PrcdError> {
        let capacity = self.memory.lock().unwrap().len() as u64;
        bump_allocate(&self.next_free, capacity, self.phys_base, size)
    }

    fn fill(&self, buffer: &DmaBuffer, data: &[u8]) -> Result<(), PrcdError> {
        let start = buffer.offset as usize;
        self.memory.lock().unwrap()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Registered(String),
    Unregistered(String),
}

/// A driver bus that records what was bound and unbound.
#[derive(Debug, Default)]
pub struct RecordingBus {
    events: Mutex<Vec<BusEvent>>,
    pub fail_unregister: AtomicBool,
}

impl RecordingBus {
    pub fn events(&self) -> Vec<BusEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl DriverBus for RecordingBus {
    fn register(&self, driver: &TileDriver) -> Result<(), PrcdError> {
        self.events
            .lock()
            .unwrap()
            .push(BusEvent::Registered(driver.name().to_string()));
        Ok(())
    }

    fn unregister(&self, driver: &TileDriver) -> Result<(), PrcdError> {
        if self.fail_unregister.load(Ordering::SeqCst) {
            return Err(PrcdError::Internal(format!("{} is busy", driver.name())));
        }
        self.events
            .lock()
            .unwrap()
            .push(BusEvent::Unregistered(driver.name().to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct TestAccelerator {
    pub fail_probe: bool,
}

impl AcceleratorOps for TestAccelerator {
    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            ioctl_cm: 0x4004_5300,
            arg_size: 4,
            xfer_input_ok: false,
            prep_xfer: false,
            dpr: false,
        }
    }

    fn probe(&self, driver: &TileDriver) -> Result<(), PrcdError> {
        if self.fail_probe {
            return Err(PrcdError::Internal(format!("{} probe failed", driver.name())));
        }
        Ok(())
    }
}

pub fn test_template(name: &'static str) -> DriverTemplate {
    DriverTemplate::new(name, "sld,test", Arc::new(TestAccelerator::default()))
}

/// A load request carrying `size` bytes of payload.
pub fn request(tile_id: u32, name: &str, driver: &str, size: u32) -> BitstreamRequest {
    BitstreamRequest {
        name: name.to_string(),
        driver: driver.to_string(),
        size,
        tile_id,
        data: vec![0x5A; size as usize],
    }
}

/// Poll `condition` until it holds, failing the test after a few seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..5000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}

/// A fully wired controller running against simulated hardware.
///
/// When built inside a tokio runtime the hot-swap worker runs too.
pub struct Harness {
    pub prc: Arc<SimulatedPrc>,
    pub tracker: Arc<CompletionTracker>,
    pub engine: Arc<ReconfigurationEngine>,
    pub tiles: Arc<TileArena>,
    pub registry: Arc<BitstreamRegistry>,
    pub bus: Arc<RecordingBus>,
    pub controller: Arc<PrcController>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(timeout))
    }

    fn build(completion_timeout: Option<Duration>) -> Self {
        register_template("test_drv", || test_template("test_drv"));
        register_template("other_drv", || test_template("other_drv"));

        let prc = Arc::new(SimulatedPrc::default());
        let (hotswap_tx, hotswap_rx) = mpsc::channel(HOTSWAP_QUEUE_DEPTH);
        let tracker = Arc::new(CompletionTracker::new(prc.clone(), hotswap_tx));
        let engine = Arc::new(ReconfigurationEngine::new(
            prc.clone(),
            tracker.clone(),
            completion_timeout,
        ));
        let tiles = Arc::new(TileArena::new(&SystemConfig::default().tile_nodes, |_| {
            Arc::new(SimulatedRegister::default())
        }));
        let registry = Arc::new(BitstreamRegistry::new(Arc::new(HeapDmaRegion::new(
            0x10000,
            0x3000_0000,
        ))));
        let bus = Arc::new(RecordingBus::default());
        let controller = Arc::new(PrcController::new(
            registry.clone(),
            tiles.clone(),
            engine.clone(),
        ));

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(run_hotswap_worker(
                hotswap_rx,
                tiles.clone(),
                TileManager::new(bus.clone()),
            ));
        }

        Harness {
            prc,
            tracker,
            engine,
            tiles,
            registry,
            bus,
            controller,
        }
    }

    /// Stage `size` bytes directly in the registry.
    pub fn stage(&self, tile: i64, name: &str, driver: &str, size: usize) -> ImageHandle {
        self.registry
            .stage(
                TileId::new(tile).unwrap(),
                BoundedName::new(name).unwrap(),
                BoundedName::new(driver).unwrap(),
                size,
                &vec![0x5A; size],
            )
            .unwrap()
    }

    pub fn tile_decoupler_status(&self, tile: i64) -> u32 {
        self.tiles
            .get(TileId::new(tile).unwrap())
            .decoupler()
            .status()
            .unwrap()
    }
}
