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

//! The PRC interrupt line.
//!
//! The interrupt is exposed to user space through a UIO node. Writing `1u32` to the node unmasks
//! the interrupt, and a 4-byte read blocks until it fires, returning the running event count.
//! The line may be shared, so every wake-up is handed to the
//! [`CompletionTracker`](crate::reconfig::completion::CompletionTracker) which decides whether it
//! belongs to a reconfiguration.
//!
//! Interrupts are serviced on a dedicated OS thread rather than on the tokio runtime so that the
//! blocking read never stalls request handling.

use crate::error::PrcdError;
use crate::reconfig::completion::CompletionTracker;
use log::{debug, error, info, trace};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

const IRQ_UNMASK: u32 = 1;

#[derive(Debug)]
pub struct UioInterrupt {
    path: PathBuf,
    file: File,
}

impl UioInterrupt {
    pub fn open(path: &Path) -> Result<Self, PrcdError> {
        trace!("Opening interrupt source {path:?}");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| PrcdError::IORead {
                file: path.into(),
                e,
            })?;
        Ok(UioInterrupt {
            path: path.to_path_buf(),
            file,
        })
    }

    fn unmask(&mut self) -> Result<(), PrcdError> {
        self.file
            .write_all(&IRQ_UNMASK.to_ne_bytes())
            .map_err(|e| PrcdError::IOWrite {
                data: format!("{IRQ_UNMASK}"),
                file: self.path.clone(),
                e,
            })
    }

    /// Block until the next interrupt and return the total number of interrupts seen.
    fn wait(&mut self) -> Result<u32, PrcdError> {
        let mut count = [0u8; 4];
        self.file
            .read_exact(&mut count)
            .map_err(|e| PrcdError::IORead {
                file: self.path.clone(),
                e,
            })?;
        Ok(u32::from_ne_bytes(count))
    }
}

/// Service the PRC interrupt on a dedicated thread for the lifetime of the daemon.
///
/// The thread exits only if the UIO node stops working, after which pending reconfigurations
/// can no longer complete.
pub fn spawn_interrupt_thread(
    mut source: UioInterrupt,
    tracker: Arc<CompletionTracker>,
) -> Result<JoinHandle<()>, PrcdError> {
    std::thread::Builder::new()
        .name("prc-irq".into())
        .spawn(move || {
            info!("Servicing PRC interrupts from {:?}", source.path);
            loop {
                let event = source.unmask().and_then(|_| source.wait());
                match event {
                    Ok(count) => {
                        debug!("PRC interrupt #{count}");
                        if let Err(e) = tracker.handle_irq() {
                            error!("Failed to service PRC interrupt: {e}");
                        }
                    }
                    Err(e) => {
                        error!("PRC interrupt source failed, completions will no longer be seen: {e}");
                        break;
                    }
                }
            }
        })
        .map_err(|e| PrcdError::Internal(format!("failed to spawn interrupt thread: {e}")))
}
