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

//! The partial reconfiguration core.
//!
//! A request to put a bitstream on a tile flows through these modules, leaf-first:
//!
//! - [`bitstream`] - Staged bitstream images and the per-tile registry that owns their DMA memory
//! - [`tile`] - The fixed arena of reconfigurable tiles and their per-tile state
//! - [`engine`] - The PRC register sequence (stop, arm, start, trigger) under the global lock
//! - [`completion`] - The interrupt handler that finishes a transaction and wakes its requester
//! - [`tile_manager`] - Driver templates and the asynchronous driver hot-swap
//! - [`controller`] - The load/reconfigure/decouple operations exposed over DBus

pub mod bitstream;
pub mod completion;
pub mod controller;
pub mod engine;
pub mod tile;
pub mod tile_manager;
