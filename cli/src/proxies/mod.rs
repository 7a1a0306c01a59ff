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

//! DBus proxy interfaces for the prcd daemon.
//!
//! # DBus Service Information
//!
//! - **Service Name**: `com.canonical.prcd`
//! - **Control Interface**: `com.canonical.prcd.control` at `/com/canonical/prcd/control`
//! - **Status Interface**: `com.canonical.prcd.status` at `/com/canonical/prcd/status`
//!
//! # Modules
//!
//! - [`control_proxy`] - Bitstream loads, reconfiguration and manual decoupling
//! - [`status_proxy`] - Engine, tile, bitstream and driver queries

pub mod control_proxy;
pub mod status_proxy;
