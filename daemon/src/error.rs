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

use log::error;
use std::path::PathBuf;
use std::time::Duration;
use zbus::fdo;

#[derive(Debug, thiserror::Error)]
pub enum PrcdError {
    #[error("PrcdError::DuplicateBitstream: tile {tile} already holds a bitstream named {name:?}")]
    DuplicateBitstream { tile: usize, name: String },
    #[error("PrcdError::NotFound: no bitstream named {name:?} is staged for tile {tile}")]
    NotFound { tile: usize, name: String },
    #[error("PrcdError::AllocationFailure: could not obtain a {size} byte DMA buffer: {reason}")]
    AllocationFailure { size: usize, reason: String },
    #[error("PrcdError::CopyFault: {0}")]
    CopyFault(String),
    #[error("PrcdError::StopFailed: PRC did not shut down, status read back as {status:#010x}")]
    StopFailed { status: u32 },
    #[error("PrcdError::StartFailed: PRC did not leave shutdown, status read back as {status:#010x}")]
    StartFailed { status: u32 },
    #[error(
        "PrcdError::DecoupleVerifyFailed: tile {tile} decoupler read back {read} after writing {written}"
    )]
    DecoupleVerifyFailed { tile: usize, written: u32, read: u32 },
    #[error("PrcdError::NoDriverMatch: {0}")]
    NoDriverMatch(String),
    #[error("PrcdError::IrqTimeout: tile {tile} did not signal completion within {timeout:?}")]
    IrqTimeout { tile: usize, timeout: Duration },
    #[error("PrcdError::InvalidTile: {tile} is not a reconfigurable tile id")]
    InvalidTile { tile: i64 },
    #[error("PrcdError::Argument: {0}")]
    Argument(String),
    #[error("PrcdError::IORead: An IO error occurred when reading from {file:?}: {e}")]
    IORead { file: PathBuf, e: std::io::Error },
    #[error("PrcdError::IOWrite: An IO error occurred when writing {data:?} to {file:?}: {e}")]
    IOWrite {
        data: String,
        file: PathBuf,
        e: std::io::Error,
    },
    #[error("PrcdError::IOReadDir: An IO error occurred when reading directory {dir:?}: {e}")]
    IOReadDir { dir: PathBuf, e: std::io::Error },
    #[error("PrcdError::MapFailed: Failed to map {file:?} at {base:#x}: {e}")]
    MapFailed {
        file: PathBuf,
        base: u64,
        e: std::io::Error,
    },
    #[error("PrcdError::TomlDe: Failed to parse {file:?}: {e}")]
    TomlDe { file: PathBuf, e: toml::de::Error },
    #[error("PrcdError::Internal: An Internal error occurred: {0}")]
    Internal(String),
}

impl From<PrcdError> for fdo::Error {
    fn from(err: PrcdError) -> Self {
        error!("{err}");
        match err {
            PrcdError::Argument(..) => fdo::Error::InvalidArgs(err.to_string()),
            PrcdError::InvalidTile { .. } => fdo::Error::InvalidArgs(err.to_string()),
            PrcdError::NotFound { .. } => fdo::Error::FileNotFound(err.to_string()),
            PrcdError::DuplicateBitstream { .. } => fdo::Error::FileExists(err.to_string()),
            PrcdError::AllocationFailure { .. } => fdo::Error::NoMemory(err.to_string()),
            PrcdError::IrqTimeout { .. } => fdo::Error::TimedOut(err.to_string()),
            PrcdError::IORead { .. } => fdo::Error::IOError(err.to_string()),
            PrcdError::IOWrite { .. } => fdo::Error::IOError(err.to_string()),
            PrcdError::IOReadDir { .. } => fdo::Error::IOError(err.to_string()),
            PrcdError::MapFailed { .. } => fdo::Error::IOError(err.to_string()),
            _ => fdo::Error::Failed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod test_fdo_conversion {
    use super::PrcdError;
    use googletest::prelude::*;
    use rstest::*;
    use zbus::fdo;

    #[gtest]
    #[rstest]
    #[case::argument(PrcdError::Argument("bad".into()), "InvalidArgs")]
    #[case::invalid_tile(PrcdError::InvalidTile { tile: 9 }, "InvalidArgs")]
    #[case::not_found(PrcdError::NotFound { tile: 2, name: "fir_v1".into() }, "FileNotFound")]
    #[case::duplicate(
        PrcdError::DuplicateBitstream { tile: 2, name: "fir_v1".into() },
        "FileExists"
    )]
    #[case::allocation(
        PrcdError::AllocationFailure { size: 32, reason: "full".into() },
        "NoMemory"
    )]
    #[case::start_failed(PrcdError::StartFailed { status: 0x80 }, "Failed")]
    fn maps_to_dbus_error(#[case] err: PrcdError, #[case] expected: &str) {
        let message = err.to_string();
        let converted = fdo::Error::from(err);
        expect_that!(format!("{converted:?}"), starts_with(expected));
        expect_that!(converted.to_string(), contains_substring(message));
    }
}
