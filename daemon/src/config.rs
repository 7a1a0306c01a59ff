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

//! Daemon configuration.
//!
//! The SoC layout is fixed at build time (tile count, register offsets), while the locations of
//! the device nodes used to reach the hardware can be overridden in `/etc/prcd/config.toml`:
//!
//! ```toml
//! [defaults]
//! mem_device = "/dev/mem"
//! apb_base = 0x60000000
//! irq_device = "/dev/uio0"
//! dma_device = "/dev/udmabuf0"
//! dma_sysfs_dir = "/sys/class/u-dma-buf/udmabuf0"
//! platform_bus_dir = "/sys/bus/platform"
//! completion_timeout_ms = 5000
//! hotswap_queue_depth = 5
//! tile_nodes = ["", "", "eb_122", "", "eb_056"]
//! ```
//!
//! Every key is optional. If the file is missing or cannot be parsed the hardcoded defaults
//! below are used and a warning is logged.

use crate::error::PrcdError;
use crate::reconfig::tile::TileId;
use crate::system_io::fs_read;
use log::{trace, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Number of reconfigurable tiles in the SoC. Tile ids are indices in `0..TILE_COUNT`.
pub const TILE_COUNT: usize = 5;

/// Offset of the PRC register window from the APB base.
pub const PRC_BASE_ADDR_OFFSET: u64 = 0xE400;
/// Offset of tile 0's decoupler (monitor) register from the APB base.
pub const MONITOR_BASE_ADDR: u64 = 0x90180;
/// Distance between two consecutive tiles' decoupler registers.
pub const DECOUPLER_STRIDE: u64 = 0x200;

pub static CONFIG_FILE_PATH: &str = "/etc/prcd/config.toml";

// These are hardcoded backups used when the config file is absent or broken
pub static MEM_DEVICE: &str = "/dev/mem";
pub const APB_BASE_ADDR: u64 = 0x6000_0000;
pub static IRQ_DEVICE: &str = "/dev/uio0";
pub static DMA_DEVICE: &str = "/dev/udmabuf0";
pub static DMA_SYSFS_DIR: &str = "/sys/class/u-dma-buf/udmabuf0";
pub static PLATFORM_BUS_DIR: &str = "/sys/bus/platform";
pub const HOTSWAP_QUEUE_DEPTH: usize = TILE_COUNT;
pub static TILE_NODES: [&str; TILE_COUNT] = ["", "", "eb_122", "", "eb_056"];

#[derive(Debug, Clone, PartialEq)]
pub struct SystemConfig {
    pub mem_device: PathBuf,
    pub apb_base: u64,
    pub irq_device: PathBuf,
    pub dma_device: PathBuf,
    pub dma_sysfs_dir: PathBuf,
    pub platform_bus_dir: PathBuf,
    /// `None` means a reconfiguration waits for its completion interrupt forever.
    pub completion_timeout: Option<Duration>,
    pub hotswap_queue_depth: usize,
    /// Device-tree node name of each tile, used to build the tile-local driver match table.
    pub tile_nodes: [String; TILE_COUNT],
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            mem_device: PathBuf::from(MEM_DEVICE),
            apb_base: APB_BASE_ADDR,
            irq_device: PathBuf::from(IRQ_DEVICE),
            dma_device: PathBuf::from(DMA_DEVICE),
            dma_sysfs_dir: PathBuf::from(DMA_SYSFS_DIR),
            platform_bus_dir: PathBuf::from(PLATFORM_BUS_DIR),
            completion_timeout: None,
            hotswap_queue_depth: HOTSWAP_QUEUE_DEPTH,
            tile_nodes: TILE_NODES.map(String::from),
        }
    }
}

impl SystemConfig {
    /// Physical address of the PRC control-register window.
    pub fn prc_base(&self) -> u64 {
        self.apb_base + PRC_BASE_ADDR_OFFSET
    }

    /// Physical address of a tile's decoupler register.
    pub fn decoupler_addr(&self, tile: TileId) -> u64 {
        self.apb_base + MONITOR_BASE_ADDR + tile.index() as u64 * DECOUPLER_STRIDE
    }
}

/// This is the top level struct which holds all sections
#[derive(Debug, Deserialize)]
struct TomlConfig {
    defaults: Option<DefaultsToml>,
}

/// This is the "defaults" struct
#[derive(Debug, Deserialize)]
struct DefaultsToml {
    mem_device: Option<String>,
    apb_base: Option<u64>,
    irq_device: Option<String>,
    dma_device: Option<String>,
    dma_sysfs_dir: Option<String>,
    platform_bus_dir: Option<String>,
    completion_timeout_ms: Option<u64>,
    hotswap_queue_depth: Option<usize>,
    tile_nodes: Option<Vec<String>>,
}

impl TryFrom<DefaultsToml> for SystemConfig {
    type Error = PrcdError;

    fn try_from(value: DefaultsToml) -> Result<Self, Self::Error> {
        trace!("User provided config: {value:?}");
        let fallback = SystemConfig::default();
        let tile_nodes = match value.tile_nodes {
            None => fallback.tile_nodes,
            Some(nodes) => {
                let found = nodes.len();
                nodes.try_into().map_err(|_| {
                    PrcdError::Argument(format!(
                        "tile_nodes must name exactly {TILE_COUNT} tiles, found {found}"
                    ))
                })?
            }
        };
        if value.hotswap_queue_depth == Some(0) {
            return Err(PrcdError::Argument(
                "hotswap_queue_depth must be at least 1".into(),
            ));
        }
        Ok(SystemConfig {
            mem_device: value.mem_device.map_or(fallback.mem_device, PathBuf::from),
            apb_base: value.apb_base.unwrap_or(fallback.apb_base),
            irq_device: value.irq_device.map_or(fallback.irq_device, PathBuf::from),
            dma_device: value.dma_device.map_or(fallback.dma_device, PathBuf::from),
            dma_sysfs_dir: value
                .dma_sysfs_dir
                .map_or(fallback.dma_sysfs_dir, PathBuf::from),
            platform_bus_dir: value
                .platform_bus_dir
                .map_or(fallback.platform_bus_dir, PathBuf::from),
            completion_timeout: value.completion_timeout_ms.map(Duration::from_millis),
            hotswap_queue_depth: value
                .hotswap_queue_depth
                .unwrap_or(fallback.hotswap_queue_depth),
            tile_nodes,
        })
    }
}

fn config_from_str(toml_string: &str, source: &Path) -> Result<SystemConfig, PrcdError> {
    let config: TomlConfig = toml::from_str(toml_string).map_err(|e| PrcdError::TomlDe {
        file: source.to_path_buf(),
        e,
    })?;
    match config.defaults {
        Some(defaults_toml) => defaults_toml.try_into(),
        None => Err(PrcdError::Internal(
            "config file did not contain a `[defaults]` section.".to_string(),
        )),
    }
}

fn config_from_file(config_path: &Path) -> Result<SystemConfig, PrcdError> {
    if !config_path.is_file() {
        return Err(PrcdError::Internal(format!(
            "Config file not found in {config_path:?}."
        )));
    }
    let toml_string = fs_read(config_path)?;
    config_from_str(&toml_string, config_path)
}

fn init_system_config() -> SystemConfig {
    match config_from_file(Path::new(CONFIG_FILE_PATH)) {
        Ok(config) => {
            trace!("Successfully loaded config: {config:?}");
            config
        }
        Err(e) => {
            warn!("Using hardcoded defaults because failed to load config: {e}");
            SystemConfig::default()
        }
    }
}

static CONFIG: OnceLock<SystemConfig> = OnceLock::new();

/// The daemon-wide configuration, read from disk on first access.
pub fn system_config() -> &'static SystemConfig {
    CONFIG.get_or_init(init_system_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    fn missing_keys_fall_back_to_defaults() {
        let config = config_from_str(
            "[defaults]\nirq_device = \"/dev/uio3\"\n",
            Path::new("test.toml"),
        );
        assert_that!(
            config,
            ok(eq(&SystemConfig {
                irq_device: PathBuf::from("/dev/uio3"),
                ..SystemConfig::default()
            }))
        );
    }

    #[gtest]
    fn timeout_is_only_set_when_configured() {
        let config = config_from_str(
            "[defaults]\ncompletion_timeout_ms = 250\napb_base = 0x40000000\n",
            Path::new("test.toml"),
        )
        .unwrap();
        expect_that!(config.completion_timeout, some(eq(Duration::from_millis(250))));
        expect_that!(config.prc_base(), eq(0x4000_E400u64));
        expect_that!(SystemConfig::default().completion_timeout, none());
    }

    #[gtest]
    fn decoupler_addresses_follow_the_monitor_stride() {
        let config = SystemConfig::default();
        let tile = TileId::new(2).unwrap();
        expect_that!(config.decoupler_addr(tile), eq(0x6000_0000u64 + 0x90180 + 0x400));
    }

    #[gtest]
    #[rstest]
    #[case::no_defaults("[other]\nkey = 1\n", "[defaults]")]
    #[case::short_tile_list("[defaults]\ntile_nodes = [\"a\", \"b\"]\n", "exactly 5 tiles")]
    #[case::zero_queue("[defaults]\nhotswap_queue_depth = 0\n", "at least 1")]
    #[case::not_toml("[defaults\n", "PrcdError::TomlDe")]
    fn rejects_bad_config(#[case] toml_string: &str, #[case] message: &str) {
        let config = config_from_str(toml_string, Path::new("test.toml"));
        assert_that!(config, err(displays_as(contains_substring(message))));
    }
}
