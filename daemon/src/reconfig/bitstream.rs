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

//! Staged bitstream images.
//!
//! A bitstream is staged by copying it from the caller into DMA-capable memory that the PRC can
//! stream from. The [`BitstreamRegistry`] owns every staged image for the lifetime of the daemon:
//! images are immutable once staged and are shared by handle with tiles that load them.
//!
//! DMA memory is obtained from a [`DmaRegion`]. On the target this is a `u-dma-buf` carve-out
//! ([`UdmaBufRegion`]) whose physical base address is published in sysfs. Staged memory is
//! never returned to the region, so the region is a simple bump allocator.

use crate::config::TILE_COUNT;
use crate::error::PrcdError;
use crate::reconfig::tile::TileId;
use crate::system_io::{fs_read, fs_write_bytes_at};
use log::{info, trace};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Longest name that still fits a 32-byte NUL-terminated field.
pub const MAX_NAME_LEN: usize = 31;

/// Alignment of every DMA allocation, in bytes.
const DMA_ALIGN: u64 = 64;

/// A bitstream or driver name, at most [`MAX_NAME_LEN`] bytes, non-empty and without NULs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoundedName(String);

impl BoundedName {
    pub fn new(name: &str) -> Result<Self, PrcdError> {
        if name.is_empty() {
            return Err(PrcdError::Argument("name must not be empty".into()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(PrcdError::Argument(format!(
                "{name:?} is {} bytes long, names are limited to {MAX_NAME_LEN} bytes",
                name.len()
            )));
        }
        if name.contains('\0') {
            return Err(PrcdError::Argument(format!(
                "{name:?} contains a NUL byte"
            )));
        }
        Ok(BoundedName(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BoundedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A block of DMA-capable memory handed out by a [`DmaRegion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaBuffer {
    /// Offset of the block from the start of the region.
    pub offset: u64,
    pub len: usize,
    /// Bus address of the first byte, as seen by the PRC.
    pub phys_addr: u64,
}

/// Memory the PRC can read bitstreams from.
pub trait DmaRegion: Send + Sync {
    /// Reserve `size` bytes.
    ///
    /// # Returns: `Result<DmaBuffer, PrcdError>`
    /// * `Ok(DmaBuffer)` - A block no other allocation overlaps
    /// * `Err(PrcdError::AllocationFailure)` - If the region cannot supply `size` bytes
    fn allocate(&self, size: usize) -> Result<DmaBuffer, PrcdError>;

    /// Copy `data` into a block previously returned by [`DmaRegion::allocate`].
    fn fill(&self, buffer: &DmaBuffer, data: &[u8]) -> Result<(), PrcdError>;
}

/// A `u-dma-buf` carve-out, filled through its character device.
#[derive(Debug)]
pub struct UdmaBufRegion {
    device: PathBuf,
    phys_base: u64,
    capacity: u64,
    next_free: Mutex<u64>,
}

impl UdmaBufRegion {
    /// Open the carve-out described by `sysfs_dir` (`phys_addr` and `size` attributes).
    pub fn open(device: &Path, sysfs_dir: &Path) -> Result<Self, PrcdError> {
        let phys_base = parse_sysfs_number(&sysfs_dir.join("phys_addr"))?;
        let capacity = parse_sysfs_number(&sysfs_dir.join("size"))?;
        info!("DMA region {device:?}: {capacity} bytes at {phys_base:#x}");
        Ok(UdmaBufRegion {
            device: device.to_path_buf(),
            phys_base,
            capacity,
            next_free: Mutex::new(0),
        })
    }
}

/// Parse a sysfs attribute holding either a `0x`-prefixed hex or a decimal number.
fn parse_sysfs_number(path: &Path) -> Result<u64, PrcdError> {
    let contents = fs_read(path)?;
    let trimmed = contents.trim();
    let parsed = match trimmed.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse(),
    };
    parsed.map_err(|e| {
        PrcdError::Internal(format!("{path:?} does not hold a number ({trimmed:?}): {e}"))
    })
}

impl DmaRegion for UdmaBufRegion {
    fn allocate(&self, size: usize) -> Result<DmaBuffer, PrcdError> {
        bump_allocate(&self.next_free, self.capacity, self.phys_base, size)
    }

    fn fill(&self, buffer: &DmaBuffer, data: &[u8]) -> Result<(), PrcdError> {
        fs_write_bytes_at(&self.device, buffer.offset, data)
            .map_err(|e| PrcdError::CopyFault(e.to_string()))
    }
}

/// Hand out the next aligned block of a region that never frees memory.
pub(crate) fn bump_allocate(
    next_free: &Mutex<u64>,
    capacity: u64,
    phys_base: u64,
    size: usize,
) -> Result<DmaBuffer, PrcdError> {
    let failure = |reason: &str| PrcdError::AllocationFailure {
        size,
        reason: reason.to_string(),
    };
    if size == 0 {
        return Err(failure("zero-sized buffers cannot be mapped"));
    }
    let mut next = next_free
        .lock()
        .map_err(|_| failure("allocator lock poisoned"))?;
    let offset = next.next_multiple_of(DMA_ALIGN);
    let end = offset
        .checked_add(size as u64)
        .filter(|end| *end <= capacity)
        .ok_or_else(|| failure(&format!("only {} bytes left", capacity.saturating_sub(offset))))?;
    *next = end;
    trace!("Allocated {size} DMA bytes at offset {offset:#x}");
    Ok(DmaBuffer {
        offset,
        len: size,
        phys_addr: phys_base + offset,
    })
}

/// A staged bitstream. Immutable once created.
#[derive(Debug)]
pub struct BitstreamImage {
    name: BoundedName,
    tile: TileId,
    driver: BoundedName,
    buffer: DmaBuffer,
}

impl BitstreamImage {
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn tile(&self) -> TileId {
        self.tile
    }

    /// Name of the driver template to bind once the image is loaded.
    pub fn driver(&self) -> &str {
        self.driver.as_str()
    }

    pub fn size(&self) -> usize {
        self.buffer.len
    }

    pub fn phys_addr(&self) -> u64 {
        self.buffer.phys_addr
    }
}

pub type ImageHandle = Arc<BitstreamImage>;

#[derive(Debug, Default)]
struct Slots {
    /// Every staged image, per tile, in load order.
    images: [Vec<ImageHandle>; TILE_COUNT],
    /// Names whose data is still being copied into DMA memory.
    staging: [Vec<BoundedName>; TILE_COUNT],
}

/// Holds a name in [`Slots::staging`] until dropped.
struct Reservation<'a> {
    slots: &'a Mutex<Slots>,
    tile: TileId,
    name: BoundedName,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.staging[self.tile.index()].retain(|name| *name != self.name);
    }
}

pub struct BitstreamRegistry {
    region: Arc<dyn DmaRegion>,
    slots: Mutex<Slots>,
}

impl fmt::Debug for BitstreamRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitstreamRegistry")
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl BitstreamRegistry {
    pub fn new(region: Arc<dyn DmaRegion>) -> Self {
        BitstreamRegistry {
            region,
            slots: Mutex::new(Slots::default()),
        }
    }

    fn slots(&self) -> Result<std::sync::MutexGuard<'_, Slots>, PrcdError> {
        self.slots
            .lock()
            .map_err(|_| PrcdError::Internal("bitstream registry lock poisoned".into()))
    }

    /// Copy a bitstream into DMA memory and record it for `tile`.
    ///
    /// The first `size` bytes of `source` are staged. Nothing is recorded unless every step
    /// succeeds, and the caller may drop `source` as soon as this returns. The copy runs without
    /// the registry lock; the name stays reserved meanwhile so a concurrent stage of the same
    /// name is still a duplicate.
    ///
    /// # Returns: `Result<ImageHandle, PrcdError>`
    /// * `Ok(ImageHandle)` - The newly staged image
    /// * `Err(PrcdError::DuplicateBitstream)` - If `tile` already holds an image called `name`
    /// * `Err(PrcdError::AllocationFailure)` - If no DMA buffer of `size` bytes is available
    /// * `Err(PrcdError::CopyFault)` - If `source` is shorter than `size` or the copy fails
    pub fn stage(
        &self,
        tile: TileId,
        name: BoundedName,
        driver: BoundedName,
        size: usize,
        source: &[u8],
    ) -> Result<ImageHandle, PrcdError> {
        let (buffer, reservation) = {
            let mut slots = self.slots()?;
            let taken = slots.images[tile.index()]
                .iter()
                .any(|image| image.name == name)
                || slots.staging[tile.index()].contains(&name);
            if taken {
                return Err(PrcdError::DuplicateBitstream {
                    tile: tile.index(),
                    name: name.to_string(),
                });
            }
            if source.len() < size {
                return Err(PrcdError::CopyFault(format!(
                    "source holds {} bytes but {size} were requested",
                    source.len()
                )));
            }
            let buffer = self.region.allocate(size)?;
            slots.staging[tile.index()].push(name.clone());
            let reservation = Reservation {
                slots: &self.slots,
                tile,
                name: name.clone(),
            };
            (buffer, reservation)
        };

        self.region.fill(&buffer, &source[..size])?;

        let image = Arc::new(BitstreamImage {
            name,
            tile,
            driver,
            buffer,
        });
        info!(
            "Staged {:?} ({size} bytes) for tile {tile} at {:#x}",
            image.name(),
            image.phys_addr()
        );
        self.slots()?.images[tile.index()].push(image.clone());
        drop(reservation);
        Ok(image)
    }

    pub fn find(&self, tile: TileId, name: &str) -> Result<ImageHandle, PrcdError> {
        self.slots()?.images[tile.index()]
            .iter()
            .find(|image| image.name() == name)
            .cloned()
            .ok_or_else(|| PrcdError::NotFound {
                tile: tile.index(),
                name: name.to_string(),
            })
    }

    /// Images staged for `tile`, oldest first.
    pub fn list(&self, tile: TileId) -> Result<Vec<ImageHandle>, PrcdError> {
        Ok(self.slots()?.images[tile.index()].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HeapDmaRegion;
    use googletest::prelude::*;
    use rstest::*;

    fn name(raw: &str) -> BoundedName {
        BoundedName::new(raw).unwrap()
    }

    fn tile(raw: i64) -> TileId {
        TileId::new(raw).unwrap()
    }

    #[fixture]
    fn region() -> Arc<HeapDmaRegion> {
        Arc::new(HeapDmaRegion::new(0x1000, 0x3000_0000))
    }

    #[gtest]
    #[rstest]
    #[case::empty("", "must not be empty")]
    #[case::too_long("abcdefghijklmnopqrstuvwxyz0123456", "limited to 31 bytes")]
    #[case::nul("fir\0v1", "NUL")]
    fn rejects_bad_names(#[case] raw: &str, #[case] message: &str) {
        expect_that!(
            BoundedName::new(raw),
            err(displays_as(contains_substring(message)))
        );
    }

    #[gtest]
    fn accepts_a_name_of_exactly_31_bytes() {
        let raw = "a".repeat(MAX_NAME_LEN);
        expect_that!(BoundedName::new(&raw).map(|n| n.to_string()), ok(eq(&raw)));
    }

    #[gtest]
    #[rstest]
    fn staged_image_is_copied_and_found(region: Arc<HeapDmaRegion>) {
        let registry = BitstreamRegistry::new(region.clone());
        let source = vec![0xA5u8; 48];

        let image = registry
            .stage(tile(2), name("fir_v1"), name("fir_drv"), 48, &source)
            .unwrap();
        drop(source);

        expect_that!(image.size(), eq(48usize));
        expect_that!(image.phys_addr(), eq(0x3000_0000u64));
        expect_that!(image.driver(), eq("fir_drv"));
        assert_eq!(
            region.contents(&DmaBuffer { offset: 0, len: 48, phys_addr: 0 }),
            vec![0xA5u8; 48]
        );
        let found = registry.find(tile(2), "fir_v1").unwrap();
        expect_that!(Arc::ptr_eq(&found, &image), eq(true));
    }

    #[gtest]
    #[rstest]
    fn duplicate_staging_keeps_the_original(region: Arc<HeapDmaRegion>) {
        let registry = BitstreamRegistry::new(region.clone());
        let original = registry
            .stage(tile(2), name("fir_v1"), name("fir_drv"), 16, &[1u8; 16])
            .unwrap();

        let second = registry.stage(tile(2), name("fir_v1"), name("mac_drv"), 16, &[2u8; 16]);

        expect_that!(
            second,
            err(displays_as(contains_substring("PrcdError::DuplicateBitstream")))
        );
        let found = registry.find(tile(2), "fir_v1").unwrap();
        expect_that!(Arc::ptr_eq(&found, &original), eq(true));
        expect_that!(found.driver(), eq("fir_drv"));
        assert_eq!(
            region.contents(&DmaBuffer { offset: 0, len: 16, phys_addr: 0 }),
            vec![1u8; 16]
        );
        expect_that!(registry.list(tile(2)).unwrap().len(), eq(1usize));
    }

    #[gtest]
    #[rstest]
    fn same_name_on_another_tile_is_distinct(region: Arc<HeapDmaRegion>) {
        let registry = BitstreamRegistry::new(region);
        registry
            .stage(tile(2), name("fir_v1"), name("fir_drv"), 8, &[0u8; 8])
            .unwrap();

        expect_that!(
            registry.stage(tile(4), name("fir_v1"), name("fir_drv"), 8, &[0u8; 8]),
            ok(anything())
        );
        expect_that!(
            registry.find(tile(3), "fir_v1"),
            err(displays_as(contains_substring("PrcdError::NotFound")))
        );
    }

    #[gtest]
    #[rstest]
    fn list_preserves_load_order(region: Arc<HeapDmaRegion>) {
        let registry = BitstreamRegistry::new(region);
        for raw in ["mac_v1", "fir_v1", "fir_v2"] {
            registry
                .stage(tile(4), name(raw), name("fir_drv"), 4, &[0u8; 4])
                .unwrap();
        }

        let names: Vec<String> = registry
            .list(tile(4))
            .unwrap()
            .iter()
            .map(|image| image.name().to_string())
            .collect();

        expect_that!(names, elements_are![eq("mac_v1"), eq("fir_v1"), eq("fir_v2")]);
        expect_that!(registry.list(tile(0)).unwrap(), is_empty());
    }

    /// Lets a test hold a copy in progress.
    struct GatedRegion {
        inner: HeapDmaRegion,
        entered: std::sync::mpsc::SyncSender<()>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl DmaRegion for GatedRegion {
        fn allocate(&self, size: usize) -> Result<DmaBuffer, PrcdError> {
            self.inner.allocate(size)
        }

        fn fill(&self, buffer: &DmaBuffer, data: &[u8]) -> Result<(), PrcdError> {
            self.entered.send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            self.inner.fill(buffer, data)
        }
    }

    #[gtest]
    fn copy_runs_without_blocking_the_registry() {
        let (entered_tx, entered_rx) = std::sync::mpsc::sync_channel(1);
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let registry = Arc::new(BitstreamRegistry::new(Arc::new(GatedRegion {
            inner: HeapDmaRegion::new(0x100, 0x3000_0000),
            entered: entered_tx,
            release: Mutex::new(release_rx),
        })));
        let staging = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                registry.stage(tile(2), name("fir_v1"), name("fir_drv"), 8, &[1u8; 8])
            })
        };
        entered_rx.recv().unwrap();

        expect_that!(registry.list(tile(2)).unwrap(), is_empty());
        expect_that!(
            registry.stage(tile(2), name("fir_v1"), name("mac_drv"), 8, &[2u8; 8]),
            err(displays_as(contains_substring("PrcdError::DuplicateBitstream")))
        );
        release_tx.send(()).unwrap();

        let image = staging.join().unwrap().unwrap();
        expect_that!(image.driver(), eq("fir_drv"));
        expect_that!(registry.list(tile(2)).unwrap().len(), eq(1usize));
    }

    #[gtest]
    #[rstest]
    fn short_source_is_a_copy_fault(region: Arc<HeapDmaRegion>) {
        let registry = BitstreamRegistry::new(region);

        let result = registry.stage(tile(1), name("fir_v1"), name("fir_drv"), 64, &[0u8; 10]);

        expect_that!(result, err(displays_as(contains_substring("PrcdError::CopyFault"))));
        expect_that!(registry.list(tile(1)).unwrap(), is_empty());
    }

    #[gtest]
    #[rstest]
    fn exhausted_region_is_an_allocation_failure(region: Arc<HeapDmaRegion>) {
        let registry = BitstreamRegistry::new(region);
        registry
            .stage(tile(0), name("big"), name("fir_drv"), 0xF00, &[0u8; 0xF00])
            .unwrap();

        let result = registry.stage(tile(0), name("more"), name("fir_drv"), 0x200, &[0u8; 0x200]);

        expect_that!(
            result,
            err(displays_as(contains_substring("PrcdError::AllocationFailure")))
        );
    }

    #[gtest]
    fn allocations_are_aligned_and_disjoint() {
        let next = Mutex::new(0);
        let first = bump_allocate(&next, 0x100, 0x1000, 10).unwrap();
        let second = bump_allocate(&next, 0x100, 0x1000, 10).unwrap();

        expect_that!(first.phys_addr, eq(0x1000u64));
        expect_that!(second.offset, eq(DMA_ALIGN));
        expect_that!(second.phys_addr, eq(0x1000 + DMA_ALIGN));
        expect_that!(
            bump_allocate(&next, 0x100, 0x1000, 0),
            err(displays_as(contains_substring("zero-sized")))
        );
    }

    #[gtest]
    fn udmabuf_region_reads_its_layout_from_sysfs() {
        let dir = std::env::temp_dir().join(format!("prcd-udmabuf-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("phys_addr"), "0x70000000\n").unwrap();
        std::fs::write(dir.join("size"), "4096\n").unwrap();
        let device = dir.join("udmabuf0");
        std::fs::write(&device, vec![0u8; 4096]).unwrap();

        let region = UdmaBufRegion::open(&device, &dir).unwrap();
        let buffer = region.allocate(4).unwrap();
        region.fill(&buffer, &[9, 8, 7, 6]).unwrap();

        expect_that!(buffer.phys_addr, eq(0x7000_0000u64));
        assert_eq!(std::fs::read(&device).unwrap()[..4], [9u8, 8, 7, 6]);
        expect_that!(
            region.allocate(4096),
            err(displays_as(contains_substring("PrcdError::AllocationFailure")))
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
