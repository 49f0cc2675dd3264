//! MiniFAT (Mini File Allocation Table) and mini stream handling
//!
//! The MiniFAT is used for small streams (below the mini stream cutoff) to
//! avoid wasting space in regular sectors. Small streams are stored in the
//! mini stream, and the MiniFAT tracks mini sector allocation.
//!
//! - Mini sectors are 64 bytes each
//! - The mini stream itself is a regular FAT chain starting at the root entry's
//!   start sector; its size is the root entry's stream size
//! - The MiniFAT is stored in regular sectors but tracks mini sectors

use super::consts::*;
use super::error::{CfbError, CfbResult};
use super::fat::{AllocationTable, follow_chain};
use super::header::Header;
use super::store::SectorStore;
use crate::common::binary::read_u32_le;
use log::{debug, trace, warn};
use std::io::{Read, Seek, Write};

/// Location of the mini stream as recorded in the root entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiniStreamLocation {
    /// First regular sector of the mini stream, or ENDOFCHAIN
    pub start: u32,
    /// Bytes of the mini stream in use
    pub size: u64,
}

/// In-memory mirror of the MiniFAT and the mini stream's sector chain.
#[derive(Debug, Clone, Default)]
pub struct MiniAllocationTable {
    /// MiniFAT entries, one per mini sector
    entries: Vec<u32>,
    /// Regular sectors holding the MiniFAT
    sectors: Vec<u32>,
    /// Regular sectors holding the mini stream
    stream_sectors: Vec<u32>,
    /// Number of entries per MiniFAT sector
    entries_per_sector: usize,
    /// No free entry exists below this index
    free_hint: usize,
}

impl MiniAllocationTable {
    /// Load the MiniFAT chain and the mini stream chain.
    pub(crate) fn load<F: Read + Seek>(
        header: &Header,
        fat: &AllocationTable,
        store: &mut SectorStore<F>,
        ministream_start: u32,
    ) -> CfbResult<Self> {
        let entries_per_sector = store.sector_size() / 4;

        let sectors = if is_unset(header.first_minifat_sector) {
            Vec::new()
        } else {
            fat.chain(header.first_minifat_sector)?
        };
        if sectors.len() != header.num_minifat_sectors as usize {
            warn!(
                target: store.log_target(),
                "MiniFAT chain has {} sectors, header declares {}",
                sectors.len(),
                header.num_minifat_sectors
            );
        }

        let mut entries = Vec::with_capacity(sectors.len() * entries_per_sector);
        for &sector in &sectors {
            let data = store.read_sector(sector)?;
            for i in 0..entries_per_sector {
                entries.push(read_u32_le(&data, i * 4)?);
            }
        }

        let stream_sectors = if is_unset(ministream_start) {
            Vec::new()
        } else {
            fat.chain(ministream_start)?
        };

        Ok(Self {
            entries,
            sectors,
            stream_sectors,
            entries_per_sector,
            free_hint: 0,
        })
    }

    /// Get the MiniFAT entries
    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// Regular sectors holding the MiniFAT
    pub fn sectors(&self) -> &[u32] {
        &self.sectors
    }

    /// Regular sectors holding the mini stream
    pub fn stream_sectors(&self) -> &[u32] {
        &self.stream_sectors
    }

    /// Follow a mini sector chain from `start` to ENDOFCHAIN.
    pub fn chain(&self, start: u32) -> CfbResult<Vec<u32>> {
        follow_chain(&self.entries, start, "MiniFAT")
    }

    /// Absolute byte offset of a mini sector inside the store.
    pub(crate) fn mini_sector_offset<F>(&self, store: &SectorStore<F>, index: u32) -> CfbResult<u64> {
        let position = index as usize * MINI_SECTOR_SIZE;
        let sector_size = store.sector_size();
        let sector = self
            .stream_sectors
            .get(position / sector_size)
            .ok_or_else(|| {
                CfbError::ChainIntegrity(format!(
                    "mini sector {index} lies past the end of the mini stream"
                ))
            })?;
        Ok(store.sector_offset(*sector) + (position % sector_size) as u64)
    }

    /// Allocate one mini sector.
    ///
    /// Creates the mini stream and the MiniFAT on first use, extends the MiniFAT
    /// and the mini stream when full, zero-fills the new mini sector and links
    /// `prev` to it. `ministream` is updated with the new mini stream extent; the
    /// caller persists it into the root entry.
    pub(crate) fn allocate_mini_sector<F: Read + Write + Seek>(
        &mut self,
        header: &mut Header,
        fat: &mut AllocationTable,
        store: &mut SectorStore<F>,
        ministream: &mut MiniStreamLocation,
        prev: Option<u32>,
    ) -> CfbResult<u32> {
        if self.stream_sectors.is_empty() {
            let first = fat.allocate_sector(header, store, None)?;
            self.stream_sectors.push(first);
            ministream.start = first;
            ministream.size = 0;
            debug!(target: store.log_target(), "started mini stream at sector {first}");
        }

        if self.sectors.is_empty() {
            let first = fat.allocate_sector(header, store, None)?;
            self.append_minifat_sector(store, first)?;
            header.first_minifat_sector = first;
            header.num_minifat_sectors = 1;
            header.write_to(store)?;
            debug!(target: store.log_target(), "started MiniFAT at sector {first}");
        }

        let index = match self.first_free() {
            Some(index) => index,
            None => {
                let index = self.entries.len() as u32;
                let tail = self.sectors.last().copied();
                let sector = fat.allocate_sector(header, store, tail)?;
                self.append_minifat_sector(store, sector)?;
                header.num_minifat_sectors += 1;
                header.write_to(store)?;
                self.free_hint = index as usize + 1;
                debug!(
                    target: store.log_target(),
                    "extended MiniFAT with sector {sector} ({} sectors)",
                    self.sectors.len()
                );
                index
            },
        };
        self.set_entry(store, index, ENDOFCHAIN)?;

        let end = (index as usize + 1) * MINI_SECTOR_SIZE;
        while end > self.stream_sectors.len() * store.sector_size() {
            let tail = self.stream_sectors.last().copied();
            let sector = fat.allocate_sector(header, store, tail)?;
            self.stream_sectors.push(sector);
            trace!(target: store.log_target(), "extended mini stream with sector {sector}");
        }

        let offset = self.mini_sector_offset(store, index)?;
        store.write_at(offset, &[0u8; MINI_SECTOR_SIZE])?;
        ministream.size = ministream.size.max(end as u64);

        if let Some(prev) = prev {
            self.set_entry(store, prev, index)?;
        }

        trace!(target: store.log_target(), "allocated mini sector {index} after {prev:?}");
        Ok(index)
    }

    fn first_free(&mut self) -> Option<u32> {
        let offset = self.entries[self.free_hint..]
            .iter()
            .position(|&entry| entry == FREESECT)?;
        let index = self.free_hint + offset;
        self.free_hint = index + 1;
        Some(index as u32)
    }

    /// Initialize a freshly allocated regular sector as an all-FREESECT MiniFAT sector.
    fn append_minifat_sector<F: Write + Seek>(
        &mut self,
        store: &mut SectorStore<F>,
        sector: u32,
    ) -> CfbResult<()> {
        let data = vec![0xFFu8; store.sector_size()];
        store.write_sector(sector, &data)?;
        self.sectors.push(sector);
        self.entries
            .resize(self.entries.len() + self.entries_per_sector, FREESECT);
        Ok(())
    }

    fn set_entry<F: Write + Seek>(
        &mut self,
        store: &mut SectorStore<F>,
        index: u32,
        value: u32,
    ) -> CfbResult<()> {
        let position = index as usize;
        let sector = *self
            .sectors
            .get(position / self.entries_per_sector)
            .ok_or_else(|| {
                CfbError::ChainIntegrity(format!("mini sector {index} is outside the MiniFAT"))
            })?;
        let offset =
            store.sector_offset(sector) + ((position % self.entries_per_sector) * 4) as u64;
        store.write_u32_at(offset, value)?;
        self.entries[position] = value;
        Ok(())
    }
}

/// ENDOFCHAIN and FREESECT both mean "no chain yet".
fn is_unset(sector: u32) -> bool {
    sector == ENDOFCHAIN || sector == FREESECT
}
