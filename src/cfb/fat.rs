//! FAT (File Allocation Table) and DIFAT handling
//!
//! The FAT maps sector numbers to the next sector in a chain, enabling
//! variable-length streams to be stored in the compound file.
//!
//! # Implementation Notes
//!
//! - Regular sectors use positive chain values
//! - FAT sectors are marked with FATSECT (0xFFFFFFFD)
//! - DIFAT sectors are marked with DIFSECT (0xFFFFFFFC)
//! - End of chain is marked with ENDOFCHAIN (0xFFFFFFFE)
//! - Free sectors are marked with FREESECT (0xFFFFFFFF)
//!
//! The locations of the FAT sectors themselves are listed by the DIFAT: the
//! first 109 inline in the header, the rest in chained DIFAT sectors whose last
//! slot points at the next DIFAT sector.

use super::consts::*;
use super::error::{CfbError, CfbResult};
use super::header::Header;
use super::store::SectorStore;
use crate::common::binary::{read_u32_le, write_u32_le};
use fixedbitset::FixedBitSet;
use log::{debug, trace};
use std::io::{Read, Seek, Write};

/// In-memory mirror of the FAT and DIFAT of an open container.
///
/// Every mutation is written through to the store immediately.
#[derive(Debug, Clone)]
pub struct AllocationTable {
    /// FAT entries, one per sector ID covered by the FAT sectors
    entries: Vec<u32>,
    /// FAT sector IDs in DIFAT order
    fat_sectors: Vec<u32>,
    /// DIFAT sector chain
    difat_sectors: Vec<u32>,
    /// Number of entries per FAT sector
    entries_per_sector: usize,
    /// No free entry exists below this index
    free_hint: usize,
}

impl AllocationTable {
    /// Resolve the full list of FAT sector IDs.
    ///
    /// Returns the FAT sector IDs and the DIFAT sector chain that holds the
    /// entries past the 109 inline ones.
    pub(crate) fn resolve_difat<F: Read + Seek>(
        header: &Header,
        store: &mut SectorStore<F>,
    ) -> CfbResult<(Vec<u32>, Vec<u32>)> {
        let wanted = header.num_fat_sectors as usize;
        let mut fat_sectors: Vec<u32> = header
            .difat
            .iter()
            .copied()
            .take_while(|&sector| sector != FREESECT && sector != ENDOFCHAIN)
            .take(wanted)
            .collect();

        let mut difat_sectors = Vec::new();
        let slots = store.sector_size() / 4 - 1; // last slot links to the next DIFAT sector
        let mut current = header.first_difat_sector;
        while current != ENDOFCHAIN && current != FREESECT && fat_sectors.len() < wanted {
            if current > MAXREGSECT || difat_sectors.contains(&current) {
                return Err(CfbError::ChainIntegrity(format!(
                    "DIFAT chain revisits or leaves the sector space at {current:#X}"
                )));
            }
            if difat_sectors.len() as u32 >= header.num_difat_sectors {
                return Err(CfbError::ChainIntegrity(format!(
                    "DIFAT chain is longer than the {} sectors declared",
                    header.num_difat_sectors
                )));
            }
            difat_sectors.push(current);

            let data = store.read_sector(current)?;
            for slot in 0..slots {
                let sector = read_u32_le(&data, slot * 4)?;
                if sector == FREESECT || sector == ENDOFCHAIN || fat_sectors.len() >= wanted {
                    break;
                }
                fat_sectors.push(sector);
            }
            current = read_u32_le(&data, slots * 4)?;
        }

        if fat_sectors.len() != wanted {
            return Err(CfbError::ChainIntegrity(format!(
                "header declares {wanted} FAT sectors, DIFAT lists {}",
                fat_sectors.len()
            )));
        }
        Ok((fat_sectors, difat_sectors))
    }

    /// Load the whole FAT by reading every sector named in the DIFAT.
    pub(crate) fn load<F: Read + Seek>(
        header: &Header,
        store: &mut SectorStore<F>,
    ) -> CfbResult<Self> {
        let (fat_sectors, difat_sectors) = Self::resolve_difat(header, store)?;
        let entries_per_sector = store.sector_size() / 4;

        let mut entries = Vec::with_capacity(fat_sectors.len() * entries_per_sector);
        for &sector in &fat_sectors {
            let data = store.read_sector(sector)?;
            for i in 0..entries_per_sector {
                entries.push(read_u32_le(&data, i * 4)?);
            }
        }

        debug!(
            target: store.log_target(),
            "loaded FAT: {} sectors, {} entries, {} DIFAT sectors",
            fat_sectors.len(),
            entries.len(),
            difat_sectors.len()
        );

        Ok(Self {
            entries,
            fat_sectors,
            difat_sectors,
            entries_per_sector,
            free_hint: 0,
        })
    }

    /// Get the FAT entries
    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// FAT sector IDs in DIFAT order
    pub fn fat_sectors(&self) -> &[u32] {
        &self.fat_sectors
    }

    /// DIFAT sector chain
    pub fn difat_sectors(&self) -> &[u32] {
        &self.difat_sectors
    }

    /// Next sector after `sector`, or a marker.
    pub fn next(&self, sector: u32) -> CfbResult<u32> {
        self.entries.get(sector as usize).copied().ok_or_else(|| {
            CfbError::ChainIntegrity(format!("sector {sector:#X} is outside the FAT"))
        })
    }

    /// Follow a chain from `start` to ENDOFCHAIN.
    ///
    /// Fails on sectors outside the FAT, markers inside the chain, and cycles.
    pub fn chain(&self, start: u32) -> CfbResult<Vec<u32>> {
        follow_chain(&self.entries, start, "FAT")
    }

    /// Allocate one sector.
    ///
    /// The first free sector is marked ENDOFCHAIN and zero-filled. If `prev` is
    /// given, it is linked to the new sector. The FAT (and DIFAT) grows when no
    /// free sector is left.
    pub(crate) fn allocate_sector<F: Read + Write + Seek>(
        &mut self,
        header: &mut Header,
        store: &mut SectorStore<F>,
        prev: Option<u32>,
    ) -> CfbResult<u32> {
        let sector = loop {
            if let Some(free) = self.first_free() {
                break free;
            }
            self.grow(header, store)?;
        };

        self.set_entry(store, sector, ENDOFCHAIN)?;
        store.zero_sector(sector)?;
        if let Some(prev) = prev {
            self.set_entry(store, prev, sector)?;
        }

        trace!(target: store.log_target(), "allocated sector {sector} after {prev:?}");
        Ok(sector)
    }

    fn first_free(&mut self) -> Option<u32> {
        let offset = self.entries[self.free_hint..]
            .iter()
            .position(|&entry| entry == FREESECT)?;
        let sector = self.free_hint + offset;
        self.free_hint = sector + 1;
        Some(sector as u32)
    }

    /// Rewrite one FAT entry on disk and in memory.
    pub(crate) fn set_entry<F: Write + Seek>(
        &mut self,
        store: &mut SectorStore<F>,
        sector: u32,
        value: u32,
    ) -> CfbResult<()> {
        let index = sector as usize;
        let fat_sector = *self
            .fat_sectors
            .get(index / self.entries_per_sector)
            .ok_or_else(|| {
                CfbError::ChainIntegrity(format!("sector {sector:#X} is outside the FAT"))
            })?;
        let offset = store.sector_offset(fat_sector) + ((index % self.entries_per_sector) * 4) as u64;
        store.write_u32_at(offset, value)?;
        self.entries[index] = value;
        Ok(())
    }

    /// Add one FAT sector at the next unused sector ID.
    ///
    /// The new FAT sector is recorded inline in the header while slots remain,
    /// and in a DIFAT sector afterwards.
    fn grow<F: Write + Seek>(
        &mut self,
        header: &mut Header,
        store: &mut SectorStore<F>,
    ) -> CfbResult<()> {
        let new_fat = self.entries.len() as u32;
        if new_fat > MAXREGSECT {
            return Err(CfbError::ChainIntegrity(
                "sector space exhausted".to_string(),
            ));
        }

        // The new FAT sector covers itself as its first entry
        let mut data = vec![0xFFu8; store.sector_size()];
        write_u32_le(&mut data, 0, FATSECT)?;
        store.write_sector(new_fat, &data)?;
        self.fat_sectors.push(new_fat);
        self.entries
            .resize(self.entries.len() + self.entries_per_sector, FREESECT);
        self.entries[new_fat as usize] = FATSECT;
        self.free_hint = self.free_hint.min(new_fat as usize + 1);

        let index = self.fat_sectors.len() - 1;
        if index < HEADER_DIFAT_ENTRIES {
            header.difat[index] = new_fat;
        } else {
            let slot = index - HEADER_DIFAT_ENTRIES;
            let per_difat = self.entries_per_sector - 1;
            if slot / per_difat >= self.difat_sectors.len() {
                self.add_difat_sector(header, store)?;
            }
            let host = self.difat_sectors[slot / per_difat];
            let offset = store.sector_offset(host) + ((slot % per_difat) * 4) as u64;
            store.write_u32_at(offset, new_fat)?;
        }

        header.num_fat_sectors += 1;
        header.write_to(store)?;

        debug!(
            target: store.log_target(),
            "grew FAT: sector {new_fat} is FAT sector #{index}"
        );
        Ok(())
    }

    /// Chain a new, empty DIFAT sector behind the current tail.
    fn add_difat_sector<F: Write + Seek>(
        &mut self,
        header: &mut Header,
        store: &mut SectorStore<F>,
    ) -> CfbResult<()> {
        let sector = self.first_free().ok_or_else(|| {
            CfbError::ChainIntegrity("no free sector for a DIFAT sector".to_string())
        })?;
        self.set_entry(store, sector, DIFSECT)?;

        let per_difat = self.entries_per_sector - 1;
        let mut data = vec![0xFFu8; store.sector_size()];
        write_u32_le(&mut data, per_difat * 4, ENDOFCHAIN)?;
        store.write_sector(sector, &data)?;

        match self.difat_sectors.last() {
            Some(&tail) => {
                let offset = store.sector_offset(tail) + (per_difat * 4) as u64;
                store.write_u32_at(offset, sector)?;
            },
            None => header.first_difat_sector = sector,
        }
        self.difat_sectors.push(sector);
        header.num_difat_sectors += 1;

        debug!(
            target: store.log_target(),
            "added DIFAT sector {sector} (#{})",
            self.difat_sectors.len()
        );
        Ok(())
    }
}

/// Follow a FAT or MiniFAT chain, detecting cycles with a visited bitset.
pub(crate) fn follow_chain(table: &[u32], start: u32, kind: &str) -> CfbResult<Vec<u32>> {
    let mut chain = Vec::new();
    let mut visited = FixedBitSet::with_capacity(table.len());
    let mut current = start;

    while current != ENDOFCHAIN {
        let index = current as usize;
        if index >= table.len() {
            return Err(CfbError::ChainIntegrity(format!(
                "{kind} chain from {start:#X} reaches {current:#X}, outside the table"
            )));
        }
        if visited.put(index) {
            return Err(CfbError::ChainIntegrity(format!(
                "{kind} chain from {start:#X} loops at {current:#X}"
            )));
        }
        chain.push(current);
        current = table[index];
    }

    Ok(chain)
}
