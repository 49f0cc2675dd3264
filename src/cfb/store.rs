//! Sector-addressed access to the backing store.
//!
//! `SectorStore` is the only place that seeks and reads/writes raw bytes.
//! Everything above it talks in sector IDs and in-sector offsets.

use super::error::{CfbError, CfbResult};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Random-access store holding a compound file.
#[derive(Debug)]
pub(crate) struct SectorStore<F> {
    inner: F,
    sector_size: usize,
    log_target: String,
}

impl<F> SectorStore<F> {
    pub fn new(inner: F, sector_size: usize, log_target: impl Into<String>) -> Self {
        Self {
            inner,
            sector_size,
            log_target: log_target.into(),
        }
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn set_sector_size(&mut self, sector_size: usize) {
        self.sector_size = sector_size;
    }

    /// Target used for every log record emitted on behalf of this container.
    pub fn log_target(&self) -> &str {
        &self.log_target
    }

    /// Byte offset of a sector: the header occupies the first sector slot.
    #[inline]
    pub fn sector_offset(&self, sector: u32) -> u64 {
        (u64::from(sector) + 1) * self.sector_size as u64
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F: Read + Seek> SectorStore<F> {
    /// Fill `buf` from `offset`. Hitting the end of the store is `TruncatedStore`.
    pub fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> CfbResult<()> {
        let needed = buf.len();
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                CfbError::TruncatedStore { offset, needed }
            } else {
                CfbError::Io(e)
            }
        })
    }

    /// Read a whole sector.
    pub fn read_sector(&mut self, sector: u32) -> CfbResult<Vec<u8>> {
        let mut buffer = vec![0u8; self.sector_size];
        self.read_exact_at(self.sector_offset(sector), &mut buffer)?;
        Ok(buffer)
    }
}

impl<F: Write + Seek> SectorStore<F> {
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> CfbResult<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(data)?;
        Ok(())
    }

    pub fn write_u32_at(&mut self, offset: u64, value: u32) -> CfbResult<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Overwrite a sector. Short data leaves the rest of the sector untouched.
    pub fn write_sector(&mut self, sector: u32, data: &[u8]) -> CfbResult<()> {
        debug_assert!(data.len() <= self.sector_size);
        self.write_at(self.sector_offset(sector), data)
    }

    pub fn zero_sector(&mut self, sector: u32) -> CfbResult<()> {
        let zeros = vec![0u8; self.sector_size];
        self.write_sector(sector, &zeros)
    }

    pub fn flush(&mut self) -> CfbResult<()> {
        self.inner.flush()?;
        Ok(())
    }
}
