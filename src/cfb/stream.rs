//! Forward-only readers over entry payloads
//!
//! Streams at or above the mini stream cutoff live in regular sectors and are
//! read by [`SectorChainReader`], which steps through the FAT one sector at a
//! time. Smaller streams live in the mini stream and are read by
//! [`MiniStreamReader`], which steps through the MiniFAT in 64-byte units and
//! fetches the bytes from the mini stream through its own sector chain reader.
//!
//! Both readers stop at the declared stream size. Reaching ENDOFCHAIN before
//! that is treated as end of stream; a link that leaves the table or loops is
//! a [`CfbError::ChainIntegrity`] surfaced as `io::ErrorKind::InvalidData`.

use super::consts::*;
use super::error::{CfbError, CfbResult};
use super::store::SectorStore;
use std::io::{self, Read, Seek};

/// Reader over a regular sector chain.
pub struct SectorChainReader<'a, F> {
    store: &'a mut SectorStore<F>,
    fat: &'a [u32],
    start: u32,
    size: u64,
    position: u64,
    /// Sector holding `position`
    current: u32,
    /// Links followed since the start; more than the table length means a loop
    hops: usize,
}

impl<'a, F: Read + Seek> SectorChainReader<'a, F> {
    pub(crate) fn new(store: &'a mut SectorStore<F>, fat: &'a [u32], start: u32, size: u64) -> Self {
        Self {
            store,
            fat,
            start,
            size,
            position: 0,
            current: start,
            hops: 0,
        }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Declared stream size
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Go back to the first byte of the chain.
    pub fn rewind(&mut self) {
        self.position = 0;
        self.current = self.start;
        self.hops = 0;
    }

    /// Follow the chain past `n` bytes without reading them.
    ///
    /// Returns the number of bytes actually skipped, which is smaller than `n`
    /// only at the end of the stream.
    pub fn skip(&mut self, n: u64) -> CfbResult<u64> {
        let sector_size = self.store.sector_size() as u64;
        let mut remaining = n.min(self.size - self.position);
        let mut skipped = 0;

        while remaining > 0 && self.at_sector()? {
            let within = self.position % sector_size;
            let step = (sector_size - within).min(remaining);
            self.advance(step)?;
            remaining -= step;
            skipped += step;
        }
        Ok(skipped)
    }

    /// Read up to the end of the current sector.
    pub(crate) fn read_chunk(&mut self, buf: &mut [u8]) -> CfbResult<usize> {
        if buf.is_empty() || !self.at_sector()? {
            return Ok(0);
        }

        let sector_size = self.store.sector_size() as u64;
        let within = self.position % sector_size;
        let n = (buf.len() as u64)
            .min(sector_size - within)
            .min(self.size - self.position) as usize;

        let offset = self.store.sector_offset(self.current) + within;
        self.store.read_exact_at(offset, &mut buf[..n])?;
        self.advance(n as u64)?;
        Ok(n)
    }

    /// True when there are bytes left and `current` names a readable sector.
    fn at_sector(&self) -> CfbResult<bool> {
        if self.position >= self.size || self.current == ENDOFCHAIN {
            return Ok(false);
        }
        if self.current > MAXREGSECT || self.current as usize >= self.fat.len() {
            return Err(CfbError::ChainIntegrity(format!(
                "chain from {:#X} reaches {:#X} at byte {}",
                self.start, self.current, self.position
            )));
        }
        Ok(true)
    }

    fn advance(&mut self, n: u64) -> CfbResult<()> {
        self.position += n;
        if self.position % self.store.sector_size() as u64 == 0 {
            self.current = self.fat[self.current as usize];
            self.hops += 1;
            if self.hops > self.fat.len() {
                return Err(CfbError::ChainIntegrity(format!(
                    "chain from {:#X} loops",
                    self.start
                )));
            }
        }
        Ok(())
    }
}

impl<F: Read + Seek> Read for SectorChainReader<'_, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_chunk(buf).map_err(io::Error::from)
    }
}

/// Reader over a mini sector chain inside the mini stream.
pub struct MiniStreamReader<'a, F> {
    /// The mini stream itself, as a regular chain
    ministream: SectorChainReader<'a, F>,
    minifat: &'a [u32],
    start: u32,
    size: u64,
    position: u64,
    current: u32,
    hops: usize,
}

impl<'a, F: Read + Seek> MiniStreamReader<'a, F> {
    pub(crate) fn new(
        ministream: SectorChainReader<'a, F>,
        minifat: &'a [u32],
        start: u32,
        size: u64,
    ) -> Self {
        Self {
            ministream,
            minifat,
            start,
            size,
            position: 0,
            current: start,
            hops: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Read up to the end of the current mini sector.
    pub(crate) fn read_chunk(&mut self, buf: &mut [u8]) -> CfbResult<usize> {
        if buf.is_empty() || self.position >= self.size || self.current == ENDOFCHAIN {
            return Ok(0);
        }
        if self.current as usize >= self.minifat.len() {
            return Err(CfbError::ChainIntegrity(format!(
                "MiniFAT chain from {:#X} reaches {:#X}",
                self.start, self.current
            )));
        }

        let mini_size = MINI_SECTOR_SIZE as u64;
        let within = self.position % mini_size;
        let target = u64::from(self.current) * mini_size + within;
        if self.ministream.position() > target {
            self.ministream.rewind();
        }
        let gap = target - self.ministream.position();
        if self.ministream.skip(gap)? != gap {
            return Err(CfbError::ChainIntegrity(format!(
                "mini sector {} lies past the end of the mini stream",
                self.current
            )));
        }

        let n = (buf.len() as u64)
            .min(mini_size - within)
            .min(self.size - self.position) as usize;
        let got = self.ministream.read_chunk(&mut buf[..n])?;
        if got != n {
            return Err(CfbError::ChainIntegrity(format!(
                "mini sector {} is cut short by the mini stream",
                self.current
            )));
        }

        self.position += n as u64;
        if self.position % mini_size == 0 {
            self.current = self.minifat[self.current as usize];
            self.hops += 1;
            if self.hops > self.minifat.len() {
                return Err(CfbError::ChainIntegrity(format!(
                    "MiniFAT chain from {:#X} loops",
                    self.start
                )));
            }
        }
        Ok(n)
    }
}

impl<F: Read + Seek> Read for MiniStreamReader<'_, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_chunk(buf).map_err(io::Error::from)
    }
}

/// Payload of a stream entry, wherever it is stored.
pub enum EntryStream<'a, F> {
    /// Data in regular sectors
    Sectors(SectorChainReader<'a, F>),
    /// Data in the mini stream
    Mini(MiniStreamReader<'a, F>),
}

impl<F: Read + Seek> EntryStream<'_, F> {
    /// Declared stream size
    pub fn len(&self) -> u64 {
        match self {
            EntryStream::Sectors(reader) => reader.len(),
            EntryStream::Mini(reader) => reader.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the payload lives in the mini stream
    pub fn is_mini(&self) -> bool {
        matches!(self, EntryStream::Mini(_))
    }
}

impl<F: Read + Seek> Read for EntryStream<'_, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntryStream::Sectors(reader) => reader.read(buf),
            EntryStream::Mini(reader) => reader.read(buf),
        }
    }
}
