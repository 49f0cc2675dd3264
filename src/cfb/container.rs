//! The compound file container
//!
//! [`CompoundFile`] owns the backing store together with in-memory mirrors of
//! the header, the FAT, the MiniFAT and the directory. Every mutation is
//! written through to the store before the call returns, so dropping or
//! closing the container never loses data.

use super::consts::*;
use super::directory::{DirectoryEntry, DirectoryTree, EntryPath};
use super::error::{CfbError, CfbResult};
use super::fat::AllocationTable;
use super::header::Header;
use super::minifat::{MiniAllocationTable, MiniStreamLocation};
use super::options::CfbOptions;
use super::store::SectorStore;
use super::stream::{EntryStream, MiniStreamReader, SectorChainReader};
use crate::common::binary::write_u32_le;
use crate::common::id::parse_clsid;
use chrono::Utc;
use log::{debug, info};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

/// An open compound file.
///
/// `F` is the backing store: a [`File`] for containers on disk, or any other
/// `Read + Seek` (and `Write` for mutation) type such as `Cursor<Vec<u8>>`.
///
/// # Examples
///
/// ```
/// use flacfb::cfb::CompoundFile;
/// use std::io::{Cursor, Read};
///
/// let mut cfb = CompoundFile::create_in(Cursor::new(Vec::<u8>::new())).unwrap();
/// cfb.add_file("LIBRARY/Symbol 1", b"<DOMSymbolItem/>").unwrap();
///
/// let bytes = cfb.into_inner().into_inner();
/// let mut cfb = CompoundFile::from_store(Cursor::new(bytes)).unwrap();
/// assert_eq!(cfb.read_entry("LIBRARY/Symbol 1").unwrap(), b"<DOMSymbolItem/>");
/// ```
#[derive(Debug)]
pub struct CompoundFile<F> {
    store: SectorStore<F>,
    header: Header,
    fat: AllocationTable,
    minifat: MiniAllocationTable,
    directory: DirectoryTree,
    options: CfbOptions,
}

impl CompoundFile<File> {
    /// Open a compound file for reading.
    pub fn open(path: impl AsRef<Path>) -> CfbResult<Self> {
        Self::open_with(path, CfbOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: CfbOptions) -> CfbResult<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_store_with(file, options)
    }

    /// Open a compound file for reading and adding entries.
    pub fn open_rw(path: impl AsRef<Path>) -> CfbResult<Self> {
        Self::open_rw_with(path, CfbOptions::default())
    }

    pub fn open_rw_with(path: impl AsRef<Path>, options: CfbOptions) -> CfbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        Self::from_store_with(file, options)
    }

    /// Create (or truncate) a file and write an empty container to it.
    pub fn create(path: impl AsRef<Path>) -> CfbResult<Self> {
        Self::create_with(path, CfbOptions::default())
    }

    pub fn create_with(path: impl AsRef<Path>, options: CfbOptions) -> CfbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        Self::create_in_with(file, options)
    }
}

impl<F: Read + Seek> CompoundFile<F> {
    /// Load a container from any seekable store.
    pub fn from_store(inner: F) -> CfbResult<Self> {
        Self::from_store_with(inner, CfbOptions::default())
    }

    /// Load a container, reading the header, DIFAT, FAT, directory and MiniFAT.
    pub fn from_store_with(inner: F, options: CfbOptions) -> CfbResult<Self> {
        options.validate()?;

        // The header block is the first 512 bytes for both versions
        let mut store = SectorStore::new(inner, SECTOR_SIZE_V3, options.log_target.as_str());
        let header = Header::read_from(&mut store)?;
        store.set_sector_size(header.sector_size());

        let fat = AllocationTable::load(&header, &mut store)?;
        let directory = DirectoryTree::load(&header, &fat, &mut store, options.balancing)?;
        let ministream_start = directory.root().start_sector;
        let minifat = MiniAllocationTable::load(&header, &fat, &mut store, ministream_start)?;

        info!(
            target: store.log_target(),
            "opened compound file v{}: {} FAT sectors, {} directory slots, mini stream {} bytes",
            header.major_version,
            fat.fat_sectors().len(),
            directory.entries().len(),
            directory.root().stream_size
        );

        Ok(Self {
            store,
            header,
            fat,
            minifat,
            directory,
            options,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn options(&self) -> &CfbOptions {
        &self.options
    }

    /// The root storage entry
    pub fn root(&self) -> &DirectoryEntry {
        self.directory.root()
    }

    pub fn fat(&self) -> &AllocationTable {
        &self.fat
    }

    pub fn minifat(&self) -> &MiniAllocationTable {
        &self.minifat
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &SectorStore<F> {
        &self.store
    }

    /// Root CLSID as `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`
    pub fn root_clsid(&self) -> String {
        self.root().clsid_string()
    }

    /// Look up an entry by `/`-separated path.
    ///
    /// A trailing `/` only matches storages. Names match exactly.
    pub fn entry_by_path(&self, path: &str) -> CfbResult<Option<DirectoryEntry>> {
        Ok(self.directory.find_by_path(path)?.cloned())
    }

    /// Children of the storage with the given stream ID, in sibling tree preorder.
    pub fn entries_in_dir(&self, stream_id: u32) -> CfbResult<Vec<DirectoryEntry>> {
        Ok(self
            .directory
            .list_children(stream_id)?
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn children_of(&self, entry: &DirectoryEntry) -> CfbResult<Vec<DirectoryEntry>> {
        self.entries_in_dir(entry.stream_id)
    }

    /// Every used directory entry, in file order
    pub fn directory_entries(&self) -> Vec<DirectoryEntry> {
        self.directory
            .entries()
            .iter()
            .filter(|entry| !entry.is_free())
            .cloned()
            .collect()
    }

    /// Open a reader over a stream entry's payload.
    pub fn entry_stream(&mut self, entry: &DirectoryEntry) -> CfbResult<EntryStream<'_, F>> {
        if !entry.is_stream() {
            return Err(CfbError::NotAStream(entry.name.clone()));
        }

        if entry.stream_size < u64::from(self.header.mini_stream_cutoff) {
            let root = self.directory.root();
            let ministream = SectorChainReader::new(
                &mut self.store,
                self.fat.entries(),
                root.start_sector,
                root.stream_size,
            );
            Ok(EntryStream::Mini(MiniStreamReader::new(
                ministream,
                self.minifat.entries(),
                entry.start_sector,
                entry.stream_size,
            )))
        } else {
            Ok(EntryStream::Sectors(SectorChainReader::new(
                &mut self.store,
                self.fat.entries(),
                entry.start_sector,
                entry.stream_size,
            )))
        }
    }

    /// Read a stream's whole payload.
    pub fn read_entry(&mut self, path: &str) -> CfbResult<Vec<u8>> {
        let entry = self
            .entry_by_path(path)?
            .ok_or_else(|| CfbError::NotFound(path.to_string()))?;

        let mut stream = self.entry_stream(&entry)?;
        let mut data = Vec::with_capacity(entry.stream_size as usize);
        stream.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Release the store.
    pub fn close(self) {
        info!(target: self.store.log_target(), "closed compound file");
    }

    /// Release the store and hand it back.
    pub fn into_inner(self) -> F {
        self.store.into_inner()
    }
}

impl<F: Read + Write + Seek> CompoundFile<F> {
    /// Write an empty version 3 container into `inner` and open it.
    pub fn create_in(inner: F) -> CfbResult<Self> {
        Self::create_in_with(inner, CfbOptions::default())
    }

    /// Write an empty container into `inner` and open it.
    ///
    /// Layout: sector 0 is the FAT, sector 1 the directory, sector 2 the
    /// MiniFAT and sector 3 the (empty) mini stream.
    pub fn create_in_with(inner: F, options: CfbOptions) -> CfbResult<Self> {
        options.validate()?;
        let header = Header::new_empty(options.version, options.mini_stream_cutoff)?;
        let sector_size = header.sector_size();
        let root_clsid = options.resolve_root_clsid()?;

        let mut store = SectorStore::new(inner, sector_size, options.log_target.as_str());
        header.write_to(&mut store)?;

        let mut fat = vec![0xFFu8; sector_size];
        write_u32_le(&mut fat, 0, FATSECT)?;
        write_u32_le(&mut fat, 4, ENDOFCHAIN)?; // directory
        write_u32_le(&mut fat, 8, ENDOFCHAIN)?; // MiniFAT
        write_u32_le(&mut fat, 12, ENDOFCHAIN)?; // mini stream
        store.write_sector(0, &fat)?;

        let mut directory = DirectoryEntry::root(root_clsid, 3).encode();
        for stream_id in 1..(sector_size / DIRENTRY_SIZE) as u32 {
            directory.extend_from_slice(&DirectoryEntry::free(stream_id).encode());
        }
        store.write_sector(1, &directory)?;

        store.write_sector(2, &vec![0xFFu8; sector_size])?;
        store.zero_sector(3)?;
        store.flush()?;

        info!(
            target: store.log_target(),
            "created compound file v{} with {}-byte sectors",
            header.major_version,
            sector_size
        );
        Self::from_store_with(store.into_inner(), options)
    }

    /// Replace the root storage's CLSID.
    pub fn set_root_clsid(&mut self, clsid: &str) -> CfbResult<()> {
        let bytes = parse_clsid(clsid).ok_or_else(|| CfbError::InvalidClsid(clsid.to_string()))?;
        self.directory.root_mut().clsid = bytes;
        self.directory.persist(&mut self.store, ROOT_STREAM_ID)?;
        self.store.flush()
    }

    /// Create a storage and any missing parents. Existing storages are reused.
    pub fn add_directory(&mut self, path: &str) -> CfbResult<DirectoryEntry> {
        let parsed = EntryPath::parse_validated(path)?;
        let stream_id = self.ensure_storages(&parsed.segments)?;
        self.store.flush()?;
        Ok(self.directory.entries()[stream_id as usize].clone())
    }

    /// Add a stream holding `data`, creating parent storages as needed.
    ///
    /// Payloads below the mini stream cutoff go to the mini stream; an empty
    /// payload still takes one mini sector.
    pub fn add_file(&mut self, path: &str, data: &[u8]) -> CfbResult<DirectoryEntry> {
        let parsed = EntryPath::parse_validated(path)?;
        if parsed.directory_only {
            return Err(CfbError::InvalidPath(format!(
                "stream path {path:?} ends with '/'"
            )));
        }
        let Some((name, parents)) = parsed.segments.split_last() else {
            return Err(CfbError::InvalidPath("empty stream path".to_string()));
        };

        let parent = self.ensure_storages(parents)?;
        if self.directory.find_sibling(parent, name)?.is_some() {
            return Err(CfbError::PathConflict(path.to_string()));
        }

        let size = data.len() as u64;
        let start = if size < u64::from(self.header.mini_stream_cutoff) {
            self.write_mini(data)?
        } else {
            self.write_sectors(data)?
        };

        let stream_id = self.directory.insert(
            &mut self.header,
            &mut self.fat,
            &mut self.store,
            parent,
            DirectoryEntry::stream(*name, start, size),
        )?;
        self.store.flush()?;

        debug!(
            target: self.store.log_target(),
            "added stream {path:?} (#{stream_id}, {size} bytes, starts at {start})"
        );
        Ok(self.directory.entries()[stream_id as usize].clone())
    }

    /// Add a stream with the contents of a file on disk.
    pub fn add_file_from_path(
        &mut self,
        path: &str,
        source: impl AsRef<Path>,
    ) -> CfbResult<DirectoryEntry> {
        let data = fs::read(source.as_ref())?;
        self.add_file(path, &data)
    }

    /// Mirror a directory tree from disk under the storage `base`.
    ///
    /// Names are added in sorted order at each level. Symbolic links are
    /// followed. Returns the entries for every storage and stream created below
    /// `base`, in the order they were added.
    pub fn add_directory_contents(
        &mut self,
        base: &str,
        source_dir: impl AsRef<Path>,
    ) -> CfbResult<Vec<DirectoryEntry>> {
        self.add_directory(base)?;

        let mut added = Vec::new();
        let mut pending: Vec<(String, PathBuf)> =
            vec![(base.trim_matches('/').to_string(), source_dir.as_ref().to_path_buf())];

        while let Some((storage, dir)) = pending.pop() {
            let mut children = fs::read_dir(&dir)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<Result<Vec<_>, _>>()?;
            children.sort();

            for child in children {
                let Some(name) = child.file_name().and_then(|n| n.to_str()) else {
                    return Err(CfbError::InvalidPath(format!(
                        "{} is not valid UTF-8",
                        child.display()
                    )));
                };
                let target = if storage.is_empty() {
                    name.to_string()
                } else {
                    format!("{storage}/{name}")
                };

                let metadata = fs::metadata(&child)?;
                if metadata.is_dir() {
                    added.push(self.add_directory(&target)?);
                    pending.push((target, child));
                } else if metadata.is_file() {
                    added.push(self.add_file_from_path(&target, &child)?);
                }
            }
        }

        debug!(
            target: self.store.log_target(),
            "mirrored {} into {base:?}: {} entries",
            source_dir.as_ref().display(),
            added.len()
        );
        Ok(added)
    }

    /// Walk `segments` from the root, inserting storages that do not exist.
    ///
    /// An existing storage whose name differs only in case is reused.
    fn ensure_storages(&mut self, segments: &[&str]) -> CfbResult<u32> {
        let mut current = ROOT_STREAM_ID;
        for (depth, segment) in segments.iter().enumerate() {
            current = match self.directory.find_sibling(current, segment)? {
                Some(sid) if self.directory.entries()[sid as usize].is_storage() => sid,
                Some(_) => {
                    return Err(CfbError::NotAStorage(segments[..=depth].join("/")));
                },
                None => self.directory.insert(
                    &mut self.header,
                    &mut self.fat,
                    &mut self.store,
                    current,
                    DirectoryEntry::storage(*segment, Utc::now()),
                )?,
            };
        }
        Ok(current)
    }

    /// Write a payload into a fresh regular sector chain; returns its first sector.
    fn write_sectors(&mut self, data: &[u8]) -> CfbResult<u32> {
        let mut first = None;
        let mut prev = None;
        for chunk in data.chunks(self.store.sector_size()) {
            let sector = self
                .fat
                .allocate_sector(&mut self.header, &mut self.store, prev)?;
            self.store.write_sector(sector, chunk)?;
            first.get_or_insert(sector);
            prev = Some(sector);
        }
        Ok(first.unwrap_or(ENDOFCHAIN))
    }

    /// Write a payload into a fresh mini sector chain; returns its first mini sector.
    fn write_mini(&mut self, data: &[u8]) -> CfbResult<u32> {
        let mut location = self.ministream_location();

        let first = self.next_mini_sector(&mut location, None)?;
        let mut prev = first;
        for (i, chunk) in data.chunks(MINI_SECTOR_SIZE).enumerate() {
            let index = if i == 0 {
                first
            } else {
                self.next_mini_sector(&mut location, Some(prev))?
            };
            let offset = self.minifat.mini_sector_offset(&self.store, index)?;
            self.store.write_at(offset, chunk)?;
            prev = index;
        }

        self.set_ministream_location(location)?;
        Ok(first)
    }

    fn next_mini_sector(
        &mut self,
        location: &mut MiniStreamLocation,
        prev: Option<u32>,
    ) -> CfbResult<u32> {
        self.minifat.allocate_mini_sector(
            &mut self.header,
            &mut self.fat,
            &mut self.store,
            location,
            prev,
        )
    }

    fn ministream_location(&self) -> MiniStreamLocation {
        let root = self.directory.root();
        MiniStreamLocation {
            start: root.start_sector,
            size: root.stream_size,
        }
    }

    /// Record the mini stream extent in the root entry.
    fn set_ministream_location(&mut self, location: MiniStreamLocation) -> CfbResult<()> {
        if location == self.ministream_location() {
            return Ok(());
        }
        let root = self.directory.root_mut();
        root.start_sector = location.start;
        root.stream_size = location.size;
        self.directory.persist(&mut self.store, ROOT_STREAM_ID)
    }

    #[cfg(test)]
    pub(crate) fn allocate_sector(&mut self, prev: Option<u32>) -> CfbResult<u32> {
        self.fat
            .allocate_sector(&mut self.header, &mut self.store, prev)
    }

    #[cfg(test)]
    pub(crate) fn allocate_mini_sector(&mut self, prev: Option<u32>) -> CfbResult<u32> {
        let mut location = self.ministream_location();
        let index = self.next_mini_sector(&mut location, prev)?;
        self.set_ministream_location(location)?;
        Ok(index)
    }
}
