//! Directory entries and the per-storage sibling trees
//!
//! Every directory record is 128 bytes. Records live in an arena indexed by
//! stream ID; the children of a storage form a binary tree through the
//! left/right sibling IDs, rooted at the storage's child ID.
//!
//! ## Directory Entry Ordering
//!
//! Siblings are ordered the way every MS-CFB reader expects:
//!
//! 1. **Sort by name length first** (shorter names come before longer names)
//! 2. **Then sort case-insensitively** for same-length names
//!
//! Example ordering:
//! - `"Data"` (length 4) comes before `"1Table"` (length 6)
//! - `"ABC"` comes before `"xyz"` (both length 3)
//!
//! ## Balancing
//!
//! [`TreeBalancing::RedBlack`] performs real red-black insertion (recoloring and
//! rotations). [`TreeBalancing::Legacy`] reproduces the shape legacy FLA tools
//! write: right-first attachment followed by painting the whole level black.

use super::consts::*;
use super::error::{CfbError, CfbResult};
use super::fat::AllocationTable;
use super::header::Header;
use super::options::TreeBalancing;
use super::store::SectorStore;
use crate::common::binary::{
    datetime_to_filetime, decode_utf16le, encode_utf16le, filetime_to_datetime,
};
use crate::common::id::format_clsid;
use chrono::{DateTime, Utc};
use fixedbitset::FixedBitSet;
use log::debug;
use std::cmp::Ordering;
use std::io::{Read, Seek, Write};
use zerocopy::{FromBytes, IntoBytes, LE, U16, U32, U64};
use zerocopy_derive::{FromBytes as DeriveFromBytes, Immutable, IntoBytes as DeriveIntoBytes};

/// Raw directory entry structure (128 bytes)
///
/// This represents the on-disk format of a directory entry.
#[derive(Debug, Clone, DeriveFromBytes, DeriveIntoBytes, Immutable)]
#[repr(C)]
struct RawDirectoryEntry {
    /// Entry name in UTF-16LE (64 bytes, null-padded)
    name: [u8; 64],
    /// Length of name in bytes (including null terminator)
    name_len: U16<LE>,
    /// Entry type (0 = unknown, 1 = storage, 2 = stream, 5 = root)
    entry_type: u8,
    /// Node color (0 = red, 1 = black)
    node_color: u8,
    /// Left sibling SID
    sid_left: U32<LE>,
    /// Right sibling SID
    sid_right: U32<LE>,
    /// Child SID
    sid_child: U32<LE>,
    /// CLSID (16 bytes)
    clsid: [u8; 16],
    /// State bits
    state_bits: U32<LE>,
    /// Creation time (FILETIME)
    creation_time: U64<LE>,
    /// Modified time (FILETIME)
    modified_time: U64<LE>,
    /// Starting sector
    start_sector: U32<LE>,
    /// Stream size
    stream_size: U64<LE>,
}

/// Kind of object a directory entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    /// Unused slot
    Unknown,
    /// Storage (directory)
    Storage,
    /// Stream (file)
    Stream,
    /// The root storage
    Root,
}

impl ObjectType {
    fn from_raw(value: u8) -> Option<Self> {
        match value {
            STGTY_EMPTY => Some(ObjectType::Unknown),
            STGTY_STORAGE => Some(ObjectType::Storage),
            STGTY_STREAM => Some(ObjectType::Stream),
            STGTY_ROOT => Some(ObjectType::Root),
            _ => None,
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            ObjectType::Unknown => STGTY_EMPTY,
            ObjectType::Storage => STGTY_STORAGE,
            ObjectType::Stream => STGTY_STREAM,
            ObjectType::Root => STGTY_ROOT,
        }
    }
}

/// Red-black node color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeColor {
    Red,
    Black,
}

/// A directory entry (stream, storage or root)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Stream ID (slot index in the directory)
    pub stream_id: u32,
    /// Entry name
    pub name: String,
    /// Object type
    pub object_type: ObjectType,
    /// Node color in the sibling tree
    pub color: NodeColor,
    /// Left sibling SID
    pub left_sibling: u32,
    /// Right sibling SID
    pub right_sibling: u32,
    /// First child SID (storages only)
    pub child: u32,
    /// CLSID of this entry
    pub clsid: [u8; 16],
    /// User-defined state bits
    pub state_bits: u32,
    /// Creation time
    pub creation_time: Option<DateTime<Utc>>,
    /// Modification time
    pub modified_time: Option<DateTime<Utc>>,
    /// First sector (or mini sector) of the stream
    pub start_sector: u32,
    /// Size of the stream in bytes
    pub stream_size: u64,
}

impl DirectoryEntry {
    /// An unused slot.
    pub fn free(stream_id: u32) -> Self {
        Self {
            stream_id,
            name: String::new(),
            object_type: ObjectType::Unknown,
            color: NodeColor::Red,
            left_sibling: NOSTREAM,
            right_sibling: NOSTREAM,
            child: NOSTREAM,
            clsid: [0; 16],
            state_bits: 0,
            creation_time: None,
            modified_time: None,
            start_sector: 0,
            stream_size: 0,
        }
    }

    /// The root storage, owning a mini stream that starts at `ministream_start`.
    pub fn root(clsid: [u8; 16], ministream_start: u32) -> Self {
        Self {
            name: ROOT_ENTRY_NAME.to_string(),
            object_type: ObjectType::Root,
            color: NodeColor::Black,
            clsid,
            start_sector: ministream_start,
            ..Self::free(ROOT_STREAM_ID)
        }
    }

    /// A storage entry, not yet placed in the directory.
    pub fn storage(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            object_type: ObjectType::Storage,
            creation_time: Some(now),
            modified_time: Some(now),
            ..Self::free(NOSTREAM)
        }
    }

    /// A stream entry, not yet placed in the directory.
    pub fn stream(name: impl Into<String>, start_sector: u32, stream_size: u64) -> Self {
        Self {
            name: name.into(),
            object_type: ObjectType::Stream,
            start_sector,
            stream_size,
            ..Self::free(NOSTREAM)
        }
    }

    /// Storage or root storage
    pub fn is_storage(&self) -> bool {
        matches!(self.object_type, ObjectType::Storage | ObjectType::Root)
    }

    pub fn is_stream(&self) -> bool {
        self.object_type == ObjectType::Stream
    }

    pub fn is_root(&self) -> bool {
        self.object_type == ObjectType::Root
    }

    /// Unused slot
    pub fn is_free(&self) -> bool {
        self.object_type == ObjectType::Unknown
    }

    /// CLSID as `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`
    pub fn clsid_string(&self) -> String {
        format_clsid(&self.clsid)
    }

    /// Decode a 128-byte record.
    ///
    /// Version 3 files only use the low 32 bits of the stream size.
    pub(crate) fn decode(data: &[u8], stream_id: u32, major_version: u16) -> CfbResult<Self> {
        let raw = RawDirectoryEntry::read_from_bytes(data)
            .map_err(|_| CfbError::invalid_record(stream_id, "record is not 128 bytes"))?;

        let object_type = ObjectType::from_raw(raw.entry_type).ok_or_else(|| {
            CfbError::invalid_record(stream_id, format!("object type {}", raw.entry_type))
        })?;
        let color = match raw.node_color {
            COLOR_RED => NodeColor::Red,
            COLOR_BLACK => NodeColor::Black,
            other => {
                return Err(CfbError::invalid_record(
                    stream_id,
                    format!("color flag {other}"),
                ));
            },
        };

        let name_len = raw.name_len.get() as usize;
        let name = decode_utf16le(&raw.name[..name_len.saturating_sub(2).min(64)]);

        let stream_size = if major_version == 3 {
            raw.stream_size.get() & 0xFFFF_FFFF
        } else {
            raw.stream_size.get()
        };

        Ok(Self {
            stream_id,
            name,
            object_type,
            color,
            left_sibling: raw.sid_left.get(),
            right_sibling: raw.sid_right.get(),
            child: raw.sid_child.get(),
            clsid: raw.clsid,
            state_bits: raw.state_bits.get(),
            creation_time: filetime_to_datetime(raw.creation_time.get()),
            modified_time: filetime_to_datetime(raw.modified_time.get()),
            start_sector: raw.start_sector.get(),
            stream_size,
        })
    }

    /// Encode into a 128-byte record. Free slots keep an all-zero name field.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut name = [0u8; 64];
        let name_len = if self.is_free() {
            0
        } else {
            let utf16 = encode_utf16le(&self.name);
            let used = utf16.len().min(MAX_NAME_UNITS * 2);
            name[..used].copy_from_slice(&utf16[..used]);
            // Name length in bytes (including null terminator)
            (used + 2) as u16
        };

        let raw = RawDirectoryEntry {
            name,
            name_len: U16::new(name_len),
            entry_type: self.object_type.to_raw(),
            node_color: match self.color {
                NodeColor::Red => COLOR_RED,
                NodeColor::Black => COLOR_BLACK,
            },
            sid_left: U32::new(self.left_sibling),
            sid_right: U32::new(self.right_sibling),
            sid_child: U32::new(self.child),
            clsid: self.clsid,
            state_bits: U32::new(self.state_bits),
            creation_time: U64::new(datetime_to_filetime(self.creation_time)),
            modified_time: U64::new(datetime_to_filetime(self.modified_time)),
            start_sector: U32::new(self.start_sector),
            stream_size: U64::new(self.stream_size),
        };
        raw.as_bytes().to_vec()
    }
}

/// Sibling order: shorter names first, then case-insensitive comparison.
///
/// Case folding is the simple one-to-one uppercase mapping applied per
/// character, so `ß` stays `ß` rather than expanding to `SS`. Folded names are
/// compared by UTF-16 code unit.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let len_a = a.encode_utf16().count();
    let len_b = b.encode_utf16().count();
    len_a
        .cmp(&len_b)
        .then_with(|| fold_case(a).encode_utf16().cmp(fold_case(b).encode_utf16()))
}

fn fold_case(name: &str) -> String {
    name.chars().map(simple_uppercase).collect()
}

/// Uppercase `c` only when the mapping yields exactly one character.
fn simple_uppercase(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(mapped), None) => mapped,
        _ => c,
    }
}

/// Check that a name fits in a directory record.
pub fn validate_name(name: &str) -> CfbResult<()> {
    if name.is_empty() {
        return Err(CfbError::InvalidPath("empty entry name".to_string()));
    }
    if name.contains(['/', '\\', ':', '!']) {
        return Err(CfbError::InvalidPath(format!(
            "entry name {name:?} contains a reserved character"
        )));
    }
    let units = name.encode_utf16().count();
    if units > MAX_NAME_UNITS {
        return Err(CfbError::NameTooLong {
            name: name.to_string(),
            units,
        });
    }
    Ok(())
}

/// A `/`-separated path split into segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPath<'a> {
    /// Non-empty segments, root first
    pub segments: Vec<&'a str>,
    /// The path ended with `/`, so it may only name a storage
    pub directory_only: bool,
}

impl<'a> EntryPath<'a> {
    /// Split a path. Leading, trailing and repeated slashes are ignored.
    pub fn parse(path: &'a str) -> Self {
        Self {
            segments: path.split('/').filter(|s| !s.is_empty()).collect(),
            directory_only: path.ends_with('/'),
        }
    }

    /// Parse and validate every segment as an entry name.
    pub fn parse_validated(path: &'a str) -> CfbResult<Self> {
        let parsed = Self::parse(path);
        for segment in &parsed.segments {
            validate_name(segment)?;
        }
        Ok(parsed)
    }
}

/// All directory slots of an open container, in file order.
#[derive(Debug, Clone)]
pub struct DirectoryTree {
    /// Every slot, including free ones; index is the stream ID
    entries: Vec<DirectoryEntry>,
    /// Directory sector chain
    sectors: Vec<u32>,
    /// Records per directory sector
    entries_per_sector: usize,
    balancing: TreeBalancing,
}

impl DirectoryTree {
    /// Read every slot of the directory chain.
    pub(crate) fn load<F: Read + Seek>(
        header: &Header,
        fat: &AllocationTable,
        store: &mut SectorStore<F>,
        balancing: TreeBalancing,
    ) -> CfbResult<Self> {
        let sectors = fat.chain(header.first_directory_sector)?;
        let entries_per_sector = store.sector_size() / DIRENTRY_SIZE;

        let mut entries = Vec::with_capacity(sectors.len() * entries_per_sector);
        for &sector in &sectors {
            let data = store.read_sector(sector)?;
            for record in data.chunks_exact(DIRENTRY_SIZE) {
                let stream_id = entries.len() as u32;
                entries.push(DirectoryEntry::decode(
                    record,
                    stream_id,
                    header.major_version,
                )?);
            }
        }

        let tree = Self {
            entries,
            sectors,
            entries_per_sector,
            balancing,
        };
        tree.validate()?;

        debug!(
            target: store.log_target(),
            "loaded directory: {} slots in {} sectors",
            tree.entries.len(),
            tree.sectors.len()
        );
        Ok(tree)
    }

    /// Check root placement and that every link stays inside the directory.
    fn validate(&self) -> CfbResult<()> {
        match self.entries.first() {
            Some(root) if root.is_root() => {},
            _ => {
                return Err(CfbError::invalid_record(
                    ROOT_STREAM_ID,
                    "first directory slot is not the root storage",
                ));
            },
        }

        let count = self.entries.len() as u32;
        for entry in self.entries.iter().filter(|e| !e.is_free()) {
            if entry.stream_id != ROOT_STREAM_ID && entry.is_root() {
                return Err(CfbError::invalid_record(
                    entry.stream_id,
                    "second root storage",
                ));
            }
            for link in [entry.left_sibling, entry.right_sibling, entry.child] {
                if link != NOSTREAM && link >= count {
                    return Err(CfbError::invalid_record(
                        entry.stream_id,
                        format!("link {link:#X} points outside the directory"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Every slot, free ones included
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Directory sector chain
    pub fn sectors(&self) -> &[u32] {
        &self.sectors
    }

    pub fn root(&self) -> &DirectoryEntry {
        &self.entries[ROOT_STREAM_ID as usize]
    }

    pub fn get(&self, stream_id: u32) -> Option<&DirectoryEntry> {
        self.entries.get(stream_id as usize)
    }

    pub(crate) fn root_mut(&mut self) -> &mut DirectoryEntry {
        &mut self.entries[ROOT_STREAM_ID as usize]
    }

    /// Find a direct child of `parent` by exact name.
    ///
    /// The whole level is scanned, so trees written by tools that do not keep
    /// siblings ordered are still searchable.
    pub fn find_child(&self, parent: u32, name: &str) -> CfbResult<Option<u32>> {
        let level = self.level_ids(parent)?;
        Ok(level
            .into_iter()
            .find(|&sid| self.entries[sid as usize].name == name))
    }

    /// Find a direct child of `parent` whose name sorts equal to `name`.
    ///
    /// Sibling names must be unique under [`compare_names`], so this is the
    /// check that guards insertion.
    pub fn find_sibling(&self, parent: u32, name: &str) -> CfbResult<Option<u32>> {
        let level = self.level_ids(parent)?;
        Ok(level.into_iter().find(|&sid| {
            compare_names(&self.entries[sid as usize].name, name) == Ordering::Equal
        }))
    }

    /// Resolve a path from the root.
    ///
    /// A stream only matches as the last segment of a path without a trailing
    /// slash. An empty path resolves to the root.
    pub fn find_by_path(&self, path: &str) -> CfbResult<Option<&DirectoryEntry>> {
        let parsed = EntryPath::parse(path);
        let mut current = ROOT_STREAM_ID;

        for (i, segment) in parsed.segments.iter().enumerate() {
            let Some(sid) = self.find_child(current, segment)? else {
                return Ok(None);
            };
            let entry = &self.entries[sid as usize];
            let last = i + 1 == parsed.segments.len();
            if !entry.is_storage() && (!last || parsed.directory_only) {
                return Ok(None);
            }
            current = sid;
        }

        Ok(self.get(current))
    }

    /// Children of a storage: the tree root, then its left subtree, then its
    /// right subtree.
    pub fn list_children(&self, parent: u32) -> CfbResult<Vec<&DirectoryEntry>> {
        Ok(self
            .level_ids(parent)?
            .into_iter()
            .map(|sid| &self.entries[sid as usize])
            .collect())
    }

    /// Stream IDs of one sibling tree in preorder.
    fn level_ids(&self, parent: u32) -> CfbResult<Vec<u32>> {
        let parent_entry = self
            .get(parent)
            .ok_or_else(|| CfbError::NotFound(format!("stream ID {parent}")))?;
        if !parent_entry.is_storage() {
            return Err(CfbError::NotAStorage(parent_entry.name.clone()));
        }

        let mut ids = Vec::new();
        let mut visited = FixedBitSet::with_capacity(self.entries.len());
        let mut stack = vec![parent_entry.child];
        while let Some(sid) = stack.pop() {
            if sid == NOSTREAM {
                continue;
            }
            if visited.put(sid as usize) {
                return Err(CfbError::ChainIntegrity(format!(
                    "sibling tree under #{parent} revisits #{sid}"
                )));
            }
            let entry = &self.entries[sid as usize];
            if entry.is_free() {
                return Err(CfbError::invalid_record(
                    sid,
                    format!("free slot linked into the tree under #{parent}"),
                ));
            }
            ids.push(sid);
            stack.push(entry.right_sibling);
            stack.push(entry.left_sibling);
        }
        Ok(ids)
    }

    /// Place `entry` in the first free slot and link it under `parent`.
    ///
    /// A new directory sector is allocated when every slot is taken.
    pub(crate) fn insert<F: Read + Write + Seek>(
        &mut self,
        header: &mut Header,
        fat: &mut AllocationTable,
        store: &mut SectorStore<F>,
        parent: u32,
        mut entry: DirectoryEntry,
    ) -> CfbResult<u32> {
        validate_name(&entry.name)?;
        if !self.get(parent).is_some_and(DirectoryEntry::is_storage) {
            return Err(CfbError::NotAStorage(format!("stream ID {parent}")));
        }
        if let Some(existing) = self.find_sibling(parent, &entry.name)? {
            return Err(CfbError::PathConflict(format!(
                "{:?} collides with #{existing} {:?}",
                entry.name, self.entries[existing as usize].name
            )));
        }

        let sid = match self.entries.iter().position(DirectoryEntry::is_free) {
            Some(slot) => slot as u32,
            None => self.grow(header, fat, store)?,
        };

        entry.stream_id = sid;
        entry.left_sibling = NOSTREAM;
        entry.right_sibling = NOSTREAM;
        entry.child = NOSTREAM;
        entry.color = NodeColor::Black;
        self.entries[sid as usize] = entry;

        let mut touched = match self.balancing {
            TreeBalancing::RedBlack => self.link_red_black(parent, sid),
            TreeBalancing::Legacy => self.link_legacy(parent, sid),
        };
        touched.sort_unstable();
        touched.dedup();
        for id in touched {
            self.persist(store, id)?;
        }

        debug!(
            target: store.log_target(),
            "inserted {:?} #{sid} {:?} under #{parent}",
            self.entries[sid as usize].object_type,
            self.entries[sid as usize].name
        );
        Ok(sid)
    }

    /// Write one record back to its slot.
    pub(crate) fn persist<F: Write + Seek>(
        &self,
        store: &mut SectorStore<F>,
        stream_id: u32,
    ) -> CfbResult<()> {
        let index = stream_id as usize;
        let sector = self
            .sectors
            .get(index / self.entries_per_sector)
            .ok_or_else(|| CfbError::NotFound(format!("stream ID {stream_id}")))?;
        let offset =
            store.sector_offset(*sector) + ((index % self.entries_per_sector) * DIRENTRY_SIZE) as u64;
        store.write_at(offset, &self.entries[index].encode())
    }

    /// Append a directory sector filled with free slots; returns its first slot.
    fn grow<F: Read + Write + Seek>(
        &mut self,
        header: &mut Header,
        fat: &mut AllocationTable,
        store: &mut SectorStore<F>,
    ) -> CfbResult<u32> {
        let tail = self.sectors.last().copied();
        let sector = fat.allocate_sector(header, store, tail)?;

        let first = self.entries.len() as u32;
        let mut data = Vec::with_capacity(store.sector_size());
        for i in 0..self.entries_per_sector as u32 {
            let slot = DirectoryEntry::free(first + i);
            data.extend_from_slice(&slot.encode());
            self.entries.push(slot);
        }
        store.write_sector(sector, &data)?;
        self.sectors.push(sector);

        if header.major_version == 4 {
            header.num_directory_sectors += 1;
            header.write_to(store)?;
        }

        debug!(
            target: store.log_target(),
            "added directory sector {sector} (slots {first}..{})",
            self.entries.len()
        );
        Ok(first)
    }

    fn left(&self, sid: u32) -> u32 {
        self.entries[sid as usize].left_sibling
    }

    fn right(&self, sid: u32) -> u32 {
        self.entries[sid as usize].right_sibling
    }

    fn set_left(&mut self, sid: u32, value: u32) {
        self.entries[sid as usize].left_sibling = value;
    }

    fn set_right(&mut self, sid: u32, value: u32) {
        self.entries[sid as usize].right_sibling = value;
    }

    fn color(&self, sid: u32) -> NodeColor {
        self.entries[sid as usize].color
    }

    fn set_color(&mut self, sid: u32, color: NodeColor) {
        self.entries[sid as usize].color = color;
    }

    fn rotate_left(&mut self, x: u32) -> u32 {
        let y = self.right(x);
        self.set_right(x, self.left(y));
        self.set_left(y, x);
        y
    }

    fn rotate_right(&mut self, x: u32) -> u32 {
        let y = self.left(x);
        self.set_left(x, self.right(y));
        self.set_right(y, x);
        y
    }

    /// Point whatever held `old` (a sibling or the storage's child link) at `new`.
    fn replace_link(&mut self, storage: u32, holder: Option<u32>, old: u32, new: u32) {
        match holder {
            None => self.entries[storage as usize].child = new,
            Some(h) if self.left(h) == old => self.set_left(h, new),
            Some(h) => self.set_right(h, new),
        }
    }

    /// Red-black insertion. Returns every stream ID whose record changed.
    fn link_red_black(&mut self, storage: u32, node: u32) -> Vec<u32> {
        let mut touched = vec![storage, node];
        let root = self.entries[storage as usize].child;
        if root == NOSTREAM {
            self.entries[storage as usize].child = node;
            self.set_color(node, NodeColor::Black);
            return touched;
        }

        // Plain BST descent, remembering the path for the fix-up
        let mut path = Vec::new();
        let mut current = root;
        loop {
            path.push(current);
            let goes_left = compare_names(
                &self.entries[node as usize].name,
                &self.entries[current as usize].name,
            ) == Ordering::Less;
            let next = if goes_left {
                self.left(current)
            } else {
                self.right(current)
            };
            if next == NOSTREAM {
                if goes_left {
                    self.set_left(current, node);
                } else {
                    self.set_right(current, node);
                }
                touched.push(current);
                break;
            }
            current = next;
        }
        self.set_color(node, NodeColor::Red);

        let mut node = node;
        while let Some(&parent) = path.last() {
            // A red tree root only shows up in trees written by other tools; it
            // is repainted below
            if self.color(parent) == NodeColor::Black || path.len() < 2 {
                break;
            }
            let grand = path[path.len() - 2];
            let parent_is_left = self.left(grand) == parent;
            let uncle = if parent_is_left {
                self.right(grand)
            } else {
                self.left(grand)
            };

            if uncle != NOSTREAM && self.color(uncle) == NodeColor::Red {
                self.set_color(parent, NodeColor::Black);
                self.set_color(uncle, NodeColor::Black);
                self.set_color(grand, NodeColor::Red);
                touched.extend([parent, uncle, grand]);
                node = grand;
                path.truncate(path.len() - 2);
                continue;
            }

            let holder = path.len().checked_sub(3).map(|i| path[i]);
            let top = if parent_is_left {
                if self.right(parent) == node {
                    let lifted = self.rotate_left(parent);
                    self.set_left(grand, lifted);
                }
                self.rotate_right(grand)
            } else {
                if self.left(parent) == node {
                    let lifted = self.rotate_right(parent);
                    self.set_right(grand, lifted);
                }
                self.rotate_left(grand)
            };
            self.replace_link(storage, holder, grand, top);
            self.set_color(top, NodeColor::Black);
            self.set_color(grand, NodeColor::Red);
            touched.extend([parent, node, grand, top]);
            touched.extend(holder);
            break;
        }

        let root = self.entries[storage as usize].child;
        if self.color(root) != NodeColor::Black {
            self.set_color(root, NodeColor::Black);
            touched.push(root);
        }
        touched
    }

    /// Right-first attachment, then the whole level is painted black.
    fn link_legacy(&mut self, storage: u32, node: u32) -> Vec<u32> {
        let root = self.entries[storage as usize].child;
        if root == NOSTREAM {
            self.entries[storage as usize].child = node;
        } else {
            let mut current = root;
            loop {
                if self.right(current) == NOSTREAM {
                    self.set_right(current, node);
                    break;
                }
                let left = self.left(current);
                if left == NOSTREAM {
                    self.set_left(current, node);
                    break;
                }
                let goes_left = compare_names(
                    &self.entries[node as usize].name,
                    &self.entries[left as usize].name,
                ) == Ordering::Greater;
                current = if goes_left { left } else { self.right(current) };
            }
        }

        let mut touched = vec![storage];
        let mut stack = vec![self.entries[storage as usize].child];
        while let Some(sid) = stack.pop() {
            if sid == NOSTREAM || touched.contains(&sid) {
                continue;
            }
            self.set_color(sid, NodeColor::Black);
            touched.push(sid);
            stack.push(self.left(sid));
            stack.push(self.right(sid));
        }
        touched
    }
}

#[cfg(test)]
impl DirectoryTree {
    /// Root-only tree without backing sectors, for exercising the linking logic.
    pub(crate) fn detached(balancing: TreeBalancing) -> Self {
        Self {
            entries: vec![DirectoryEntry::root([0; 16], ENDOFCHAIN)],
            sectors: Vec::new(),
            entries_per_sector: 4,
            balancing,
        }
    }

    /// Push an entry and link it under `parent` without touching a store.
    pub(crate) fn attach_detached(&mut self, parent: u32, mut entry: DirectoryEntry) -> u32 {
        let sid = self.entries.len() as u32;
        entry.stream_id = sid;
        self.entries.push(entry);
        match self.balancing {
            TreeBalancing::RedBlack => self.link_red_black(parent, sid),
            TreeBalancing::Legacy => self.link_legacy(parent, sid),
        };
        sid
    }
}
