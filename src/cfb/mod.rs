//! Compound File Binary (CFB) container engine
//!
//! This module reads and builds MS-CFB (OLE2 structured storage) containers,
//! the format legacy FLA documents are stored in.
//!
//! # Implementation Notes
//!
//! Containers are grow-only: entries and sectors are appended and never
//! removed or reclaimed. Both version 3 (512-byte sectors) and version 4
//! (4096-byte sectors) files are supported.

pub mod consts;

/// Error types
mod error;

/// Sector-addressed store access
mod store;

/// Header parsing and generation
mod header;

/// FAT and DIFAT
mod fat;

/// MiniFAT and mini stream allocation
mod minifat;

/// Directory entries and sibling trees
mod directory;

/// Payload readers
mod stream;

/// Container options
mod options;

/// Container facade
mod container;

/// Integration tests for the container
#[cfg(test)]
mod tests;

pub use container::CompoundFile;
pub use directory::{
    DirectoryEntry, DirectoryTree, EntryPath, NodeColor, ObjectType, compare_names, validate_name,
};
pub use error::{CfbError, CfbResult};
pub use fat::AllocationTable;
pub use header::{Header, is_cfb_file};
pub use minifat::{MiniAllocationTable, MiniStreamLocation};
pub use options::{CfbOptions, TreeBalancing};
pub use stream::{EntryStream, MiniStreamReader, SectorChainReader};
