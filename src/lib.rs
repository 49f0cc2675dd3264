//! flacfb - Compound File Binary engine for legacy FLA documents
//!
//! Legacy Flash authoring documents (FLA) are MS-CFB (OLE2 structured storage)
//! containers: a FAT-style mini filesystem inside a single file. This crate
//! reads existing containers and builds new ones.
//!
//! # Features
//!
//! - **Reading**: header validation, DIFAT/FAT/MiniFAT loading, directory
//!   traversal and streaming reads of any entry
//! - **Writing**: create a container from scratch, add storages and streams,
//!   mirror a directory tree from disk
//! - **Versions**: version 3 (512-byte sectors) and version 4 (4096-byte sectors)
//! - **Configuration**: `CfbOptions` built in code or loaded from YAML
//!
//! # Example - Building a container
//!
//! ```no_run
//! use flacfb::cfb::CompoundFile;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut cfb = CompoundFile::create("movie.fla")?;
//! cfb.set_root_clsid("4A2F2E5D-7A8B-11D3-9B40-00A0C9B0B5A4")?;
//! cfb.add_file("Contents", b"...")?;
//! cfb.add_directory_contents("LIBRARY", "extracted/LIBRARY")?;
//! cfb.close();
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Reading a container
//!
//! ```no_run
//! use flacfb::cfb::CompoundFile;
//! use std::io::Read;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut cfb = CompoundFile::open("movie.fla")?;
//! for entry in cfb.entries_in_dir(cfb.root().stream_id)? {
//!     println!("{} ({} bytes)", entry.name, entry.stream_size);
//! }
//!
//! if let Some(entry) = cfb.entry_by_path("Contents")? {
//!     let mut data = Vec::new();
//!     cfb.entry_stream(&entry)?.read_to_end(&mut data)?;
//! }
//! # Ok(())
//! # }
//! ```

/// Compound File Binary container engine
///
/// Header, allocation tables, directory tree and stream I/O, plus the
/// `CompoundFile` facade tying them together.
pub mod cfb;

/// Byte-level helpers: little-endian fields, UTF-16 names, FILETIME and CLSIDs
pub mod common;

// Re-export commonly used types for convenience
pub use cfb::{CfbError, CfbOptions, CfbResult, CompoundFile, DirectoryEntry, EntryStream};
