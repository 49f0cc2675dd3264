/// Magic bytes that should be at the beginning of every compound file
pub const MAGIC: &[u8; 8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

/// Size of the on-disk header structure in bytes
pub const HEADER_SIZE: usize = 512;

/// Minimal size of an empty compound file with 512-byte sectors (1536 bytes)
pub const MINIMAL_CFB_SIZE: usize = 1536;

/// Size of a directory entry in bytes
pub const DIRENTRY_SIZE: usize = 128;

/// Default sector size for version 3 (512 bytes)
pub const SECTOR_SIZE_V3: usize = 512;

/// Default sector size for version 4 (4096 bytes)
pub const SECTOR_SIZE_V4: usize = 4096;

/// Sector shift for version 3 (2^9 = 512)
pub const SECTOR_SHIFT_V3: u16 = 9;

/// Sector shift for version 4 (2^12 = 4096)
pub const SECTOR_SHIFT_V4: u16 = 12;

/// Mini sector shift (2^6 = 64), fixed for both versions
pub const MINI_SECTOR_SHIFT: u16 = 6;

/// Mini sector size in bytes
pub const MINI_SECTOR_SIZE: usize = 64;

/// Streams smaller than this live in the mini stream
pub const DEFAULT_MINI_STREAM_CUTOFF: u32 = 4096;

/// Minor version written into new headers
pub const MINOR_VERSION: u16 = 0x003E;

/// Byte order mark (little-endian)
pub const BYTE_ORDER_MARK: u16 = 0xFFFE;

/// Number of DIFAT entries stored inline in the header
pub const HEADER_DIFAT_ENTRIES: usize = 109;

/// Longest entry name in UTF-16 code units (excluding the terminator)
pub const MAX_NAME_UNITS: usize = 31;

/// Name of the root storage
pub const ROOT_ENTRY_NAME: &str = "Root Entry";

/// Stream ID of the root storage
pub const ROOT_STREAM_ID: u32 = 0;

// Sector IDs
/// Maximum regular sector ID
pub const MAXREGSECT: u32 = 0xFFFFFFFA; // -6
/// Denotes a DIFAT sector in a FAT
pub const DIFSECT: u32 = 0xFFFFFFFC; // -4
/// Denotes a FAT sector in a FAT
pub const FATSECT: u32 = 0xFFFFFFFD; // -3
/// End of a virtual stream chain
pub const ENDOFCHAIN: u32 = 0xFFFFFFFE; // -2
/// Unallocated sector
pub const FREESECT: u32 = 0xFFFFFFFF; // -1

// Directory Entry IDs
/// Maximum directory entry ID
pub const MAXREGSID: u32 = 0xFFFFFFFA; // -6
/// Unallocated directory entry
pub const NOSTREAM: u32 = 0xFFFFFFFF; // -1

// Object types in storage
/// Empty directory entry
pub const STGTY_EMPTY: u8 = 0;
/// Element is a storage object
pub const STGTY_STORAGE: u8 = 1;
/// Element is a stream object
pub const STGTY_STREAM: u8 = 2;
/// Element is a root storage
pub const STGTY_ROOT: u8 = 5;

// Node colors
pub const COLOR_RED: u8 = 0;
pub const COLOR_BLACK: u8 = 1;
