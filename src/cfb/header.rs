//! Compound file header parsing and generation
//!
//! The header occupies the first 512 bytes of the file. For version 4 files
//! the first sector slot is 4096 bytes long and the remainder is zero.

use super::consts::*;
use super::error::{CfbError, CfbResult};
use super::store::SectorStore;
use std::io::{Read, Seek, Write};
use zerocopy::{FromBytes, IntoBytes, LE, U16, U32};
use zerocopy_derive::{FromBytes as DeriveFromBytes, Immutable, IntoBytes as DeriveIntoBytes};

/// Raw compound file header (512 bytes)
///
/// This represents the on-disk format of the header.
#[derive(Debug, Clone, DeriveFromBytes, DeriveIntoBytes, Immutable)]
#[repr(C)]
struct RawHeader {
    /// Signature (D0 CF 11 E0 A1 B1 1A E1)
    signature: [u8; 8],
    /// Header CLSID, must be all zeros
    clsid: [u8; 16],
    /// Minor version (0x003E)
    minor_version: U16<LE>,
    /// Major version (3 or 4)
    major_version: U16<LE>,
    /// Byte order mark (0xFFFE)
    byte_order: U16<LE>,
    /// Sector shift (9 or 12)
    sector_shift: U16<LE>,
    /// Mini sector shift (6)
    mini_sector_shift: U16<LE>,
    /// Reserved, must be zero
    reserved: [u8; 6],
    /// Number of directory sectors (zero for version 3)
    num_directory_sectors: U32<LE>,
    /// Number of FAT sectors
    num_fat_sectors: U32<LE>,
    /// First directory sector
    first_directory_sector: U32<LE>,
    /// Transaction signature number
    transaction_signature: U32<LE>,
    /// Mini stream cutoff size
    mini_stream_cutoff: U32<LE>,
    /// First MiniFAT sector
    first_minifat_sector: U32<LE>,
    /// Number of MiniFAT sectors
    num_minifat_sectors: U32<LE>,
    /// First DIFAT sector
    first_difat_sector: U32<LE>,
    /// Number of DIFAT sectors
    num_difat_sectors: U32<LE>,
    /// First 109 FAT sector locations
    difat: [U32<LE>; HEADER_DIFAT_ENTRIES],
}

/// Parsed compound file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Minor version
    pub minor_version: u16,
    /// Major version (3 or 4)
    pub major_version: u16,
    /// Sector shift (9 for version 3, 12 for version 4)
    pub sector_shift: u16,
    /// Mini sector shift (always 6)
    pub mini_sector_shift: u16,
    /// Number of directory sectors (csectDir)
    pub num_directory_sectors: u32,
    /// Number of FAT sectors
    pub num_fat_sectors: u32,
    /// First directory sector
    pub first_directory_sector: u32,
    /// Transaction signature number
    pub transaction_signature: u32,
    /// Streams below this size are stored in the mini stream
    pub mini_stream_cutoff: u32,
    /// First MiniFAT sector, or ENDOFCHAIN
    pub first_minifat_sector: u32,
    /// Number of MiniFAT sectors
    pub num_minifat_sectors: u32,
    /// First DIFAT sector, or ENDOFCHAIN
    pub first_difat_sector: u32,
    /// Number of DIFAT sectors
    pub num_difat_sectors: u32,
    /// Inline DIFAT entries
    pub difat: [u32; HEADER_DIFAT_ENTRIES],
}

impl Header {
    /// Header of a brand-new container.
    ///
    /// The layout it describes is: sector 0 holds the FAT, sector 1 the
    /// directory, sector 2 the MiniFAT and sector 3 the first mini stream sector.
    pub fn new_empty(version: u16, mini_stream_cutoff: u32) -> CfbResult<Self> {
        let sector_shift = match version {
            3 => SECTOR_SHIFT_V3,
            4 => SECTOR_SHIFT_V4,
            other => {
                return Err(CfbError::Config(format!(
                    "unsupported major version {other}"
                )));
            },
        };

        let mut difat = [FREESECT; HEADER_DIFAT_ENTRIES];
        difat[0] = 0;

        Ok(Self {
            minor_version: MINOR_VERSION,
            major_version: version,
            sector_shift,
            mini_sector_shift: MINI_SECTOR_SHIFT,
            num_directory_sectors: if version == 4 { 1 } else { 0 },
            num_fat_sectors: 1,
            first_directory_sector: 1,
            transaction_signature: 0,
            mini_stream_cutoff,
            first_minifat_sector: 2,
            num_minifat_sectors: 1,
            first_difat_sector: ENDOFCHAIN,
            num_difat_sectors: 0,
            difat,
        })
    }

    /// Parse and validate the 512-byte header block
    pub fn parse(bytes: &[u8]) -> CfbResult<Self> {
        let raw = RawHeader::read_from_bytes(bytes.get(..HEADER_SIZE).ok_or(
            CfbError::TruncatedStore {
                offset: 0,
                needed: HEADER_SIZE,
            },
        )?)
        .map_err(|_| CfbError::malformed("header", "failed to map header block"))?;

        if &raw.signature != MAGIC {
            return Err(CfbError::malformed(
                "signature",
                format!("expected {:02X?}, found {:02X?}", MAGIC, raw.signature),
            ));
        }
        if raw.clsid.iter().any(|&b| b != 0) {
            return Err(CfbError::malformed("clsid", "header CLSID must be null"));
        }
        let byte_order = raw.byte_order.get();
        if byte_order != BYTE_ORDER_MARK {
            return Err(CfbError::malformed(
                "byte_order",
                format!("expected 0xFFFE, found {byte_order:#06X}"),
            ));
        }

        let major_version = raw.major_version.get();
        let expected_shift = match major_version {
            3 => SECTOR_SHIFT_V3,
            4 => SECTOR_SHIFT_V4,
            other => {
                return Err(CfbError::malformed(
                    "major_version",
                    format!("version {other} is not 3 or 4"),
                ));
            },
        };
        let sector_shift = raw.sector_shift.get();
        if sector_shift != expected_shift {
            return Err(CfbError::malformed(
                "sector_shift",
                format!("version {major_version} requires shift {expected_shift}, found {sector_shift}"),
            ));
        }
        let mini_sector_shift = raw.mini_sector_shift.get();
        if mini_sector_shift != MINI_SECTOR_SHIFT {
            return Err(CfbError::malformed(
                "mini_sector_shift",
                format!("expected 6, found {mini_sector_shift}"),
            ));
        }
        if raw.reserved.iter().any(|&b| b != 0) {
            return Err(CfbError::malformed("reserved", "reserved bytes must be zero"));
        }
        let num_directory_sectors = raw.num_directory_sectors.get();
        if major_version == 3 && num_directory_sectors != 0 {
            return Err(CfbError::malformed(
                "num_directory_sectors",
                format!("must be 0 for version 3, found {num_directory_sectors}"),
            ));
        }

        Ok(Self {
            minor_version: raw.minor_version.get(),
            major_version,
            sector_shift,
            mini_sector_shift,
            num_directory_sectors,
            num_fat_sectors: raw.num_fat_sectors.get(),
            first_directory_sector: raw.first_directory_sector.get(),
            transaction_signature: raw.transaction_signature.get(),
            mini_stream_cutoff: raw.mini_stream_cutoff.get(),
            first_minifat_sector: raw.first_minifat_sector.get(),
            num_minifat_sectors: raw.num_minifat_sectors.get(),
            first_difat_sector: raw.first_difat_sector.get(),
            num_difat_sectors: raw.num_difat_sectors.get(),
            difat: raw.difat.map(|entry| entry.get()),
        })
    }

    /// Serialize to the 512-byte on-disk block
    pub fn to_bytes(&self) -> Vec<u8> {
        let raw = RawHeader {
            signature: *MAGIC,
            clsid: [0; 16],
            minor_version: U16::new(self.minor_version),
            major_version: U16::new(self.major_version),
            byte_order: U16::new(BYTE_ORDER_MARK),
            sector_shift: U16::new(self.sector_shift),
            mini_sector_shift: U16::new(self.mini_sector_shift),
            reserved: [0; 6],
            num_directory_sectors: U32::new(self.num_directory_sectors),
            num_fat_sectors: U32::new(self.num_fat_sectors),
            first_directory_sector: U32::new(self.first_directory_sector),
            transaction_signature: U32::new(self.transaction_signature),
            mini_stream_cutoff: U32::new(self.mini_stream_cutoff),
            first_minifat_sector: U32::new(self.first_minifat_sector),
            num_minifat_sectors: U32::new(self.num_minifat_sectors),
            first_difat_sector: U32::new(self.first_difat_sector),
            num_difat_sectors: U32::new(self.num_difat_sectors),
            difat: self.difat.map(U32::new),
        };
        raw.as_bytes().to_vec()
    }

    /// Sector size in bytes (512 or 4096)
    pub fn sector_size(&self) -> usize {
        1usize << self.sector_shift
    }

    /// Mini sector size in bytes (64)
    pub fn mini_sector_size(&self) -> usize {
        1usize << self.mini_sector_shift
    }

    pub(crate) fn read_from<F: Read + Seek>(store: &mut SectorStore<F>) -> CfbResult<Self> {
        let mut block = [0u8; HEADER_SIZE];
        store.read_exact_at(0, &mut block)?;
        Self::parse(&block)
    }

    /// Rewrite the header block, padding version 4 headers to a full sector.
    pub(crate) fn write_to<F: Write + Seek>(&self, store: &mut SectorStore<F>) -> CfbResult<()> {
        let mut block = self.to_bytes();
        block.resize(self.sector_size(), 0);
        store.write_at(0, &block)
    }
}

/// Check if data looks like a compound file by checking magic bytes
pub fn is_cfb_file(data: &[u8]) -> bool {
    data.len() >= MINIMAL_CFB_SIZE && &data[0..8] == MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_block() -> Vec<u8> {
        Header::new_empty(3, DEFAULT_MINI_STREAM_CUTOFF)
            .unwrap()
            .to_bytes()
    }

    fn field_of(err: CfbError) -> &'static str {
        match err {
            CfbError::MalformedHeader { field, .. } => field,
            other => panic!("expected MalformedHeader, got {other:?}"),
        }
    }

    #[test]
    fn test_header_generation() {
        let header = valid_block();

        assert_eq!(header.len(), 512);
        assert_eq!(&header[0..8], MAGIC);
        assert_eq!(&header[24..26], &0x003Eu16.to_le_bytes());
        assert_eq!(&header[26..28], &3u16.to_le_bytes());
        assert_eq!(&header[28..30], &0xFFFEu16.to_le_bytes()); // Little-endian marker
        assert_eq!(&header[30..32], &9u16.to_le_bytes());
        assert_eq!(&header[32..34], &6u16.to_le_bytes());
        assert_eq!(&header[44..48], &1u32.to_le_bytes()); // one FAT sector
        assert_eq!(&header[48..52], &1u32.to_le_bytes()); // directory at sector 1
        assert_eq!(&header[56..60], &4096u32.to_le_bytes());
        assert_eq!(&header[60..64], &2u32.to_le_bytes()); // MiniFAT at sector 2
        assert_eq!(&header[68..72], &ENDOFCHAIN.to_le_bytes());
        assert_eq!(&header[76..80], &0u32.to_le_bytes()); // FAT in sector 0
        assert_eq!(&header[80..84], &FREESECT.to_le_bytes());
    }

    #[test]
    fn test_parse_generated() {
        let header = Header::new_empty(4, DEFAULT_MINI_STREAM_CUTOFF).unwrap();
        let parsed = Header::parse(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.sector_size(), 4096);
        assert_eq!(parsed.mini_sector_size(), 64);
        assert_eq!(parsed.num_directory_sectors, 1);
    }

    #[test]
    fn test_unsupported_version_rejected_on_create() {
        assert!(matches!(
            Header::new_empty(5, DEFAULT_MINI_STREAM_CUTOFF),
            Err(CfbError::Config(_))
        ));
    }

    #[test]
    fn test_corrupted_signature() {
        let mut block = valid_block();
        block[3] ^= 0xFF;
        assert_eq!(field_of(Header::parse(&block).unwrap_err()), "signature");
    }

    #[test]
    fn test_nonzero_clsid() {
        let mut block = valid_block();
        block[10] = 1;
        assert_eq!(field_of(Header::parse(&block).unwrap_err()), "clsid");
    }

    #[test]
    fn test_bad_byte_order() {
        let mut block = valid_block();
        block[28..30].copy_from_slice(&0xFEFFu16.to_le_bytes());
        assert_eq!(field_of(Header::parse(&block).unwrap_err()), "byte_order");
    }

    #[test]
    fn test_version_and_shift_must_agree() {
        let mut block = valid_block();
        block[30..32].copy_from_slice(&12u16.to_le_bytes());
        assert_eq!(field_of(Header::parse(&block).unwrap_err()), "sector_shift");

        let mut block = valid_block();
        block[26..28].copy_from_slice(&2u16.to_le_bytes());
        assert_eq!(
            field_of(Header::parse(&block).unwrap_err()),
            "major_version"
        );
    }

    #[test]
    fn test_mini_shift_and_reserved() {
        let mut block = valid_block();
        block[32..34].copy_from_slice(&7u16.to_le_bytes());
        assert_eq!(
            field_of(Header::parse(&block).unwrap_err()),
            "mini_sector_shift"
        );

        let mut block = valid_block();
        block[36] = 1;
        assert_eq!(field_of(Header::parse(&block).unwrap_err()), "reserved");
    }

    #[test]
    fn test_v3_directory_count_must_be_zero() {
        let mut block = valid_block();
        block[40..44].copy_from_slice(&1u32.to_le_bytes());
        assert_eq!(
            field_of(Header::parse(&block).unwrap_err()),
            "num_directory_sectors"
        );
    }

    #[test]
    fn test_is_cfb_file() {
        let mut data = valid_block();
        assert!(!is_cfb_file(&data));
        data.resize(MINIMAL_CFB_SIZE, 0);
        assert!(is_cfb_file(&data));
        data[0] = 0;
        assert!(!is_cfb_file(&data));
    }
}
