//! Integration tests for the container
//!
//! These tests build containers in memory (or in temporary files), reopen
//! them from their bytes and check what comes back.

use super::consts::*;
use super::{CfbError, CfbOptions, CompoundFile, NodeColor, ObjectType, TreeBalancing};
use proptest::prelude::*;
use std::fs;
use std::io::{Cursor, Read};

type MemCfb = CompoundFile<Cursor<Vec<u8>>>;

fn fresh() -> MemCfb {
    CompoundFile::create_in(Cursor::new(Vec::<u8>::new())).unwrap()
}

fn reopen(cfb: MemCfb) -> MemCfb {
    let bytes = cfb.into_inner().into_inner();
    CompoundFile::from_store(Cursor::new(bytes)).unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[test]
fn test_empty_container_layout() {
    let cfb = fresh();
    let bytes = cfb.into_inner().into_inner();
    // Header plus FAT, directory, MiniFAT and mini stream sectors
    assert_eq!(bytes.len(), 5 * 512);
    assert_eq!(&bytes[0..8], MAGIC);

    let cfb = CompoundFile::from_store(Cursor::new(bytes)).unwrap();
    assert_eq!(cfb.header().major_version, 3);
    assert_eq!(cfb.root().name, "Root Entry");
    assert_eq!(cfb.root().start_sector, 3);
    assert_eq!(cfb.root().stream_size, 0);
    assert_eq!(cfb.directory_entries().len(), 1);
    assert!(cfb.entries_in_dir(ROOT_STREAM_ID).unwrap().is_empty());
}

#[test]
fn test_mini_stream_round_trip() {
    let mut cfb = fresh();
    let data = pattern(100);
    let entry = cfb.add_file("Stream", &data).unwrap();
    assert_eq!(entry.stream_size, 100);
    assert_eq!(entry.start_sector, 0);

    let mut cfb = reopen(cfb);
    assert_eq!(cfb.root().stream_size, 128);
    assert_eq!(cfb.minifat().chain(0).unwrap(), vec![0, 1]);

    let entry = cfb.entry_by_path("Stream").unwrap().unwrap();
    let mut stream = cfb.entry_stream(&entry).unwrap();
    assert!(stream.is_mini());
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn test_sector_stream_round_trip() {
    let mut cfb = fresh();
    let data = pattern(5000);
    let entry = cfb.add_file("Large", &data).unwrap();
    assert_eq!(entry.start_sector, 4);

    let mut cfb = reopen(cfb);
    // 5000 bytes take 10 sectors
    assert_eq!(cfb.fat().chain(4).unwrap().len(), 10);

    let entry = cfb.entry_by_path("/Large").unwrap().unwrap();
    assert!(!cfb.entry_stream(&entry).unwrap().is_mini());
    assert_eq!(cfb.read_entry("Large").unwrap(), data);
}

#[test]
fn test_empty_stream_takes_one_mini_sector() {
    let mut cfb = fresh();
    let entry = cfb.add_file("Empty", b"").unwrap();
    assert_eq!(entry.stream_size, 0);

    let mut cfb = reopen(cfb);
    assert_eq!(cfb.minifat().entries()[entry.start_sector as usize], ENDOFCHAIN);
    assert_eq!(cfb.root().stream_size, 64);
    assert!(cfb.read_entry("Empty").unwrap().is_empty());
}

#[test]
fn test_cutoff_boundary() {
    let mut cfb = fresh();
    cfb.add_file("below", &pattern(4095)).unwrap();
    cfb.add_file("at", &pattern(4096)).unwrap();

    let mut cfb = reopen(cfb);
    let below = cfb.entry_by_path("below").unwrap().unwrap();
    let at = cfb.entry_by_path("at").unwrap().unwrap();
    assert!(cfb.entry_stream(&below).unwrap().is_mini());
    assert!(!cfb.entry_stream(&at).unwrap().is_mini());
    assert_eq!(cfb.read_entry("below").unwrap(), pattern(4095));
    assert_eq!(cfb.read_entry("at").unwrap(), pattern(4096));
}

#[test]
fn test_custom_cutoff() {
    let options = CfbOptions::new().with_mini_stream_cutoff(256);
    let mut cfb = CompoundFile::create_in_with(Cursor::new(Vec::<u8>::new()), options).unwrap();
    cfb.add_file("small", &pattern(255)).unwrap();
    cfb.add_file("big", &pattern(256)).unwrap();

    let mut cfb = reopen(cfb);
    assert_eq!(cfb.header().mini_stream_cutoff, 256);
    let big = cfb.entry_by_path("big").unwrap().unwrap();
    assert!(!cfb.entry_stream(&big).unwrap().is_mini());
    assert_eq!(cfb.read_entry("small").unwrap(), pattern(255));
    assert_eq!(cfb.read_entry("big").unwrap(), pattern(256));
}

#[test]
fn test_nested_directories() {
    let mut cfb = fresh();
    let c = cfb.add_directory("a/b/c").unwrap();
    assert!(c.is_storage());
    cfb.add_file("a/b/c/file", b"payload").unwrap();

    let mut cfb = reopen(cfb);
    for path in ["a", "a/b", "a/b/c", "/a/b/c/"] {
        let entry = cfb.entry_by_path(path).unwrap().unwrap();
        assert!(entry.is_storage(), "{path}");
    }
    assert!(cfb.entry_by_path("a/b/c/file").unwrap().unwrap().is_stream());
    assert!(cfb.entry_by_path("a/b/c/file/").unwrap().is_none());
    assert!(cfb.entry_by_path("a/b/c/missing").unwrap().is_none());

    let storages = cfb
        .directory_entries()
        .iter()
        .filter(|e| e.object_type == ObjectType::Storage)
        .count();
    assert_eq!(storages, 3);
    let with_slash = cfb.entry_by_path("a/b/c/").unwrap().unwrap();
    let without = cfb.entry_by_path("a/b/c").unwrap().unwrap();
    assert_eq!(with_slash.stream_id, without.stream_id);
    assert_eq!(with_slash.stream_id, c.stream_id);

    let b = cfb.entry_by_path("a/b").unwrap().unwrap();
    let children = cfb.children_of(&b).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, "c");
    assert_eq!(cfb.read_entry("a/b/c/file").unwrap(), b"payload");
}

#[test]
fn test_add_directory_is_idempotent() {
    let mut cfb = fresh();
    let first = cfb.add_directory("LIBRARY/Folder").unwrap();
    let count = cfb.directory_entries().len();
    let second = cfb.add_directory("/LIBRARY/Folder/").unwrap();

    assert_eq!(first.stream_id, second.stream_id);
    assert_eq!(cfb.directory_entries().len(), count);
    assert!(cfb.add_directory("").unwrap().is_root());

    // Repeating the call leaves the container byte-for-byte unchanged
    let before = cfb.into_inner().into_inner();
    let mut cfb = CompoundFile::from_store(Cursor::new(before.clone())).unwrap();
    let again = cfb.add_directory("LIBRARY/Folder").unwrap();
    assert_eq!(again.stream_id, first.stream_id);
    assert!(cfb.add_directory("LIBRARY").unwrap().is_storage());
    assert_eq!(cfb.into_inner().into_inner(), before);
}

#[test]
fn test_sibling_names_unique_ignoring_case() {
    let mut cfb = fresh();
    cfb.add_file("Contents", b"first").unwrap();
    assert!(matches!(
        cfb.add_file("CONTENTS", b"second"),
        Err(CfbError::PathConflict(_))
    ));
    assert!(matches!(
        cfb.add_directory("contents"),
        Err(CfbError::NotAStorage(_))
    ));

    let library = cfb.add_directory("LIBRARY").unwrap();
    let reused = cfb.add_directory("Library").unwrap();
    assert_eq!(reused.stream_id, library.stream_id);
    assert_eq!(reused.name, "LIBRARY");
    cfb.add_file("library/Symbol 1", b"sym").unwrap();
    assert!(matches!(
        cfb.add_file("LIBRARY/SYMBOL 1", b"dup"),
        Err(CfbError::PathConflict(_))
    ));

    let mut cfb = reopen(cfb);
    let root = cfb.root().clone();
    let names: Vec<_> = cfb
        .children_of(&root)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"Contents".to_string()));
    assert!(names.contains(&"LIBRARY".to_string()));
    assert_eq!(cfb.read_entry("Contents").unwrap(), b"first");
    assert_eq!(cfb.read_entry("LIBRARY/Symbol 1").unwrap(), b"sym");
}

#[test]
fn test_name_length_boundary() {
    let mut cfb = fresh();
    let ok = "n".repeat(31);
    cfb.add_file(&ok, b"x").unwrap();

    let count = cfb.directory_entries().len();
    let too_long = format!("dir/{}", "n".repeat(32));
    assert!(matches!(
        cfb.add_file(&too_long, b"x"),
        Err(CfbError::NameTooLong { units: 32, .. })
    ));
    // Nothing was written, not even the parent storage
    assert_eq!(cfb.directory_entries().len(), count);

    let mut cfb = reopen(cfb);
    assert_eq!(cfb.read_entry(&ok).unwrap(), b"x");
}

#[test]
fn test_path_conflicts() {
    let mut cfb = fresh();
    cfb.add_file("dir/stream", b"one").unwrap();

    assert!(matches!(
        cfb.add_file("dir/stream", b"two"),
        Err(CfbError::PathConflict(_))
    ));
    assert!(matches!(
        cfb.add_file("dir", b"two"),
        Err(CfbError::PathConflict(_))
    ));
    assert!(matches!(
        cfb.add_file("dir/stream/inner", b"two"),
        Err(CfbError::NotAStorage(_))
    ));
    assert!(matches!(
        cfb.add_directory("dir/stream"),
        Err(CfbError::NotAStorage(_))
    ));
    assert!(matches!(
        cfb.add_file("dir/", b"two"),
        Err(CfbError::InvalidPath(_))
    ));
    assert_eq!(cfb.read_entry("dir/stream").unwrap(), b"one");
}

#[test]
fn test_lookup_errors() {
    let mut cfb = fresh();
    cfb.add_directory("storage").unwrap();

    assert!(matches!(cfb.read_entry("missing"), Err(CfbError::NotFound(_))));
    assert!(matches!(cfb.read_entry("storage"), Err(CfbError::NotAStream(_))));

    let root = cfb.root().clone();
    assert!(matches!(cfb.entry_stream(&root), Err(CfbError::NotAStream(_))));
}

#[test]
fn test_directory_grows_past_first_sector() {
    let mut cfb = fresh();
    for i in 0..10 {
        cfb.add_file(&format!("Stream {i}"), &pattern(i * 300)).unwrap();
    }

    let mut cfb = reopen(cfb);
    let root = cfb.root().clone();
    assert_eq!(cfb.children_of(&root).unwrap().len(), 10);
    // Four 128-byte records per 512-byte sector: 11 entries need 3 sectors
    assert_eq!(cfb.fat().chain(1).unwrap().len(), 3);
    assert_eq!(cfb.directory_entries().len(), 11);
    for i in 0..10 {
        assert_eq!(cfb.read_entry(&format!("Stream {i}")).unwrap(), pattern(i * 300));
    }
}

#[test]
fn test_siblings_stay_red_black() {
    let mut cfb = fresh();
    for i in 0..40 {
        cfb.add_file(&format!("S{i:02}"), b"x").unwrap();
    }
    let cfb = reopen(cfb);

    fn black_height(entries: &[super::DirectoryEntry], sid: u32) -> usize {
        if sid == NOSTREAM {
            return 1;
        }
        let entry = &entries[sid as usize];
        for child in [entry.left_sibling, entry.right_sibling] {
            if entry.color == NodeColor::Red && child != NOSTREAM {
                assert_eq!(entries[child as usize].color, NodeColor::Black);
            }
        }
        let left = black_height(entries, entry.left_sibling);
        assert_eq!(left, black_height(entries, entry.right_sibling));
        left + usize::from(entry.color == NodeColor::Black)
    }

    let entries = cfb.directory_entries();
    let root_child = cfb.root().child;
    assert_eq!(entries[root_child as usize].color, NodeColor::Black);
    black_height(&entries, root_child);
}

#[test]
fn test_legacy_balancing_paints_black() {
    let options = CfbOptions::new().with_balancing(TreeBalancing::Legacy);
    let mut cfb = CompoundFile::create_in_with(Cursor::new(Vec::<u8>::new()), options).unwrap();
    for name in ["Contents", "Page 1", "Symbol 1", "Media 1", "M"] {
        cfb.add_file(name, name.as_bytes()).unwrap();
    }

    let mut cfb = reopen(cfb);
    for entry in cfb.directory_entries().iter().filter(|e| e.is_stream()) {
        assert_eq!(entry.color, NodeColor::Black);
    }
    for name in ["Contents", "Page 1", "Symbol 1", "Media 1", "M"] {
        assert_eq!(cfb.read_entry(name).unwrap(), name.as_bytes());
    }
}

#[test]
fn test_large_stream_grows_difat() {
    let mut cfb = fresh();
    // 109 FAT sectors map 13952 sectors; this payload needs 14000
    let data = pattern(14_000 * 512);
    cfb.add_file("Huge", &data).unwrap();
    assert_eq!(cfb.header().num_difat_sectors, 1);
    assert!(cfb.header().num_fat_sectors > 109);

    let mut cfb = reopen(cfb);
    assert_eq!(cfb.fat().difat_sectors().len(), 1);
    assert_eq!(
        cfb.fat().fat_sectors().len(),
        cfb.header().num_fat_sectors as usize
    );
    assert_eq!(cfb.read_entry("Huge").unwrap(), data);

    // Small streams still work after the table has grown
    cfb.add_file("Tiny", b"tiny").unwrap();
    let mut cfb = reopen(cfb);
    assert_eq!(cfb.read_entry("Tiny").unwrap(), b"tiny");
}

#[test]
fn test_version_4_container() {
    let options = CfbOptions::new().with_version(4);
    let mut cfb = CompoundFile::create_in_with(Cursor::new(Vec::<u8>::new()), options).unwrap();
    assert_eq!(cfb.header().sector_size(), 4096);
    assert_eq!(cfb.header().num_directory_sectors, 1);

    for i in 0..40 {
        cfb.add_file(&format!("dir/entry {i}"), &pattern(i * 200)).unwrap();
    }
    // 32 records per sector: 42 entries need a second directory sector
    assert_eq!(cfb.header().num_directory_sectors, 2);

    let mut cfb = reopen(cfb);
    assert_eq!(cfb.header().major_version, 4);
    for i in 0..40 {
        assert_eq!(
            cfb.read_entry(&format!("dir/entry {i}")).unwrap(),
            pattern(i * 200)
        );
    }
}

#[test]
fn test_root_clsid() {
    let options = CfbOptions::new().with_root_clsid("{00020906-0000-0000-c000-000000000046}");
    let mut cfb = CompoundFile::create_in_with(Cursor::new(Vec::<u8>::new()), options).unwrap();
    assert_eq!(cfb.root_clsid(), "00020906-0000-0000-C000-000000000046");

    cfb.set_root_clsid("4A2F2E5D-7A8B-11D3-9B40-00A0C9B0B5A4").unwrap();
    assert!(matches!(
        cfb.set_root_clsid("4A2F2E5D"),
        Err(CfbError::InvalidClsid(_))
    ));

    let cfb = reopen(cfb);
    assert_eq!(cfb.root_clsid(), "4A2F2E5D-7A8B-11D3-9B40-00A0C9B0B5A4");
}

#[test]
fn test_timestamps() {
    let mut cfb = fresh();
    cfb.add_file("dir/stream", b"x").unwrap();
    let cfb = reopen(cfb);

    let dir = cfb.entry_by_path("dir").unwrap().unwrap();
    assert!(dir.creation_time.is_some());
    assert!(dir.modified_time.is_some());
    let stream = cfb.entry_by_path("dir/stream").unwrap().unwrap();
    assert!(stream.creation_time.is_none());
    assert!(cfb.root().creation_time.is_none());
}

#[test]
fn test_corrupted_signature() {
    let mut bytes = fresh().into_inner().into_inner();
    bytes[0] ^= 0xFF;
    assert!(matches!(
        CompoundFile::from_store(Cursor::new(bytes)),
        Err(CfbError::MalformedHeader {
            field: "signature",
            ..
        })
    ));
}

#[test]
fn test_truncated_store() {
    let bytes = fresh().into_inner().into_inner();
    assert!(matches!(
        CompoundFile::from_store(Cursor::new(bytes[..1000].to_vec())),
        Err(CfbError::TruncatedStore { offset: 512, .. })
    ));

    let mut cfb = fresh();
    cfb.add_file("Large", &pattern(5000)).unwrap();
    let mut bytes = cfb.into_inner().into_inner();
    bytes.truncate(bytes.len() - 600);
    let mut cfb = CompoundFile::from_store(Cursor::new(bytes)).unwrap();
    assert!(cfb.read_entry("Large").is_err());
}

#[test]
fn test_files_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("movie.fla");

    let mut cfb = CompoundFile::create(&path).unwrap();
    cfb.add_file("Contents", b"contents").unwrap();
    cfb.close();

    let mut cfb = CompoundFile::open_rw(&path).unwrap();
    assert_eq!(cfb.read_entry("Contents").unwrap(), b"contents");
    cfb.add_file("LIBRARY/Symbol 1", &pattern(6000)).unwrap();
    cfb.close();

    let mut cfb = CompoundFile::open(&path).unwrap();
    assert_eq!(cfb.read_entry("Contents").unwrap(), b"contents");
    assert_eq!(cfb.read_entry("LIBRARY/Symbol 1").unwrap(), pattern(6000));
    assert!(super::is_cfb_file(&fs::read(&path).unwrap()));
}

#[test]
fn test_add_directory_contents() {
    let source = tempfile::tempdir().unwrap();
    fs::write(source.path().join("b.xml"), b"<b/>").unwrap();
    fs::write(source.path().join("a.bin"), pattern(5000)).unwrap();
    fs::create_dir_all(source.path().join("sub/deeper")).unwrap();
    fs::write(source.path().join("sub/c.txt"), b"c").unwrap();
    fs::write(source.path().join("sub/deeper/d"), b"").unwrap();

    let mut cfb = fresh();
    let added = cfb.add_directory_contents("LIBRARY", source.path()).unwrap();
    let names: Vec<_> = added.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["a.bin", "b.xml", "sub", "c.txt", "deeper", "d"]);
    let storages: Vec<_> = added
        .iter()
        .filter(|e| e.is_storage())
        .map(|e| e.name.as_str())
        .collect();
    assert_eq!(storages, ["sub", "deeper"]);
    assert_eq!(added.iter().filter(|e| e.is_stream()).count(), 4);
    assert_eq!(added[0].stream_size, 5000);

    let mut cfb = reopen(cfb);
    assert!(cfb.entry_by_path("LIBRARY/sub/deeper/").unwrap().is_some());
    assert_eq!(cfb.read_entry("LIBRARY/b.xml").unwrap(), b"<b/>");
    assert_eq!(cfb.read_entry("LIBRARY/a.bin").unwrap(), pattern(5000));
    assert_eq!(cfb.read_entry("LIBRARY/sub/c.txt").unwrap(), b"c");
    assert!(cfb.read_entry("LIBRARY/sub/deeper/d").unwrap().is_empty());

    // Sorted insertion: a.bin is added before b.xml
    let a = cfb.entry_by_path("LIBRARY/a.bin").unwrap().unwrap();
    let b = cfb.entry_by_path("LIBRARY/b.xml").unwrap().unwrap();
    assert!(a.stream_id < b.stream_id);
}

#[test]
fn test_add_file_from_path() {
    let source = tempfile::NamedTempFile::new().unwrap();
    fs::write(source.path(), pattern(700)).unwrap();

    let mut cfb = fresh();
    let entry = cfb.add_file_from_path("bin/data", source.path()).unwrap();
    assert_eq!(entry.stream_size, 700);
    assert_eq!(cfb.read_entry("bin/data").unwrap(), pattern(700));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_streams_round_trip(
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..9000), 1..6)
    ) {
        let mut cfb = fresh();
        for (i, payload) in payloads.iter().enumerate() {
            cfb.add_file(&format!("dir {}/stream", i % 2), &[]).ok();
            cfb.add_file(&format!("s{i}"), payload).unwrap();
        }

        let mut cfb = reopen(cfb);
        for (i, payload) in payloads.iter().enumerate() {
            let data = cfb.read_entry(&format!("s{i}")).unwrap();
            prop_assert_eq!(&data, payload);
        }
    }
}
