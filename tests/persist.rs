use hoptable::persist::{Error, MAGIC, VERSION};
use hoptable::{HashSet, HashTable};

use std::path::PathBuf;
use std::{fs, process};

mod common;
use common::with_table;

// A file in the temporary directory, removed on drop.
struct TempFile(PathBuf);

impl TempFile {
    fn new(name: &str) -> TempFile {
        let path = std::env::temp_dir().join(format!("hoptable-{}-{name}", process::id()));
        TempFile(path)
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

#[test]
fn save_and_load() {
    let file = TempFile::new("save_and_load");

    with_table::<u64, String>(|table| {
        let table = table();
        for i in 0..5000u64 {
            table.add(i, i.to_string());
        }

        for i in (0..5000).step_by(5) {
            table.remove(&i);
        }

        assert_eq!(table.save(&file.0).unwrap(), 4000);

        let loaded: HashTable<u64, String> = HashTable::new();
        assert_eq!(loaded.load(&file.0).unwrap(), 4000);
        assert_eq!(loaded, table);
        assert!(loaded.verify());
    });
}

#[test]
fn load_merges() {
    let table = HashTable::new();
    table.add(1u32, 10u32);
    table.add(2, 20);

    let mut bytes = Vec::new();
    table.write_to(&mut bytes).unwrap();

    let other = HashTable::new();
    other.add(2u32, 0u32);
    other.add(3, 30);

    // Existing keys keep their values.
    assert_eq!(other.read_from(&bytes[..]).unwrap(), 1);
    assert_eq!(other.len(), 3);
    assert_eq!(other.lookup(&1), Some(10));
    assert_eq!(other.lookup(&2), Some(0));
}

#[test]
fn empty_table() {
    let table: HashTable<u8, u8> = HashTable::new();

    let mut bytes = Vec::new();
    assert_eq!(table.write_to(&mut bytes).unwrap(), 0);
    assert_eq!(bytes.len(), MAGIC.len() + 1 + 8);

    let loaded: HashTable<u8, u8> = HashTable::new();
    assert_eq!(loaded.read_from(&bytes[..]).unwrap(), 0);
    assert!(loaded.is_empty());
}

#[test]
fn bad_signature() {
    let table: HashTable<u32, u32> = HashTable::new();

    let mut bytes = b"NOTATABLE".to_vec();
    bytes.push(VERSION);
    bytes.extend_from_slice(&0u64.to_le_bytes());

    assert!(matches!(table.read_from(&bytes[..]), Err(Error::BadSignature)));
    assert!(matches!(table.read_from(&b""[..]), Err(Error::Truncated)));
}

#[test]
fn unsupported_version() {
    let table: HashTable<u32, u32> = HashTable::new();

    let mut bytes = MAGIC.to_vec();
    bytes.push(VERSION + 1);
    bytes.extend_from_slice(&0u64.to_le_bytes());

    match table.read_from(&bytes[..]) {
        Err(Error::UnsupportedVersion(version)) => assert_eq!(version, VERSION + 1),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn truncated() {
    let table = HashTable::new();
    for i in 0..10u32 {
        table.add(i, i);
    }

    let mut bytes = Vec::new();
    table.write_to(&mut bytes).unwrap();
    bytes.truncate(bytes.len() - 2);

    let loaded: HashTable<u32, u32> = HashTable::new();
    assert!(matches!(loaded.read_from(&bytes[..]), Err(Error::Truncated)));

    // Records read before the error are kept.
    assert_eq!(loaded.len(), 9);
}

#[test]
fn missing_file() {
    let file = TempFile::new("missing_file");
    let table: HashTable<u32, u32> = HashTable::new();

    match table.load(&file.0) {
        Err(Error::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::NotFound),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn set_round_trip() {
    let file = TempFile::new("set_round_trip");

    let set: HashSet<String> = (0..100).map(|i| format!("key-{i}")).collect();
    assert_eq!(set.save(&file.0).unwrap(), 100);

    let loaded = HashSet::new();
    assert_eq!(loaded.load(&file.0).unwrap(), 100);
    assert_eq!(loaded, set);
}
