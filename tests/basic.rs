use hoptable::{HashTable, Stats};

use std::hash::{BuildHasherDefault, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

mod common;
use common::with_table;

#[test]
fn new() {
    with_table::<usize, usize>(|table| drop(table()));
}

#[test]
fn empty() {
    with_table::<usize, usize>(|table| {
        let table = table();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
        assert_eq!(table.lookup(&42), None);
        assert!(!table.contains(&42));
        assert!(!table.remove(&42));
        assert_eq!(table.count_items(), 0);
        assert_eq!(table.pin().iter().count(), 0);
    });
}

#[test]
fn add_duplicate() {
    let table = HashTable::with_capacity(1031);
    assert!(table.bucket_count() >= 1031);

    assert!(table.add(7, "first"));
    assert!(!table.add(7, "second"));
    assert_eq!(table.lookup(&7), Some("first"));
    assert_eq!(table.len(), 1);
}

#[test]
fn remove_absent() {
    with_table::<usize, usize>(|table| {
        let table = table();
        for i in 0..10 {
            table.add(i, i);
        }

        assert!(!table.remove(&42));
        assert_eq!(table.count_items(), 10);
        assert_eq!(table.len(), 10);
    });
}

#[test]
fn add_and_remove() {
    with_table::<usize, usize>(|table| {
        let table = table();
        assert!(table.add(42, 0));
        assert!(table.contains(&42));
        assert!(table.remove(&42));
        assert!(!table.contains(&42));
        assert!(!table.remove(&42));

        // The tombstone is reused.
        assert!(table.add(42, 1));
        assert_eq!(table.lookup(&42), Some(1));
        assert_eq!(table.count_items(), 1);
        assert_eq!(table.count_deleted_items(), 0);
    });
}

#[test]
fn add_count() {
    with_table::<&str, usize>(|table| {
        let table = table();
        assert_eq!(table.add_count("k", 5), 5);
        assert_eq!(table.add_count("k", 3), 8);
        assert_eq!(table.lookup(&"k"), Some(8));
        assert_eq!(table.len(), 1);

        let other = HashTable::new();
        other.add_count("k", 5 + 3);
        assert_eq!(other.lookup(&"k"), table.lookup(&"k"));
    });
}

#[test]
fn lookup_clear() {
    with_table::<usize, usize>(|table| {
        let table = table();
        table.add(1, 10);

        assert_eq!(table.lookup_clear(&1), Some(10));
        assert_eq!(table.lookup(&1), Some(0));
        assert_eq!(table.lookup_clear(&1), Some(0));
        assert_eq!(table.lookup_clear(&2), None);
        assert_eq!(table.len(), 1);
    });
}

#[test]
fn insert_or_replace() {
    with_table::<usize, String>(|table| {
        let table = table();
        assert!(table.insert_or_replace(1, "a".to_owned()));
        assert!(!table.insert_or_replace(1, "b".to_owned()));
        assert_eq!(table.lookup(&1).as_deref(), Some("b"));
        assert_eq!(table.len(), 1);

        for i in 0..1000 {
            table.insert_or_replace(i, i.to_string());
        }

        for i in 0..1000 {
            assert!(!table.insert_or_replace(i, format!("{i}!")));
        }

        assert_eq!(table.len(), 1000);
        assert_eq!(table.count_items(), 1000);
        for i in 0..1000 {
            assert_eq!(table.lookup(&i), Some(format!("{i}!")));
        }
    });
}

#[test]
fn iterate_and_clear() {
    with_table::<usize, usize>(|table| {
        let table = table();
        for i in 0..100 {
            table.add(i, i + 1);
        }

        let mut drained = 0;
        assert!(table.iterate_and_clear(|_, value| {
            drained += value;
            true
        }));

        assert_eq!(drained, (1..=100).sum::<usize>());
        assert_eq!(table.len(), 100);
        for i in 0..100 {
            assert_eq!(table.lookup(&i), Some(0));
        }
    });
}

#[test]
fn iterate_and_clear_stops() {
    let table = HashTable::new();
    for i in 0..100 {
        table.add(i, i + 1);
    }

    let mut calls = 0;
    assert!(!table.iterate_and_clear(|_, _| {
        calls += 1;
        calls <= 10
    }));

    // The entry that stopped the walk keeps its value.
    assert_eq!(calls, 11);
    let cleared = (0..100).filter(|i| table.lookup(i) == Some(0)).count();
    assert_eq!(cleared, 10);
}

#[test]
fn iterate_and_modify() {
    with_table::<usize, Vec<usize>>(|table| {
        let table = table();
        for i in 0..100 {
            table.add(i, vec![i]);
        }

        assert!(table.iterate_and_modify(|key, value| {
            value.push(key * 2);
            true
        }));

        for i in 0..100 {
            assert_eq!(table.lookup(&i), Some(vec![i, i * 2]));
        }

        // Changes to the entry that stops the walk are dropped.
        assert!(!table.iterate_and_modify(|_, value| {
            value.clear();
            false
        }));

        let emptied = (0..100).filter(|i| table.lookup(i) == Some(Vec::new())).count();
        assert_eq!(emptied, 0);
    });
}

#[test]
fn clone() {
    with_table::<usize, String>(|table| {
        let table = table();
        for i in 0..1000 {
            table.add(i, i.to_string());
        }

        let copy = table.clone();
        assert_eq!(copy, table);
        assert_eq!(copy.len(), 1000);
        assert_eq!(copy.max_fill(), table.max_fill());
        assert!(copy.verify());

        // The copies are independent.
        copy.remove(&0);
        copy.insert_or_replace(1, "one".to_owned());
        assert_eq!(table.lookup(&0).as_deref(), Some("0"));
        assert_eq!(table.lookup(&1).as_deref(), Some("1"));
        assert_eq!(table.len(), 1000);
        assert_eq!(copy.len(), 999);
    });
}

#[test]
fn set_max_fill() {
    let dense: HashTable<usize, usize> = HashTable::new();
    let sparse: HashTable<usize, usize> = HashTable::new();

    sparse.set_max_fill(0.5);
    assert_eq!(sparse.max_fill(), 0.5);
    sparse.set_max_fill(0.1);
    assert_eq!(sparse.max_fill(), 0.25);

    dense.reserve(10_000);
    sparse.reserve(10_000);
    assert!(sparse.bucket_count() >= 40_000);
    assert!(sparse.bucket_count() > dense.bucket_count());

    // A lower limit takes effect on a populated table.
    for i in 0..1000 {
        dense.add(i, i);
    }
    dense.set_max_fill(0.25);
    dense.shrink_to_fit();
    assert!(dense.bucket_count() >= 4000);
    for i in 0..1000 {
        assert_eq!(dense.lookup(&i), Some(i));
    }
}

#[test]
fn lookup_value_ptr() {
    let table = HashTable::new();
    table.add(1, "one".to_owned());

    // Safety: Nothing removes or updates the key.
    unsafe {
        assert_eq!(table.lookup_value_ptr(&1).map(String::as_str), Some("one"));
        assert_eq!(table.lookup_value_ptr(&2), None);
    }
}

#[test]
fn borrowed_keys() {
    let table: HashTable<String, usize> = HashTable::new();
    table.add("a".to_owned(), 1);

    assert!(table.contains("a"));
    assert_eq!(table.lookup("a"), Some(1));
    assert_eq!(table.pin().get("a"), Some(&1));
    assert!(table.remove("a"));
}

#[test]
fn clear() {
    with_table::<usize, usize>(|table| {
        let table = table();
        for i in 0..1000 {
            table.add(i, i);
        }

        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.count_items(), 0);

        for i in 0..1000 {
            assert!(!table.contains(&i));
        }

        for i in 0..1000 {
            assert!(table.add(i, i + 1));
        }

        assert_eq!(table.len(), 1000);
    });
}

#[test]
fn grows() {
    with_table::<usize, usize>(|table| {
        let table = table();
        let initial = table.bucket_count();

        for i in 0..20_000 {
            assert!(table.add(i, i));
        }

        assert!(table.bucket_count() > initial);
        assert_eq!(table.len(), 20_000);
        assert_eq!(table.count_items(), 20_000);

        for i in 0..20_000 {
            assert_eq!(table.lookup(&i), Some(i));
        }

        assert!(table.verify());
    });
}

#[test]
fn iter() {
    with_table::<usize, usize>(|table| {
        let table = table();
        for i in 0..5000 {
            table.add(i, i * 2);
        }

        let pinned = table.pin();

        let mut entries = pinned.iter().map(|(&k, &v)| (k, v)).collect::<Vec<_>>();
        entries.sort_unstable();
        assert_eq!(entries, (0..5000).map(|i| (i, i * 2)).collect::<Vec<_>>());

        let mut keys = pinned.keys().copied().collect::<Vec<_>>();
        keys.sort_unstable();
        assert_eq!(keys, (0..5000).collect::<Vec<_>>());

        let sum = pinned.values().sum::<usize>();
        assert_eq!(sum, (0..5000).map(|i| i * 2).sum::<usize>());

        let mut all = table.all_keys();
        all.sort_unstable();
        assert_eq!(all, keys);
    });
}

#[test]
fn iterate() {
    let table = HashTable::new();
    for i in 0..100 {
        table.add(i, ());
    }

    let mut seen = 0;
    assert!(table.iterate(|_, _| {
        seen += 1;
        true
    }));
    assert_eq!(seen, 100);

    let mut seen = 0;
    assert!(!table.iterate(|_, _| {
        seen += 1;
        seen < 10
    }));
    assert_eq!(seen, 10);
}

#[test]
fn buckets() {
    with_table::<usize, usize>(|table| {
        let table = table();
        for i in 0..3000 {
            table.add(i, i);
        }

        // Finish any in-progress resize so the bucket count is final.
        assert_eq!(table.count_items(), 3000);

        let pinned = table.pin();
        let buckets = pinned.bucket_count();
        assert_eq!(buckets, table.bucket_count());

        let total = (0..buckets).map(|b| pinned.bucket(b).count()).sum::<usize>();
        assert_eq!(total, 3000);

        let sizes = (0..buckets).map(|b| table.bucket_size(b)).sum::<usize>();
        assert_eq!(sizes, 3000);

        assert_eq!(pinned.bucket(buckets).count(), 0);
        assert_eq!(table.bucket_size(buckets + 10), 0);

        let load = table.load_factor();
        assert!(load > 0.0 && load <= 1.0);
    });
}

#[test]
fn diagnostics() {
    with_table::<usize, usize>(|table| {
        let table = table();
        for i in 0..2000 {
            table.add(i, i);
        }

        let chains = table.chain_lengths();
        assert_eq!(chains.iter().sum::<usize>(), table.bucket_count());
        let entries = chains
            .iter()
            .enumerate()
            .map(|(length, count)| length * count)
            .sum::<usize>();
        assert_eq!(entries, 2000);

        let densities = table.neighborhood_densities();
        assert_eq!(densities.iter().sum::<usize>(), table.bucket_count());

        assert!(table.verify());
    });
}

#[test]
fn resize_to() {
    with_table::<usize, usize>(|table| {
        let table = table();
        for i in 0..100 {
            table.add(i, i);
        }

        assert!(table.resize_to(5000));
        assert!(table.bucket_count() >= 5000);
        assert!(!table.resize_to(table.bucket_count()));

        for i in 0..100 {
            assert_eq!(table.lookup(&i), Some(i));
        }

        assert!(table.shrink_to_fit());
        assert!(table.bucket_count() < 5000);
        assert_eq!(table.count_items(), 100);

        for i in 0..100 {
            assert_eq!(table.lookup(&i), Some(i));
        }

        // Never shrinks below what the entries require.
        table.resize_to(0);
        assert_eq!(table.count_items(), 100);
        assert!(table.verify());
    });
}

#[test]
fn reserve() {
    with_table::<usize, usize>(|table| {
        let table = table();
        assert!(table.reserve(10_000));

        let buckets = table.bucket_count();
        assert!(buckets >= 10_000);
        assert!(!table.reserve(1));

        for i in 0..9000 {
            table.add(i, i);
        }

        assert_eq!(table.len(), 9000);
    });
}

#[test]
fn quiesce() {
    with_table::<usize, usize>(|table| {
        let mut table = table();
        for i in 0..1000 {
            table.add(i, i);
        }

        // Finish any in-progress resize so that every tombstone survives.
        assert_eq!(table.count_items(), 1000);

        for i in (0..1000).step_by(2) {
            assert!(table.remove(&i));
        }

        assert_eq!(table.count_deleted_items(), 500);
        assert_eq!(table.quiesce().reclaim_deletions(), 500);
        assert_eq!(table.count_deleted_items(), 0);
        assert_eq!(table.count_items(), 500);

        for i in 0..1000 {
            assert_eq!(table.contains(&i), i % 2 == 1);
        }

        assert!(table.verify());

        for i in (0..1000).step_by(2) {
            assert!(table.add(i, i));
        }

        assert_eq!(table.len(), 1000);
    });
}

#[test]
fn reclaim_fragments() {
    let mut table = HashTable::new();
    for i in 0..5000 {
        table.add(i, i);
    }

    assert_eq!(table.count_items(), 5000);
    let removed = (0..5000).step_by(3).filter(|i| table.remove(i)).count();

    let quiescent = table.quiesce();
    let reclaimed = (0..7)
        .map(|fragment| quiescent.reclaim_fragment(7, fragment))
        .sum::<usize>();
    assert_eq!(reclaimed, removed);
    assert_eq!(quiescent.reclaim_deletions(), 0);

    assert_eq!(table.count_deleted_items(), 0);
    assert_eq!(table.len(), 5000 - removed);
    assert!(table.verify());
}

#[test]
fn remove_mut() {
    with_table::<usize, usize>(|table| {
        let mut table = table();
        for i in 0..1000 {
            table.add(i, i);
        }

        for i in 0..500 {
            assert!(table.remove_mut(&i));
        }

        assert!(!table.remove_mut(&0));
        assert_eq!(table.count_deleted_items(), 0);
        assert_eq!(table.len(), 500);

        for i in 0..1000 {
            assert_eq!(table.contains(&i), i >= 500);
        }

        assert!(table.verify());
    });
}

#[test]
fn hooks() {
    let removed = Arc::new(AtomicUsize::new(0));
    let deleted = Arc::new(AtomicUsize::new(0));

    let table = HashTable::builder()
        .on_remove({
            let removed = removed.clone();
            move |_: &usize, _: &usize| {
                removed.fetch_add(1, Ordering::Relaxed);
            }
        })
        .on_delete({
            let deleted = deleted.clone();
            move |_: &usize, _: &usize| {
                deleted.fetch_add(1, Ordering::Relaxed);
            }
        })
        .build();

    for i in 0..1000 {
        table.add(i, i);
    }

    for i in 0..100 {
        table.remove(&i);
    }

    // Removing an absent key does not fire the hook.
    table.remove(&0);
    assert_eq!(removed.load(Ordering::Relaxed), 100);

    drop(table);
    assert_eq!(removed.load(Ordering::Relaxed), 100);
    assert_eq!(deleted.load(Ordering::Relaxed), 900);
}

#[test]
fn clear_hook() {
    let removed = Arc::new(AtomicUsize::new(0));

    let table = HashTable::builder()
        .on_remove({
            let removed = removed.clone();
            move |_: &usize, _: &()| {
                removed.fetch_add(1, Ordering::Relaxed);
            }
        })
        .build();

    for i in 0..300 {
        table.add(i, ());
    }

    table.clear();
    assert_eq!(removed.load(Ordering::Relaxed), 300);
}

#[test]
fn replace_hook() {
    let replaced = Arc::new(Mutex::new(Vec::new()));

    let table = HashTable::builder()
        .on_remove({
            let replaced = replaced.clone();
            move |key: &usize, value: &String| {
                replaced.lock().unwrap().push((*key, value.clone()));
            }
        })
        .build();

    assert!(table.insert_or_replace(1, "a".to_owned()));
    assert!(replaced.lock().unwrap().is_empty());

    assert!(!table.insert_or_replace(1, "b".to_owned()));
    assert_eq!(*replaced.lock().unwrap(), vec![(1, "a".to_owned())]);

    // Clones share the callbacks.
    let copy = table.clone();
    copy.remove(&1);
    assert_eq!(
        *replaced.lock().unwrap(),
        vec![(1, "a".to_owned()), (1, "b".to_owned())]
    );
}

#[derive(Default)]
struct ZeroHasher;

impl Hasher for ZeroHasher {
    fn finish(&self) -> u64 {
        0
    }

    fn write(&mut self, _: &[u8]) {}
}

#[test]
fn colliding_keys() {
    let table: HashTable<usize, usize, BuildHasherDefault<ZeroHasher>> = HashTable::default();

    for i in 0..1000 {
        assert!(table.add(i, i));
    }

    for i in 0..1000 {
        assert_eq!(table.lookup(&i), Some(i));
    }

    // Every entry shares a single chain.
    assert_eq!(table.bucket_size(0), 1000);

    for i in 0..500 {
        assert!(table.remove(&i));
    }

    for i in 0..1000 {
        assert_eq!(table.contains(&i), i >= 500);
    }

    assert!(table.verify());
}

#[test]
fn equality() {
    let a: HashTable<usize, usize> = (0..100).map(|i| (i, i)).collect();
    let b: HashTable<usize, usize> = HashTable::new();
    (&b).extend((0..100).map(|i| (i, i)));

    assert_eq!(a, b);

    b.remove(&0);
    b.add(0, 1);
    assert_ne!(a, b);

    let single = HashTable::from([(1, 2)]);
    assert_eq!(format!("{single:?}"), "{1: 2}");
}

#[test]
fn stats() {
    let table = HashTable::new();
    for i in 0..10 {
        table.add(i, i);
    }

    table.add(0, 0);
    table.lookup(&3);
    table.lookup(&30);
    table.remove(&4);

    let stats = table.stats();

    if cfg!(feature = "stats") {
        assert_eq!(stats.insert, 10);
        assert_eq!(stats.insert_dup, 1);
        assert_eq!(stats.lookup, 2);
        assert_eq!(stats.lookup_found, 1);
        assert_eq!(stats.remove, 1);
        assert_eq!(stats.remove_found, 1);
    } else {
        assert_eq!(stats, Stats::default());
    }

    table.clear_stats();
    assert_eq!(table.stats(), Stats::default());
}
