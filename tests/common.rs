#![allow(dead_code)]

use hoptable::{HashSet, HashTable, ResizeHelper};

// Run the test on different configurations of a `HashTable`.
pub fn with_table<K, V>(mut test: impl FnMut(&dyn Fn() -> HashTable<K, V>))
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    // The default configuration.
    if !cfg!(hoptable_stress) {
        test(&(|| HashTable::new()));
    }

    // The smallest table, resizing early and often, with a background helper
    // to interfere with foreground copying.
    test(
        &(|| {
            HashTable::builder()
                .capacity(1)
                .resize_helper(ResizeHelper::global())
                .build()
        }),
    );

    // A low fill factor, to resize on load rather than on full neighborhoods.
    test(&(|| HashTable::builder().max_fill(0.5).build()));
}

// Run the test on different configurations of a `HashSet`.
pub fn with_set<K>(mut test: impl FnMut(&dyn Fn() -> HashSet<K>))
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
{
    if !cfg!(hoptable_stress) {
        test(&(|| HashSet::new()));
    }

    test(
        &(|| {
            HashSet::builder()
                .capacity(1)
                .resize_helper(ResizeHelper::global())
                .build()
        }),
    );

    test(&(|| HashSet::builder().max_fill(0.5).build()));
}

// Prints a log message if `RUST_LOG=debug` is set.
#[macro_export]
macro_rules! debug {
    ($($x:tt)*) => {
        if std::env::var("RUST_LOG").as_deref() == Ok("debug") {
            println!($($x)*);
        }
    };
}

// Returns the number of threads to use for stress testing.
pub fn threads() -> usize {
    if cfg!(miri) {
        2
    } else {
        num_cpus::get_physical().next_power_of_two().min(8)
    }
}
