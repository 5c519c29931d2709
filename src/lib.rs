#![doc = include_str!("../README.md")]

mod map;
mod raw;
mod set;
mod trace;

pub mod persist;

#[cfg(feature = "serde")]
mod serde_impls;

pub use map::{
    HashTable, HashTableBuilder, HashTableRef, Iter, Keys, Values, DEFAULT_MAX_FILL,
};
pub use persist::Persist;
pub use raw::{Quiescent, ResizeHelper, Stats};
pub use seize::{Collector, Guard};
pub use set::{HashSet, HashSetBuilder, HashSetRef, Iter as SetIter};
