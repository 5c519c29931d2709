mod alloc;
mod hashptr;
mod helper;
mod reclaim;
mod resize;
mod stats;
mod table;
mod utils;

pub use helper::{Assist, ResizeHelper};
pub use reclaim::Quiescent;
pub use stats::Stats;
pub use table::{Config, HashTable, Hook, Iter, Node, Registration, Update};
