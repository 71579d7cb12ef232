//! Synchronization primitives shared across supervisors.

pub mod keyed_mutex;

pub use keyed_mutex::{KeyedGuard, KeyedMutex};
