//! Backends for the shared counter store.
//!
//! - [`MemoryCounterStore`]: single-process store for development and tests
//! - [`RedisCounterStore`]: shared store for multi-instance deployments
//! - [`BoundedStore`]: per-operation timeout decorator applied to either
//!
//! [`connect`] is the one place a store handle is built; the result is passed
//! by `Arc` into every component that needs it.

pub mod bounded;
pub mod engines;
pub mod factory;

#[cfg(test)]
pub(crate) mod testing;

pub use bounded::BoundedStore;
pub use engines::{MemoryCounterStore, RedisCounterStore};
pub use factory::connect;
