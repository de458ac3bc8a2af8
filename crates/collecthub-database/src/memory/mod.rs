//! In-memory task store.

pub mod store;

pub use store::MemoryTaskStore;
