//! Config store adapters.

mod memory;

pub use memory::MemoryConfigStore;
