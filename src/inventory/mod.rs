//! Pod inventory adapters

pub mod memory;

pub use memory::{InMemoryInventory, InventoryFile};
