//! Tool contract, runtime handle, and key-value store.

mod runtime;
mod store;
mod tool;

pub use runtime::ToolRuntime;
pub use store::{InMemoryStore, KeyValueStore};
pub use tool::{optional_bool, optional_str, optional_u64, required_str, Tool};
