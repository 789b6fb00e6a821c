//! Object store: where source audio and every pipeline artifact live.

mod error;
mod fs;
mod memory;
mod traits;

pub use error::StorageError;
pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;
pub use traits::{validate_key, ObjectStore};
