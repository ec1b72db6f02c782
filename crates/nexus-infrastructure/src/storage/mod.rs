pub mod atomic_file;
pub mod json_store;
pub mod memory_store;

pub use atomic_file::{AtomicFile, FileFormat};
pub use json_store::JsonFileStore;
pub use memory_store::InMemoryStore;
