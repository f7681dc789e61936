mod atomic;
mod config;
mod file;
mod memory;
mod watch;

pub use atomic::write_atomic;
pub use config::FileStoreConfig;
pub use file::{FileStore, Notification};
pub use memory::MemoryStore;
pub use watch::{VersionChange, VersionWatch};
