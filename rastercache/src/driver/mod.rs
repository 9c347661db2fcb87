//! Block drivers: where cached blocks come from and go back to.

mod file;
mod memory;
mod r#trait;

pub use file::FileDriver;
pub use memory::MemoryDriver;
pub use r#trait::{BlockDriver, DriverError};
