//! Byte-level storage behind an address space.
//!
//! A `StorageAccessor` only understands flat offsets. Address spaces layer
//! virtual addressing on top and always go through `TrackedStorage`, which
//! records what happened to each byte in a `PatchLog`.
//!
//! - `BufferAccessor`: in-memory, supports insert/remove
//! - `FileAccessor`: private copy-on-write file mapping, fixed layout
//! - `CallbackAccessor`: caller-supplied closures

pub mod buffer;
pub mod callback;
pub mod file;
pub mod modification;
pub mod tracked;

use std::path::Path;

use crate::error::Result;

pub use buffer::BufferAccessor;
pub use callback::CallbackAccessor;
pub use file::FileAccessor;
pub use modification::{ModificationStatus, PatchLog};
pub use tracked::TrackedStorage;

/// Pluggable byte store.
///
/// `read` returns fewer bytes than requested at the end of storage and never
/// fails. Mutators return the number of bytes affected; 0 from `insert` or
/// `remove` means the accessor has a fixed layout.
pub trait StorageAccessor: Send + Sync {
    fn read(&self, offset: u64, len: usize) -> Vec<u8>;

    fn write(&mut self, offset: u64, data: &[u8]) -> usize;

    fn insert(&mut self, _offset: u64, _data: &[u8]) -> usize {
        0
    }

    fn remove(&mut self, _offset: u64, _len: u64) -> u64 {
        0
    }

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short label for logs
    fn kind(&self) -> &'static str;

    /// Write the current contents to `path` atomically.
    fn save_to(&self, path: &Path) -> Result<()> {
        let contents = self.read(0, self.len() as usize);
        crate::persist::write_atomic(path, &contents)
    }
}
