//! Storage backed by caller-supplied closures.

use super::StorageAccessor;

type ReadFn = Box<dyn Fn(u64, usize) -> Vec<u8> + Send + Sync>;
type WriteFn = Box<dyn FnMut(u64, &[u8]) -> usize + Send + Sync>;
type LenFn = Box<dyn Fn() -> u64 + Send + Sync>;

/// Adapts arbitrary providers (debuggers, remote targets) to `StorageAccessor`.
pub struct CallbackAccessor {
    read: ReadFn,
    write: Option<WriteFn>,
    len: LenFn,
}

impl CallbackAccessor {
    /// Read-only provider.
    pub fn new<R, L>(read: R, len: L) -> Self
    where
        R: Fn(u64, usize) -> Vec<u8> + Send + Sync + 'static,
        L: Fn() -> u64 + Send + Sync + 'static,
    {
        Self {
            read: Box::new(read),
            write: None,
            len: Box::new(len),
        }
    }

    pub fn with_write<W>(mut self, write: W) -> Self
    where
        W: FnMut(u64, &[u8]) -> usize + Send + Sync + 'static,
    {
        self.write = Some(Box::new(write));
        self
    }
}

impl StorageAccessor for CallbackAccessor {
    fn read(&self, offset: u64, len: usize) -> Vec<u8> {
        let mut out = (self.read)(offset, len);
        // providers may over-deliver; never hand back more than asked
        out.truncate(len);
        out
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> usize {
        match &mut self.write {
            Some(w) => w(offset, data).min(data.len()),
            None => 0,
        }
    }

    fn len(&self) -> u64 {
        (self.len)()
    }

    fn kind(&self) -> &'static str {
        "callback"
    }
}
