//! String references found in the address space.

use serde::{Deserialize, Serialize};

/// Character encoding of a discovered string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StringKind {
    Ascii,
    Utf16,
    Utf32,
}

impl StringKind {
    /// Bytes per code unit.
    pub fn unit_size(&self) -> u64 {
        match self {
            StringKind::Ascii => 1,
            StringKind::Utf16 => 2,
            StringKind::Utf32 => 4,
        }
    }
}

/// A string occupying `[start, start + length)` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StringReference {
    pub kind: StringKind,
    pub start: u64,
    /// Length in bytes, excluding any terminator
    pub length: u64,
}

impl StringReference {
    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end()
    }
}
