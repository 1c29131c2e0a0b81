//! Cross-references between addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the reference is control flow or a data access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum XrefKind {
    Code,
    Data,
}

/// A directed reference `from -> to`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xref {
    pub from: u64,
    pub to: u64,
    pub kind: XrefKind,
    pub auto_defined: bool,
}

impl fmt::Display for Xref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            XrefKind::Code => "code",
            XrefKind::Data => "data",
        };
        write!(f, "{:#x} -> {:#x} ({})", self.from, self.to, kind)
    }
}
