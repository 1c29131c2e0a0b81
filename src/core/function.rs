//! Functions and basic blocks discovered by analysis.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::address_range::AddressRange;

/// Kind of control-flow edge leaving a basic block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Unconditional,
    True,
    False,
    Fallthrough,
    Indirect,
}

/// Outgoing edge; `target` is `None` for unresolved indirect flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockEdge {
    pub kind: EdgeKind,
    pub target: Option<u64>,
}

/// A straight-line run of instructions `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub start: u64,
    pub end: u64,
    pub outgoing: Vec<BlockEdge>,
}

impl BasicBlock {
    pub fn range(&self) -> AddressRange {
        AddressRange {
            start: self.start,
            end: self.end,
        }
    }

    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// A function rooted at `start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub start: u64,
    pub name: String,
    pub auto_defined: bool,
    pub basic_blocks: Vec<BasicBlock>,
    /// Set when analysis gave up on this function (size limits, no architecture)
    pub analysis_skipped: bool,
    /// (call site, target) pairs found in the body
    pub call_sites: Vec<(u64, u64)>,
}

impl Function {
    pub fn new(start: u64, auto_defined: bool) -> Self {
        Self {
            start,
            name: default_function_name(start),
            auto_defined,
            basic_blocks: Vec::new(),
            analysis_skipped: false,
            call_sites: Vec::new(),
        }
    }

    /// True when `addr` falls in any basic block; the start counts before analysis.
    pub fn contains(&self, addr: u64) -> bool {
        if self.basic_blocks.is_empty() {
            return addr == self.start;
        }
        self.basic_blocks.iter().any(|b| b.contains(addr))
    }

    /// Lowest to highest address covered by the blocks.
    pub fn extent(&self) -> AddressRange {
        let start = self
            .basic_blocks
            .iter()
            .map(|b| b.start)
            .min()
            .unwrap_or(self.start);
        let end = self
            .basic_blocks
            .iter()
            .map(|b| b.end)
            .max()
            .unwrap_or(self.start);
        AddressRange { start, end }
    }

    pub fn block_containing(&self, addr: u64) -> Option<&BasicBlock> {
        self.basic_blocks.iter().find(|b| b.contains(addr))
    }
}

/// Name given to functions without a symbol: `sub_401000`.
pub fn default_function_name(start: u64) -> String {
    format!("sub_{:x}", start)
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {:#x} ({} blocks)",
            self.name,
            self.start,
            self.basic_blocks.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_before_and_after_analysis() {
        let mut f = Function::new(0x1000, true);
        assert_eq!(f.name, "sub_1000");
        assert!(f.contains(0x1000));
        assert!(!f.contains(0x1001));
        f.basic_blocks.push(BasicBlock {
            start: 0x1000,
            end: 0x1008,
            outgoing: vec![],
        });
        f.basic_blocks.push(BasicBlock {
            start: 0x1010,
            end: 0x1014,
            outgoing: vec![],
        });
        assert!(f.contains(0x1004));
        assert!(!f.contains(0x100c));
        assert_eq!(f.extent(), AddressRange::new(0x1000, 0x1014).unwrap());
        assert_eq!(f.block_containing(0x1012).map(|b| b.start), Some(0x1010));
    }
}
