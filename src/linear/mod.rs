//! Linear disassembly: one ordered line stream over code, data variables
//! and raw bytes.
//!
//! A `LinearCursor` is a live view. Each step re-reads the address space,
//! so a mutation between two steps changes what the next step renders.

pub mod cursor;

use serde::{Deserialize, Serialize};

use crate::config::LinearConfig;
use crate::core::instruction::render_tokens;
use crate::core::InstructionTextToken;

pub use cursor::{LinearCursor, LinearLines};

/// Rendering options for a cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisassemblySettings {
    pub bytes_per_row: usize,
    /// Prefix every line with its address
    pub show_addresses: bool,
    pub show_function_headers: bool,
    /// Longest function name rendered in headers; 0 means unlimited
    pub max_symbol_width: usize,
}

impl DisassemblySettings {
    pub fn from_config(config: &LinearConfig) -> Self {
        Self {
            bytes_per_row: config.bytes_per_row.max(1),
            show_addresses: true,
            show_function_headers: config.show_function_headers,
            max_symbol_width: 0,
        }
    }
}

impl Default for DisassemblySettings {
    fn default() -> Self {
        Self::from_config(&LinearConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinearLineKind {
    FunctionHeader,
    FunctionHeaderEnd,
    Code,
    DataVariable,
    Hex,
    SegmentBoundary,
}

/// One rendered line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearLine {
    pub kind: LinearLineKind,
    pub address: u64,
    /// Start of the owning function
    pub function: Option<u64>,
    /// Start of the owning basic block
    pub block: Option<u64>,
    pub tokens: Vec<InstructionTextToken>,
}

impl LinearLine {
    pub fn text(&self) -> String {
        render_tokens(&self.tokens)
    }
}
