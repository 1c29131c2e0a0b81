//! Architecture collaborators.
//!
//! An `Architecture` decodes one instruction at a time into rendered
//! tokens plus a control-flow summary. The linear cursor, the search
//! engine and the analysis pass consume nothing else.
//!
//! Built-in backends:
//! - iced-x86 for x86/x86_64
//! - capstone for ARM/AArch64, MIPS, PPC and RISC-V

pub mod capstone;
pub mod iced;
pub mod registry;

use crate::core::{Endianness, InstructionInfo};

pub use self::capstone::CapstoneArchitecture;
pub use self::iced::IcedArchitecture;
pub use registry::ArchitectureRegistry;

pub trait Architecture: Send + Sync {
    fn name(&self) -> &str;

    /// Pointer width in bytes.
    fn address_size(&self) -> usize;

    fn endianness(&self) -> Endianness;

    fn max_instruction_length(&self) -> usize;

    fn instruction_alignment(&self) -> usize {
        1
    }

    /// Decode the instruction at the start of `bytes`, which lives at `addr`.
    /// A zero `length` in the result means the bytes do not decode.
    fn decode_one_instruction(&self, bytes: &[u8], addr: u64) -> InstructionInfo;
}

impl std::fmt::Debug for dyn Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Architecture")
            .field("name", &self.name())
            .finish()
    }
}

/// Parse a numeric operand as printed by the disassemblers: `#0x10`,
/// `0x10`, `-16`, `42`.
pub(crate) fn parse_immediate(text: &str) -> Option<i64> {
    let s = text.trim().trim_start_matches('#');
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let value = if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()? as i64
    } else if s.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        s.parse::<i64>().ok()?
    } else {
        return None;
    };
    Some(if negative { value.wrapping_neg() } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_immediate() {
        assert_eq!(parse_immediate("#0x10"), Some(16));
        assert_eq!(parse_immediate("0x401000"), Some(0x401000));
        assert_eq!(parse_immediate("-16"), Some(-16));
        assert_eq!(parse_immediate("#-0x8"), Some(-8));
        assert_eq!(parse_immediate("x0"), None);
        assert_eq!(parse_immediate("sp"), None);
    }
}
