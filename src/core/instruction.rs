//! Decoded instruction text and control-flow summary.
//!
//! This is the shape returned by an architecture's
//! `decode_one_instruction`; rendering and analysis consume nothing else.

use serde::{Deserialize, Serialize};

/// Role of a piece of rendered instruction text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Text,
    Instruction,
    OperandSeparator,
    Register,
    Integer,
    PossibleAddress,
    BeginMemoryOperand,
    EndMemoryOperand,
    Address,
    Annotation,
    Keyword,
    FunctionName,
    DataSymbol,
    Hex,
    TypeName,
}

/// A rendered fragment; `value` carries the number for integer-like kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstructionTextToken {
    pub kind: TokenKind,
    pub text: String,
    pub value: u64,
}

impl InstructionTextToken {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            value: 0,
        }
    }

    pub fn with_value(kind: TokenKind, text: impl Into<String>, value: u64) -> Self {
        Self {
            kind,
            text: text.into(),
            value,
        }
    }

    /// Integer or address operand.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Integer | TokenKind::PossibleAddress | TokenKind::Address
        )
    }
}

/// Concatenate token text.
pub fn render_tokens(tokens: &[InstructionTextToken]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

/// How control leaves an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchKind {
    Unconditional,
    /// Taken edge of a conditional branch; fallthrough is implied
    Conditional,
    Call,
    Return,
    Indirect,
    /// Traps and halts
    Exception,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchInfo {
    pub kind: BranchKind,
    pub target: Option<u64>,
}

impl BranchInfo {
    pub fn new(kind: BranchKind, target: Option<u64>) -> Self {
        Self { kind, target }
    }
}

/// Result of decoding one instruction; `length == 0` means undecodable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstructionInfo {
    pub length: usize,
    pub tokens: Vec<InstructionTextToken>,
    pub branches: Vec<BranchInfo>,
}

impl InstructionInfo {
    pub fn undecodable() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.length > 0
    }

    /// Execution cannot continue to the next instruction.
    pub fn ends_flow(&self) -> bool {
        self.branches.iter().any(|b| {
            matches!(
                b.kind,
                BranchKind::Unconditional
                    | BranchKind::Return
                    | BranchKind::Indirect
                    | BranchKind::Exception
            )
        })
    }

    /// Ends the current basic block (calls do not).
    pub fn ends_block(&self) -> bool {
        self.branches
            .iter()
            .any(|b| !matches!(b.kind, BranchKind::Call))
    }

    pub fn text(&self) -> String {
        render_tokens(&self.tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_classification() {
        let mut info = InstructionInfo {
            length: 5,
            tokens: vec![
                InstructionTextToken::new(TokenKind::Instruction, "call"),
                InstructionTextToken::new(TokenKind::Text, " "),
                InstructionTextToken::with_value(TokenKind::PossibleAddress, "0x2000", 0x2000),
            ],
            branches: vec![BranchInfo::new(BranchKind::Call, Some(0x2000))],
        };
        assert!(!info.ends_flow());
        assert!(!info.ends_block());
        assert_eq!(info.text(), "call 0x2000");

        info.branches = vec![BranchInfo::new(BranchKind::Conditional, Some(0x10))];
        assert!(info.ends_block());
        assert!(!info.ends_flow());

        info.branches = vec![BranchInfo::new(BranchKind::Return, None)];
        assert!(info.ends_flow());
        assert!(!InstructionInfo::undecodable().is_valid());
    }
}
