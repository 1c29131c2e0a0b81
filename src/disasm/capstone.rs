//! ARM, AArch64, MIPS, PowerPC and RISC-V through capstone.
//!
//! Capstone handles are not `Send`, so each thread lazily builds its own
//! engine per architecture name.

use std::cell::RefCell;
use std::collections::HashMap;

use ::capstone::{Arch, Capstone, Endian, Mode, NO_EXTRA_MODE};

use crate::core::{
    BranchInfo, BranchKind, Endianness, InstructionInfo, InstructionTextToken, TokenKind,
};

use super::{parse_immediate, Architecture};

thread_local! {
    static ENGINES: RefCell<HashMap<&'static str, Capstone>> = RefCell::new(HashMap::new());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Arm,
    Arm64,
    Mips,
    Ppc,
    RiscV,
}

pub struct CapstoneArchitecture {
    name: &'static str,
    family: Family,
    wide: bool,
    endianness: Endianness,
}

impl CapstoneArchitecture {
    pub fn armv7(endianness: Endianness) -> Self {
        let name = match endianness {
            Endianness::Little => "armv7",
            Endianness::Big => "armv7eb",
        };
        Self::new(name, Family::Arm, false, endianness)
    }

    pub fn aarch64() -> Self {
        Self::new("aarch64", Family::Arm64, true, Endianness::Little)
    }

    pub fn mips32(endianness: Endianness) -> Self {
        let name = match endianness {
            Endianness::Little => "mipsel32",
            Endianness::Big => "mips32",
        };
        Self::new(name, Family::Mips, false, endianness)
    }

    pub fn mips64(endianness: Endianness) -> Self {
        let name = match endianness {
            Endianness::Little => "mipsel64",
            Endianness::Big => "mips64",
        };
        Self::new(name, Family::Mips, true, endianness)
    }

    pub fn ppc(endianness: Endianness) -> Self {
        let name = match endianness {
            Endianness::Little => "ppc_le",
            Endianness::Big => "ppc",
        };
        Self::new(name, Family::Ppc, false, endianness)
    }

    pub fn ppc64(endianness: Endianness) -> Self {
        let name = match endianness {
            Endianness::Little => "ppc64_le",
            Endianness::Big => "ppc64",
        };
        Self::new(name, Family::Ppc, true, endianness)
    }

    pub fn riscv32() -> Self {
        Self::new("rv32gc", Family::RiscV, false, Endianness::Little)
    }

    pub fn riscv64() -> Self {
        Self::new("rv64gc", Family::RiscV, true, Endianness::Little)
    }

    fn new(name: &'static str, family: Family, wide: bool, endianness: Endianness) -> Self {
        Self {
            name,
            family,
            wide,
            endianness,
        }
    }

    fn engine(&self) -> Option<Capstone> {
        let endian = match self.endianness {
            Endianness::Little => Endian::Little,
            Endianness::Big => Endian::Big,
        };
        let (arch, mode, endian) = match (self.family, self.wide) {
            (Family::Arm, _) => (Arch::ARM, Mode::Arm, Some(endian)),
            (Family::Arm64, _) => (Arch::ARM64, Mode::Arm, Some(endian)),
            (Family::Mips, false) => (Arch::MIPS, Mode::Mips32, Some(endian)),
            (Family::Mips, true) => (Arch::MIPS, Mode::Mips64, Some(endian)),
            (Family::Ppc, false) => (Arch::PPC, Mode::Mode32, Some(endian)),
            (Family::Ppc, true) => (Arch::PPC, Mode::Mode64, Some(endian)),
            (Family::RiscV, false) => (Arch::RISCV, Mode::RiscV32, None),
            (Family::RiscV, true) => (Arch::RISCV, Mode::RiscV64, None),
        };
        Capstone::new_raw(arch, mode, NO_EXTRA_MODE, endian).ok()
    }

    /// Mnemonic and operand text of the first instruction in `bytes`.
    fn disassemble(&self, bytes: &[u8], addr: u64) -> Option<(usize, String, String)> {
        ENGINES.with(|engines| {
            let mut engines = engines.borrow_mut();
            if !engines.contains_key(self.name) {
                engines.insert(self.name, self.engine()?);
            }
            let cs = engines.get(self.name)?;
            let insns = cs.disasm_count(bytes, addr, 1).ok()?;
            let insn = insns.iter().next()?;
            Some((
                insn.bytes().len(),
                insn.mnemonic().unwrap_or_default().to_string(),
                insn.op_str().unwrap_or_default().to_string(),
            ))
        })
    }
}

const ARM_CONDITIONS: &[&str] = &[
    "eq", "ne", "cs", "hs", "cc", "lo", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le",
];

/// Control-flow class of an instruction from its mnemonic.
fn classify(family: Family, mnemonic: &str, operands: &str) -> Option<BranchKind> {
    let m = mnemonic.to_ascii_lowercase();
    let m = m.strip_prefix("c.").unwrap_or(&m);
    let ops = operands.to_ascii_lowercase();
    match family {
        Family::Arm64 => match m {
            "ret" | "retaa" | "retab" => Some(BranchKind::Return),
            "bl" | "blr" => Some(BranchKind::Call),
            "br" => Some(BranchKind::Indirect),
            "b" => Some(BranchKind::Unconditional),
            "cbz" | "cbnz" | "tbz" | "tbnz" => Some(BranchKind::Conditional),
            _ if m.starts_with("b.") => Some(BranchKind::Conditional),
            _ => None,
        },
        Family::Arm => match m {
            "bl" | "blx" => Some(BranchKind::Call),
            "bx" if ops == "lr" => Some(BranchKind::Return),
            "bx" => Some(BranchKind::Indirect),
            "b" => Some(BranchKind::Unconditional),
            "pop" | "ldm" if ops.contains("pc") => Some(BranchKind::Return),
            "cbz" | "cbnz" => Some(BranchKind::Conditional),
            _ if m
                .strip_prefix('b')
                .is_some_and(|cond| ARM_CONDITIONS.contains(&cond)) =>
            {
                Some(BranchKind::Conditional)
            }
            _ => None,
        },
        Family::Mips => match m {
            "jal" | "bal" | "jalr" => Some(BranchKind::Call),
            "jr" if ops.contains("ra") => Some(BranchKind::Return),
            "jr" => Some(BranchKind::Indirect),
            "j" | "b" => Some(BranchKind::Unconditional),
            "break" => Some(BranchKind::Exception),
            _ if m.starts_with('b') => Some(BranchKind::Conditional),
            _ => None,
        },
        Family::Ppc => match m {
            "bl" | "bctrl" => Some(BranchKind::Call),
            "blr" => Some(BranchKind::Return),
            "bctr" => Some(BranchKind::Indirect),
            "b" | "ba" => Some(BranchKind::Unconditional),
            _ if m.starts_with('b') => Some(BranchKind::Conditional),
            _ => None,
        },
        Family::RiscV => match m {
            "ret" => Some(BranchKind::Return),
            "jal" | "jalr" if ops.is_empty() || ops.starts_with("ra") || !ops.contains(',') => {
                Some(BranchKind::Call)
            }
            "jr" if ops == "ra" => Some(BranchKind::Return),
            "jr" | "jalr" => Some(BranchKind::Indirect),
            "j" | "jal" => Some(BranchKind::Unconditional),
            _ if m.starts_with('b') => Some(BranchKind::Conditional),
            _ => None,
        },
    }
}

/// Split operand text into register, number and punctuation tokens.
fn operand_tokens(operands: &str, target: Option<u64>) -> Vec<InstructionTextToken> {
    let mut out = Vec::new();
    let mut word = String::new();
    let flush = |word: &mut String, out: &mut Vec<InstructionTextToken>| {
        if word.is_empty() {
            return;
        }
        let token = match parse_immediate(word) {
            Some(v) if Some(v as u64) == target => {
                InstructionTextToken::with_value(TokenKind::PossibleAddress, word.as_str(), v as u64)
            }
            Some(v) => InstructionTextToken::with_value(TokenKind::Integer, word.as_str(), v as u64),
            None => InstructionTextToken::new(TokenKind::Register, word.as_str()),
        };
        out.push(token);
        word.clear();
    };
    for c in operands.chars() {
        let kind = match c {
            '[' | '(' => Some(TokenKind::BeginMemoryOperand),
            ']' | ')' => Some(TokenKind::EndMemoryOperand),
            ',' => Some(TokenKind::OperandSeparator),
            ' ' | '{' | '}' | '!' => Some(TokenKind::Text),
            _ => None,
        };
        match kind {
            Some(kind) => {
                flush(&mut word, &mut out);
                out.push(InstructionTextToken::new(kind, c.to_string()));
            }
            None => word.push(c),
        }
    }
    flush(&mut word, &mut out);
    out
}

impl Architecture for CapstoneArchitecture {
    fn name(&self) -> &str {
        self.name
    }

    fn address_size(&self) -> usize {
        if self.wide {
            8
        } else {
            4
        }
    }

    fn endianness(&self) -> Endianness {
        self.endianness
    }

    fn max_instruction_length(&self) -> usize {
        4
    }

    fn instruction_alignment(&self) -> usize {
        match self.family {
            Family::RiscV => 2,
            _ => 4,
        }
    }

    fn decode_one_instruction(&self, bytes: &[u8], addr: u64) -> InstructionInfo {
        let Some((length, mnemonic, operands)) = self.disassemble(bytes, addr) else {
            return InstructionInfo::undecodable();
        };
        let branches = match classify(self.family, &mnemonic, &operands) {
            Some(kind) => {
                let target = match kind {
                    BranchKind::Return | BranchKind::Indirect | BranchKind::Exception => None,
                    _ => operands
                        .rsplit(',')
                        .next()
                        .and_then(parse_immediate)
                        .map(|v| v as u64),
                };
                vec![BranchInfo::new(kind, target)]
            }
            None => Vec::new(),
        };
        let target = branches.first().and_then(|b| b.target);

        let mut tokens = vec![InstructionTextToken::new(TokenKind::Instruction, mnemonic)];
        if !operands.is_empty() {
            tokens.push(InstructionTextToken::new(TokenKind::Text, " "));
            tokens.extend(operand_tokens(&operands, target));
        }
        InstructionInfo {
            length,
            tokens,
            branches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_families() {
        assert_eq!(classify(Family::Arm64, "ret", ""), Some(BranchKind::Return));
        assert_eq!(classify(Family::Arm64, "b.ne", "#0x10"), Some(BranchKind::Conditional));
        assert_eq!(classify(Family::Arm, "bx", "lr"), Some(BranchKind::Return));
        assert_eq!(classify(Family::Arm, "beq", "#0x20"), Some(BranchKind::Conditional));
        assert_eq!(classify(Family::Mips, "jr", "$ra"), Some(BranchKind::Return));
        assert_eq!(classify(Family::Ppc, "blr", ""), Some(BranchKind::Return));
        assert_eq!(classify(Family::RiscV, "c.j", "0x40"), Some(BranchKind::Unconditional));
        assert_eq!(classify(Family::Arm64, "add", "x0, x1, x2"), None);
    }

    #[test]
    fn test_operand_tokens() {
        let tokens = operand_tokens("x0, [sp, #0x10]", None);
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Register,
                TokenKind::OperandSeparator,
                TokenKind::Text,
                TokenKind::BeginMemoryOperand,
                TokenKind::Register,
                TokenKind::OperandSeparator,
                TokenKind::Text,
                TokenKind::Integer,
                TokenKind::EndMemoryOperand,
            ]
        );
        assert_eq!(tokens[7].value, 0x10);
    }

    #[test]
    fn test_decode_aarch64() {
        let arch = CapstoneArchitecture::aarch64();
        // ret
        let ret = arch.decode_one_instruction(&[0xc0, 0x03, 0x5f, 0xd6], 0x1000);
        assert_eq!(ret.length, 4);
        assert!(ret.ends_flow());
        // bl #0x1010 from 0x1000
        let bl = arch.decode_one_instruction(&[0x04, 0x00, 0x00, 0x94], 0x1000);
        assert_eq!(bl.branches, vec![BranchInfo::new(BranchKind::Call, Some(0x1010))]);
        assert!(!arch.decode_one_instruction(&[0x00], 0).is_valid());
    }
}
