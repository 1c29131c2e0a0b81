//! x86 and x86_64 through iced-x86.

use iced_x86::{
    Decoder, DecoderOptions, FlowControl, Formatter, FormatterOutput, FormatterTextKind,
    Instruction, IntelFormatter, NumberKind, OpKind,
};

use crate::core::{
    BranchInfo, BranchKind, Endianness, InstructionInfo, InstructionTextToken, TokenKind,
};

use super::Architecture;

pub struct IcedArchitecture {
    bitness: u32,
}

impl IcedArchitecture {
    pub fn x86() -> Self {
        Self { bitness: 32 }
    }

    pub fn x86_64() -> Self {
        Self { bitness: 64 }
    }
}

/// Collects formatter output as typed tokens.
#[derive(Default)]
struct TokenSink {
    tokens: Vec<InstructionTextToken>,
}

impl TokenSink {
    fn push(&mut self, kind: TokenKind, text: &str, value: u64) {
        self.tokens
            .push(InstructionTextToken::with_value(kind, text, value));
    }
}

impl FormatterOutput for TokenSink {
    fn write(&mut self, text: &str, kind: FormatterTextKind) {
        let token = match kind {
            FormatterTextKind::Mnemonic | FormatterTextKind::Prefix => TokenKind::Instruction,
            FormatterTextKind::Register => TokenKind::Register,
            FormatterTextKind::Keyword => TokenKind::Keyword,
            FormatterTextKind::Punctuation => match text {
                "[" => TokenKind::BeginMemoryOperand,
                "]" => TokenKind::EndMemoryOperand,
                "," => TokenKind::OperandSeparator,
                _ => TokenKind::Text,
            },
            _ => TokenKind::Text,
        };
        self.push(token, text, 0);
    }

    fn write_number(
        &mut self,
        _instruction: &Instruction,
        _operand: u32,
        _instruction_operand: Option<u32>,
        text: &str,
        value: u64,
        _number_kind: NumberKind,
        kind: FormatterTextKind,
    ) {
        let token = match kind {
            FormatterTextKind::LabelAddress | FormatterTextKind::FunctionAddress => {
                TokenKind::PossibleAddress
            }
            _ => TokenKind::Integer,
        };
        self.push(token, text, value);
    }
}

fn branches(instr: &Instruction) -> Vec<BranchInfo> {
    let direct = matches!(
        instr.op0_kind(),
        OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64
    );
    let target = direct.then(|| instr.near_branch_target());
    match instr.flow_control() {
        FlowControl::Next | FlowControl::XbeginXabortXend => Vec::new(),
        FlowControl::UnconditionalBranch => vec![BranchInfo::new(BranchKind::Unconditional, target)],
        FlowControl::ConditionalBranch => vec![BranchInfo::new(BranchKind::Conditional, target)],
        FlowControl::IndirectBranch => vec![BranchInfo::new(BranchKind::Indirect, None)],
        FlowControl::Call => vec![BranchInfo::new(BranchKind::Call, target)],
        FlowControl::IndirectCall => vec![BranchInfo::new(BranchKind::Call, None)],
        FlowControl::Return => vec![BranchInfo::new(BranchKind::Return, None)],
        FlowControl::Interrupt | FlowControl::Exception => {
            vec![BranchInfo::new(BranchKind::Exception, None)]
        }
        #[allow(unreachable_patterns)]
        _ => Vec::new(),
    }
}

impl Architecture for IcedArchitecture {
    fn name(&self) -> &str {
        if self.bitness == 64 {
            "x86_64"
        } else {
            "x86"
        }
    }

    fn address_size(&self) -> usize {
        (self.bitness / 8) as usize
    }

    fn endianness(&self) -> Endianness {
        Endianness::Little
    }

    fn max_instruction_length(&self) -> usize {
        15
    }

    fn decode_one_instruction(&self, bytes: &[u8], addr: u64) -> InstructionInfo {
        let mut decoder = Decoder::with_ip(self.bitness, bytes, addr, DecoderOptions::NONE);
        if !decoder.can_decode() {
            return InstructionInfo::undecodable();
        }
        let instr = decoder.decode();
        if instr.is_invalid() {
            return InstructionInfo::undecodable();
        }

        let mut formatter = IntelFormatter::new();
        let options = formatter.options_mut();
        options.set_space_after_operand_separator(true);
        options.set_hex_prefix("0x");
        options.set_hex_suffix("");
        options.set_branch_leading_zeros(false);
        let mut sink = TokenSink::default();
        formatter.format(&instr, &mut sink);

        // rip-relative operands render as absolute addresses
        if instr.is_ip_rel_memory_operand() {
            let target = instr.ip_rel_memory_address();
            for token in sink.tokens.iter_mut() {
                if token.kind == TokenKind::Integer && token.value == target {
                    token.kind = TokenKind::PossibleAddress;
                }
            }
        }

        InstructionInfo {
            length: instr.len(),
            tokens: sink.tokens,
            branches: branches(&instr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_call_and_ret() {
        let arch = IcedArchitecture::x86_64();
        // call 0x1010
        let info = arch.decode_one_instruction(&[0xe8, 0x0b, 0x00, 0x00, 0x00], 0x1000);
        assert_eq!(info.length, 5);
        assert_eq!(
            info.branches,
            vec![BranchInfo::new(BranchKind::Call, Some(0x1010))]
        );
        assert_eq!(info.tokens[0].kind, TokenKind::Instruction);
        assert!(info.text().starts_with("call"));
        assert!(info
            .tokens
            .iter()
            .any(|t| t.is_numeric() && t.value == 0x1010));

        let ret = arch.decode_one_instruction(&[0xc3], 0x2000);
        assert_eq!(ret.length, 1);
        assert!(ret.ends_flow());
    }

    #[test]
    fn test_conditional_branch_and_plain() {
        let arch = IcedArchitecture::x86();
        // je +2
        let je = arch.decode_one_instruction(&[0x74, 0x02], 0x100);
        assert_eq!(
            je.branches,
            vec![BranchInfo::new(BranchKind::Conditional, Some(0x104))]
        );
        // nop
        let nop = arch.decode_one_instruction(&[0x90], 0x100);
        assert!(nop.branches.is_empty());
        assert_eq!(nop.text(), "nop");
    }

    #[test]
    fn test_undecodable() {
        let arch = IcedArchitecture::x86_64();
        assert!(!arch.decode_one_instruction(&[], 0).is_valid());
        // truncated call
        assert!(!arch.decode_one_instruction(&[0xe8, 0x00], 0).is_valid());
    }
}
