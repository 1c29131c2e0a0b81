//! Bidirectional cursor over rendering units.
//!
//! A unit is what one step renders: an instruction (preceded by function
//! header lines at a function start), a data variable, or a hex row. Hex
//! rows are aligned to `bytes_per_row` and cut short at segment, block and
//! variable starts, so walking backwards finds the same units as walking
//! forwards.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::core::{BasicBlock, DataType, InstructionTextToken, TokenKind};
use crate::disasm::Architecture;
use crate::space::AddressSpace;

use super::{DisassemblySettings, LinearLine, LinearLineKind};

struct Unit {
    start: u64,
    end: u64,
    lines: Vec<LinearLine>,
}

pub struct LinearCursor {
    space: Arc<AddressSpace>,
    settings: DisassemblySettings,
    address: u64,
    end: u64,
    lines: Vec<LinearLine>,
    past_end: bool,
}

impl LinearCursor {
    /// Cursor positioned at the first unit of `space`.
    pub fn new(space: Arc<AddressSpace>, settings: DisassemblySettings) -> Self {
        let start = space.start();
        let mut cursor = Self {
            space,
            settings,
            address: start,
            end: start,
            lines: Vec::new(),
            past_end: false,
        };
        cursor.seek_to_address(start);
        cursor
    }

    pub fn settings(&self) -> &DisassemblySettings {
        &self.settings
    }

    /// Start of the current unit.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Lines of the current unit; empty once the cursor moved past the end.
    pub fn lines(&self) -> &[LinearLine] {
        &self.lines
    }

    pub fn is_past_end(&self) -> bool {
        self.past_end
    }

    /// Move to the unit containing `addr`, or the next mapped unit after a gap.
    pub fn seek_to_address(&mut self, addr: u64) {
        let target = if self.space.is_valid_offset(addr) {
            Some(addr)
        } else {
            self.next_valid(addr)
        };
        let unit = target
            .and_then(|a| self.unit_start_containing(a))
            .and_then(|a| self.render_unit(a));
        match unit {
            Some(unit) => self.enter(unit),
            None => self.leave(target.unwrap_or(addr)),
        }
    }

    pub fn reset(&mut self) {
        let start = self.space.start();
        self.seek_to_address(start);
    }

    /// Advance one unit. At the last unit the cursor moves past the end and returns false.
    pub fn next(&mut self) -> bool {
        if self.past_end {
            return false;
        }
        match self.next_valid(self.end).and_then(|a| self.render_unit(a)) {
            Some(unit) => {
                self.enter(unit);
                true
            }
            None => {
                let end = self.end;
                self.leave(end);
                false
            }
        }
    }

    /// Retreat one unit; false at the first unit.
    pub fn previous(&mut self) -> bool {
        let from = if self.past_end {
            self.space.end()
        } else {
            self.address
        };
        let unit = self
            .prev_valid(from)
            .and_then(|p| self.unit_start_containing(p))
            .and_then(|a| self.render_unit(a));
        match unit {
            Some(unit) => {
                self.enter(unit);
                true
            }
            None => false,
        }
    }

    pub fn has_next(&self) -> bool {
        !self.past_end && self.next_valid(self.end).is_some()
    }

    pub fn has_previous(&self) -> bool {
        if self.past_end {
            return self.prev_valid(self.space.end()).is_some();
        }
        self.prev_valid(self.address).is_some()
    }

    /// Lines from the current unit onwards; advances the cursor.
    pub fn lines_iter(&mut self) -> LinearLines<'_> {
        LinearLines {
            cursor: self,
            buffer: VecDeque::new(),
            primed: false,
        }
    }

    fn enter(&mut self, unit: Unit) {
        self.address = unit.start;
        self.end = unit.end;
        self.lines = unit.lines;
        self.past_end = false;
    }

    fn leave(&mut self, at: u64) {
        self.address = at;
        self.end = at;
        self.lines.clear();
        self.past_end = true;
    }

    fn next_valid(&self, addr: u64) -> Option<u64> {
        let next = self.space.get_next_valid_offset(addr);
        (next < self.space.end() && self.space.is_valid_offset(next)).then_some(next)
    }

    /// Greatest valid address strictly below `addr`.
    fn prev_valid(&self, addr: u64) -> Option<u64> {
        let p = addr.checked_sub(1)?;
        if self.space.is_valid_offset(p) {
            return Some(p);
        }
        self.space
            .segments()
            .iter()
            .filter(|s| !s.is_empty() && s.end() <= addr)
            .map(|s| s.end() - 1)
            .filter(|&a| self.space.is_valid_offset(a))
            .max()
    }

    fn code_block_at(&self, addr: u64) -> Option<(u64, BasicBlock, Arc<dyn Architecture>)> {
        let arch = self.space.architecture()?;
        let (function, block) = self.space.block_with_function_at(addr)?;
        Some((function, block, arch))
    }

    /// End of a block or data variable covering `addr`.
    fn covered_end(&self, addr: u64) -> Option<u64> {
        if let Some((_, block, _)) = self.code_block_at(addr) {
            return Some(block.end);
        }
        self.space
            .get_data_var_containing(addr)
            .map(|v| v.range().end)
    }

    fn instruction_length(&self, arch: &dyn Architecture, addr: u64, limit: u64) -> u64 {
        let bytes = self
            .space
            .read(addr, (arch.max_instruction_length() as u64).min(limit) as usize);
        let info = arch.decode_one_instruction(&bytes, addr);
        (info.length as u64).max(1)
    }

    fn unit_start_containing(&self, p: u64) -> Option<u64> {
        if !self.space.is_valid_offset(p) {
            return None;
        }
        if let Some((_, block, arch)) = self.code_block_at(p) {
            let mut cur = block.start;
            while cur < block.end {
                let next = cur + self.instruction_length(arch.as_ref(), cur, block.end - cur);
                if next > p {
                    return Some(cur);
                }
                cur = next;
            }
            return Some(p);
        }
        if let Some(var) = self.space.get_data_var_containing(p) {
            return Some(var.address);
        }

        let row = self.settings.bytes_per_row.max(1) as u64;
        let segment_start = self
            .space
            .get_segment_at(p)
            .map(|s| s.start())
            .unwrap_or_else(|| self.space.start());
        let mut anchor = (p - p % row).max(segment_start);
        while anchor < p {
            match self.covered_end(anchor) {
                Some(end) if end > anchor && end <= p => anchor = end,
                _ => break,
            }
        }
        let mut cur = anchor;
        while cur <= p {
            let end = self.render_unit(cur)?.end;
            if end > p {
                return Some(cur);
            }
            cur = end;
        }
        Some(p)
    }

    fn prefix(&self, addr: u64) -> Vec<InstructionTextToken> {
        if !self.settings.show_addresses {
            return Vec::new();
        }
        vec![
            InstructionTextToken::with_value(TokenKind::Address, format!("{:08x}", addr), addr),
            InstructionTextToken::new(TokenKind::Text, "  "),
        ]
    }

    fn line(
        &self,
        kind: LinearLineKind,
        address: u64,
        function: Option<u64>,
        block: Option<u64>,
        tokens: Vec<InstructionTextToken>,
    ) -> LinearLine {
        LinearLine {
            kind,
            address,
            function,
            block,
            tokens,
        }
    }

    fn render_unit(&self, addr: u64) -> Option<Unit> {
        let space = &self.space;
        if !space.is_valid_offset(addr) {
            return None;
        }
        let mut lines = Vec::new();

        if addr != space.start() {
            if let Some(segment) = space.get_segment_at(addr).filter(|s| s.start() == addr) {
                let mut tokens = self.prefix(addr);
                tokens.push(InstructionTextToken::new(
                    TokenKind::Annotation,
                    format!("segment {}", segment),
                ));
                lines.push(self.line(LinearLineKind::SegmentBoundary, addr, None, None, tokens));
            }
        }

        let (end, content) = if let Some((function, block, arch)) = self.code_block_at(addr) {
            if self.settings.show_function_headers && function == addr {
                self.push_function_header(&mut lines, addr);
            }
            self.render_code(addr, function, &block, arch.as_ref())
        } else if let Some(var) = space.get_data_var_at(addr) {
            let end = var.range().end;
            (end, self.render_data_var(addr, &var.ty))
        } else {
            self.render_hex(addr)?
        };
        lines.extend(content);
        lines.truncate(space.config().linear.max_lines_per_step.max(1));
        Some(Unit {
            start: addr,
            end,
            lines,
        })
    }

    fn push_function_header(&self, lines: &mut Vec<LinearLine>, addr: u64) {
        let Some(function) = self.space.get_function_at(addr) else {
            return;
        };
        let mut name = function.name;
        if self.settings.max_symbol_width > 0 && name.chars().count() > self.settings.max_symbol_width {
            name = name.chars().take(self.settings.max_symbol_width).collect();
        }
        let mut tokens = self.prefix(addr);
        tokens.push(InstructionTextToken::with_value(TokenKind::FunctionName, name, addr));
        tokens.push(InstructionTextToken::new(TokenKind::Text, "()"));
        lines.push(self.line(LinearLineKind::FunctionHeader, addr, Some(addr), None, tokens));
        lines.push(self.line(LinearLineKind::FunctionHeaderEnd, addr, Some(addr), None, Vec::new()));
    }

    fn render_code(
        &self,
        addr: u64,
        function: u64,
        block: &BasicBlock,
        arch: &dyn Architecture,
    ) -> (u64, Vec<LinearLine>) {
        let limit = (arch.max_instruction_length() as u64).min(block.end - addr) as usize;
        let bytes = self.space.read(addr, limit);
        let info = arch.decode_one_instruction(&bytes, addr);
        let mut tokens = self.prefix(addr);
        if info.is_valid() {
            tokens.extend(info.tokens);
            let line = self.line(LinearLineKind::Code, addr, Some(function), Some(block.start), tokens);
            return (addr + info.length as u64, vec![line]);
        }
        // undecodable: one byte of hex so the cursor keeps moving
        let byte = bytes.first().copied().unwrap_or(0);
        tokens.push(InstructionTextToken::new(TokenKind::Keyword, "db "));
        tokens.push(InstructionTextToken::with_value(
            TokenKind::Hex,
            format!("{:02x}", byte),
            byte as u64,
        ));
        let line = self.line(LinearLineKind::Hex, addr, Some(function), Some(block.start), tokens);
        (addr + 1, vec![line])
    }

    fn render_data_var(&self, addr: u64, ty: &DataType) -> Vec<LinearLine> {
        let name = self
            .space
            .get_symbol_at(addr, None)
            .map(|s| s.full_name)
            .unwrap_or_else(|| format!("data_{:x}", addr));
        let mut tokens = self.prefix(addr);
        tokens.push(InstructionTextToken::new(TokenKind::TypeName, ty.to_string()));
        tokens.push(InstructionTextToken::new(TokenKind::Text, " "));
        tokens.push(InstructionTextToken::with_value(TokenKind::DataSymbol, name, addr));
        let scalar = match ty {
            DataType::Integer { width, signed } => Some((*width, *signed)),
            DataType::Pointer { width, .. } => Some((*width, false)),
            DataType::Bool => Some((1, false)),
            _ => None,
        };
        if let Some((width, signed)) = scalar {
            let endian = self.space.default_endianness();
            if let Some(value) = self.space.read_int(addr, width as usize, signed, endian) {
                tokens.push(InstructionTextToken::new(TokenKind::Text, " = "));
                let text = if value < 0 {
                    format!("-{:#x}", value.unsigned_abs())
                } else {
                    format!("{:#x}", value)
                };
                tokens.push(InstructionTextToken::with_value(
                    TokenKind::Integer,
                    text,
                    value as u64,
                ));
            }
        }
        vec![self.line(LinearLineKind::DataVariable, addr, None, None, tokens)]
    }

    fn render_hex(&self, addr: u64) -> Option<(u64, Vec<LinearLine>)> {
        let space = &self.space;
        let row = self.settings.bytes_per_row.max(1) as u64;
        let mut end = (addr - addr % row).saturating_add(row);
        let limits = [
            space.get_next_data_var_after(addr).map(|v| v.address),
            space
                .architecture()
                .and_then(|_| space.next_block_start_after(addr)),
            space.get_next_segment_start_after(addr),
        ];
        for limit in limits.into_iter().flatten() {
            end = end.min(limit);
        }
        let data = space.read(addr, (end - addr) as usize);
        if data.is_empty() {
            return None;
        }
        let end = addr + data.len() as u64;

        let mut tokens = self.prefix(addr);
        for (i, byte) in data.iter().enumerate() {
            if i > 0 {
                tokens.push(InstructionTextToken::new(TokenKind::Text, " "));
            }
            tokens.push(InstructionTextToken::with_value(
                TokenKind::Hex,
                format!("{:02x}", byte),
                *byte as u64,
            ));
        }
        let ascii: String = data
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        tokens.push(InstructionTextToken::new(TokenKind::Text, "  "));
        tokens.push(InstructionTextToken::new(TokenKind::Text, ascii));
        Some((end, vec![self.line(LinearLineKind::Hex, addr, None, None, tokens)]))
    }
}

/// Iterator over the lines of successive units
pub struct LinearLines<'a> {
    cursor: &'a mut LinearCursor,
    buffer: VecDeque<LinearLine>,
    primed: bool,
}

impl Iterator for LinearLines<'_> {
    type Item = LinearLine;

    fn next(&mut self) -> Option<LinearLine> {
        loop {
            if let Some(line) = self.buffer.pop_front() {
                return Some(line);
            }
            if !self.primed {
                self.primed = true;
            } else if !self.cursor.next() {
                return None;
            }
            self.buffer.extend(self.cursor.lines().iter().cloned());
        }
    }
}

impl AddressSpace {
    pub fn get_linear_disassembly_position_at(
        self: &Arc<Self>,
        addr: u64,
        settings: DisassemblySettings,
    ) -> LinearCursor {
        let mut cursor = LinearCursor::new(self.clone(), settings);
        cursor.seek_to_address(addr);
        cursor
    }

    /// Lines at the cursor, then advance; empty once past the end.
    pub fn get_next_linear_disassembly_lines(&self, cursor: &mut LinearCursor) -> Vec<LinearLine> {
        while !cursor.is_past_end() {
            let lines = cursor.lines().to_vec();
            cursor.next();
            if !lines.is_empty() {
                return lines;
            }
        }
        Vec::new()
    }

    /// Step back, then return the lines there; empty at the first unit.
    pub fn get_previous_linear_disassembly_lines(
        &self,
        cursor: &mut LinearCursor,
    ) -> Vec<LinearLine> {
        while cursor.previous() {
            if !cursor.lines().is_empty() {
                return cursor.lines().to_vec();
            }
        }
        Vec::new()
    }
}
