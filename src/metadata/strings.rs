//! Strings discovered by extended analysis, plus on-demand lookups.

use encoding_rs::{UTF_16BE, UTF_16LE};

use crate::core::{AddressRange, Endianness, StringKind, StringReference};
use crate::notify::ChangeEvent;
use crate::space::AddressSpace;

fn is_text_byte(b: u8) -> bool {
    (b.is_ascii_graphic() || b == b' ' || b == b'\t') && b != 0x7f
}

fn is_text_unit(u: u16) -> bool {
    u < 0x80 && is_text_byte(u as u8)
}

/// ASCII and UTF-16LE runs of at least `min` characters in `data`, which
/// starts at address `base`. Runs longer than `max` characters are cut.
pub(crate) fn scan_strings(data: &[u8], base: u64, min: usize, max: usize) -> Vec<StringReference> {
    let mut out = Vec::new();
    let min = min.max(1);
    let max = max.max(min);

    let mut run_start = 0usize;
    let mut run_len = 0usize;
    let flush_ascii = |start: usize, len: usize, out: &mut Vec<StringReference>| {
        if len >= min {
            out.push(StringReference {
                kind: StringKind::Ascii,
                start: base + start as u64,
                length: len.min(max) as u64,
            });
        }
    };
    for (i, &b) in data.iter().enumerate() {
        if is_text_byte(b) {
            if run_len == 0 {
                run_start = i;
            }
            run_len += 1;
        } else if run_len > 0 {
            flush_ascii(run_start, run_len, &mut out);
            run_len = 0;
        }
    }
    if run_len > 0 {
        flush_ascii(run_start, run_len, &mut out);
    }

    // UTF-16LE on both alignments. Units must have a zero high byte, so
    // plain ASCII text never reads as UTF-16.
    for align in 0..2usize {
        let Some(body) = data.get(align..) else {
            continue;
        };
        let mut run_start = 0usize;
        let mut run_len = 0usize;
        let flush = |start: usize, len: usize, out: &mut Vec<StringReference>| {
            if len >= min {
                out.push(StringReference {
                    kind: StringKind::Utf16,
                    start: base + (align + start * 2) as u64,
                    length: (len.min(max) * 2) as u64,
                });
            }
        };
        for (i, chunk) in body.chunks_exact(2).enumerate() {
            let unit = u16::from_le_bytes([chunk[0], chunk[1]]);
            if unit != 0 && is_text_unit(unit) {
                if run_len == 0 {
                    run_start = i;
                }
                run_len += 1;
            } else if run_len > 0 {
                flush(run_start, run_len, &mut out);
                run_len = 0;
            }
        }
        if run_len > 0 {
            flush(run_start, run_len, &mut out);
        }
    }

    out.sort_by_key(|s| (s.start, s.length));
    out.dedup_by_key(|s| s.start);
    out
}

impl AddressSpace {
    /// Swap the known strings inside `range` for `found`, emitting the difference.
    pub(crate) fn replace_strings(&self, range: AddressRange, found: Vec<StringReference>) {
        let _guard = self.mutation.lock();
        let mut events = Vec::new();
        {
            let mut md = self.metadata.write();
            let stale: Vec<StringReference> = md
                .strings
                .range(range.start..range.end)
                .map(|(_, s)| *s)
                .filter(|s| !found.contains(s))
                .collect();
            for s in stale {
                md.strings.remove(&s.start);
                events.push(ChangeEvent::StringRemoved(s));
            }
            for s in found {
                if !range.contains(s.start) || md.strings.get(&s.start) == Some(&s) {
                    continue;
                }
                if let Some(old) = md.strings.insert(s.start, s) {
                    events.push(ChangeEvent::StringRemoved(old));
                }
                events.push(ChangeEvent::StringFound(s));
            }
        }
        self.emit_analysis(events);
    }

    /// Strings starting in `[start, start + len)`.
    pub fn get_strings(&self, start: u64, len: u64) -> Vec<StringReference> {
        let range = AddressRange::from_len(start, len);
        self.metadata
            .read()
            .strings
            .range(range.start..range.end)
            .map(|(_, s)| *s)
            .collect()
    }

    pub fn strings(&self) -> Vec<StringReference> {
        self.metadata.read().strings.values().copied().collect()
    }

    /// The string starting at `addr`, or with `partial` the one containing it.
    pub fn get_string_at(&self, addr: u64, partial: bool) -> Option<StringReference> {
        let md = self.metadata.read();
        if let Some(s) = md.strings.get(&addr) {
            return Some(*s);
        }
        if !partial {
            return None;
        }
        md.strings
            .range(..addr)
            .next_back()
            .map(|(_, s)| *s)
            .filter(|s| s.contains(addr))
    }

    /// Check the bytes at `addr` for a printable ASCII run of `min..=max`
    /// characters, optionally requiring a NUL terminator right after it.
    pub fn get_ascii_string_at(
        &self,
        addr: u64,
        min: usize,
        max: usize,
        require_cstring: bool,
    ) -> Option<StringReference> {
        let max = if max == 0 {
            self.config().analysis.max_string_length
        } else {
            max
        };
        let bytes = self.read(addr, max.saturating_add(1));
        let len = bytes.iter().take(max).take_while(|b| is_text_byte(**b)).count();
        if len == 0 || len < min {
            return None;
        }
        if require_cstring && bytes.get(len) != Some(&0) {
            return None;
        }
        Some(StringReference {
            kind: StringKind::Ascii,
            start: addr,
            length: len as u64,
        })
    }

    /// Decode the text of a string reference from the current bytes.
    pub fn read_string(&self, string: &StringReference) -> Option<String> {
        let bytes = self.read(string.start, string.length as usize);
        if (bytes.len() as u64) < string.length {
            return None;
        }
        match string.kind {
            StringKind::Ascii => String::from_utf8(bytes).ok(),
            StringKind::Utf16 => {
                let codec = match self.default_endianness() {
                    Endianness::Little => UTF_16LE,
                    Endianness::Big => UTF_16BE,
                };
                let (text, malformed) = codec.decode_without_bom_handling(&bytes);
                (!malformed).then(|| text.into_owned())
            }
            StringKind::Utf32 => bytes
                .chunks_exact(4)
                .map(|c| char::from_u32(self.default_endianness().read_uint(c) as u32))
                .collect(),
        }
    }
}
