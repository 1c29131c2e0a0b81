//! Byte, text and constant search over an address space.
//!
//! Byte search reads the space in chunks of `SearchConfig::chunk_size`.
//! Consecutive chunks overlap by `pattern.len() - 1` bytes and a match is
//! only reported by the chunk it starts in, so matches that straddle a
//! chunk boundary are reported once. Overlapping matches are all
//! reported. Reads never cross unmapped gaps, so neither do matches.
//!
//! Text and constant search walk a `LinearCursor` and test each rendered
//! line.

pub mod stream;

use aho_corasick::AhoCorasick;
use memchr::memmem;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::check_timeout;
use crate::config::SearchConfig;
use crate::core::TokenKind;
use crate::error::{Result, VspaceError};
use crate::linear::{DisassemblySettings, LinearCursor, LinearLine};
use crate::space::AddressSpace;
use crate::timeout::IterationTimeout;

pub use stream::SearchResults;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindFlags {
    /// ASCII case folding when false
    pub case_sensitive: bool,
}

impl Default for FindFlags {
    fn default() -> Self {
        Self {
            case_sensitive: true,
        }
    }
}

impl FindFlags {
    pub fn ignore_case() -> Self {
        Self {
            case_sensitive: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchQuery {
    Data(Vec<u8>),
    Text(String),
    Constant(u64),
}

/// What matched: the bytes as found, the matching line text, or the constant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchValue {
    Data(Vec<u8>),
    Text(String),
    Constant(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindMatch {
    pub address: u64,
    pub value: MatchValue,
    /// Rendered line for text and constant matches
    pub line: Option<LinearLine>,
}

enum ByteMatcher {
    Exact(memmem::Finder<'static>),
    Folded(AhoCorasick),
}

impl ByteMatcher {
    fn new(pattern: &[u8], case_sensitive: bool) -> Result<Self> {
        if case_sensitive {
            return Ok(ByteMatcher::Exact(memmem::Finder::new(pattern).into_owned()));
        }
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build([pattern])
            .map(ByteMatcher::Folded)
            .map_err(|e| VspaceError::InvalidArgument(format!("bad search pattern: {}", e)))
    }

    /// Start offsets of every match, overlapping ones included.
    fn offsets(&self, haystack: &[u8]) -> Vec<usize> {
        match self {
            ByteMatcher::Exact(finder) => {
                let mut out = Vec::new();
                let mut from = 0;
                while let Some(i) = finder.find(&haystack[from..]) {
                    out.push(from + i);
                    from += i + 1;
                }
                out
            }
            ByteMatcher::Folded(ac) => ac
                .find_overlapping_iter(haystack)
                .map(|m| m.start())
                .collect(),
        }
    }
}

enum LineMatcher {
    Text { needle: String, case_sensitive: bool },
    Constant(u64),
}

impl LineMatcher {
    fn matches(&self, line: &LinearLine) -> Option<MatchValue> {
        match self {
            LineMatcher::Text {
                needle,
                case_sensitive,
            } => {
                let text = line.text();
                let hit = if *case_sensitive {
                    text.contains(needle.as_str())
                } else {
                    text.to_lowercase().contains(needle.as_str())
                };
                hit.then_some(MatchValue::Text(text))
            }
            LineMatcher::Constant(value) => line
                .tokens
                .iter()
                .any(|t| {
                    matches!(t.kind, TokenKind::Integer | TokenKind::PossibleAddress)
                        && t.value == *value
                })
                .then_some(MatchValue::Constant(*value)),
        }
    }
}

fn deadline(config: &SearchConfig, operation: &str, interval: usize) -> Option<IterationTimeout> {
    (config.timeout_seconds > 0).then(|| {
        IterationTimeout::new(config.timeout_seconds, operation).with_check_interval(interval)
    })
}

/// Rate-limits progress callbacks to one per `granularity` bytes.
struct Progress<'a> {
    callback: &'a mut dyn FnMut(u64, u64) -> bool,
    start: u64,
    total: u64,
    granularity: u64,
    last: u64,
}

impl<'a> Progress<'a> {
    fn new(callback: &'a mut dyn FnMut(u64, u64) -> bool, start: u64, end: u64, granularity: usize) -> Self {
        Self {
            callback,
            start,
            total: end.saturating_sub(start),
            granularity: granularity.max(1) as u64,
            last: start,
        }
    }

    /// False when the caller asked to stop.
    fn report(&mut self, pos: u64) -> bool {
        let pos = pos.max(self.start);
        let done = (pos - self.start).min(self.total);
        if pos - self.last < self.granularity && done < self.total {
            return true;
        }
        self.last = pos;
        (self.callback)(done, self.total)
    }
}

impl AddressSpace {
    fn scan_data(
        &self,
        start: u64,
        end: u64,
        pattern: &[u8],
        flags: FindFlags,
        progress: &mut dyn FnMut(u64, u64) -> bool,
        on_match: &mut dyn FnMut(FindMatch) -> bool,
    ) -> Result<bool> {
        if pattern.is_empty() || start >= end {
            return Ok(false);
        }
        let config = &self.config().search;
        let chunk = config.chunk_size.max(pattern.len() * 2);
        let matcher = ByteMatcher::new(pattern, flags.case_sensitive)?;
        let mut timeout = deadline(config, "data search", 1);
        let mut progress = Progress::new(progress, start, end, config.progress_granularity);
        let mut found = false;
        let mut pos = start;

        loop {
            pos = self.get_next_valid_offset(pos);
            if pos >= end || !self.is_valid_offset(pos) {
                break;
            }
            if let Some(t) = timeout.as_mut() {
                check_timeout!(t, "data search");
            }
            let want = (end - pos).min(chunk as u64) as usize;
            let data = self.read(pos, want);
            if data.is_empty() {
                pos += 1;
                continue;
            }
            let more = data.len() == want && pos + (want as u64) < end;
            let advance = if more {
                data.len() - (pattern.len() - 1)
            } else {
                data.len()
            };
            for offset in matcher.offsets(&data) {
                if offset >= advance {
                    break;
                }
                found = true;
                let hit = FindMatch {
                    address: pos + offset as u64,
                    value: MatchValue::Data(data[offset..offset + pattern.len()].to_vec()),
                    line: None,
                };
                if !on_match(hit) {
                    return Ok(true);
                }
            }
            pos += advance as u64;
            if !progress.report(pos) {
                debug!("data search canceled");
                return Ok(found);
            }
        }
        progress.report(end);
        Ok(found)
    }

    fn scan_lines(
        self: &Arc<Self>,
        start: u64,
        end: u64,
        matcher: LineMatcher,
        settings: &DisassemblySettings,
        progress: &mut dyn FnMut(u64, u64) -> bool,
        on_match: &mut dyn FnMut(FindMatch) -> bool,
    ) -> Result<bool> {
        if start >= end {
            return Ok(false);
        }
        let config = &self.config().search;
        let mut timeout = deadline(config, "line search", 256);
        let mut progress = Progress::new(progress, start, end, config.progress_granularity);
        let mut cursor = LinearCursor::new(self.clone(), settings.clone());
        cursor.seek_to_address(start);
        let mut found = false;

        while !cursor.is_past_end() && cursor.address() < end {
            if let Some(t) = timeout.as_mut() {
                check_timeout!(t, "line search");
            }
            for line in cursor.lines() {
                if line.address < start || line.address >= end {
                    continue;
                }
                if let Some(value) = matcher.matches(line) {
                    found = true;
                    let hit = FindMatch {
                        address: line.address,
                        value,
                        line: Some(line.clone()),
                    };
                    if !on_match(hit) {
                        return Ok(true);
                    }
                }
            }
            if !progress.report(cursor.address()) {
                debug!("line search canceled");
                return Ok(found);
            }
            if !cursor.next() {
                break;
            }
        }
        progress.report(end);
        Ok(found)
    }

    fn finish_scan(result: Result<bool>, operation: &str) -> bool {
        match result {
            Ok(found) => found,
            Err(e @ VspaceError::Timeout { .. }) => {
                warn!(operation, error = %e, "search stopped at its deadline");
                false
            }
            Err(e) => {
                warn!(operation, error = %e, "search failed");
                false
            }
        }
    }

    /// Every occurrence of `data` in `[start, end)`.
    ///
    /// `progress(done, total)` and `on_match` return false to stop. Returns
    /// true when at least one match was reported.
    pub fn find_all_data(
        &self,
        start: u64,
        end: u64,
        data: &[u8],
        flags: FindFlags,
        mut progress: impl FnMut(u64, u64) -> bool,
        mut on_match: impl FnMut(FindMatch) -> bool,
    ) -> bool {
        let result = self.scan_data(start, end, data, flags, &mut progress, &mut on_match);
        Self::finish_scan(result, "find_all_data")
    }

    #[allow(clippy::too_many_arguments)]
    pub fn find_all_text(
        self: &Arc<Self>,
        start: u64,
        end: u64,
        text: &str,
        settings: &DisassemblySettings,
        flags: FindFlags,
        mut progress: impl FnMut(u64, u64) -> bool,
        mut on_match: impl FnMut(FindMatch) -> bool,
    ) -> bool {
        if text.is_empty() {
            return false;
        }
        let matcher = LineMatcher::Text {
            needle: if flags.case_sensitive {
                text.to_string()
            } else {
                text.to_lowercase()
            },
            case_sensitive: flags.case_sensitive,
        };
        let result = self.scan_lines(start, end, matcher, settings, &mut progress, &mut on_match);
        Self::finish_scan(result, "find_all_text")
    }

    pub fn find_all_constant(
        self: &Arc<Self>,
        start: u64,
        end: u64,
        constant: u64,
        settings: &DisassemblySettings,
        mut progress: impl FnMut(u64, u64) -> bool,
        mut on_match: impl FnMut(FindMatch) -> bool,
    ) -> bool {
        let matcher = LineMatcher::Constant(constant);
        let result = self.scan_lines(start, end, matcher, settings, &mut progress, &mut on_match);
        Self::finish_scan(result, "find_all_constant")
    }

    /// Dispatch on `query` for callers that build queries dynamically.
    #[allow(clippy::too_many_arguments)]
    pub fn find_all(
        self: &Arc<Self>,
        start: u64,
        end: u64,
        query: &SearchQuery,
        settings: &DisassemblySettings,
        flags: FindFlags,
        progress: impl FnMut(u64, u64) -> bool,
        on_match: impl FnMut(FindMatch) -> bool,
    ) -> bool {
        match query {
            SearchQuery::Data(data) => self.find_all_data(start, end, data, flags, progress, on_match),
            SearchQuery::Text(text) => {
                self.find_all_text(start, end, text, settings, flags, progress, on_match)
            }
            SearchQuery::Constant(value) => {
                self.find_all_constant(start, end, *value, settings, progress, on_match)
            }
        }
    }

    /// First occurrence of `data` at or after `start`.
    pub fn find_next_data(&self, start: u64, data: &[u8], flags: FindFlags) -> Option<u64> {
        let mut hit = None;
        self.find_all_data(start, self.end(), data, flags, |_, _| true, |m| {
            hit = Some(m.address);
            false
        });
        hit
    }

    /// Address of the first rendered line at or after `start` containing `text`.
    pub fn find_next_text(
        self: &Arc<Self>,
        start: u64,
        text: &str,
        settings: &DisassemblySettings,
        flags: FindFlags,
    ) -> Option<u64> {
        let mut hit = None;
        self.find_all_text(start, self.end(), text, settings, flags, |_, _| true, |m| {
            hit = Some(m.address);
            false
        });
        hit
    }

    /// Address of the first line at or after `start` with an operand equal to `constant`.
    pub fn find_next_constant(
        self: &Arc<Self>,
        start: u64,
        constant: u64,
        settings: &DisassemblySettings,
    ) -> Option<u64> {
        let mut hit = None;
        self.find_all_constant(start, self.end(), constant, settings, |_, _| true, |m| {
            hit = Some(m.address);
            false
        });
        hit
    }

    /// `find_all_data` on a background thread; matches arrive in address order.
    pub fn find_all_data_stream(
        self: &Arc<Self>,
        start: u64,
        end: u64,
        data: &[u8],
        flags: FindFlags,
    ) -> SearchResults {
        let space = self.clone();
        let pattern = data.to_vec();
        SearchResults::spawn(move |cancel, sender| {
            space.find_all_data(
                start,
                end,
                &pattern,
                flags,
                |_, _| !cancel.load(Ordering::Acquire),
                |m| !cancel.load(Ordering::Acquire) && sender.send(m).is_ok(),
            );
        })
    }

    pub fn find_all_text_stream(
        self: &Arc<Self>,
        start: u64,
        end: u64,
        text: &str,
        settings: &DisassemblySettings,
        flags: FindFlags,
    ) -> SearchResults {
        let space = self.clone();
        let text = text.to_string();
        let settings = settings.clone();
        SearchResults::spawn(move |cancel, sender| {
            space.find_all_text(
                start,
                end,
                &text,
                &settings,
                flags,
                |_, _| !cancel.load(Ordering::Acquire),
                |m| !cancel.load(Ordering::Acquire) && sender.send(m).is_ok(),
            );
        })
    }

    pub fn find_all_constant_stream(
        self: &Arc<Self>,
        start: u64,
        end: u64,
        constant: u64,
        settings: &DisassemblySettings,
    ) -> SearchResults {
        let space = self.clone();
        let settings = settings.clone();
        SearchResults::spawn(move |cancel, sender| {
            space.find_all_constant(
                start,
                end,
                constant,
                &settings,
                |_, _| !cancel.load(Ordering::Acquire),
                |m| !cancel.load(Ordering::Acquire) && sender.send(m).is_ok(),
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpaceConfig;
    use crate::core::SegmentFlags;
    use crate::storage::BufferAccessor;

    fn space_with_chunk(chunk: usize) -> Arc<AddressSpace> {
        let mut config = SpaceConfig::default();
        config.search.chunk_size = chunk;
        config.search.progress_granularity = 1;
        config.analysis.auto_schedule = false;
        let mut bytes = vec![0u8; 0x40];
        bytes[6..11].copy_from_slice(b"NEEDL");
        bytes[0x20..0x25].copy_from_slice(b"needl");
        bytes[0x2e..0x33].copy_from_slice(b"NEEDL");
        let space = AddressSpace::builder()
            .storage(BufferAccessor::new(bytes))
            .config(config)
            .build()
            .unwrap();
        space
            .add_auto_segment(0x1000, 0x20, 0, 0x20, SegmentFlags::READABLE)
            .unwrap();
        space
            .add_auto_segment(0x2000, 0x20, 0x20, 0x20, SegmentFlags::READABLE)
            .unwrap();
        space
    }

    fn collect(space: &AddressSpace, flags: FindFlags) -> Vec<u64> {
        let mut hits = Vec::new();
        space.find_all_data(space.start(), space.end(), b"NEEDL", flags, |_, _| true, |m| {
            hits.push(m.address);
            true
        });
        hits
    }

    #[test]
    fn test_matches_across_chunk_boundaries_once() {
        for chunk in [10, 11, 16, 64] {
            let space = space_with_chunk(chunk);
            assert_eq!(collect(&space, FindFlags::default()), vec![0x1006, 0x200e], "chunk {}", chunk);
        }
    }

    #[test]
    fn test_case_insensitive_and_next() {
        let space = space_with_chunk(16);
        assert_eq!(
            collect(&space, FindFlags::ignore_case()),
            vec![0x1006, 0x2000, 0x200e]
        );
        assert_eq!(space.find_next_data(0x1007, b"NEEDL", FindFlags::default()), Some(0x200e));
        assert_eq!(space.find_next_data(0x200f, b"NEEDL", FindFlags::default()), None);
        assert_eq!(space.find_next_data(0x1000, b"", FindFlags::default()), None);
    }

    #[test]
    fn test_progress_cancels() {
        let space = space_with_chunk(10);
        let mut calls = 0;
        let found = space.find_all_data(
            space.start(),
            space.end(),
            b"NEEDL",
            FindFlags::default(),
            |done, total| {
                calls += 1;
                assert!(done <= total);
                false
            },
            |_| true,
        );
        assert_eq!(calls, 1);
        assert!(!found);
    }

    #[test]
    fn test_stream_yields_in_order() {
        let space = space_with_chunk(16);
        let mut results =
            space.find_all_data_stream(space.start(), space.end(), b"NEEDL", FindFlags::ignore_case());
        assert!(results.has_next());
        let addrs: Vec<u64> = results.by_ref().map(|m| m.address).collect();
        assert_eq!(addrs, vec![0x1006, 0x2000, 0x200e]);
        assert!(!results.has_next());
    }
}
