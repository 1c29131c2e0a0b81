//! Per-byte modification status, stored as runs.
//!
//! Only non-original bytes are recorded. Runs never overlap and adjacent runs
//! with the same status are merged, so a multi-gigabyte file with a handful
//! of patches costs a handful of map entries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModificationStatus {
    #[default]
    Original,
    Changed,
    Inserted,
}

/// Run-length interval map from storage offset to status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchLog {
    // start -> (end, status); status is never Original
    runs: BTreeMap<u64, (u64, ModificationStatus)>,
}

impl PatchLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from `(start, end, status)` triples.
    pub fn from_runs(runs: impl IntoIterator<Item = (u64, u64, ModificationStatus)>) -> Self {
        let mut log = Self::new();
        for (start, end, status) in runs {
            if start < end {
                log.set(start, end, status);
            }
        }
        log
    }

    pub fn runs(&self) -> Vec<(u64, u64, ModificationStatus)> {
        self.runs.iter().map(|(&s, &(e, st))| (s, e, st)).collect()
    }

    pub fn is_modified(&self) -> bool {
        !self.runs.is_empty()
    }

    pub fn status_at(&self, offset: u64) -> ModificationStatus {
        match self.runs.range(..=offset).next_back() {
            Some((_, &(end, status))) if offset < end => status,
            _ => ModificationStatus::Original,
        }
    }

    pub fn statuses(&self, offset: u64, len: usize) -> Vec<ModificationStatus> {
        let mut out = vec![ModificationStatus::Original; len];
        let end = offset.saturating_add(len as u64);
        let first = self.first_key_touching(offset);
        for (&s, &(e, st)) in self.runs.range(first..end) {
            let lo = s.max(offset);
            let hi = e.min(end);
            for slot in out.iter_mut().take((hi - offset) as usize).skip((lo - offset) as usize) {
                *slot = st;
            }
        }
        out
    }

    /// Overwrite `[start, end)` with `status`; `Original` clears the range.
    pub fn set(&mut self, start: u64, end: u64, status: ModificationStatus) {
        if start >= end {
            return;
        }
        self.clear_range(start, end);
        if status != ModificationStatus::Original {
            self.runs.insert(start, (end, status));
        }
        self.coalesce(start, end);
    }

    /// Mark the original bytes of `[start, end)` as changed; other statuses are kept.
    pub fn mark_changed(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        let mut gaps = Vec::new();
        let mut cursor = start;
        let first = self.first_key_touching(start);
        for (&s, &(e, _)) in self.runs.range(first..end) {
            if e <= cursor {
                continue;
            }
            if s > cursor {
                gaps.push((cursor, s));
            }
            cursor = cursor.max(e);
            if cursor >= end {
                break;
            }
        }
        if cursor < end {
            gaps.push((cursor, end));
        }
        for (a, b) in gaps {
            self.runs.insert(a, (b, ModificationStatus::Changed));
        }
        self.coalesce(start, end);
    }

    /// Record `len` inserted bytes at `offset`, shifting everything after it.
    pub fn insert_shift(&mut self, offset: u64, len: u64) {
        if len == 0 {
            return;
        }
        self.split_at(offset);
        let tail = self.runs.split_off(&offset);
        for (s, (e, st)) in tail {
            self.runs.insert(s + len, (e + len, st));
        }
        self.runs
            .insert(offset, (offset + len, ModificationStatus::Inserted));
        self.coalesce(offset, offset + len);
    }

    /// Forget `[offset, offset + len)` and shift later runs down.
    pub fn remove_shift(&mut self, offset: u64, len: u64) {
        if len == 0 {
            return;
        }
        let end = offset.saturating_add(len);
        self.clear_range(offset, end);
        let tail = self.runs.split_off(&end);
        for (s, (e, st)) in tail {
            self.runs.insert(s - len, (e - len, st));
        }
        self.coalesce(offset, offset);
    }

    fn first_key_touching(&self, offset: u64) -> u64 {
        match self.runs.range(..offset).next_back() {
            Some((&s, &(e, _))) if e > offset => s,
            _ => offset,
        }
    }

    fn split_at(&mut self, offset: u64) {
        if let Some((&s, &(e, st))) = self.runs.range(..offset).next_back() {
            if e > offset {
                self.runs.insert(s, (offset, st));
                self.runs.insert(offset, (e, st));
            }
        }
    }

    fn clear_range(&mut self, start: u64, end: u64) {
        self.split_at(start);
        self.split_at(end);
        let keys: Vec<u64> = self.runs.range(start..end).map(|(&k, _)| k).collect();
        for k in keys {
            self.runs.remove(&k);
        }
    }

    fn coalesce(&mut self, lo: u64, hi: u64) {
        let first = self
            .runs
            .range(..lo)
            .next_back()
            .map(|(&k, _)| k)
            .unwrap_or(lo);
        let keys: Vec<u64> = self.runs.range(first..=hi).map(|(&k, _)| k).collect();
        let mut prev: Option<u64> = None;
        for k in keys {
            if let Some(p) = prev {
                if let (Some(&(pe, pst)), Some(&(e, st))) = (self.runs.get(&p), self.runs.get(&k)) {
                    if pe == k && pst == st {
                        self.runs.remove(&k);
                        self.runs.insert(p, (e, st));
                        continue;
                    }
                }
            }
            prev = Some(k);
        }
    }
}
