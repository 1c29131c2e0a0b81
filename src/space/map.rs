//! Segment and section tables.
//!
//! Auto and user segments live in separate ordered maps keyed by start
//! address. Within one provenance segments never overlap, so the segment
//! containing an address is the last one starting at or before it. Across
//! provenance they may overlap and user segments win every query.

use std::collections::BTreeMap;

use crate::core::{AddressRange, Section, Segment, SegmentId};
use crate::error::{Result, VspaceError};

#[derive(Debug, Clone, Default)]
pub struct SegmentMap {
    auto_segments: BTreeMap<u64, Segment>,
    user_segments: BTreeMap<u64, Segment>,
    auto_sections: BTreeMap<String, Section>,
    user_sections: BTreeMap<String, Section>,
    next_id: u64,
}

fn containing(map: &BTreeMap<u64, Segment>, addr: u64) -> Option<&Segment> {
    map.range(..=addr)
        .next_back()
        .map(|(_, s)| s)
        .filter(|s| s.contains(addr))
}

fn next_start_after(map: &BTreeMap<u64, Segment>, addr: u64) -> Option<u64> {
    map.range(addr..)
        .map(|(_, s)| s)
        .find(|s| !s.is_empty())
        .map(|s| s.start())
}

impl SegmentMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn layer(&self, auto: bool) -> &BTreeMap<u64, Segment> {
        if auto {
            &self.auto_segments
        } else {
            &self.user_segments
        }
    }

    fn layer_mut(&mut self, auto: bool) -> &mut BTreeMap<u64, Segment> {
        if auto {
            &mut self.auto_segments
        } else {
            &mut self.user_segments
        }
    }

    /// Insert a segment, assigning its id. Overlap within the same provenance is an error.
    pub fn add_segment(&mut self, mut segment: Segment) -> Result<SegmentId> {
        let layer = self.layer(segment.auto_defined);
        let overlap_err = || VspaceError::SegmentOverlap {
            start: segment.start(),
            end: segment.end(),
        };
        if layer.contains_key(&segment.start()) {
            return Err(overlap_err());
        }
        if let Some((_, prev)) = layer.range(..segment.end().max(segment.start().saturating_add(1))).next_back() {
            if prev.range.overlaps(&segment.range) {
                return Err(overlap_err());
            }
        }
        self.next_id += 1;
        let id = SegmentId(self.next_id);
        segment.id = id;
        let auto = segment.auto_defined;
        self.layer_mut(auto).insert(segment.start(), segment);
        Ok(id)
    }

    /// Re-insert a segment keeping its id (undo, snapshot restore).
    pub(crate) fn restore_segment(&mut self, segment: Segment) -> Result<()> {
        self.next_id = self.next_id.max(segment.id.0);
        let layer = self.layer(segment.auto_defined);
        if let Some((_, prev)) = layer.range(..segment.end().max(segment.start().saturating_add(1))).next_back() {
            if prev.range.overlaps(&segment.range) || prev.start() == segment.start() {
                return Err(VspaceError::SegmentOverlap {
                    start: segment.start(),
                    end: segment.end(),
                });
            }
        }
        let auto = segment.auto_defined;
        self.layer_mut(auto).insert(segment.start(), segment);
        Ok(())
    }

    pub fn remove_segment(&mut self, start: u64, auto: bool) -> Option<Segment> {
        self.layer_mut(auto).remove(&start)
    }

    /// Drop every auto segment, returning them in address order.
    pub fn clear_auto_segments(&mut self) -> Vec<Segment> {
        std::mem::take(&mut self.auto_segments).into_values().collect()
    }

    /// Effective segment at `addr`: user first, then auto.
    pub fn segment_at(&self, addr: u64) -> Option<&Segment> {
        containing(&self.user_segments, addr).or_else(|| containing(&self.auto_segments, addr))
    }

    /// Effective segment at `addr` and the end of the run it governs.
    ///
    /// An auto segment only governs up to the next user segment inside it.
    pub fn span_at(&self, addr: u64) -> Option<(&Segment, u64)> {
        if let Some(seg) = containing(&self.user_segments, addr) {
            return Some((seg, seg.end()));
        }
        let seg = containing(&self.auto_segments, addr)?;
        let end = match next_start_after(&self.user_segments, addr) {
            Some(user_start) => user_start.min(seg.end()),
            None => seg.end(),
        };
        Some((seg, end))
    }

    /// Start of the first non-empty segment beginning strictly after `addr`.
    pub fn next_segment_start_after(&self, addr: u64) -> Option<u64> {
        let from = addr.checked_add(1)?;
        [
            next_start_after(&self.user_segments, from),
            next_start_after(&self.auto_segments, from),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn segment_by_id(&self, id: SegmentId) -> Option<&Segment> {
        self.user_segments
            .values()
            .chain(self.auto_segments.values())
            .find(|s| s.id == id)
    }

    /// All segments of both provenances ordered by start, user before auto on ties.
    pub fn segments(&self) -> Vec<Segment> {
        let mut out: Vec<Segment> = self
            .user_segments
            .values()
            .chain(self.auto_segments.values())
            .cloned()
            .collect();
        out.sort_by_key(|s| (s.start(), s.auto_defined));
        out
    }

    pub fn segment_count(&self) -> usize {
        self.user_segments.len() + self.auto_segments.len()
    }

    pub fn is_valid(&self, addr: u64) -> bool {
        self.segment_at(addr).is_some()
    }

    /// Smallest mapped address `>= addr`.
    pub fn next_valid(&self, addr: u64) -> Option<u64> {
        if self.is_valid(addr) {
            return Some(addr);
        }
        match (
            next_start_after(&self.user_segments, addr),
            next_start_after(&self.auto_segments, addr),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Lowest mapped address, or 0 with no segments.
    pub fn start(&self) -> u64 {
        self.user_segments
            .values()
            .chain(self.auto_segments.values())
            .filter(|s| !s.is_empty())
            .map(|s| s.start())
            .min()
            .unwrap_or(0)
    }

    /// One past the highest mapped address, or 0 with no segments.
    pub fn end(&self) -> u64 {
        self.user_segments
            .values()
            .chain(self.auto_segments.values())
            .map(|s| s.end())
            .max()
            .unwrap_or(0)
    }

    /// First virtual address whose backing is storage offset `offset`.
    pub fn address_for_data_offset(&self, offset: u64) -> Option<u64> {
        self.user_segments
            .values()
            .chain(self.auto_segments.values())
            .filter_map(|s| s.address_for_data_offset(offset))
            .find(|&addr| self.segment_at(addr).and_then(|s| s.data_offset_for(addr)) == Some(offset))
    }

    // sections

    /// Insert or replace a section in its provenance layer; returns the replaced one.
    pub fn add_section(&mut self, section: Section) -> Option<Section> {
        let layer = if section.auto_defined {
            &mut self.auto_sections
        } else {
            &mut self.user_sections
        };
        layer.insert(section.name.clone(), section)
    }

    pub fn remove_section(&mut self, name: &str, auto: bool) -> Option<Section> {
        if auto {
            self.auto_sections.remove(name)
        } else {
            self.user_sections.remove(name)
        }
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.user_sections
            .get(name)
            .or_else(|| self.auto_sections.get(name))
    }

    /// Effective sections (user shadows auto by name), ordered by start.
    pub fn sections(&self) -> Vec<Section> {
        let mut out: Vec<Section> = self.user_sections.values().cloned().collect();
        out.extend(
            self.auto_sections
                .values()
                .filter(|s| !self.user_sections.contains_key(&s.name))
                .cloned(),
        );
        out.sort_by(|a, b| (a.start(), &a.name).cmp(&(b.start(), &b.name)));
        out
    }

    /// Sections of both provenances, shadowed ones included.
    pub(crate) fn all_sections(&self) -> Vec<Section> {
        self.user_sections
            .values()
            .chain(self.auto_sections.values())
            .cloned()
            .collect()
    }

    pub fn sections_at(&self, addr: u64) -> Vec<Section> {
        let mut out: Vec<Section> = self
            .user_sections
            .values()
            .chain(
                self.auto_sections
                    .values()
                    .filter(|s| !self.user_sections.contains_key(&s.name)),
            )
            .filter(|s| s.range.contains(addr))
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.start(), &a.name).cmp(&(b.start(), &b.name)));
        out
    }

    pub fn unique_section_names(&self) -> Vec<String> {
        self.sections().into_iter().map(|s| s.name).collect()
    }

    // relocations

    /// Attach a relocation range to the effective segment containing its start.
    pub fn add_relocation(&mut self, range: AddressRange) -> bool {
        let (auto, start) = match self.segment_at(range.start) {
            Some(seg) => (seg.auto_defined, seg.start()),
            None => return false,
        };
        match self.layer_mut(auto).get_mut(&start) {
            Some(seg) => {
                if !seg.relocations.contains(&range) {
                    seg.relocations.push(range);
                    seg.relocations.sort();
                }
                true
            }
            None => false,
        }
    }

    pub fn relocation_ranges(&self) -> Vec<AddressRange> {
        let mut out: Vec<AddressRange> = self
            .user_segments
            .values()
            .chain(self.auto_segments.values())
            .flat_map(|s| s.relocations.iter().copied())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SectionSemantics, SegmentFlags};

    fn seg(start: u64, len: u64, flags: SegmentFlags, auto: bool) -> Segment {
        Segment::new(start, len, start, len, flags, auto).unwrap()
    }

    #[test]
    fn test_same_provenance_overlap_rejected() {
        let mut map = SegmentMap::new();
        map.add_segment(seg(0x1000, 0x100, SegmentFlags::READABLE, true)).unwrap();
        let err = map
            .add_segment(seg(0x1080, 0x100, SegmentFlags::READABLE, true))
            .unwrap_err();
        assert!(matches!(err, VspaceError::SegmentOverlap { .. }));
        assert!(map
            .add_segment(seg(0x0f80, 0x100, SegmentFlags::READABLE, true))
            .is_err());
        assert!(map
            .add_segment(seg(0x1100, 0x100, SegmentFlags::READABLE, true))
            .is_ok());
    }

    #[test]
    fn test_user_shadows_auto() {
        let mut map = SegmentMap::new();
        map.add_segment(seg(0x1000, 0x100, SegmentFlags::READABLE, true)).unwrap();
        map.add_segment(seg(0x1000, 0x100, SegmentFlags::rwx(true, true, false), false))
            .unwrap();
        let s = map.segment_at(0x1010).unwrap();
        assert!(!s.auto_defined);
        assert!(s.is_writable());
        assert_eq!(map.segment_count(), 2);
    }

    #[test]
    fn test_span_stops_at_user_segment() {
        let mut map = SegmentMap::new();
        map.add_segment(seg(0x1000, 0x100, SegmentFlags::READABLE, true)).unwrap();
        map.add_segment(seg(0x1040, 0x10, SegmentFlags::READABLE, false)).unwrap();
        let (s, end) = map.span_at(0x1000).unwrap();
        assert!(s.auto_defined);
        assert_eq!(end, 0x1040);
        let (s, end) = map.span_at(0x1048).unwrap();
        assert!(!s.auto_defined);
        assert_eq!(end, 0x1050);
        let (_, end) = map.span_at(0x1050).unwrap();
        assert_eq!(end, 0x1100);
    }

    #[test]
    fn test_next_valid_skips_gaps() {
        let mut map = SegmentMap::new();
        map.add_segment(seg(0x1000, 0x10, SegmentFlags::READABLE, true)).unwrap();
        map.add_segment(seg(0x2000, 0x10, SegmentFlags::READABLE, true)).unwrap();
        assert_eq!(map.next_valid(0x1005), Some(0x1005));
        assert_eq!(map.next_valid(0x1010), Some(0x2000));
        assert_eq!(map.next_valid(0x2010), None);
        assert_eq!(map.start(), 0x1000);
        assert_eq!(map.end(), 0x2010);
    }

    #[test]
    fn test_next_segment_start_after_is_strict() {
        let mut map = SegmentMap::new();
        map.add_segment(seg(0x1000, 0x10, SegmentFlags::READABLE, true)).unwrap();
        map.add_segment(seg(0x3000, 0x10, SegmentFlags::READABLE, true)).unwrap();
        map.add_segment(seg(0x2000, 0x10, SegmentFlags::READABLE, false)).unwrap();
        assert_eq!(map.next_segment_start_after(0x0fff), Some(0x1000));
        assert_eq!(map.next_segment_start_after(0x1000), Some(0x2000));
        assert_eq!(map.next_segment_start_after(0x2000), Some(0x3000));
        assert_eq!(map.next_segment_start_after(0x3000), None);
        assert_eq!(map.next_segment_start_after(u64::MAX), None);
    }

    #[test]
    fn test_sections_at_honors_shadowing() {
        let mut map = SegmentMap::new();
        map.add_section(Section::new(".data", 0x2000, 0x10, SectionSemantics::ReadWriteData, true));
        map.add_section(Section::new(".data", 0x2000, 0x40, SectionSemantics::ReadWriteData, false));
        map.add_section(Section::new(".bss", 0x2020, 0x10, SectionSemantics::ReadWriteData, true));
        let names: Vec<String> = map.sections_at(0x2024).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec![".data".to_string(), ".bss".to_string()]);
        assert!(map.sections_at(0x2050).is_empty());
    }

    #[test]
    fn test_section_layers() {
        let mut map = SegmentMap::new();
        map.add_section(Section::new(".text", 0x1000, 0x10, SectionSemantics::ReadOnlyCode, true));
        map.add_section(Section::new(".text", 0x1000, 0x20, SectionSemantics::ReadOnlyCode, false));
        assert_eq!(map.section_by_name(".text").unwrap().range.len(), 0x20);
        assert_eq!(map.sections().len(), 1);
        map.remove_section(".text", false);
        assert_eq!(map.section_by_name(".text").unwrap().range.len(), 0x10);
    }

    #[test]
    fn test_relocations_attach_to_segment() {
        let mut map = SegmentMap::new();
        map.add_segment(seg(0x1000, 0x100, SegmentFlags::READABLE, true)).unwrap();
        assert!(map.add_relocation(AddressRange::from_len(0x1010, 8)));
        assert!(!map.add_relocation(AddressRange::from_len(0x5000, 8)));
        assert_eq!(map.relocation_ranges().len(), 1);
        assert_eq!(map.segment_at(0x1000).unwrap().relocation_count(), 1);
    }
}
