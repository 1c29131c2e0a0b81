//! Segments: virtual ranges mapped onto backing storage.
//!
//! A segment maps `[vstart, vend)` onto `[data_offset, data_offset +
//! data_length)` of the storage accessor. When `data_length` is shorter than
//! the virtual range the tail reads as zero and cannot be written.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::address_range::AddressRange;
use crate::error::{Result, VspaceError};

bitflags! {
    /// Permission and content flags for a segment
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SegmentFlags: u32 {
        const EXECUTABLE = 0x01;
        const WRITABLE = 0x02;
        const READABLE = 0x04;
        const CONTAINS_DATA = 0x08;
        const CONTAINS_CODE = 0x10;
        const DENY_WRITE = 0x20;
        const DENY_EXECUTE = 0x40;
    }
}

impl SegmentFlags {
    pub fn rwx(read: bool, write: bool, execute: bool) -> Self {
        let mut flags = SegmentFlags::empty();
        flags.set(SegmentFlags::READABLE, read);
        flags.set(SegmentFlags::WRITABLE, write);
        flags.set(SegmentFlags::EXECUTABLE, execute);
        flags
    }
}

impl fmt::Display for SegmentFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut perms = String::with_capacity(3);
        perms.push(if self.contains(SegmentFlags::READABLE) { 'r' } else { '-' });
        perms.push(if self.contains(SegmentFlags::WRITABLE) { 'w' } else { '-' });
        perms.push(if self.contains(SegmentFlags::EXECUTABLE) { 'x' } else { '-' });
        write!(f, "{}", perms)
    }
}

/// Stable handle for a segment, unique within one address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

/// Virtual-range-to-storage mapping unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Assigned by the address space on insertion
    pub id: SegmentId,
    pub range: AddressRange,
    pub data_offset: u64,
    pub data_length: u64,
    pub flags: SegmentFlags,
    pub auto_defined: bool,
    /// Relocated ranges inside this segment
    pub relocations: Vec<AddressRange>,
}

impl Segment {
    /// Build a segment; fails when `data_length` exceeds the virtual length
    /// or either range wraps.
    pub fn new(
        start: u64,
        length: u64,
        data_offset: u64,
        data_length: u64,
        flags: SegmentFlags,
        auto_defined: bool,
    ) -> Result<Self> {
        if data_length > length {
            return Err(VspaceError::InvalidArgument(format!(
                "segment data length {:#x} exceeds virtual length {:#x}",
                data_length, length
            )));
        }
        let end = start.checked_add(length).ok_or_else(|| {
            VspaceError::InvalidArgument(format!("segment at {:#x} wraps the address space", start))
        })?;
        if data_offset.checked_add(data_length).is_none() {
            return Err(VspaceError::InvalidArgument(format!(
                "segment data {:#x}+{:#x} wraps the storage offset range",
                data_offset, data_length
            )));
        }
        Ok(Self {
            id: SegmentId(0),
            range: AddressRange { start, end },
            data_offset,
            data_length,
            flags,
            auto_defined,
            relocations: Vec::new(),
        })
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.range.start
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.range.end
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.range.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// End offset of the backing data within storage.
    pub fn data_end(&self) -> u64 {
        self.data_offset.saturating_add(self.data_length)
    }

    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        self.range.contains(addr)
    }

    pub fn is_readable(&self) -> bool {
        self.flags.contains(SegmentFlags::READABLE)
    }

    pub fn is_writable(&self) -> bool {
        self.flags.contains(SegmentFlags::WRITABLE) && !self.flags.contains(SegmentFlags::DENY_WRITE)
    }

    pub fn is_executable(&self) -> bool {
        self.flags.contains(SegmentFlags::EXECUTABLE)
            && !self.flags.contains(SegmentFlags::DENY_EXECUTE)
    }

    /// Storage offset backing `addr`, or `None` in the zero-filled tail.
    pub fn data_offset_for(&self, addr: u64) -> Option<u64> {
        if !self.contains(addr) {
            return None;
        }
        let delta = addr - self.start();
        (delta < self.data_length).then(|| self.data_offset + delta)
    }

    /// Virtual address backed by storage offset `offset`, if this segment maps it.
    pub fn address_for_data_offset(&self, offset: u64) -> Option<u64> {
        (offset >= self.data_offset && offset < self.data_end())
            .then(|| self.start() + (offset - self.data_offset))
    }

    pub fn relocation_count(&self) -> usize {
        self.relocations.len()
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Segment({} {} data@{:#x}+{:#x}{})",
            self.range,
            self.flags,
            self.data_offset,
            self.data_length,
            if self.auto_defined { "" } else { " user" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_fill_tail_has_no_backing() {
        let seg = Segment::new(0x1000, 0x20, 0x400, 0x10, SegmentFlags::READABLE, true).unwrap();
        assert_eq!(seg.data_offset_for(0x1000), Some(0x400));
        assert_eq!(seg.data_offset_for(0x100f), Some(0x40f));
        assert_eq!(seg.data_offset_for(0x1010), None);
        assert_eq!(seg.data_offset_for(0x1020), None);
        assert_eq!(seg.address_for_data_offset(0x405), Some(0x1005));
        assert_eq!(seg.data_end(), 0x410);
    }

    #[test]
    fn test_data_longer_than_range_rejected() {
        assert!(Segment::new(0, 0x10, 0, 0x11, SegmentFlags::empty(), false).is_err());
        assert!(Segment::new(u64::MAX, 2, 0, 0, SegmentFlags::empty(), false).is_err());
    }

    #[test]
    fn test_wrapping_data_range_rejected() {
        let err = Segment::new(0x1000, 0x10, u64::MAX - 4, 0x10, SegmentFlags::READABLE, true)
            .unwrap_err();
        assert!(matches!(err, VspaceError::InvalidArgument(_)));
        let edge = Segment::new(0x1000, 0x10, u64::MAX - 0x10, 0x10, SegmentFlags::READABLE, true)
            .unwrap();
        assert_eq!(edge.data_end(), u64::MAX);
        assert_eq!(edge.address_for_data_offset(u64::MAX - 2), Some(0x100e));
    }

    #[test]
    fn test_deny_flags_override_permissions() {
        let flags = SegmentFlags::rwx(true, true, true) | SegmentFlags::DENY_WRITE;
        let seg = Segment::new(0, 1, 0, 1, flags, false).unwrap();
        assert!(!seg.is_writable());
        assert!(seg.is_executable());
        assert_eq!(SegmentFlags::rwx(true, false, true).to_string(), "r-x");
    }
}
