//! Pluggable behavior behind an address space.
//!
//! Every `perform_*` method has a default that implements segment-mapped
//! semantics, so a backend overrides only what differs. `SegmentBackend`
//! takes all defaults; `RawBackend` presents storage as a flat range where
//! virtual address equals storage offset.

use std::path::Path;

use crate::core::Endianness;
use crate::error::Result;
use crate::storage::{ModificationStatus, TrackedStorage};

use super::map::SegmentMap;

/// Read-only view handed to backend operations
pub struct BackendContext<'a> {
    pub map: &'a SegmentMap,
    pub storage: &'a TrackedStorage,
}

/// Mutable view handed to backend mutators
pub struct BackendContextMut<'a> {
    pub map: &'a SegmentMap,
    pub storage: &'a mut TrackedStorage,
}

/// Read the contiguous mapped prefix of `[addr, addr + len)`.
pub fn segment_read(ctx: &BackendContext<'_>, addr: u64, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len.min(1 << 20));
    let mut cur = addr;
    while out.len() < len {
        let Some((seg, span_end)) = ctx.map.span_at(cur) else {
            break;
        };
        let want = ((len - out.len()) as u64).min(span_end - cur);
        let backed_end = seg.start() + seg.data_length;
        if cur < backed_end {
            let from_storage = want.min(backed_end - cur);
            let offset = seg.data_offset + (cur - seg.start());
            let bytes = ctx.storage.read(offset, from_storage as usize);
            let got = bytes.len() as u64;
            out.extend_from_slice(&bytes);
            cur += got;
            if got < from_storage {
                // storage is shorter than the segment claims
                break;
            }
            let fill = want - from_storage;
            out.resize(out.len() + fill as usize, 0);
            cur += fill;
        } else {
            out.resize(out.len() + want as usize, 0);
            cur += want;
        }
        if want == 0 {
            break;
        }
    }
    out
}

/// Write the prefix of `data` that lands in writable, storage-backed bytes.
pub fn segment_write(ctx: &mut BackendContextMut<'_>, addr: u64, data: &[u8]) -> usize {
    let mut done = 0usize;
    let mut cur = addr;
    while done < data.len() {
        let Some((seg, span_end)) = ctx.map.span_at(cur) else {
            break;
        };
        if !seg.is_writable() {
            break;
        }
        let backed_end = (seg.start() + seg.data_length).min(span_end);
        if cur >= backed_end {
            break;
        }
        let n = ((data.len() - done) as u64).min(backed_end - cur) as usize;
        let offset = seg.data_offset + (cur - seg.start());
        let written = ctx.storage.write(offset, &data[done..done + n]);
        done += written;
        cur += written as u64;
        if written < n {
            break;
        }
    }
    done
}

pub trait AddressSpaceBackend: Send + Sync {
    /// View type name, e.g. `Mapped`
    fn name(&self) -> &str;

    fn perform_read(&self, ctx: &BackendContext<'_>, addr: u64, len: usize) -> Vec<u8> {
        segment_read(ctx, addr, len)
    }

    fn perform_write(&self, ctx: &mut BackendContextMut<'_>, addr: u64, data: &[u8]) -> usize {
        segment_write(ctx, addr, data)
    }

    /// Fixed layout unless overridden.
    fn perform_insert(&self, _ctx: &mut BackendContextMut<'_>, _addr: u64, _data: &[u8]) -> usize {
        0
    }

    fn perform_remove(&self, _ctx: &mut BackendContextMut<'_>, _addr: u64, _len: u64) -> u64 {
        0
    }

    /// `None` for addresses with no backing byte.
    fn perform_get_modification(&self, ctx: &BackendContext<'_>, addr: u64) -> Option<ModificationStatus> {
        let offset = ctx.map.segment_at(addr)?.data_offset_for(addr)?;
        (offset < ctx.storage.len()).then(|| ctx.storage.status_at(offset))
    }

    fn perform_is_valid_offset(&self, ctx: &BackendContext<'_>, addr: u64) -> bool {
        ctx.map.is_valid(addr)
    }

    fn perform_is_offset_readable(&self, ctx: &BackendContext<'_>, addr: u64) -> bool {
        ctx.map.segment_at(addr).is_some_and(|s| s.is_readable())
    }

    fn perform_is_offset_writable(&self, ctx: &BackendContext<'_>, addr: u64) -> bool {
        ctx.map.segment_at(addr).is_some_and(|s| s.is_writable())
    }

    fn perform_is_offset_executable(&self, ctx: &BackendContext<'_>, addr: u64) -> bool {
        ctx.map.segment_at(addr).is_some_and(|s| s.is_executable())
    }

    fn perform_is_offset_backed_by_file(&self, ctx: &BackendContext<'_>, addr: u64) -> bool {
        ctx.map
            .segment_at(addr)
            .and_then(|s| s.data_offset_for(addr))
            .is_some_and(|off| off < ctx.storage.len())
    }

    /// Smallest valid address `>= addr`, or the end of the space.
    fn perform_get_next_valid_offset(&self, ctx: &BackendContext<'_>, addr: u64) -> u64 {
        ctx.map
            .next_valid(addr)
            .unwrap_or_else(|| self.perform_get_start(ctx) + self.perform_get_length(ctx))
    }

    fn perform_get_start(&self, ctx: &BackendContext<'_>) -> u64 {
        ctx.map.start()
    }

    fn perform_get_length(&self, ctx: &BackendContext<'_>) -> u64 {
        ctx.map.end() - ctx.map.start()
    }

    fn perform_get_entry_point(&self) -> Option<u64> {
        None
    }

    fn perform_is_executable(&self) -> bool {
        true
    }

    fn perform_get_default_endianness(&self) -> Endianness {
        Endianness::Little
    }

    fn perform_is_relocatable(&self) -> bool {
        false
    }

    fn perform_get_address_size(&self) -> usize {
        8
    }

    /// Save the current storage contents.
    fn perform_save(&self, ctx: &BackendContext<'_>, path: &Path) -> Result<()> {
        ctx.storage.accessor().save_to(path)
    }
}

/// Segment-mapped backend; every behavior is the default
#[derive(Debug, Clone, Default)]
pub struct SegmentBackend {
    name: String,
}

impl SegmentBackend {
    pub fn new() -> Self {
        Self {
            name: "Mapped".to_string(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl AddressSpaceBackend for SegmentBackend {
    fn name(&self) -> &str {
        if self.name.is_empty() {
            "Mapped"
        } else {
            &self.name
        }
    }
}

/// Flat view of storage: address == storage offset
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBackend;

impl AddressSpaceBackend for RawBackend {
    fn name(&self) -> &str {
        "Raw"
    }

    fn perform_read(&self, ctx: &BackendContext<'_>, addr: u64, len: usize) -> Vec<u8> {
        ctx.storage.read(addr, len)
    }

    fn perform_write(&self, ctx: &mut BackendContextMut<'_>, addr: u64, data: &[u8]) -> usize {
        ctx.storage.write(addr, data)
    }

    fn perform_insert(&self, ctx: &mut BackendContextMut<'_>, addr: u64, data: &[u8]) -> usize {
        ctx.storage.insert(addr, data)
    }

    fn perform_remove(&self, ctx: &mut BackendContextMut<'_>, addr: u64, len: u64) -> u64 {
        ctx.storage.remove(addr, len)
    }

    fn perform_get_modification(&self, ctx: &BackendContext<'_>, addr: u64) -> Option<ModificationStatus> {
        (addr < ctx.storage.len()).then(|| ctx.storage.status_at(addr))
    }

    fn perform_is_valid_offset(&self, ctx: &BackendContext<'_>, addr: u64) -> bool {
        addr < ctx.storage.len()
    }

    fn perform_is_offset_readable(&self, ctx: &BackendContext<'_>, addr: u64) -> bool {
        addr < ctx.storage.len()
    }

    fn perform_is_offset_writable(&self, ctx: &BackendContext<'_>, addr: u64) -> bool {
        addr < ctx.storage.len()
    }

    fn perform_is_offset_executable(&self, _ctx: &BackendContext<'_>, _addr: u64) -> bool {
        false
    }

    fn perform_is_offset_backed_by_file(&self, ctx: &BackendContext<'_>, addr: u64) -> bool {
        addr < ctx.storage.len()
    }

    fn perform_get_next_valid_offset(&self, ctx: &BackendContext<'_>, addr: u64) -> u64 {
        addr.min(ctx.storage.len())
    }

    fn perform_get_start(&self, _ctx: &BackendContext<'_>) -> u64 {
        0
    }

    fn perform_get_length(&self, ctx: &BackendContext<'_>) -> u64 {
        ctx.storage.len()
    }

    fn perform_is_executable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Segment, SegmentFlags};
    use crate::storage::BufferAccessor;

    fn storage(n: usize) -> TrackedStorage {
        TrackedStorage::new(Box::new(BufferAccessor::new(
            (0..n).map(|i| i as u8).collect::<Vec<u8>>(),
        )))
    }

    #[test]
    fn test_read_spans_adjacent_segments_and_zero_fill() {
        let mut map = SegmentMap::new();
        map.add_segment(Segment::new(0x100, 4, 0, 4, SegmentFlags::READABLE, true).unwrap())
            .unwrap();
        map.add_segment(Segment::new(0x104, 4, 8, 2, SegmentFlags::READABLE, true).unwrap())
            .unwrap();
        let st = storage(16);
        let ctx = BackendContext {
            map: &map,
            storage: &st,
        };
        assert_eq!(segment_read(&ctx, 0x102, 10), vec![2, 3, 8, 9, 0, 0]);
        assert!(segment_read(&ctx, 0x108, 4).is_empty());
    }

    #[test]
    fn test_write_stops_at_read_only_segment() {
        let mut map = SegmentMap::new();
        map.add_segment(
            Segment::new(0, 4, 0, 4, SegmentFlags::rwx(true, true, false), true).unwrap(),
        )
        .unwrap();
        map.add_segment(Segment::new(4, 4, 4, 4, SegmentFlags::READABLE, true).unwrap())
            .unwrap();
        let mut st = storage(8);
        let mut ctx = BackendContextMut {
            map: &map,
            storage: &mut st,
        };
        assert_eq!(segment_write(&mut ctx, 2, &[0xaa; 4]), 2);
        assert_eq!(st.read(0, 8), vec![0, 1, 0xaa, 0xaa, 4, 5, 6, 7]);
    }

    #[test]
    fn test_raw_backend_flat_view() {
        let map = SegmentMap::new();
        let st = storage(8);
        let ctx = BackendContext {
            map: &map,
            storage: &st,
        };
        let raw = RawBackend;
        assert!(raw.perform_is_valid_offset(&ctx, 7));
        assert!(!raw.perform_is_valid_offset(&ctx, 8));
        assert_eq!(raw.perform_get_next_valid_offset(&ctx, 20), 8);
        assert_eq!(raw.perform_read(&ctx, 6, 4), vec![6, 7]);
        assert_eq!(SegmentBackend::new().name(), "Mapped");
    }
}
