//! Accessor wrapper that keeps the modification log in step with the bytes.
//!
//! Write policy: an original byte becomes `Changed` only when the written
//! value differs from what is stored. A byte that is already `Changed` or
//! `Inserted` keeps its status, even when written back to its first value.

use tracing::trace;

use super::{ModificationStatus, PatchLog, StorageAccessor};

pub struct TrackedStorage {
    inner: Box<dyn StorageAccessor>,
    log: PatchLog,
}

impl TrackedStorage {
    pub fn new(inner: Box<dyn StorageAccessor>) -> Self {
        Self {
            inner,
            log: PatchLog::new(),
        }
    }

    pub fn with_log(inner: Box<dyn StorageAccessor>, log: PatchLog) -> Self {
        Self { inner, log }
    }

    pub fn read(&self, offset: u64, len: usize) -> Vec<u8> {
        self.inner.read(offset, len)
    }

    /// Write through, then record the bytes whose value changed.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> usize {
        let before = self.inner.read(offset, data.len());
        let written = self.inner.write(offset, data);

        let mut run_start: Option<usize> = None;
        for i in 0..=written {
            let differs = i < written && before.get(i) != Some(&data[i]);
            match (differs, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(s)) => {
                    self.log.mark_changed(offset + s as u64, offset + i as u64);
                    run_start = None;
                }
                _ => {}
            }
        }

        trace!(kind = self.inner.kind(), offset, written, "storage write");
        written
    }

    pub fn insert(&mut self, offset: u64, data: &[u8]) -> usize {
        let inserted = self.inner.insert(offset, data);
        if inserted > 0 {
            self.log.insert_shift(offset, inserted as u64);
        }
        inserted
    }

    pub fn remove(&mut self, offset: u64, len: u64) -> u64 {
        let removed = self.inner.remove(offset, len);
        if removed > 0 {
            self.log.remove_shift(offset, removed);
        }
        removed
    }

    pub fn len(&self) -> u64 {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn status_at(&self, offset: u64) -> ModificationStatus {
        self.log.status_at(offset)
    }

    pub fn statuses(&self, offset: u64, len: usize) -> Vec<ModificationStatus> {
        self.log.statuses(offset, len)
    }

    pub fn log(&self) -> &PatchLog {
        &self.log
    }

    pub fn accessor(&self) -> &dyn StorageAccessor {
        self.inner.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BufferAccessor, FileAccessor};
    use ModificationStatus::*;

    fn tracked(data: &[u8]) -> TrackedStorage {
        TrackedStorage::new(Box::new(BufferAccessor::new(data.to_vec())))
    }

    #[test]
    fn test_identical_write_leaves_original() {
        let mut s = tracked(b"abcd");
        assert_eq!(s.write(0, b"abcd"), 4);
        assert!(!s.log().is_modified());
    }

    #[test]
    fn test_partial_difference_marks_only_changed_bytes() {
        let mut s = tracked(b"abcd");
        s.write(0, b"aXcY");
        assert_eq!(s.statuses(0, 4), vec![Original, Changed, Original, Changed]);
    }

    #[test]
    fn test_changed_stays_changed_after_revert() {
        let mut s = tracked(b"abcd");
        s.write(1, b"Z");
        s.write(1, b"b");
        assert_eq!(s.status_at(1), Changed);
        assert_eq!(s.read(0, 4), b"abcd");
    }

    #[test]
    fn test_inserted_stays_inserted_on_write() {
        let mut s = tracked(b"abcd");
        assert_eq!(s.insert(2, b"XY"), 2);
        s.write(2, b"QQ");
        assert_eq!(s.statuses(0, 6), vec![Original, Original, Inserted, Inserted, Original, Original]);
        assert_eq!(s.remove(2, 2), 2);
        assert!(!s.log().is_modified());
    }

    #[test]
    fn test_fixed_layout_insert_not_logged() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut tmp, b"data").unwrap();
        let mut s = TrackedStorage::new(Box::new(FileAccessor::open(tmp.path()).unwrap()));
        assert_eq!(s.insert(0, b"x"), 0);
        assert!(!s.log().is_modified());
    }
}
