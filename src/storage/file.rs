//! File-backed storage using a private copy-on-write mapping.
//!
//! Writes land in the process-private mapping only; the file on disk is
//! untouched until the address space is explicitly saved.

use memmap2::{MmapMut, MmapOptions};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::StorageAccessor;
use crate::error::Result;

pub struct FileAccessor {
    path: PathBuf,
    // None for zero-length files; memmap cannot map them.
    map: Option<MmapMut>,
}

impl FileAccessor {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        debug!(path = %path.display(), size, "Mapping file copy-on-write");

        let map = if size == 0 {
            None
        } else {
            // Safety: private mapping; concurrent external truncation of the file is not supported.
            Some(unsafe { MmapOptions::new().map_copy(&file)? })
        };

        Ok(Self {
            path: path.to_path_buf(),
            map,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageAccessor for FileAccessor {
    fn read(&self, offset: u64, len: usize) -> Vec<u8> {
        let Some(map) = &self.map else {
            return Vec::new();
        };
        if offset >= map.len() as u64 {
            return Vec::new();
        }
        let start = offset as usize;
        let end = start.saturating_add(len).min(map.len());
        map[start..end].to_vec()
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> usize {
        let Some(map) = &mut self.map else {
            return 0;
        };
        if offset >= map.len() as u64 {
            return 0;
        }
        let start = offset as usize;
        let n = data.len().min(map.len() - start);
        map[start..start + n].copy_from_slice(&data[..n]);
        n
    }

    fn len(&self) -> u64 {
        self.map.as_ref().map(|m| m.len() as u64).unwrap_or(0)
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_private_writes_do_not_touch_disk() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello world").unwrap();
        tmp.flush().unwrap();

        let mut acc = FileAccessor::open(tmp.path()).unwrap();
        assert_eq!(acc.len(), 11);
        assert_eq!(acc.write(0, b"J"), 1);
        assert_eq!(acc.read(0, 5), b"Jello");
        assert_eq!(acc.insert(0, b"x"), 0);
        assert_eq!(acc.remove(0, 1), 0);

        let on_disk = std::fs::read(tmp.path()).unwrap();
        assert_eq!(&on_disk, b"hello world");
    }

    #[test]
    fn test_empty_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut acc = FileAccessor::open(tmp.path()).unwrap();
        assert!(acc.is_empty());
        assert!(acc.read(0, 4).is_empty());
        assert_eq!(acc.write(0, b"a"), 0);
    }
}
