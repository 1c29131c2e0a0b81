//! In-memory storage.

use super::StorageAccessor;

/// Growable in-memory buffer; the only built-in accessor that can insert and remove.
#[derive(Debug, Clone, Default)]
pub struct BufferAccessor {
    data: Vec<u8>,
}

impl BufferAccessor {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl StorageAccessor for BufferAccessor {
    fn read(&self, offset: u64, len: usize) -> Vec<u8> {
        let size = self.data.len() as u64;
        if offset >= size {
            return Vec::new();
        }
        let start = offset as usize;
        let end = start.saturating_add(len).min(self.data.len());
        self.data[start..end].to_vec()
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> usize {
        let size = self.data.len() as u64;
        if offset >= size {
            return 0;
        }
        let start = offset as usize;
        let n = data.len().min(self.data.len() - start);
        self.data[start..start + n].copy_from_slice(&data[..n]);
        n
    }

    fn insert(&mut self, offset: u64, data: &[u8]) -> usize {
        if offset > self.data.len() as u64 {
            return 0;
        }
        let at = offset as usize;
        self.data.splice(at..at, data.iter().copied());
        data.len()
    }

    fn remove(&mut self, offset: u64, len: u64) -> u64 {
        let size = self.data.len() as u64;
        if offset >= size {
            return 0;
        }
        let end = offset.saturating_add(len).min(size);
        self.data.drain(offset as usize..end as usize);
        end - offset
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn kind(&self) -> &'static str {
        "buffer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_past_end_is_short() {
        let buf = BufferAccessor::new(vec![1, 2, 3, 4]);
        assert_eq!(buf.read(2, 10), vec![3, 4]);
        assert!(buf.read(4, 1).is_empty());
        assert!(buf.read(100, 1).is_empty());
    }

    #[test]
    fn test_write_truncates_at_end() {
        let mut buf = BufferAccessor::new(vec![0; 4]);
        assert_eq!(buf.write(2, &[9, 9, 9]), 2);
        assert_eq!(buf.as_slice(), &[0, 0, 9, 9]);
        assert_eq!(buf.write(4, &[1]), 0);
    }

    #[test]
    fn test_insert_and_remove() {
        let mut buf = BufferAccessor::new(b"abcdef".to_vec());
        assert_eq!(buf.insert(3, b"XY"), 2);
        assert_eq!(buf.as_slice(), b"abcXYdef");
        assert_eq!(buf.insert(8, b"!"), 1);
        assert_eq!(buf.insert(100, b"?"), 0);
        assert_eq!(buf.remove(0, 3), 3);
        assert_eq!(buf.as_slice(), b"XYdef!");
        assert_eq!(buf.remove(4, 100), 2);
        assert_eq!(buf.as_slice(), b"XYde");
    }
}
