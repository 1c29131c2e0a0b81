//! Byte entropy primitives used by `AddressSpace::get_entropy`.

/// Byte frequency histogram.
#[derive(Debug, Clone)]
pub struct Histogram {
    counts: [usize; 256],
    total: usize,
}

impl Histogram {
    #[inline]
    pub fn new() -> Self {
        Self {
            counts: [0; 256],
            total: 0,
        }
    }

    #[inline]
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hist = Self::new();
        for &byte in data {
            hist.add(byte);
        }
        hist
    }

    #[inline]
    pub fn add(&mut self, byte: u8) {
        self.counts[byte as usize] += 1;
        self.total += 1;
    }

    /// Shannon entropy in bits per byte, 0.0..=8.0.
    pub fn entropy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let total = self.total as f64;
        self.counts
            .iter()
            .filter(|&&c| c != 0)
            .map(|&c| {
                let p = c as f64 / total;
                -p * p.log2()
            })
            .sum()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.total
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Shannon entropy of `data` in bits per byte (0.0 for empty input).
#[inline]
pub fn shannon_entropy(data: &[u8]) -> f64 {
    Histogram::from_bytes(data).entropy()
}

/// Entropy scaled to 0.0..=1.0.
#[inline]
pub fn normalized_entropy(data: &[u8]) -> f32 {
    (shannon_entropy(data) / 8.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy_extremes() {
        assert!(shannon_entropy(&[0u8; 1024]) < 1e-9);
        assert_eq!(shannon_entropy(&[]), 0.0);
        let uniform: Vec<u8> = (0..=255).cycle().take(256 * 100).collect();
        assert!((shannon_entropy(&uniform) - 8.0).abs() < 0.01);
        assert!((normalized_entropy(&uniform) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_histogram_counts() {
        let mut hist = Histogram::new();
        assert!(hist.is_empty());
        hist.add(b'A');
        hist.add(b'B');
        assert_eq!(hist.len(), 2);
        assert!((hist.entropy() - 1.0).abs() < 1e-9);
        assert!(Histogram::from_bytes(b"AAAA").entropy() < 1e-9);
    }
}
