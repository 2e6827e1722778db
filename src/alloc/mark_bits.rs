//! The mark bitmap: one bit per 8-byte word of the arena.
//!
//! An object is marked by setting the bit of its first word. Sweeping reads
//! and clears the bits of every object in the span it sweeps, and freed
//! spans have their range cleared, so free pages never carry marks.

use core::sync::atomic::{AtomicU64, Ordering};

const WORD_SHIFT: usize = 3;

pub(crate) struct MarkBits {
    base: usize,
    words: Box<[AtomicU64]>,
}

impl MarkBits {
    pub(crate) fn new(base: usize, bytes: usize) -> Self {
        let bits = bytes >> WORD_SHIFT;
        let words = (0..bits.div_ceil(64)).map(|_| AtomicU64::new(0)).collect();
        Self { base, words }
    }

    #[inline]
    fn locate(&self, addr: usize) -> (&AtomicU64, u64) {
        let bit = (addr - self.base) >> WORD_SHIFT;
        (&self.words[bit / 64], 1 << (bit % 64))
    }

    /// Sets the bit for `addr`; `true` if it was clear.
    #[inline]
    pub(crate) fn set(&self, addr: usize) -> bool {
        let (word, mask) = self.locate(addr);
        word.fetch_or(mask, Ordering::AcqRel) & mask == 0
    }

    #[inline]
    pub(crate) fn is_set(&self, addr: usize) -> bool {
        let (word, mask) = self.locate(addr);
        word.load(Ordering::Acquire) & mask != 0
    }

    /// Clears the bit for `addr`; `true` if it was set.
    #[inline]
    pub(crate) fn clear(&self, addr: usize) -> bool {
        let (word, mask) = self.locate(addr);
        if word.load(Ordering::Relaxed) & mask == 0 {
            return false;
        }
        word.fetch_and(!mask, Ordering::AcqRel) & mask != 0
    }

    /// Clears every bit in `[start, start + bytes)`.
    pub(crate) fn clear_range(&self, start: usize, bytes: usize) {
        let first = (start - self.base) >> WORD_SHIFT;
        let last = first + (bytes >> WORD_SHIFT);
        let mut bit = first;
        while bit < last {
            let word = &self.words[bit / 64];
            let offset = bit % 64;
            let span = (64 - offset).min(last - bit);
            let mask = if span == 64 { u64::MAX } else { ((1u64 << span) - 1) << offset };
            if word.load(Ordering::Relaxed) & mask != 0 {
                word.fetch_and(!mask, Ordering::AcqRel);
            }
            bit += span;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reports_first_marker() {
        let bits = MarkBits::new(0x1000, 4096);
        assert!(bits.set(0x1010));
        assert!(!bits.set(0x1010));
        assert!(bits.is_set(0x1010));
        assert!(!bits.is_set(0x1018));
        assert!(bits.clear(0x1010));
        assert!(!bits.clear(0x1010));
    }

    #[test]
    fn clear_range_spans_words() {
        let bits = MarkBits::new(0, 8192);
        for addr in (0..8192).step_by(8) {
            bits.set(addr);
        }
        bits.clear_range(8 * 60, 8 * 200);
        assert!(bits.is_set(8 * 59));
        assert!(!bits.is_set(8 * 60));
        assert!(!bits.is_set(8 * 259));
        assert!(bits.is_set(8 * 260));
    }
}
