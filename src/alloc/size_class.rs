//! Size classes.
//!
//! Small requests (up to 32KB) are rounded up to one of 66 object sizes;
//! class 0 stands for "large object, own span". The table is built once per
//! process by [`size_classes`]:
//!
//! - Object sizes step by an alignment that grows with the size: 8 bytes,
//!   then 16 from 16 bytes, then size/8 from 128 bytes, then 256 from 2KB.
//!   The alignment is recomputed at every power of two.
//! - A class's span is grown one page at a time until the unusable tail is
//!   at most 1/8 of the span.
//! - Neighbouring sizes that end up with the same pages-per-span and the
//!   same objects-per-span collapse into the larger size, since they would
//!   carve identical spans anyway.
//!
//! Lookup goes through two byte tables: one with 8-byte granularity up to
//! 1016 bytes, one with 128-byte granularity above that.

use std::sync::OnceLock;

use crate::constants::{align_up, MAX_SMALL_SIZE, NUM_SIZE_CLASSES, PAGE_SHIFT, PAGE_SIZE};
use crate::error::fatal;

const SMALL_LIMIT: usize = 1024 - 8;
const CLASS8_LEN: usize = 1024 / 8 + 1;
const CLASS128_LEN: usize = (MAX_SMALL_SIZE - 1024) / 128 + 1;

/// Constants turning a division by an object size into shifts and a multiply.
///
/// For every byte offset `n` inside a span of the class,
/// `((n >> shift) * mul) >> shift2 == n / size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DivMagic {
    /// Power-of-two factor of the size.
    pub shift: u8,
    /// Ceiling of `2^shift2` divided by the odd factor.
    pub mul: u32,
    /// Final shift.
    pub shift2: u8,
    /// `!(size - 1)` when the size is a power of two, else 0.
    pub base_mask: usize,
}

impl DivMagic {
    /// Computes the constants for dividing by `d`.
    ///
    /// Only valid for the even sizes used by size classes: the first shift
    /// divides by at least two before the multiply, which rules out the
    /// corner cases that would need a correction step.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(d: u32) -> Self {
        let base_mask = if d.is_power_of_two() { !(d as usize - 1) } else { 0 };
        let shift = d.trailing_zeros();
        let odd = u64::from(d >> shift);

        let mut k: u32 = 63;
        while ((1u64 << k) + odd - 1) / odd >= 1 << 32 {
            k -= 1;
        }
        let mul = ((1u64 << k) + odd - 1) / odd;

        Self { shift: shift as u8, mul: mul as u32, shift2: k as u8, base_mask }
    }

    /// Computes `n / size`.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub fn divide(&self, n: usize) -> usize {
        (((n as u64) >> self.shift) * u64::from(self.mul) >> self.shift2) as usize
    }
}

/// One size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizeClass {
    /// Object size in bytes.
    pub size: usize,
    /// Pages carved per span.
    pub npages: usize,
    /// Division constants for `size`.
    pub magic: DivMagic,
}

impl SizeClass {
    /// Number of objects in one span of this class.
    #[inline]
    pub fn objects_per_span(&self) -> usize {
        (self.npages << PAGE_SHIFT) / self.size
    }
}

/// The immutable size-class table.
pub struct SizeClassTable {
    classes: [SizeClass; NUM_SIZE_CLASSES],
    class8: [u8; CLASS8_LEN],
    class128: [u8; CLASS128_LEN],
}

/// The process-wide size-class table, built on first use.
pub fn size_classes() -> &'static SizeClassTable {
    static TABLE: OnceLock<SizeClassTable> = OnceLock::new();
    TABLE.get_or_init(SizeClassTable::compute)
}

impl SizeClassTable {
    fn compute() -> Self {
        let mut classes = [SizeClass::default(); NUM_SIZE_CLASSES];
        let mut n = 1;
        let mut align = 8;
        let mut size = align;

        while size <= MAX_SMALL_SIZE {
            if size.is_power_of_two() {
                if size >= 2048 {
                    align = 256;
                } else if size >= 128 {
                    align = size / 8;
                } else if size >= 16 {
                    align = 16;
                }
            }
            if align & (align - 1) != 0 {
                fatal("InitSizes - bad alignment");
            }

            let mut allocsize = PAGE_SIZE;
            while allocsize % size > allocsize / 8 {
                allocsize += PAGE_SIZE;
            }
            let npages = allocsize >> PAGE_SHIFT;

            if n > 1
                && npages == classes[n - 1].npages
                && allocsize / size == allocsize / classes[n - 1].size
            {
                classes[n - 1].size = size;
            } else {
                if n == NUM_SIZE_CLASSES {
                    fatal("InitSizes - too many size classes");
                }
                classes[n] = SizeClass { size, npages, magic: DivMagic::default() };
                n += 1;
            }
            size += align;
        }
        if n != NUM_SIZE_CLASSES {
            fatal("InitSizes - bad NumSizeClasses");
        }

        let mut class8 = [0u8; CLASS8_LEN];
        let mut class128 = [0u8; CLASS128_LEN];
        let mut next = 0;
        for (class, entry) in classes.iter_mut().enumerate().skip(1) {
            #[allow(clippy::cast_possible_truncation)]
            let class = class as u8;
            while next <= entry.size {
                if next < 1024 {
                    class8[(next + 7) >> 3] = class;
                } else {
                    class128[(next - 1024 + 127) >> 7] = class;
                }
                next += 8;
            }
            #[allow(clippy::cast_possible_truncation)]
            let size = entry.size as u32;
            entry.magic = DivMagic::new(size);
        }

        let table = Self { classes, class8, class128 };
        for size in 0..MAX_SMALL_SIZE {
            let class = table.class_of(size);
            if class == 0 || class >= NUM_SIZE_CLASSES || table.class_size(class) < size {
                fatal("InitSizes - bad class lookup");
            }
        }
        table
    }

    /// Size class for a small request. `size` must be at most [`MAX_SMALL_SIZE`].
    #[inline]
    pub fn class_of(&self, size: usize) -> usize {
        if size <= SMALL_LIMIT {
            usize::from(self.class8[(size + 7) >> 3])
        } else {
            usize::from(self.class128[(size + 127 - 1024) >> 7])
        }
    }

    /// The class entry.
    #[inline]
    pub fn class(&self, class: usize) -> &SizeClass {
        &self.classes[class]
    }

    /// Object size of a class.
    #[inline]
    pub fn class_size(&self, class: usize) -> usize {
        self.classes[class].size
    }

    /// Pages per span of a class.
    #[inline]
    pub fn class_pages(&self, class: usize) -> usize {
        self.classes[class].npages
    }

    /// Iterates over classes 1..67.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &SizeClass)> {
        self.classes.iter().enumerate().skip(1)
    }

    /// The size a request of `size` bytes actually occupies.
    pub fn roundup_size(&self, size: usize) -> usize {
        if size < MAX_SMALL_SIZE {
            return self.class_size(self.class_of(size));
        }
        size.checked_add(PAGE_SIZE).map_or(size, |_| align_up(size, PAGE_SIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_shape() {
        let table = size_classes();
        assert_eq!(table.class_size(1), 8);
        assert_eq!(table.class_size(2), 16);
        assert_eq!(table.class_size(3), 32);
        assert_eq!(table.class_size(NUM_SIZE_CLASSES - 1), MAX_SMALL_SIZE);
        assert_eq!(table.class_of(24), 3);
        assert_eq!(table.class_of(1024), table.class_of(1017));
    }

    #[test]
    fn lookup_across_the_table_seam() {
        let table = size_classes();
        let class = table.class_of(1024);
        for size in 1017..=1024 {
            assert_eq!(table.class_of(size), class, "size {size}");
            assert!(table.class_size(class) >= size);
        }
        assert!(table.class_of(1025) > class || table.class_size(class) >= 1025);
    }

    #[test]
    fn magic_divides_every_offset() {
        for (_, class) in size_classes().iter() {
            let span_bytes = class.npages << PAGE_SHIFT;
            for n in (0..span_bytes).step_by(7) {
                assert_eq!(class.magic.divide(n), n / class.size, "size {}", class.size);
            }
        }
    }

    #[test]
    fn power_of_two_base_mask() {
        let magic = DivMagic::new(4096);
        assert_eq!(magic.base_mask, !4095);
        assert_eq!(DivMagic::new(48).base_mask, 0);
    }

    #[test]
    fn roundup_large_sizes() {
        let table = size_classes();
        assert_eq!(table.roundup_size(MAX_SMALL_SIZE + 1), MAX_SMALL_SIZE + PAGE_SIZE);
        assert_eq!(table.roundup_size(100), 112);
    }
}
