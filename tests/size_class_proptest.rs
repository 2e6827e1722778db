use halo_gc::alloc::size_classes;
use halo_gc::constants::{MAX_SMALL_SIZE, NUM_SIZE_CLASSES, PAGE_SHIFT, PAGE_SIZE};
use proptest::prelude::*;

#[test]
fn classes_are_strictly_increasing() {
    let table = size_classes();
    let sizes: Vec<usize> = table.iter().map(|(_, c)| c.size).collect();
    assert_eq!(sizes.len(), NUM_SIZE_CLASSES - 1);
    assert!(sizes.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn span_tail_waste_is_bounded() {
    for (_, class) in size_classes().iter() {
        let bytes = class.npages << PAGE_SHIFT;
        assert!(bytes % class.size <= bytes / 8, "size {} wastes too much", class.size);
        assert!(class.objects_per_span() >= 1);
    }
}

#[test]
fn classes_keep_their_alignment() {
    for (_, class) in size_classes().iter() {
        match class.size {
            0..=15 => assert_eq!(class.size % 8, 0),
            16..=2047 => assert_eq!(class.size % 16, 0),
            _ => assert_eq!(class.size % 256, 0, "size {}", class.size),
        }
    }
}

proptest! {
    #[test]
    fn class_of_is_smallest_fitting_class(size in 0usize..=MAX_SMALL_SIZE) {
        let table = size_classes();
        let class = table.class_of(size);
        prop_assert!(class >= 1 && class < NUM_SIZE_CLASSES);
        prop_assert!(table.class_size(class) >= size);
        if class > 1 {
            prop_assert!(table.class_size(class - 1) < size);
        }
    }

    #[test]
    fn magic_division_matches_hardware(class in 1usize..NUM_SIZE_CLASSES, offset in 0usize..(1 << 20)) {
        let entry = size_classes().class(class);
        let offset = offset % (entry.npages * PAGE_SIZE);
        prop_assert_eq!(entry.magic.divide(offset), offset / entry.size);
    }

    #[test]
    fn roundup_never_shrinks(size in 0usize..(4 << 20)) {
        let rounded = size_classes().roundup_size(size);
        prop_assert!(rounded >= size);
        if size > MAX_SMALL_SIZE {
            prop_assert_eq!(rounded % PAGE_SIZE, 0);
            prop_assert!(rounded - size < PAGE_SIZE);
        }
    }
}
