//! Universal invariants and boundary behaviors that must hold across any
//! sequence of `alloc`/`free`/`validate` starting from a fresh `init`.

use memarena::{Arena, ArenaError};

#[test]
fn freeing_a_null_pointer_is_a_no_op() {
    let mut arena = Arena::init(4096, 8, "inv").unwrap();
    assert!(arena.free(std::ptr::null_mut()).is_ok());
    assert_eq!(arena.stats().deallocation_count, 0);
}

#[test]
fn alloc_zero_is_a_bad_argument() {
    let mut arena = Arena::init(4096, 8, "inv").unwrap();
    assert!(matches!(arena.alloc(0), Err(ArenaError::BadArgument(_))));
}

#[test]
fn alloc_larger_than_region_is_out_of_memory() {
    let mut arena = Arena::init(4096, 8, "inv").unwrap();
    let err = arena.alloc(4096 + 1).unwrap_err();
    assert!(matches!(err, ArenaError::OutOfMemory { .. }));
}

#[test]
fn init_rejects_non_power_of_two_alignment() {
    assert!(matches!(
        Arena::init(4096, 12, "inv"),
        Err(ArenaError::BadArgument(_))
    ));
}

#[test]
fn init_rejects_alignment_below_eight() {
    assert!(matches!(
        Arena::init(4096, 4, "inv"),
        Err(ArenaError::BadArgument(_))
    ));
}

#[test]
fn remaining_region_can_be_allocated_exactly_once() {
    let mut arena = Arena::init(4096, 8, "inv").unwrap();
    let largest = arena.stats().largest_free_block;
    arena.alloc(largest as usize).unwrap();
    assert!(matches!(arena.alloc(1), Err(ArenaError::OutOfMemory { .. })));
}

#[test]
fn peak_used_never_decreases_below_current_usage_history() {
    let mut arena = Arena::init(64 * 1024, 8, "inv").unwrap();
    let a = arena.alloc(1000).unwrap();
    let peak_after_a = arena.stats().peak_used_bytes;
    arena.free(a.as_ptr()).unwrap();
    assert_eq!(arena.stats().peak_used_bytes, peak_after_a);

    let b = arena.alloc(200).unwrap();
    assert!(arena.stats().peak_used_bytes >= peak_after_a);
    arena.free(b.as_ptr()).unwrap();
}

#[test]
fn every_payload_address_is_aligned() {
    for alignment in [8usize, 16, 32, 64] {
        let mut arena = Arena::init(64 * 1024, alignment, "inv").unwrap();
        for n in [1usize, 3, 17, 100, 999] {
            let ptr = arena.alloc(n).unwrap();
            assert_eq!(ptr.as_ptr() as usize % alignment, 0);
        }
    }
}

#[test]
fn round_trip_restores_used_bytes_exactly() {
    let mut arena = Arena::init(64 * 1024, 8, "inv").unwrap();
    let before = arena.stats().used_bytes;
    let p = arena.alloc(777).unwrap();
    arena.free(p.as_ptr()).unwrap();
    assert_eq!(arena.stats().used_bytes, before);
    assert!(arena.validate().is_ok());
}

#[test]
fn full_alloc_free_cycle_fully_coalesces_back_to_one_block() {
    let mut arena = Arena::init(64 * 1024, 8, "inv").unwrap();
    let pointers: Vec<_> = (0..64).map(|_| arena.alloc(64).unwrap()).collect();
    for p in pointers {
        arena.free(p.as_ptr()).unwrap();
    }
    assert_eq!(arena.stats().block_count, 1);
    assert!(arena.validate().is_ok());
}

#[test]
fn validate_passes_immediately_after_init() {
    let arena = Arena::init(64 * 1024, 8, "inv").unwrap();
    assert!(arena.validate().is_ok());
}
