use failure::Error;

use crate::spatialmatch::common::*;

/// Two phrasematches conflict if they cover any of the same query tokens
#[inline]
pub fn masks_conflict(a: u32, b: u32) -> bool {
    a & b != 0
}

/// Two results collide if their subqueries claim any of the same tokens
#[inline]
pub fn nmasks_collide(a: u32, b: u32) -> bool {
    a & b != 0
}

/// Whether a bmask forbids stacking with the given index
#[inline]
pub fn bmask_excludes(bmask: u64, idx: u16) -> bool {
    debug_assert!(idx < MAX_INDEXES);
    bmask & (1u64 << idx) != 0
}

/// Indexes participate in bmasks by bit position, so anything at or past
/// the mask width is rejected up front
pub fn check_idx(idx: u16) -> Result<(), Error> {
    if idx >= MAX_INDEXES {
        return Err(SpatialmatchError::IndexOutOfRange { idx }.into());
    }
    Ok(())
}

#[test]
fn masks_conflict_test() {
    assert!(masks_conflict(0b011, 0b110), "overlapping token coverage conflicts");
    assert!(!masks_conflict(0b001, 0b110), "disjoint token coverage does not");
    assert!(!masks_conflict(0, 0b1), "the empty mask conflicts with nothing");
}

#[test]
fn bmask_excludes_test() {
    assert!(bmask_excludes(0b10, 1), "bit set for idx 1 excludes idx 1");
    assert!(!bmask_excludes(0b10, 0), "bit clear for idx 0 allows idx 0");
    assert!(bmask_excludes(1u64 << 63, 63), "the top bit is addressable");
}

#[test]
fn check_idx_test() {
    assert!(check_idx(0).is_ok());
    assert!(check_idx(63).is_ok());
    assert!(check_idx(64).is_err(), "idx 64 does not fit the bmask width");
}
