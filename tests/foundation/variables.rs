//! Integration tests for VarId and VarSet

use proptest::prelude::*;
use quarry_foundation::{ErrorKind, MAX_VARIABLES, VarId, VarSet};

fn var(i: usize) -> VarId {
    VarId::new(i).unwrap()
}

// =============================================================================
// Allocation
// =============================================================================

#[test]
fn this_is_slot_zero() {
    assert_eq!(VarId::THIS.index(), 0);
    assert_eq!(VarId::THIS, var(0));
}

#[test]
fn allocation_past_limit_fails() {
    assert!(VarId::new(MAX_VARIABLES - 1).is_ok());
    let err = VarId::new(MAX_VARIABLES).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TooManyVariables { limit } if limit == MAX_VARIABLES));
}

// =============================================================================
// Set Operations
// =============================================================================

#[test]
fn insert_and_remove() {
    let mut set = VarSet::EMPTY;
    set.insert(var(3));
    set.insert(var(63));
    assert!(set.contains(var(3)));
    assert!(set.contains(var(63)));
    assert_eq!(set.len(), 2);

    set.remove(var(3));
    assert!(!set.contains(var(3)));
    assert_eq!(set.len(), 1);
}

#[test]
fn set_algebra() {
    let a: VarSet = [var(1), var(2)].into_iter().collect();
    let b: VarSet = [var(2), var(3)].into_iter().collect();

    assert_eq!((a | b).len(), 3);
    assert_eq!(a & b, VarSet::single(var(2)));
    assert_eq!(a - b, VarSet::single(var(1)));
    assert!(a.intersects(b));
    assert!(!(a - b).intersects(b));
    assert!(!(!a).contains(var(1)));
}

#[test]
fn iteration_is_ascending() {
    let set: VarSet = [var(9), var(0), var(4)].into_iter().collect();
    let ids: Vec<usize> = set.iter().map(VarId::index).collect();
    assert_eq!(ids, vec![0, 4, 9]);
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn collect_then_iterate(indices in prop::collection::btree_set(0..MAX_VARIABLES, 0..20)) {
        let set: VarSet = indices.iter().map(|&i| var(i)).collect();
        let back: Vec<usize> = set.iter().map(VarId::index).collect();
        prop_assert_eq!(back, indices.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn difference_never_intersects(a in any::<u64>(), b in any::<u64>()) {
        let a = VarSet::from_bits(a);
        let b = VarSet::from_bits(b);
        prop_assert!(!(a - b).intersects(b));
        prop_assert_eq!((a - b) | (a & b), a);
    }
}
