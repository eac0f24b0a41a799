use std::cell::RefCell;
use std::rc::Rc;

use spanpin::prelude::*;
use spanpin::span::AccessError;

fn fresh_store() -> SharedStore {
    Rc::new(RefCell::new(CellStore::new()))
}

fn in_use(store: &SharedStore) -> usize {
    store.borrow().memory_in_use()
}

#[test]
fn trivial_lifecycle_reclaims_everything() {
    let store = fresh_store();
    let mut a = Span::new(100, &store).unwrap();
    assert_eq!(in_use(&store), 100);
    a.release().unwrap();
    assert_eq!(in_use(&store), 0);
}

#[test]
fn a_slice_keeps_part_of_the_parent_alive() {
    let store = fresh_store();
    let mut a = Span::new(50, &store).unwrap();
    assert_eq!(a.coverage_depth_at(0), 1);
    assert_eq!(a.coverage_depth_at(49), 1);
    assert_eq!(a.coverage_depth_at(50), 0);

    let mut b = a.slice(Interval::new(10, 15)).unwrap();
    a.write(10, 5).unwrap();
    assert_eq!(in_use(&store), 50);

    a.release().unwrap();
    assert_eq!(b.read(0), Ok(5));
    assert_eq!(in_use(&store), 15);
    b.verify_tree().unwrap();

    b.release().unwrap();
    assert_eq!(in_use(&store), 0);
}

#[test]
fn overlapping_slices_shrink_coverage_stepwise() {
    let store = fresh_store();
    let mut a = Span::new(10, &store).unwrap();
    let mut b = a.slice(Interval::new(2, 6)).unwrap();
    let mut c = a.slice(Interval::new(5, 4)).unwrap();

    a.release().unwrap();
    // surviving coverage is [2, 9)
    assert_eq!(in_use(&store), 7);
    b.release().unwrap();
    // surviving coverage is [5, 9)
    assert_eq!(in_use(&store), 4);
    c.release().unwrap();
    assert_eq!(in_use(&store), 0);
}

#[test]
fn disjoint_slices_open_a_hole_in_the_middle() {
    let store = fresh_store();
    let mut a = Span::new(10, &store).unwrap();
    let mut b = a.slice(Interval::new(0, 3)).unwrap();
    let mut c = a.slice(Interval::new(7, 3)).unwrap();

    a.release().unwrap();
    // cells [3, 7) went back to the store
    assert_eq!(in_use(&store), 6);
    b.verify_tree().unwrap();
    c.verify_tree().unwrap();
    assert_eq!(b.tree_total(), 0);
    assert_eq!(c.tree_total(), 0);

    b.release().unwrap();
    assert_eq!(in_use(&store), 3);
    c.release().unwrap();
    assert_eq!(in_use(&store), 0);
}

#[test]
fn released_spans_reject_access_and_tolerate_re_release() {
    let store = fresh_store();
    let mut a = Span::new(10, &store).unwrap();
    a.write(3, 7).unwrap();
    a.release().unwrap();

    assert_eq!(a.read(3), Err(AccessError::UseAfterRelease));
    assert_eq!(a.write(3, 7), Err(AccessError::UseAfterRelease));
    assert!(matches!(
        a.slice(Interval::new(0, 1)),
        Err(SliceError::UseAfterRelease)
    ));
    // second release is a silent no-op
    a.release().unwrap();
    assert_eq!(in_use(&store), 0);
}

#[test]
fn sibling_families_do_not_interfere() {
    let store = fresh_store();
    let mut a = Span::new(20, &store).unwrap();
    let mut b = Span::new(30, &store).unwrap();
    assert_eq!(in_use(&store), 50);
    a.release().unwrap();
    assert_eq!(in_use(&store), 30);
    // the freed cells are available to a new family
    let mut c = Span::new(10, &store).unwrap();
    assert_eq!(c.interval().offset, 0);
    assert_eq!(in_use(&store), 40);
    b.release().unwrap();
    c.release().unwrap();
    assert_eq!(in_use(&store), 0);
}

#[test]
fn nested_slices_release_in_any_order() {
    let store = fresh_store();
    let mut a = Span::new(100, &store).unwrap();
    let mut b = a.slice(Interval::new(10, 80)).unwrap();
    let mut c = b.slice(Interval::new(10, 60)).unwrap();
    let mut d = c.slice(Interval::new(10, 40)).unwrap();
    assert_eq!(d.interval(), Interval::new(30, 40));
    assert_eq!(a.coverage_depth_at(50), 4);

    b.release().unwrap();
    assert_eq!(in_use(&store), 100);
    a.release().unwrap();
    // [0,20) and [80,100) are gone, c still holds [20,80)
    assert_eq!(in_use(&store), 60);
    c.release().unwrap();
    assert_eq!(in_use(&store), 40);
    d.release().unwrap();
    assert_eq!(in_use(&store), 0);
}
