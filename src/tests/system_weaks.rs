use super::heap;
use crate::util::test_util::mock_vm::*;
use crate::{AllocationSemantics, CollectionScope};

#[test]
fn system_weaks_are_updated_or_cleared() {
    let mut heap = heap();
    let live = alloc_object(&heap, AllocationSemantics::Default, 0, 0);
    let dead = alloc_object(&heap, AllocationSemantics::Default, 0, 0);
    let old = alloc_object(&heap, AllocationSemantics::NonMoving, 0, 0);
    let dead_old = alloc_object(&heap, AllocationSemantics::NonMoving, 0, 0);
    let live_root = add_root(live);
    add_root(old);
    let weak_live = add_weak(live);
    let weak_dead = add_weak(dead);
    let weak_old = add_weak(old);
    let weak_dead_old = add_weak(dead_old);

    heap.collect_garbage(CollectionScope::WholeHeap, false);

    assert_eq!(weak(weak_live), root(live_root));
    assert_ne!(weak(weak_live), Some(live));
    assert_eq!(weak(weak_dead), None);
    assert_eq!(weak(weak_old), Some(old));
    assert_eq!(weak(weak_dead_old), None);
}

#[test]
fn from_space_only_collection_keeps_old_system_weaks() {
    let mut heap = heap();
    let old = alloc_object(&heap, AllocationSemantics::NonMoving, 0, 0);
    let young = alloc_object(&heap, AllocationSemantics::Default, 0, 0);
    let weak_old = add_weak(old);
    let weak_young = add_weak(young);

    heap.collect_garbage(CollectionScope::FromSpaceOnly, false);

    assert_eq!(weak(weak_old), Some(old));
    assert_eq!(weak(weak_young), None);
}
