use super::heap;
use crate::policy::space::{ContinuousSpace, Space};
use crate::util::test_util::mock_vm::*;
use crate::{AllocationSemantics, CollectionScope};

#[test]
fn zygote_objects_survive_and_keep_their_referents() {
    let mut heap = heap();
    let old = alloc_object(&heap, AllocationSemantics::NonMoving, 1, 1);
    set_payload_word(old, 0, 7);
    let r = add_root(old);

    heap.pre_zygote_fork().unwrap();

    let zygote = heap.zygote_space().unwrap();
    assert!(zygote.contains(old));
    assert_eq!(zygote.objects_allocated(), 1);
    assert!(!heap.non_moving_space().contains(old));
    assert_eq!(zygote.limit(), heap.non_moving_space().begin());
    assert_eq!(heap.mod_union_tables().len(), 2);

    let young = alloc_object(&heap, AllocationSemantics::Default, 0, 1);
    set_payload_word(young, 0, 9);
    set_field(&heap, old, 0, Some(young));
    // Zygote objects are live without being reachable.
    clear_root(r);

    for scope in [CollectionScope::WholeHeap, CollectionScope::FromSpaceOnly] {
        let stats = heap.collect_garbage(scope, false);
        assert_eq!(stats.moved.objects, 1);
        assert!(heap.is_live_object(old));
        assert_eq!(payload_word(old, 0), 7);
        let young = get_field(old, 0).unwrap();
        assert!(heap.from_space().contains(young));
        assert_eq!(payload_word(young, 0), 9);
    }
}

#[test]
fn allocation_continues_after_the_zygote() {
    let mut heap = heap();
    alloc_object(&heap, AllocationSemantics::NonMoving, 0, 0);
    heap.pre_zygote_fork().unwrap();
    let zygote_end = heap.zygote_space().unwrap().end();
    // A second fork has nothing to do.
    heap.pre_zygote_fork().unwrap();
    assert_eq!(heap.zygote_space().unwrap().end(), zygote_end);

    let fresh = alloc_object(&heap, AllocationSemantics::NonMoving, 0, 0);
    let dead = alloc_object(&heap, AllocationSemantics::NonMoving, 0, 0);
    assert!(heap.non_moving_space().contains(fresh));
    add_root(fresh);

    let stats = heap.collect_garbage(CollectionScope::WholeHeap, false);

    assert_eq!(stats.freed.objects, 1);
    assert!(heap.is_live_object(fresh));
    assert!(!heap.is_live_object(dead));
    assert!(heap.non_moving_remembered_set().is_some());
}

#[test]
fn zygote_without_image() {
    let mut options = small_heap_options();
    options.image_space_size = 0;
    let mut heap = crate::heap::Heap::<MockVM>::new(options).unwrap();
    let old = alloc_object(&heap, AllocationSemantics::NonMoving, 1, 0);
    heap.pre_zygote_fork().unwrap();
    let young = alloc_object(&heap, AllocationSemantics::Default, 0, 0);
    set_field(&heap, old, 0, Some(young));

    let stats = heap.collect_garbage(CollectionScope::WholeHeap, false);

    assert_eq!(stats.moved.objects, 1);
    assert!(heap.from_space().contains(get_field(old, 0).unwrap()));
    assert_eq!(heap.mod_union_tables().len(), 1);
}
