use super::heap;
use crate::policy::space::{ContinuousSpace, Space};
use crate::util::statistics::ObjectBytePair;
use crate::util::test_util::mock_vm::*;
use crate::{AllocationSemantics, CollectionScope};

#[test]
fn live_objects_are_copied_once() {
    let mut heap = heap();
    let a = alloc_object(&heap, AllocationSemantics::Default, 2, 1);
    let b = alloc_object(&heap, AllocationSemantics::Default, 0, 2);
    let _garbage = alloc_object(&heap, AllocationSemantics::Default, 0, 4);
    set_field(&heap, a, 0, Some(b));
    set_field(&heap, a, 1, Some(b));
    set_payload_word(a, 0, 0xdead);
    set_payload_word(b, 1, 42);
    let ra = add_root(a);
    let rb = add_root(b);
    let from_space_name = heap.from_space().name().to_string();

    let stats = heap.collect_garbage(CollectionScope::WholeHeap, false);

    // The semi-spaces have traded places.
    assert_ne!(heap.from_space().name(), from_space_name);
    let a2 = root(ra).unwrap();
    let b2 = root(rb).unwrap();
    assert_ne!(a2, a);
    assert_ne!(b2, b);
    assert!(heap.from_space().contains(a2));
    assert!(heap.from_space().contains(b2));
    assert_eq!(get_field(a2, 0), Some(b2));
    assert_eq!(get_field(a2, 1), Some(b2));
    assert_eq!(payload_word(a2, 0), 0xdead);
    assert_eq!(payload_word(b2, 1), 42);

    assert_eq!(
        stats.moved,
        ObjectBytePair::new(2, object_size(2, 1) + object_size(0, 2))
    );
    assert_eq!(stats.freed, ObjectBytePair::new(1, object_size(0, 4)));
    assert_eq!(heap.from_space().objects_allocated(), 2);
    assert_eq!(heap.to_space().objects_allocated(), 0);
    assert!(heap.is_live_object(a2));
}

#[test]
fn objects_survive_repeated_collections() {
    let mut heap = heap();
    // A short list: head -> n1 -> n2.
    let n2 = alloc_object(&heap, AllocationSemantics::Default, 1, 1);
    let n1 = alloc_object(&heap, AllocationSemantics::Default, 1, 1);
    let head = alloc_object(&heap, AllocationSemantics::Default, 1, 1);
    set_field(&heap, head, 0, Some(n1));
    set_field(&heap, n1, 0, Some(n2));
    for (i, object) in [head, n1, n2].into_iter().enumerate() {
        set_payload_word(object, 0, i + 100);
    }
    let r = add_root(head);

    for _ in 0..4 {
        heap.collect_garbage(CollectionScope::WholeHeap, false);
        let mut object = root(r);
        let mut payloads = vec![];
        while let Some(current) = object {
            assert!(heap.from_space().contains(current));
            payloads.push(payload_word(current, 0));
            object = get_field(current, 0);
        }
        assert_eq!(payloads, vec![100, 101, 102]);
    }
    assert_eq!(heap.cumulative_stats().unwrap().collections, 4);
    assert_eq!(heap.cumulative_stats().unwrap().moved.objects, 12);
}

#[test]
fn wide_objects_grow_the_mark_stack() {
    let mut heap = heap();
    assert!(heap.options().mark_stack_initial_capacity < 64);
    let array = alloc_object(&heap, AllocationSemantics::Default, 64, 0);
    for i in 0..64 {
        let element = alloc_object(&heap, AllocationSemantics::Default, 0, 1);
        set_payload_word(element, 0, i);
        set_field(&heap, array, i, Some(element));
    }
    let r = add_root(array);

    let stats = heap.collect_garbage(CollectionScope::WholeHeap, false);

    assert_eq!(stats.moved.objects, 65);
    let array = root(r).unwrap();
    for i in 0..64 {
        assert_eq!(payload_word(get_field(array, i).unwrap(), 0), i);
    }
}

#[test]
fn unreachable_objects_are_dropped() {
    let mut heap = heap();
    for _ in 0..10 {
        alloc_object(&heap, AllocationSemantics::Default, 1, 3);
    }
    let stats = heap.collect_garbage(CollectionScope::FromSpaceOnly, false);
    assert_eq!(stats.moved.objects, 0);
    assert_eq!(stats.freed.objects, 10);
    assert_eq!(heap.from_space().size(), 0);
}
