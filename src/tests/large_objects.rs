use super::heap;
use crate::policy::space::Space;
use crate::util::test_util::mock_vm::*;
use crate::{AllocationSemantics, CollectionScope};

fn large_payload(heap: &crate::heap::Heap<MockVM>) -> usize {
    heap.options().large_object_threshold / 8
}

#[test]
fn large_objects_are_swept_by_whole_heap_collections() {
    let mut heap = heap();
    let payload = large_payload(&heap);
    let big = alloc_object(&heap, AllocationSemantics::Default, 1, payload);
    let dead = alloc_object(&heap, AllocationSemantics::Los, 0, 0);
    assert!(heap.large_object_space().contains(big));
    assert!(heap.large_object_space().contains(dead));
    let young = alloc_object(&heap, AllocationSemantics::Default, 0, 1);
    set_field(&heap, big, 0, Some(young));
    set_payload_word(big, payload - 1, 99);
    let r = add_root(big);

    let stats = heap.collect_garbage(CollectionScope::WholeHeap, false);

    // Large objects do not move.
    assert_eq!(root(r), Some(big));
    assert_eq!(payload_word(big, payload - 1), 99);
    assert!(heap.is_live_object(big));
    assert!(!heap.is_live_object(dead));
    assert_eq!(stats.freed_large.objects, 1);
    assert!(heap.from_space().contains(get_field(big, 0).unwrap()));
}

#[test]
fn from_space_only_collection_scans_large_objects() {
    let mut heap = heap();
    let payload = large_payload(&heap);
    // Not rooted: every large object is live in a from-space-only collection.
    let big = alloc_object(&heap, AllocationSemantics::Default, 2, payload);
    let young = alloc_object(&heap, AllocationSemantics::Default, 0, 1);
    set_payload_word(young, 0, 5);
    set_field(&heap, big, 1, Some(young));

    for _ in 0..2 {
        let stats = heap.collect_garbage(CollectionScope::FromSpaceOnly, false);
        assert_eq!(stats.freed_large.objects, 0);
        assert_eq!(stats.moved.objects, 1);
        assert!(heap.is_live_object(big));
        let young = get_field(big, 1).unwrap();
        assert!(heap.from_space().contains(young));
        assert_eq!(payload_word(young, 0), 5);
    }

    let stats = heap.collect_garbage(CollectionScope::WholeHeap, false);
    assert_eq!(stats.freed_large.objects, 1);
    assert_eq!(stats.freed.objects, 1);
    assert!(!heap.is_live_object(big));
}
