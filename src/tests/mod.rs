//! Collections of a whole heap, driven through the mock binding.

use crate::heap::Heap;
use crate::util::test_util::mock_vm::*;

mod evacuation;
mod large_objects;
mod system_weaks;
mod zygote;

fn heap() -> Heap<MockVM> {
    Heap::new(small_heap_options()).unwrap()
}
