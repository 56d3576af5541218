use super::gc_work::SemiSpaceMarker;
use crate::heap::Heap;
use crate::plan::global::CollectionScope;
use crate::plan::immune_region::ImmuneRegion;
use crate::plan::tracing::{ObjectMarker, ReferenceTracer};
use crate::policy::space::{ContinuousSpace, GcRetentionPolicy, Space};
use crate::util::mark_stack::MarkStack;
use crate::util::options::Options;
use crate::util::reference_processor::ReferenceProcessor;
use crate::util::statistics::{CollectionStats, CumulativeStats, ObjectBytePair, PhaseTimer};
use crate::util::ObjectReference;
use crate::vm::{ReferenceGlue, Scanning, VMBinding};
use std::marker::PhantomData;
use std::time::Instant;

/// A stop-the-world collector that evacuates the live objects of the from-space into the
/// to-space.
///
/// Immune spaces (the image and the zygote) are not traced: their mod-union tables supply the
/// references they hold into the rest of the heap. A whole-heap collection also traces and
/// sweeps the non-moving and large object spaces; a from-space-only collection treats them as
/// live and takes their references into from-space from the remembered set, or from a scan of
/// every object.
pub struct SemiSpace<VM: VMBinding> {
    pub(super) mark_stack: MarkStack,
    pub(super) immune_region: ImmuneRegion,
    pub(super) reference_processor: ReferenceProcessor,
    /// Large objects are not traced in from-space-only collections.
    pub(super) los_immune: bool,
    pub(super) stats: CollectionStats,
    scope: CollectionScope,
    timer: PhaseTimer,
    cumulative: CumulativeStats,
    protect_from_space: bool,
    use_remembered_sets: bool,
    verify_mod_union_tables: bool,
    verify_from_space_references: bool,
    _p: PhantomData<VM>,
}

impl<VM: VMBinding> SemiSpace<VM> {
    pub fn new(options: &Options) -> Self {
        SemiSpace {
            mark_stack: MarkStack::new(
                "semi space mark stack",
                options.mark_stack_initial_capacity,
                options.mark_stack_growth_limit,
            ),
            immune_region: ImmuneRegion::new(),
            reference_processor: ReferenceProcessor::default(),
            los_immune: false,
            stats: CollectionStats::default(),
            scope: CollectionScope::WholeHeap,
            timer: PhaseTimer::default(),
            cumulative: CumulativeStats::default(),
            protect_from_space: options.protect_from_space,
            use_remembered_sets: options.use_remembered_sets,
            verify_mod_union_tables: options.verify_mod_union_tables_enabled(),
            verify_from_space_references: options.verify_from_space_references_enabled(),
            _p: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        "SemiSpace"
    }

    pub fn cumulative_stats(&self) -> &CumulativeStats {
        &self.cumulative
    }

    /// Run one collection over `heap`. Once started, a collection runs to completion; any
    /// failure on the way is fatal.
    pub fn collect(
        &mut self,
        heap: &mut Heap<VM>,
        scope: CollectionScope,
        clear_soft_references: bool,
    ) -> CollectionStats {
        let start = Instant::now();
        self.initialize_phase(heap, scope);
        self.bind_bitmaps(heap);
        self.marking_phase(heap);
        self.reclaim_phase(heap, clear_soft_references);
        self.finish_phase(heap, start)
    }

    fn initialize_phase(&mut self, heap: &Heap<VM>, scope: CollectionScope) {
        self.timer.start_phase("InitializePhase");
        self.scope = scope;
        self.los_immune = scope == CollectionScope::FromSpaceOnly;
        self.stats = CollectionStats::default();
        self.immune_region.reset();
        assert!(self.mark_stack.is_empty());
        assert!(self.reference_processor.is_empty());
        heap.to_space().unprotect();
        debug!(
            "{} {} collection: from {} to {}",
            self.name(),
            scope,
            heap.from_space().name(),
            heap.to_space().name()
        );
    }

    /// Merge the immune spaces into the immune region and bind the bitmaps of every space that
    /// is not reclaimed by this collection.
    fn bind_bitmaps(&mut self, heap: &mut Heap<VM>) {
        self.timer.start_phase("BindBitmaps");
        let scope = self.scope;
        for space in heap.continuous_spaces_mut() {
            match space.gc_retention_policy() {
                GcRetentionPolicy::NeverCollect | GcRetentionPolicy::FullCollect => {
                    assert!(
                        self.immune_region.add_continuous_space(&*space),
                        "failed to add {} [{}, {}) to the immune region [{}, {})",
                        space.name(),
                        space.begin(),
                        space.limit(),
                        self.immune_region.begin(),
                        self.immune_region.end()
                    );
                    if let Some(alloc_space) = space.as_alloc_space_mut() {
                        alloc_space.bind_live_to_mark_bitmap();
                    }
                }
                GcRetentionPolicy::AlwaysCollect => {
                    if scope == CollectionScope::FromSpaceOnly {
                        if let Some(alloc_space) = space.as_alloc_space_mut() {
                            alloc_space.bind_live_to_mark_bitmap();
                        }
                    }
                }
            }
        }
    }

    fn marking_phase(&mut self, heap: &Heap<VM>) {
        self.timer.start_phase("MarkingPhase");
        let from_space_only = self.scope == CollectionScope::FromSpaceOnly;
        let use_remembered_sets = self.use_remembered_sets && from_space_only;
        heap.process_cards(use_remembered_sets);
        // Everything the mutator dirtied is now held by the tables and remembered sets.
        heap.card_table().clear_card_table();

        let immune_region = self.immune_region;
        let verify_mod_union_tables = self.verify_mod_union_tables;
        let verify_from_space_references = self.verify_from_space_references;
        let mut marker = SemiSpaceMarker::new(self, heap);

        // MarkRoots
        VM::VMScanning::scan_roots(&mut |slot| marker.mark_heap_reference(slot));

        // UpdateAndMarkModUnion
        let filter = |object: ObjectReference| !immune_region.contains_object(object);
        for (space, table) in heap.mod_union_tables() {
            table
                .borrow_mut()
                .update_and_mark_references(space, &filter, &mut marker);
        }

        // MarkReachableObjects
        if from_space_only {
            let non_moving = heap.non_moving_space();
            match heap.non_moving_remembered_set() {
                Some(rem_set) if use_remembered_sets => {
                    let from_space = heap.from_space();
                    rem_set.borrow_mut().update_and_mark_references(
                        non_moving,
                        from_space.begin()..from_space.limit(),
                        &mut marker,
                    );
                }
                _ => {
                    if let Some(live_bitmap) = non_moving.live_bitmap() {
                        live_bitmap.visit_marked_range(
                            non_moving.begin(),
                            non_moving.end(),
                            |object| marker.scan_object(object),
                        );
                    }
                }
            }
            let los = heap.large_object_space();
            los.copy_live_to_marked();
            for object in los.live_objects() {
                marker.scan_object(object);
            }
        }
        marker.process_mark_stack();

        if verify_mod_union_tables {
            for (space, table) in heap.mod_union_tables() {
                let result = table.borrow().verify(space, heap.card_table(), &filter, &|object| {
                    marker.is_marked(object).is_some()
                });
                if let Err(e) = result {
                    let mut dump = String::new();
                    // Writing to a String cannot fail.
                    let _ = table.borrow().dump(&mut dump);
                    panic!("{}\n{}", e, dump);
                }
            }
        }
        if verify_from_space_references {
            self.verify_no_from_space_references(heap, from_space_only);
        }
    }

    /// Check that no object that survives this collection in place still refers into
    /// from-space.
    fn verify_no_from_space_references(&self, heap: &Heap<VM>, from_space_only: bool) {
        let from_space = heap.from_space();
        let check = |object: ObjectReference| {
            VM::VMScanning::scan_object(object, &mut |slot: crate::vm::SimpleSlot| {
                if let Some(target) = slot.load() {
                    assert!(
                        !from_space.contains(target),
                        "{} refers to {} in {} after marking",
                        object,
                        target,
                        from_space.name()
                    );
                }
            });
        };
        heap.to_space().walk(check);
        if from_space_only && self.use_remembered_sets {
            let non_moving = heap.non_moving_space();
            if let Some(live_bitmap) = non_moving.live_bitmap() {
                live_bitmap.visit_marked_range(non_moving.begin(), non_moving.end(), check);
            }
        }
    }

    fn reclaim_phase(&mut self, heap: &mut Heap<VM>, clear_soft_references: bool) {
        self.timer.start_phase("ReclaimPhase");
        let from_space_only = self.scope == CollectionScope::FromSpaceOnly;
        {
            let heap: &Heap<VM> = heap;
            let mut marker = SemiSpaceMarker::new(self, heap);
            // ProcessReferences
            let cleared =
                ReferenceProcessor::process_references::<VM, _>(&mut marker, clear_soft_references);
            if !cleared.is_empty() {
                VM::VMReferenceGlue::enqueue_references(&cleared);
            }
            // SweepSystemWeaks
            VM::VMScanning::sweep_system_weaks(&mut |object| marker.is_marked(object));
            debug_assert!(marker.ss.mark_stack.is_empty());
        }

        // Whatever was not copied out of the from-space is garbage.
        let from_space = heap.from_space();
        self.stats.freed += ObjectBytePair::new(
            from_space
                .objects_allocated()
                .saturating_sub(self.stats.moved.objects),
            from_space
                .bytes_allocated()
                .saturating_sub(self.stats.moved.bytes),
        );

        // Sweep
        for space in heap.continuous_spaces() {
            if space.gc_retention_policy() != GcRetentionPolicy::AlwaysCollect {
                continue;
            }
            if let Some(alloc_space) = space.as_alloc_space() {
                self.stats.freed += alloc_space.sweep(false, heap.card_table());
            }
        }
        if !from_space_only {
            let los = heap.large_object_space();
            self.stats.freed_large += los.sweep(false);
            los.swap_bitmaps();
        }

        // SwapBitmaps, UnBindBitmaps
        for space in heap.continuous_spaces_mut() {
            if let Some(alloc_space) = space.as_alloc_space_mut() {
                if alloc_space.has_bound_bitmaps() {
                    alloc_space.unbind_bitmaps();
                } else if alloc_space.gc_retention_policy() == GcRetentionPolicy::AlwaysCollect {
                    alloc_space.swap_bitmaps();
                }
            }
        }

        let from_space = heap.from_space();
        from_space.clear();
        if self.protect_from_space {
            from_space.protect();
        }
        heap.swap_semi_spaces();
    }

    fn finish_phase(&mut self, heap: &Heap<VM>, start: Instant) -> CollectionStats {
        self.timer.start_phase("FinishPhase");
        assert!(
            self.mark_stack.is_empty(),
            "mark stack not empty after collection"
        );
        self.mark_stack.reset();
        for space in heap.continuous_spaces() {
            if let Some(alloc_space) = space.as_alloc_space() {
                alloc_space.bitmaps().mark().clear_all();
            }
        }
        heap.large_object_space().clear_mark_objects();
        self.immune_region.reset();

        self.stats.phase_times = self.timer.finish();
        self.stats.duration = start.elapsed();
        info!("{} {} GC: {}", self.name(), self.scope, self.stats);
        self.cumulative.record(&self.stats);
        std::mem::take(&mut self.stats)
    }
}
