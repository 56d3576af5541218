//! The heap: every space, the card table, the cross-space summaries and the collector.

use crate::plan::barriers::CardMarkingBarrier;
use crate::plan::semispace::SemiSpace;
use crate::plan::{AllocationSemantics, CollectionScope};
use crate::policy::bumppointerspace::BumpPointerSpace;
use crate::policy::imagespace::ImageSpace;
use crate::policy::largeobjectspace::LargeObjectSpace;
use crate::policy::mallocspace::MallocSpace;
use crate::policy::remset::{CardCache, ModUnionTable, ReferenceCache, RememberedSet};
use crate::policy::space::{ContinuousSpace, Space};
use crate::policy::zygotespace::ZygoteSpace;
use crate::util::metadata::card_table::age_card;
use crate::util::metadata::CardTable;
use crate::util::memory::{MmapProtection, MmapRegion};
use crate::util::options::{ModUnionTableKind, Options};
use crate::util::statistics::{CollectionStats, CumulativeStats};
use crate::util::{Address, ObjectReference};
use crate::vm::VMBinding;
use atomic_refcell::AtomicRefCell;
use itertools::Itertools;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

pub type ModUnionTableCell<VM> = AtomicRefCell<Box<dyn ModUnionTable<VM>>>;

/// A managed heap collected by a semi-space collector.
///
/// The heap is one reservation split into adjacent spaces, lowest first:
///
/// ```text
/// [ image | zygote | non-moving | semi-space 0 | semi-space 1 | large objects ]
/// ```
///
/// The zygote space only exists after [`Heap::pre_zygote_fork`] and takes the lower part of
/// the non-moving range. The image space is absent when its configured size is zero.
///
/// Allocation takes `&self`. Collection takes `&mut self`: the exclusive borrow stands for the
/// mutators being stopped, and is what makes binding and swapping bitmaps safe.
pub struct Heap<VM: VMBinding> {
    options: Options,
    card_table: CardTable,
    image_space: Option<ImageSpace>,
    image_mod_union_table: Option<ModUnionTableCell<VM>>,
    zygote_space: Option<ZygoteSpace>,
    zygote_mod_union_table: Option<ModUnionTableCell<VM>>,
    non_moving_space: MallocSpace,
    non_moving_remembered_set: Option<AtomicRefCell<RememberedSet<VM>>>,
    semi_spaces: [BumpPointerSpace; 2],
    /// Which semi-space is the from-space. False: semi-space 0.
    hi: AtomicBool,
    large_object_space: LargeObjectSpace,
    /// Taken out while a collection runs.
    collector: Option<SemiSpace<VM>>,
}

impl<VM: VMBinding> Heap<VM> {
    pub fn new(options: Options) -> io::Result<Self> {
        match crate::util::logger::try_init() {
            Ok(_) => debug!("Heap initialized the logger."),
            Err(_) => debug!("Heap did not initialize the logger. One may already be installed."),
        }
        let total = options.image_space_size
            + options.non_moving_space_capacity
            + 2 * options.semi_space_size
            + options.large_object_space_size;
        let mut reservation =
            MmapRegion::map_anonymous("heap", total, MmapProtection::ReadWrite)?;
        let heap_begin = reservation.start();
        let card_table = CardTable::create(heap_begin, total).ok_or_else(|| {
            io::Error::new(io::ErrorKind::OutOfMemory, "could not create card table")
        })?;

        let los_region = reservation.remap_at_end(
            reservation.end() - options.large_object_space_size,
            "large object space",
        );
        let semi1_region =
            reservation.remap_at_end(reservation.end() - options.semi_space_size, "semi space 1");
        let semi0_region =
            reservation.remap_at_end(reservation.end() - options.semi_space_size, "semi space 0");
        let non_moving_region = reservation.remap_at_end(
            reservation.end() - options.non_moving_space_capacity,
            "non moving space",
        );
        // What is left is the image range.
        debug_assert_eq!(reservation.size(), options.image_space_size);

        let image_space = if options.image_space_size > 0 {
            Some(ImageSpace::new("image space", reservation)?)
        } else {
            None
        };
        let image_mod_union_table = match image_space.as_ref() {
            Some(image) => {
                let mut table = Self::create_mod_union_table(
                    options.image_mod_union_table,
                    "image space mod-union table",
                    image,
                )?;
                // The image is populated without the barrier.
                table.set_cards();
                Some(AtomicRefCell::new(table))
            }
            None => None,
        };

        let non_moving_space = MallocSpace::new(
            "non moving space",
            non_moving_region,
            options.non_moving_space_initial_size,
            options.non_moving_space_growth_limit,
        )?;
        let non_moving_remembered_set = options.use_remembered_sets.then(|| {
            AtomicRefCell::new(RememberedSet::new(
                "non moving space remembered set",
                &non_moving_space,
            ))
        });

        let semi_spaces = [
            BumpPointerSpace::new("semi space 0", semi0_region)?,
            BumpPointerSpace::new("semi space 1", semi1_region)?,
        ];
        if options.protect_from_space {
            // Semi-space 1 is the first to-space; nothing may touch it before the first
            // collection.
            semi_spaces[1].protect();
        }
        let large_object_space = LargeObjectSpace::new("large object space", los_region)?;

        let collector = SemiSpace::new(&options);
        let heap = Heap {
            options,
            card_table,
            image_space,
            image_mod_union_table,
            zygote_space: None,
            zygote_mod_union_table: None,
            non_moving_space,
            non_moving_remembered_set,
            semi_spaces,
            hi: AtomicBool::new(false),
            large_object_space,
            collector: Some(collector),
        };
        heap.assert_spaces_sorted();
        info!(
            "Created heap [{}, {}): {}",
            heap_begin,
            heap_begin + total,
            heap.continuous_spaces()
                .iter()
                .map(|space| format!("{} [{}, {})", space.name(), space.begin(), space.limit()))
                .join(", ")
        );
        Ok(heap)
    }

    fn create_mod_union_table(
        kind: ModUnionTableKind,
        name: &str,
        space: &dyn ContinuousSpace,
    ) -> io::Result<Box<dyn ModUnionTable<VM>>> {
        Ok(match kind {
            ModUnionTableKind::ReferenceCache => Box::new(ReferenceCache::<VM>::new(name, space)),
            ModUnionTableKind::CardCache => Box::new(CardCache::<VM>::new(name, space)?),
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Allocate `size` bytes of zeroed memory. Returns `None` when the target space is full;
    /// the caller may collect and retry.
    pub fn alloc(&self, size: usize, semantics: AllocationSemantics) -> Option<Address> {
        match semantics {
            AllocationSemantics::Default if size >= self.options.large_object_threshold => {
                self.large_object_space.alloc(size)
            }
            AllocationSemantics::Default => self.from_space().alloc(size),
            AllocationSemantics::NonMoving => self.non_moving_space.alloc(size),
            AllocationSemantics::Los => self.large_object_space.alloc(size),
        }
    }

    /// Allocate into the image space. Only meaningful while the heap is being set up.
    pub fn alloc_image_object(&self, size: usize) -> Option<Address> {
        self.image_space.as_ref()?.alloc(size)
    }

    /// Record that a reference was stored into `src`.
    pub fn write_barrier(&self, src: ObjectReference) {
        self.card_table.mark_card(src.to_raw_address());
    }

    pub fn barrier(&self) -> CardMarkingBarrier<'_> {
        CardMarkingBarrier::new(&self.card_table)
    }

    /// Run a collection of `scope`.
    pub fn collect_garbage(
        &mut self,
        scope: CollectionScope,
        clear_soft_references: bool,
    ) -> CollectionStats {
        let Some(mut collector) = self.collector.take() else {
            panic!("collection is not reentrant");
        };
        let stats = collector.collect(self, scope, clear_soft_references);
        self.collector = Some(collector);
        stats
    }

    pub fn cumulative_stats(&self) -> Option<&CumulativeStats> {
        self.collector.as_ref().map(|c| c.cumulative_stats())
    }

    /// Turn the objects of the non-moving space into a zygote space before the process forks,
    /// so that the children share those pages. Later allocations go to what remains of the
    /// non-moving range. Does nothing once a zygote space exists.
    pub fn pre_zygote_fork(&mut self) -> io::Result<()> {
        if self.zygote_space.is_some() {
            debug!("Zygote space already exists");
            return Ok(());
        }
        let trimmed = self.non_moving_space.trim();
        debug!("Trimmed {} bytes before creating the zygote space", trimmed);
        let zygote = self
            .non_moving_space
            .create_zygote_space("zygote space", "non moving space")?;
        let mut table = Self::create_mod_union_table(
            self.options.zygote_mod_union_table,
            "zygote space mod-union table",
            &zygote,
        )?;
        // The remembered set of the old range knew the cards, the new table does not.
        table.set_cards();
        self.zygote_space = Some(zygote);
        self.zygote_mod_union_table = Some(AtomicRefCell::new(table));
        if self.options.use_remembered_sets {
            self.non_moving_remembered_set = Some(AtomicRefCell::new(RememberedSet::new(
                "non moving space remembered set",
                &self.non_moving_space,
            )));
        }
        self.assert_spaces_sorted();
        Ok(())
    }

    /// Drain the dirty cards into the summaries: mod-union tables for immune spaces, the
    /// remembered set for the non-moving space if `use_remembered_sets`. Otherwise the dirty
    /// cards of the non-moving space are aged. Semi-space cards are left alone; the collector
    /// clears them.
    pub fn process_cards(&self, use_remembered_sets: bool) {
        for (_, table) in self.mod_union_tables() {
            table.borrow_mut().clear_cards(&self.card_table);
        }
        let non_moving = &self.non_moving_space;
        match self.non_moving_remembered_set.as_ref() {
            Some(rem_set) if use_remembered_sets => {
                rem_set.borrow_mut().clear_cards(&self.card_table);
            }
            _ => self.card_table.modify_cards_atomic(
                non_moving.begin(),
                non_moving.end(),
                age_card,
                |_, _, _| {},
            ),
        }
    }

    pub fn card_table(&self) -> &CardTable {
        &self.card_table
    }

    /// The continuous spaces in address order.
    pub fn continuous_spaces(&self) -> Vec<&dyn ContinuousSpace> {
        let mut spaces: Vec<&dyn ContinuousSpace> = vec![];
        if let Some(image) = self.image_space.as_ref() {
            spaces.push(image);
        }
        if let Some(zygote) = self.zygote_space.as_ref() {
            spaces.push(zygote);
        }
        spaces.push(&self.non_moving_space);
        for semi_space in &self.semi_spaces {
            spaces.push(semi_space);
        }
        spaces
    }

    pub(crate) fn continuous_spaces_mut(&mut self) -> Vec<&mut dyn ContinuousSpace> {
        let mut spaces: Vec<&mut dyn ContinuousSpace> = vec![];
        if let Some(image) = self.image_space.as_mut() {
            spaces.push(image);
        }
        if let Some(zygote) = self.zygote_space.as_mut() {
            spaces.push(zygote);
        }
        spaces.push(&mut self.non_moving_space);
        for semi_space in &mut self.semi_spaces {
            spaces.push(semi_space);
        }
        spaces
    }

    fn assert_spaces_sorted(&self) {
        let spaces = self.continuous_spaces();
        for pair in spaces.windows(2) {
            assert!(
                pair[0].limit() <= pair[1].begin(),
                "{} [{}, {}) overlaps or follows {} [{}, {})",
                pair[0].name(),
                pair[0].begin(),
                pair[0].limit(),
                pair[1].name(),
                pair[1].begin(),
                pair[1].limit()
            );
        }
    }

    pub fn find_continuous_space(&self, object: ObjectReference) -> Option<&dyn ContinuousSpace> {
        self.continuous_spaces()
            .into_iter()
            .find(|space| space.contains(object))
    }

    /// Whether `object` is an object the heap considers live: allocated since the last
    /// collection or found live by it.
    pub fn is_live_object(&self, object: ObjectReference) -> bool {
        if self.large_object_space.contains(object) {
            return self.large_object_space.is_live(object);
        }
        self.find_continuous_space(object)
            .and_then(|space| space.live_bitmap())
            .is_some_and(|bitmap| bitmap.test(object.to_raw_address()))
    }

    /// The immune spaces that have a mod-union table, with their tables.
    pub fn mod_union_tables(&self) -> Vec<(&dyn ContinuousSpace, &ModUnionTableCell<VM>)> {
        let mut tables: Vec<(&dyn ContinuousSpace, &ModUnionTableCell<VM>)> = vec![];
        if let (Some(space), Some(table)) = (&self.image_space, &self.image_mod_union_table) {
            tables.push((space, table));
        }
        if let (Some(space), Some(table)) = (&self.zygote_space, &self.zygote_mod_union_table) {
            tables.push((space, table));
        }
        tables
    }

    pub fn non_moving_remembered_set(&self) -> Option<&AtomicRefCell<RememberedSet<VM>>> {
        self.non_moving_remembered_set.as_ref()
    }

    pub fn image_space(&self) -> Option<&ImageSpace> {
        self.image_space.as_ref()
    }

    pub fn zygote_space(&self) -> Option<&ZygoteSpace> {
        self.zygote_space.as_ref()
    }

    pub fn non_moving_space(&self) -> &MallocSpace {
        &self.non_moving_space
    }

    pub fn large_object_space(&self) -> &LargeObjectSpace {
        &self.large_object_space
    }

    /// The semi-space mutators allocate into.
    pub fn from_space(&self) -> &BumpPointerSpace {
        &self.semi_spaces[self.hi.load(Ordering::Relaxed) as usize]
    }

    /// The semi-space the next collection copies into.
    pub fn to_space(&self) -> &BumpPointerSpace {
        &self.semi_spaces[!self.hi.load(Ordering::Relaxed) as usize]
    }

    pub(crate) fn swap_semi_spaces(&mut self) {
        let hi = self.hi.get_mut();
        *hi = !*hi;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::BYTES_IN_PAGE;
    use crate::util::test_util::mock_vm::*;

    #[cfg(feature = "builtin_env_logger")]
    #[test]
    fn creating_a_heap_installs_the_logger() {
        let _heap = Heap::<MockVM>::new(small_heap_options()).unwrap();
        assert!(crate::util::logger::try_init().is_err());
    }

    #[test]
    fn spaces_are_laid_out_in_order() {
        let heap = Heap::<MockVM>::new(small_heap_options()).unwrap();
        let names: Vec<String> = heap
            .continuous_spaces()
            .iter()
            .map(|space| space.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["image space", "non moving space", "semi space 0", "semi space 1"]
        );
        let spaces = heap.continuous_spaces();
        assert_eq!(heap.non_moving_space().limit(), spaces[2].begin());
        assert_eq!(heap.to_space().limit(), heap.large_object_space().begin());
        assert!(heap.card_table().covers(heap.large_object_space().limit() - 1));
    }

    #[test]
    fn no_image_space() {
        let mut options = small_heap_options();
        options.image_space_size = 0;
        let heap = Heap::<MockVM>::new(options).unwrap();
        assert!(heap.image_space().is_none());
        assert!(heap.mod_union_tables().is_empty());
        assert_eq!(heap.alloc_image_object(16), None);
    }

    #[test]
    fn alloc_routes_by_semantics() {
        let heap = Heap::<MockVM>::new(small_heap_options()).unwrap();
        let threshold = heap.options().large_object_threshold;
        let small = heap.alloc(32, AllocationSemantics::Default).unwrap();
        assert!(heap.from_space().has_address(small));
        let large = heap.alloc(threshold, AllocationSemantics::Default).unwrap();
        assert!(heap.large_object_space().has_address(large));
        let pinned = heap.alloc(32, AllocationSemantics::NonMoving).unwrap();
        assert!(heap.non_moving_space().has_address(pinned));
        let los = heap.alloc(32, AllocationSemantics::Los).unwrap();
        assert!(los.is_aligned_to(BYTES_IN_PAGE));
        for addr in [small, large, pinned, los] {
            assert!(heap.is_live_object(ObjectReference::from_raw_address(addr).unwrap()));
        }
    }

    #[test]
    fn process_cards_feeds_the_remembered_set() {
        let heap = Heap::<MockVM>::new(small_heap_options()).unwrap();
        let holder = alloc_object(&heap, AllocationSemantics::NonMoving, 1, 0);
        let young = alloc_object(&heap, AllocationSemantics::Default, 0, 0);
        set_field(&heap, holder, 0, Some(young));
        heap.write_barrier(young);

        heap.process_cards(false);
        assert_eq!(
            heap.card_table().get_card(holder.to_raw_address()),
            CardTable::CARD_AGED
        );
        let rem_set = heap.non_moving_remembered_set().unwrap();
        assert!(rem_set.borrow().is_empty());

        set_field(&heap, holder, 0, Some(young));
        heap.process_cards(true);
        assert!(rem_set
            .borrow()
            .contains_card(holder.to_raw_address().align_down(CardTable::CARD_SIZE)));
        // Semi-space cards are not summarised.
        assert_eq!(
            heap.card_table().get_card(young.to_raw_address()),
            CardTable::CARD_DIRTY
        );
    }
}
