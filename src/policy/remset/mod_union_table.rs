use super::{visit_card_objects, visit_edges, Edge};
use crate::plan::tracing::ObjectMarker;
use crate::policy::space::ContinuousSpace;
use crate::util::metadata::card_table::age_card;
use crate::util::metadata::{CardBitmap, CardTable};
use crate::util::options::ModUnionTableKind;
use crate::util::{Address, ObjectReference};
use crate::vm::{ObjectModel, ReferenceGlue, SimpleSlot, VMBinding};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::ops::Range;

/// A problem found by [`ModUnionTable::verify`]. Either means the table is unsound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModUnionTableError {
    /// The table holds a reference to an object that is not live.
    DeadReference {
        table: String,
        slot: Address,
        target: ObjectReference,
    },
    /// An object on a clean card refers into a collected space, and the table does not know.
    MissingReference {
        table: String,
        card: Address,
        holder: ObjectReference,
        target: ObjectReference,
    },
}

impl fmt::Display for ModUnionTableError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ModUnionTableError::DeadReference {
                table,
                slot,
                target,
            } => write!(
                f,
                "{}: slot {} refers to dead object {}",
                table, slot, target
            ),
            ModUnionTableError::MissingReference {
                table,
                card,
                holder,
                target,
            } => write!(
                f,
                "{}: reference {} -> {} on clean card {} is not recorded",
                table, holder, target, card
            ),
        }
    }
}

impl std::error::Error for ModUnionTableError {}

/// Cross-space references of one immune space, derived from the cards the mutator dirtied.
///
/// `filter` decides which references matter: it returns true for targets in a space that the
/// collection may move or free.
pub trait ModUnionTable<VM: VMBinding>: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ModUnionTableKind;

    /// The address range of the space the table summarises.
    fn space_range(&self) -> Range<Address>;

    /// Take over the dirty cards of the space: each dirty card is aged, and remembered by the
    /// table until [`Self::update`] has looked at it.
    fn clear_cards(&mut self, card_table: &CardTable);

    /// Recompute what the table knows about the cards taken over since the last update.
    fn update(&mut self, space: &dyn ContinuousSpace, filter: &dyn Fn(ObjectReference) -> bool);

    /// Mark every reference the table knows about, updating the fields that refer to moved
    /// objects.
    fn mark_references(
        &mut self,
        space: &dyn ContinuousSpace,
        filter: &dyn Fn(ObjectReference) -> bool,
        marker: &mut dyn ObjectMarker,
    );

    fn update_and_mark_references(
        &mut self,
        space: &dyn ContinuousSpace,
        filter: &dyn Fn(ObjectReference) -> bool,
        marker: &mut dyn ObjectMarker,
    ) {
        self.update(space, filter);
        self.mark_references(space, filter, marker);
    }

    /// Check the table against the space. Every remembered reference must be live, and every
    /// reference that passes `filter` from an object on a clean card must be remembered.
    fn verify(
        &self,
        space: &dyn ContinuousSpace,
        card_table: &CardTable,
        filter: &dyn Fn(ObjectReference) -> bool,
        is_live: &dyn Fn(ObjectReference) -> bool,
    ) -> Result<(), ModUnionTableError>;

    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result;

    /// Treat every card of the space as taken over, so that the next update scans the whole
    /// space.
    fn set_cards(&mut self);

    fn contains_card(&self, card: Address) -> bool;
}

fn card_of(addr: Address) -> Address {
    addr.align_down(CardTable::CARD_SIZE)
}

fn cards_in(range: &Range<Address>) -> impl Iterator<Item = Address> {
    let (start, end) = (range.start, range.end);
    (0..)
        .map(move |i| start + i * CardTable::CARD_SIZE)
        .take_while(move |card| *card < end)
}

#[derive(Default, Debug)]
struct CardReferences {
    /// Fields referring into collected spaces.
    slots: Vec<SimpleSlot>,
    /// Reference objects whose referent is in a collected space.
    reference_objects: Vec<ObjectReference>,
}

impl CardReferences {
    fn is_empty(&self) -> bool {
        self.slots.is_empty() && self.reference_objects.is_empty()
    }
}

/// Remembers, for each card, the reference fields found on it. Cards are only rescanned after
/// the mutator dirtied them again.
pub struct ReferenceCache<VM: VMBinding> {
    name: String,
    space_range: Range<Address>,
    /// Cards taken over from the card table that have not been scanned yet.
    cleared_cards: BTreeSet<Address>,
    references: BTreeMap<Address, CardReferences>,
    _p: PhantomData<VM>,
}

impl<VM: VMBinding> ReferenceCache<VM> {
    pub fn new(name: &str, space: &dyn ContinuousSpace) -> Self {
        ReferenceCache {
            name: name.to_string(),
            space_range: space.begin()..space.limit(),
            cleared_cards: BTreeSet::new(),
            references: BTreeMap::new(),
            _p: PhantomData,
        }
    }

    /// Number of fields and reference objects remembered.
    pub fn reference_count(&self) -> usize {
        self.references
            .values()
            .map(|entry| entry.slots.len() + entry.reference_objects.len())
            .sum()
    }
}

impl<VM: VMBinding> ModUnionTable<VM> for ReferenceCache<VM> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModUnionTableKind {
        ModUnionTableKind::ReferenceCache
    }

    fn space_range(&self) -> Range<Address> {
        self.space_range.clone()
    }

    fn clear_cards(&mut self, card_table: &CardTable) {
        let cleared_cards = &mut self.cleared_cards;
        card_table.modify_cards_atomic(
            self.space_range.start,
            self.space_range.end,
            age_card,
            |card, expected, _| {
                if expected == CardTable::CARD_DIRTY {
                    cleared_cards.insert(card);
                }
            },
        );
    }

    fn update(&mut self, space: &dyn ContinuousSpace, filter: &dyn Fn(ObjectReference) -> bool) {
        for card in std::mem::take(&mut self.cleared_cards) {
            let mut entry = CardReferences::default();
            visit_card_objects(space, card, |object| {
                visit_edges::<VM, _>(object, |edge| {
                    if !edge.slot().load().is_some_and(filter) {
                        return;
                    }
                    match edge {
                        Edge::Field(slot) => entry.slots.push(slot),
                        Edge::Referent { reference, .. } => entry.reference_objects.push(reference),
                    }
                })
            });
            trace!(
                "{}: card {} has {} references",
                self.name,
                card,
                entry.slots.len() + entry.reference_objects.len()
            );
            if entry.is_empty() {
                self.references.remove(&card);
            } else {
                self.references.insert(card, entry);
            }
        }
    }

    fn mark_references(
        &mut self,
        _space: &dyn ContinuousSpace,
        _filter: &dyn Fn(ObjectReference) -> bool,
        marker: &mut dyn ObjectMarker,
    ) {
        let mut count = 0;
        self.references.retain(|_, entry| {
            let mut non_null = false;
            for slot in &entry.slots {
                if slot.load().is_some() {
                    marker.mark_heap_reference(*slot);
                    non_null = true;
                    count += 1;
                }
            }
            for reference in &entry.reference_objects {
                if VM::VMReferenceGlue::get_referent(*reference).is_some() {
                    marker.delay_reference_referent(*reference);
                    non_null = true;
                    count += 1;
                }
            }
            // A card whose fields were all nulled has nothing left to contribute.
            non_null
        });
        debug!("{}: marked {} references", self.name, count);
    }

    fn verify(
        &self,
        space: &dyn ContinuousSpace,
        card_table: &CardTable,
        filter: &dyn Fn(ObjectReference) -> bool,
        is_live: &dyn Fn(ObjectReference) -> bool,
    ) -> Result<(), ModUnionTableError> {
        // Referents are only decided by reference processing, after marking.
        for entry in self.references.values() {
            for slot in entry.slots.iter().copied() {
                if let Some(target) = slot.load() {
                    if !is_live(target) {
                        return Err(ModUnionTableError::DeadReference {
                            table: self.name.clone(),
                            slot: slot.as_address(),
                            target,
                        });
                    }
                }
            }
        }

        let Some(live_bitmap) = space.live_bitmap() else {
            return Ok(());
        };
        let mut result = Ok(());
        live_bitmap.visit_marked_range(space.begin(), space.end(), |holder| {
            let card = card_of(holder.to_raw_address());
            if result.is_err()
                || self.cleared_cards.contains(&card)
                || card_table.get_card(card) != CardTable::CARD_CLEAN
            {
                return;
            }
            let entry = self.references.get(&card);
            visit_edges::<VM, _>(holder, |edge| {
                let Some(target) = edge.slot().load().filter(|t| filter(*t)) else {
                    return;
                };
                let recorded = entry.is_some_and(|entry| match edge {
                    Edge::Field(slot) => entry.slots.contains(&slot),
                    Edge::Referent { reference, .. } => entry.reference_objects.contains(&reference),
                });
                if !recorded && result.is_ok() {
                    result = Err(ModUnionTableError::MissingReference {
                        table: self.name.clone(),
                        card,
                        holder,
                        target,
                    });
                }
            });
        });
        result
    }

    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "{} cleared cards: [", self.name)?;
        for card in &self.cleared_cards {
            write!(out, "{}, ", card)?;
        }
        writeln!(out, "]")?;
        writeln!(out, "{} references:", self.name)?;
        for (card, entry) in &self.references {
            write!(out, "  {} -> {{", card)?;
            for slot in &entry.slots {
                match slot.load() {
                    Some(target) => write!(out, "{}: {}, ", slot.as_address(), target)?,
                    None => write!(out, "{}: null, ", slot.as_address())?,
                }
            }
            for reference in &entry.reference_objects {
                write!(
                    out,
                    "referent of {}, ",
                    VM::VMObjectModel::dump_object(*reference)
                )?;
            }
            writeln!(out, "}}")?;
        }
        Ok(())
    }

    fn set_cards(&mut self) {
        self.cleared_cards.extend(cards_in(&self.space_range));
    }

    fn contains_card(&self, card: Address) -> bool {
        self.cleared_cards.contains(&card) || self.references.contains_key(&card)
    }
}

/// Remembers only which cards held cross-space references, and rescans those cards on every
/// collection.
pub struct CardCache<VM: VMBinding> {
    name: String,
    space_range: Range<Address>,
    card_bitmap: CardBitmap,
    _p: PhantomData<VM>,
}

impl<VM: VMBinding> CardCache<VM> {
    pub fn new(name: &str, space: &dyn ContinuousSpace) -> io::Result<Self> {
        let card_bitmap = CardBitmap::create(
            &format!("{} card bitmap", name),
            space.begin(),
            space.capacity(),
        )
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("could not create {} card bitmap", name),
            )
        })?;
        Ok(CardCache {
            name: name.to_string(),
            space_range: space.begin()..space.limit(),
            card_bitmap,
            _p: PhantomData,
        })
    }

    /// Number of cards remembered.
    pub fn card_count(&self) -> usize {
        let mut count = 0;
        self.card_bitmap
            .visit_set_bits(self.space_range.start, self.space_range.end, |_| count += 1);
        count
    }
}

impl<VM: VMBinding> ModUnionTable<VM> for CardCache<VM> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModUnionTableKind {
        ModUnionTableKind::CardCache
    }

    fn space_range(&self) -> Range<Address> {
        self.space_range.clone()
    }

    fn clear_cards(&mut self, card_table: &CardTable) {
        let card_bitmap = &self.card_bitmap;
        card_table.modify_cards_atomic(
            self.space_range.start,
            self.space_range.end,
            age_card,
            |card, expected, _| {
                if expected == CardTable::CARD_DIRTY {
                    card_bitmap.set(card);
                }
            },
        );
    }

    /// Nothing to do: the remembered cards are rescanned when marking.
    fn update(&mut self, _space: &dyn ContinuousSpace, _filter: &dyn Fn(ObjectReference) -> bool) {
    }

    fn mark_references(
        &mut self,
        space: &dyn ContinuousSpace,
        filter: &dyn Fn(ObjectReference) -> bool,
        marker: &mut dyn ObjectMarker,
    ) {
        let mut clean_cards = vec![];
        let mut count = 0;
        self.card_bitmap
            .visit_set_bits(self.space_range.start, self.space_range.end, |card| {
                let mut found = false;
                visit_card_objects(space, card, |object| {
                    visit_edges::<VM, _>(object, |edge| {
                        if !edge.slot().load().is_some_and(filter) {
                            return;
                        }
                        match edge {
                            Edge::Field(slot) => marker.mark_heap_reference(slot),
                            Edge::Referent { reference, .. } => {
                                marker.delay_reference_referent(reference)
                            }
                        }
                        found = true;
                        count += 1;
                    })
                });
                if !found {
                    clean_cards.push(card);
                }
            });
        for card in clean_cards {
            self.card_bitmap.clear(card);
        }
        debug!("{}: marked {} references", self.name, count);
    }

    fn verify(
        &self,
        space: &dyn ContinuousSpace,
        card_table: &CardTable,
        filter: &dyn Fn(ObjectReference) -> bool,
        is_live: &dyn Fn(ObjectReference) -> bool,
    ) -> Result<(), ModUnionTableError> {
        let Some(live_bitmap) = space.live_bitmap() else {
            return Ok(());
        };
        let mut result = Ok(());
        live_bitmap.visit_marked_range(space.begin(), space.end(), |holder| {
            if result.is_err() {
                return;
            }
            let card = card_of(holder.to_raw_address());
            let remembered =
                self.card_bitmap.test(card) || card_table.get_card(card) != CardTable::CARD_CLEAN;
            visit_edges::<VM, _>(holder, |edge| {
                let slot = edge.slot();
                let Some(target) = slot.load().filter(|t| filter(*t)) else {
                    return;
                };
                if result.is_err() {
                    return;
                }
                if !remembered {
                    result = Err(ModUnionTableError::MissingReference {
                        table: self.name.clone(),
                        card,
                        holder,
                        target,
                    });
                } else if matches!(edge, Edge::Field(_)) && !is_live(target) {
                    result = Err(ModUnionTableError::DeadReference {
                        table: self.name.clone(),
                        slot: slot.as_address(),
                        target,
                    });
                }
            });
        });
        result
    }

    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "{} cards: [", self.name)?;
        let mut result = Ok(());
        self.card_bitmap
            .visit_set_bits(self.space_range.start, self.space_range.end, |card| {
                if result.is_ok() {
                    result = write!(out, "{}, ", card);
                }
            });
        result?;
        writeln!(out, "]")
    }

    fn set_cards(&mut self) {
        for card in cards_in(&self.space_range) {
            self.card_bitmap.set(card);
        }
    }

    fn contains_card(&self, card: Address) -> bool {
        self.card_bitmap.has_address(card) && self.card_bitmap.test(card)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::imagespace::ImageSpace;
    use crate::policy::space::Space;
    use crate::util::constants::BYTES_IN_PAGE;
    use crate::util::memory::{MmapProtection, MmapRegion};
    use crate::util::test_util::mock_vm::*;
    use crate::vm::ReferenceKind;

    /// An image space followed by a "collected" range the references point into.
    struct Fixture {
        image: ImageSpace,
        other: MmapRegion,
        card_table: CardTable,
    }

    impl Fixture {
        fn new() -> Fixture {
            let mut image = MmapRegion::map_anonymous(
                "mod union test",
                16 * BYTES_IN_PAGE,
                MmapProtection::ReadWrite,
            )
            .unwrap();
            let other = image.remap_at_end(image.start() + 8 * BYTES_IN_PAGE, "other");
            let card_table = CardTable::create(image.start(), 16 * BYTES_IN_PAGE).unwrap();
            Fixture {
                image: ImageSpace::new("image", image).unwrap(),
                other,
                card_table,
            }
        }

        fn image_object(&self, num_refs: usize) -> ObjectReference {
            let addr = self.image.alloc(object_size(num_refs, 0)).unwrap();
            init_object(addr, num_refs, 0, None)
        }

        fn image_reference(&self, kind: ReferenceKind) -> ObjectReference {
            let addr = self.image.alloc(object_size(1, 0)).unwrap();
            init_object(addr, 1, 0, Some(kind))
        }

        /// A fake target in the collected range. It is never dereferenced.
        fn target(&self, i: usize) -> ObjectReference {
            ObjectReference::from_raw_address(self.other.start() + i * 64).unwrap()
        }

        fn filter(&self) -> impl Fn(ObjectReference) -> bool + '_ {
            |object| !self.image.contains(object)
        }

        /// Store with the write barrier.
        fn store(&self, holder: ObjectReference, field: usize, target: ObjectReference) {
            field_slot(holder, field).store(target);
            self.card_table.mark_card(holder.to_raw_address());
        }
    }

    /// Records what it is asked to mark. Marking never moves anything.
    #[derive(Default)]
    struct RecordingMarker {
        marked: Vec<ObjectReference>,
        delayed: Vec<ObjectReference>,
    }

    impl ObjectMarker for RecordingMarker {
        fn mark_object(&mut self, object: ObjectReference) -> ObjectReference {
            self.marked.push(object);
            object
        }

        fn delay_reference_referent(&mut self, reference: ObjectReference) {
            self.delayed.push(reference);
        }
    }

    fn tables(fixture: &Fixture) -> Vec<Box<dyn ModUnionTable<MockVM>>> {
        vec![
            Box::new(ReferenceCache::<MockVM>::new("reference cache", &fixture.image)),
            Box::new(CardCache::<MockVM>::new("card cache", &fixture.image).unwrap()),
        ]
    }

    #[test]
    fn dirty_cards_become_roots() {
        let fixture = Fixture::new();
        let a = fixture.image_object(2);
        let b = fixture.image_object(1);
        let inner = fixture.image_object(1);
        fixture.store(a, 0, fixture.target(0));
        fixture.store(a, 1, fixture.target(1));
        // References within the image are not interesting.
        fixture.store(b, 0, inner);

        for mut table in tables(&fixture) {
            fixture.card_table.mark_card(a.to_raw_address());
            fixture.card_table.mark_card(b.to_raw_address());
            table.clear_cards(&fixture.card_table);
            assert!(table.contains_card(card_of(a.to_raw_address())));
            assert!(!fixture.card_table.is_dirty(a.to_raw_address()));

            let mut marker = RecordingMarker::default();
            table.update_and_mark_references(&fixture.image, &fixture.filter(), &mut marker);
            assert_eq!(marker.marked, vec![fixture.target(0), fixture.target(1)]);

            // Without new writes the same references are marked again.
            let mut marker = RecordingMarker::default();
            table.clear_cards(&fixture.card_table);
            table.update_and_mark_references(&fixture.image, &fixture.filter(), &mut marker);
            assert_eq!(marker.marked.len(), 2, "{}", table.name());

            fixture.card_table.clear_card_table();
            let live = |_: ObjectReference| true;
            assert_eq!(
                table.verify(&fixture.image, &fixture.card_table, &fixture.filter(), &live),
                Ok(())
            );
        }
    }

    #[test]
    fn nulled_fields_drop_out() {
        let fixture = Fixture::new();
        let a = fixture.image_object(1);
        fixture.store(a, 0, fixture.target(0));
        for mut table in tables(&fixture) {
            fixture.card_table.mark_card(a.to_raw_address());
            table.clear_cards(&fixture.card_table);
            table.update_and_mark_references(
                &fixture.image,
                &fixture.filter(),
                &mut RecordingMarker::default(),
            );
            field_slot(a, 0).clear();
            fixture.card_table.mark_card(a.to_raw_address());
            table.clear_cards(&fixture.card_table);
            let mut marker = RecordingMarker::default();
            table.update_and_mark_references(&fixture.image, &fixture.filter(), &mut marker);
            assert!(marker.marked.is_empty());
            assert!(!table.contains_card(card_of(a.to_raw_address())), "{}", table.name());
            field_slot(a, 0).store(fixture.target(0));
        }
    }

    #[test]
    fn referents_are_delayed() {
        let fixture = Fixture::new();
        let weak = fixture.image_reference(ReferenceKind::Weak);
        fixture.store(weak, 0, fixture.target(3));
        for mut table in tables(&fixture) {
            fixture.card_table.mark_card(weak.to_raw_address());
            table.clear_cards(&fixture.card_table);
            let mut marker = RecordingMarker::default();
            table.update_and_mark_references(&fixture.image, &fixture.filter(), &mut marker);
            assert!(marker.marked.is_empty());
            assert_eq!(marker.delayed, vec![weak], "{}", table.name());
        }
    }

    #[test]
    fn verify_finds_unrecorded_reference() {
        let fixture = Fixture::new();
        let a = fixture.image_object(1);
        for table in tables(&fixture) {
            // Written without the barrier.
            field_slot(a, 0).store(fixture.target(0));
            let live = |_: ObjectReference| true;
            let result = table.verify(&fixture.image, &fixture.card_table, &fixture.filter(), &live);
            assert!(
                matches!(result, Err(ModUnionTableError::MissingReference { holder, .. }) if holder == a),
                "{}: {:?}",
                table.name(),
                result
            );
        }
    }

    #[test]
    fn verify_finds_dead_reference() {
        let fixture = Fixture::new();
        let a = fixture.image_object(1);
        fixture.store(a, 0, fixture.target(0));
        for mut table in tables(&fixture) {
            fixture.card_table.mark_card(a.to_raw_address());
            table.clear_cards(&fixture.card_table);
            table.update(&fixture.image, &fixture.filter());
            fixture.card_table.clear_card_table();
            let dead = fixture.target(0);
            let live = move |object: ObjectReference| object != dead;
            let result = table.verify(&fixture.image, &fixture.card_table, &fixture.filter(), &live);
            assert!(
                matches!(result, Err(ModUnionTableError::DeadReference { target, .. }) if target == dead),
                "{}: {:?}",
                table.name(),
                result
            );
        }
    }

    #[test]
    fn set_cards_covers_the_space() {
        let fixture = Fixture::new();
        let a = fixture.image_object(1);
        field_slot(a, 0).store(fixture.target(0));
        for mut table in tables(&fixture) {
            table.set_cards();
            let mut marker = RecordingMarker::default();
            table.update_and_mark_references(&fixture.image, &fixture.filter(), &mut marker);
            assert_eq!(marker.marked, vec![fixture.target(0)]);
            let mut dump = String::new();
            table.dump(&mut dump).unwrap();
            assert!(dump.contains(table.name()));
        }
    }
}
