use super::{visit_card_objects, visit_edges, Edge};
use crate::plan::tracing::ObjectMarker;
use crate::policy::space::ContinuousSpace;
use crate::util::metadata::card_table::age_card;
use crate::util::metadata::CardTable;
use crate::util::Address;
use crate::vm::VMBinding;
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;

/// The cards of one collected space that may refer into a target space.
///
/// Cards come from the card table. Each use rescans them, and cards found to hold no reference
/// into the target are forgotten.
pub struct RememberedSet<VM: VMBinding> {
    name: String,
    space_range: Range<Address>,
    dirty_cards: BTreeSet<Address>,
    _p: PhantomData<VM>,
}

impl<VM: VMBinding> RememberedSet<VM> {
    pub fn new(name: &str, space: &dyn ContinuousSpace) -> Self {
        RememberedSet {
            name: name.to_string(),
            space_range: space.begin()..space.limit(),
            dirty_cards: BTreeSet::new(),
            _p: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn space_range(&self) -> Range<Address> {
        self.space_range.clone()
    }

    /// Age the dirty cards of the space and add them to the set.
    pub fn clear_cards(&mut self, card_table: &CardTable) {
        let dirty_cards = &mut self.dirty_cards;
        card_table.modify_cards_atomic(
            self.space_range.start,
            self.space_range.end,
            age_card,
            |card, expected, _| {
                if expected == CardTable::CARD_DIRTY {
                    dirty_cards.insert(card);
                }
            },
        );
    }

    /// Mark every reference into `target` held by objects on the remembered cards. Referents of
    /// reference objects are delayed rather than marked. Cards without such a reference are
    /// dropped from the set.
    pub fn update_and_mark_references(
        &mut self,
        space: &dyn ContinuousSpace,
        target: Range<Address>,
        marker: &mut dyn ObjectMarker,
    ) {
        let before = self.dirty_cards.len();
        self.dirty_cards.retain(|&card| {
            let mut contains_reference_to_target = false;
            visit_card_objects(space, card, |object| {
                visit_edges::<VM, _>(object, |edge| {
                    let Some(referee) = edge.slot().load() else {
                        return;
                    };
                    if !target.contains(&referee.to_raw_address()) {
                        return;
                    }
                    match edge {
                        Edge::Field(slot) => marker.mark_heap_reference(slot),
                        Edge::Referent { reference, .. } => {
                            marker.delay_reference_referent(reference)
                        }
                    }
                    contains_reference_to_target = true;
                })
            });
            contains_reference_to_target
        });
        debug!(
            "{}: {} of {} cards refer to [{}, {})",
            self.name,
            self.dirty_cards.len(),
            before,
            target.start,
            target.end
        );
    }

    pub fn contains_card(&self, card: Address) -> bool {
        self.dirty_cards.contains(&card)
    }

    pub fn len(&self) -> usize {
        self.dirty_cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty_cards.is_empty()
    }

    pub fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "{} dirty cards: [", self.name)?;
        for card in &self.dirty_cards {
            write!(out, "{}, ", card)?;
        }
        writeln!(out, "]")
    }

    pub fn assert_all_dirty_cards_within_space(&self) {
        for card in &self.dirty_cards {
            assert!(
                self.space_range.contains(card),
                "{}: card {} outside [{}, {})",
                self.name,
                card,
                self.space_range.start,
                self.space_range.end
            );
        }
    }
}
