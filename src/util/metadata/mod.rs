//! Collector metadata kept outside the objects: per-space bitmaps and the card table.

pub mod card_table;
pub mod space_bitmap;

pub use self::card_table::CardTable;
pub use self::space_bitmap::{CardBitmap, ContinuousSpaceBitmap, SpaceBitmap};
