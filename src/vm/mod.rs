//! The interface between the collector and the runtime that embeds it.
//!
//! A runtime implements [`VMBinding`] and the traits named by its associated types. All
//! methods are static: the collector never holds a runtime object, it only calls back into the
//! runtime through the binding type.

mod object_model;
mod reference_glue;
mod scanning;
pub mod slot;
mod vmbinding;

pub use self::object_model::ObjectModel;
pub use self::reference_glue::ReferenceGlue;
pub use self::reference_glue::ReferenceKind;
pub use self::scanning::Scanning;
pub use self::scanning::SlotVisitor;
pub use self::slot::SimpleSlot;
pub use self::vmbinding::VMBinding;
