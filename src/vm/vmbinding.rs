use crate::vm::{ObjectModel, ReferenceGlue, Scanning};

/// The `VMBinding` trait associates with each trait, and provides VM-specific constants.
pub trait VMBinding
where
    Self: Sized + 'static + Send + Sync + Default,
{
    type VMObjectModel: ObjectModel<Self>;
    type VMScanning: Scanning<Self>;
    type VMReferenceGlue: ReferenceGlue<Self>;
}
