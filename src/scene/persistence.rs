//! Write-through of node state to persistent storage.

use crate::{
    fsc,
    geometry::Transform,
    scene::{CellKey, NodeTargetMethod, UpdateRate},
};
use anyhow::Result;
use std::fmt;

/// A piece of node state that is written to persistent storage when it
/// changes.
#[derive(Clone, Debug, PartialEq)]
pub enum PersistedField {
    CellTransform(Transform<fsc>),
    OffsetTransform(Transform<fsc>),
    Name(Option<String>),
    /// Reference ID of the new parent, or 0 for none.
    Parent(u32),
    /// Reference ID of the new owner group, or 0 for none.
    OwnerGroup(u32),
    Cell(CellKey),
    UpdateRate(UpdateRate),
    TargetMethod(NodeTargetMethod),
    Deleted,
}

/// Storage that node and cell mutations are written through to.
pub trait ScenePersistence: fmt::Debug {
    /// Writes the given field of the node or cell with the given reference
    /// ID.
    ///
    /// # Errors
    /// Returns an error if the write fails. The in-memory scene state has
    /// already been updated when this is called.
    fn persist(&mut self, reference_id: u32, field: &PersistedField) -> Result<()>;
}

/// Persistence that discards every write.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPersistence;

impl ScenePersistence for NoPersistence {
    fn persist(&mut self, _reference_id: u32, _field: &PersistedField) -> Result<()> {
        Ok(())
    }
}

impl PersistedField {
    /// A short name for the field, used in log messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::CellTransform(_) => "cell transform",
            Self::OffsetTransform(_) => "offset transform",
            Self::Name(_) => "name",
            Self::Parent(_) => "parent",
            Self::OwnerGroup(_) => "owner group",
            Self::Cell(_) => "cell",
            Self::UpdateRate(_) => "update rate",
            Self::TargetMethod(_) => "target method",
            Self::Deleted => "deletion",
        }
    }
}
