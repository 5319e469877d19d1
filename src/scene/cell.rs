//! Grid cells partitioning the scene's root-level nodes.

use crate::{
    fsc,
    geometry::AxisAlignedBox,
    scene::NodeID,
};
use nalgebra::{Point3, Vector3};
use std::collections::BTreeSet;

/// Integer grid coordinates of a [`SceneCell`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellKey {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

/// A bucket of root-level nodes whose world position falls within one grid
/// cell. Cell transforms of nodes in the cell are relative to the cell's
/// world origin.
#[derive(Clone, Debug)]
pub struct SceneCell {
    reference_id: u32,
    key: CellKey,
    nodes: BTreeSet<NodeID>,
    has_custom_data: bool,
}

impl CellKey {
    pub const fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }

    /// Finds the key of the cell containing the given world position. Cells
    /// are centered on their origin, so each coordinate is rounded half away
    /// from zero.
    pub fn for_position(position: &Point3<fsc>, cell_size: &Vector3<fsc>) -> Self {
        let offset = |coord: fsc, size: fsc| -> i16 {
            let scaled = coord / size;
            let rounded = if scaled >= 0.0 {
                scaled + 0.5
            } else {
                scaled - 0.5
            };
            // Saturating conversion; truncation toward zero completes the
            // rounding.
            rounded as i16
        };
        Self::new(
            offset(position.x, cell_size.x),
            offset(position.y, cell_size.y),
            offset(position.z, cell_size.z),
        )
    }

    /// Returns the world space position of the origin of the cell with this
    /// key.
    pub fn world_origin(&self, cell_size: &Vector3<fsc>) -> Vector3<fsc> {
        Vector3::new(
            fsc::from(self.x) * cell_size.x,
            fsc::from(self.y) * cell_size.y,
            fsc::from(self.z) * cell_size.z,
        )
    }
}

impl SceneCell {
    pub fn new(reference_id: u32, key: CellKey) -> Self {
        Self {
            reference_id,
            key,
            nodes: BTreeSet::new(),
            has_custom_data: false,
        }
    }

    pub fn reference_id(&self) -> u32 {
        self.reference_id
    }

    pub fn key(&self) -> CellKey {
        self.key
    }

    pub fn world_origin(&self, cell_size: &Vector3<fsc>) -> Vector3<fsc> {
        self.key.world_origin(cell_size)
    }

    /// Returns the world space box covered by the cell.
    pub fn bounding_box(&self, cell_size: &Vector3<fsc>) -> AxisAlignedBox<fsc> {
        AxisAlignedBox::from_center_and_half_extents(
            Point3::from(self.world_origin(cell_size)),
            cell_size * 0.5,
        )
    }

    /// Whether the cell holds data of its own that must outlive its nodes.
    pub fn has_custom_data(&self) -> bool {
        self.has_custom_data
    }

    pub fn set_has_custom_data(&mut self, has_custom_data: bool) {
        self.has_custom_data = has_custom_data;
    }

    pub fn add_node(&mut self, node: NodeID) {
        self.nodes.insert(node);
    }

    pub fn remove_node(&mut self, node: NodeID) -> bool {
        self.nodes.remove(&node)
    }

    pub fn contains_node(&self, node: NodeID) -> bool {
        self.nodes.contains(&node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeID> + '_ {
        self.nodes.iter().copied()
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the cell holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector};

    #[test]
    fn cell_key_rounds_half_away_from_zero() {
        let size = vector![10.0, 10.0, 10.0];
        assert_eq!(CellKey::for_position(&point![0.0, 4.9, -4.9], &size), CellKey::new(0, 0, 0));
        assert_eq!(CellKey::for_position(&point![5.0, -5.0, 14.9], &size), CellKey::new(1, -1, 1));
        assert_eq!(CellKey::for_position(&point![15.0, -15.1, 0.0], &size), CellKey::new(2, -2, 0));
    }

    #[test]
    fn cell_key_respects_anisotropic_cell_size() {
        let size = vector![2.0, 100.0, 1.0];
        assert_eq!(CellKey::for_position(&point![3.0, 3.0, 3.0], &size), CellKey::new(2, 0, 3));
    }

    #[test]
    fn cell_bounds_are_centered_on_origin() {
        let size = vector![10.0, 20.0, 10.0];
        let cell = SceneCell::new(1, CellKey::new(1, -1, 0));
        assert_abs_diff_eq!(cell.world_origin(&size), vector![10.0, -20.0, 0.0]);
        let bounds = cell.bounding_box(&size);
        assert_abs_diff_eq!(bounds.lower_corner(), &point![5.0, -30.0, -5.0]);
        assert_abs_diff_eq!(bounds.upper_corner(), &point![15.0, -10.0, 5.0]);
    }
}
