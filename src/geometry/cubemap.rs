//! Cubemap faces and their adjacency.

use crate::num::Float;
use nalgebra::Vector3;

/// A face of a cubemap.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CubemapFace {
    PositiveX = 0,
    NegativeX = 1,
    PositiveY = 2,
    NegativeY = 3,
    PositiveZ = 4,
    NegativeZ = 5,
}

/// The orthonormal basis of the camera rendering a cubemap face. `look` is
/// the viewing direction through the face center.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceOrientation<F: Float> {
    pub right: Vector3<F>,
    pub up: Vector3<F>,
    pub look: Vector3<F>,
}

use CubemapFace::{NegativeX, NegativeY, NegativeZ, PositiveX, PositiveY, PositiveZ};

// Top, right, bottom and left neighbor of each face, in face order.
const NEIGHBORS: [[CubemapFace; 4]; 6] = [
    [PositiveY, NegativeZ, NegativeY, PositiveZ],
    [PositiveY, PositiveZ, NegativeY, NegativeZ],
    [NegativeZ, PositiveX, PositiveZ, NegativeX],
    [PositiveZ, PositiveX, NegativeZ, NegativeX],
    [PositiveY, PositiveX, NegativeY, NegativeX],
    [PositiveY, NegativeX, NegativeY, PositiveX],
];

// Right, up and look axis of each face as signed axis indices.
const ORIENTATIONS: [[(usize, i8); 3]; 6] = [
    [(2, -1), (1, 1), (0, 1)],
    [(2, 1), (1, 1), (0, -1)],
    [(0, 1), (2, -1), (1, 1)],
    [(0, 1), (2, 1), (1, -1)],
    [(0, 1), (1, 1), (2, 1)],
    [(0, -1), (1, 1), (2, -1)],
];

impl CubemapFace {
    /// Returns an array with each face in the conventional order.
    pub const fn all() -> [Self; 6] {
        [
            PositiveX, NegativeX, PositiveY, NegativeY, PositiveZ, NegativeZ,
        ]
    }

    /// Returns the face with the given conventional index.
    ///
    /// # Panics
    /// If `idx` exceeds 5.
    pub fn from_idx(idx: usize) -> Self {
        Self::all()[idx]
    }

    pub const fn as_idx_usize(&self) -> usize {
        *self as usize
    }

    /// Returns the face pointing the opposite way.
    pub const fn opposite(&self) -> Self {
        match self {
            PositiveX => NegativeX,
            NegativeX => PositiveX,
            PositiveY => NegativeY,
            NegativeY => PositiveY,
            PositiveZ => NegativeZ,
            NegativeZ => PositiveZ,
        }
    }

    /// Returns the four faces sharing an edge with this face, in the order
    /// top, right, bottom, left as seen by the face camera.
    pub const fn neighbors(&self) -> [Self; 4] {
        NEIGHBORS[*self as usize]
    }

    /// Whether the given face shares an edge with this face.
    pub fn is_adjacent_to(&self, other: Self) -> bool {
        self.neighbors().contains(&other)
    }

    /// Returns the camera basis used when rendering this face.
    pub fn orientation<F: Float>(&self) -> FaceOrientation<F> {
        let axis = |(idx, sign): (usize, i8)| {
            let mut vector = Vector3::zeros();
            vector[idx] = if sign > 0 { F::ONE } else { F::NEG_ONE };
            vector
        };
        let [right, up, look] = ORIENTATIONS[*self as usize];
        FaceOrientation {
            right: axis(right),
            up: axis(up),
            look: axis(look),
        }
    }
}
