//! Hooks into external physics and navigation engines.

use crate::{fsc, geometry::Transform, scene::NodeID};
use nalgebra::{Point3, Vector3};
use std::fmt;

/// How a physics body responds to the simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyModel {
    RigidStatic,
    RigidDynamic,
    Kinematic,
    CharacterController,
}

/// Where a requested transform change originates. Passed by value along
/// every transform-setting call so each call site states which side effects
/// it expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformSource {
    /// Engine or editor code.
    Standard,
    /// The physics simulation moved the node's body. The body is not synced
    /// back and its mass is left alone.
    Dynamics,
    /// A navigation agent moved the node.
    Navigation,
    /// The deferred transform resolution recomputed the node's cell transform
    /// from its local transform. No further updates are deferred.
    TransformResolve,
}

/// A body owned by an external physics engine and bound to a single node.
pub trait PhysicsBody: fmt::Debug {
    fn model(&self) -> BodyModel;

    /// Moves the body to the given world transform.
    fn set_transform(&mut self, transform: &Transform<fsc>);

    fn mass(&self) -> fsc;

    fn set_mass(&mut self, mass: fsc);

    /// How strongly the node's scale affects the body's mass, from 0 (not at
    /// all) to 1 (proportionally along each axis).
    fn mass_transform_amount(&self) -> fsc;
}

/// An agent owned by an external navigation system and bound to a single
/// node.
pub trait NavigationAgent: fmt::Debug {
    fn set_position(&mut self, position: &Point3<fsc>);
}

/// Notification from a [`PhysicsWorld`] step.
#[derive(Clone, Debug, PartialEq)]
pub enum PhysicsEvent {
    BodyTransformed {
        node: NodeID,
        transform: Transform<fsc>,
    },
    CollisionBegin {
        node: NodeID,
        other: NodeID,
    },
    CollisionContinue {
        node: NodeID,
        other: NodeID,
    },
    CollisionEnd {
        node: NodeID,
        other: NodeID,
    },
    AgentReposition {
        node: NodeID,
        position: Point3<fsc>,
    },
}

/// An external physics engine stepped once per scene update.
pub trait PhysicsWorld: fmt::Debug {
    /// Advances the simulation and returns what happened to bound nodes.
    fn step(&mut self, time_delta: fsc) -> Vec<PhysicsEvent>;
}

/// Computes the mass of a body whose unscaled mass is `base_mass` when the
/// node it is bound to has the given world axis scaling.
pub fn scaled_mass(base_mass: fsc, scale: &Vector3<fsc>, mass_transform_amount: fsc) -> fsc {
    scale
        .iter()
        .fold(base_mass, |mass, &s| mass * (1.0 + (s - 1.0) * mass_transform_amount))
}
