//! Scene graph core with deferred node update resolution and multi-pass
//! point light shadowing.

#[macro_use]
mod macros;

pub mod config;
pub mod context;
pub mod geometry;
pub mod io;
pub mod light;
pub mod num;
pub mod run;
pub mod scene;

/// Floating point type used for scene computations.
#[allow(non_camel_case_types)]
pub type fsc = f64;
