//! Rigid bodies: state, polygon paths, mass properties and scene assembly.

pub mod assembler;
pub mod body;
pub mod mass;
pub mod path;

pub use assembler::{assemble, AssembledBodies, AssemblyParams, AssemblyWarning, LinkDesc, RestLength, RigidBodyDesc};
pub use body::{BodyRender, Constraint, LinearMotor, LinkAnchors, Motion, RbData, RbVertexData, RigidBody, RigidBodyVertex};
pub use mass::{MassCache, MassProperties, ShapeKey, MIN_MASS_GRID_SPACING};
pub use path::Subdivision;
