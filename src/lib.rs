//! Plane stress finite element analysis of a riveted bracket.
//!
//! The pipeline meshes the plate (or takes an imported mesh), pins the nodes
//! held by the rivets, loads the nodes around the force point, solves for the
//! nodal displacements with conjugate gradient and recovers per-element
//! stress and strain with constant strain triangles.

pub mod config;
pub mod datatypes;
pub mod error;
pub mod geometry;
pub mod mesher;
pub mod post_processor;
pub mod regions;
pub mod solver;

pub use datatypes::{
    AppliedForce, Circle, Edge, Element, Geometry, Material, Mesh, MeshSource, Solution, Study,
    Vertex,
};
pub use error::FemError;
pub use solver::{run, SolverSettings};
