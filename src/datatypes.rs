use nalgebra::{DVector, Vector3};

use crate::{error::FemError, geometry::point_in_polygon};

/// Mesh steps the bracket study may be generated with
pub const MESH_STEPS: [f64; 3] = [0.25, 0.5, 1.0];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

impl Vertex {
    pub fn new(x: f64, y: f64) -> Vertex {
        Vertex { x, y }
    }

    pub fn distance(&self, other: &Vertex) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Directed boundary segment of a polygon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub start: Vertex,
    pub end: Vertex,
}

/// A rivet hole cut out of the plate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Vertex,
    pub radius: f64,
}

impl Circle {
    /// Whether `vertex` sits on the circle's boundary within `tolerance`
    pub fn on_boundary(&self, vertex: &Vertex, tolerance: f64) -> bool {
        (self.center.distance(vertex) - self.radius).abs() < tolerance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    pub nodes: [usize; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
}

impl Material {
    /// Builds a material, rejecting constants outside of the plane stress domain
    pub fn new(youngs_modulus: f64, poisson_ratio: f64) -> Result<Material, FemError> {
        let material = Material {
            youngs_modulus,
            poisson_ratio,
        };
        material.validate()?;
        Ok(material)
    }

    pub fn validate(&self) -> Result<(), FemError> {
        if !self.youngs_modulus.is_finite() || self.youngs_modulus <= 0.0 {
            return Err(FemError::Validation(format!(
                "Young's modulus must be positive, got {}",
                self.youngs_modulus
            )));
        }
        if !(0.0..0.5).contains(&self.poisson_ratio) {
            return Err(FemError::Validation(format!(
                "Poisson ratio must lie in [0, 0.5), got {}",
                self.poisson_ratio
            )));
        }
        Ok(())
    }
}

/// External load: magnitude and direction in degrees from the x axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedForce {
    pub magnitude: f64,
    pub angle: f64,
}

impl AppliedForce {
    pub fn new(magnitude: f64, angle: f64) -> Result<AppliedForce, FemError> {
        let force = AppliedForce { magnitude, angle };
        force.validate()?;
        Ok(force)
    }

    pub fn validate(&self) -> Result<(), FemError> {
        if !self.magnitude.is_finite() || self.magnitude < 0.0 {
            return Err(FemError::Validation(format!(
                "Force magnitude must be non-negative, got {}",
                self.magnitude
            )));
        }
        if !(0.0..=360.0).contains(&self.angle) {
            return Err(FemError::Validation(format!(
                "Force angle must lie in [0, 360] degrees, got {}",
                self.angle
            )));
        }
        Ok(())
    }

    pub fn angle_radians(&self) -> f64 {
        self.angle.to_radians()
    }
}

/// Plate outline, rivet holes and load point
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    /// Ordered polygon vertices; the closing edge is implied
    pub outline: Vec<Vertex>,
    pub rivet_centers: Vec<Vertex>,
    pub rivet_radius: f64,
    /// Center of the square region the force is applied over
    pub force_point: Vertex,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mesh {
    pub nodes: Vec<Vertex>,
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeshSource {
    /// Grid based mesh built from the geometry at the study step
    Generated,
    /// Mesh supplied wholesale by an importer
    External(Mesh),
}

/// Every input of a single analysis run
#[derive(Debug, Clone, PartialEq)]
pub struct Study {
    pub geometry: Geometry,
    pub material: Material,
    pub part_thickness: f64,
    pub force: AppliedForce,
    pub mesh_step: f64,
    pub mesh_source: MeshSource,
}

impl Study {
    pub fn validate(&self) -> Result<(), FemError> {
        self.material.validate()?;
        self.force.validate()?;

        if !(self.part_thickness > 0.0 && self.part_thickness <= 1.0) {
            return Err(FemError::Validation(format!(
                "Part thickness must lie in (0, 1], got {}",
                self.part_thickness
            )));
        }
        if !self.mesh_step.is_finite() || self.mesh_step <= 0.0 {
            return Err(FemError::Validation(format!(
                "Mesh step must be positive, got {}",
                self.mesh_step
            )));
        }
        if self.geometry.outline.len() < 3 {
            return Err(FemError::Geometry(format!(
                "Outline needs at least 3 vertices, got {}",
                self.geometry.outline.len()
            )));
        }
        if !self.geometry.rivet_centers.is_empty() && self.geometry.rivet_radius <= 0.0 {
            return Err(FemError::Geometry(format!(
                "Rivet radius must be positive, got {}",
                self.geometry.rivet_radius
            )));
        }
        let edges = self.geometry.edges();
        if let Some(center) = self
            .geometry
            .rivet_centers
            .iter()
            .find(|c| !point_in_polygon(c, &edges))
        {
            return Err(FemError::Geometry(format!(
                "Rivet center ({}, {}) lies outside the outline",
                center.x, center.y
            )));
        }

        Ok(())
    }
}

/// Everything a renderer needs from a finished run
#[derive(Debug, Clone)]
pub struct Solution {
    pub nodes: Vec<Vertex>,
    pub displaced_nodes: Vec<Vertex>,
    /// Nodal (ux, uy), aligned with `nodes`
    pub displacements: Vec<[f64; 2]>,
    pub elements: Vec<Element>,
    pub rivet_nodes: Vec<usize>,
    pub force_nodes: Vec<usize>,
    /// Cartesian nodal forces as solved for, pinned entries zeroed
    pub forces: DVector<f64>,
    pub stresses: Vec<Vector3<f64>>,
    pub strains: Vec<Vector3<f64>>,
    pub equivalent_stresses: Vec<f64>,
    pub equivalent_strains: Vec<f64>,
}
