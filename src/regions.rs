use std::collections::BTreeSet;

use nalgebra::DVector;

use crate::{
    datatypes::{AppliedForce, Circle, Vertex},
    geometry::{figure_edges, point_in_polygon},
    solver::DOF,
};

/// Slack added to the rivet radius when collecting pinned nodes
pub const RIVET_EPSILON: f64 = 1e-3;

/// Finds the nodes held by the rivets
///
/// # Arguments
/// * `circles` - The rivet holes
/// * `nodes` - The mesh nodes
/// * `epsilon` - Slack added to each radius
///
/// # Returns
/// Sorted, unique indexes of every node within `radius + epsilon` of a center
pub fn rivet_nodes(circles: &[Circle], nodes: &[Vertex], epsilon: f64) -> Vec<usize> {
    let mut indices: BTreeSet<usize> = BTreeSet::new();

    for circle in circles {
        for (i, node) in nodes.iter().enumerate() {
            if circle.center.distance(node) <= circle.radius + epsilon {
                indices.insert(i);
            }
        }
    }

    indices.into_iter().collect()
}

/// Finds the nodes inside the square the force is spread over
///
/// # Arguments
/// * `point` - Center of the square
/// * `nodes` - The mesh nodes
/// * `side_length` - Side of the square
pub fn force_nodes(point: &Vertex, nodes: &[Vertex], side_length: f64) -> Vec<usize> {
    let half = side_length / 2.0;
    let square = figure_edges(&[
        Vertex::new(point.x + half, point.y + half),
        Vertex::new(point.x - half, point.y + half),
        Vertex::new(point.x - half, point.y - half),
        Vertex::new(point.x + half, point.y - half),
    ]);

    nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| point_in_polygon(node, &square))
        .map(|(i, _)| i)
        .collect()
}

/// Per-node load as (magnitude, angle in radians)
///
/// Each force node carries the full magnitude; every other node is unloaded.
pub fn force_vector(node_count: usize, force_nodes: &[usize], force: &AppliedForce) -> Vec<(f64, f64)> {
    let mut forces = vec![(0.0, 0.0); node_count];
    for i in force_nodes {
        forces[*i] = (force.magnitude, force.angle_radians());
    }
    forces
}

/// Flattens polar nodal loads into interleaved (fx, fy) components
pub fn cartesian_forces(forces: &[(f64, f64)]) -> DVector<f64> {
    let mut flat = DVector::zeros(DOF * forces.len());
    for (i, (magnitude, angle)) in forces.iter().enumerate() {
        flat[DOF * i] = magnitude * angle.cos();
        flat[DOF * i + 1] = magnitude * angle.sin();
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_circle() -> Circle {
        Circle {
            center: Vertex::new(0.0, 0.0),
            radius: 1.0,
        }
    }

    #[test]
    fn test_rivet_nodes_threshold() {
        let edge = 1.0 + RIVET_EPSILON;
        let nodes = vec![
            Vertex::new(0.5, 0.0),
            Vertex::new(edge, 0.0),
            Vertex::new(edge + 1e-9, 0.0),
            Vertex::new(0.0, -edge),
            Vertex::new(3.0, 3.0),
        ];

        let rivets = rivet_nodes(&[unit_circle()], &nodes, RIVET_EPSILON);
        assert_eq!(rivets, vec![0, 1, 3]);
    }

    #[test]
    fn test_rivet_nodes_unique_across_circles() {
        let circles = [
            unit_circle(),
            Circle {
                center: Vertex::new(1.5, 0.0),
                radius: 1.0,
            },
        ];
        let nodes = vec![Vertex::new(0.75, 0.0), Vertex::new(2.5, 0.0)];
        assert_eq!(rivet_nodes(&circles, &nodes, RIVET_EPSILON), vec![0, 1]);
    }

    #[test]
    fn test_force_nodes_square() {
        let nodes = vec![
            Vertex::new(14.0, 10.0),
            Vertex::new(13.9, 9.9),
            Vertex::new(13.0, 10.0),
            Vertex::new(14.0, 9.0),
        ];
        let selected = force_nodes(&Vertex::new(14.0, 10.0), &nodes, 0.5);
        assert_eq!(selected, vec![0, 1]);
    }

    #[test]
    fn test_force_vector() {
        let force = AppliedForce::new(10.0, 90.0).unwrap();
        let polar = force_vector(3, &[1], &force);
        assert_eq!(polar[0], (0.0, 0.0));
        assert_relative_eq!(polar[1].1, std::f64::consts::FRAC_PI_2);

        let flat = cartesian_forces(&polar);
        assert_eq!(flat.len(), 6);
        assert_relative_eq!(flat[2], 0.0, epsilon = 1e-12);
        assert_relative_eq!(flat[3], 10.0);
        assert_eq!(flat[4], 0.0);
    }
}
