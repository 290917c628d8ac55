use std::collections::BTreeMap;

use delaunator::Point;

use crate::{
    datatypes::{Circle, Edge, Element, Geometry, Mesh, Vertex},
    error::FemError,
    geometry::{point_in_polygon, segment_circle_intersect, segment_intersect},
};

/// Distance from a circle within which a node counts as on the hole boundary
pub const CIRCLE_BOUNDARY_TOLERANCE: f64 = 1e-5;

/// Coordinate quantum nodes are merged on
pub const MERGE_QUANTUM: f64 = 1e-8;

/// Imported coordinates are stored in meters, the model works in centimeters
pub const IMPORT_SCALE: f64 = 100.0;

/// Triangles flatter than this, relative to their longest edge, are dropped
const SLIVER_TOLERANCE: f64 = 1e-12;

/// Regular background grid and the points where it crosses the boundary
#[derive(Debug, Clone)]
pub struct BackgroundMesh {
    /// Every grid point, row by row
    pub grid: Vec<Vertex>,
    /// Deduplicated grid/edge and grid/circle crossings
    pub intersections: Vec<Vertex>,
}

/// Evenly spaced coordinates covering `[min, max]`, both ends included
fn axis_ticks(min: f64, max: f64, step: f64) -> Vec<f64> {
    let count = ((max - min) / step - 1e-9).ceil().max(0.0) as usize + 1;
    (0..count).map(|i| min + i as f64 * step).collect()
}

fn merge_key(vertex: &Vertex) -> (i64, i64) {
    (
        (vertex.x / MERGE_QUANTUM).round() as i64,
        (vertex.y / MERGE_QUANTUM).round() as i64,
    )
}

/// Merges points that share a quantized position
///
/// # Returns
/// The surviving points, sorted by x then y
pub fn dedup_vertices(vertices: impl IntoIterator<Item = Vertex>) -> Vec<Vertex> {
    let mut unique: BTreeMap<(i64, i64), Vertex> = BTreeMap::new();
    for vertex in vertices {
        unique.entry(merge_key(&vertex)).or_insert(vertex);
    }
    unique.into_values().collect()
}

/// Builds the background grid and intersects its cell sides with the
/// outline and the rivet circles
///
/// # Arguments
/// * `edges` - The outline edges
/// * `circles` - The rivet holes
/// * `step` - Grid spacing
pub fn create_mesh(
    edges: &[Edge],
    circles: &[Circle],
    step: f64,
) -> Result<BackgroundMesh, FemError> {
    if !step.is_finite() || step <= 0.0 {
        return Err(FemError::Validation(format!(
            "Mesh step must be positive, got {step}"
        )));
    }
    if edges.is_empty() {
        return Err(FemError::Geometry("Outline has no edges".to_owned()));
    }

    let (mut x_min, mut x_max) = (f64::MAX, f64::MIN);
    let (mut y_min, mut y_max) = (f64::MAX, f64::MIN);
    for edge in edges {
        for v in [edge.start, edge.end] {
            x_min = x_min.min(v.x);
            x_max = x_max.max(v.x);
            y_min = y_min.min(v.y);
            y_max = y_max.max(v.y);
        }
    }

    let xs = axis_ticks(x_min, x_max, step);
    let ys = axis_ticks(y_min, y_max, step);

    let grid: Vec<Vertex> = ys
        .iter()
        .flat_map(|y| xs.iter().map(move |x| Vertex::new(*x, *y)))
        .collect();

    // Every side of every grid cell
    let mut cell_sides: Vec<Edge> = Vec::new();
    for (j, y) in ys.iter().enumerate() {
        for (i, x) in xs.iter().enumerate() {
            if i + 1 < xs.len() {
                cell_sides.push(Edge {
                    start: Vertex::new(*x, *y),
                    end: Vertex::new(xs[i + 1], *y),
                });
            }
            if j + 1 < ys.len() {
                cell_sides.push(Edge {
                    start: Vertex::new(*x, *y),
                    end: Vertex::new(*x, ys[j + 1]),
                });
            }
        }
    }

    let mut intersections: Vec<Vertex> = Vec::new();
    for edge in edges {
        intersections.extend(cell_sides.iter().filter_map(|s| segment_intersect(edge, s)));
    }
    for circle in circles {
        intersections.extend(
            cell_sides
                .iter()
                .filter_map(|s| segment_circle_intersect(s, circle)),
        );
    }

    Ok(BackgroundMesh {
        grid,
        intersections: dedup_vertices(intersections),
    })
}

/// Selects the final node set from a background mesh
///
/// Outline vertices, boundary crossings, grid points strictly inside the
/// material and nodes on a hole boundary are merged; rivet centers are never
/// nodes.
pub fn filter_nodes(background: &BackgroundMesh, edges: &[Edge], circles: &[Circle]) -> Vec<Vertex> {
    let all_nodes = dedup_vertices(
        background
            .intersections
            .iter()
            .copied()
            .chain(edges.iter().flat_map(|e| [e.start, e.end])),
    );

    let inside_mesh_nodes = background.grid.iter().copied().filter(|node| {
        point_in_polygon(node, edges)
            && !circles
                .iter()
                .any(|circle| circle.center.distance(node) <= circle.radius)
    });

    let circle_boundary_nodes: Vec<Vertex> = circles
        .iter()
        .flat_map(|circle| {
            all_nodes
                .iter()
                .copied()
                .filter(move |node| circle.on_boundary(node, CIRCLE_BOUNDARY_TOLERANCE))
        })
        .collect();

    let center_keys: Vec<(i64, i64)> = circles.iter().map(|c| merge_key(&c.center)).collect();

    dedup_vertices(
        all_nodes
            .iter()
            .copied()
            .chain(inside_mesh_nodes)
            .chain(circle_boundary_nodes),
    )
    .into_iter()
    .filter(|node| !center_keys.contains(&merge_key(node)))
    .collect()
}

fn is_sliver(nodes: &[Vertex], triangle: &[usize; 3]) -> bool {
    let [a, b, c] = triangle.map(|i| nodes[i]);
    let double_area = ((b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y)).abs();
    let longest = a.distance(&b).max(b.distance(&c)).max(c.distance(&a));
    double_area <= SLIVER_TOLERANCE * longest * longest
}

/// Delaunay triangles of a point set, as index triples into `nodes`
fn delaunay_triangles(nodes: &[Vertex]) -> Result<Vec<[usize; 3]>, FemError> {
    if nodes.len() < 3 {
        return Err(FemError::Geometry(format!(
            "Cannot triangulate {} nodes",
            nodes.len()
        )));
    }

    let points: Vec<Point> = nodes.iter().map(|v| Point { x: v.x, y: v.y }).collect();
    let triangulation = delaunator::triangulate(&points);
    if triangulation.triangles.is_empty() {
        return Err(FemError::Geometry(
            "All nodes are collinear; no triangles produced".to_owned(),
        ));
    }

    Ok(triangulation
        .triangles
        .chunks_exact(3)
        .map(|t| [t[0], t[1], t[2]])
        .collect())
}

/// Triangulates the node set and drops triangles that only span a hole
///
/// # Arguments
/// * `nodes` - The filtered node set
/// * `circles` - The rivet holes
///
/// # Returns
/// Elements indexing into `nodes`
pub fn triangulate(nodes: &[Vertex], circles: &[Circle]) -> Result<Vec<Element>, FemError> {
    let triangles = delaunay_triangles(nodes)?;

    Ok(triangles
        .into_iter()
        .filter(|t| !is_sliver(nodes, t))
        .filter(|t| {
            !circles.iter().any(|circle| {
                t.iter()
                    .all(|i| circle.on_boundary(&nodes[*i], CIRCLE_BOUNDARY_TOLERANCE))
            })
        })
        .map(|t| Element { nodes: t })
        .collect())
}

/// Runs the mesher on a geometry
///
/// # Arguments
/// * `geometry` - Outline and rivet holes
/// * `step` - Grid spacing
pub fn run(geometry: &Geometry, step: f64) -> Result<Mesh, FemError> {
    let edges = geometry.edges();
    let circles = geometry.circles();

    let background = create_mesh(&edges, &circles, step)?;
    let nodes = filter_nodes(&background, &edges, &circles);
    let elements = triangulate(&nodes, &circles)?;

    Ok(Mesh { nodes, elements })
}

fn parse_number<T: std::str::FromStr>(value: &str, line_number: usize) -> Result<T, FemError> {
    value.replace(',', ".").parse().map_err(|_| {
        FemError::Input(format!(
            "Non-numeric value '{value}' on line {line_number}"
        ))
    })
}

/// Parses an exported node list: a header line, then `id x y z` rows
///
/// # Returns
/// The nodes in file order, x and y scaled to model units
pub fn parse_node_file(contents: &str) -> Result<Vec<Vertex>, FemError> {
    let mut nodes: Vec<Vertex> = Vec::new();

    for (i, line) in contents.lines().enumerate().skip(1) {
        let line_number = i + 1;
        if line.trim().is_empty() {
            continue;
        }

        let values: Vec<&str> = line.split_whitespace().collect();
        if values.len() != 4 {
            return Err(FemError::Input(format!(
                "Malformed node file: expected 4 fields on line {line_number}, found {}",
                values.len()
            )));
        }

        let x: f64 = parse_number(values[1], line_number)?;
        let y: f64 = parse_number(values[2], line_number)?;
        nodes.push(Vertex::new(x * IMPORT_SCALE, y * IMPORT_SCALE));
    }

    Ok(nodes)
}

/// Parses an exported element list: a header line, then `id extra n1 n2 n3`
/// rows with 1-based node numbers
pub fn parse_element_file(contents: &str) -> Result<Vec<Element>, FemError> {
    let mut elements: Vec<Element> = Vec::new();

    for (i, line) in contents.lines().enumerate().skip(1) {
        let line_number = i + 1;
        if line.trim().is_empty() {
            continue;
        }

        let values: Vec<&str> = line.split_whitespace().collect();
        if values.len() != 5 {
            return Err(FemError::Input(format!(
                "Malformed element file: expected 5 fields on line {line_number}, found {}",
                values.len()
            )));
        }

        let mut nodes = [0usize; 3];
        for (slot, value) in nodes.iter_mut().zip(&values[2..5]) {
            let number: usize = parse_number(value, line_number)?;
            if number == 0 {
                return Err(FemError::Input(format!(
                    "Node numbers are 1-based; found 0 on line {line_number}"
                )));
            }
            *slot = number - 1;
        }

        elements.push(Element { nodes });
    }

    Ok(elements)
}

/// Checks that every element addresses existing, distinct nodes
pub fn validate_mesh(mesh: &Mesh) -> Result<(), FemError> {
    if mesh.elements.is_empty() {
        return Err(FemError::Geometry("Mesh has no elements".to_owned()));
    }

    for (i, element) in mesh.elements.iter().enumerate() {
        if let Some(n) = element.nodes.iter().find(|n| **n >= mesh.nodes.len()) {
            return Err(FemError::Geometry(format!(
                "Element {i} references node {n}, mesh has {} nodes",
                mesh.nodes.len()
            )));
        }
        let [a, b, c] = element.nodes;
        if a == b || b == c || a == c {
            return Err(FemError::Geometry(format!(
                "Element {i} repeats a node: {:?}",
                element.nodes
            )));
        }
    }

    Ok(())
}

/// Loads a mesh exported by an external pre-processor
///
/// # Arguments
/// * `nodes_file` - Path to the node list
/// * `elements_file` - Path to the element list
pub fn load_external_mesh(nodes_file: &str, elements_file: &str) -> Result<Mesh, FemError> {
    let read = |path: &str| {
        std::fs::read_to_string(path)
            .map_err(|err| FemError::Input(format!("Unable to open mesh file {path}: {err}")))
    };

    let mesh = Mesh {
        nodes: parse_node_file(&read(nodes_file)?)?,
        elements: parse_element_file(&read(elements_file)?)?,
    };
    validate_mesh(&mesh)?;

    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::figure_edges;
    use approx::assert_relative_eq;

    fn rectangle() -> Vec<Edge> {
        figure_edges(&[
            Vertex::new(0.0, 0.0),
            Vertex::new(0.0, 2.0),
            Vertex::new(3.0, 2.0),
            Vertex::new(3.0, 0.0),
        ])
    }

    fn element_area(nodes: &[Vertex], element: &Element) -> f64 {
        let [a, b, c] = element.nodes.map(|i| nodes[i]);
        0.5 * ((b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y)).abs()
    }

    #[test]
    fn test_axis_ticks_inclusive() {
        assert_eq!(axis_ticks(0.0, 2.0, 1.0), vec![0.0, 1.0, 2.0]);
        assert_eq!(axis_ticks(0.0, 14.0, 0.25).len(), 57);
        // a step that does not divide the span still covers the maximum
        let ticks = axis_ticks(0.0, 1.0, 0.4);
        assert!(*ticks.last().unwrap() >= 1.0);
    }

    #[test]
    fn test_dedup_merges_close_points() {
        let merged = dedup_vertices(vec![
            Vertex::new(1.0, 1.0),
            Vertex::new(0.0, 2.0),
            Vertex::new(1.0 + 1e-12, 1.0 - 1e-12),
        ]);
        assert_eq!(merged, vec![Vertex::new(0.0, 2.0), Vertex::new(1.0, 1.0)]);
    }

    #[test]
    fn test_rectangle_background_mesh() {
        let background = create_mesh(&rectangle(), &[], 1.0).unwrap();
        assert_eq!(background.grid.len(), 12);
        // every boundary grid point is hit by some cell side
        assert_eq!(background.intersections.len(), 10);
    }

    #[test]
    fn test_rectangle_nodes() {
        let edges = rectangle();
        let background = create_mesh(&edges, &[], 1.0).unwrap();
        let nodes = filter_nodes(&background, &edges, &[]);
        assert_eq!(nodes.len(), 12);
    }

    #[test]
    fn test_rectangle_tessellation() {
        let edges = rectangle();
        let background = create_mesh(&edges, &[], 1.0).unwrap();
        let nodes = filter_nodes(&background, &edges, &[]);
        let elements = triangulate(&nodes, &[]).unwrap();

        assert_eq!(elements.len(), 12);
        let total: f64 = elements.iter().map(|e| element_area(&nodes, e)).sum();
        assert_relative_eq!(total, 6.0, epsilon = 1e-9);
    }

    #[test]
    fn test_grid_is_tessellated() {
        let mut nodes = Vec::new();
        for j in 0..5 {
            for i in 0..6 {
                nodes.push(Vertex::new(i as f64 * 0.5, j as f64 * 0.5));
            }
        }
        let elements = triangulate(&nodes, &[]).unwrap();

        // 5 x 4 cells, two triangles each
        assert_eq!(elements.len(), 40);
        let total: f64 = elements.iter().map(|e| element_area(&nodes, e)).sum();
        assert_relative_eq!(total, 2.5 * 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_collinear_nodes_rejected() {
        let nodes = vec![
            Vertex::new(0.0, 0.0),
            Vertex::new(1.0, 0.0),
            Vertex::new(2.0, 0.0),
        ];
        assert!(matches!(
            triangulate(&nodes, &[]),
            Err(FemError::Geometry(_))
        ));
        assert!(matches!(
            triangulate(&nodes[..2], &[]),
            Err(FemError::Geometry(_))
        ));
    }

    #[test]
    fn test_rivet_centers_are_not_nodes() {
        let geometry = Geometry::bracket();
        let mesh = run(&geometry, 0.5).unwrap();

        for center in &geometry.rivet_centers {
            assert!(mesh.nodes.iter().all(|n| n.distance(center) > 1e-6));
        }
        // no node strictly inside a hole
        for circle in geometry.circles() {
            assert!(mesh
                .nodes
                .iter()
                .all(|n| circle.center.distance(n) >= circle.radius - CIRCLE_BOUNDARY_TOLERANCE));
        }
    }

    #[test]
    fn test_hole_triangles_removed() {
        let geometry = Geometry::bracket();
        let mesh = run(&geometry, 0.5).unwrap();
        let circles = geometry.circles();

        for element in &mesh.elements {
            for circle in &circles {
                assert!(!element
                    .nodes
                    .iter()
                    .all(|i| circle.on_boundary(&mesh.nodes[*i], CIRCLE_BOUNDARY_TOLERANCE)));
            }
        }
    }

    #[test]
    fn test_bracket_mesh_covers_plate_minus_holes() {
        let geometry = Geometry::bracket();
        let mesh = run(&geometry, 0.25).unwrap();

        let total: f64 = mesh
            .elements
            .iter()
            .map(|e| element_area(&mesh.nodes, e))
            .sum();

        // 14 x 10 plate with a 6 x 4.5 chamfer triangle removed
        let plate = 140.0 - 0.5 * 6.0 * 4.5;
        let holes = 4.0 * std::f64::consts::PI;
        // holes are polygonal, so slightly less area is cut out
        assert!(total < plate);
        assert!(total > plate - holes - 0.1);
    }

    #[test]
    fn test_invalid_step() {
        assert!(matches!(
            create_mesh(&rectangle(), &[], 0.0),
            Err(FemError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_node_file() {
        let contents = "NODE X Y Z\n1 0,01 0.02 0\n2 0.5 0 0\n\n";
        let nodes = parse_node_file(contents).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_relative_eq!(nodes[0].x, 1.0);
        assert_relative_eq!(nodes[0].y, 2.0);
        assert_relative_eq!(nodes[1].x, 50.0);
    }

    #[test]
    fn test_parse_node_file_bad_row() {
        let contents = "NODE X Y Z\n1 0.01 0.02\n";
        assert!(matches!(parse_node_file(contents), Err(FemError::Input(_))));
        let contents = "NODE X Y Z\n1 a 0.02 0\n";
        assert!(matches!(parse_node_file(contents), Err(FemError::Input(_))));
    }

    #[test]
    fn test_parse_element_file() {
        let contents = "ELEM MAT N1 N2 N3\n1 1 1 2 3\n2 1 2 4 3\n";
        let elements = parse_element_file(contents).unwrap();
        assert_eq!(elements[0].nodes, [0, 1, 2]);
        assert_eq!(elements[1].nodes, [1, 3, 2]);

        assert!(matches!(
            parse_element_file("ELEM\n1 1 0 2 3\n"),
            Err(FemError::Input(_))
        ));
        assert!(matches!(
            parse_element_file("ELEM\n1 1 2 3\n"),
            Err(FemError::Input(_))
        ));
    }

    #[test]
    fn test_validate_mesh_out_of_range() {
        let mesh = Mesh {
            nodes: vec![Vertex::new(0.0, 0.0), Vertex::new(1.0, 0.0)],
            elements: vec![Element { nodes: [0, 1, 2] }],
        };
        assert!(matches!(validate_mesh(&mesh), Err(FemError::Geometry(_))));
    }
}
