use crate::datatypes::{Circle, Edge, Geometry, Vertex};

impl Geometry {
    /// The riveted bracket: a 14 x 10 plate with a chamfered corner and four
    /// rivet holes, loaded at its top right corner.
    pub fn bracket() -> Geometry {
        let (a, b, c, d, e, f, g) = (10.0, 8.0, 6.0, 5.5, 1.0, 1.5, 1.5);
        let h = b + c;

        Geometry {
            outline: vec![
                Vertex::new(0.0, 0.0),
                Vertex::new(0.0, a),
                Vertex::new(h, a),
                Vertex::new(h, a - d),
                Vertex::new(b, 0.0),
            ],
            rivet_centers: vec![
                Vertex::new(f, a - g),
                Vertex::new(b - f, a - g),
                Vertex::new(f, g),
                Vertex::new(b - f, g),
            ],
            rivet_radius: e,
            force_point: Vertex::new(h, a),
        }
    }

    pub fn edges(&self) -> Vec<Edge> {
        figure_edges(&self.outline)
    }

    pub fn circles(&self) -> Vec<Circle> {
        build_circles(&self.rivet_centers, self.rivet_radius)
    }
}

/// Connects an ordered vertex list into a closed loop of edges
///
/// # Arguments
/// * `vertices` - Polygon vertices, in order
///
/// # Returns
/// One edge per vertex, the last one closing back onto the first
pub fn figure_edges(vertices: &[Vertex]) -> Vec<Edge> {
    let n = vertices.len();
    (0..n)
        .map(|i| Edge {
            start: vertices[i],
            end: vertices[(i + 1) % n],
        })
        .collect()
}

pub fn build_circles(centers: &[Vertex], radius: f64) -> Vec<Circle> {
    centers
        .iter()
        .map(|center| Circle {
            center: *center,
            radius,
        })
        .collect()
}

/// Finds the intersection point of two segments
///
/// Parallel segments (including collinear, overlapping ones) never report
/// an intersection.
///
/// # Returns
/// The intersection point, if both segment parameters lie within [0, 1]
pub fn segment_intersect(s1: &Edge, s2: &Edge) -> Option<Vertex> {
    let (x1, y1, x2, y2) = (s1.start.x, s1.start.y, s1.end.x, s1.end.y);
    let (x3, y3, x4, y4) = (s2.start.x, s2.start.y, s2.end.x, s2.end.y);

    let den = (x1 - x2) * (y3 - y4) - (y1 - y2) * (x3 - x4);
    if den == 0.0 {
        return None;
    }

    let t = ((x1 - x3) * (y3 - y4) - (y1 - y3) * (x3 - x4)) / den;
    let u = -((x1 - x2) * (y1 - y3) - (y1 - y2) * (x1 - x3)) / den;

    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(Vertex::new(x1 + t * (x2 - x1), y1 + t * (y2 - y1)))
    } else {
        None
    }
}

/// Finds where a segment crosses a circle
///
/// At most one point is reported: the root further along the segment is
/// preferred, the nearer one is the fallback. A tangent segment yields the
/// single point of tangency.
pub fn segment_circle_intersect(segment: &Edge, circle: &Circle) -> Option<Vertex> {
    let (x1, y1) = (segment.start.x, segment.start.y);
    let (x3, y3) = (circle.center.x, circle.center.y);

    let dx = segment.end.x - x1;
    let dy = segment.end.y - y1;

    let a = dx * dx + dy * dy;
    if a == 0.0 {
        return None;
    }
    let b = 2.0 * (dx * (x1 - x3) + dy * (y1 - y3));
    let c = (x1 - x3).powi(2) + (y1 - y3).powi(2) - circle.radius.powi(2);

    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return None;
    }

    let point_at = |t: f64| -> Option<Vertex> {
        if (0.0..=1.0).contains(&t) {
            Some(Vertex::new(x1 + t * dx, y1 + t * dy))
        } else {
            None
        }
    };

    if discriminant == 0.0 {
        return point_at(-b / (2.0 * a));
    }

    let root = discriminant.sqrt();
    point_at((-b + root) / (2.0 * a)).or_else(|| point_at((-b - root) / (2.0 * a)))
}

/// Ray casting parity test
///
/// Horizontal edges never toggle the parity. Points on the left/bottom of
/// the boundary are not guaranteed to count as inside.
pub fn point_in_polygon(point: &Vertex, edges: &[Edge]) -> bool {
    let (x, y) = (point.x, point.y);
    let mut is_inside = false;

    for edge in edges {
        let (x1, y1) = (edge.start.x, edge.start.y);
        let (x2, y2) = (edge.end.x, edge.end.y);

        if y1 == y2 {
            continue;
        }

        let spans = (y1 < y && y <= y2) || (y2 < y && y <= y1);
        if spans && x < (x2 - x1) * (y - y1) / (y2 - y1) + x1 {
            is_inside = !is_inside;
        }
    }

    is_inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn edge(x1: f64, y1: f64, x2: f64, y2: f64) -> Edge {
        Edge {
            start: Vertex::new(x1, y1),
            end: Vertex::new(x2, y2),
        }
    }

    fn unit_square() -> Vec<Edge> {
        figure_edges(&[
            Vertex::new(0.0, 0.0),
            Vertex::new(0.0, 1.0),
            Vertex::new(1.0, 1.0),
            Vertex::new(1.0, 0.0),
        ])
    }

    #[test]
    fn test_figure_edges_closed_loop() {
        let vertices = Geometry::bracket().outline;
        let edges = figure_edges(&vertices);

        assert_eq!(edges.len(), vertices.len());
        for i in 0..edges.len() {
            assert_eq!(edges[i].end, edges[(i + 1) % edges.len()].start);
            assert_eq!(edges[i].start, vertices[i]);
        }
    }

    #[test]
    fn test_crossing_segments() {
        let p = segment_intersect(&edge(0.0, 0.0, 1.0, 1.0), &edge(0.0, 1.0, 1.0, 0.0)).unwrap();
        assert_relative_eq!(p.x, 0.5);
        assert_relative_eq!(p.y, 0.5);
    }

    #[test]
    fn test_parallel_segments() {
        assert!(segment_intersect(&edge(0.0, 0.0, 1.0, 0.0), &edge(0.0, 1.0, 1.0, 1.0)).is_none());
        // collinear and overlapping is still reported as no intersection
        assert!(segment_intersect(&edge(0.0, 0.0, 2.0, 0.0), &edge(1.0, 0.0, 3.0, 0.0)).is_none());
    }

    #[test]
    fn test_segments_out_of_range() {
        assert!(segment_intersect(&edge(0.0, 0.0, 1.0, 0.0), &edge(2.0, -1.0, 2.0, 1.0)).is_none());
    }

    #[test]
    fn test_segment_touching_at_endpoint() {
        let p = segment_intersect(&edge(0.0, 0.0, 1.0, 0.0), &edge(1.0, 0.0, 1.0, 1.0)).unwrap();
        assert_relative_eq!(p.x, 1.0);
        assert_relative_eq!(p.y, 0.0);
    }

    #[test]
    fn test_segment_circle_prefers_far_root() {
        let circle = Circle {
            center: Vertex::new(0.0, 0.0),
            radius: 1.0,
        };
        let p = segment_circle_intersect(&edge(-2.0, 0.0, 2.0, 0.0), &circle).unwrap();
        assert_relative_eq!(p.x, 1.0);
        assert_relative_eq!(p.y, 0.0);
    }

    #[test]
    fn test_segment_circle_falls_back_to_near_root() {
        let circle = Circle {
            center: Vertex::new(0.0, 0.0),
            radius: 1.0,
        };
        let p = segment_circle_intersect(&edge(-2.0, 0.0, 0.0, 0.0), &circle).unwrap();
        assert_relative_eq!(p.x, -1.0);
    }

    #[test]
    fn test_segment_circle_miss() {
        let circle = Circle {
            center: Vertex::new(0.0, 0.0),
            radius: 1.0,
        };
        assert!(segment_circle_intersect(&edge(-2.0, 2.0, 2.0, 2.0), &circle).is_none());
        // fully inside, both roots outside [0, 1]
        assert!(segment_circle_intersect(&edge(-0.5, 0.0, 0.5, 0.0), &circle).is_none());
    }

    #[test]
    fn test_segment_circle_tangent() {
        let circle = Circle {
            center: Vertex::new(0.0, 0.0),
            radius: 1.0,
        };
        let p = segment_circle_intersect(&edge(-1.0, 1.0, 1.0, 1.0), &circle).unwrap();
        assert_relative_eq!(p.x, 0.0);
        assert_relative_eq!(p.y, 1.0);
    }

    #[test]
    fn test_point_in_polygon() {
        let square = unit_square();
        assert!(point_in_polygon(&Vertex::new(0.5, 0.5), &square));
        assert!(!point_in_polygon(&Vertex::new(2.0, 2.0), &square));
        assert!(!point_in_polygon(&Vertex::new(-0.5, 0.5), &square));
    }

    #[test]
    fn test_point_in_polygon_level_with_horizontal_edge() {
        // y equals the horizontal top edge; must not divide by zero
        let square = unit_square();
        assert!(point_in_polygon(&Vertex::new(0.5, 1.0), &square));
        assert!(!point_in_polygon(&Vertex::new(1.5, 1.0), &square));
    }

    #[test]
    fn test_bracket_circles() {
        let geometry = Geometry::bracket();
        let circles = geometry.circles();
        assert_eq!(circles.len(), 4);
        assert!(circles.iter().all(|c| c.radius == 1.0));
        let edges = geometry.edges();
        for c in &circles {
            assert!(point_in_polygon(&c.center, &edges));
        }
    }
}
