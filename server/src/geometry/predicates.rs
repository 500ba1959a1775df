//! Planar spatial predicates
//!
//! The containment engine treats these as a black-box oracle behind the
//! `SpatialPredicate` trait; `PlanarPredicate` is the implementation used by
//! the in-memory store.

use super::types::{GeometryError, Point, Polygon, ring_edges, signed_area};

const EPSILON: f64 = 1e-9;

/// Geometric oracle consumed by storage backends
pub trait SpatialPredicate: Send + Sync {
    /// Every point of `a` lies in the interior or on the boundary of `b`
    fn covered_by(&self, a: &Polygon, b: &Polygon) -> bool;

    /// `a` shares at least one point with the boundary of `b`
    fn intersects_boundary(&self, a: &Polygon, b: &Polygon) -> bool;
}

/// Exact planar predicates over even-odd polygons
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanarPredicate;

impl SpatialPredicate for PlanarPredicate {
    fn covered_by(&self, a: &Polygon, b: &Polygon) -> bool {
        covered_by(a, b)
    }

    fn intersects_boundary(&self, a: &Polygon, b: &Polygon) -> bool {
        intersects_boundary(a, b)
    }
}

/// Position of a point relative to a polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Inside,
    Boundary,
    Outside,
}

fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    cross(a, b, p).abs() <= EPSILON
        && p.x >= a.x.min(b.x) - EPSILON
        && p.x <= a.x.max(b.x) + EPSILON
        && p.y >= a.y.min(b.y) - EPSILON
        && p.y <= a.y.max(b.y) + EPSILON
}

/// Classify a point against a polygon (even-odd rule)
pub fn locate(p: Point, polygon: &Polygon) -> Location {
    let mut inside = false;
    for ring in &polygon.rings {
        for (a, b) in ring_edges(ring) {
            if on_segment(p, a, b) {
                return Location::Boundary;
            }
            if (a.y > p.y) != (b.y > p.y) {
                let x_at = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
                if p.x < x_at {
                    inside = !inside;
                }
            }
        }
    }
    if inside {
        Location::Inside
    } else {
        Location::Outside
    }
}

/// Segments cross at a single point interior to both
pub fn crosses_properly(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let d1 = cross(b1, b2, a1);
    let d2 = cross(b1, b2, a2);
    let d3 = cross(a1, a2, b1);
    let d4 = cross(a1, a2, b2);
    ((d1 > EPSILON && d2 < -EPSILON) || (d1 < -EPSILON && d2 > EPSILON))
        && ((d3 > EPSILON && d4 < -EPSILON) || (d3 < -EPSILON && d4 > EPSILON))
}

/// Closed segments share at least one point
pub fn segments_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    crosses_properly(a1, a2, b1, b2)
        || on_segment(a1, b1, b2)
        || on_segment(a2, b1, b2)
        || on_segment(b1, a1, a2)
        || on_segment(b2, a1, a2)
}

fn edges(polygon: &Polygon) -> impl Iterator<Item = (Point, Point)> + '_ {
    polygon.rings.iter().flat_map(|r| ring_edges(r))
}

fn midpoint(a: Point, b: Point) -> Point {
    Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

/// `a` is covered by `b`: no point of `a` lies in the exterior of `b`.
///
/// Touching the boundary of `b` from the inside is allowed.
pub fn covered_by(a: &Polygon, b: &Polygon) -> bool {
    if a.rings.is_empty() || b.rings.is_empty() {
        return false;
    }
    if let (Some(ab), Some(bb)) = (a.bounds(), b.bounds())
        && (ab.min_x < bb.min_x - EPSILON
            || ab.min_y < bb.min_y - EPSILON
            || ab.max_x > bb.max_x + EPSILON
            || ab.max_y > bb.max_y + EPSILON)
    {
        return false;
    }
    for (p, q) in edges(a) {
        if locate(p, b) == Location::Outside || locate(midpoint(p, q), b) == Location::Outside {
            return false;
        }
    }
    for (p, q) in edges(a) {
        for (r, s) in edges(b) {
            if crosses_properly(p, q, r, s) {
                return false;
            }
        }
    }
    // A boundary point of `b` strictly inside `a` means `a` reaches past it
    b.rings
        .iter()
        .flatten()
        .all(|&p| locate(p, a) != Location::Inside)
}

/// `a` intersects the boundary of `b`
pub fn intersects_boundary(a: &Polygon, b: &Polygon) -> bool {
    for (p, q) in edges(a) {
        for (r, s) in edges(b) {
            if segments_intersect(p, q, r, s) {
                return true;
            }
        }
    }
    // A whole ring of `b` may sit inside `a` without touching its edges
    b.rings
        .iter()
        .filter_map(|ring| ring.first())
        .any(|&p| locate(p, a) == Location::Inside)
}

/// Validate that a polygon is usable as an object outline: every ring has at
/// least three vertices, no zero-length edge, non-zero area, and no two edges
/// cross. Rings may touch at shared vertices.
pub fn validate_simple(label: u32, polygon: &Polygon) -> Result<(), GeometryError> {
    if polygon.rings.is_empty() {
        return Err(GeometryError::Degenerate {
            label,
            reason: "polygon has no rings".into(),
        });
    }

    let mut all_edges = Vec::new();
    for ring in &polygon.rings {
        if ring.len() < 3 {
            return Err(GeometryError::Degenerate {
                label,
                reason: format!("ring has {} vertices", ring.len()),
            });
        }
        if signed_area(ring).abs() <= EPSILON {
            return Err(GeometryError::Degenerate {
                label,
                reason: "ring has zero area".into(),
            });
        }
        for (a, b) in ring_edges(ring) {
            if (a.x - b.x).abs() <= EPSILON && (a.y - b.y).abs() <= EPSILON {
                return Err(GeometryError::Degenerate {
                    label,
                    reason: "zero-length edge".into(),
                });
            }
            all_edges.push((a, b));
        }
    }

    // Sweep along x so only edges with overlapping x extents are compared
    all_edges.sort_by(|e, f| e.0.x.min(e.1.x).total_cmp(&f.0.x.min(f.1.x)));
    for (i, &(a1, a2)) in all_edges.iter().enumerate() {
        let max_x = a1.x.max(a2.x);
        for &(b1, b2) in &all_edges[i + 1..] {
            if b1.x.min(b2.x) > max_x + EPSILON {
                break;
            }
            if crosses_properly(a1, a2, b1, b2) {
                return Err(GeometryError::SelfIntersecting { label });
            }
        }
    }

    Ok(())
}
