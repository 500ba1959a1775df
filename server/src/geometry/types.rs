//! Planar geometry types and codec error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while converting between rasters and polygons
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Degenerate polygon for label {label}: {reason}")]
    Degenerate { label: u32, reason: String },

    #[error("Label 0 is reserved for background")]
    BackgroundLabel,

    #[error("Self-intersecting polygon for label {label}")]
    SelfIntersecting { label: u32 },

    #[error("Polygons {first} and {second} overlap at pixel (row={row}, col={col})")]
    Overlap {
        first: u32,
        second: u32,
        row: usize,
        col: usize,
    },

    #[error("Failed to encode raster: {0}")]
    Encoding(String),

    #[error(
        "Raster shape mismatch: expected {expected_height}x{expected_width}, got {height}x{width}"
    )]
    ShapeMismatch {
        expected_height: usize,
        expected_width: usize,
        height: usize,
        width: usize,
    },
}

/// Point in the shared global coordinate frame (x = column axis, y = row axis)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Translation from a raster's local frame into the global frame, as (row, col)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offset {
    pub y: i64,
    pub x: i64,
}

impl Offset {
    pub fn new(y: i64, x: i64) -> Self {
        Self { y, x }
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

/// Polygon made of closed rings, filled with the even-odd rule.
///
/// A ring does not repeat its first vertex. Outer boundaries are stored with
/// positive signed area and holes with negative signed area; a label whose
/// pixels form several disconnected components is a single polygon with one
/// outer ring per component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub rings: Vec<Vec<Point>>,
}

impl Polygon {
    pub fn new(rings: Vec<Vec<Point>>) -> Self {
        Self { rings }
    }

    /// Rectangle covering `height` x `width` pixels starting at `offset`
    pub fn rectangle(offset: Offset, height: usize, width: usize) -> Self {
        let (x0, y0) = (offset.x as f64, offset.y as f64);
        let (x1, y1) = (x0 + width as f64, y0 + height as f64);
        Self {
            rings: vec![vec![
                Point::new(x0, y0),
                Point::new(x1, y0),
                Point::new(x1, y1),
                Point::new(x0, y1),
            ]],
        }
    }

    /// Bounding box over all rings, or None for an empty polygon
    pub fn bounds(&self) -> Option<Bounds> {
        let mut points = self.rings.iter().flatten();
        let first = points.next()?;
        let init = Bounds {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        Some(points.fold(init, |b, p| Bounds {
            min_x: b.min_x.min(p.x),
            min_y: b.min_y.min(p.y),
            max_x: b.max_x.max(p.x),
            max_y: b.max_y.max(p.y),
        }))
    }

    /// Filled area (outer rings minus holes)
    pub fn area(&self) -> f64 {
        self.rings.iter().map(|r| signed_area(r)).sum::<f64>().abs()
    }

    /// Area-weighted centroid, or None for a polygon without area
    pub fn centroid(&self) -> Option<Point> {
        let mut area = 0.0;
        let mut cx = 0.0;
        let mut cy = 0.0;
        for ring in &self.rings {
            for (a, b) in ring_edges(ring) {
                let cross = a.x * b.y - b.x * a.y;
                area += cross;
                cx += (a.x + b.x) * cross;
                cy += (a.y + b.y) * cross;
            }
        }
        if area.abs() < f64::EPSILON {
            return None;
        }
        let area = area / 2.0;
        Some(Point::new(cx / (6.0 * area), cy / (6.0 * area)))
    }
}

/// Shoelace signed area of a ring
pub fn signed_area(ring: &[Point]) -> f64 {
    ring_edges(ring)
        .map(|(a, b)| a.x * b.y - b.x * a.y)
        .sum::<f64>()
        / 2.0
}

/// Edges of a closed ring, including the closing edge
pub fn ring_edges(ring: &[Point]) -> impl Iterator<Item = (Point, Point)> + '_ {
    let n = ring.len();
    (0..n).map(move |i| (ring[i], ring[(i + 1) % n]))
}

/// Labeled 2D raster, row-major. Zero is background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    height: usize,
    width: usize,
    data: Vec<u32>,
}

impl Raster {
    /// All-background raster
    pub fn zeros(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            data: vec![0; height * width],
        }
    }

    /// Build from row-major pixel data
    pub fn from_vec(height: usize, width: usize, data: Vec<u32>) -> Result<Self, GeometryError> {
        if data.len() != height * width {
            return Err(GeometryError::ShapeMismatch {
                expected_height: height,
                expected_width: width,
                height: data.len() / width.max(1),
                width,
            });
        }
        Ok(Self {
            height,
            width,
            data,
        })
    }

    /// Build from nested rows; every row must have the same length
    pub fn from_rows(rows: &[Vec<u32>]) -> Result<Self, GeometryError> {
        let height = rows.len();
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(height * width);
        for row in rows {
            if row.len() != width {
                return Err(GeometryError::ShapeMismatch {
                    expected_height: height,
                    expected_width: width,
                    height,
                    width: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            height,
            width,
            data,
        })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn get(&self, row: usize, col: usize) -> u32 {
        self.data[row * self.width + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: u32) {
        self.data[row * self.width + col] = value;
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.data
    }

    /// Rows as nested vectors (JSON representation)
    pub fn to_rows(&self) -> Vec<Vec<u32>> {
        if self.width == 0 {
            return vec![Vec::new(); self.height];
        }
        self.data.chunks(self.width).map(<[u32]>::to_vec).collect()
    }

    /// Fail unless the raster has exactly the expected shape
    pub fn ensure_shape(&self, height: usize, width: usize) -> Result<(), GeometryError> {
        if self.shape() != (height, width) {
            return Err(GeometryError::ShapeMismatch {
                expected_height: height,
                expected_width: width,
                height: self.height,
                width: self.width,
            });
        }
        Ok(())
    }
}
