//! Conversion between labeled rasters and polygon outlines
//!
//! Extraction traces the pixel-edge boundary of every label, so a polygon
//! follows the exact outline of its pixels. Rasterization fills pixels whose
//! centers fall inside a polygon. For rasters whose labeled regions are
//! disjoint the two are inverses of each other.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;

use image::{ImageBuffer, ImageFormat, Luma};
use tracing::debug;

use super::predicates::validate_simple;
use super::types::{GeometryError, Offset, Point, Polygon, Raster, ring_edges};

/// One labeled object extracted from a raster
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedObject {
    pub label: u32,
    pub polygon: Polygon,
    pub centroid: Point,
    pub pixel_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Direction {
    East,
    South,
    West,
    North,
}

impl Direction {
    fn step(self) -> (i64, i64) {
        match self {
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
            Direction::North => (0, -1),
        }
    }

    /// Clockwise turn on screen (y axis pointing down)
    fn right(self) -> Self {
        match self {
            Direction::East => Direction::South,
            Direction::South => Direction::West,
            Direction::West => Direction::North,
            Direction::North => Direction::East,
        }
    }

    fn left(self) -> Self {
        match self {
            Direction::East => Direction::North,
            Direction::North => Direction::West,
            Direction::West => Direction::South,
            Direction::South => Direction::East,
        }
    }
}

type Vertex = (i64, i64);

/// Directed pixel-edge with the label's interior on its right-hand side
#[derive(Debug, Clone, Copy)]
struct Edge {
    start: Vertex,
    dir: Direction,
}

impl Edge {
    fn end(&self) -> Vertex {
        let (dx, dy) = self.dir.step();
        (self.start.0 + dx, self.start.1 + dy)
    }
}

#[derive(Default)]
struct LabelAccumulator {
    edges: Vec<Edge>,
    pixel_count: usize,
    sum_x: f64,
    sum_y: f64,
}

/// Raster <-> polygon codec
#[derive(Debug, Clone, Copy, Default)]
pub struct PolygonCodec;

impl PolygonCodec {
    pub fn new() -> Self {
        Self
    }

    /// Extract one polygon per distinct positive label, ordered by label.
    ///
    /// Pixels sharing a label belong to the same object even when they are
    /// not connected. Coordinates are translated by `offset` into the global
    /// frame; the centroid is the mean of the pixel centers in that frame.
    pub fn extract(
        &self,
        raster: &Raster,
        offset: Offset,
    ) -> Result<Vec<ExtractedObject>, GeometryError> {
        let (height, width) = raster.shape();
        let mut accumulators: BTreeMap<u32, LabelAccumulator> = BTreeMap::new();

        for row in 0..height {
            for col in 0..width {
                let label = raster.get(row, col);
                if label == 0 {
                    continue;
                }
                let acc = accumulators.entry(label).or_default();
                acc.pixel_count += 1;
                acc.sum_x += col as f64;
                acc.sum_y += row as f64;

                let (x, y) = (col as i64, row as i64);
                if row == 0 || raster.get(row - 1, col) != label {
                    acc.edges.push(Edge {
                        start: (x, y),
                        dir: Direction::East,
                    });
                }
                if col + 1 == width || raster.get(row, col + 1) != label {
                    acc.edges.push(Edge {
                        start: (x + 1, y),
                        dir: Direction::South,
                    });
                }
                if row + 1 == height || raster.get(row + 1, col) != label {
                    acc.edges.push(Edge {
                        start: (x + 1, y + 1),
                        dir: Direction::West,
                    });
                }
                if col == 0 || raster.get(row, col - 1) != label {
                    acc.edges.push(Edge {
                        start: (x, y + 1),
                        dir: Direction::North,
                    });
                }
            }
        }

        let mut objects = Vec::with_capacity(accumulators.len());
        for (label, acc) in accumulators {
            let rings = trace_rings(label, &acc.edges)?
                .into_iter()
                .map(|ring| {
                    ring.into_iter()
                        .map(|(x, y)| Point::new((x + offset.x) as f64, (y + offset.y) as f64))
                        .collect()
                })
                .collect();
            let polygon = Polygon::new(rings);
            validate_simple(label, &polygon)?;

            let n = acc.pixel_count as f64;
            let centroid = Point::new(
                acc.sum_x / n + 0.5 + offset.x as f64,
                acc.sum_y / n + 0.5 + offset.y as f64,
            );
            objects.push(ExtractedObject {
                label,
                polygon,
                centroid,
                pixel_count: acc.pixel_count,
            });
        }

        debug!(
            "Extracted {} objects from {}x{} raster",
            objects.len(),
            height,
            width
        );
        Ok(objects)
    }

    /// Paint labeled polygons into a `height` x `width` raster whose top-left
    /// pixel sits at `offset` in the global frame.
    ///
    /// A pixel takes a polygon's label when its center lies inside the
    /// polygon. A pixel claimed by two polygons is rejected as an overlap.
    /// Overlaps that contain no pixel center are not detected.
    pub fn rasterize<'a, I>(
        &self,
        polygons: I,
        offset: Offset,
        height: usize,
        width: usize,
    ) -> Result<Raster, GeometryError>
    where
        I: IntoIterator<Item = (u32, &'a Polygon)>,
    {
        let mut raster = Raster::zeros(height, width);

        for (label, polygon) in polygons {
            if label == 0 {
                return Err(GeometryError::BackgroundLabel);
            }
            let Some(bounds) = polygon.bounds() else {
                continue;
            };
            let row_start = clamp_index(bounds.min_y - offset.y as f64 - 0.5, height, f64::floor);
            let row_end = clamp_index(bounds.max_y - offset.y as f64 + 0.5, height, f64::ceil);

            for row in row_start..row_end {
                let y = row as f64 + 0.5 + offset.y as f64;
                let crossings = scanline_crossings(polygon, y);
                for pair in crossings.chunks_exact(2) {
                    let col_start = clamp_index(pair[0] - offset.x as f64 - 0.5, width, |v| {
                        v.floor() + 1.0
                    });
                    let col_end = clamp_index(pair[1] - offset.x as f64 - 0.5, width, f64::ceil);
                    for col in col_start..col_end {
                        let existing = raster.get(row, col);
                        if existing != 0 {
                            return Err(GeometryError::Overlap {
                                first: existing,
                                second: label,
                                row,
                                col,
                            });
                        }
                        raster.set(row, col, label);
                    }
                }
            }
        }

        Ok(raster)
    }

    /// Encode a raster as a 16-bit grayscale PNG
    pub fn encode_png(&self, raster: &Raster) -> Result<Vec<u8>, GeometryError> {
        let mut pixels = Vec::with_capacity(raster.as_slice().len());
        for &label in raster.as_slice() {
            let value = u16::try_from(label).map_err(|_| {
                GeometryError::Encoding(format!("label {} exceeds 16-bit range", label))
            })?;
            pixels.push(value);
        }
        let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(raster.width() as u32, raster.height() as u32, pixels)
                .ok_or_else(|| GeometryError::Encoding("pixel buffer size mismatch".into()))?;

        let mut bytes = Cursor::new(Vec::new());
        buffer
            .write_to(&mut bytes, ImageFormat::Png)
            .map_err(|e| GeometryError::Encoding(e.to_string()))?;
        Ok(bytes.into_inner())
    }
}

/// Map a continuous coordinate to a pixel index range bound in `[0, len]`
fn clamp_index(value: f64, len: usize, round: impl Fn(f64) -> f64) -> usize {
    let v = round(value);
    if v <= 0.0 {
        0
    } else if v >= len as f64 {
        len
    } else {
        v as usize
    }
}

/// Sorted x positions where the horizontal line at `y` crosses the polygon
fn scanline_crossings(polygon: &Polygon, y: f64) -> Vec<f64> {
    let mut xs: Vec<f64> = polygon
        .rings
        .iter()
        .flat_map(|r| ring_edges(r))
        .filter(|(a, b)| (a.y > y) != (b.y > y))
        .map(|(a, b)| a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y))
        .collect();
    xs.sort_by(f64::total_cmp);
    xs
}

/// Link boundary edges into closed rings of corner vertices.
///
/// Where two pixels of the label touch only diagonally the walk turns right,
/// which keeps their outlines apart and ties every incoming edge to exactly
/// one outgoing edge.
fn trace_rings(label: u32, edges: &[Edge]) -> Result<Vec<Vec<Vertex>>, GeometryError> {
    let lookup: HashMap<(Vertex, Direction), usize> = edges
        .iter()
        .enumerate()
        .map(|(i, e)| ((e.start, e.dir), i))
        .collect();
    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();

    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let mut walk = vec![edges[start]];
        let mut current = edges[start];

        loop {
            let vertex = current.end();
            let next = [current.dir.right(), current.dir, current.dir.left()]
                .into_iter()
                .find_map(|dir| lookup.get(&(vertex, dir)).copied())
                .ok_or_else(|| GeometryError::Degenerate {
                    label,
                    reason: format!("open boundary at vertex {:?}", vertex),
                })?;
            if next == start {
                break;
            }
            if used[next] {
                return Err(GeometryError::Degenerate {
                    label,
                    reason: format!("boundary revisits edge at vertex {:?}", vertex),
                });
            }
            used[next] = true;
            current = edges[next];
            walk.push(current);
        }

        rings.push(corners(&walk));
    }

    Ok(rings)
}

/// Keep only vertices where the walk changes direction
fn corners(walk: &[Edge]) -> Vec<Vertex> {
    let n = walk.len();
    (0..n)
        .filter(|&i| walk[(i + n - 1) % n].dir != walk[i].dir)
        .map(|i| walk[i].start)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::types::signed_area;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn two_blocks() -> Raster {
        Raster::from_rows(&[
            vec![1, 1, 0, 0],
            vec![1, 1, 0, 0],
            vec![0, 0, 2, 2],
            vec![0, 0, 2, 2],
        ])
        .unwrap()
    }

    fn roundtrip(raster: &Raster, offset: Offset) -> Raster {
        let codec = PolygonCodec::new();
        let objects = codec.extract(raster, offset).unwrap();
        codec
            .rasterize(
                objects.iter().map(|o| (o.label, &o.polygon)),
                offset,
                raster.height(),
                raster.width(),
            )
            .unwrap()
    }

    #[test]
    fn test_extract_two_squares() {
        let objects = PolygonCodec::new()
            .extract(&two_blocks(), Offset::default())
            .unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].label, 1);
        assert_eq!(objects[1].label, 2);
        for obj in &objects {
            assert_eq!(obj.polygon.rings.len(), 1);
            assert_eq!(obj.polygon.rings[0].len(), 4);
            assert_eq!(obj.polygon.area(), 4.0);
        }
        assert_eq!(objects[0].centroid, Point::new(1.0, 1.0));
        assert_eq!(objects[1].centroid, Point::new(3.0, 3.0));
    }

    #[test]
    fn test_roundtrip_two_squares() {
        let raster = two_blocks();
        assert_eq!(roundtrip(&raster, Offset::default()), raster);
    }

    #[test]
    fn test_offset_translates_polygon_and_centroid() {
        let objects = PolygonCodec::new()
            .extract(&two_blocks(), Offset::new(100, 50))
            .unwrap();
        let bounds = objects[0].polygon.bounds().unwrap();
        assert_eq!((bounds.min_x, bounds.min_y), (50.0, 100.0));
        assert_eq!(objects[0].centroid, Point::new(51.0, 101.0));
        assert_eq!(
            roundtrip(&two_blocks(), Offset::new(100, 50)),
            two_blocks()
        );
    }

    #[test]
    fn test_disconnected_pixels_share_one_object() {
        let raster = Raster::from_rows(&[vec![5, 0, 5], vec![0, 0, 0], vec![5, 0, 0]]).unwrap();
        let objects = PolygonCodec::new()
            .extract(&raster, Offset::default())
            .unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].polygon.rings.len(), 3);
        assert_eq!(objects[0].pixel_count, 3);
        assert_eq!(roundtrip(&raster, Offset::default()), raster);
    }

    #[test]
    fn test_diagonal_touching_pixels_roundtrip() {
        let raster = Raster::from_rows(&[vec![3, 0], vec![0, 3]]).unwrap();
        let objects = PolygonCodec::new()
            .extract(&raster, Offset::default())
            .unwrap();
        assert_eq!(objects[0].polygon.rings.len(), 2);
        assert_eq!(roundtrip(&raster, Offset::default()), raster);
    }

    #[test]
    fn test_hole_is_negative_ring() {
        let raster = Raster::from_rows(&[vec![1, 1, 1], vec![1, 0, 1], vec![1, 1, 1]]).unwrap();
        let objects = PolygonCodec::new()
            .extract(&raster, Offset::default())
            .unwrap();
        let rings = &objects[0].polygon.rings;
        assert_eq!(rings.len(), 2);
        let areas: Vec<f64> = rings.iter().map(|r| signed_area(r)).collect();
        assert!(areas.contains(&9.0));
        assert!(areas.contains(&-1.0));
        assert_eq!(roundtrip(&raster, Offset::default()), raster);
    }

    #[test]
    fn test_extract_is_idempotent_and_ordered_by_label() {
        let raster = Raster::from_rows(&[vec![9, 0, 1], vec![9, 4, 0]]).unwrap();
        let codec = PolygonCodec::new();
        let first = codec.extract(&raster, Offset::default()).unwrap();
        let second = codec.extract(&raster, Offset::default()).unwrap();
        assert_eq!(first, second);
        let labels: Vec<u32> = first.iter().map(|o| o.label).collect();
        assert_eq!(labels, vec![1, 4, 9]);
    }

    #[test]
    fn test_rasterize_rejects_overlap() {
        let a = Polygon::rectangle(Offset::new(0, 0), 2, 2);
        let b = Polygon::rectangle(Offset::new(1, 1), 2, 2);
        let result = PolygonCodec::new().rasterize([(1, &a), (2, &b)], Offset::default(), 4, 4);
        assert_eq!(
            result,
            Err(GeometryError::Overlap {
                first: 1,
                second: 2,
                row: 1,
                col: 1
            })
        );
    }

    #[test]
    fn test_rasterize_overlap_between_centers_is_not_detected() {
        let strip = |left: f64, right: f64| {
            Polygon::new(vec![vec![
                crate::geometry::Point::new(left, 0.0),
                crate::geometry::Point::new(right, 0.0),
                crate::geometry::Point::new(right, 1.0),
                crate::geometry::Point::new(left, 1.0),
            ]])
        };
        // columns 0.8..1.2 are shared but hold no pixel center
        let a = strip(0.0, 1.2);
        let b = strip(0.8, 2.0);
        let raster = PolygonCodec::new()
            .rasterize([(1, &a), (2, &b)], Offset::default(), 1, 2)
            .unwrap();
        assert_eq!(raster, Raster::from_rows(&[vec![1, 2]]).unwrap());
    }

    #[test]
    fn test_rasterize_rejects_background_label() {
        let a = Polygon::rectangle(Offset::new(0, 0), 1, 1);
        let result = PolygonCodec::new().rasterize([(0, &a)], Offset::default(), 2, 2);
        assert_eq!(result, Err(GeometryError::BackgroundLabel));
    }

    #[test]
    fn test_rasterize_clips_to_shape() {
        let big = Polygon::rectangle(Offset::new(-5, -5), 20, 20);
        let raster = PolygonCodec::new()
            .rasterize([(9, &big)], Offset::default(), 3, 3)
            .unwrap();
        assert!(raster.as_slice().iter().all(|&v| v == 9));
    }

    #[test]
    fn test_random_rasters_roundtrip() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let height = rng.random_range(1..24);
            let width = rng.random_range(1..24);
            let data = (0..height * width)
                .map(|_| rng.random_range(0..6u32))
                .collect();
            let raster = Raster::from_vec(height, width, data).unwrap();
            let offset = Offset::new(rng.random_range(-50..50), rng.random_range(-50..50));
            assert_eq!(roundtrip(&raster, offset), raster);
        }
    }

    #[test]
    fn test_encode_png_signature() {
        let png = PolygonCodec::new().encode_png(&two_blocks()).unwrap();
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }

    #[test]
    fn test_encode_png_rejects_wide_labels() {
        let raster = Raster::from_rows(&[vec![70_000]]).unwrap();
        assert!(matches!(
            PolygonCodec::new().encode_png(&raster),
            Err(GeometryError::Encoding(_))
        ));
    }
}
