//! Planar geometry: raster/polygon codec and spatial predicates

pub mod codec;
pub mod predicates;
pub mod types;

pub use codec::{ExtractedObject, PolygonCodec};
pub use predicates::{PlanarPredicate, SpatialPredicate};
pub use types::{GeometryError, Offset, Point, Polygon, Raster};
