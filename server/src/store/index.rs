//! Per-partition R-tree over segmentation bounding boxes

use rstar::{AABB, RTree, RTreeObject};

use crate::geometry::Polygon;
use crate::model::LayerId;

/// Entry in the spatial index: bounding box of one segmentation and its key
#[derive(Debug, Clone)]
pub struct SegmentationEntry {
    pub layer_id: LayerId,
    pub label: u32,
    envelope: AABB<[f64; 2]>,
}

impl SegmentationEntry {
    /// None for a polygon without vertices
    pub fn new(layer_id: LayerId, label: u32, polygon: &Polygon) -> Option<Self> {
        let bounds = polygon.bounds()?;
        Some(Self {
            layer_id,
            label,
            envelope: AABB::from_corners([bounds.min_x, bounds.min_y], [bounds.max_x, bounds.max_y]),
        })
    }
}

impl RTreeObject for SegmentationEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Spatial prefilter for containment queries
#[derive(Default)]
pub struct SegmentationIndex {
    tree: RTree<SegmentationEntry>,
}

impl SegmentationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bulk_load(entries: Vec<SegmentationEntry>) -> Self {
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn insert(&mut self, entry: SegmentationEntry) {
        self.tree.insert(entry);
    }

    /// Rebuild without the entries rejected by `keep`
    pub fn retain(&mut self, keep: impl Fn(&SegmentationEntry) -> bool) {
        let entries: Vec<SegmentationEntry> = self.tree.iter().filter(|e| keep(e)).cloned().collect();
        self.tree = RTree::bulk_load(entries);
    }

    /// Entries whose bounding box lies inside `polygon`'s bounding box.
    /// Every segmentation covered by `polygon` is among them.
    pub fn candidates_within(&self, polygon: &Polygon) -> Vec<&SegmentationEntry> {
        let Some(bounds) = polygon.bounds() else {
            return Vec::new();
        };
        let envelope =
            AABB::from_corners([bounds.min_x, bounds.min_y], [bounds.max_x, bounds.max_y]);
        self.tree.locate_in_envelope(&envelope).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Offset;

    #[test]
    fn test_candidates_within_reference_bounds() {
        let mut index = SegmentationIndex::new();
        for (label, col) in [(1, 0), (2, 8), (3, 18)] {
            let polygon = Polygon::rectangle(Offset::new(0, col), 2, 2);
            index.insert(SegmentationEntry::new(1, label, &polygon).unwrap());
        }

        let reference = Polygon::rectangle(Offset::new(0, 0), 10, 10);
        let mut labels: Vec<u32> = index
            .candidates_within(&reference)
            .iter()
            .map(|e| e.label)
            .collect();
        labels.sort_unstable();
        // label 3 lies outside; label 2 touches the edge at x=10
        assert_eq!(labels, vec![1, 2]);
    }

    #[test]
    fn test_retain_drops_layer() {
        let polygon = Polygon::rectangle(Offset::new(0, 0), 2, 2);
        let mut index = SegmentationIndex::bulk_load(vec![
            SegmentationEntry::new(1, 1, &polygon).unwrap(),
            SegmentationEntry::new(2, 1, &polygon).unwrap(),
        ]);
        index.retain(|e| e.layer_id != 1);
        let remaining = index.candidates_within(&polygon);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].layer_id, 2);
    }
}
