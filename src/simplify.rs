use anyhow::{ensure, Result};
use geo_types::Coord;

/// A simplified polyline together with the new positions of the anchor points.
#[derive(Debug, Clone, PartialEq)]
pub struct Simplified {
    pub points: Vec<Coord<f64>>,
    /// For every input anchor, its index in `points`.
    pub anchors: Vec<usize>,
    /// Indexes into the input of the points that were kept.
    pub kept_indexes: Vec<usize>,
}

impl Simplified {
    pub fn dropped_points(&self, original_len: usize) -> usize {
        original_len - self.points.len()
    }
}

/// Simplifies `points` with Douglas-Peucker, run separately between each pair of consecutive
/// anchors so that every anchor point survives. Points before the first anchor and after the
/// last one are trimmed. Without anchors the first and last point are used.
pub fn simplify_anchored(
    points: &[Coord<f64>],
    anchors: &[usize],
    tolerance: f64,
) -> Result<Simplified> {
    ensure!(!points.is_empty(), "cannot simplify an empty polyline");
    let default_anchors = [0, points.len() - 1];
    let anchors = if anchors.is_empty() {
        &default_anchors[..]
    } else {
        anchors
    };
    ensure!(
        anchors.windows(2).all(|pair| pair[0] <= pair[1]),
        "anchors are not sorted: {:?}",
        anchors
    );
    let last_anchor = anchors[anchors.len() - 1];
    ensure!(
        last_anchor < points.len(),
        "anchor {} out of range for {} points",
        last_anchor,
        points.len()
    );

    let mut keep = vec![false; points.len()];
    for &anchor in anchors {
        keep[anchor] = true;
    }
    for pair in anchors.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        if to - from < 2 {
            continue;
        }
        let segment_keep = douglas_peucker(&points[from..=to], tolerance);
        for (offset, kept) in segment_keep.into_iter().enumerate() {
            keep[from + offset] |= kept;
        }
    }

    let mut new_index = vec![0; points.len()];
    let mut kept_indexes = vec![];
    for i in anchors[0]..=last_anchor {
        if keep[i] {
            new_index[i] = kept_indexes.len();
            kept_indexes.push(i);
        }
    }
    Ok(Simplified {
        points: kept_indexes.iter().map(|&i| points[i]).collect(),
        anchors: anchors.iter().map(|&anchor| new_index[anchor]).collect(),
        kept_indexes,
    })
}

/// Returns for every point whether it has to be kept. The end points are always kept.
pub fn douglas_peucker(points: &[Coord<f64>], tolerance: f64) -> Vec<bool> {
    let mut keep = vec![false; points.len()];
    if points.is_empty() {
        return keep;
    }
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut stack = vec![(0, points.len() - 1)];
    while let Some((first, last)) = stack.pop() {
        let mut max_distance = 0.0;
        let mut max_index = None;
        for i in first + 1..last {
            let distance = segment_distance(points[i], points[first], points[last]);
            if distance > max_distance {
                max_distance = distance;
                max_index = Some(i);
            }
        }
        if let Some(index) = max_index {
            if max_distance > tolerance {
                keep[index] = true;
                stack.push((first, index));
                stack.push((index, last));
            }
        }
    }
    keep
}

/// Distance from `point` to the segment `start`-`end`: perpendicular when the projection falls
/// on the segment, otherwise to the nearer end point.
pub fn segment_distance(point: Coord<f64>, start: Coord<f64>, end: Coord<f64>) -> f64 {
    if start == end {
        return distance(point, end);
    }
    let segment = end - start;
    let relative = point - start;
    let t = (relative.x * segment.x + relative.y * segment.y)
        / (segment.x * segment.x + segment.y * segment.y);
    if t <= 0.0 {
        distance(point, start)
    } else if t >= 1.0 {
        distance(point, end)
    } else {
        let offset = relative - segment * t;
        offset.x.hypot(offset.y)
    }
}

pub fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (b.x - a.x).hypot(b.y - a.y)
}
