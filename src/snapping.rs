use crate::geometry::{Point, Rect};

#[derive(Debug)]
struct SnapCandidate {
    offset: f64,
    distance: f64,
}

/// Find the best snap position for a dragged overlay
///
/// Edges snap to the guide rectangles (the viewport's usable area, the
/// spotlight) when within `threshold`. Returns the snapped origin, or
/// `None` when nothing is close enough.
pub fn find_snap_position(dragged: Rect, guides: &[Rect], threshold: f64) -> Option<Point> {
    if threshold <= 0.0 {
        return None; // Snapping disabled
    }

    let mut best_x: Option<SnapCandidate> = None;
    let mut best_y: Option<SnapCandidate> = None;

    for guide in guides {
        // Horizontal: dock beside the guide, or align with its edges
        check_snap(&mut best_x, dragged.left(), guide.right(), threshold);
        check_snap(&mut best_x, dragged.right(), guide.left(), threshold);
        check_snap(&mut best_x, dragged.left(), guide.left(), threshold);
        check_snap(&mut best_x, dragged.right(), guide.right(), threshold);

        // Vertical
        check_snap(&mut best_y, dragged.top(), guide.bottom(), threshold);
        check_snap(&mut best_y, dragged.bottom(), guide.top(), threshold);
        check_snap(&mut best_y, dragged.top(), guide.top(), threshold);
        check_snap(&mut best_y, dragged.bottom(), guide.bottom(), threshold);
    }

    let snap_x = best_x.map(|s| dragged.x + s.offset);
    let snap_y = best_y.map(|s| dragged.y + s.offset);

    match (snap_x, snap_y) {
        (None, None) => None,
        (x, y) => Some(Point::new(x.unwrap_or(dragged.x), y.unwrap_or(dragged.y))),
    }
}

fn check_snap(best: &mut Option<SnapCandidate>, edge: f64, target: f64, threshold: f64) {
    let distance = (edge - target).abs();
    if distance <= threshold {
        let candidate = SnapCandidate {
            offset: target - edge,
            distance,
        };

        // Keep the closest edge
        if best.as_ref().is_none_or(|b| candidate.distance < b.distance) {
            *best = Some(candidate);
        }
    }
}
