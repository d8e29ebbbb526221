use serde::{Deserialize, Serialize};

use crate::constants::positioning;
use crate::geometry::{Rect, Size};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Top,
    #[default]
    Bottom,
    Left,
    Right,
    /// Centered in the viewport, not anchored to the target
    Center,
}

pub const DEFAULT_ORDER: [Placement; 4] = [
    Placement::Bottom,
    Placement::Top,
    Placement::Right,
    Placement::Left,
];

/// Candidate order for a step's preferred placement: preferred first, then the defaults
pub fn preferred_order(preferred: Placement) -> Vec<Placement> {
    if preferred == Placement::Center {
        return vec![Placement::Center];
    }
    let mut order = vec![preferred];
    order.extend(DEFAULT_ORDER.iter().copied().filter(|p| *p != preferred));
    order
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionOptions {
    /// Space kept free along the viewport edges
    pub margin: f64,
    /// Space between tooltip and target
    pub gap: f64,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            margin: positioning::VIEWPORT_MARGIN,
            gap: positioning::TARGET_GAP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    OutsideViewport,
    OverlapsTarget,
}

/// Diagnostics: one entry per candidate that was evaluated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateReport {
    pub placement: Placement,
    pub rect: Rect,
    pub rejection: Option<Rejection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositioningResult {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
    pub placement: Placement,
    pub floating: bool,
    pub candidates: Vec<CandidateReport>,
}

impl PositioningResult {
    pub fn rect(&self) -> Rect {
        Rect::new(self.left, self.top, self.width, self.height)
    }
}

/// Compute a tooltip placement
///
/// `target` is `None` when the step's element is not on the page; the
/// tooltip then floats in the middle of the viewport.
pub fn compute_position(
    target: Option<Rect>,
    tooltip: Size,
    viewport: Size,
    order: &[Placement],
    options: &PositionOptions,
) -> PositioningResult {
    place(target, tooltip, viewport, order, options, None)
}

fn place(
    target: Option<Rect>,
    tooltip: Size,
    viewport: Size,
    order: &[Placement],
    options: &PositionOptions,
    previous: Option<Placement>,
) -> PositioningResult {
    let bounds = Rect::new(0.0, 0.0, viewport.width, viewport.height).inset(options.margin);
    // Never hand back a tooltip larger than the usable viewport
    let size = Size::new(
        tooltip.width.min(bounds.width),
        tooltip.height.min(bounds.height),
    );

    let Some(target) = target else {
        return centered(bounds, size, Placement::Center, true);
    };
    if order.first() == Some(&Placement::Center) {
        return centered(bounds, size, Placement::Center, false);
    }

    let order: Vec<Placement> = if order.is_empty() {
        DEFAULT_ORDER.to_vec()
    } else {
        order.iter().copied().filter(|p| *p != Placement::Center).collect()
    };

    let mut candidates = Vec::with_capacity(order.len() + 1);

    // A placement that is still valid is kept, so a size refinement cannot flip sides
    if let Some(previous) = previous.filter(|p| order.contains(p)) {
        let report = evaluate(previous, target, size, bounds, options.gap);
        let accepted = report.rejection.is_none();
        candidates.push(report);
        if accepted {
            return anchored(previous, size, candidates);
        }
    }

    for placement in &order {
        if Some(*placement) == previous {
            continue;
        }
        let report = evaluate(*placement, target, size, bounds, options.gap);
        let accepted = report.rejection.is_none();
        candidates.push(report);
        if accepted {
            return anchored(*placement, size, candidates);
        }
    }

    // Nothing fits without overlap: keep the first candidate, pinned inside the viewport
    let fallback = order.first().copied().unwrap_or_default();
    let rect = candidate_rect(fallback, target, size, bounds, options.gap);
    let left = clamp_axis(rect.x, size.width, bounds.left(), bounds.right());
    let top = clamp_axis(rect.y, size.height, bounds.top(), bounds.bottom());
    PositioningResult {
        top,
        left,
        width: size.width,
        height: size.height,
        placement: fallback,
        floating: true,
        candidates,
    }
}

fn anchored(placement: Placement, size: Size, candidates: Vec<CandidateReport>) -> PositioningResult {
    let rect = candidates
        .last()
        .map(|report| report.rect)
        .unwrap_or_default();
    PositioningResult {
        top: rect.y,
        left: rect.x,
        width: size.width,
        height: size.height,
        placement,
        floating: false,
        candidates,
    }
}

fn centered(bounds: Rect, size: Size, placement: Placement, floating: bool) -> PositioningResult {
    let center = bounds.center();
    PositioningResult {
        top: center.y - size.height / 2.0,
        left: center.x - size.width / 2.0,
        width: size.width,
        height: size.height,
        placement,
        floating,
        candidates: Vec::new(),
    }
}

fn evaluate(placement: Placement, target: Rect, size: Size, bounds: Rect, gap: f64) -> CandidateReport {
    let rect = candidate_rect(placement, target, size, bounds, gap);
    let rejection = if !bounds.contains_rect(&rect) {
        Some(Rejection::OutsideViewport)
    } else if rect.intersects(&target) {
        Some(Rejection::OverlapsTarget)
    } else {
        None
    };
    CandidateReport {
        placement,
        rect,
        rejection,
    }
}

/// Would-be tooltip rect on one side of the target
fn candidate_rect(placement: Placement, target: Rect, size: Size, bounds: Rect, gap: f64) -> Rect {
    let center = target.center();
    match placement {
        Placement::Bottom | Placement::Top => {
            let x = clamp_axis(center.x - size.width / 2.0, size.width, bounds.left(), bounds.right());
            let y = if placement == Placement::Bottom {
                target.bottom() + gap
            } else {
                target.top() - gap - size.height
            };
            Rect::new(x, y, size.width, size.height)
        }
        Placement::Right | Placement::Left => {
            let y = clamp_axis(center.y - size.height / 2.0, size.height, bounds.top(), bounds.bottom());
            let x = if placement == Placement::Right {
                target.right() + gap
            } else {
                target.left() - gap - size.width
            };
            Rect::new(x, y, size.width, size.height)
        }
        Placement::Center => {
            let c = bounds.center();
            Rect::new(c.x - size.width / 2.0, c.y - size.height / 2.0, size.width, size.height)
        }
    }
}

fn clamp_axis(start: f64, length: f64, min: f64, max: f64) -> f64 {
    if length >= max - min {
        min
    } else {
        start.clamp(min, max - length)
    }
}

/// Stateful wrapper remembering the last placement for stickiness
#[derive(Debug, Default, Clone)]
pub struct PositioningEngine {
    options: PositionOptions,
    last: Option<PositioningResult>,
}

impl PositioningEngine {
    pub fn new(options: PositionOptions) -> Self {
        Self { options, last: None }
    }

    pub fn compute(
        &mut self,
        target: Option<Rect>,
        tooltip: Size,
        viewport: Size,
        order: &[Placement],
    ) -> PositioningResult {
        let previous = self
            .last
            .as_ref()
            .filter(|last| !last.floating)
            .map(|last| last.placement);
        let result = place(target, tooltip, viewport, order, &self.options, previous);
        self.last = Some(result.clone());
        result
    }

    /// Forget the previous placement (step changed)
    pub fn reset(&mut self) {
        self.last = None;
    }
}
