//! Ports to the host environment

use serde::{Deserialize, Serialize};
use std::rc::Rc;

use crate::geometry::{Rect, Size};
use crate::service::OverlayState;

/// Opaque handle to a host element
///
/// The tracker holds handles, never the elements themselves, and checks
/// `GeometryProvider::is_attached` on every pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub u64);

/// Where a scroll listener is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScrollTarget {
    /// Window scroll listener
    Window,
    /// Capturing listener on the document (catches nested scroll containers)
    Document,
}

/// Element lookup, measurement and change subscriptions
pub trait GeometryProvider {
    /// Resolve a locator to zero or one element
    fn resolve(&self, locator: &str) -> Option<ElementId>;

    /// Current bounding rectangle, `None` when the element is gone
    fn bounding_rect(&self, element: ElementId) -> Option<Rect>;

    /// Whether the element is still part of the document
    fn is_attached(&self, element: ElementId) -> bool;

    /// False for `display:none` / `visibility:hidden` elements
    fn is_rendered(&self, element: ElementId) -> bool;

    fn viewport(&self) -> Size;

    fn observe_resize(&self, element: ElementId);
    fn unobserve_resize(&self, element: ElementId);

    /// Structural / attribute mutation observer at the common root
    fn observe_mutations(&self);
    fn disconnect_mutations(&self);

    fn listen_scroll(&self, target: ScrollTarget);
    fn unlisten_scroll(&self, target: ScrollTarget);
}

/// Animation frame primitive
///
/// After `request_frame` the host calls `TourService::on_animation_frame`
/// (or `ElementTracker::run_frame`) once, on its next frame.
pub trait FrameScheduler {
    fn request_frame(&self);
}

/// What the host must show before a step is measured
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrepareRequest {
    pub tour_id: String,
    pub step_id: String,
    pub step_index: usize,
    pub route: Option<String>,
    pub target: String,
}

/// Asks the host to navigate to / prepare the view for a step
pub trait ViewPreparer {
    fn prepare(&self, request: &PrepareRequest) -> anyhow::Result<()>;
}

/// Receives every overlay change (spotlight bounds, tooltip placement, visibility)
pub trait OverlayPresenter {
    fn present(&self, overlay: &OverlayState);
}

/// Global pointer-move / pointer-up listeners, attached only while dragging
pub trait PointerCapture {
    fn attach_global(&self);
    fn detach_global(&self);
}

/// Notifications the host forwards into the runtime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// Resize observer fired for a tracked element
    Resized { element: ElementId },
    /// Mutation observer fired (subtree or class/style/hidden attributes)
    Mutated,
    /// Window or nested container scrolled
    Scrolled,
    /// Viewport size changed
    ViewportResized { size: Size },
    /// The tooltip rendered and has a real size
    TooltipMeasured { size: Size },
}

/// Every port the orchestration service needs, bundled
#[derive(Clone)]
pub struct HostPorts {
    pub geometry: Rc<dyn GeometryProvider>,
    pub frames: Rc<dyn FrameScheduler>,
    pub preparer: Rc<dyn ViewPreparer>,
    pub presenter: Rc<dyn OverlayPresenter>,
    pub pointer: Rc<dyn PointerCapture>,
}
