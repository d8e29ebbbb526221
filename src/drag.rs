use std::rc::Rc;
use tracing::{debug, trace};

use crate::constants::drag;
use crate::geometry::{Point, Rect, Size};
use crate::host::PointerCapture;
use crate::snapping;

pub type DragEndCallback = Box<dyn FnMut(Point)>;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DragState {
    pub position: Point,
    pub is_dragging: bool,
    pub has_moved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragOptions {
    pub clamp_to_viewport: bool,
    pub margin: f64,
    pub move_threshold: f64,
    /// 0 disables snapping
    pub snap_threshold: f64,
}

impl Default for DragOptions {
    fn default() -> Self {
        Self {
            clamp_to_viewport: true,
            margin: drag::VIEWPORT_MARGIN,
            move_threshold: drag::MOVE_THRESHOLD,
            snap_threshold: drag::SNAP_THRESHOLD,
        }
    }
}

pub struct DragController {
    state: DragState,
    size: Size,
    /// Grab region relative to the overlay origin; `None` = whole overlay
    handle: Option<Rect>,
    viewport: Size,
    options: DragOptions,
    guides: Vec<Rect>,
    grab_offset: Point,
    press_point: Point,
    start_position: Point,
    capture: Rc<dyn PointerCapture>,
    listening: bool,
    on_end: Option<DragEndCallback>,
}

impl std::fmt::Debug for DragController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DragController")
            .field("state", &self.state)
            .field("size", &self.size)
            .field("handle", &self.handle)
            .field("viewport", &self.viewport)
            .field("listening", &self.listening)
            .finish_non_exhaustive()
    }
}

impl DragController {
    pub fn new(
        capture: Rc<dyn PointerCapture>,
        position: Point,
        size: Size,
        viewport: Size,
        options: DragOptions,
    ) -> Self {
        Self {
            state: DragState {
                position,
                ..DragState::default()
            },
            size,
            handle: None,
            viewport,
            options,
            guides: Vec::new(),
            grab_offset: Point::default(),
            press_point: Point::default(),
            start_position: position,
            capture,
            listening: false,
            on_end: None,
        }
    }

    pub fn with_handle(mut self, handle: Rect) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn on_drag_end(&mut self, callback: DragEndCallback) {
        self.on_end = Some(callback);
    }

    pub fn state(&self) -> DragState {
        self.state
    }

    pub fn position(&self) -> Point {
        self.state.position
    }

    pub fn is_dragging(&self) -> bool {
        self.state.is_dragging
    }

    /// Move the overlay programmatically (ignored mid-drag)
    pub fn set_position(&mut self, position: Point) {
        if !self.state.is_dragging {
            self.state.position = position;
        }
    }

    pub fn set_size(&mut self, size: Size) {
        self.size = size;
    }

    pub fn set_viewport(&mut self, viewport: Size) {
        self.viewport = viewport;
    }

    /// Extra rectangles to snap against besides the viewport edges
    pub fn set_guides(&mut self, guides: Vec<Rect>) {
        self.guides = guides;
    }

    /// Returns true when the press landed on the handle and a drag began
    pub fn pointer_down(&mut self, pointer: Point) -> bool {
        if self.state.is_dragging {
            return false;
        }
        let overlay = Rect::from_origin(self.state.position, self.size);
        let grab_area = match self.handle {
            Some(handle) => Rect::new(
                overlay.x + handle.x,
                overlay.y + handle.y,
                handle.width,
                handle.height,
            ),
            None => overlay,
        };
        if !grab_area.contains_point(pointer) {
            return false;
        }

        self.grab_offset = Point::new(pointer.x - overlay.x, pointer.y - overlay.y);
        self.press_point = pointer;
        self.start_position = self.state.position;
        self.state.is_dragging = true;
        self.state.has_moved = false;
        self.attach();
        debug!(x = pointer.x, y = pointer.y, "Drag started");
        true
    }

    /// Live position while dragging, `None` when no drag is in progress
    pub fn pointer_move(&mut self, pointer: Point) -> Option<Point> {
        if !self.state.is_dragging {
            return None;
        }
        if !self.state.has_moved && pointer.distance_to(self.press_point) <= self.options.move_threshold {
            return Some(self.state.position);
        }
        self.state.has_moved = true;

        let raw = Point::new(pointer.x - self.grab_offset.x, pointer.y - self.grab_offset.y);
        let position = self.constrain(raw);
        self.state.position = position;
        trace!(x = position.x, y = position.y, "Dragging");
        Some(position)
    }

    /// Ends the gesture; the final position is returned (and delivered) only for real drags
    pub fn pointer_up(&mut self, pointer: Point) -> Option<Point> {
        if !self.state.is_dragging {
            return None;
        }
        self.pointer_move(pointer);
        self.state.is_dragging = false;
        self.detach();

        if !self.state.has_moved {
            debug!("Pointer released without movement, treating as click");
            return None;
        }
        let position = self.state.position;
        debug!(x = position.x, y = position.y, "Drag finished");
        if let Some(callback) = self.on_end.as_mut() {
            callback(position);
        }
        Some(position)
    }

    /// Abort the gesture and put the overlay back where it started
    pub fn cancel(&mut self) {
        if !self.state.is_dragging {
            return;
        }
        self.state = DragState {
            position: self.start_position,
            ..DragState::default()
        };
        self.detach();
    }

    fn constrain(&self, raw: Point) -> Point {
        let bounds = Rect::new(0.0, 0.0, self.viewport.width, self.viewport.height).inset(self.options.margin);
        let mut position = raw;

        if self.options.snap_threshold > 0.0 {
            let mut guides = Vec::with_capacity(self.guides.len() + 1);
            guides.push(bounds);
            guides.extend(self.guides.iter().copied());
            if let Some(snapped) = snapping::find_snap_position(
                Rect::from_origin(position, self.size),
                &guides,
                self.options.snap_threshold,
            ) {
                position = snapped;
            }
        }

        if self.options.clamp_to_viewport {
            position.x = clamp_start(position.x, self.size.width, bounds.left(), bounds.right());
            position.y = clamp_start(position.y, self.size.height, bounds.top(), bounds.bottom());
        }
        position
    }

    fn attach(&mut self) {
        if !self.listening {
            self.capture.attach_global();
            self.listening = true;
        }
    }

    fn detach(&mut self) {
        if self.listening {
            self.capture.detach_global();
            self.listening = false;
        }
    }
}

impl Drop for DragController {
    fn drop(&mut self) {
        self.detach();
    }
}

fn clamp_start(start: f64, length: f64, min: f64, max: f64) -> f64 {
    if length >= max - min {
        min
    } else {
        start.clamp(min, max - length)
    }
}
