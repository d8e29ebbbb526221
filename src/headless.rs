//! In-memory page implementing every host port

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, info};

use crate::geometry::{Rect, Size};
use crate::host::{
    ElementId, FrameScheduler, GeometryProvider, HostPorts, OverlayPresenter, PointerCapture,
    PrepareRequest, ScrollTarget, ViewPreparer,
};
use crate::service::OverlayState;

fn default_visible() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadlessElement {
    pub locator: String,
    pub rect: Rect,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Only appears once the host has shown this route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

impl HeadlessElement {
    pub fn new(locator: impl Into<String>, rect: Rect) -> Self {
        Self {
            locator: locator.into(),
            rect,
            visible: true,
            route: None,
        }
    }

    pub fn on_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageDescription {
    pub viewport: Size,
    #[serde(default)]
    pub elements: Vec<HeadlessElement>,
}

impl PageDescription {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read page description from {:?}", path))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse page description from {:?}", path))
    }
}

/// Watcher lifecycle, in call order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherEvent {
    ResizeObserved(ElementId),
    ResizeUnobserved(ElementId),
    MutationsObserved,
    MutationsDisconnected,
    ScrollListened(ScrollTarget),
    ScrollUnlistened(ScrollTarget),
}

#[derive(Debug, Clone)]
struct ElementState {
    element: HeadlessElement,
    attached: bool,
}

#[derive(Debug, Default)]
struct PageState {
    viewport: Size,
    elements: BTreeMap<ElementId, ElementState>,
    next_id: u64,
    current_route: Option<String>,
    resize_observed: BTreeSet<ElementId>,
    mutation_observer: bool,
    scroll_listeners: Vec<ScrollTarget>,
    frame_requested: bool,
    frame_requests: u64,
    global_pointer: bool,
    watcher_log: Vec<WatcherEvent>,
    prepared: Vec<PrepareRequest>,
    fail_prepare: bool,
    presented: Vec<OverlayState>,
    last_presented: Option<OverlayState>,
}

#[derive(Debug, Default)]
pub struct HeadlessPage {
    state: RefCell<PageState>,
}

impl HeadlessPage {
    pub fn new(viewport: Size) -> Self {
        Self {
            state: RefCell::new(PageState {
                viewport,
                ..PageState::default()
            }),
        }
    }

    /// All host ports backed by this page
    pub fn ports(page: &Rc<Self>) -> HostPorts {
        HostPorts {
            geometry: page.clone(),
            frames: page.clone(),
            preparer: page.clone(),
            presenter: page.clone(),
            pointer: page.clone(),
        }
    }

    pub fn from_description(description: PageDescription) -> Self {
        let page = Self::new(description.viewport);
        for element in description.elements {
            page.insert(element);
        }
        info!(elements = page.state.borrow().elements.len(), "Loaded headless page");
        page
    }

    pub fn insert(&self, element: HeadlessElement) -> ElementId {
        let mut state = self.state.borrow_mut();
        let id = ElementId(state.next_id);
        state.next_id += 1;
        state.elements.insert(
            id,
            ElementState {
                element,
                attached: true,
            },
        );
        id
    }

    /// Detach the element matching `locator`; its handle stays dangling
    pub fn remove(&self, locator: &str) -> bool {
        let mut state = self.state.borrow_mut();
        match state
            .elements
            .values_mut()
            .find(|entry| entry.attached && entry.element.locator == locator)
        {
            Some(entry) => {
                entry.attached = false;
                true
            }
            None => false,
        }
    }

    pub fn set_rect(&self, locator: &str, rect: Rect) -> Option<ElementId> {
        let mut state = self.state.borrow_mut();
        let (id, entry) = state
            .elements
            .iter_mut()
            .find(|(_, entry)| entry.attached && entry.element.locator == locator)?;
        entry.element.rect = rect;
        Some(*id)
    }

    pub fn set_visible(&self, locator: &str, visible: bool) -> bool {
        let mut state = self.state.borrow_mut();
        match state
            .elements
            .values_mut()
            .find(|entry| entry.attached && entry.element.locator == locator)
        {
            Some(entry) => {
                entry.element.visible = visible;
                true
            }
            None => false,
        }
    }

    /// Scroll the document: every element moves up by `dy`
    pub fn scroll_by(&self, dy: f64) {
        let mut state = self.state.borrow_mut();
        for entry in state.elements.values_mut() {
            entry.element.rect.y -= dy;
        }
    }

    pub fn set_viewport(&self, viewport: Size) {
        self.state.borrow_mut().viewport = viewport;
    }

    pub fn set_route(&self, route: Option<String>) {
        self.state.borrow_mut().current_route = route;
    }

    pub fn current_route(&self) -> Option<String> {
        self.state.borrow().current_route.clone()
    }

    /// Make `ViewPreparer::prepare` fail from now on
    pub fn fail_prepare(&self, fail: bool) {
        self.state.borrow_mut().fail_prepare = fail;
    }

    pub fn resolve_id(&self, locator: &str) -> Option<ElementId> {
        self.resolve(locator)
    }

    /// Consume the pending frame request, if any
    pub fn take_frame_request(&self) -> bool {
        std::mem::take(&mut self.state.borrow_mut().frame_requested)
    }

    pub fn frame_requests(&self) -> u64 {
        self.state.borrow().frame_requests
    }

    pub fn mutation_observer_connected(&self) -> bool {
        self.state.borrow().mutation_observer
    }

    pub fn scroll_listeners(&self) -> Vec<ScrollTarget> {
        self.state.borrow().scroll_listeners.clone()
    }

    pub fn resize_observed(&self) -> Vec<ElementId> {
        self.state.borrow().resize_observed.iter().copied().collect()
    }

    pub fn watcher_log(&self) -> Vec<WatcherEvent> {
        self.state.borrow().watcher_log.clone()
    }

    pub fn global_pointer_attached(&self) -> bool {
        self.state.borrow().global_pointer
    }

    pub fn prepared(&self) -> Vec<PrepareRequest> {
        self.state.borrow().prepared.clone()
    }

    /// Remove and return every overlay presented since the last call
    pub fn take_presented(&self) -> Vec<OverlayState> {
        std::mem::take(&mut self.state.borrow_mut().presented)
    }

    pub fn last_presented(&self) -> Option<OverlayState> {
        self.state.borrow().last_presented.clone()
    }

    fn find(&self, element: ElementId) -> Option<ElementState> {
        self.state.borrow().elements.get(&element).cloned()
    }

    fn route_matches(current: &Option<String>, element: &HeadlessElement) -> bool {
        match &element.route {
            Some(route) => current.as_deref() == Some(route.as_str()),
            None => true,
        }
    }
}

impl GeometryProvider for HeadlessPage {
    fn resolve(&self, locator: &str) -> Option<ElementId> {
        let state = self.state.borrow();
        state
            .elements
            .iter()
            .find(|(_, entry)| {
                entry.attached
                    && entry.element.locator == locator
                    && Self::route_matches(&state.current_route, &entry.element)
            })
            .map(|(id, _)| *id)
    }

    fn bounding_rect(&self, element: ElementId) -> Option<Rect> {
        self.find(element)
            .filter(|entry| entry.attached)
            .map(|entry| entry.element.rect)
    }

    fn is_attached(&self, element: ElementId) -> bool {
        let state = self.state.borrow();
        state.elements.get(&element).is_some_and(|entry| {
            entry.attached && Self::route_matches(&state.current_route, &entry.element)
        })
    }

    fn is_rendered(&self, element: ElementId) -> bool {
        self.find(element).is_some_and(|entry| entry.element.visible)
    }

    fn viewport(&self) -> Size {
        self.state.borrow().viewport
    }

    fn observe_resize(&self, element: ElementId) {
        let mut state = self.state.borrow_mut();
        state.resize_observed.insert(element);
        state.watcher_log.push(WatcherEvent::ResizeObserved(element));
    }

    fn unobserve_resize(&self, element: ElementId) {
        let mut state = self.state.borrow_mut();
        state.resize_observed.remove(&element);
        state.watcher_log.push(WatcherEvent::ResizeUnobserved(element));
    }

    fn observe_mutations(&self) {
        let mut state = self.state.borrow_mut();
        state.mutation_observer = true;
        state.watcher_log.push(WatcherEvent::MutationsObserved);
    }

    fn disconnect_mutations(&self) {
        let mut state = self.state.borrow_mut();
        state.mutation_observer = false;
        state.watcher_log.push(WatcherEvent::MutationsDisconnected);
    }

    fn listen_scroll(&self, target: ScrollTarget) {
        let mut state = self.state.borrow_mut();
        if !state.scroll_listeners.contains(&target) {
            state.scroll_listeners.push(target);
        }
        state.watcher_log.push(WatcherEvent::ScrollListened(target));
    }

    fn unlisten_scroll(&self, target: ScrollTarget) {
        let mut state = self.state.borrow_mut();
        state.scroll_listeners.retain(|listener| *listener != target);
        state.watcher_log.push(WatcherEvent::ScrollUnlistened(target));
    }
}

impl FrameScheduler for HeadlessPage {
    fn request_frame(&self) {
        let mut state = self.state.borrow_mut();
        state.frame_requested = true;
        state.frame_requests += 1;
    }
}

impl ViewPreparer for HeadlessPage {
    fn prepare(&self, request: &PrepareRequest) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.prepared.push(request.clone());
        if state.fail_prepare {
            return Err(anyhow!("route '{:?}' failed to render", request.route));
        }
        if request.route.is_some() {
            state.current_route = request.route.clone();
        }
        debug!(step = %request.step_id, route = ?request.route, "Headless page prepared view");
        Ok(())
    }
}

impl OverlayPresenter for HeadlessPage {
    fn present(&self, overlay: &OverlayState) {
        let mut state = self.state.borrow_mut();
        state.presented.push(overlay.clone());
        state.last_presented = Some(overlay.clone());
    }
}

impl PointerCapture for HeadlessPage {
    fn attach_global(&self) {
        self.state.borrow_mut().global_pointer = true;
    }

    fn detach_global(&self) {
        self.state.borrow_mut().global_pointer = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_description_parses() {
        let json = r##"{
            "viewport": { "width": 1024, "height": 768 },
            "elements": [
                { "locator": "#a", "rect": { "x": 1, "y": 2, "width": 3, "height": 4 } },
                { "locator": "#b", "rect": { "x": 0, "y": 0, "width": 5, "height": 5 }, "visible": false, "route": "/settings" }
            ]
        }"##;
        let description: PageDescription = serde_json::from_str(json).unwrap();
        assert_eq!(description.elements.len(), 2);
        assert!(description.elements[0].visible);
        assert_eq!(description.elements[1].route.as_deref(), Some("/settings"));
    }

    #[test]
    fn test_removed_element_is_detached() {
        let page = HeadlessPage::new(Size::new(100.0, 100.0));
        let id = page.insert(HeadlessElement::new("#a", Rect::new(0.0, 0.0, 10.0, 10.0)));
        assert!(page.is_attached(id));
        assert!(page.remove("#a"));
        assert!(!page.is_attached(id));
        assert_eq!(page.resolve("#a"), None);
        assert_eq!(page.bounding_rect(id), None);
    }

    #[test]
    fn test_route_scoped_element_resolves_after_prepare() {
        let page = HeadlessPage::new(Size::new(100.0, 100.0));
        page.insert(HeadlessElement::new("#panel", Rect::new(0.0, 0.0, 10.0, 10.0)).on_route("/reports"));
        assert_eq!(page.resolve("#panel"), None);

        let request = PrepareRequest {
            tour_id: "t".to_string(),
            step_id: "s".to_string(),
            step_index: 0,
            route: Some("/reports".to_string()),
            target: "#panel".to_string(),
        };
        page.prepare(&request).unwrap();
        assert!(page.resolve("#panel").is_some());
        assert_eq!(page.prepared().len(), 1);
    }

    #[test]
    fn test_frame_request_taken_once() {
        let page = HeadlessPage::new(Size::new(100.0, 100.0));
        page.request_frame();
        page.request_frame();
        assert!(page.take_frame_request());
        assert!(!page.take_frame_request());
        assert_eq!(page.frame_requests(), 2);
    }

    #[test]
    fn test_take_presented_drains() {
        let page = HeadlessPage::new(Size::new(100.0, 100.0));
        let first = OverlayState::default();
        let second = OverlayState {
            visible: true,
            ..OverlayState::default()
        };
        page.present(&first);
        page.present(&second);

        assert_eq!(page.take_presented(), vec![first, second.clone()]);
        assert!(page.take_presented().is_empty());
        assert_eq!(page.last_presented(), Some(second));
    }
}
