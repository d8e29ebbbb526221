//! Tour orchestration service

use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::constants::positioning::MEASURE_TOLERANCE;
use crate::drag::DragController;
use crate::error::Result;
use crate::geometry::{Point, Rect, Size};
use crate::host::{HostEvent, HostPorts, PrepareRequest};
use crate::persistence::TourPreferences;
use crate::positioning::{Placement, PositioningEngine, PositioningResult, preferred_order};
use crate::timers::TimerQueue;
use crate::tour::{
    EventSink, NextOutcome, StartOptions, StopReason, StopSummary, TourCatalogue, TourMachine,
    TourRuntimeState,
};
use crate::tracker::{BoundsCallback, ChangeSource, ElementTracker, TrackerStats, TrackingUpdate};

/// Everything the host needs to draw the spotlight and tooltip
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverlayState {
    pub visible: bool,
    pub paused: bool,
    pub loading: bool,
    pub tour_id: Option<String>,
    pub step_id: Option<String>,
    pub step_index: usize,
    pub total_steps: usize,
    pub title: String,
    pub content: String,
    /// Padded target bounds; `None` while the target is missing
    pub spotlight: Option<Rect>,
    pub tooltip: Option<PositioningResult>,
    /// The user dragged the tooltip; automatic placement is suspended
    pub manual_position: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HighlightOptions {
    /// Falls back to the configured tracking padding
    pub padding: Option<f64>,
    pub placement: Placement,
}

/// Deferred work is dropped on delivery when its generation is stale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    Settle { generation: u64 },
    RetryTarget { generation: u64, attempt: u32 },
    AutoComplete { generation: u64 },
}

impl Deferred {
    fn generation(&self) -> u64 {
        match self {
            Deferred::Settle { generation }
            | Deferred::RetryTarget { generation, .. }
            | Deferred::AutoComplete { generation } => *generation,
        }
    }
}

#[derive(Debug, Clone)]
struct Highlight {
    locator: String,
    options: HighlightOptions,
    spotlight: Option<Rect>,
    tracking: bool,
}

type Inbox = Rc<RefCell<Vec<(String, TrackingUpdate)>>>;

pub struct TourService {
    machine: TourMachine,
    tracker: ElementTracker,
    engine: PositioningEngine,
    drag: DragController,
    ports: HostPorts,
    config: RuntimeConfig,
    timers: TimerQueue<Deferred>,
    generation: u64,
    now: Duration,
    inbox: Inbox,
    highlight: Option<Highlight>,
    revealed: bool,
    tooltip: Option<PositioningResult>,
    tooltip_size: Size,
    viewport: Size,
    manual_position: Option<Point>,
    layout_dirty: bool,
    frame_requested: bool,
    last_presented: Option<OverlayState>,
}

impl std::fmt::Debug for TourService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TourService")
            .field("machine", &self.machine)
            .field("generation", &self.generation)
            .field("now", &self.now)
            .field("highlight", &self.highlight)
            .field("pending_timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

impl TourService {
    pub fn new(
        catalogue: Rc<TourCatalogue>,
        ports: HostPorts,
        preferences: TourPreferences,
        config: RuntimeConfig,
    ) -> Self {
        let viewport = ports.geometry.viewport();
        let tooltip_size = config.default_tooltip_size();
        let tracker = ElementTracker::new(ports.geometry.clone(), ports.frames.clone())
            .with_tolerance(config.tracking.tolerance);
        let drag = DragController::new(
            ports.pointer.clone(),
            Point::default(),
            tooltip_size,
            viewport,
            config.drag_options(),
        );

        Self {
            machine: TourMachine::new(catalogue, preferences),
            tracker,
            engine: PositioningEngine::new(config.position_options()),
            drag,
            ports,
            config,
            timers: TimerQueue::new(),
            generation: 0,
            now: Duration::ZERO,
            inbox: Rc::new(RefCell::new(Vec::new())),
            highlight: None,
            revealed: false,
            tooltip: None,
            tooltip_size,
            viewport,
            manual_position: None,
            layout_dirty: false,
            frame_requested: false,
            last_presented: None,
        }
    }

    pub fn subscribe(&mut self, sink: Rc<dyn EventSink>) {
        self.machine.subscribe(sink);
    }

    pub fn state(&self) -> &TourRuntimeState {
        self.machine.state()
    }

    pub fn machine(&self) -> &TourMachine {
        &self.machine
    }

    pub fn preferences(&self) -> &TourPreferences {
        self.machine.preferences()
    }

    pub fn progress(&self) -> f64 {
        self.machine.progress()
    }

    pub fn tracker_stats(&self) -> TrackerStats {
        self.tracker.stats()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When the host should call `tick` next
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    pub fn start_tour(&mut self, tour_id: &str, options: StartOptions) -> Result<()> {
        self.machine.check_start(tour_id, options)?;
        if self.machine.state().is_active {
            // Full teardown first so the new session attaches fresh watchers
            self.stop_tour(StopReason::Superseded);
        }
        self.machine.start_tour(tour_id, options)?;
        self.enter_step();
        Ok(())
    }

    pub fn next_step(&mut self) -> Result<NextOutcome> {
        let outcome = self.machine.next_step()?;
        match outcome {
            NextOutcome::Advanced(_) => self.enter_step(),
            NextOutcome::Completed(_) => self.end_session(),
        }
        Ok(outcome)
    }

    pub fn previous_step(&mut self) -> bool {
        let moved = self.machine.previous_step();
        if moved {
            self.enter_step();
        }
        moved
    }

    pub fn go_to_step(&mut self, index: usize) -> Result<bool> {
        let moved = self.machine.go_to_step(index)?;
        if moved {
            self.enter_step();
        }
        Ok(moved)
    }

    /// Hide the overlay; tracking keeps running so resuming is instant
    pub fn pause_tour(&mut self) -> bool {
        if !self.machine.pause_tour() {
            return false;
        }
        self.cancel_auto_complete();
        self.drag.cancel();
        self.publish();
        true
    }

    pub fn resume_tour(&mut self) -> bool {
        if !self.machine.resume_tour() {
            return false;
        }
        if self.revealed {
            self.recompute_position();
            if self.machine.state().is_last_step() {
                self.arm_auto_complete();
            }
        }
        self.publish();
        true
    }

    pub fn stop_tour(&mut self, reason: StopReason) -> Option<StopSummary> {
        let summary = self.machine.stop_tour(reason)?;
        self.end_session();
        Some(summary)
    }

    /// Spotlight an arbitrary element outside the step flow
    ///
    /// Returns false when the locator matches nothing yet; the tooltip then
    /// floats and the target is retried in the background.
    pub fn highlight_element(&mut self, locator: &str, options: HighlightOptions) -> bool {
        self.manual_position = None;
        self.engine.reset();
        let found = self.install_highlight(locator.to_string(), options);
        self.revealed = true;
        self.recompute_position();
        self.publish();
        found
    }

    pub fn clear_highlight(&mut self) {
        if let Some(highlight) = self.highlight.take() {
            self.tracker.stop_tracking(&highlight.locator);
        }
        self.drag.cancel();
        self.revealed = false;
        self.tooltip = None;
        self.manual_position = None;
        self.publish();
    }

    /// Re-measure now instead of waiting for the next observed change
    pub fn force_position_recalculation(&mut self, reason: &str) {
        debug!(reason = %reason, "Forced position recalculation");
        if self.highlight.as_ref().is_some_and(|h| !h.tracking) {
            self.reacquire_target();
        }
        self.tracker.notify(ChangeSource::Mutation);
        self.tracker.run_frame(self.now);
        self.drain_inbox();
        self.recompute_position();
        self.publish();
    }

    pub fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Resized { element } => self.tracker.notify(ChangeSource::Resize(element)),
            HostEvent::Mutated => self.tracker.notify(ChangeSource::Mutation),
            HostEvent::Scrolled => self.tracker.notify(ChangeSource::Scroll),
            HostEvent::ViewportResized { size } => {
                self.viewport = size;
                self.drag.set_viewport(size);
                self.tracker.notify(ChangeSource::Viewport);
                self.mark_layout_dirty();
            }
            HostEvent::TooltipMeasured { size } => {
                if size.approx_eq(self.tooltip_size, MEASURE_TOLERANCE) {
                    return;
                }
                debug!(width = size.width, height = size.height, "Tooltip measured");
                self.tooltip_size = size;
                self.drag.set_size(size);
                self.mark_layout_dirty();
            }
        }
    }

    /// Host animation frame: one tracker pass, then at most one placement
    pub fn on_animation_frame(&mut self, now: Duration) {
        self.advance_clock(now);
        self.frame_requested = false;
        self.tracker.run_frame(self.now);
        let changed = self.drain_inbox();
        if changed || self.layout_dirty {
            self.layout_dirty = false;
            self.recompute_position();
        }
        self.publish();
    }

    /// Fire every deferred task that is due
    pub fn tick(&mut self, now: Duration) {
        self.advance_clock(now);
        for task in self.timers.drain_due(self.now) {
            if task.generation() != self.generation {
                debug!(?task, current = self.generation, "Discarding stale deferred task");
                continue;
            }
            match task {
                Deferred::Settle { .. } => self.settle(),
                Deferred::RetryTarget { attempt, .. } => self.retry_target(attempt),
                Deferred::AutoComplete { .. } => self.auto_complete(),
            }
        }
    }

    pub fn tooltip_pointer_down(&mut self, pointer: Point) -> bool {
        if !self.overlay_visible() || self.tooltip.is_none() {
            return false;
        }
        self.drag.pointer_down(pointer)
    }

    pub fn tooltip_pointer_move(&mut self, pointer: Point) -> Option<Point> {
        let position = self.drag.pointer_move(pointer)?;
        if self.drag.state().has_moved {
            self.move_tooltip(position);
            self.publish();
        }
        Some(position)
    }

    /// Ends a tooltip drag; a real drag pins the tooltip until the step changes
    pub fn tooltip_pointer_up(&mut self, pointer: Point) -> Option<Point> {
        let position = self.drag.pointer_up(pointer)?;
        info!(x = position.x, y = position.y, "Tooltip moved by user");
        self.manual_position = Some(position);
        self.move_tooltip(position);
        self.publish();
        Some(position)
    }

    pub fn overlay(&self) -> OverlayState {
        let state = self.machine.state();
        let step = self.machine.current_step();
        let visible = self.overlay_visible();
        OverlayState {
            visible,
            paused: state.is_paused,
            loading: state.is_loading,
            tour_id: state.current_tour_id.clone(),
            step_id: step.map(|s| s.id.clone()),
            step_index: state.current_step_index,
            total_steps: state.total_steps,
            title: step.map(|s| s.title.clone()).unwrap_or_default(),
            content: step.map(|s| s.content.clone()).unwrap_or_default(),
            spotlight: if visible {
                self.highlight.as_ref().and_then(|h| h.spotlight)
            } else {
                None
            },
            tooltip: if visible { self.tooltip.clone() } else { None },
            manual_position: self.manual_position.is_some(),
        }
    }

    fn overlay_visible(&self) -> bool {
        self.revealed && self.highlight.is_some() && !self.machine.state().is_paused
    }

    fn enter_step(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        self.revealed = false;
        self.tooltip = None;
        self.manual_position = None;
        self.drag.cancel();
        self.engine.reset();
        self.machine.set_loading(true);

        let Some(step) = self.machine.current_step() else {
            return;
        };
        let request = PrepareRequest {
            tour_id: self.machine.state().current_tour_id.clone().unwrap_or_default(),
            step_id: step.id.clone(),
            step_index: self.machine.state().current_step_index,
            route: step.route.clone(),
            target: step.target.clone(),
        };
        debug!(step = %request.step_id, generation = generation, "Entering step");
        if let Err(e) = self.ports.preparer.prepare(&request) {
            warn!(step = %request.step_id, error = %e, "View preparation failed, continuing");
        }
        self.publish();

        let delay = self.config.settling_delay();
        if delay.is_zero() {
            self.settle();
        } else {
            self.timers.schedule(self.now + delay, Deferred::Settle { generation });
        }
    }

    fn settle(&mut self) {
        self.machine.set_loading(false);
        let Some(step) = self.machine.current_step() else {
            return;
        };
        let locator = step.target.clone();
        let options = HighlightOptions {
            padding: step.padding,
            placement: step.position,
        };
        self.install_highlight(locator, options);
        self.revealed = true;
        self.recompute_position();
        self.publish();

        if self.machine.state().is_last_step() {
            self.arm_auto_complete();
        }
    }

    /// Point the tracker at `locator`, replacing the current highlight
    fn install_highlight(&mut self, locator: String, options: HighlightOptions) -> bool {
        let previous = self.highlight.take();
        // Track the new target before releasing the old one so the shared watchers stay attached
        let found = self.track(&locator, options);
        if let Some(previous) = previous
            && previous.locator != locator
        {
            self.tracker.stop_tracking(&previous.locator);
        }

        self.highlight = Some(Highlight {
            locator,
            options,
            spotlight: None,
            tracking: found,
        });
        self.drain_inbox();

        if !found {
            debug!("Target not found, tooltip floating until it appears");
            self.schedule_retry(1);
        }
        found
    }

    fn track(&mut self, locator: &str, options: HighlightOptions) -> bool {
        let inbox = self.inbox.clone();
        let callback: BoundsCallback = Box::new(move |locator, update| {
            inbox.borrow_mut().push((locator.to_string(), update));
        });
        self.tracker
            .start_tracking(locator, callback, self.config.track_options(options.padding))
    }

    fn reacquire_target(&mut self) -> bool {
        let Some((locator, options)) = self
            .highlight
            .as_ref()
            .map(|h| (h.locator.clone(), h.options))
        else {
            return false;
        };
        if !self.track(&locator, options) {
            return false;
        }
        info!(locator = %locator, "Target appeared");
        if let Some(highlight) = self.highlight.as_mut() {
            highlight.tracking = true;
        }
        self.drain_inbox();
        true
    }

    fn schedule_retry(&mut self, attempt: u32) {
        if attempt > self.config.timing.target_retry_attempts {
            if let Some(highlight) = &self.highlight {
                warn!(locator = %highlight.locator, attempts = attempt - 1, "Giving up on missing target");
            }
            return;
        }
        let deadline = self.now + self.config.retry_interval();
        self.timers.schedule(
            deadline,
            Deferred::RetryTarget {
                generation: self.generation,
                attempt,
            },
        );
    }

    fn retry_target(&mut self, attempt: u32) {
        let Some(highlight) = &self.highlight else {
            return;
        };
        if highlight.tracking {
            return;
        }
        if self.reacquire_target() {
            self.recompute_position();
            self.publish();
        } else {
            self.schedule_retry(attempt + 1);
        }
    }

    /// The grace period restarts from now
    fn arm_auto_complete(&mut self) {
        self.cancel_auto_complete();
        let deadline = self.now + self.config.auto_complete_delay();
        self.timers.schedule(
            deadline,
            Deferred::AutoComplete {
                generation: self.generation,
            },
        );
    }

    fn cancel_auto_complete(&mut self) {
        self.timers
            .cancel_where(|task| matches!(task, Deferred::AutoComplete { .. }));
    }

    fn auto_complete(&mut self) {
        if self.machine.complete_if_finished() {
            self.end_session();
        }
    }

    /// Release everything the finished session held
    fn end_session(&mut self) {
        self.generation += 1;
        self.timers.clear();
        self.drag.cancel();
        self.tracker.stop_all_tracking();
        self.inbox.borrow_mut().clear();
        self.highlight = None;
        self.revealed = false;
        self.tooltip = None;
        self.manual_position = None;
        self.engine.reset();
        self.publish();
    }

    /// Apply queued tracker callbacks to the highlight; true if anything changed
    fn drain_inbox(&mut self) -> bool {
        let updates: Vec<_> = self.inbox.borrow_mut().drain(..).collect();
        let Some(highlight) = self.highlight.as_mut() else {
            return false;
        };
        let mut changed = false;
        let mut lost = false;
        for (locator, update) in updates {
            if locator != highlight.locator {
                continue;
            }
            match update {
                TrackingUpdate::Bounds(rect) => {
                    highlight.spotlight = Some(rect);
                    highlight.tracking = true;
                }
                TrackingUpdate::Lost => {
                    highlight.spotlight = None;
                    highlight.tracking = false;
                    lost = true;
                }
            }
            changed = true;
        }
        if lost {
            self.schedule_retry(1);
        }
        changed
    }

    fn recompute_position(&mut self) {
        let Some(highlight) = self.highlight.as_ref() else {
            self.tooltip = None;
            return;
        };
        if self.drag.is_dragging() {
            return;
        }
        if let Some(origin) = self.manual_position {
            let placement = self.tooltip.as_ref().map(|t| t.placement).unwrap_or_default();
            self.tooltip = Some(PositioningResult {
                top: origin.y,
                left: origin.x,
                width: self.tooltip_size.width,
                height: self.tooltip_size.height,
                placement,
                floating: false,
                candidates: Vec::new(),
            });
            return;
        }

        let order = preferred_order(highlight.options.placement);
        let result = self
            .engine
            .compute(highlight.spotlight, self.tooltip_size, self.viewport, &order);
        self.drag.set_position(Point::new(result.left, result.top));
        self.drag.set_size(Size::new(result.width, result.height));
        self.drag.set_guides(highlight.spotlight.into_iter().collect());
        self.tooltip = Some(result);
    }

    fn move_tooltip(&mut self, position: Point) {
        if let Some(tooltip) = self.tooltip.as_mut() {
            tooltip.left = position.x;
            tooltip.top = position.y;
            tooltip.candidates.clear();
        }
    }

    fn mark_layout_dirty(&mut self) {
        self.layout_dirty = true;
        if !self.frame_requested && !self.tracker.frame_pending() {
            self.frame_requested = true;
            self.ports.frames.request_frame();
        }
    }

    fn advance_clock(&mut self, now: Duration) {
        if now > self.now {
            self.now = now;
        }
    }

    /// Push the overlay to the presenter when it changed
    fn publish(&mut self) {
        let overlay = self.overlay();
        if self.last_presented.as_ref() == Some(&overlay) {
            return;
        }
        self.ports.presenter.present(&overlay);
        self.last_presented = Some(overlay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessElement, HeadlessPage};
    use crate::tour::{RecordingSink, StepDefinition, TourDefinition};

    const SETTLE: Duration = Duration::from_millis(300);

    fn page() -> Rc<HeadlessPage> {
        let page = Rc::new(HeadlessPage::new(Size::new(1024.0, 768.0)));
        page.insert(HeadlessElement::new("#search", Rect::new(100.0, 100.0, 200.0, 40.0)));
        page.insert(HeadlessElement::new("#sidebar", Rect::new(0.0, 0.0, 60.0, 768.0)));
        page.insert(HeadlessElement::new("#save", Rect::new(800.0, 600.0, 80.0, 30.0)));
        page
    }

    fn catalogue() -> Rc<TourCatalogue> {
        let mut catalogue = TourCatalogue::new();
        catalogue
            .register(TourDefinition::new("basics", vec![
                StepDefinition::new("search", "#search").with_text("Search", "Find anything"),
                StepDefinition::new("sidebar", "#sidebar").with_position(Placement::Right),
                StepDefinition::new("save", "#save").with_padding(0.0),
            ]))
            .unwrap();
        catalogue
            .register(TourDefinition::new("late", vec![StepDefinition::new(
                "dialog", "#dialog",
            )]))
            .unwrap();
        Rc::new(catalogue)
    }

    fn service(page: &Rc<HeadlessPage>) -> TourService {
        TourService::new(
            catalogue(),
            HeadlessPage::ports(page),
            TourPreferences::in_memory(),
            RuntimeConfig::default(),
        )
    }

    #[test]
    fn test_step_revealed_after_settling() {
        let page = page();
        let mut service = service(&page);
        service.start_tour("basics", StartOptions::default()).unwrap();

        let hidden = service.overlay();
        assert!(!hidden.visible);
        assert!(hidden.loading);
        assert_eq!(page.prepared().len(), 1);
        assert_eq!(page.prepared()[0].target, "#search");

        service.tick(SETTLE);
        let overlay = service.overlay();
        assert!(overlay.visible);
        assert!(!overlay.loading);
        assert_eq!(overlay.title, "Search");
        assert_eq!(overlay.spotlight, Some(Rect::new(92.0, 92.0, 216.0, 56.0)));
        let tooltip = overlay.tooltip.unwrap();
        assert_eq!(tooltip.placement, Placement::Bottom);
        assert!(!tooltip.floating);
        assert_eq!(page.last_presented(), Some(service.overlay()));
    }

    #[test]
    fn test_stale_settle_is_discarded() {
        let page = page();
        let mut service = service(&page);
        service.start_tour("basics", StartOptions::default()).unwrap();
        service.tick(Duration::from_millis(100));
        service.next_step().unwrap();

        // The first step's settle comes due but belongs to an older generation
        service.tick(SETTLE);
        assert!(!service.overlay().visible);
        assert!(!service.tracker.is_tracking("#search"));

        service.tick(Duration::from_millis(400));
        let overlay = service.overlay();
        assert!(overlay.visible);
        assert_eq!(overlay.step_id.as_deref(), Some("sidebar"));
        assert_eq!(overlay.tooltip.unwrap().placement, Placement::Right);
    }

    #[test]
    fn test_missing_target_floats_then_recovers() {
        let page = page();
        let mut service = service(&page);
        service.start_tour("late", StartOptions::default()).unwrap();
        service.tick(SETTLE);

        let overlay = service.overlay();
        assert!(overlay.visible);
        assert_eq!(overlay.spotlight, None);
        assert!(overlay.tooltip.unwrap().floating);

        page.insert(HeadlessElement::new("#dialog", Rect::new(400.0, 300.0, 200.0, 100.0)));
        service.tick(SETTLE + Duration::from_millis(250));
        let overlay = service.overlay();
        assert_eq!(overlay.spotlight, Some(Rect::new(392.0, 292.0, 216.0, 116.0)));
        assert!(!overlay.tooltip.unwrap().floating);
    }

    #[test]
    fn test_retries_are_bounded() {
        let page = page();
        let mut config = RuntimeConfig::default();
        config.timing.target_retry_attempts = 2;
        let mut service = TourService::new(
            catalogue(),
            HeadlessPage::ports(&page),
            TourPreferences::in_memory(),
            config,
        );
        service.start_tour("late", StartOptions::default()).unwrap();
        service.tick(SETTLE);
        service.tick(SETTLE + Duration::from_millis(250));
        service.tick(SETTLE + Duration::from_millis(500));
        // Only the auto-complete timer of the single-step tour remains
        assert_eq!(service.timers.len(), 1);
    }

    #[test]
    fn test_lost_target_goes_floating() {
        let page = page();
        let mut service = service(&page);
        service.start_tour("basics", StartOptions::default()).unwrap();
        service.tick(SETTLE);

        page.remove("#search");
        service.handle_host_event(HostEvent::Mutated);
        service.on_animation_frame(Duration::from_millis(316));

        let overlay = service.overlay();
        assert!(overlay.visible);
        assert_eq!(overlay.spotlight, None);
        assert!(overlay.tooltip.unwrap().floating);
        assert!(!service.tracker.has_shared_watchers());
    }

    #[test]
    fn test_scroll_moves_spotlight_in_one_frame() {
        let page = page();
        let mut service = service(&page);
        service.start_tour("basics", StartOptions::default()).unwrap();
        service.tick(SETTLE);
        let passes = service.tracker_stats().passes;

        page.scroll_by(50.0);
        for _ in 0..20 {
            service.handle_host_event(HostEvent::Scrolled);
        }
        assert!(page.take_frame_request());
        service.on_animation_frame(Duration::from_millis(316));

        assert_eq!(service.tracker_stats().passes, passes + 1);
        assert_eq!(service.overlay().spotlight, Some(Rect::new(92.0, 42.0, 216.0, 56.0)));
    }

    #[test]
    fn test_tooltip_measurement_batched_and_tolerant() {
        let page = page();
        let mut service = service(&page);
        service.start_tour("basics", StartOptions::default()).unwrap();
        service.tick(SETTLE);
        page.take_frame_request();

        service.handle_host_event(HostEvent::TooltipMeasured {
            size: Size::new(320.5, 180.0),
        });
        assert!(!page.take_frame_request());

        service.handle_host_event(HostEvent::TooltipMeasured {
            size: Size::new(240.0, 120.0),
        });
        assert!(page.take_frame_request());
        // Not applied until the frame runs
        assert_eq!(service.overlay().tooltip.unwrap().width, 320.0);
        service.on_animation_frame(Duration::from_millis(316));
        let tooltip = service.overlay().tooltip.unwrap();
        assert_eq!((tooltip.width, tooltip.height), (240.0, 120.0));
    }

    #[test]
    fn test_pause_hides_and_resume_restores() {
        let page = page();
        let mut service = service(&page);
        service.start_tour("basics", StartOptions::default()).unwrap();
        service.tick(SETTLE);
        let before = service.overlay();

        assert!(service.pause_tour());
        assert!(!service.overlay().visible);
        assert!(service.tracker.is_tracking("#search"));

        assert!(service.resume_tour());
        assert_eq!(service.overlay(), before);
    }

    #[test]
    fn test_auto_complete_on_last_step() {
        let page = page();
        let mut service = service(&page);
        let sink = Rc::new(RecordingSink::new());
        service.subscribe(sink.clone());
        service.start_tour("basics", StartOptions::at_step(2)).unwrap();
        service.tick(SETTLE);
        assert!(service.state().is_active);

        service.tick(SETTLE + Duration::from_millis(2000));
        assert!(!service.state().is_active);
        assert!(service.preferences().is_completed("basics"));
        assert_eq!(sink.names().last(), Some(&"tour_stopped"));
        assert!(!service.overlay().visible);
    }

    #[test]
    fn test_auto_complete_waits_while_paused() {
        let page = page();
        let mut service = service(&page);
        service.start_tour("basics", StartOptions::at_step(2)).unwrap();
        service.tick(SETTLE);
        service.pause_tour();
        service.tick(Duration::from_millis(5000));
        assert!(service.state().is_active);

        service.resume_tour();
        service.tick(Duration::from_millis(7000));
        assert!(!service.state().is_active);
    }

    #[test]
    fn test_resume_restarts_auto_complete_grace() {
        let page = page();
        let mut service = service(&page);
        service.start_tour("basics", StartOptions::at_step(2)).unwrap();
        service.tick(SETTLE);
        service.tick(Duration::from_millis(2000));
        assert!(service.pause_tour());
        assert!(service.next_deadline().is_none());

        service.tick(Duration::from_millis(2100));
        assert!(service.resume_tour());
        assert_eq!(service.next_deadline(), Some(Duration::from_millis(4100)));

        // The deadline armed before the pause no longer applies
        service.tick(Duration::from_millis(2300));
        assert!(service.state().is_active);
        service.tick(Duration::from_millis(4099));
        assert!(service.state().is_active);

        service.tick(Duration::from_millis(4100));
        assert!(!service.state().is_active);
        assert!(service.preferences().is_completed("basics"));
    }

    #[test]
    fn test_leaving_last_step_cancels_auto_complete() {
        let page = page();
        let mut service = service(&page);
        service.start_tour("basics", StartOptions::at_step(2)).unwrap();
        service.tick(SETTLE);
        service.previous_step();
        service.tick(Duration::from_millis(5000));
        assert!(service.state().is_active);
        assert_eq!(service.state().current_step_index, 1);
    }

    #[test]
    fn test_drag_pins_tooltip_until_step_changes() {
        let page = page();
        let mut service = service(&page);
        service.start_tour("basics", StartOptions::default()).unwrap();
        service.tick(SETTLE);
        let tooltip = service.overlay().tooltip.unwrap();
        let grab = Point::new(tooltip.left + 10.0, tooltip.top + 10.0);

        assert!(service.tooltip_pointer_down(grab));
        assert!(page.global_pointer_attached());
        service.tooltip_pointer_move(Point::new(grab.x + 200.0, grab.y + 200.0));
        let dropped = service
            .tooltip_pointer_up(Point::new(grab.x + 200.0, grab.y + 200.0))
            .unwrap();
        assert!(!page.global_pointer_attached());

        let overlay = service.overlay();
        assert!(overlay.manual_position);
        assert_eq!(overlay.tooltip.as_ref().unwrap().left, dropped.x);

        // Geometry changes no longer move the pinned tooltip
        page.scroll_by(20.0);
        service.handle_host_event(HostEvent::Scrolled);
        service.on_animation_frame(Duration::from_millis(316));
        assert_eq!(service.overlay().tooltip.unwrap().top, dropped.y);

        service.next_step().unwrap();
        service.tick(Duration::from_millis(700));
        assert!(!service.overlay().manual_position);
    }

    #[test]
    fn test_click_on_tooltip_keeps_automatic_placement() {
        let page = page();
        let mut service = service(&page);
        service.start_tour("basics", StartOptions::default()).unwrap();
        service.tick(SETTLE);
        let tooltip = service.overlay().tooltip.unwrap();
        let grab = Point::new(tooltip.left + 10.0, tooltip.top + 10.0);

        assert!(service.tooltip_pointer_down(grab));
        assert_eq!(service.tooltip_pointer_up(grab), None);
        assert!(!service.overlay().manual_position);
    }

    #[test]
    fn test_prepare_failure_does_not_block_navigation() {
        let page = page();
        page.fail_prepare(true);
        let mut service = service(&page);
        service.start_tour("basics", StartOptions::default()).unwrap();
        service.tick(SETTLE);
        assert!(service.overlay().visible);
    }

    #[test]
    fn test_highlight_element_outside_tour() {
        let page = page();
        let mut service = service(&page);
        assert!(service.highlight_element("#save", HighlightOptions::default()));
        let overlay = service.overlay();
        assert!(overlay.visible);
        assert_eq!(overlay.tour_id, None);
        assert_eq!(overlay.spotlight, Some(Rect::new(792.0, 592.0, 96.0, 46.0)));

        service.clear_highlight();
        assert!(!service.overlay().visible);
        assert!(!service.tracker.has_shared_watchers());
    }

    #[test]
    fn test_force_recalculation_picks_up_silent_change() {
        let page = page();
        let mut service = service(&page);
        service.start_tour("basics", StartOptions::default()).unwrap();
        service.tick(SETTLE);

        page.set_rect("#search", Rect::new(300.0, 100.0, 200.0, 40.0));
        service.force_position_recalculation("async content rendered");
        assert_eq!(service.overlay().spotlight, Some(Rect::new(292.0, 92.0, 216.0, 56.0)));
    }

    #[test]
    fn test_unknown_tour_leaves_running_tour_alone() {
        let page = page();
        let mut service = service(&page);
        service.start_tour("basics", StartOptions::default()).unwrap();
        service.tick(SETTLE);
        assert!(service.start_tour("nope", StartOptions::default()).is_err());
        assert!(service.overlay().visible);
        assert_eq!(service.state().current_tour_id.as_deref(), Some("basics"));
    }
}
