use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::constants::tracking;
use crate::geometry::Rect;
use crate::host::{ElementId, FrameScheduler, GeometryProvider, ScrollTarget};

/// What a tracked locator reports to its callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackingUpdate {
    /// New spotlight bounds (element rect expanded by the entry's padding)
    Bounds(Rect),
    /// Element left the document; the entry has been unregistered
    Lost,
}

pub type BoundsCallback = Box<dyn FnMut(&str, TrackingUpdate)>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackOptions {
    pub padding: f64,
    /// Minimum time between two recomputations of this entry
    pub throttle: Duration,
}

impl Default for TrackOptions {
    fn default() -> Self {
        Self {
            padding: tracking::DEFAULT_PADDING,
            throttle: Duration::from_millis(tracking::DEFAULT_THROTTLE_MS),
        }
    }
}

/// Why a recomputation was requested
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChangeSource {
    Resize(ElementId),
    Mutation,
    Scroll,
    Viewport,
}

/// Counters for diagnostics and tests
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStats {
    pub passes: u64,
    pub frame_requests: u64,
    pub notifications: u64,
    pub watcher_attachments: u64,
    pub watcher_teardowns: u64,
}

struct TrackedEntry {
    element: ElementId,
    /// `None` until the element has been reported while rendered
    bounds: Option<Rect>,
    options: TrackOptions,
    last_computed: Option<Duration>,
    callback: BoundsCallback,
}

impl std::fmt::Debug for TrackedEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedEntry")
            .field("element", &self.element)
            .field("bounds", &self.bounds)
            .field("options", &self.options)
            .field("last_computed", &self.last_computed)
            .finish_non_exhaustive()
    }
}

/// Shared watchers serve every entry; any number of notifications between
/// two frames costs one recomputation pass.
pub struct ElementTracker {
    provider: Rc<dyn GeometryProvider>,
    frames: Rc<dyn FrameScheduler>,
    entries: BTreeMap<String, TrackedEntry>,
    watchers_attached: bool,
    frame_pending: bool,
    tolerance: f64,
    stats: TrackerStats,
}

impl ElementTracker {
    pub fn new(provider: Rc<dyn GeometryProvider>, frames: Rc<dyn FrameScheduler>) -> Self {
        Self {
            provider,
            frames,
            entries: BTreeMap::new(),
            watchers_attached: false,
            frame_pending: false,
            tolerance: tracking::BOUNDS_TOLERANCE,
            stats: TrackerStats::default(),
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Start tracking `locator`
    ///
    /// Returns false when the locator matches nothing right now. When it
    /// matches and is rendered, `callback` receives the initial bounds before
    /// this returns; a hidden match is reported on the first pass after it
    /// becomes visible. Tracking an already tracked locator replaces the
    /// previous entry.
    pub fn start_tracking(
        &mut self,
        locator: &str,
        mut callback: BoundsCallback,
        options: TrackOptions,
    ) -> bool {
        if self.entries.contains_key(locator) {
            self.remove_entry(locator);
        }

        let resolved = self
            .provider
            .resolve(locator)
            .and_then(|element| self.provider.bounding_rect(element).map(|rect| (element, rect)));
        let Some((element, rect)) = resolved else {
            debug!(locator = %locator, "Locator matched no element");
            if self.entries.is_empty() {
                self.teardown_watchers();
            }
            return false;
        };

        self.ensure_watchers();
        self.provider.observe_resize(element);

        let bounds = if self.provider.is_rendered(element) {
            let bounds = rect.expand(options.padding);
            callback(locator, TrackingUpdate::Bounds(bounds));
            Some(bounds)
        } else {
            debug!(locator = %locator, "Element is hidden, waiting for it to render");
            None
        };

        debug!(locator = %locator, element = ?element, ?bounds, "Tracking element");
        self.entries.insert(
            locator.to_string(),
            TrackedEntry {
                element,
                bounds,
                options,
                last_computed: None,
                callback,
            },
        );
        true
    }

    pub fn stop_tracking(&mut self, locator: &str) -> bool {
        let removed = self.remove_entry(locator);
        if removed && self.entries.is_empty() {
            self.teardown_watchers();
        }
        removed
    }

    pub fn stop_all_tracking(&mut self) {
        for entry in self.entries.values() {
            self.provider.unobserve_resize(entry.element);
        }
        self.entries.clear();
        self.teardown_watchers();
    }

    /// Record a change notification; schedules at most one frame
    pub fn notify(&mut self, source: ChangeSource) {
        if self.entries.is_empty() {
            return;
        }
        if let ChangeSource::Resize(element) = source
            && !self.entries.values().any(|entry| entry.element == element)
        {
            return;
        }
        self.stats.notifications += 1;
        trace!(?source, "Geometry change");
        self.request_frame();
    }

    /// Animation frame callback: one recomputation pass over every entry
    ///
    /// Returns how many callbacks were invoked. A frame nobody asked for
    /// does nothing.
    pub fn run_frame(&mut self, now: Duration) -> usize {
        if !self.frame_pending {
            return 0;
        }
        self.frame_pending = false;
        self.stats.passes += 1;

        let provider = &self.provider;
        let tolerance = self.tolerance;
        let mut delivered = 0;
        let mut deferred = false;
        let mut detached = Vec::new();

        for (locator, entry) in self.entries.iter_mut() {
            if !provider.is_attached(entry.element) {
                detached.push(locator.clone());
                continue;
            }
            if !provider.is_rendered(entry.element) {
                trace!(locator = %locator, "Skipping hidden element");
                continue;
            }
            if let Some(last) = entry.last_computed
                && now.saturating_sub(last) < entry.options.throttle
            {
                deferred = true;
                continue;
            }
            let Some(rect) = provider.bounding_rect(entry.element) else {
                detached.push(locator.clone());
                continue;
            };
            entry.last_computed = Some(now);

            let bounds = rect.expand(entry.options.padding);
            if entry
                .bounds
                .is_none_or(|previous| bounds.differs_from(&previous, tolerance))
            {
                entry.bounds = Some(bounds);
                (entry.callback)(locator, TrackingUpdate::Bounds(bounds));
                delivered += 1;
            }
        }

        for locator in detached {
            if let Some(mut entry) = self.entries.remove(&locator) {
                warn!(locator = %locator, element = ?entry.element, "Tracked element left the document, unregistering");
                self.provider.unobserve_resize(entry.element);
                (entry.callback)(&locator, TrackingUpdate::Lost);
                delivered += 1;
            }
        }

        if self.entries.is_empty() {
            self.teardown_watchers();
        } else if deferred {
            self.request_frame();
        }
        delivered
    }

    pub fn bounds(&self, locator: &str) -> Option<Rect> {
        self.entries.get(locator).and_then(|entry| entry.bounds)
    }

    pub fn is_tracking(&self, locator: &str) -> bool {
        self.entries.contains_key(locator)
    }

    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    pub fn has_shared_watchers(&self) -> bool {
        self.watchers_attached
    }

    pub fn frame_pending(&self) -> bool {
        self.frame_pending
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    fn request_frame(&mut self) {
        if self.frame_pending {
            return;
        }
        self.frame_pending = true;
        self.stats.frame_requests += 1;
        self.frames.request_frame();
    }

    fn remove_entry(&mut self, locator: &str) -> bool {
        match self.entries.remove(locator) {
            Some(entry) => {
                self.provider.unobserve_resize(entry.element);
                debug!(locator = %locator, "Stopped tracking element");
                true
            }
            None => false,
        }
    }

    fn ensure_watchers(&mut self) {
        if self.watchers_attached {
            return;
        }
        self.provider.observe_mutations();
        self.provider.listen_scroll(ScrollTarget::Window);
        self.provider.listen_scroll(ScrollTarget::Document);
        self.watchers_attached = true;
        self.stats.watcher_attachments += 1;
        debug!("Attached shared geometry watchers");
    }

    fn teardown_watchers(&mut self) {
        if !self.watchers_attached {
            return;
        }
        self.provider.disconnect_mutations();
        self.provider.unlisten_scroll(ScrollTarget::Window);
        self.provider.unlisten_scroll(ScrollTarget::Document);
        self.watchers_attached = false;
        self.frame_pending = false;
        self.stats.watcher_teardowns += 1;
        debug!("Detached shared geometry watchers");
    }
}

impl Drop for ElementTracker {
    fn drop(&mut self) {
        self.stop_all_tracking();
    }
}
