use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::constants::player::FRAME_INTERVAL_MS;
use crate::geometry::{Point, Rect};
use crate::headless::{HeadlessElement, HeadlessPage, PageDescription};
use crate::host::HostEvent;
use crate::persistence::TourPreferences;
use crate::positioning::Placement;
use crate::service::{HighlightOptions, OverlayState, TourService};
use crate::tour::{
    EventRecord, RecordingSink, StartOptions, StopReason, TourCatalogue, TracingSink,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Start {
        tour: String,
        #[serde(default)]
        start_step: Option<usize>,
    },
    Next,
    Previous,
    GoTo {
        index: usize,
    },
    Pause,
    Resume,
    Stop {
        #[serde(default = "default_stop_reason")]
        reason: StopReason,
    },
    Highlight {
        locator: String,
        #[serde(default)]
        placement: Placement,
    },
    ClearHighlight,
    Recalculate {
        #[serde(default)]
        reason: String,
    },
    /// Scroll the page content and notify the service
    Scroll {
        dy: f64,
    },
    /// Move or resize an element and notify the service
    SetRect {
        locator: String,
        rect: Rect,
    },
    /// Add an element and notify the service
    Insert {
        element: HeadlessElement,
    },
    /// Remove an element and notify the service
    Remove {
        locator: String,
    },
    /// Forward a raw host event
    Host {
        event: HostEvent,
    },
    PointerDown {
        x: f64,
        y: f64,
    },
    PointerMove {
        x: f64,
        y: f64,
    },
    PointerUp {
        x: f64,
        y: f64,
    },
}

fn default_stop_reason() -> StopReason {
    StopReason::Skipped
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    pub steps: Vec<ScriptStep>,
    /// Keep running this long after the last action (timers, auto-complete)
    #[serde(default = "default_tail_ms")]
    pub tail_ms: u64,
}

fn default_tail_ms() -> u64 {
    3000
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read script from {:?}", path))?;
        let mut script: Script = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse script from {:?}", path))?;
        script.steps.sort_by_key(|step| step.at_ms);
        Ok(script)
    }

    pub fn end_ms(&self) -> u64 {
        self.steps.last().map_or(0, |step| step.at_ms) + self.tail_ms
    }
}

/// One JSON line of player output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayerOutput {
    Event {
        at_ms: u64,
        #[serde(flatten)]
        record: EventRecord,
    },
    Overlay {
        at_ms: u64,
        overlay: OverlayState,
    },
    Error {
        at_ms: u64,
        action: String,
        message: String,
    },
}

pub struct Player {
    page: Rc<HeadlessPage>,
    service: TourService,
    sink: Rc<RecordingSink>,
    script: Script,
    cursor: usize,
    now_ms: u64,
}

impl Player {
    pub fn new(
        catalogue: TourCatalogue,
        page: PageDescription,
        script: Script,
        preferences: TourPreferences,
        config: RuntimeConfig,
    ) -> Self {
        let page = Rc::new(HeadlessPage::from_description(page));
        let mut service = TourService::new(
            Rc::new(catalogue),
            HeadlessPage::ports(&page),
            preferences,
            config,
        );
        let sink = Rc::new(RecordingSink::new());
        service.subscribe(Rc::new(TracingSink));
        service.subscribe(sink.clone());
        Self {
            page,
            service,
            sink,
            script,
            cursor: 0,
            now_ms: 0,
        }
    }

    pub fn service(&self) -> &TourService {
        &self.service
    }

    pub fn page(&self) -> &Rc<HeadlessPage> {
        &self.page
    }

    pub fn is_finished(&self) -> bool {
        self.now_ms > self.script.end_ms()
    }

    /// Run the whole script on the simulated clock
    pub fn run_to_end(&mut self) -> Vec<PlayerOutput> {
        let mut output = Vec::new();
        while !self.is_finished() {
            output.extend(self.advance());
        }
        info!(
            actions = self.script.steps.len(),
            lines = output.len(),
            "Script finished"
        );
        output
    }

    /// Process one simulated frame and move the clock forward
    pub fn advance(&mut self) -> Vec<PlayerOutput> {
        let now_ms = self.now_ms;
        let now = Duration::from_millis(now_ms);
        let mut output = Vec::new();

        while let Some(step) = self.script.steps.get(self.cursor) {
            if step.at_ms > now_ms {
                break;
            }
            let step = step.clone();
            self.cursor += 1;
            debug!(at_ms = step.at_ms, action = ?step.action, "Applying action");
            if let Err(e) = self.apply(&step.action) {
                warn!(at_ms = now_ms, error = %e, "Action failed");
                output.push(PlayerOutput::Error {
                    at_ms: now_ms,
                    action: format!("{:?}", step.action),
                    message: e.to_string(),
                });
            }
            self.collect(now_ms, &mut output);
        }

        self.service.tick(now);
        if self.page.take_frame_request() {
            self.service.on_animation_frame(now);
        }
        self.collect(now_ms, &mut output);

        self.now_ms += FRAME_INTERVAL_MS;
        output
    }

    fn apply(&mut self, action: &Action) -> Result<()> {
        match action {
            Action::Start { tour, start_step } => {
                self.service.start_tour(
                    tour,
                    StartOptions {
                        start_step: *start_step,
                    },
                )?;
            }
            Action::Next => {
                self.service.next_step()?;
            }
            Action::Previous => {
                self.service.previous_step();
            }
            Action::GoTo { index } => {
                self.service.go_to_step(*index)?;
            }
            Action::Pause => {
                self.service.pause_tour();
            }
            Action::Resume => {
                self.service.resume_tour();
            }
            Action::Stop { reason } => {
                self.service.stop_tour(*reason);
            }
            Action::Highlight { locator, placement } => {
                self.service.highlight_element(
                    locator,
                    HighlightOptions {
                        padding: None,
                        placement: *placement,
                    },
                );
            }
            Action::ClearHighlight => self.service.clear_highlight(),
            Action::Recalculate { reason } => self.service.force_position_recalculation(reason),
            Action::Scroll { dy } => {
                self.page.scroll_by(*dy);
                self.service.handle_host_event(HostEvent::Scrolled);
            }
            Action::SetRect { locator, rect } => {
                let element = self
                    .page
                    .set_rect(locator, *rect)
                    .with_context(|| format!("No element '{}' on the page", locator))?;
                self.service.handle_host_event(HostEvent::Resized { element });
            }
            Action::Insert { element } => {
                self.page.insert(element.clone());
                self.service.handle_host_event(HostEvent::Mutated);
            }
            Action::Remove { locator } => {
                if !self.page.remove(locator) {
                    anyhow::bail!("No element '{}' on the page", locator);
                }
                self.service.handle_host_event(HostEvent::Mutated);
            }
            Action::Host { event } => {
                if let HostEvent::ViewportResized { size } = event {
                    self.page.set_viewport(*size);
                }
                self.service.handle_host_event(*event);
            }
            Action::PointerDown { x, y } => {
                self.service.tooltip_pointer_down(Point::new(*x, *y));
            }
            Action::PointerMove { x, y } => {
                self.service.tooltip_pointer_move(Point::new(*x, *y));
            }
            Action::PointerUp { x, y } => {
                self.service.tooltip_pointer_up(Point::new(*x, *y));
            }
        }
        Ok(())
    }

    fn collect(&mut self, at_ms: u64, output: &mut Vec<PlayerOutput>) {
        for record in self.sink.take() {
            output.push(PlayerOutput::Event { at_ms, record });
        }
        for overlay in self.page.take_presented() {
            output.push(PlayerOutput::Overlay { at_ms, overlay });
        }
    }
}
