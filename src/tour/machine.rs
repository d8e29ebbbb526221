//! Tour lifecycle: `Idle -> Active <-> Paused -> Idle`

use serde::Serialize;
use std::rc::Rc;
use tracing::{debug, error, info, warn};

use super::catalogue::{StepContext, StepDefinition, TourCatalogue, TourDefinition};
use super::events::{EventRecord, EventSink, StopReason, TourEvent};
use crate::error::{Result, TourError};
use crate::persistence::TourPreferences;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TourRuntimeState {
    pub is_active: bool,
    pub is_paused: bool,
    /// Waiting for the host to settle after a step change
    pub is_loading: bool,
    pub current_tour_id: Option<String>,
    pub current_step_index: usize,
    pub total_steps: usize,
    /// Indices left behind, oldest first (append-only within a session)
    pub step_history: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TourPhase {
    Idle,
    Active,
    Paused,
}

impl TourRuntimeState {
    pub fn phase(&self) -> TourPhase {
        match (self.is_active, self.is_paused) {
            (false, _) => TourPhase::Idle,
            (true, false) => TourPhase::Active,
            (true, true) => TourPhase::Paused,
        }
    }

    pub fn is_last_step(&self) -> bool {
        self.is_active && self.current_step_index + 1 == self.total_steps
    }

    /// Fraction of the tour reached, counting the current step
    pub fn progress(&self) -> f64 {
        if !self.is_active || self.total_steps == 0 {
            return 0.0;
        }
        (self.current_step_index + 1) as f64 / self.total_steps as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    pub start_step: Option<usize>,
}

impl StartOptions {
    pub fn at_step(index: usize) -> Self {
        Self {
            start_step: Some(index),
        }
    }
}

/// What `stop_tour` reports about the session it ended
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopSummary {
    pub tour_id: String,
    pub reason: StopReason,
    pub completion_rate: f64,
    pub step_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NextOutcome {
    Advanced(usize),
    Completed(StopSummary),
}

pub struct TourMachine {
    catalogue: Rc<TourCatalogue>,
    preferences: TourPreferences,
    state: TourRuntimeState,
    tour: Option<Rc<TourDefinition>>,
    sinks: Vec<Rc<dyn EventSink>>,
    sequence: u64,
}

impl std::fmt::Debug for TourMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TourMachine")
            .field("state", &self.state)
            .field("sinks", &self.sinks.len())
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl TourMachine {
    pub fn new(catalogue: Rc<TourCatalogue>, preferences: TourPreferences) -> Self {
        Self {
            catalogue,
            preferences,
            state: TourRuntimeState::default(),
            tour: None,
            sinks: Vec::new(),
            sequence: 0,
        }
    }

    pub fn subscribe(&mut self, sink: Rc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn state(&self) -> &TourRuntimeState {
        &self.state
    }

    pub fn catalogue(&self) -> &TourCatalogue {
        &self.catalogue
    }

    pub fn preferences(&self) -> &TourPreferences {
        &self.preferences
    }

    pub fn progress(&self) -> f64 {
        self.state.progress()
    }

    pub fn current_tour(&self) -> Option<&Rc<TourDefinition>> {
        self.tour.as_ref()
    }

    pub fn current_step(&self) -> Option<&StepDefinition> {
        if !self.state.is_active {
            return None;
        }
        self.tour.as_ref()?.step(self.state.current_step_index)
    }

    /// Resolve a start request without touching any state
    pub fn check_start(&self, tour_id: &str, options: StartOptions) -> Result<Rc<TourDefinition>> {
        let Some(tour) = self.catalogue.get(tour_id) else {
            warn!(tour = %tour_id, "Cannot start unknown tour");
            return Err(TourError::UnknownTour(tour_id.to_string()));
        };
        let index = options.start_step.unwrap_or(0);
        if index >= tour.len() {
            warn!(tour = %tour_id, index = index, total = tour.len(), "Start step out of range");
            return Err(TourError::StepOutOfRange {
                index,
                total: tour.len(),
            });
        }
        Ok(tour)
    }

    pub fn start_tour(&mut self, tour_id: &str, options: StartOptions) -> Result<()> {
        let tour = self.check_start(tour_id, options)?;

        if self.state.is_active {
            self.stop_tour(StopReason::Superseded);
        }

        let index = options.start_step.unwrap_or(0);
        self.state = TourRuntimeState {
            is_active: true,
            current_tour_id: Some(tour.id.clone()),
            current_step_index: index,
            total_steps: tour.len(),
            ..TourRuntimeState::default()
        };
        self.tour = Some(tour.clone());

        info!(tour = %tour.id, steps = tour.len(), start = index, "Tour started");
        self.emit(TourEvent::TourStarted {
            tour_id: tour.id.clone(),
            total_steps: tour.len(),
            step_index: index,
        });
        self.enter_current_step();
        Ok(())
    }

    /// Jump to `index`; `Ok(false)` when already there
    pub fn go_to_step(&mut self, index: usize) -> Result<bool> {
        if !self.state.is_active {
            return Err(TourError::NotActive);
        }
        if index >= self.state.total_steps {
            warn!(index = index, total = self.state.total_steps, "Step out of range");
            return Err(TourError::StepOutOfRange {
                index,
                total: self.state.total_steps,
            });
        }
        let from = self.state.current_step_index;
        if index == from {
            return Ok(false);
        }

        self.state.step_history.push(from);
        self.state.current_step_index = index;
        debug!(from = from, to = index, "Step changed");
        self.emit(TourEvent::StepChanged {
            tour_id: self.current_tour_id(),
            from_step: from,
            to_step: index,
        });
        self.enter_current_step();
        Ok(true)
    }

    /// Advance, completing the tour when already on the last step
    pub fn next_step(&mut self) -> Result<NextOutcome> {
        if !self.state.is_active {
            return Err(TourError::NotActive);
        }
        if self.state.is_last_step() {
            return self
                .stop_tour(StopReason::Completed)
                .map(NextOutcome::Completed)
                .ok_or(TourError::NotActive);
        }
        let next = self.state.current_step_index + 1;
        self.go_to_step(next)?;
        Ok(NextOutcome::Advanced(next))
    }

    /// Step back once; false (and no event) at the first step or when idle
    pub fn previous_step(&mut self) -> bool {
        if !self.state.is_active || self.state.current_step_index == 0 {
            return false;
        }
        let previous = self.state.current_step_index - 1;
        self.go_to_step(previous).unwrap_or(false)
    }

    pub fn pause_tour(&mut self) -> bool {
        if !self.state.is_active || self.state.is_paused {
            return false;
        }
        self.state.is_paused = true;
        self.emit(TourEvent::TourPaused {
            tour_id: self.current_tour_id(),
            step_index: self.state.current_step_index,
        });
        true
    }

    pub fn resume_tour(&mut self) -> bool {
        if !self.state.is_active || !self.state.is_paused {
            return false;
        }
        self.state.is_paused = false;
        self.emit(TourEvent::TourResumed {
            tour_id: self.current_tour_id(),
            step_index: self.state.current_step_index,
        });
        true
    }

    /// End the session; `None` when nothing was running
    pub fn stop_tour(&mut self, reason: StopReason) -> Option<StopSummary> {
        if !self.state.is_active {
            return None;
        }
        let summary = StopSummary {
            tour_id: self.current_tour_id(),
            reason,
            completion_rate: self.state.progress(),
            step_index: self.state.current_step_index,
        };

        if reason == StopReason::Completed
            && let Err(e) = self.preferences.mark_completed(&summary.tour_id)
        {
            error!(tour = %summary.tour_id, error = %e, "Failed to record tour completion");
        }

        self.state = TourRuntimeState::default();
        self.tour = None;

        info!(
            tour = %summary.tour_id,
            reason = %reason,
            completion_rate = summary.completion_rate,
            "Tour stopped"
        );
        self.emit(TourEvent::TourStopped {
            tour_id: summary.tour_id.clone(),
            reason,
            completion_rate: summary.completion_rate,
            step_index: summary.step_index,
        });
        Some(summary)
    }

    /// Auto-completion on the last step; false unless running (not paused) on it
    pub fn complete_if_finished(&mut self) -> bool {
        if self.state.is_paused || !self.state.is_last_step() {
            return false;
        }
        self.stop_tour(StopReason::Completed).is_some()
    }

    pub fn set_loading(&mut self, loading: bool) {
        if self.state.is_active {
            self.state.is_loading = loading;
        }
    }

    fn current_tour_id(&self) -> String {
        self.state.current_tour_id.clone().unwrap_or_default()
    }

    fn enter_current_step(&self) {
        let Some(step) = self.current_step() else {
            return;
        };
        let Some(hook) = step.on_enter.as_ref() else {
            return;
        };
        let tour_id = self.current_tour_id();
        let context = StepContext {
            tour_id: &tour_id,
            step_id: &step.id,
            step_index: self.state.current_step_index,
        };
        if let Err(e) = hook(&context) {
            warn!(tour = %tour_id, step = %step.id, error = %e, "Step enter hook failed");
        }
    }

    fn emit(&mut self, event: TourEvent) {
        self.sequence += 1;
        let record = EventRecord {
            sequence: self.sequence,
            event,
        };
        for sink in &self.sinks {
            sink.emit(&record);
        }
    }
}
