use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use tracing::info;

/// Why a tour session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Ran past the last step (or auto-completed on it)
    Completed,
    /// User dismissed the tour
    Skipped,
    /// Host closed the tour
    Closed,
    /// Another tour was started
    Superseded,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::Skipped => "skipped",
            StopReason::Closed => "closed",
            StopReason::Superseded => "superseded",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TourEvent {
    TourStarted {
        tour_id: String,
        total_steps: usize,
        step_index: usize,
    },
    TourStopped {
        tour_id: String,
        reason: StopReason,
        completion_rate: f64,
        step_index: usize,
    },
    TourPaused {
        tour_id: String,
        step_index: usize,
    },
    TourResumed {
        tour_id: String,
        step_index: usize,
    },
    StepChanged {
        tour_id: String,
        from_step: usize,
        to_step: usize,
    },
}

impl TourEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TourEvent::TourStarted { .. } => "tour_started",
            TourEvent::TourStopped { .. } => "tour_stopped",
            TourEvent::TourPaused { .. } => "tour_paused",
            TourEvent::TourResumed { .. } => "tour_resumed",
            TourEvent::StepChanged { .. } => "step_changed",
        }
    }

    pub fn tour_id(&self) -> &str {
        match self {
            TourEvent::TourStarted { tour_id, .. }
            | TourEvent::TourStopped { tour_id, .. }
            | TourEvent::TourPaused { tour_id, .. }
            | TourEvent::TourResumed { tour_id, .. }
            | TourEvent::StepChanged { tour_id, .. } => tour_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub sequence: u64,
    #[serde(flatten)]
    pub event: TourEvent,
}

/// Receives every tour transition, synchronously and in order
pub trait EventSink {
    fn emit(&self, record: &EventRecord);
}

/// Logs every event at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, record: &EventRecord) {
        match &record.event {
            TourEvent::TourStopped {
                tour_id,
                reason,
                completion_rate,
                step_index,
            } => info!(
                seq = record.sequence,
                tour = %tour_id,
                reason = %reason,
                completion_rate = completion_rate,
                step = step_index,
                "tour_stopped"
            ),
            TourEvent::StepChanged {
                tour_id,
                from_step,
                to_step,
            } => info!(
                seq = record.sequence,
                tour = %tour_id,
                from = from_step,
                to = to_step,
                "step_changed"
            ),
            event => info!(seq = record.sequence, tour = %event.tour_id(), "{}", event.name()),
        }
    }
}

/// Keeps every record; used by tests and the headless player
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: RefCell<Vec<EventRecord>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records.borrow().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.records.borrow().iter().map(|r| r.event.name()).collect()
    }

    /// Remove and return everything recorded so far
    pub fn take(&self) -> Vec<EventRecord> {
        std::mem::take(&mut *self.records.borrow_mut())
    }

    pub fn clear(&self) {
        self.records.borrow_mut().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, record: &EventRecord) {
        self.records.borrow_mut().push(record.clone());
    }
}
