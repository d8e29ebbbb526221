pub mod catalogue;
pub mod events;
pub mod machine;

pub use catalogue::{StepContext, StepDefinition, StepHook, TourCatalogue, TourDefinition};
pub use events::{EventRecord, EventSink, RecordingSink, StopReason, TourEvent, TracingSink};
pub use machine::{NextOutcome, StartOptions, StopSummary, TourMachine, TourPhase, TourRuntimeState};
