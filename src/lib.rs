//! Guided product tours for a host UI
//!
//! The host supplies geometry, frames and rendering through the ports in
//! [`host`]; [`headless`] provides an in-memory page.

#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod drag;
pub mod error;
pub mod geometry;
pub mod headless;
pub mod host;
pub mod persistence;
pub mod player;
pub mod positioning;
pub mod service;
pub mod snapping;
pub mod timers;
pub mod tour;
pub mod tracker;

pub use error::{Result, TourError};
pub use service::{HighlightOptions, OverlayState, TourService};
