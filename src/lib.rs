//! Multimodal emotion timeline engine.
//!
//! Ingests asynchronous classification events from a face (video) and a
//! voice (audio) modality, aligns them on one monotonic session clock,
//! fuses them into a deterministic per-session emotional timeline, and
//! keeps rolling aggregates queryable while the session is still running.
//!
//! The classifiers themselves are external collaborators behind the
//! [`signal::EmotionClassifier`] contract; this crate owns everything
//! between their outputs and the finished, durable timeline.

pub mod align;
pub mod config;
pub mod fusion;
pub mod persist;
pub mod session;
pub mod signal;
pub mod summary;
pub mod timeline;

#[cfg(test)]
mod engine_tests;

pub use align::{AnchorMode, TimeUnit};
pub use config::EngineConfig;
pub use session::{
    start_session, EngineMessage, SessionClock, SessionController, SessionHandle, SessionState,
};
pub use signal::{EmotionLabel, Modality, RawClassification, RecordedEvent};
pub use summary::SummaryPayload;
pub use timeline::{FusedEntry, RollingAggregate, TimelineStore};
