//! Client-side job execution against a generative-graph backend.
//!
//! Provides typed push-event parsing, the [`Transport`] contract consumed
//! by the rest of the workspace, and [`JobRun`] — the per-job correlator
//! that turns a scattershot of asynchronous push notifications into a
//! single deterministic outcome.

pub mod mapping;
pub mod push;
pub mod run;
pub mod transport;

pub use mapping::{MappingError, OutputMapping};
pub use push::{parse_push, PushEvent};
pub use run::{JobEvent, JobOptions, JobRun, RunOutcome};
pub use transport::{
    HistoryRecord, QueueSnapshot, SubmitReceipt, Transport, TransportError,
};
