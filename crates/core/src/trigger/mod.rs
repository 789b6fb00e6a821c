//! Trigger binding: object-created events in, job invocations out.
//!
//! Delivery is at-least-once. Duplicate events map to the same job ID and
//! the orchestrator makes them harmless.

mod binding;
mod event;

pub use binding::{derive_job_id, BindOutcome, Invocation, TriggerBinding, TriggerConfig, TriggerError};
pub use event::{ObjectCreatedEvent, ObjectDetail};
