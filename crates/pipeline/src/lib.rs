//! Request pipeline over the routing core.
//!
//! Sequences classification, prompt optimization, provider selection,
//! execution, and feedback per request, and packages the whole subsystem
//! behind `RouterService` for a transport layer to embed.

pub mod contracts;
pub mod orchestrator;
pub mod request;
pub mod service;

pub use contracts::{ExecutionError, ExecutionOutput, Executor};
pub use orchestrator::PipelineOrchestrator;
pub use request::{ProcessInput, RequestStatus, RouteRequest};
pub use service::{ProviderStatus, RouterService};
