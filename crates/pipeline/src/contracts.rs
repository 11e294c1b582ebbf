//! Capability seams toward the outside world.
//!
//! The core never talks to a provider API directly; execution is delegated to
//! whatever implements `Executor`. Rate-limit headers ride back on a side
//! channel in both the success and the rate-limited error shape so the
//! tracker can ingest them either way.

use async_trait::async_trait;
use routing::{Assignment, OptimizedPrompt};
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Successful execution result.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    pub content: String,
    pub cost: f64,
    pub tokens_used: u64,
    /// Raw rate-limit headers from the provider response, if any.
    pub rate_limit_headers: HashMap<String, String>,
}

/// Execution failure, split so the orchestrator can apply the rate-limit
/// policy without string matching.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        headers: HashMap<String, String>,
    },

    #[error("execution failed: {message}")]
    Failed { message: String },
}

impl ExecutionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            headers: HashMap::new(),
        }
    }
}

/// Downstream execution seam. Implementations must observe the cancellation
/// token; the orchestrator additionally races the call against its deadline.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(
        &self,
        prompt: &OptimizedPrompt,
        assignment: &Assignment,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutput, ExecutionError>;
}
