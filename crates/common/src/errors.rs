use thiserror::Error;

/// Error hierarchy for the routing core.
///
/// Every kind maps to one row of the propagation policy: some surface to the
/// caller untouched, some mark the request failed, and sink errors are logged
/// and swallowed at the call site.
#[derive(Error, Debug)]
pub enum RouterError {
    // === Caller input ===
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    // === Selection ===
    #[error("no providers available")]
    NoProvidersAvailable,

    // === Execution ===
    #[error("executor failure: {0}")]
    Executor(String),

    #[error("rate limited by {provider}/{model}")]
    RateLimited { provider: String, model: String },

    #[error("operation timed out: {0}")]
    Timeout(String),

    // === Infrastructure ===
    #[error("metrics sink failure: {0}")]
    Sink(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Short machine-readable kind tag, stable across message changes.
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::InvalidInput(_) => "invalid_input",
            RouterError::NotFound(_) => "not_found",
            RouterError::NoProvidersAvailable => "no_providers_available",
            RouterError::Executor(_) => "executor_failure",
            RouterError::RateLimited { .. } => "rate_limit_hit",
            RouterError::Timeout(_) => "timeout",
            RouterError::Sink(_) => "sink_failure",
            RouterError::Configuration(_) => "configuration",
            RouterError::Internal(_) => "internal",
        }
    }
}

pub type RouterResult<T> = Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RouterError::RateLimited {
            provider: "Pollinations".to_string(),
            model: "openai".to_string(),
        };
        assert_eq!(err.to_string(), "rate limited by Pollinations/openai");
        assert_eq!(err.kind(), "rate_limit_hit");
    }

    #[test]
    fn test_kind_tags_are_distinct() {
        let errors = [
            RouterError::InvalidInput("x".into()),
            RouterError::NotFound("x".into()),
            RouterError::NoProvidersAvailable,
            RouterError::Executor("x".into()),
            RouterError::Timeout("x".into()),
            RouterError::Sink("x".into()),
            RouterError::Configuration("x".into()),
            RouterError::Internal("x".into()),
        ];
        let mut kinds: Vec<&str> = errors.iter().map(|e| e.kind()).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }
}
