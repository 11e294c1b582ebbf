//! Shared foundation for the routing workspace: the error hierarchy, runtime
//! configuration, and logging setup.

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{
    AggregatorConfig, HealthConfig, LearnerConfig, OrchestratorConfig, RouterConfig,
    SelectionWeights, SelectorConfig, SpoConfig,
};
pub use errors::{RouterError, RouterResult};
pub use logging::init_logging;
