//! In-flight request model.

use chrono::{DateTime, Utc};
use routing::{Assignment, Complexity, OptimizedPrompt, Requirements};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Timeout
        )
    }
}

/// Input accepted by the pipeline; mirrors the transport layer's body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessInput {
    /// Caller-supplied id; generated when absent.
    pub id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub requirements: Requirements,
}

impl ProcessInput {
    pub fn new(content: &str) -> Self {
        Self {
            id: None,
            content: content.to_string(),
            requirements: Requirements::default(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_requirements(mut self, requirements: Requirements) -> Self {
        self.requirements = requirements;
        self
    }
}

/// One tracked request, from registration to its terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    pub id: String,
    pub input: String,
    pub complexity: Option<Complexity>,
    pub optimized_prompt: Option<OptimizedPrompt>,
    pub assignment: Option<Assignment>,
    pub status: RequestStatus,
    pub result: Option<String>,
    pub cost: f64,
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RouteRequest {
    pub fn new(input: &ProcessInput) -> Self {
        let id = input
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            id,
            input: input.content.clone(),
            complexity: None,
            optimized_prompt: None,
            assignment: None,
            status: RequestStatus::Pending,
            result: None,
            cost: 0.0,
            duration_ms: None,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    pub(crate) fn finish(&mut self, status: RequestStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.duration_ms = Some(
            (Utc::now() - self.created_at)
                .num_milliseconds()
                .max(0) as u64,
        );
    }
}
