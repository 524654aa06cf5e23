//! Per-instance execution data and the summaries composites roll up.
//!
//! Every instance carries one [`StateExecutionData`]. Its payload depends on
//! the state kind; rollback steps later read the resize payloads of the
//! forward run through the phase and phase-step summaries built here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::element::{ContextElement, InstanceElement};
use crate::resize::ContainerServiceData;
use crate::status::ExecutionStatus;

/// Execution record of a single state instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateExecutionData {
    pub state_name: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: ExecutionPayload,
}

impl StateExecutionData {
    pub fn new(state_name: impl Into<String>) -> Self {
        Self {
            state_name: state_name.into(),
            status: ExecutionStatus::New,
            error_message: None,
            started_at: None,
            ended_at: None,
            payload: ExecutionPayload::Empty,
        }
    }

    /// Summary handed to the parent when this instance completes.
    pub fn step_summary(&self) -> StepExecutionSummary {
        let detail = match &self.payload {
            ExecutionPayload::Resize(resize) => StepSummaryDetail::Resize {
                new_instance_data: resize.new_instance_data.clone(),
                old_instance_data: resize.old_instance_data.clone(),
            },
            ExecutionPayload::PhaseStep(step) => StepSummaryDetail::PhaseStep(step.clone()),
            ExecutionPayload::Element(element) if !element.instance_status_summaries.is_empty() => {
                StepSummaryDetail::Instances {
                    instances: element.instance_status_summaries.clone(),
                }
            }
            _ => StepSummaryDetail::None,
        };
        StepExecutionSummary {
            state_name: self.state_name.clone(),
            status: self.status,
            message: self.error_message.clone(),
            detail,
        }
    }

    pub fn resize(&self) -> Option<&ResizeExecutionData> {
        match &self.payload {
            ExecutionPayload::Resize(data) => Some(data),
            _ => None,
        }
    }

    pub fn phase(&self) -> Option<&PhaseExecutionData> {
        match &self.payload {
            ExecutionPayload::Phase(data) => Some(data),
            _ => None,
        }
    }

    pub fn approval(&self) -> Option<&ApprovalExecutionData> {
        match &self.payload {
            ExecutionPayload::Approval(data) => Some(data),
            _ => None,
        }
    }

    pub fn command(&self) -> Option<&CommandExecutionData> {
        match &self.payload {
            ExecutionPayload::Command(data) => Some(data),
            _ => None,
        }
    }

    pub fn analysis(&self) -> Option<&AnalysisExecutionData> {
        match &self.payload {
            ExecutionPayload::Analysis(data) => Some(data),
            _ => None,
        }
    }
}

/// State-kind specific part of the execution data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionPayload {
    #[default]
    Empty,
    Resize(ResizeExecutionData),
    /// Repeat and fork composites.
    Element(ElementExecutionData),
    PhaseStep(PhaseStepExecutionSummary),
    Phase(PhaseExecutionData),
    Approval(ApprovalExecutionData),
    Analysis(AnalysisExecutionData),
    Command(CommandExecutionData),
}

// ---------------------------------------------------------------------------
// Resize
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResizeExecutionData {
    pub activity_id: Uuid,
    pub cluster_name: String,
    pub service_name: String,
    pub new_instance_data: Vec<ContainerServiceData>,
    pub old_instance_data: Vec<ContainerServiceData>,
    /// True while the downsize half is outstanding.
    #[serde(default)]
    pub downsize: bool,
    /// Instances reported by the agent after the new group grew.
    #[serde(default)]
    pub new_instances: Vec<InstanceStatusSummary>,
}

// ---------------------------------------------------------------------------
// Composite summaries
// ---------------------------------------------------------------------------

/// What one child reported to its composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionSummary {
    pub state_name: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: StepSummaryDetail,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepSummaryDetail {
    #[default]
    None,
    Resize {
        new_instance_data: Vec<ContainerServiceData>,
        old_instance_data: Vec<ContainerServiceData>,
    },
    Instances {
        instances: Vec<InstanceStatusSummary>,
    },
    PhaseStep(PhaseStepExecutionSummary),
}

/// Ordered child summaries of one phase step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseStepExecutionSummary {
    pub step_summaries: Vec<StepExecutionSummary>,
}

impl PhaseStepExecutionSummary {
    /// First resize recorded by any step, in step order.
    pub fn first_resize(&self) -> Option<(&[ContainerServiceData], &[ContainerServiceData])> {
        self.step_summaries.iter().find_map(|s| match &s.detail {
            StepSummaryDetail::Resize {
                new_instance_data,
                old_instance_data,
            } => Some((new_instance_data.as_slice(), old_instance_data.as_slice())),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseExecutionData {
    pub phase_name: String,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub rollback: bool,
    /// Keyed by phase step state name.
    #[serde(default)]
    pub phase_step_summaries: BTreeMap<String, PhaseStepExecutionSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatusSummary {
    pub instance: InstanceElement,
    pub status: ExecutionStatus,
}

/// Outcome of a repeat or fork child, keyed by the element it ran for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementExecutionSummary {
    #[serde(default)]
    pub element: Option<ContextElement>,
    pub state_name: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementExecutionData {
    pub element_summaries: Vec<ElementExecutionSummary>,
    #[serde(default)]
    pub instance_status_summaries: Vec<InstanceStatusSummary>,
}

// ---------------------------------------------------------------------------
// Leaf states
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalExecutionData {
    pub approval_id: String,
    pub activity_id: Uuid,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub decided_by: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
}

/// Score comparison used by verification gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreComparison {
    /// Pass when the score is at least the threshold.
    #[default]
    AtLeast,
    /// Pass when the score is at most the threshold.
    AtMost,
}

impl ScoreComparison {
    pub fn passes(self, score: f64, threshold: f64) -> bool {
        match self {
            ScoreComparison::AtLeast => score >= threshold,
            ScoreComparison::AtMost => score <= threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisExecutionData {
    pub correlation_id: String,
    pub activity_id: Uuid,
    pub provider: String,
    pub threshold: f64,
    pub comparison: ScoreComparison,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandExecutionData {
    pub command_name: String,
    pub activity_id: Uuid,
    pub correlation_id: String,
    #[serde(default)]
    pub output: serde_json::Value,
}
