//! Pipeline definitions: parsing, validation and registry assembly.
//!
//! A pipeline is a flat list of named states in YAML. Composites refer to
//! their children by name; validation checks that every reference resolves
//! and that composite nesting is acyclic before any state is built.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shipyard_types::config::EngineConfig;
use shipyard_types::element::{DeploymentType, ServiceElement};
use shipyard_types::execution_data::ScoreComparison;
use shipyard_types::resize::InstanceUnitType;
use shipyard_types::status::ExecutionStrategy;

use crate::collaborator::Collaborators;
use crate::state::{RegistryError, State, StateRegistry};
use crate::states::{
    AnalysisState, ApprovalState, CommandState, ContainerDeployState, ForkState, PhaseState,
    PhaseStepState, PhaseStepType, RepeatOver, RepeatState,
};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("state '{state}' references unknown state '{reference}'")]
    UnknownReference { state: String, reference: String },

    #[error("cycle detected involving state '{0}'")]
    Cycle(String),

    #[error("state '{state}' uses unknown analysis provider '{provider}'")]
    UnknownProvider { state: String, provider: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Definition types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    /// State a forward execution starts at.
    pub root: String,
    /// State a rollback execution starts at.
    #[serde(default)]
    pub rollback_root: Option<String>,
    pub states: Vec<StateDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDefinition {
    pub name: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub rollback: bool,
    #[serde(flatten)]
    pub kind: StateKind,
}

impl StateDefinition {
    fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateKind {
    Phase {
        service: ServiceElement,
        infra_mapping_id: String,
        deployment_type: DeploymentType,
        steps: Vec<String>,
        #[serde(default)]
        phase_name_for_rollback: Option<String>,
    },
    PhaseStep {
        step_type: PhaseStepType,
        steps: Vec<String>,
        #[serde(default)]
        parallel: bool,
        #[serde(default)]
        continue_on_failure: bool,
        #[serde(default)]
        phase_step_name_for_rollback: Option<String>,
    },
    Repeat {
        over: RepeatOver,
        repeat_state: String,
        #[serde(default)]
        strategy: ExecutionStrategy,
        #[serde(default)]
        continue_on_failure: bool,
    },
    Fork {
        branches: Vec<String>,
        #[serde(default)]
        continue_on_failure: bool,
    },
    ContainerDeploy {
        command_name: String,
        instance_count: u32,
        #[serde(default)]
        instance_unit_type: InstanceUnitType,
        /// Overrides `EngineConfig::revisions_to_retain`.
        #[serde(default)]
        revisions_to_retain: Option<usize>,
    },
    Approval {
        #[serde(default)]
        prompt: Option<String>,
    },
    Analysis {
        provider: String,
        threshold: f64,
        #[serde(default)]
        comparison: ScoreComparison,
    },
    Command {
        command_name: String,
        #[serde(default)]
        parameters: serde_json::Value,
    },
}

impl StateKind {
    /// Names of the states this one spawns.
    pub fn children(&self) -> Vec<&str> {
        match self {
            StateKind::Phase { steps, .. } | StateKind::PhaseStep { steps, .. } => {
                steps.iter().map(String::as_str).collect()
            }
            StateKind::Repeat { repeat_state, .. } => vec![repeat_state.as_str()],
            StateKind::Fork { branches, .. } => branches.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse and validate a pipeline definition.
pub fn parse_pipeline_yaml(yaml: &str) -> Result<PipelineDefinition, DefinitionError> {
    let def: PipelineDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_pipeline(&def)?;
    Ok(def)
}

pub fn load_pipeline_file(path: &Path) -> Result<PipelineDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    parse_pipeline_yaml(&content)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a pipeline.
///
/// Checks:
/// - Name is non-empty and at least one state exists
/// - State names are unique
/// - The root, the rollback root and every child reference resolve
/// - Timeouts are positive
/// - Composite nesting is acyclic
pub fn validate_pipeline(def: &PipelineDefinition) -> Result<(), DefinitionError> {
    if def.name.trim().is_empty() {
        return Err(DefinitionError::Validation(
            "pipeline name must not be empty".to_string(),
        ));
    }
    if def.states.is_empty() {
        return Err(DefinitionError::Validation(format!(
            "pipeline '{}' has no states",
            def.name
        )));
    }

    let mut seen = HashSet::new();
    for state in &def.states {
        if !seen.insert(state.name.as_str()) {
            return Err(DefinitionError::Validation(format!(
                "duplicate state name: '{}'",
                state.name
            )));
        }
        if state.timeout_secs == Some(0) {
            return Err(DefinitionError::Validation(format!(
                "state '{}' timeout must be > 0",
                state.name
            )));
        }
    }

    for root in std::iter::once(&def.root).chain(def.rollback_root.as_ref()) {
        if !seen.contains(root.as_str()) {
            return Err(DefinitionError::UnknownReference {
                state: def.name.clone(),
                reference: root.clone(),
            });
        }
    }

    let index: HashMap<&str, usize> = def
        .states
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();
    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: Vec<_> = def
        .states
        .iter()
        .map(|s| graph.add_node(s.name.as_str()))
        .collect();

    for (parent, state) in def.states.iter().enumerate() {
        for child in state.kind.children() {
            let Some(&child_idx) = index.get(child) else {
                return Err(DefinitionError::UnknownReference {
                    state: state.name.clone(),
                    reference: child.to_string(),
                });
            };
            graph.add_edge(nodes[parent], nodes[child_idx], ());
        }
    }

    toposort(&graph, None).map_err(|cycle| DefinitionError::Cycle(graph[cycle.node_id()].to_string()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Registry assembly
// ---------------------------------------------------------------------------

/// Build the immutable registry for a validated pipeline.
pub fn build_registry(
    def: &PipelineDefinition,
    collaborators: &Collaborators,
    config: &EngineConfig,
) -> Result<StateRegistry, DefinitionError> {
    validate_pipeline(def)?;

    let mut builder = StateRegistry::builder();
    for state in &def.states {
        builder = builder.register(build_state(state, collaborators, config)?)?;
    }
    let registry = builder.build();
    tracing::info!(pipeline = %def.name, states = registry.len(), "pipeline registry built");
    Ok(registry)
}

fn build_state(
    def: &StateDefinition,
    collaborators: &Collaborators,
    config: &EngineConfig,
) -> Result<Arc<dyn State>, DefinitionError> {
    let name = def.name.clone();
    let timeout = def.timeout();
    let rollback = def.rollback;

    let state: Arc<dyn State> = match &def.kind {
        StateKind::Phase {
            service,
            infra_mapping_id,
            deployment_type,
            steps,
            phase_name_for_rollback,
        } => Arc::new(PhaseState {
            name,
            service: service.clone(),
            infra_mapping_id: infra_mapping_id.clone(),
            deployment_type: *deployment_type,
            steps: steps.clone(),
            rollback,
            phase_name_for_rollback: phase_name_for_rollback.clone(),
            timeout,
        }),
        StateKind::PhaseStep {
            step_type,
            steps,
            parallel,
            continue_on_failure,
            phase_step_name_for_rollback,
        } => Arc::new(PhaseStepState {
            name,
            step_type: *step_type,
            steps: steps.clone(),
            parallel: *parallel,
            continue_on_failure: *continue_on_failure,
            rollback,
            phase_step_name_for_rollback: phase_step_name_for_rollback.clone(),
            timeout,
        }),
        StateKind::Repeat {
            over,
            repeat_state,
            strategy,
            continue_on_failure,
        } => Arc::new(RepeatState {
            name,
            over: *over,
            repeat_state: repeat_state.clone(),
            strategy: *strategy,
            continue_on_failure: *continue_on_failure,
            timeout,
        }),
        StateKind::Fork {
            branches,
            continue_on_failure,
        } => Arc::new(ForkState {
            name,
            branches: branches.clone(),
            continue_on_failure: *continue_on_failure,
            timeout,
        }),
        StateKind::ContainerDeploy {
            command_name,
            instance_count,
            instance_unit_type,
            revisions_to_retain,
        } => Arc::new(ContainerDeployState {
            name,
            command_name: command_name.clone(),
            instance_count: *instance_count,
            instance_unit_type: *instance_unit_type,
            rollback,
            timeout,
            revisions_to_retain: revisions_to_retain.unwrap_or(config.revisions_to_retain),
            dispatcher: Arc::clone(&collaborators.dispatcher),
            activities: Arc::clone(&collaborators.activities),
            settings: Arc::clone(&collaborators.settings),
            cluster: Arc::clone(&collaborators.cluster),
        }),
        StateKind::Approval { prompt } => Arc::new(ApprovalState {
            name,
            prompt: prompt.clone(),
            timeout,
            activities: Arc::clone(&collaborators.activities),
        }),
        StateKind::Analysis {
            provider,
            threshold,
            comparison,
        } => {
            let collector =
                collaborators
                    .collector(provider)
                    .ok_or_else(|| DefinitionError::UnknownProvider {
                        state: def.name.clone(),
                        provider: provider.clone(),
                    })?;
            Arc::new(AnalysisState {
                name,
                collector,
                threshold: *threshold,
                comparison: *comparison,
                timeout,
                dispatcher: Arc::clone(&collaborators.dispatcher),
                activities: Arc::clone(&collaborators.activities),
            })
        }
        StateKind::Command {
            command_name,
            parameters,
        } => Arc::new(CommandState {
            name,
            command_name: command_name.clone(),
            parameters: parameters.clone(),
            rollback,
            timeout,
            dispatcher: Arc::clone(&collaborators.dispatcher),
            activities: Arc::clone(&collaborators.activities),
        }),
    };
    Ok(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
