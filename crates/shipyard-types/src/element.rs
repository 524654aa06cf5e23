//! Context elements: typed data records pushed onto an execution's context stack.
//!
//! The set of element kinds is closed. States look elements up by
//! [`ElementType`] and read the typed payload out of [`ElementKind`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resize::{ContainerServiceData, ResizeStrategy};

// ---------------------------------------------------------------------------
// Element identity
// ---------------------------------------------------------------------------

/// Discriminant used to look elements up on the context stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Standard,
    Service,
    Instance,
    InstanceList,
    Phase,
    ContainerService,
    ContainerRollback,
    Param,
}

impl ElementType {
    /// Root name under which the element is visible to `${...}` expressions.
    pub fn expression_key(self) -> &'static str {
        match self {
            ElementType::Standard => "workflow",
            ElementType::Service => "service",
            ElementType::Instance => "instance",
            ElementType::InstanceList => "instances",
            ElementType::Phase => "phase",
            ElementType::ContainerService => "container",
            ElementType::ContainerRollback => "rollback",
            ElementType::Param => "param",
        }
    }

    /// Every element type, in stack lookup order.
    pub const ALL: [ElementType; 8] = [
        ElementType::Standard,
        ElementType::Service,
        ElementType::Instance,
        ElementType::InstanceList,
        ElementType::Phase,
        ElementType::ContainerService,
        ElementType::ContainerRollback,
        ElementType::Param,
    ];

    /// Inverse of [`ElementType::expression_key`].
    pub fn from_expression_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.expression_key() == key)
    }
}

/// A typed record on the context stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextElement {
    pub id: Uuid,
    /// Lookup name; unique per type only by convention.
    pub name: String,
    pub kind: ElementKind,
}

impl ContextElement {
    pub fn new(name: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            kind,
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.kind.element_type()
    }

    /// JSON view of the payload used by expression rendering.
    pub fn to_expression_value(&self) -> serde_json::Value {
        let mut value = match &self.kind {
            ElementKind::Standard(p) => serde_json::to_value(p),
            ElementKind::Service(p) => serde_json::to_value(p),
            ElementKind::Instance(p) => serde_json::to_value(p),
            ElementKind::InstanceList(p) => serde_json::to_value(p),
            ElementKind::Phase(p) => serde_json::to_value(p),
            ElementKind::ContainerService(p) => serde_json::to_value(p),
            ElementKind::ContainerRollback(p) => serde_json::to_value(p),
            ElementKind::Param(p) => serde_json::to_value(&p.values),
        }
        .unwrap_or(serde_json::Value::Null);
        if let serde_json::Value::Object(map) = &mut value {
            map.entry("element_name")
                .or_insert_with(|| serde_json::Value::String(self.name.clone()));
        }
        value
    }
}

/// Typed payload of a context element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementKind {
    /// Workflow-level parameters every execution starts with.
    Standard(WorkflowStandardParams),
    Service(ServiceElement),
    Instance(InstanceElement),
    InstanceList(InstanceListElement),
    Phase(PhaseElement),
    ContainerService(ContainerServiceElement),
    ContainerRollback(ContainerRollbackElement),
    Param(ParamElement),
}

impl ElementKind {
    pub fn element_type(&self) -> ElementType {
        match self {
            ElementKind::Standard(_) => ElementType::Standard,
            ElementKind::Service(_) => ElementType::Service,
            ElementKind::Instance(_) => ElementType::Instance,
            ElementKind::InstanceList(_) => ElementType::InstanceList,
            ElementKind::Phase(_) => ElementType::Phase,
            ElementKind::ContainerService(_) => ElementType::ContainerService,
            ElementKind::ContainerRollback(_) => ElementType::ContainerRollback,
            ElementKind::Param(_) => ElementType::Param,
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowStandardParams {
    pub app_id: String,
    #[serde(default)]
    pub env_id: Option<String>,
    /// User-supplied workflow variables, visible as `${workflow.variables.<name>}`.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceElement {
    pub id: String,
    pub name: String,
}

/// One deployed host or container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceElement {
    pub id: String,
    pub host_name: String,
    pub display_name: String,
    #[serde(default)]
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstanceListElement {
    pub instances: Vec<InstanceElement>,
}

/// Target platform of a deployment phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentType {
    Ssh,
    Ecs,
    Kubernetes,
    Helm,
    AwsLambda,
    Ami,
}

impl DeploymentType {
    /// Deployment types that resize container service groups.
    pub fn is_container(self) -> bool {
        matches!(self, DeploymentType::Ecs | DeploymentType::Kubernetes)
    }
}

/// Parameters of the phase currently executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseElement {
    pub phase_name: String,
    pub service: ServiceElement,
    pub infra_mapping_id: String,
    pub deployment_type: DeploymentType,
    #[serde(default)]
    pub rollback: bool,
    /// Forward phase this rollback phase undoes.
    #[serde(default)]
    pub phase_name_for_rollback: Option<String>,
}

/// The container service being rolled out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerServiceElement {
    /// Name of the new service group.
    pub service_name: String,
    pub cluster_name: String,
    /// Cloud provider setting used to reach the cluster.
    pub setting_id: String,
    /// Instance ceiling. COUNT targets above it are rejected; PERCENTAGE
    /// targets are taken of it or of the running total, whichever is larger.
    #[serde(default)]
    pub max_instances: u32,
    #[serde(default)]
    pub resize_strategy: ResizeStrategy,
}

/// Reversed resize data pushed onto rollback steps.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerRollbackElement {
    pub new_instance_data: Vec<ContainerServiceData>,
    pub old_instance_data: Vec<ContainerServiceData>,
}

/// Free-form key/value parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamElement {
    pub values: BTreeMap<String, serde_json::Value>,
}
