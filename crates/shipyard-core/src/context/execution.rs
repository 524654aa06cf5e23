//! Read-only view of an executing instance handed to every `State` call.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use shipyard_types::element::{
    ContainerRollbackElement, ContainerServiceElement, ContextElement, ElementKind, ElementType,
    PhaseElement, WorkflowStandardParams,
};
use shipyard_types::execution_data::StateExecutionData;
use shipyard_types::instance::StateExecutionInstance;

use super::expression::{ExpressionEvaluator, render, value_to_string};
use super::stack::ContextStack;
use super::{ContextError, VariableResolver};

/// Execution data of the instances in one execution, keyed by state name.
///
/// Rollback states use it to find what their forward counterpart did. When
/// a name ran more than once, the latest forward instance wins and rollback
/// instances are only used for names no forward instance carries. See
/// [`build_history`].
pub type ExecutionHistory = HashMap<String, StateExecutionData>;

/// Fold `instances`, given in creation order, into an [`ExecutionHistory`].
pub fn build_history(
    instances: impl IntoIterator<Item = StateExecutionInstance>,
) -> ExecutionHistory {
    let mut latest: HashMap<String, (bool, StateExecutionData)> = HashMap::new();
    for instance in instances {
        let keep = latest
            .get(&instance.state_name)
            .is_none_or(|(rollback, _)| *rollback || !instance.rollback);
        if keep {
            latest.insert(
                instance.state_name,
                (instance.rollback, instance.state_execution_data),
            );
        }
    }
    latest
        .into_iter()
        .map(|(name, (_, data))| (name, data))
        .collect()
}

/// Facade over an instance, its context stack and its execution's history.
///
/// States never mutate the stack through this type; they contribute context
/// only by returning elements in their response.
pub struct ExecutionContext<'a> {
    instance: &'a StateExecutionInstance,
    stack: ContextStack,
    history: &'a ExecutionHistory,
    resolvers: &'a [Arc<dyn VariableResolver>],
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        instance: &'a StateExecutionInstance,
        history: &'a ExecutionHistory,
        resolvers: &'a [Arc<dyn VariableResolver>],
    ) -> Self {
        Self {
            stack: ContextStack::from(instance.context_elements.clone()),
            instance,
            history,
            resolvers,
        }
    }

    // -----------------------------------------------------------------------
    // Identifiers
    // -----------------------------------------------------------------------

    pub fn app_id(&self) -> &str {
        &self.instance.app_id
    }

    pub fn execution_id(&self) -> Uuid {
        self.instance.execution_id
    }

    /// Same as [`ExecutionContext::execution_id`]; every instance of one
    /// workflow run shares it.
    pub fn workflow_execution_id(&self) -> Uuid {
        self.instance.execution_id
    }

    pub fn env_id(&self) -> Option<&str> {
        self.standard_params()?.env_id.as_deref()
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance.id
    }

    pub fn state_name(&self) -> &str {
        &self.instance.state_name
    }

    pub fn is_rollback(&self) -> bool {
        self.instance.rollback
    }

    pub fn instance(&self) -> &StateExecutionInstance {
        self.instance
    }

    /// Correlation ids this instance waited on, in registration order.
    pub fn correlation_ids(&self) -> &[String] {
        &self.instance.correlation_ids
    }

    // -----------------------------------------------------------------------
    // Execution data
    // -----------------------------------------------------------------------

    /// This instance's own execution data, as left by its previous call.
    pub fn state_execution_data(&self) -> &StateExecutionData {
        &self.instance.state_execution_data
    }

    /// Execution data of another state in the same execution.
    pub fn execution_data_for(&self, state_name: &str) -> Option<&StateExecutionData> {
        self.history.get(state_name)
    }

    // -----------------------------------------------------------------------
    // Context elements
    // -----------------------------------------------------------------------

    pub fn stack(&self) -> &ContextStack {
        &self.stack
    }

    pub fn find_element(&self, element_type: ElementType) -> Option<&ContextElement> {
        self.stack.get(element_type)
    }

    /// Nearest element of `element_type`, or `MissingContextElement`.
    pub fn context_element(&self, element_type: ElementType) -> Result<&ContextElement, ContextError> {
        self.stack
            .get(element_type)
            .ok_or(ContextError::MissingContextElement(element_type))
    }

    pub fn context_elements(&self, element_type: ElementType) -> Vec<&ContextElement> {
        self.stack.get_all(element_type)
    }

    pub fn standard_params(&self) -> Option<&WorkflowStandardParams> {
        match self.stack.get(ElementType::Standard).map(|e| &e.kind) {
            Some(ElementKind::Standard(params)) => Some(params),
            _ => None,
        }
    }

    pub fn phase_element(&self) -> Result<&PhaseElement, ContextError> {
        match &self.context_element(ElementType::Phase)?.kind {
            ElementKind::Phase(phase) => Ok(phase),
            _ => Err(ContextError::MissingContextElement(ElementType::Phase)),
        }
    }

    pub fn container_service_element(&self) -> Result<&ContainerServiceElement, ContextError> {
        match &self.context_element(ElementType::ContainerService)?.kind {
            ElementKind::ContainerService(service) => Ok(service),
            _ => Err(ContextError::MissingContextElement(
                ElementType::ContainerService,
            )),
        }
    }

    pub fn container_rollback_element(&self) -> Result<&ContainerRollbackElement, ContextError> {
        match &self.context_element(ElementType::ContainerRollback)?.kind {
            ElementKind::ContainerRollback(rollback) => Ok(rollback),
            _ => Err(ContextError::MissingContextElement(
                ElementType::ContainerRollback,
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    /// Evaluate `${...}` placeholders against the visible elements, then
    /// consult the external variable resolvers. References that fail to
    /// evaluate or evaluate to `null` are left as-is.
    pub fn render_expression(&self, text: &str) -> String {
        if !text.contains("${") {
            return text.to_string();
        }
        let evaluator = ExpressionEvaluator::new();
        let context = self.expression_context();
        render(text, |expr| self.resolve(&evaluator, &context, expr))
    }

    fn resolve(&self, evaluator: &ExpressionEvaluator, context: &Value, expr: &str) -> Option<String> {
        match evaluator.evaluate(expr, context) {
            Ok(value) => {
                if let Some(rendered) = value_to_string(&value) {
                    return Some(rendered);
                }
            }
            Err(e) => {
                tracing::debug!(expression = expr, error = %e, "expression not evaluated");
            }
        }
        self.resolvers.iter().find_map(|r| r.resolve(expr))
    }

    /// JSON object the expressions see: `context` plus the nearest element
    /// of each type under its expression key.
    pub fn expression_context(&self) -> Value {
        let mut root = Map::new();
        let mut context = Map::new();
        context.insert("app_id".into(), Value::String(self.app_id().to_string()));
        context.insert(
            "execution_id".into(),
            Value::String(self.execution_id().to_string()),
        );
        context.insert(
            "state_name".into(),
            Value::String(self.state_name().to_string()),
        );
        root.insert("context".into(), Value::Object(context));

        for element_type in ElementType::ALL {
            if let Some(element) = self.stack.get(element_type) {
                root.insert(
                    element_type.expression_key().to_string(),
                    element.to_expression_value(),
                );
            }
        }
        Value::Object(root)
    }
}
