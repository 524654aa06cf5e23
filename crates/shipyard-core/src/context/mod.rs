//! Execution context: the context stack, `${...}` rendering, and the
//! read-only facade states execute against.

pub mod execution;
pub mod expression;
pub mod stack;

pub use execution::{ExecutionContext, ExecutionHistory, build_history};
pub use stack::ContextStack;

use shipyard_types::element::ElementType;

/// Errors raised while reading the execution context.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// A state required an element that is not on the stack.
    #[error("missing context element of type {0:?}")]
    MissingContextElement(ElementType),
}

/// External lookup consulted for `${...}` references no element resolves.
pub trait VariableResolver: Send + Sync {
    /// Resolve a full expression body (without `${` and `}`).
    fn resolve(&self, expression: &str) -> Option<String>;
}
