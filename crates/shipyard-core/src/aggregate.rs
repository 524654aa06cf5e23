//! Composite status aggregation.

use std::collections::HashMap;

use shipyard_types::notify::{ElementNotifyResponse, NotifyResponse};
use shipyard_types::status::ExecutionStatus;

use crate::context::ExecutionContext;
use crate::state::StateError;

/// Aggregated outcome of a composite's children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub status: ExecutionStatus,
    /// Message of the first failing child, in child order.
    pub error_message: Option<String>,
}

/// Fold child statuses into one.
///
/// Any ABORTED child makes the composite ABORTED. Otherwise any FAILED or
/// ERROR child makes it FAILED, unless `continue_on_failure` is set.
/// SKIPPED children do not count.
pub fn aggregate<'a>(
    children: impl IntoIterator<Item = &'a ElementNotifyResponse>,
    continue_on_failure: bool,
) -> Aggregate {
    let mut aborted = false;
    let mut failed = false;
    let mut error_message = None;

    for child in children {
        match child.status {
            ExecutionStatus::Aborted => aborted = true,
            ExecutionStatus::Failed | ExecutionStatus::Error => failed = true,
            _ => continue,
        }
        if error_message.is_none() {
            error_message = Some(
                child
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("{} {}", child.state_name, child.status)),
            );
        }
    }

    let status = if aborted {
        ExecutionStatus::Aborted
    } else if failed && !continue_on_failure {
        ExecutionStatus::Failed
    } else {
        ExecutionStatus::Success
    };
    Aggregate {
        error_message: if status == ExecutionStatus::Success {
            None
        } else {
            error_message
        },
        status,
    }
}

/// Child completion reports in spawn order.
///
/// Every correlation id the composite waited on must carry an element
/// response; anything else is a protocol violation.
pub fn ordered_child_responses<'r>(
    ctx: &ExecutionContext<'_>,
    responses: &'r HashMap<String, NotifyResponse>,
) -> Result<Vec<&'r ElementNotifyResponse>, StateError> {
    ctx.correlation_ids()
        .iter()
        .map(|id| {
            responses
                .get(id)
                .and_then(NotifyResponse::as_element)
                .ok_or_else(|| StateError::Protocol(format!("no child response for '{id}'")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(name: &str, status: ExecutionStatus, message: Option<&str>) -> ElementNotifyResponse {
        let mut response = ElementNotifyResponse::skipped(name);
        response.status = status;
        response.error_message = message.map(str::to_string);
        response
    }

    #[test]
    fn all_success() {
        let children = [
            child("a", ExecutionStatus::Success, None),
            child("b", ExecutionStatus::Success, None),
        ];
        let result = aggregate(&children, false);
        assert_eq!(result.status, ExecutionStatus::Success);
        assert!(result.error_message.is_none());
    }

    #[test]
    fn first_failure_message_wins() {
        let children = [
            child("a", ExecutionStatus::Success, None),
            child("b", ExecutionStatus::Failed, Some("b broke")),
            child("c", ExecutionStatus::Error, Some("c broke")),
        ];
        let result = aggregate(&children, false);
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error_message.as_deref(), Some("b broke"));
    }

    #[test]
    fn error_counts_as_failure() {
        let children = [child("a", ExecutionStatus::Error, None)];
        let result = aggregate(&children, false);
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error_message.as_deref(), Some("a ERROR"));
    }

    #[test]
    fn aborted_dominates() {
        let children = [
            child("a", ExecutionStatus::Failed, Some("a broke")),
            child("b", ExecutionStatus::Aborted, None),
        ];
        assert_eq!(aggregate(&children, false).status, ExecutionStatus::Aborted);
        assert_eq!(aggregate(&children, true).status, ExecutionStatus::Aborted);
    }

    #[test]
    fn skipped_is_ignored_and_failures_can_be_tolerated() {
        let children = [
            child("a", ExecutionStatus::Failed, Some("a broke")),
            child("b", ExecutionStatus::Skipped, None),
        ];
        assert_eq!(aggregate(&children, true).status, ExecutionStatus::Success);
        assert_eq!(
            aggregate(&children[1..], false).status,
            ExecutionStatus::Success
        );
    }
}
