//! `${...}` expression rendering.
//!
//! Each `${...}` body is a JEXL expression evaluated against a JSON object
//! whose roots are the visible elements' expression keys plus `context`,
//! for example `${service.name}`, `${workflow.variables.region|upper}` or
//! `${instance.host_name == 'ip-10-0-0-1'}`. Rendering is a single
//! left-to-right pass: substituted text is never re-scanned, and references
//! that cannot be resolved are left as-is.

use serde_json::{Value, json};

#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// ExpressionEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with the string transforms pipelines use.
pub struct ExpressionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ExpressionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.len(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len))
            });

        Self { evaluator }
    }

    /// Evaluate one expression body. The `context` must be a JSON object.
    pub fn evaluate(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }
        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Template rendering
// ---------------------------------------------------------------------------

/// Replace every `${expr}` in `template` with `resolve(expr)`.
pub fn render(template: &str, resolve: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let expr = after[..end].trim();
                match resolve(expr) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated; keep the remainder verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Display form of an evaluated expression.
///
/// Strings are returned without quotes and whole floats lose their `.0`;
/// `null` means unresolved.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                Some(format!("{}", f as i64))
            }
            _ => Some(n.to_string()),
        },
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(expr: &str) -> Option<String> {
        match expr {
            "service.name" => Some("web".to_string()),
            "loop" => Some("${loop}".to_string()),
            _ => None,
        }
    }

    fn context() -> Value {
        json!({
            "service": { "name": "Web-API" },
            "instances": { "instances": [{ "host_name": "a" }, { "host_name": "b" }] },
            "container": { "max_instances": 10 },
        })
    }

    #[test]
    fn substitutes_known_references() {
        assert_eq!(render("deploy ${service.name} now", resolver), "deploy web now");
        assert_eq!(render("${ service.name }", resolver), "web");
    }

    #[test]
    fn unknown_references_are_left_as_is() {
        assert_eq!(
            render("a ${missing.ref} b ${service.name}", resolver),
            "a ${missing.ref} b web"
        );
    }

    #[test]
    fn substituted_text_is_not_rescanned() {
        assert_eq!(render("${loop}!", resolver), "${loop}!");
    }

    #[test]
    fn unterminated_reference_is_kept() {
        assert_eq!(render("x ${service.name", resolver), "x ${service.name");
        assert_eq!(render("no refs", resolver), "no refs");
    }

    #[test]
    fn evaluates_paths_transforms_and_comparisons() {
        let evaluator = ExpressionEvaluator::new();
        let ctx = context();
        let eval = |expr: &str| evaluator.evaluate(expr, &ctx).unwrap();

        assert_eq!(eval("service.name"), json!("Web-API"));
        assert_eq!(eval("service.name|lower"), json!("web-api"));
        assert_eq!(eval("instances.instances[1].host_name"), json!("b"));
        assert_eq!(eval("service.name == 'Web-API'"), json!(true));
        assert_eq!(value_to_string(&eval("container.max_instances * 2")).as_deref(), Some("20"));
        assert_eq!(eval("service.missing"), Value::Null);
    }

    #[test]
    fn evaluation_errors_and_bad_context() {
        let evaluator = ExpressionEvaluator::new();
        assert!(matches!(
            evaluator.evaluate("service.name ==", &context()),
            Err(ExpressionError::EvalFailed(_))
        ));
        assert!(matches!(
            evaluator.evaluate("service.name", &json!([1])),
            Err(ExpressionError::InvalidContext(_))
        ));
    }

    #[test]
    fn value_to_string_formats() {
        assert_eq!(value_to_string(&json!("plain")).as_deref(), Some("plain"));
        assert_eq!(value_to_string(&json!(42)).as_deref(), Some("42"));
        assert_eq!(value_to_string(&json!(4.0)).as_deref(), Some("4"));
        assert_eq!(value_to_string(&json!(0.5)).as_deref(), Some("0.5"));
        assert_eq!(value_to_string(&json!(true)).as_deref(), Some("true"));
        assert_eq!(value_to_string(&json!(null)), None);
        assert_eq!(value_to_string(&json!([1, 2])).as_deref(), Some("[1,2]"));
    }
}
