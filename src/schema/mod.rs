//! Declarative output contracts for structured generation.
//!
//! A `SchemaContract` names the fields a stage expects in model output and
//! the constraint on each. Validation walks every rule and accumulates
//! violations rather than stopping at the first, so retry feedback can
//! list everything the model must fix in one pass.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// The JSON value kind a field must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValueKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    /// Any JSON value; the field only needs to be present.
    Any,
}

impl ValueKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ValueKind::String => value.is_string(),
            ValueKind::Number => value.is_number(),
            ValueKind::Integer => value.is_i64() || value.is_u64(),
            ValueKind::Boolean => value.is_boolean(),
            ValueKind::Array => value.is_array(),
            ValueKind::Object => value.is_object(),
            ValueKind::Any => !value.is_null(),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Number => "number",
            ValueKind::Integer => "integer",
            ValueKind::Boolean => "boolean",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Any => "value",
        };
        write!(f, "{}", name)
    }
}

/// A single constraint on a field path.
#[derive(Debug, Clone, Serialize)]
pub enum Constraint {
    /// Field must be present and of the given kind.
    Required(ValueKind),
    /// Field must be a string drawn from a fixed set.
    OneOf(Vec<String>),
    /// Field must be an array with at least this many elements.
    MinItems(usize),
    /// Field must be a number within the inclusive range.
    InRange { min: f64, max: f64 },
}

impl Constraint {
    /// Short description used in violation reports and retry feedback.
    fn describe(&self) -> String {
        match self {
            Constraint::Required(kind) => format!("required {}", kind),
            Constraint::OneOf(choices) => format!("one of [{}]", choices.join(", ")),
            Constraint::MinItems(n) => format!("array with at least {} items", n),
            Constraint::InRange { min, max } => format!("number between {} and {}", min, max),
        }
    }
}

/// A rule binding a constraint to a dotted field path.
#[derive(Debug, Clone, Serialize)]
pub struct FieldRule {
    pub path: String,
    pub constraint: Constraint,
}

/// A violated constraint, with the offending field path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// Dotted path of the field (e.g., "market.size_usd").
    pub path: String,
    /// The constraint that was violated, in words.
    pub constraint: String,
    /// What was found instead.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`: {} ({})", self.path, self.constraint, self.message)
    }
}

/// A named set of field rules that model output must satisfy.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaContract {
    name: String,
    rules: Vec<FieldRule>,
}

impl SchemaContract {
    /// Create an empty contract with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    /// Get the contract name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the rules in declaration order.
    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    /// Require a field of the given kind at `path`.
    pub fn require(mut self, path: impl Into<String>, kind: ValueKind) -> Self {
        self.rules.push(FieldRule {
            path: path.into(),
            constraint: Constraint::Required(kind),
        });
        self
    }

    /// Require a string field at `path` drawn from `choices`.
    pub fn one_of<I, S>(mut self, path: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.push(FieldRule {
            path: path.into(),
            constraint: Constraint::OneOf(choices.into_iter().map(Into::into).collect()),
        });
        self
    }

    /// Require an array field at `path` with at least `count` elements.
    pub fn min_items(mut self, path: impl Into<String>, count: usize) -> Self {
        self.rules.push(FieldRule {
            path: path.into(),
            constraint: Constraint::MinItems(count),
        });
        self
    }

    /// Require a numeric field at `path` within `[min, max]`.
    pub fn in_range(mut self, path: impl Into<String>, min: f64, max: f64) -> Self {
        self.rules.push(FieldRule {
            path: path.into(),
            constraint: Constraint::InRange { min, max },
        });
        self
    }

    /// Check `value` against every rule, returning all violations.
    ///
    /// An empty result means the value satisfies the contract.
    pub fn validate(&self, value: &Value) -> Vec<Violation> {
        let mut violations = Vec::new();

        for rule in &self.rules {
            let found = lookup(value, &rule.path);
            match (&rule.constraint, found) {
                (constraint, None) => violations.push(Violation {
                    path: rule.path.clone(),
                    constraint: constraint.describe(),
                    message: "field is missing".to_string(),
                }),
                (Constraint::Required(kind), Some(v)) => {
                    if !kind.matches(v) {
                        violations.push(Violation {
                            path: rule.path.clone(),
                            constraint: rule.constraint.describe(),
                            message: format!("got {}", kind_of(v)),
                        });
                    }
                }
                (Constraint::OneOf(choices), Some(v)) => match v.as_str() {
                    Some(s) if choices.iter().any(|c| c == s) => {}
                    Some(s) => violations.push(Violation {
                        path: rule.path.clone(),
                        constraint: rule.constraint.describe(),
                        message: format!("got \"{}\"", s),
                    }),
                    None => violations.push(Violation {
                        path: rule.path.clone(),
                        constraint: rule.constraint.describe(),
                        message: format!("got {}", kind_of(v)),
                    }),
                },
                (Constraint::MinItems(count), Some(v)) => match v.as_array() {
                    Some(items) if items.len() >= *count => {}
                    Some(items) => violations.push(Violation {
                        path: rule.path.clone(),
                        constraint: rule.constraint.describe(),
                        message: format!("got {} items", items.len()),
                    }),
                    None => violations.push(Violation {
                        path: rule.path.clone(),
                        constraint: rule.constraint.describe(),
                        message: format!("got {}", kind_of(v)),
                    }),
                },
                (Constraint::InRange { min, max }, Some(v)) => match v.as_f64() {
                    Some(n) if n >= *min && n <= *max => {}
                    Some(n) => violations.push(Violation {
                        path: rule.path.clone(),
                        constraint: rule.constraint.describe(),
                        message: format!("got {}", n),
                    }),
                    None => violations.push(Violation {
                        path: rule.path.clone(),
                        constraint: rule.constraint.describe(),
                        message: format!("got {}", kind_of(v)),
                    }),
                },
            }
        }

        violations
    }
}

/// Compose retry feedback instructing the model to fix the listed fields.
pub fn feedback_for(violations: &[Violation]) -> String {
    let mut text = String::from(
        "Your previous response failed validation. Fix the fields listed below \
         and respond again with the complete corrected JSON object, nothing else:\n",
    );
    for violation in violations {
        text.push_str(&format!(
            "- `{}`: must be {}, but {}\n",
            violation.path, violation.constraint, violation.message
        ));
    }
    text
}

/// Resolve a dotted path against a JSON value.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_contract() -> SchemaContract {
        SchemaContract::new("market_research")
            .require("summary", ValueKind::String)
            .in_range("confidence", 0.0, 1.0)
            .min_items("trends", 2)
            .one_of("outlook", ["positive", "neutral", "negative"])
    }

    #[test]
    fn test_valid_value_passes() {
        let value = json!({
            "summary": "Growing niche",
            "confidence": 0.7,
            "trends": ["remote work", "ai tooling"],
            "outlook": "positive"
        });

        assert!(sample_contract().validate(&value).is_empty());
    }

    #[test]
    fn test_missing_field_reported_with_path() {
        let value = json!({
            "confidence": 0.7,
            "trends": ["a", "b"],
            "outlook": "neutral"
        });

        let violations = sample_contract().validate(&value);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "summary");
        assert_eq!(violations[0].message, "field is missing");
    }

    #[test]
    fn test_all_violations_accumulated() {
        let value = json!({
            "summary": 42,
            "confidence": 3.5,
            "trends": ["only one"],
            "outlook": "bullish"
        });

        let violations = sample_contract().validate(&value);
        assert_eq!(violations.len(), 4);

        let paths: Vec<&str> = violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["summary", "confidence", "trends", "outlook"]);
    }

    #[test]
    fn test_nested_path_lookup() {
        let contract =
            SchemaContract::new("sizing").in_range("market.size_usd", 0.0, 1e15);

        let ok = json!({"market": {"size_usd": 5_000_000.0}});
        assert!(contract.validate(&ok).is_empty());

        let missing = json!({"market": {}});
        let violations = contract.validate(&missing);
        assert_eq!(violations[0].path, "market.size_usd");
    }

    #[test]
    fn test_wrong_kind_reported() {
        let contract = SchemaContract::new("t").require("flag", ValueKind::Boolean);
        let violations = contract.validate(&json!({"flag": "yes"}));

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].message, "got string");
    }

    #[test]
    fn test_feedback_lists_every_field() {
        let violations = vec![
            Violation {
                path: "score".to_string(),
                constraint: "number between 0 and 1".to_string(),
                message: "got 3.5".to_string(),
            },
            Violation {
                path: "tags".to_string(),
                constraint: "array with at least 3 items".to_string(),
                message: "got 1 items".to_string(),
            },
        ];

        let feedback = feedback_for(&violations);
        assert!(feedback.contains("`score`"));
        assert!(feedback.contains("number between 0 and 1"));
        assert!(feedback.contains("`tags`"));
        assert!(feedback.contains("at least 3 items"));
    }
}
