//! Declarative input transforms applied before a component's `process`.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use serde_json::Value;
use thiserror::Error;

// Layer 3: Internal module imports
use super::envelope::Envelope;
use super::expression::{DestExpression, ExpressionError, SourceExpression};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transform {index} is missing '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("transform {index} has unknown type: {kind}")]
    UnknownType { index: usize, kind: String },

    #[error("transform {1}: {0}")]
    Expression(#[source] ExpressionError, usize),
}

/// One configured transform step.
#[derive(Debug, Clone)]
pub enum TransformStep {
    /// Copy the source value into the destination slot.
    Copy {
        source: SourceExpression,
        dest: DestExpression,
    },
    /// Copy, then remove the source slot.
    Move {
        source: SourceExpression,
        source_dest: DestExpression,
        dest: DestExpression,
    },
}

/// The transform pipeline a runner applies to every message envelope.
#[derive(Debug, Clone, Default)]
pub struct Transforms {
    steps: Vec<TransformStep>,
}

impl Transforms {
    /// Parse the `input_transforms` config list.
    ///
    /// Each entry is `{type: copy|move, source_expression, dest_expression}`.
    pub fn from_config(config: &[Value]) -> Result<Self, TransformError> {
        let mut steps = Vec::with_capacity(config.len());
        for (index, entry) in config.iter().enumerate() {
            let kind = entry
                .get("type")
                .and_then(Value::as_str)
                .ok_or(TransformError::MissingField { index, field: "type" })?;
            let source_raw = entry
                .get("source_expression")
                .and_then(Value::as_str)
                .ok_or(TransformError::MissingField {
                    index,
                    field: "source_expression",
                })?;
            let dest_raw = entry
                .get("dest_expression")
                .and_then(Value::as_str)
                .ok_or(TransformError::MissingField {
                    index,
                    field: "dest_expression",
                })?;

            let source = source_raw
                .parse::<SourceExpression>()
                .map_err(|e| TransformError::Expression(e, index))?;
            let dest = dest_raw
                .parse::<DestExpression>()
                .map_err(|e| TransformError::Expression(e, index))?;

            match kind {
                "copy" => steps.push(TransformStep::Copy { source, dest }),
                "move" => {
                    let source_dest = source_raw
                        .parse::<DestExpression>()
                        .map_err(|e| TransformError::Expression(e, index))?;
                    steps.push(TransformStep::Move {
                        source,
                        source_dest,
                        dest,
                    });
                }
                other => {
                    return Err(TransformError::UnknownType {
                        index,
                        kind: other.to_string(),
                    })
                }
            }
        }
        Ok(Self { steps })
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Apply every step, in configuration order, to the envelope.
    pub fn apply(&self, env: &mut Envelope) {
        for step in &self.steps {
            match step {
                TransformStep::Copy { source, dest } => {
                    let value = env.get_data(source);
                    env.set_data(dest, value);
                }
                TransformStep::Move {
                    source,
                    source_dest,
                    dest,
                } => {
                    let value = env.get_data(source);
                    env.set_data(dest, value);
                    env.remove_data(source_dest);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn copy_and_move_steps() {
        let config = [
            json!({"type": "copy", "source_expression": "input.payload:a", "dest_expression": "user_data:copied"}),
            json!({"type": "move", "source_expression": "input.payload:b", "dest_expression": "user_data:moved"}),
        ];
        let transforms = Transforms::from_config(&config).unwrap();

        let mut env = Envelope::new(json!({"a": 1, "b": 2}), "t", Default::default());
        transforms.apply(&mut env);

        assert_eq!(env.user_data().get("copied"), Some(&json!(1)));
        assert_eq!(env.user_data().get("moved"), Some(&json!(2)));
        assert_eq!(env.payload(), &json!({"a": 1}));
    }

    #[test]
    fn bad_config_is_rejected() {
        let missing = [json!({"type": "copy", "source_expression": "previous"})];
        assert!(matches!(
            Transforms::from_config(&missing),
            Err(TransformError::MissingField { field: "dest_expression", .. })
        ));

        let unknown = [json!({"type": "reverse", "source_expression": "previous", "dest_expression": "user_data:x"})];
        assert!(matches!(
            Transforms::from_config(&unknown),
            Err(TransformError::UnknownType { .. })
        ));
    }
}
