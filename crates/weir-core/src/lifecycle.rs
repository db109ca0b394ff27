//! Node lifecycle state machine.
//!
//! Governs which actions are legal against a node at a given status and
//! which status each action produces. Illegal actions are structured
//! rejections, never silent no-ops; validation failures short-circuit
//! APPROVE and CREATE_RUN before any state mutation.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WeirError};
use crate::node::{Node, NodeStatus};

/// Node kinds whose documents may be saved regardless of status.
const SAVE_EXEMPT_KINDS: &[&str] = &["file"];

/// Actions a caller can apply to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeAction {
    Save,
    Validate,
    Approve,
    CreateRun,
    Deprecate,
    MandatoryDeprecate,
    PreviewCmd,
}

impl NodeAction {
    /// Actions permitted against a read-only node document.
    pub fn is_readonly_safe(&self) -> bool {
        matches!(self, NodeAction::Validate | NodeAction::PreviewCmd)
    }
}

impl std::fmt::Display for NodeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeAction::Save => "SAVE",
            NodeAction::Validate => "VALIDATE",
            NodeAction::Approve => "APPROVE",
            NodeAction::CreateRun => "CREATE_RUN",
            NodeAction::Deprecate => "DEPRECATE",
            NodeAction::MandatoryDeprecate => "MANDATORY_DEPRECATE",
            NodeAction::PreviewCmd => "PREVIEW_CMD",
        };
        write!(f, "{}", s)
    }
}

/// A single structural validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ValidationError {
    MissingTitle,
    DuplicateParameter { name: String },
    DuplicateInput { name: String },
    DuplicateOutput { name: String },
    DuplicateLog { name: String },
    EmptyEnumCandidates { parameter: String },
    InvalidCardinality { input: String, min_count: usize, max_count: usize },
    TooManyValues { input: String, bound: usize, max_count: usize },
    TooFewValues { input: String, bound: usize, min_count: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingTitle => write!(f, "node title is empty"),
            ValidationError::DuplicateParameter { name } => {
                write!(f, "duplicate parameter name `{}`", name)
            }
            ValidationError::DuplicateInput { name } => {
                write!(f, "duplicate input name `{}`", name)
            }
            ValidationError::DuplicateOutput { name } => {
                write!(f, "duplicate output name `{}`", name)
            }
            ValidationError::DuplicateLog { name } => {
                write!(f, "duplicate log name `{}`", name)
            }
            ValidationError::EmptyEnumCandidates { parameter } => {
                write!(f, "enum parameter `{}` has no candidates", parameter)
            }
            ValidationError::InvalidCardinality {
                input,
                min_count,
                max_count,
            } => write!(
                f,
                "input `{}` has min_count {} > max_count {}",
                input, min_count, max_count
            ),
            ValidationError::TooManyValues {
                input,
                bound,
                max_count,
            } => write!(
                f,
                "input `{}` has {} bound values, max_count is {}",
                input, bound, max_count
            ),
            ValidationError::TooFewValues {
                input,
                bound,
                min_count,
            } => write!(
                f,
                "input `{}` has {} bound values, min_count is {}",
                input, bound, min_count
            ),
        }
    }
}

/// The result of applying an action.
#[derive(Debug)]
pub enum ActionOutcome {
    Saved,
    Validated(Vec<ValidationError>),
    /// Validation failed; APPROVE/CREATE_RUN stopped before any mutation.
    ValidationFailed(Vec<ValidationError>),
    Approved,
    RunCreated(Node),
    Deprecated,
    MandatoryDeprecated,
    /// Legal at any status; the execution layer renders the preview.
    PreviewRequested,
}

fn find_duplicates<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut dups = Vec::new();
    for name in names {
        if !seen.insert(name) && !dups.iter().any(|d| d == name) {
            dups.push(name.to_string());
        }
    }
    dups
}

/// Structural validation: naming, enum candidates, cardinality bounds.
pub fn validate(node: &Node) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if node.title.trim().is_empty() {
        errors.push(ValidationError::MissingTitle);
    }

    for name in find_duplicates(node.parameters.iter().map(|p| p.name.as_str())) {
        errors.push(ValidationError::DuplicateParameter { name });
    }
    for name in find_duplicates(node.inputs.iter().map(|i| i.name.as_str())) {
        errors.push(ValidationError::DuplicateInput { name });
    }
    for name in find_duplicates(node.outputs.iter().map(|o| o.name.as_str())) {
        errors.push(ValidationError::DuplicateOutput { name });
    }
    for name in find_duplicates(node.logs.iter().map(|l| l.name.as_str())) {
        errors.push(ValidationError::DuplicateLog { name });
    }

    for param in &node.parameters {
        if let crate::node::ParameterValue::Enum(e) = &param.value {
            if e.values.is_empty() {
                errors.push(ValidationError::EmptyEnumCandidates {
                    parameter: param.name.clone(),
                });
            }
        }
    }

    for input in &node.inputs {
        if input.min_count > input.max_count {
            errors.push(ValidationError::InvalidCardinality {
                input: input.name.clone(),
                min_count: input.min_count,
                max_count: input.max_count,
            });
        }
        if input.values.len() > input.max_count {
            errors.push(ValidationError::TooManyValues {
                input: input.name.clone(),
                bound: input.values.len(),
                max_count: input.max_count,
            });
        }
    }

    errors
}

/// Run-readiness validation: structural checks plus full cardinality.
///
/// A node being edited may leave inputs unbound; a run instance may not.
pub fn validate_for_run(node: &Node) -> Vec<ValidationError> {
    let mut errors = validate(node);
    for input in &node.inputs {
        if input.values.len() < input.min_count {
            errors.push(ValidationError::TooFewValues {
                input: input.name.clone(),
                bound: input.values.len(),
                min_count: input.min_count,
            });
        }
    }
    errors
}

fn illegal(action: NodeAction, status: NodeStatus) -> WeirError {
    WeirError::IllegalAction {
        action: action.to_string(),
        status: status.to_string(),
    }
}

/// Apply a lifecycle action to a node.
///
/// Returns the structured outcome, or an `IllegalAction` error when the
/// action's status precondition fails. PREVIEW_CMD is read-only and handled
/// by the execution layer; it is rejected here.
pub fn apply_action(node: &mut Node, action: NodeAction) -> Result<ActionOutcome> {
    debug!(action = %action, status = %node.node_status, node_id = %node.id, "applying lifecycle action");

    match action {
        NodeAction::Save => {
            let exempt = SAVE_EXEMPT_KINDS.contains(&node.base_node_name.as_str());
            if node.node_status != NodeStatus::Created && !exempt {
                return Err(illegal(action, node.node_status));
            }
            node.update_date = Some(Utc::now());
            Ok(ActionOutcome::Saved)
        }

        NodeAction::Validate => Ok(ActionOutcome::Validated(validate(node))),

        NodeAction::Approve => {
            if node.node_status != NodeStatus::Created {
                return Err(illegal(action, node.node_status));
            }
            let errors = validate(node);
            if !errors.is_empty() {
                return Ok(ActionOutcome::ValidationFailed(errors));
            }
            node.node_status = NodeStatus::Ready;
            node.update_date = Some(Utc::now());
            Ok(ActionOutcome::Approved)
        }

        NodeAction::CreateRun => {
            if node.node_status != NodeStatus::Created {
                return Err(illegal(action, node.node_status));
            }
            let errors = validate_for_run(node);
            if !errors.is_empty() {
                return Ok(ActionOutcome::ValidationFailed(errors));
            }
            Ok(ActionOutcome::RunCreated(node.clone_as_run()))
        }

        NodeAction::Deprecate => {
            if node.node_status == NodeStatus::Created {
                return Err(illegal(action, node.node_status));
            }
            node.node_status = NodeStatus::Deprecated;
            node.update_date = Some(Utc::now());
            Ok(ActionOutcome::Deprecated)
        }

        NodeAction::MandatoryDeprecate => {
            if node.node_status == NodeStatus::Created {
                return Err(illegal(action, node.node_status));
            }
            node.node_status = NodeStatus::MandatoryDeprecated;
            node.update_date = Some(Utc::now());
            Ok(ActionOutcome::MandatoryDeprecated)
        }

        // Rendering happens in the execution layer; the state machine only
        // vouches that the action never mutates status.
        NodeAction::PreviewCmd => Ok(ActionOutcome::PreviewRequested),
    }
}
