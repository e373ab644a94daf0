//! Policy / rules engine: a deterministic, fail-closed evaluator for
//! ordered accept/reject rules, plus the context assembler that turns a
//! raw signing request into the snapshot the engine evaluates against.
//!
//! The engine itself never reads the wall clock, storage, or anything
//! else outside the `PolicyContext` it is handed — determinism is the
//! whole point, and the assembler exists precisely to keep that true.

pub mod context;
pub mod criteria;
pub mod document;
pub mod engine;

pub use context::{AggregateReader, PolicyContext, PolicyContextAssembler, RedbAggregateReader};
pub use criteria::{CriterionConfig, Operator, SetOperator};
pub use document::{Criterion, PolicyDocument, Rule, RuleAction};
pub use engine::{EvaluationResult, evaluate};

use serde::{Deserialize, Serialize};

/// One denial reason surfaced to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Violation {
    pub fn default_deny() -> Self {
        Self {
            kind: ViolationKind::DefaultDeny,
            description: None,
        }
    }

    pub fn rule_reject(description: Option<String>) -> Self {
        Self {
            kind: ViolationKind::RuleReject,
            description,
        }
    }
}

/// The two violation kinds the rules engine can produce; it names no
/// others (a criterion failing to evaluate falls the rule through to the
/// next rule rather than producing its own violation kind).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    DefaultDeny,
    RuleReject,
}
