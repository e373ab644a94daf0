//! Policy document shape: an ordered, first-match-wins rule list.

use serde::{Deserialize, Serialize};

use super::criteria::CriterionConfig;

/// The action a firing rule takes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Accept,
    Reject,
}

fn default_enabled() -> bool {
    true
}

/// One ordered rule. Criteria are conjunctive (AND). The data model describes a
/// well-formed rule's criteria as non-empty, but that is a document
/// authoring convention, not a condition the engine special-cases: an
/// empty criteria list is vacuously satisfied, the same as an empty `AND`,
/// which lets an operator express a catch-all accept/reject rule without
/// a criterion that always evaluates true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub criteria: Vec<CriterionConfig>,
}

impl Rule {
    /// All criteria pass (vacuously true when `criteria` is empty).
    pub fn matches(&self, ctx: &super::context::PolicyContext) -> bool {
        self.criteria.iter().all(|c| c.evaluate(ctx))
    }
}

/// A signer's current policy: an ordered, versioned rule list. Documents
/// are replaced wholesale on update, never edited in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub id: String,
    pub signer_id: String,
    pub rules: Vec<Rule>,
    pub version: u32,
}

/// Re-exported alias for the "Criterion" vocabulary; the concrete
/// representation lives in `criteria::CriterionConfig`.
pub type Criterion = CriterionConfig;
