//! The Rules Engine: ordered, first-match-wins evaluation of a policy
//! document against a context, fail-closed throughout.

use serde::Serialize;

use super::context::PolicyContext;
use super::document::PolicyDocument;
use super::{Violation, ViolationKind};

/// Outcome of one evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub allowed: bool,
    pub violations: Vec<Violation>,
    pub evaluated_count: usize,
    pub evaluation_time_ms: u64,
}

/// Evaluate `document` against `ctx`. Pure: depends only on its
/// arguments, reads no clock or storage (the duration measurement below
/// is metadata about the call, not an input to the decision).
pub fn evaluate(document: Option<&PolicyDocument>, ctx: &PolicyContext) -> EvaluationResult {
    let started = std::time::Instant::now();

    let Some(document) = document else {
        return EvaluationResult {
            allowed: false,
            violations: vec![Violation::default_deny()],
            evaluated_count: 0,
            evaluation_time_ms: elapsed_ms(started),
        };
    };

    if document.rules.is_empty() {
        return EvaluationResult {
            allowed: false,
            violations: vec![Violation::default_deny()],
            evaluated_count: 0,
            evaluation_time_ms: elapsed_ms(started),
        };
    }

    let mut evaluated_count = 0;
    for rule in &document.rules {
        if !rule.enabled {
            continue;
        }
        evaluated_count += 1;

        if !rule.matches(ctx) {
            continue;
        }

        return match rule.action {
            super::RuleAction::Accept => EvaluationResult {
                allowed: true,
                violations: Vec::new(),
                evaluated_count,
                evaluation_time_ms: elapsed_ms(started),
            },
            super::RuleAction::Reject => EvaluationResult {
                allowed: false,
                violations: vec![Violation {
                    kind: ViolationKind::RuleReject,
                    description: rule.description.clone(),
                }],
                evaluated_count,
                evaluation_time_ms: elapsed_ms(started),
            },
        };
    }

    EvaluationResult {
        allowed: false,
        violations: vec![Violation::default_deny()],
        evaluated_count,
        evaluation_time_ms: elapsed_ms(started),
    }
}

fn elapsed_ms(started: std::time::Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::context::fakes::FixedAggregateReader;
    use crate::policy::context::{PolicyContextAssembler, RequestFacts};
    use crate::policy::criteria::{CriterionConfig, Operator, SetOperator};
    use crate::policy::document::{Rule, RuleAction};
    use chrono::Utc;
    use primitive_types::U256;
    use std::sync::Arc;

    fn assemble(value_wei: U256, to: Option<&str>, hour: u32, req_count: u32) -> PolicyContext {
        let reader = FixedAggregateReader {
            request_count_last_hour: req_count,
            daily_spend_wei: U256::from(2) * U256::from(10u64).pow(U256::from(17u64)),
            ..Default::default()
        };
        let assembler = PolicyContextAssembler::new(Arc::new(reader));
        let now = Utc::now()
            .date_naive()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
            .and_utc();
        assembler
            .assemble(
                "signer-1",
                RequestFacts {
                    signer_address: "0xsigner",
                    to_address: to,
                    value_wei,
                    data: None,
                    chain_id: 1,
                    caller_ip: None,
                },
                now,
            )
            .unwrap()
    }

    fn conservative_document() -> PolicyDocument {
        PolicyDocument {
            id: "doc-1".to_string(),
            signer_id: "signer-1".to_string(),
            version: 1,
            rules: vec![
                Rule {
                    action: RuleAction::Reject,
                    description: Some("denylisted address".to_string()),
                    enabled: true,
                    criteria: vec![CriterionConfig::EvmAddress {
                        operator: SetOperator::In,
                        addresses: vec!["0xdead000000000000000000000000000000dead".to_string()],
                        allow_deploy: false,
                    }],
                },
                Rule {
                    action: RuleAction::Accept,
                    description: Some("conservative daily allowance".to_string()),
                    enabled: true,
                    criteria: vec![
                        CriterionConfig::EthValue {
                            operator: Operator::Lte,
                            value: "1e17".to_string(),
                        },
                        CriterionConfig::DailyLimit {
                            max_wei: "5e17".to_string(),
                        },
                        CriterionConfig::RateLimit { max_per_hour: 10 },
                        CriterionConfig::TimeWindow {
                            start_hour: 9,
                            end_hour: 17,
                        },
                    ],
                },
            ],
        }
    }

    #[test]
    fn accepts_within_conservative_window() {
        let doc = conservative_document();
        let ctx = assemble(
            U256::from(10u64).pow(U256::from(17u64)),
            Some("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            14,
            5,
        );
        let result = evaluate(Some(&doc), &ctx);
        assert!(result.allowed);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn rejects_denylisted_address() {
        let doc = conservative_document();
        let ctx = assemble(
            U256::from(10u64).pow(U256::from(17u64)),
            Some("0xdead000000000000000000000000000000dead"),
            14,
            5,
        );
        let result = evaluate(Some(&doc), &ctx);
        assert!(!result.allowed);
        assert_eq!(result.violations[0].kind, ViolationKind::RuleReject);
    }

    #[test]
    fn default_denies_above_every_rule() {
        let doc = conservative_document();
        let ctx = assemble(
            U256::from(10u64).pow(U256::from(19u64)),
            Some("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            14,
            5,
        );
        let result = evaluate(Some(&doc), &ctx);
        assert!(!result.allowed);
        assert_eq!(result.violations[0].kind, ViolationKind::DefaultDeny);
    }

    #[test]
    fn no_document_is_default_deny() {
        let ctx = assemble(U256::zero(), None, 14, 0);
        let result = evaluate(None, &ctx);
        assert!(!result.allowed);
        assert_eq!(result.violations[0].kind, ViolationKind::DefaultDeny);
    }

    #[test]
    fn empty_rule_list_is_default_deny() {
        let doc = PolicyDocument {
            id: "empty".to_string(),
            signer_id: "signer-1".to_string(),
            version: 1,
            rules: vec![],
        };
        let ctx = assemble(U256::zero(), None, 14, 0);
        let result = evaluate(Some(&doc), &ctx);
        assert!(!result.allowed);
        assert_eq!(result.evaluated_count, 0);
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let mut doc = conservative_document();
        doc.rules[1].enabled = false;
        let ctx = assemble(
            U256::from(10u64).pow(U256::from(17u64)),
            Some("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            14,
            5,
        );
        let result = evaluate(Some(&doc), &ctx);
        assert!(!result.allowed);
        assert_eq!(result.violations[0].kind, ViolationKind::DefaultDeny);
    }

    #[test]
    fn rule_with_failing_criterion_does_not_fire() {
        // A rule whose criterion fails to evaluate falls through rather
        // than firing — here, a malformed dailyLimit makes the accept
        // rule not match even though ethValue/rateLimit/timeWindow all do.
        let mut doc = conservative_document();
        doc.rules[1].criteria[1] = CriterionConfig::DailyLimit {
            max_wei: "not-a-number".to_string(),
        };
        let ctx = assemble(
            U256::from(10u64).pow(U256::from(17u64)),
            Some("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            14,
            5,
        );
        let result = evaluate(Some(&doc), &ctx);
        assert!(!result.allowed);
        assert_eq!(result.violations[0].kind, ViolationKind::DefaultDeny);
    }
}
