//! Risk arbiter: combines the deterministic rule verdict with an optional
//! LLM review into the final label.
//!
//! The arbiter receives its collaborators and never calls back into their
//! owners. The combine rule is `max` under Safe < Suspicious < Dangerous, so
//! disagreement always resolves conservatively.

use std::fs;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::ai::parse::parse_reply;
use crate::ai::{LlmGateway, ReviewRequest};
use crate::core::errors::CmError;
use crate::core::types::{AssessmentMethod, ItemKind, RiskLabel, ScanItem};
use crate::rules::RuleEngine;
use crate::whitelist::WhitelistSnapshot;

/// Arbitration outcome before rationale interning.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub rule_label: RiskLabel,
    pub llm_label: Option<RiskLabel>,
    pub final_label: RiskLabel,
    pub method: AssessmentMethod,
    pub confidence: f64,
    pub rationale: String,
}

/// The component that produces the final risk label for each scan item.
pub struct RiskArbiter {
    rules: RuleEngine,
    whitelist: Arc<WhitelistSnapshot>,
    gateway: Arc<dyn LlmGateway>,
}

impl RiskArbiter {
    pub fn new(
        rules: RuleEngine,
        whitelist: Arc<WhitelistSnapshot>,
        gateway: Arc<dyn LlmGateway>,
    ) -> Self {
        Self {
            rules,
            whitelist,
            gateway,
        }
    }

    /// Assess one item. Never fails: every error path degrades to the rule
    /// verdict (or the conservative default).
    #[must_use]
    pub fn assess(&self, item: &ScanItem, now: DateTime<Utc>) -> Assessment {
        // 1. Whitelist short-circuit: protected paths are untouchable and
        //    never cost an LLM call.
        if self.whitelist.is_protected(&item.path) {
            return Assessment {
                rule_label: RiskLabel::Dangerous,
                llm_label: None,
                final_label: RiskLabel::Dangerous,
                method: AssessmentMethod::Whitelist,
                confidence: 1.0,
                rationale: "path is protected by the whitelist".to_string(),
            };
        }

        // 2. Deterministic rules.
        let last_access = fs::symlink_metadata(&item.path)
            .ok()
            .and_then(|m| m.accessed().or_else(|_| m.modified()).ok())
            .map(DateTime::<Utc>::from);
        let verdict = self
            .rules
            .classify(&item.path, item.size, last_access, item.kind, now);

        // 3. LLM arbitration, only for Suspicious and only when the gate is
        //    willing.
        if verdict.label == RiskLabel::Suspicious && self.gateway.available() {
            let request = ReviewRequest {
                path: item.path.to_string_lossy().into_owned(),
                kind: match item.kind {
                    ItemKind::File => "file",
                    ItemKind::Dir => "dir",
                },
                size: item.size,
                rule_label: verdict.label.as_str(),
                rule_confidence: verdict.confidence,
                matched_rules: verdict.matched_rules.clone(),
            };

            match self.gateway.review(&request) {
                Ok(raw) => match parse_reply(&raw) {
                    Ok(parsed) => {
                        // 4. Conservative combine.
                        let final_label = verdict.label.max(parsed.label);
                        return Assessment {
                            rule_label: verdict.label,
                            llm_label: Some(parsed.label),
                            final_label,
                            method: AssessmentMethod::AiEnhanced,
                            confidence: 0.9,
                            rationale: parsed.reason,
                        };
                    }
                    Err(_) => {
                        return Assessment {
                            rule_label: verdict.label,
                            llm_label: None,
                            final_label: verdict.label,
                            method: AssessmentMethod::RuleOnlyAiParseFailed,
                            confidence: verdict.confidence,
                            rationale: verdict.rationale,
                        };
                    }
                },
                Err(CmError::LlmParseError { .. }) => {
                    return Assessment {
                        rule_label: verdict.label,
                        llm_label: None,
                        final_label: verdict.label,
                        method: AssessmentMethod::RuleOnlyAiParseFailed,
                        confidence: verdict.confidence,
                        rationale: verdict.rationale,
                    };
                }
                Err(_) => {
                    // Budget exhaustion, open circuit, transport failure:
                    // all resolve by rules. Auth and quota additionally
                    // flipped the gateway unavailable for later items.
                }
            }
        }

        let method = if verdict.matched_rules.is_empty() {
            AssessmentMethod::DefaultConservative
        } else {
            AssessmentMethod::RuleOnly
        };
        Assessment {
            rule_label: verdict.label,
            llm_label: None,
            final_label: verdict.label,
            method,
            confidence: verdict.confidence,
            rationale: verdict.rationale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::Result;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockGateway {
        available: bool,
        replies: Mutex<VecDeque<Result<String>>>,
        calls: AtomicU32,
    }

    impl MockGateway {
        fn with_replies(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                available: true,
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn unavailable() -> Arc<Self> {
            Arc::new(Self {
                available: false,
                replies: Mutex::new(VecDeque::new()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl LlmGateway for MockGateway {
        fn available(&self) -> bool {
            self.available
        }

        fn review(&self, _request: &ReviewRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(CmError::Runtime {
                    details: "no scripted reply".to_string(),
                }))
        }
    }

    fn item(path: &str, kind: ItemKind) -> ScanItem {
        ScanItem {
            path: PathBuf::from(path),
            size: 10 * 1024 * 1024,
            kind,
            discovered_at: Utc::now(),
        }
    }

    fn arbiter(gateway: Arc<dyn LlmGateway>, protected: Vec<PathBuf>) -> RiskArbiter {
        RiskArbiter::new(
            RuleEngine::with_builtins(),
            crate::whitelist::Whitelist::new(protected).current(),
            gateway,
        )
    }

    #[test]
    fn whitelist_short_circuits_without_llm_call() {
        let gateway = MockGateway::with_replies(vec![Ok(
            "{\"risk_level\":\"safe\",\"reason\":\"x\"}".to_string(),
        )]);
        let arb = arbiter(gateway.clone(), vec![PathBuf::from("/protected")]);

        let out = arb.assess(&item("/protected/cache", ItemKind::Dir), Utc::now());
        assert_eq!(out.final_label, RiskLabel::Dangerous);
        assert_eq!(out.method, AssessmentMethod::Whitelist);
        assert_eq!(gateway.calls(), 0);
    }

    #[test]
    fn safe_items_never_reach_the_llm() {
        let gateway = MockGateway::with_replies(vec![]);
        let arb = arbiter(gateway.clone(), vec![]);

        let out = arb.assess(&item("/tmp/scratch/a.tmp", ItemKind::File), Utc::now());
        assert_eq!(out.final_label, RiskLabel::Safe);
        assert_eq!(out.method, AssessmentMethod::RuleOnly);
        assert_eq!(gateway.calls(), 0);
    }

    #[test]
    fn llm_downgrade_is_overruled_by_max_combine() {
        let gateway = MockGateway::with_replies(vec![Ok(
            "{\"risk_level\":\"safe\",\"reason\":\"known cache\"}".to_string(),
        )]);
        let arb = arbiter(gateway.clone(), vec![]);

        let out = arb.assess(&item("/home/u/projects/app_cache", ItemKind::Dir), Utc::now());
        assert_eq!(out.rule_label, RiskLabel::Suspicious);
        assert_eq!(out.llm_label, Some(RiskLabel::Safe));
        assert_eq!(
            out.final_label,
            RiskLabel::Suspicious,
            "max(Suspicious, Safe) must stay Suspicious"
        );
        assert_eq!(out.method, AssessmentMethod::AiEnhanced);
        assert_eq!(out.rationale, "known cache");
        assert_eq!(gateway.calls(), 1);
    }

    #[test]
    fn llm_upgrade_raises_the_final_label() {
        let gateway = MockGateway::with_replies(vec![Ok(
            "{\"risk_level\":\"dangerous\",\"reason\":\"looks like user data\"}".to_string(),
        )]);
        let arb = arbiter(gateway, vec![]);

        let out = arb.assess(&item("/home/u/projects/app_cache", ItemKind::Dir), Utc::now());
        assert_eq!(out.final_label, RiskLabel::Dangerous);
        assert!(out.final_label >= out.rule_label);
    }

    #[test]
    fn parse_failure_falls_back_with_method_tag() {
        let gateway =
            MockGateway::with_replies(vec![Ok("I refuse to answer in JSON.".to_string())]);
        let arb = arbiter(gateway, vec![]);

        let out = arb.assess(&item("/home/u/projects/app_cache", ItemKind::Dir), Utc::now());
        assert_eq!(out.final_label, RiskLabel::Suspicious);
        assert_eq!(out.method, AssessmentMethod::RuleOnlyAiParseFailed);
    }

    #[test]
    fn gateway_error_resolves_by_rules() {
        let gateway = MockGateway::with_replies(vec![Err(CmError::CircuitOpen {
            endpoint: "api".to_string(),
        })]);
        let arb = arbiter(gateway, vec![]);

        let out = arb.assess(&item("/home/u/projects/app_cache", ItemKind::Dir), Utc::now());
        assert_eq!(out.final_label, RiskLabel::Suspicious);
        assert_eq!(out.method, AssessmentMethod::DefaultConservative);
    }

    #[test]
    fn unavailable_gateway_never_called() {
        let gateway = MockGateway::unavailable();
        let arb = arbiter(gateway.clone(), vec![]);

        let out = arb.assess(&item("/home/u/projects/app_cache", ItemKind::Dir), Utc::now());
        assert_eq!(out.method, AssessmentMethod::DefaultConservative);
        assert_eq!(gateway.calls(), 0);
    }

    #[test]
    fn final_label_never_below_rule_label() {
        let replies = vec![
            Ok("{\"risk_level\":\"safe\",\"reason\":\"a\"}".to_string()),
            Ok("{\"risk_level\":\"suspicious\",\"reason\":\"b\"}".to_string()),
            Ok("{\"risk_level\":\"dangerous\",\"reason\":\"c\"}".to_string()),
        ];
        let gateway = MockGateway::with_replies(replies);
        let arb = arbiter(gateway, vec![]);

        for _ in 0..3 {
            let out = arb.assess(&item("/home/u/projects/app_cache", ItemKind::Dir), Utc::now());
            assert!(out.final_label >= out.rule_label);
        }
    }
}
