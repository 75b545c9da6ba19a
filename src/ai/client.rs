//! Blocking LLM wire client and the budgeted, breaker-guarded reviewer.
//!
//! The pipeline is thread-based, so the HTTP seam is `reqwest::blocking`.
//! Every attempt flows: breaker check → budget gate (reserve) → POST →
//! settle/refund. Retries happen inside this loop and nowhere else.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ai::breaker::CircuitBreaker;
use crate::ai::cost::{CostController, GateDecision};
use crate::ai::{LlmGateway, ReviewRequest};
use crate::core::config::{AiConfig, BreakerConfig, CostControlMode};
use crate::core::errors::{CmError, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "You are a file-deletion risk arbiter for a disk cleanup tool. \
You receive the deterministic rule engine's verdict and the file facts. \
Reply with a single JSON object {\"risk_level\": \"safe\"|\"suspicious\"|\"dangerous\", \
\"reason\": \"...\"}. Prefer the higher risk level when uncertain; never let a \
user document or system file be labelled safe.";

// ──────────────────── wire protocol ────────────────────

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    system: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)] // id/model/stop_reason are part of the wire contract
struct MessagesResponse {
    id: String,
    model: String,
    stop_reason: Option<String>,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize, Default)]
struct WireError {
    #[serde(default)]
    error: WireErrorBody,
}

#[derive(Debug, Deserialize, Default)]
struct WireErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

// ──────────────────── low-level client ────────────────────

/// One-shot HTTP client for the messages endpoint.
pub struct LlmClient {
    http: reqwest::blocking::Client,
    config: AiConfig,
}

impl LlmClient {
    pub fn new(config: AiConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CmError::LlmConnection {
                details: format!("client build failed: {e}"),
            })?;
        Ok(Self { http, config })
    }

    /// Whether a bearer credential is present.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.config
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }

    /// Execute exactly one request. No retries at this level.
    fn execute(&self, prompt: &str) -> Result<String> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(CmError::LlmAuth {
                details: "no API key configured".to_string(),
            });
        };

        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: SYSTEM_PROMPT,
            messages: vec![WireMessage {
                role: "user",
                content: prompt,
            }],
        };

        let started = Instant::now();
        let response = self
            .http
            .post(&self.config.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    CmError::LlmTimeout {
                        elapsed_ms: u64::try_from(started.elapsed().as_millis())
                            .unwrap_or(u64::MAX),
                    }
                } else {
                    CmError::LlmConnection {
                        details: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let body: MessagesResponse =
                response.json().map_err(|e| CmError::LlmParseError {
                    details: format!("malformed response body: {e}"),
                })?;
            return body
                .content
                .into_iter()
                .find(|block| block.kind == "text")
                .and_then(|block| block.text)
                .ok_or_else(|| CmError::LlmParseError {
                    details: "response carried no text content".to_string(),
                });
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body: WireError = response.json().unwrap_or_default();
        Err(classify_status(
            status.as_u16(),
            retry_after,
            &body.error.kind,
            &body.error.message,
        ))
    }
}

/// Map an error status to the closed failure taxonomy.
fn classify_status(
    status: u16,
    retry_after: Option<u64>,
    error_kind: &str,
    error_message: &str,
) -> CmError {
    match status {
        401 | 403 => CmError::LlmAuth {
            details: format!("{error_kind}: {error_message}"),
        },
        429 if error_kind.contains("quota") || error_message.to_lowercase().contains("quota") => {
            CmError::LlmQuotaExceeded
        }
        429 => CmError::LlmRateLimited {
            retry_after_secs: retry_after,
        },
        _ => CmError::LlmConnection {
            details: format!("HTTP {status}: {error_kind} {error_message}"),
        },
    }
}

// ──────────────────── reviewer (gateway implementation) ────────────────────

/// Budgeted, breaker-guarded reviewer over the wire client.
pub struct AiReviewer {
    client: LlmClient,
    cost: std::sync::Arc<CostController>,
    breaker: CircuitBreaker,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    endpoint: String,
    /// Set after a non-recoverable failure (auth, daily quota); downgrades
    /// the gateway to unavailable for the rest of the process.
    disabled: AtomicBool,
}

impl AiReviewer {
    pub fn new(
        ai: AiConfig,
        breaker: &BreakerConfig,
        cost: std::sync::Arc<CostController>,
    ) -> Result<Self> {
        let endpoint = ai.endpoint.clone();
        Ok(Self {
            client: LlmClient::new(ai)?,
            cost,
            breaker: CircuitBreaker::new(
                breaker.threshold,
                Duration::from_secs(breaker.timeout_secs),
            ),
            max_retries: breaker.max_retries,
            base_delay: Duration::from_millis(breaker.retry_base_delay_ms),
            max_delay: Duration::from_millis(breaker.retry_max_delay_ms),
            endpoint,
            disabled: AtomicBool::new(false),
        })
    }

    /// The controller, for ledger snapshots and per-scan resets.
    #[must_use]
    pub fn cost(&self) -> &CostController {
        &self.cost
    }

    /// Breaker state, for diagnostics.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn backoff_delay(&self, attempt: u32, advertised: Option<u64>) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(1_000).max(2);
        let jitter = Duration::from_millis(rand::rng().random_range(0..=base_ms / 2));
        let mut delay = (exp + jitter).min(self.max_delay);
        if let Some(secs) = advertised {
            delay = delay.max(Duration::from_secs(secs));
        }
        delay
    }
}

impl LlmGateway for AiReviewer {
    fn available(&self) -> bool {
        self.client.is_configured()
            && self.cost.mode() != CostControlMode::RulesOnly
            && !self.disabled.load(Ordering::Relaxed)
    }

    fn review(&self, request: &ReviewRequest) -> Result<String> {
        let prompt = build_prompt(request);
        let mut last_err: Option<CmError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let advertised = match &last_err {
                    Some(CmError::LlmRateLimited { retry_after_secs }) => *retry_after_secs,
                    _ => None,
                };
                std::thread::sleep(self.backoff_delay(attempt, advertised));
            }

            if !self.breaker.can_attempt() {
                return Err(CmError::CircuitOpen {
                    endpoint: self.endpoint.clone(),
                });
            }

            let reservation = match self.cost.gate(Utc::now()) {
                GateDecision::Proceed(reservation) => reservation,
                GateDecision::Unavailable(reason) => {
                    return Err(CmError::BudgetExhausted {
                        details: reason.to_string(),
                    });
                }
                GateDecision::Rejected(err) => return Err(err),
            };

            match self.client.execute(&prompt) {
                Ok(text) => {
                    self.cost.commit(reservation);
                    self.breaker.record_success();
                    return Ok(text);
                }
                Err(err) => {
                    // A failed transport attempt consumed no tokens.
                    self.cost.refund(reservation);
                    match &err {
                        CmError::LlmAuth { .. } => {
                            self.breaker.trip_open();
                            self.disabled.store(true, Ordering::Relaxed);
                            return Err(err);
                        }
                        CmError::LlmQuotaExceeded => {
                            self.disabled.store(true, Ordering::Relaxed);
                            return Err(err);
                        }
                        CmError::LlmRateLimited { .. }
                        | CmError::LlmConnection { .. }
                        | CmError::LlmTimeout { .. } => {
                            self.breaker.record_failure();
                            last_err = Some(err);
                        }
                        _ => return Err(err),
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| CmError::Runtime {
            details: "retries exhausted without a recorded error".to_string(),
        }))
    }
}

/// Structured prompt carrying the rule engine's verdict and the file facts.
fn build_prompt(request: &ReviewRequest) -> String {
    let matched = if request.matched_rules.is_empty() {
        "(none)".to_string()
    } else {
        request.matched_rules.join(", ")
    };
    format!(
        "## Rule engine verdict\n\
         - label: {label}\n\
         - confidence: {confidence:.0}%\n\
         - matched rules: {matched}\n\
         \n\
         ## Item\n\
         - path: {path}\n\
         - kind: {kind}\n\
         - size: {size} bytes\n\
         \n\
         Decide the final deletion risk. Respect the rule verdict when its \
         confidence is high; prefer the higher risk level when uncertain. \
         Reply with JSON only.",
        label = request.rule_label,
        confidence = request.rule_confidence * 100.0,
        matched = matched,
        path = request.path,
        kind = request.kind,
        size = request.size,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CostConfig;
    use std::sync::Arc;

    fn unreachable_ai_config() -> AiConfig {
        AiConfig {
            // Nothing listens on port 9 (discard); connection fails fast.
            endpoint: "http://127.0.0.1:9/v1/messages".to_string(),
            api_key: Some("test-key".to_string()),
            request_timeout_secs: 2,
            ..AiConfig::default()
        }
    }

    fn fast_breaker(max_retries: u32, threshold: u32) -> BreakerConfig {
        BreakerConfig {
            threshold,
            timeout_secs: 60,
            max_retries,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 4,
        }
    }

    fn reviewer(max_retries: u32, threshold: u32) -> AiReviewer {
        AiReviewer::new(
            unreachable_ai_config(),
            &fast_breaker(max_retries, threshold),
            Arc::new(CostController::new(CostConfig::default())),
        )
        .unwrap()
    }

    fn request() -> ReviewRequest {
        ReviewRequest {
            path: "/tmp/y/app_cache".to_string(),
            kind: "dir",
            size: 10 * 1024 * 1024,
            rule_label: "suspicious",
            rule_confidence: 0.7,
            matched_rules: vec!["temp-dirs".to_string()],
        }
    }

    #[test]
    fn prompt_carries_rule_verdict_and_facts() {
        let prompt = build_prompt(&request());
        assert!(prompt.contains("suspicious"));
        assert!(prompt.contains("/tmp/y/app_cache"));
        assert!(prompt.contains("temp-dirs"));
        assert!(prompt.contains("10485760 bytes"));
        assert!(prompt.contains("70%"));
    }

    #[test]
    fn status_classification_matches_taxonomy() {
        assert_eq!(classify_status(401, None, "authentication_error", "bad key").code(), "CM-4001");
        assert_eq!(classify_status(403, None, "", "").code(), "CM-4001");
        assert_eq!(classify_status(429, Some(7), "rate_limit_error", "slow down").code(), "CM-4002");
        assert_eq!(
            classify_status(429, None, "quota_exceeded", "daily quota spent").code(),
            "CM-4005"
        );
        assert_eq!(classify_status(500, None, "server_error", "oops").code(), "CM-4003");
    }

    #[test]
    fn rate_limit_carries_advertised_delay() {
        match classify_status(429, Some(12), "rate_limit_error", "") {
            CmError::LlmRateLimited { retry_after_secs } => {
                assert_eq!(retry_after_secs, Some(12));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn connection_failures_are_retried_and_each_attempt_is_metered() {
        let reviewer = reviewer(2, 10);
        let err = reviewer.review(&request()).unwrap_err();
        assert_eq!(err.code(), "CM-4003");
        // max_retries=2 → 3 attempts, each gated and refunded.
        let snap = reviewer.cost().snapshot();
        assert_eq!(snap.scan_calls, 3);
        assert!(snap.scan_cost.abs() < 1e-9, "refunds must zero the cost");
    }

    #[test]
    fn breaker_trips_after_threshold_and_rejects_immediately() {
        let reviewer = reviewer(5, 3);
        // 3 consecutive connection failures trip the breaker mid-retry-loop;
        // the next attempt is rejected with CircuitOpen.
        let err = reviewer.review(&request()).unwrap_err();
        assert_eq!(err.code(), "CM-4007");
        assert_eq!(
            reviewer.breaker().state(),
            crate::ai::breaker::CircuitState::Open
        );
        // Only the three real attempts were metered.
        assert_eq!(reviewer.cost().snapshot().scan_calls, 3);
    }

    #[test]
    fn missing_key_makes_gateway_unavailable() {
        let mut ai = unreachable_ai_config();
        ai.api_key = None;
        let reviewer = AiReviewer::new(
            ai,
            &fast_breaker(1, 5),
            Arc::new(CostController::new(CostConfig::default())),
        )
        .unwrap();
        assert!(!reviewer.available());
    }

    #[test]
    fn rules_only_mode_makes_gateway_unavailable() {
        let cost = CostConfig {
            mode: CostControlMode::RulesOnly,
            ..CostConfig::default()
        };
        let reviewer = AiReviewer::new(
            unreachable_ai_config(),
            &fast_breaker(1, 5),
            Arc::new(CostController::new(cost)),
        )
        .unwrap();
        assert!(!reviewer.available());
    }

    #[test]
    fn budget_exhaustion_stops_the_retry_loop() {
        let cost = CostConfig {
            mode: CostControlMode::Budget,
            max_calls_per_scan: 1,
            ..CostConfig::default()
        };
        let reviewer = AiReviewer::new(
            unreachable_ai_config(),
            &fast_breaker(5, 50),
            Arc::new(CostController::new(cost)),
        )
        .unwrap();
        let err = reviewer.review(&request()).unwrap_err();
        // First attempt consumes the single allowed call and fails on
        // transport; the second attempt is rejected by the gate.
        assert_eq!(err.code(), "CM-4008");
        assert_eq!(reviewer.cost().snapshot().scan_calls, 1);
    }
}
