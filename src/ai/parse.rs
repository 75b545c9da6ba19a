//! Lenient parsing of the LLM's `{risk_level, reason}` reply.
//!
//! Three attempts, in order: fenced code block, bare JSON object, keyword
//! heuristic over the plain text. Anything else is a parse error and the
//! caller falls back to the rule label.

use regex::Regex;
use serde::Deserialize;

use crate::core::errors::{CmError, Result};
use crate::core::types::RiskLabel;

/// Parsed reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub label: RiskLabel,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    risk_level: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Parse the raw reply text leniently.
pub fn parse_reply(raw: &str) -> Result<ParsedReply> {
    let trimmed = raw.trim();

    if let Some(parsed) = fenced_block(trimmed).and_then(|block| from_json(&block)) {
        return Ok(parsed);
    }
    if let Some(parsed) = bare_object(trimmed).and_then(|block| from_json(&block)) {
        return Ok(parsed);
    }
    if let Some(parsed) = keyword_heuristic(trimmed) {
        return Ok(parsed);
    }

    Err(CmError::LlmParseError {
        details: format!("unparseable reply: {:.120}", trimmed),
    })
}

fn from_json(block: &str) -> Option<ParsedReply> {
    let wire: WireReply = serde_json::from_str(block).ok()?;
    let label = RiskLabel::parse(&wire.risk_level)?;
    Some(ParsedReply {
        label,
        reason: wire
            .reason
            .unwrap_or_else(|| "no reason given".to_string()),
    })
}

fn fenced_block(text: &str) -> Option<String> {
    // ```json ... ``` or plain ``` ... ```
    let re = Regex::new(r"(?s)```(?:json)?\s*(.*?)```").ok()?;
    re.captures(text)
        .map(|caps| caps[1].trim().to_string())
}

fn bare_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].to_string())
}

fn keyword_heuristic(text: &str) -> Option<ParsedReply> {
    let lowered = text.to_lowercase();
    // Most conservative keyword wins.
    let label = if lowered.contains("dangerous") {
        RiskLabel::Dangerous
    } else if lowered.contains("suspicious") {
        RiskLabel::Suspicious
    } else if lowered.contains("safe") {
        RiskLabel::Safe
    } else {
        return None;
    };
    let reason = text.lines().next().unwrap_or(text).trim().to_string();
    Some(ParsedReply { label, reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json_block() {
        let raw = "Here is my verdict:\n```json\n{\"risk_level\": \"safe\", \"reason\": \"known cache\"}\n```";
        let parsed = parse_reply(raw).unwrap();
        assert_eq!(parsed.label, RiskLabel::Safe);
        assert_eq!(parsed.reason, "known cache");
    }

    #[test]
    fn parses_unlabelled_fence() {
        let raw = "```\n{\"risk_level\": \"dangerous\", \"reason\": \"user data\"}\n```";
        let parsed = parse_reply(raw).unwrap();
        assert_eq!(parsed.label, RiskLabel::Dangerous);
    }

    #[test]
    fn parses_bare_object() {
        let raw = "{\"risk_level\": \"suspicious\", \"reason\": \"unclear purpose\"}";
        let parsed = parse_reply(raw).unwrap();
        assert_eq!(parsed.label, RiskLabel::Suspicious);
        assert_eq!(parsed.reason, "unclear purpose");
    }

    #[test]
    fn parses_object_embedded_in_prose() {
        let raw = "After review I conclude {\"risk_level\":\"safe\",\"reason\":\"temp file\"} as stated.";
        let parsed = parse_reply(raw).unwrap();
        assert_eq!(parsed.label, RiskLabel::Safe);
        assert_eq!(parsed.reason, "temp file");
    }

    #[test]
    fn keyword_heuristic_is_conservative() {
        let raw = "This could be safe, but it looks suspicious to me.";
        let parsed = parse_reply(raw).unwrap();
        assert_eq!(parsed.label, RiskLabel::Suspicious);
    }

    #[test]
    fn missing_reason_defaults() {
        let raw = "{\"risk_level\": \"safe\"}";
        let parsed = parse_reply(raw).unwrap();
        assert_eq!(parsed.reason, "no reason given");
    }

    #[test]
    fn unknown_risk_level_falls_through_to_heuristic() {
        // The object parses but carries a bogus level; the word "safe"
        // appears nowhere, so this is a hard parse error.
        let raw = "{\"risk_level\": \"mostly-fine\", \"reason\": \"eh\"}";
        let err = parse_reply(raw).unwrap_err();
        assert_eq!(err.code(), "CM-4006");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_reply("I cannot help with that.").unwrap_err();
        assert_eq!(err.code(), "CM-4006");
    }

    #[test]
    fn empty_reply_is_a_parse_error() {
        assert!(parse_reply("").is_err());
        assert!(parse_reply("   \n  ").is_err());
    }
}
