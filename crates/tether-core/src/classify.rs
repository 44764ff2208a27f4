//! Maps raw agent-process errors onto [`FailureClassification`].
//!
//! Matching is case-insensitive substring search over an ordered rule list;
//! the first rule that matches wins and anything unmatched is `unknown`.

use once_cell::sync::Lazy;
use regex::Regex;
use tether_types::FailureClassification;

use crate::error::TetherError;

const AUTH_PATTERNS: &[&str] = &[
    "auth",
    "unauthorized",
    "401",
    "403",
    "not authenticated",
    "invalid token",
    "expired token",
];
const SESSION_EXPIRED_PATTERNS: &[&str] = &["session not found", "invalid session"];
const NOT_READY_PATTERNS: &[&str] = &["client not connected", "cli not ready"];
const NETWORK_PATTERNS: &[&str] = &["econnrefused", "etimedout", "network", "timeout"];

static CLI_VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(cli\s+version|version\s+v?\d+(\.\d+)*)\b.*not\s+compatible")
        .expect("valid cli version regex")
});

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

pub fn classify(message: &str) -> FailureClassification {
    let lower = message.to_lowercase();
    if contains_any(&lower, AUTH_PATTERNS) {
        FailureClassification::Authentication
    } else if CLI_VERSION_RE.is_match(message) {
        FailureClassification::CliVersion
    } else if contains_any(&lower, SESSION_EXPIRED_PATTERNS) {
        FailureClassification::SessionExpired
    } else if contains_any(&lower, NOT_READY_PATTERNS) {
        FailureClassification::SessionNotReady
    } else if contains_any(&lower, NETWORK_PATTERNS) {
        FailureClassification::NetworkTimeout
    } else {
        FailureClassification::Unknown
    }
}

/// Classifies an error including its context chain. Errors raised by this crate
/// carry their own classification.
pub fn classify_error(err: &anyhow::Error) -> FailureClassification {
    if let Some(own) = err.downcast_ref::<TetherError>() {
        if matches!(own, TetherError::Timeout { .. } | TetherError::Resume(_)) {
            return own.classification();
        }
    }
    classify(&format!("{err:#}"))
}
