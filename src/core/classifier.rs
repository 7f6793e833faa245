//! Deterministic classification of agent failures into provider-level tags.

use std::fmt;

/// Recognized provider-level failure, as opposed to a task-level one.
///
/// Transient variants are retried in-loop with backoff and never burn an
/// attempt; the rest trigger at most one fallback invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFailure {
    RateLimit,
    Quota,
    Billing,
    ModelUnavailable,
    ProviderUnavailable,
    Auth,
}

impl ProviderFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFailure::RateLimit => "rate_limit",
            ProviderFailure::Quota => "quota",
            ProviderFailure::Billing => "billing",
            ProviderFailure::ModelUnavailable => "model_unavailable",
            ProviderFailure::ProviderUnavailable => "provider_unavailable",
            ProviderFailure::Auth => "auth",
        }
    }

    /// True for outages expected to clear on their own (retry, don't fall back).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderFailure::RateLimit | ProviderFailure::ProviderUnavailable
        )
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inspect an agent error and its captured output for a provider failure.
///
/// Case-insensitive substring match over `error + "\n" + output`; the first
/// matching keyword family wins. `None` means the failure belongs to the task
/// (counted as an attempt), not the provider.
pub fn classify_provider_failure(error: &str, output: &str) -> Option<ProviderFailure> {
    let msg = format!("{error}\n{output}").to_lowercase();
    let contains_any =
        |keys: &[&str]| -> bool { keys.iter().any(|k| msg.contains(k)) };

    if contains_any(&["rate limit", "rate-limited", "too many requests", "429"]) {
        return Some(ProviderFailure::RateLimit);
    }
    if contains_any(&[
        "usage limit",
        "quota",
        "daily limit",
        "weekly limit",
        "monthly limit",
    ]) {
        return Some(ProviderFailure::Quota);
    }
    if contains_any(&["billing", "payment", "insufficient credits"]) {
        return Some(ProviderFailure::Billing);
    }
    if contains_any(&["model", "not exist", "not have access", "unknown model"]) {
        return Some(ProviderFailure::ModelUnavailable);
    }
    if contains_any(&[
        "temporarily unavailable",
        "service unavailable",
        "overloaded",
    ]) {
        return Some(ProviderFailure::ProviderUnavailable);
    }
    if contains_any(&["auth", "unauthorized", "forbidden", "login required"]) {
        return Some(ProviderFailure::Auth);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_keyword_family_maps_to_its_tag() {
        let cases = [
            ("429 Too Many Requests", ProviderFailure::RateLimit),
            ("usage limit exceeded", ProviderFailure::Quota),
            ("billing issue", ProviderFailure::Billing),
            ("unknown model", ProviderFailure::ModelUnavailable),
            ("service unavailable", ProviderFailure::ProviderUnavailable),
            ("unauthorized", ProviderFailure::Auth),
        ];
        for (msg, want) in cases {
            assert_eq!(
                classify_provider_failure("exit status 1", msg),
                Some(want),
                "message: {msg}"
            );
        }
    }

    #[test]
    fn matching_is_case_insensitive_across_error_and_output() {
        assert_eq!(
            classify_provider_failure("Rate Limit hit", ""),
            Some(ProviderFailure::RateLimit)
        );
        assert_eq!(
            classify_provider_failure("", "LOGIN REQUIRED"),
            Some(ProviderFailure::Auth)
        );
    }

    /// First family wins: "model" appears in the quota message too, but the
    /// quota family is checked first.
    #[test]
    fn earlier_family_wins_on_overlap() {
        assert_eq!(
            classify_provider_failure("", "model usage limit reached"),
            Some(ProviderFailure::Quota)
        );
    }

    #[test]
    fn unrecognized_failures_are_task_failures() {
        assert_eq!(classify_provider_failure("exit status 1", "syntax error"), None);
    }

    #[test]
    fn only_rate_limit_and_provider_unavailable_are_transient() {
        assert!(ProviderFailure::RateLimit.is_transient());
        assert!(ProviderFailure::ProviderUnavailable.is_transient());
        assert!(!ProviderFailure::Quota.is_transient());
        assert!(!ProviderFailure::Billing.is_transient());
        assert!(!ProviderFailure::ModelUnavailable.is_transient());
        assert!(!ProviderFailure::Auth.is_transient());
    }
}
