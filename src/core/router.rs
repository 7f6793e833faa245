//! Routing of free-form model hints onto a concrete provider and model.

use std::fmt;

/// Agent backend the loop can spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Codex,
    Claude,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Codex => "codex",
            Provider::Claude => "claude",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a free-form model hint to `(provider, model)`.
///
/// Matching is case-insensitive on the trimmed hint. An empty model means the
/// provider's default. Unrecognized hints route to codex with its default.
pub fn route_model(hint: &str) -> (Provider, String) {
    let h = hint.trim().to_lowercase();
    if h.is_empty() {
        return (Provider::Codex, String::new());
    }
    if h.contains("opus") {
        return (Provider::Claude, "opus".to_string());
    }
    if h.contains("sonnet") {
        return (Provider::Claude, "sonnet".to_string());
    }
    if h.contains("haiku") {
        return (Provider::Claude, "haiku".to_string());
    }
    if let Some(rest) = h.strip_prefix("claude") {
        // `claude:model-name` names a model explicitly; bare `claude...` is
        // normalized as a whole.
        if let Some(model) = rest.strip_prefix(':') {
            return (Provider::Claude, normalize_claude_model(model));
        }
        return (Provider::Claude, normalize_claude_model(&h));
    }
    if h.starts_with("codex") || h.starts_with("gpt") || h.starts_with('o') {
        if h == "codex" {
            return (Provider::Codex, String::new());
        }
        return (Provider::Codex, h);
    }
    (Provider::Codex, String::new())
}

/// Pick the one-shot fallback target after a recognized provider failure.
///
/// Codex falls back to claude sonnet (cost guardrail: never opus); claude
/// variants fall back to codex's default model.
pub fn select_fallback(provider: Provider) -> Option<(Provider, String)> {
    match provider {
        Provider::Codex => Some((Provider::Claude, "sonnet".to_string())),
        Provider::Claude => Some((Provider::Codex, String::new())),
    }
}

fn normalize_claude_model(model: &str) -> String {
    let m = model.trim().to_lowercase();
    m.strip_prefix("claude-").unwrap_or(&m).to_string()
}
