//! Stable exit codes for obliviate CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Bad command line (unknown command, malformed flags).
pub const USAGE: i32 = 2;
/// Input failed validation (missing title/spec/verify/model_hint, bad values).
pub const VALIDATION: i32 = 3;
/// Instance or task does not exist / is not initialized.
pub const NOT_FOUND: i32 = 4;
/// Any other runtime failure (lock timeout, I/O, subprocess).
pub const RUNTIME: i32 = 10;

/// Map an error message to an exit code by substring.
///
/// Validation and not-found errors are recognized by the phrases the command
/// implementations use; everything else is a runtime failure.
pub fn classify_exit_code(message: &str) -> i32 {
    let msg = message.trim().to_lowercase();
    if msg.starts_with("usage:") {
        return USAGE;
    }
    if msg.contains("required") || msg.contains("must be") || msg.contains("cannot be empty") {
        return VALIDATION;
    }
    if msg.contains("not initialized") || msg.contains("not found") {
        return NOT_FOUND;
    }
    RUNTIME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_prefix_wins() {
        assert_eq!(classify_exit_code("usage: obliviate go <instance>"), USAGE);
    }

    #[test]
    fn validation_phrases_map_to_validation() {
        assert_eq!(classify_exit_code("model_hint is required"), VALIDATION);
        assert_eq!(classify_exit_code("limit must be >= 0"), VALIDATION);
        assert_eq!(classify_exit_code("verify cannot be empty"), VALIDATION);
    }

    #[test]
    fn not_found_phrases_map_to_not_found() {
        assert_eq!(
            classify_exit_code("instance \"alpha\" is not initialized in /tmp"),
            NOT_FOUND
        );
        assert_eq!(
            classify_exit_code("task \"OB-404\" not found in instance \"alpha\""),
            NOT_FOUND
        );
    }

    #[test]
    fn everything_else_is_runtime() {
        assert_eq!(classify_exit_code("timed out waiting for lock"), RUNTIME);
    }
}
