//! Heuristic classification of raw provider error text into a small fixed
//! set of user-readable categories. Matchers are evaluated top-down; the
//! first hit wins, with `Unknown` as the catch-all.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    RateLimited,
    AuthFailure,
    ModelUnavailable,
    ContentPolicy,
    ContextTooLong,
    NetworkTimeout,
    ServerError,
    Unknown,
}

const MATCHERS: &[(&[&str], ErrorCategory)] = &[
    (
        &["rate limit", "too many requests", "429"],
        ErrorCategory::RateLimited,
    ),
    (
        &["unauthorized", "invalid api key", "authentication", "401"],
        ErrorCategory::AuthFailure,
    ),
    (
        &["model not found", "model_not_found", "does not exist", "404"],
        ErrorCategory::ModelUnavailable,
    ),
    (
        &["content policy", "content_filter", "safety", "blocked"],
        ErrorCategory::ContentPolicy,
    ),
    (
        &["context length", "context_length_exceeded", "maximum context", "too long"],
        ErrorCategory::ContextTooLong,
    ),
    (
        &["timed out", "timeout", "connection reset", "connection refused", "broken pipe"],
        ErrorCategory::NetworkTimeout,
    ),
    (
        &["internal server error", "500", "502", "503", "overloaded"],
        ErrorCategory::ServerError,
    ),
];

/// Raw text shown for unknown errors is capped at this many characters.
const MAX_RAW_CHARS: usize = 200;

pub fn classify(raw: &str) -> ErrorCategory {
    let lowered = raw.to_lowercase();
    for (patterns, category) in MATCHERS {
        if patterns.iter().any(|p| lowered.contains(p)) {
            return *category;
        }
    }
    ErrorCategory::Unknown
}

pub fn user_facing_message(raw: &str) -> String {
    match classify(raw) {
        ErrorCategory::RateLimited => {
            "The model provider is rate limiting requests. Please try again in a moment.".into()
        }
        ErrorCategory::AuthFailure => {
            "The server could not authenticate with the model provider.".into()
        }
        ErrorCategory::ModelUnavailable => "The selected model is currently unavailable.".into(),
        ErrorCategory::ContentPolicy => {
            "The response was blocked by the provider's content policy.".into()
        }
        ErrorCategory::ContextTooLong => {
            "The conversation is too long for the selected model. Please start a new chat.".into()
        }
        ErrorCategory::NetworkTimeout => {
            "The connection to the model provider timed out. Please try again.".into()
        }
        ErrorCategory::ServerError => {
            "The model provider returned a server error. Please try again.".into()
        }
        ErrorCategory::Unknown => {
            let truncated: String = raw.chars().take(MAX_RAW_CHARS).collect();
            format!("Unexpected provider error: {}", truncated)
        }
    }
}
