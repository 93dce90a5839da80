use thiserror::Error;

/// Taxonomy of provider failures. Classification is by lowercase substring
/// matching against the wrapped SDK's error message, because the wrapped
/// provider SDKs do not expose stable error codes.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("rate limited: {0}")]
    RateLimit {
        message: String,
        retry_after: Option<f64>,
    },
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::RateLimit { .. } | ProviderError::Connection(_))
    }
}

/// Pure, total classification of an opaque error message (plus an optional
/// type hint) into the [`ProviderError`] taxonomy.
pub fn classify_error(message: &str, is_timeout_or_connection_type: bool) -> ProviderError {
    let lower = message.to_lowercase();

    if lower.contains("authentication") || lower.contains("api key") || lower.contains("unauthorized") || lower.contains("401") {
        return ProviderError::Authentication(truncate(message));
    }
    if lower.contains("permission") || lower.contains("403") {
        return ProviderError::Permission(truncate(message));
    }
    if lower.contains("rate") && lower.contains("limit") {
        return ProviderError::RateLimit {
            message: truncate(message),
            retry_after: extract_retry_after(&lower),
        };
    }
    if lower.contains("not found") || lower.contains("404") {
        return ProviderError::ModelNotFound(truncate(message));
    }
    if lower.contains("timeout") || lower.contains("timed out") || is_timeout_or_connection_type {
        return ProviderError::Connection(truncate(message));
    }
    ProviderError::Other(truncate(message))
}

/// Re-classifying an already-typed error is idempotent: it passes through
/// unchanged rather than re-parsing its own `Display` text.
pub fn classify_provider_error(err: &ProviderError) -> ProviderError {
    err.clone()
}

fn truncate(message: &str) -> String {
    message.chars().take(200).collect()
}

fn extract_retry_after(lower_message: &str) -> Option<f64> {
    let marker = "retry_after";
    let idx = lower_message.find(marker)?;
    let rest = &lower_message[idx + marker.len()..];
    let digits: String = rest
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_authentication() {
        let err = classify_error("Invalid API key supplied", false);
        assert!(matches!(err, ProviderError::Authentication(_)));
    }

    #[test]
    fn classify_rate_limit_requires_both_words() {
        let err = classify_error("You have hit the rate limit, try later", false);
        assert!(matches!(err, ProviderError::RateLimit { .. }));
        let not_rate_limit = classify_error("limited availability", false);
        assert!(!matches!(not_rate_limit, ProviderError::RateLimit { .. }));
    }

    #[test]
    fn classify_connection_by_type_hint() {
        let err = classify_error("socket reset", true);
        assert!(matches!(err, ProviderError::Connection(_)));
    }

    #[test]
    fn classify_other_truncates_to_200_chars() {
        let long = "x".repeat(500);
        let err = classify_error(&long, false);
        match err {
            ProviderError::Other(msg) => assert_eq!(msg.len(), 200),
            _ => panic!("expected Other"),
        }
    }

    #[test]
    fn classify_is_idempotent() {
        let err = classify_error("rate limit exceeded", false);
        let reclassified = classify_provider_error(&err);
        assert_eq!(format!("{err}"), format!("{reclassified}"));
    }
}
