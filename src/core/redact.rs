//! Secret redaction for audit payloads and executor error text.
//!
//! Audit records are durable and usually shipped elsewhere, so anything that
//! looks like a credential is masked before it reaches a sink.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Key fragments that cause a JSON field to be masked wholesale.
const SENSITIVE_KEYS: &[&str] = &[
    "token",
    "secret",
    "password",
    "api_key",
    "apikey",
    "authorization",
    "credential",
];

static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)bearer\s+[a-zA-Z0-9_\-\.=]{8,}", "Bearer [REDACTED]"),
        (
            r#"(?i)authorization['"]?\s*[:=]\s*['"]?[^'"\s,}]+"#,
            "Authorization: [REDACTED]",
        ),
        (
            r"-----BEGIN (?:RSA |EC |OPENSSH )?PRIVATE KEY-----[\s\S]*?-----END (?:RSA |EC |OPENSSH )?PRIVATE KEY-----",
            "[PEM_KEY_REDACTED]",
        ),
        (
            r#"(?i)(postgres|mysql|mongodb|redis|amqp)://[^\s'"]+:[^\s'"]+@[^\s'"]+"#,
            "[CONNECTION_STRING_REDACTED]",
        ),
        (
            r#"(?i)(api[_-]?key|secret[_-]?key|access[_-]?token)['"]?\s*[:=]\s*['"]?[a-zA-Z0-9_\-]{12,}['"]?"#,
            "[API_KEY_REDACTED]",
        ),
        (
            r#"(?i)(password|passwd|pwd)['"]?\s*[:=]\s*['"]?[^\s'"]{6,}['"]?"#,
            "[PASSWORD_REDACTED]",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Mask credential-shaped substrings in free text.
pub fn redact_text(input: &str) -> String {
    SECRET_PATTERNS
        .iter()
        .fold(input.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|k| lower.contains(k))
}

/// Walk a JSON value, masking sensitive keys and credential-shaped strings.
pub fn redact_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, val)| {
                    if is_sensitive_key(&key) {
                        (key, Value::String("[REDACTED]".to_string()))
                    } else {
                        (key, redact_value(val))
                    }
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_value).collect()),
        Value::String(s) => Value::String(redact_text(&s)),
        other => other,
    }
}
