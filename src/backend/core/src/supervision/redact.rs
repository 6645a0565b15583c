//! Sensitive data redaction for incident payloads.
//!
//! Incident details end up in the database, in the file fallback, and in
//! operator-facing API responses, so every detail object passes through
//! here before leaving the supervision layer. Matching field names are
//! replaced wholesale; free-text values are scrubbed with value patterns
//! for credentials that commonly leak through error messages.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Global redactor instance built from the default patterns.
static REDACTOR: OnceLock<PayloadRedactor> = OnceLock::new();

/// Replacement text for redacted content.
const REPLACEMENT: &str = "[REDACTED]";

/// A pattern identifying sensitive content.
#[derive(Debug, Clone)]
pub struct RedactionPattern {
    /// Name of this pattern (for debugging)
    pub name: &'static str,
    /// Field names to match (case-insensitive substring match)
    pub field_names: &'static [&'static str],
    /// Regex matched against values
    pub value_pattern: Option<&'static str>,
}

/// Built-in patterns. Covers the credentials this platform actually
/// handles: provider API keys, bearer/JWT tokens, and database
/// connection strings with inline passwords.
const DEFAULT_PATTERNS: &[RedactionPattern] = &[
    RedactionPattern {
        name: "api_keys",
        field_names: &["api_key", "apikey", "api-key", "x-api-key"],
        value_pattern: Some(r"sk[-_](?:live|test)?[-_]?[a-zA-Z0-9]{6,}"),
    },
    RedactionPattern {
        name: "passwords",
        field_names: &["password", "passwd", "secret", "credential"],
        value_pattern: None,
    },
    RedactionPattern {
        name: "tokens",
        field_names: &["token", "access_token", "refresh_token", "bearer", "authorization"],
        value_pattern: Some(r"(?i)bearer\s+[a-zA-Z0-9._~+/=-]{8,}"),
    },
    RedactionPattern {
        name: "jwt",
        field_names: &["jwt"],
        value_pattern: Some(r"eyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+"),
    },
    RedactionPattern {
        name: "connection_strings",
        field_names: &["connection_string", "database_url", "dsn"],
        value_pattern: Some(r"(?i)(postgres(?:ql)?|mysql|redis|amqp)://[^:/\s]+:[^@\s]+@"),
    },
];

#[derive(Debug)]
struct CompiledPattern {
    field_names: &'static [&'static str],
    value_regex: Option<Regex>,
}

/// Redactor for sensitive content in incident detail objects.
#[derive(Debug)]
pub struct PayloadRedactor {
    patterns: Vec<CompiledPattern>,
}

impl PayloadRedactor {
    fn from_patterns(patterns: &[RedactionPattern]) -> Self {
        let patterns = patterns
            .iter()
            .map(|p| CompiledPattern {
                field_names: p.field_names,
                value_regex: p.value_pattern.and_then(|pat| Regex::new(pat).ok()),
            })
            .collect();
        Self { patterns }
    }

    /// Get the global redactor instance.
    pub fn global() -> &'static PayloadRedactor {
        REDACTOR.get_or_init(|| PayloadRedactor::from_patterns(DEFAULT_PATTERNS))
    }

    /// Whether a field name is sensitive by name alone.
    pub fn should_redact_field(&self, field_name: &str) -> bool {
        let lower = field_name.to_lowercase();
        self.patterns
            .iter()
            .any(|p| p.field_names.iter().any(|f| lower.contains(f)))
    }

    /// Scrub credential-shaped substrings out of a free-text value.
    pub fn redact_text(&self, value: &str) -> String {
        let mut result = value.to_string();
        for pattern in &self.patterns {
            if let Some(regex) = &pattern.value_regex {
                if regex.is_match(&result) {
                    result = regex.replace_all(&result, REPLACEMENT).to_string();
                }
            }
        }
        result
    }

    /// Redact one field, checking the name first and the value second.
    pub fn redact(&self, field_name: &str, value: &str) -> String {
        if self.should_redact_field(field_name) {
            return REPLACEMENT.to_string();
        }
        self.redact_text(value)
    }

    /// Sanitize a JSON detail object in place, recursing through nested
    /// objects and arrays.
    pub fn redact_map(&self, details: &mut Map<String, Value>) {
        for (key, value) in details.iter_mut() {
            if self.should_redact_field(key) {
                *value = Value::String(REPLACEMENT.to_string());
            } else {
                self.redact_value(value);
            }
        }
    }

    fn redact_value(&self, value: &mut Value) {
        match value {
            Value::String(s) => {
                let scrubbed = self.redact_text(s);
                if scrubbed != *s {
                    *s = scrubbed;
                }
            }
            Value::Object(map) => self.redact_map(map),
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.redact_value(item);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_name_redaction() {
        let redactor = PayloadRedactor::global();
        assert!(redactor.should_redact_field("api_key"));
        assert!(redactor.should_redact_field("X-Api-Key"));
        assert!(redactor.should_redact_field("db_password"));
        assert!(!redactor.should_redact_field("latency_ms"));
        assert!(!redactor.should_redact_field("http_status"));
    }

    #[test]
    fn test_api_key_in_error_text() {
        let redactor = PayloadRedactor::global();
        let scrubbed =
            redactor.redact_text("provider rejected key sk-live-a1b2c3d4e5f6g7h8i9j0");
        assert!(!scrubbed.contains("a1b2c3d4"));
        assert!(scrubbed.contains("[REDACTED]"));
    }

    #[test]
    fn test_bearer_token_in_error_text() {
        let redactor = PayloadRedactor::global();
        let scrubbed = redactor.redact_text("got 401 sending Bearer abc123def456xyz");
        assert!(!scrubbed.contains("abc123def456xyz"));
    }

    #[test]
    fn test_connection_string_password() {
        let redactor = PayloadRedactor::global();
        let scrubbed =
            redactor.redact_text("connect failed: postgres://offertory:hunter2@db:5432/offertory");
        assert!(!scrubbed.contains("hunter2"));
    }

    #[test]
    fn test_plain_text_untouched() {
        let redactor = PayloadRedactor::global();
        let text = "connection refused by 10.0.0.5:5432";
        assert_eq!(redactor.redact_text(text), text);
    }

    #[test]
    fn test_nested_detail_object() {
        let redactor = PayloadRedactor::global();
        let mut details = json!({
            "http_status": 401,
            "api_key": "sk-live-deadbeefdeadbeefdeadbeef",
            "request": {
                "authorization": "Bearer something",
                "path": "/v1/balance"
            },
            "attempts": ["Bearer tok1tok1tok1tok1", "retry"]
        });

        let map = details.as_object_mut().unwrap();
        redactor.redact_map(map);

        assert_eq!(map["api_key"], "[REDACTED]");
        assert_eq!(map["request"]["authorization"], "[REDACTED]");
        assert_eq!(map["request"]["path"], "/v1/balance");
        assert_eq!(map["http_status"], 401);
        assert!(!map["attempts"][0].as_str().unwrap().contains("tok1"));
    }

    #[test]
    fn test_redact_checks_name_before_value() {
        let redactor = PayloadRedactor::global();
        assert_eq!(redactor.redact("password", "plaintext"), "[REDACTED]");
        assert_eq!(redactor.redact("detail", "plaintext"), "plaintext");
    }
}
