//! Secret masking for tool results and alert payloads.
//!
//! Two distinct failure postures:
//! - tool results are **fail-closed**: any masking error yields a fully
//!   redacted value rather than a possibly-leaky one;
//! - alert payloads are **fail-open**: the original text passes through
//!   when masking fails, because dropping an alert is worse than the
//!   residual risk of operator-supplied text.

use regex::Regex;
use serde_json::{json, Value};

use tarsy_domain::{Error, Result};

const REDACTED: &str = "***REDACTED***";

/// Patterns covering the common credential shapes tool output drags in.
const SECRET_PATTERNS: &[&str] = &[
    // key=value / key: value assignments for credential-ish keys
    r#"(?i)\b(password|passwd|secret|token|api[_-]?key|access[_-]?key)\b\s*[:=]\s*\S+"#,
    // Bearer / Basic authorization headers
    r#"(?i)\b(bearer|basic)\s+[A-Za-z0-9+/._=-]{8,}"#,
    // PEM blocks
    r#"-----BEGIN [A-Z ]+PRIVATE KEY-----[\s\S]*?-----END [A-Z ]+PRIVATE KEY-----"#,
    // AWS access key ids
    r#"\bAKIA[0-9A-Z]{16}\b"#,
    // URL userinfo credentials
    r#"://[^/\s:@]+:[^/\s@]+@"#,
];

pub struct Masker {
    patterns: Vec<Regex>,
}

impl Masker {
    /// Compile the pattern set once at startup.
    pub fn new() -> Result<Self> {
        let patterns = SECRET_PATTERNS
            .iter()
            .map(|p| Regex::new(p).map_err(|e| Error::Config(format!("masking pattern: {e}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    fn mask_text(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for pattern in &self.patterns {
            masked = pattern.replace_all(&masked, REDACTED).into_owned();
        }
        masked
    }

    /// Mask a tool result, fail-closed: if the value cannot be walked,
    /// the caller gets a fully redacted placeholder. Returns the masked
    /// value and whether anything was redacted.
    pub fn mask_tool_result(&self, value: &Value) -> (Value, bool) {
        match self.try_mask_value(value, 0) {
            Ok(masked) => {
                let changed = &masked != value;
                (masked, changed)
            }
            Err(_) => (json!({ "redacted": true, "reason": "masking failed" }), true),
        }
    }

    fn try_mask_value(&self, value: &Value, depth: usize) -> Result<Value> {
        // A tool result nested this deep is not something we can vouch
        // for; redact wholesale.
        if depth > 64 {
            return Err(Error::Other("masking depth exceeded".into()));
        }
        Ok(match value {
            Value::String(s) => Value::String(self.mask_text(s)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.try_mask_value(v, depth + 1))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Object(map) => {
                let mut masked = serde_json::Map::with_capacity(map.len());
                for (key, v) in map {
                    if is_sensitive_key(key) {
                        masked.insert(key.clone(), Value::String(REDACTED.into()));
                    } else {
                        masked.insert(key.clone(), self.try_mask_value(v, depth + 1)?);
                    }
                }
                Value::Object(masked)
            }
            other => other.clone(),
        })
    }

    /// Mask an alert payload, fail-open: the original text survives any
    /// masking problem.
    pub fn mask_alert_payload(&self, payload: &str) -> String {
        self.mask_text(payload)
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    ["password", "passwd", "secret", "token", "api_key", "apikey", "authorization"]
        .iter()
        .any(|k| key.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_secrets_are_masked() {
        let masker = Masker::new().unwrap();
        let masked = masker.mask_alert_payload("retrying with password=hunter2 against db");
        assert!(!masked.contains("hunter2"));
        assert!(masked.contains(REDACTED));
    }

    #[test]
    fn sensitive_object_keys_redacted_wholesale() {
        let masker = Masker::new().unwrap();
        let (masked, changed) = masker.mask_tool_result(&json!({
            "pod": "foo",
            "api_key": "sk-live-123456",
            "nested": { "authorization": "Bearer abcdefgh12345678" }
        }));
        assert!(changed);
        assert_eq!(masked["api_key"], REDACTED);
        assert_eq!(masked["nested"]["authorization"], REDACTED);
        assert_eq!(masked["pod"], "foo");
    }

    #[test]
    fn clean_results_pass_unchanged() {
        let masker = Masker::new().unwrap();
        let value = json!({ "pod": "foo", "restarts": 3 });
        let (masked, changed) = masker.mask_tool_result(&value);
        assert_eq!(masked, value);
        assert!(!changed);
    }

    #[test]
    fn pathological_nesting_fails_closed() {
        let masker = Masker::new().unwrap();
        let mut value = json!("leaf");
        for _ in 0..80 {
            value = json!([value]);
        }
        let (masked, changed) = masker.mask_tool_result(&value);
        assert!(changed);
        assert_eq!(masked["redacted"], true);
    }

    #[test]
    fn url_credentials_masked() {
        let masker = Masker::new().unwrap();
        let masked = masker.mask_alert_payload("failed to reach postgres://admin:pw@db:5432/x");
        assert!(!masked.contains("admin:pw"));
    }
}
