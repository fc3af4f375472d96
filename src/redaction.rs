use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// Three base64url segments joined by dots, the JWT wire shape.
static JWT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\beyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]*").expect("valid regex")
});

static BEARER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9_\-\.=]+").expect("valid regex"));

static CREDENTIAL_FIELD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"(password|newPassword|token)"\s*:\s*"[^"]*""#).expect("valid regex")
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RedactionResult {
    pub content: String,
    pub redaction_count: usize,
}

#[derive(Debug, Default, Clone)]
pub struct Redactor {
    aggressive: bool,
}

impl Redactor {
    pub fn new(aggressive: bool) -> Self {
        Self { aggressive }
    }

    pub fn redact(&self, input: &str) -> RedactionResult {
        if input.is_empty() {
            return RedactionResult {
                content: String::new(),
                redaction_count: 0,
            };
        }

        let mut result = input.to_string();
        let mut redaction_count = 0usize;

        for (pattern, replacement) in [
            (&*JWT_PATTERN, "[REDACTED_TOKEN]"),
            (&*BEARER_PATTERN, "Bearer [REDACTED]"),
        ] {
            let matches = pattern.find_iter(&result).count();
            if matches == 0 {
                continue;
            }
            redaction_count += matches;
            result = pattern.replace_all(&result, replacement).to_string();
        }

        let matches = CREDENTIAL_FIELD_PATTERN.find_iter(&result).count();
        if matches > 0 {
            redaction_count += matches;
            result = CREDENTIAL_FIELD_PATTERN
                .replace_all(&result, |caps: &regex::Captures<'_>| {
                    let key = caps.get(1).map(|m| m.as_str()).unwrap_or("credential");
                    format!(r#""{}":"[REDACTED]""#, key)
                })
                .to_string();
        }

        if self.aggressive {
            let normalized = result
                .split_whitespace()
                .map(|token| {
                    if token.len() > 48
                        && token
                            .chars()
                            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
                    {
                        redaction_count += 1;
                        "[REDACTED_LONG_TOKEN]".to_string()
                    } else {
                        token.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");
            result = normalized;
        }

        RedactionResult {
            content: result,
            redaction_count,
        }
    }
}
