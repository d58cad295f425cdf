//! Pattern-based deny-lists, a process-wide rate/cost bucket, output
//! redaction, and an append-only audit log, all evaluated before a tool
//! call is allowed to run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocked,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailViolation {
    pub severity: Severity,
    pub rule: String,
    pub matched_text: String,
}

struct CompiledRule {
    name: &'static str,
    pattern: Regex,
    severity: Severity,
}

/// The compiled regex deny-lists, built once and shared across runs.
pub struct GuardrailSet {
    rules: Vec<CompiledRule>,
}

impl GuardrailSet {
    pub fn new() -> Self {
        let blocked = [
            ("sql_drop", r"(?i)\bDROP\s+(TABLE|DATABASE|SCHEMA)\b"),
            ("sql_truncate", r"(?i)\bTRUNCATE\b"),
            ("sql_delete_without_where", r"(?i)\bDELETE\s+FROM\s+\w+\s*(;|$)"),
            ("sql_update_tautology", r"(?i)\bUPDATE\s+.+\bWHERE\s+1\s*=\s*1\b"),
            ("sql_grant_all", r"(?i)\bGRANT\s+ALL\b"),
            ("sql_revoke", r"(?i)\bREVOKE\b"),
            ("shell_rm_rf_root", r"(?i)\brm\s+-rf\s+(/|~|\*)(\s|$)"),
            ("shell_chmod_777", r"(?i)\bchmod\s+777\b"),
            ("shell_fork_bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;"),
            ("shell_mkfs", r"(?i)\bmkfs(\.\w+)?\b"),
            ("shell_dd_device", r"(?i)\bdd\s+.*\bof=/dev/"),
            ("shell_redirect_device", r">\s*/dev/sd\w*"),
            ("shell_pipe_to_shell", r"(?i)\b(curl|wget)\b.*\|\s*(sh|bash)\b"),
            ("shell_eval_subshell", r"\beval\s*\$\("),
        ];
        let warned = [
            ("secret_bearer_key", r"(?i)bearer\s+[a-z0-9._\-]{20,}"),
            ("secret_long_hex", r"\b[a-f0-9]{32,}\b"),
            ("secret_private_key_header", r"-----BEGIN [A-Z ]*PRIVATE KEY-----"),
            ("secret_provider_token_prefix", r"\b(sk-|ghp_|xox[baprs]-)[A-Za-z0-9\-_]{10,}"),
        ];

        let mut rules = Vec::new();
        for (name, pattern) in blocked {
            rules.push(CompiledRule { name, pattern: Regex::new(pattern).expect("static pattern"), severity: Severity::Blocked });
        }
        for (name, pattern) in warned {
            rules.push(CompiledRule { name, pattern: Regex::new(pattern).expect("static pattern"), severity: Severity::Warning });
        }
        Self { rules }
    }

    /// Scans every string value in `args` against the deny-lists. Returns
    /// all matches; callers refuse execution if any is `Blocked`.
    pub fn scan_args(&self, args: &std::collections::HashMap<String, Value>) -> Vec<GuardrailViolation> {
        let mut violations = Vec::new();
        for value in args.values() {
            self.scan_value(value, &mut violations);
        }
        violations
    }

    fn scan_value(&self, value: &Value, out: &mut Vec<GuardrailViolation>) {
        match value {
            Value::String(text) => {
                for rule in &self.rules {
                    if let Some(found) = rule.pattern.find(text) {
                        out.push(GuardrailViolation {
                            severity: rule.severity,
                            rule: rule.name.to_string(),
                            matched_text: found.as_str().to_string(),
                        });
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|v| self.scan_value(v, out)),
            Value::Object(map) => map.values().for_each(|v| self.scan_value(v, out)),
            _ => {}
        }
    }
}

impl Default for GuardrailSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Redacts secret-shaped substrings from text before it re-enters the
/// transcript. Best-effort: relies on the same shape patterns as the
/// warning-tier deny-list, so a genuinely novel secret shape is not
/// caught.
pub fn redact_secrets(text: &str, rules: &GuardrailSet) -> String {
    let mut redacted = text.to_string();
    for rule in &rules.rules {
        if rule.name.starts_with("secret_") {
            redacted = rule.pattern.replace_all(&redacted, "***REDACTED***").to_string();
        }
    }
    redacted
}

/// Redacts values whose key looks like it names a credential
/// (password/secret/token/key/credential substrings, case-insensitive).
pub fn redact_by_key(args: &std::collections::HashMap<String, Value>) -> std::collections::HashMap<String, Value> {
    const SENSITIVE_SUBSTRINGS: [&str; 5] = ["password", "secret", "token", "key", "credential"];
    args.iter()
        .map(|(k, v)| {
            let lower = k.to_lowercase();
            if SENSITIVE_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
                (k.clone(), Value::String("***REDACTED***".to_string()))
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

/// Process-wide, atomically-mutated per-hour request count and
/// accumulated estimated cost. A sliding window reset happens at the hour
/// boundary rather than via a background timer.
pub struct RateLimitBucket {
    window_start_secs: AtomicU64,
    request_count: AtomicU64,
    cost_cents: AtomicU64,
    max_requests_per_hour: u64,
    max_cost_cents_per_hour: u64,
}

const SECONDS_PER_HOUR: u64 = 3600;

impl RateLimitBucket {
    pub fn new(max_requests_per_hour: u64, max_cost_cents_per_hour: u64) -> Self {
        Self {
            window_start_secs: AtomicU64::new(now_secs()),
            request_count: AtomicU64::new(0),
            cost_cents: AtomicU64::new(0),
            max_requests_per_hour,
            max_cost_cents_per_hour,
        }
    }

    fn maybe_reset_window(&self) {
        let now = now_secs();
        let start = self.window_start_secs.load(Ordering::SeqCst);
        if now.saturating_sub(start) >= SECONDS_PER_HOUR
            && self
                .window_start_secs
                .compare_exchange(start, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.request_count.store(0, Ordering::SeqCst);
            self.cost_cents.store(0, Ordering::SeqCst);
        }
    }

    /// Records one request with its estimated cost and reports whether
    /// either cap is now exceeded.
    pub fn record(&self, estimated_cost_cents: u64) -> bool {
        self.maybe_reset_window();
        let requests = self.request_count.fetch_add(1, Ordering::SeqCst) + 1;
        let cost = self.cost_cents.fetch_add(estimated_cost_cents, Ordering::SeqCst) + estimated_cost_cents;
        requests > self.max_requests_per_hour || cost > self.max_cost_cents_per_hour
    }

    pub fn is_exceeded(&self) -> bool {
        self.maybe_reset_window();
        self.request_count.load(Ordering::SeqCst) > self.max_requests_per_hour
            || self.cost_cents.load(Ordering::SeqCst) > self.max_cost_cents_per_hour
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub run_id: String,
    pub workspace_id: String,
    pub event: String,
    pub detail: Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// In-process append-only sink. Each entry is also emitted as a
/// `tracing` event so it flows into whatever log pipeline the deployment
/// already has, independent of whether the in-memory copy is later read.
#[derive(Clone, Default)]
pub struct AuditLog {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, run_id: &str, workspace_id: &str, event: &str, detail: Value) {
        let entry = AuditEntry {
            run_id: run_id.to_string(),
            workspace_id: workspace_id.to_string(),
            event: event.to_string(),
            detail,
            timestamp: chrono::Utc::now(),
        };
        tracing::info!(run_id, workspace_id, event, detail = %entry.detail, "audit");
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn sql_drop_table_is_blocked() {
        let rules = GuardrailSet::new();
        let mut args = HashMap::new();
        args.insert("query".to_string(), Value::String("DROP TABLE incidents;".to_string()));
        let violations = rules.scan_args(&args);
        assert!(violations.iter().any(|v| v.severity == Severity::Blocked && v.rule == "sql_drop"));
    }

    #[test]
    fn rm_rf_root_is_blocked() {
        let rules = GuardrailSet::new();
        let mut args = HashMap::new();
        args.insert("command".to_string(), Value::String("rm -rf /".to_string()));
        let violations = rules.scan_args(&args);
        assert!(violations.iter().any(|v| v.severity == Severity::Blocked));
    }

    #[test]
    fn bearer_key_is_warning_not_blocked() {
        let rules = GuardrailSet::new();
        let mut args = HashMap::new();
        args.insert("header".to_string(), Value::String("Bearer sk-abcdefghijklmnopqrstuvwxyz".to_string()));
        let violations = rules.scan_args(&args);
        assert!(violations.iter().all(|v| v.severity == Severity::Warning));
        assert!(!violations.is_empty());
    }

    #[test]
    fn benign_args_produce_no_violations() {
        let rules = GuardrailSet::new();
        let mut args = HashMap::new();
        args.insert("service".to_string(), Value::String("checkout-api".to_string()));
        assert!(rules.scan_args(&args).is_empty());
    }

    #[test]
    fn redact_by_key_masks_sensitive_field_names() {
        let mut args = HashMap::new();
        args.insert("api_key".to_string(), Value::String("super-secret-value".to_string()));
        args.insert("service".to_string(), Value::String("checkout".to_string()));
        let redacted = redact_by_key(&args);
        assert_eq!(redacted["api_key"], Value::String("***REDACTED***".to_string()));
        assert_eq!(redacted["service"], Value::String("checkout".to_string()));
    }

    #[test]
    fn rate_limit_bucket_trips_on_request_cap() {
        let bucket = RateLimitBucket::new(2, u64::MAX);
        assert!(!bucket.record(0));
        assert!(bucket.record(0));
        assert!(bucket.is_exceeded());
    }

    #[test]
    fn rate_limit_bucket_trips_on_cost_cap() {
        let bucket = RateLimitBucket::new(u64::MAX, 100);
        assert!(!bucket.record(50));
        assert!(bucket.record(60));
    }

    #[test]
    fn audit_log_records_entries_in_order() {
        let log = AuditLog::new();
        log.record("run-1", "ws-1", "agent_started", serde_json::json!({}));
        log.record("run-1", "ws-1", "tool_called", serde_json::json!({"name": "get_logs"}));
        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, "agent_started");
        assert_eq!(entries[1].event, "tool_called");
    }
}
