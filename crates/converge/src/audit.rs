//! Request/response audit trail and the diagnostic side log
//!
//! Both write JSON lines to a caller-supplied sink. Secret values are
//! replaced before anything reaches the sink.

use crate::error::{Error, Result};
use crate::transport::BatchResponse;
use crate::types::{Mode, OperationList, Scope};
use regex::Regex;
use serde_json::{Map, Value, json};
use std::io::Write;
use std::sync::LazyLock;

/// Replacement for redacted values
pub const REDACTED: &str = "********";

const SECRET_FIELDS: [&str; 8] = [
    "password", "passwd", "secret", "token", "api-key", "api_key", "apikey", "key",
];

static SECRET_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(password|passwd|secret|token|api[-_]?key|key)(\s*[=:]\s*)([^\s&,;]+)")
        .expect("Invalid secret assignment regex")
});

fn is_secret_field(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    SECRET_FIELDS
        .iter()
        .any(|field| name == *field || (field.len() > 3 && name.contains(field)))
}

/// Mask `key=value` style secrets inside free text.
pub fn redact_text(text: &str) -> String {
    SECRET_ASSIGNMENT
        .replace_all(text, |caps: &regex::Captures<'_>| {
            format!("{}{}{REDACTED}", &caps[1], &caps[2])
        })
        .into_owned()
}

/// Mask secret fields and secret assignments anywhere in a JSON value.
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (field, inner) in map.iter_mut() {
                if is_secret_field(field) && !inner.is_null() {
                    *inner = Value::String(REDACTED.to_string());
                } else {
                    redact_value(inner);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        Value::String(s) => *s = redact_text(s),
        _ => {}
    }
}

fn write_entry(sink: &mut dyn Write, event: &str, fields: Value) -> Result<()> {
    let mut entry = Map::new();
    entry.insert(
        "ts".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
    );
    entry.insert("event".to_string(), Value::String(event.to_string()));
    if let Value::Object(fields) = fields {
        entry.extend(fields);
    }
    let mut entry = Value::Object(entry);
    redact_value(&mut entry);
    serde_json::to_writer(&mut *sink, &entry)?;
    sink.write_all(b"\n")?;
    sink.flush().map_err(Error::from)
}

/// Full request/response trail of a run
pub struct AuditLog {
    sink: Box<dyn Write>,
}

impl AuditLog {
    pub fn new(sink: impl Write + 'static) -> Self {
        Self {
            sink: Box::new(sink),
        }
    }

    pub fn record_request(
        &mut self,
        scope: &Scope,
        label: &str,
        mode: Mode,
        batch: &OperationList,
    ) -> Result<()> {
        let operations = serde_json::to_value(batch)?;
        write_entry(
            self.sink.as_mut(),
            "request",
            json!({
                "scope": scope.to_string(),
                "label": label,
                "mode": mode.as_str(),
                "operations": operations,
            }),
        )
    }

    pub fn record_response(&mut self, scope: &Scope, label: &str, response: &BatchResponse) -> Result<()> {
        let response = serde_json::to_value(response)?;
        write_entry(
            self.sink.as_mut(),
            "response",
            json!({
                "scope": scope.to_string(),
                "label": label,
                "response": response,
            }),
        )
    }

    pub fn record_error(&mut self, scope: &Scope, label: &str, error: &Error) -> Result<()> {
        write_entry(
            self.sink.as_mut(),
            "error",
            json!({
                "scope": scope.to_string(),
                "label": label,
                "error": error.to_string(),
            }),
        )
    }
}

/// Side log receiving the full diagnostic of a failed batch
pub struct DiagnosticLog {
    sink: Box<dyn Write>,
}

impl DiagnosticLog {
    pub fn new(sink: impl Write + 'static) -> Self {
        Self {
            sink: Box::new(sink),
        }
    }

    pub fn record_failure(
        &mut self,
        scope: &Scope,
        label: &str,
        batch: &OperationList,
        error: &Error,
        response: Option<&BatchResponse>,
    ) -> Result<()> {
        let operations = serde_json::to_value(batch)?;
        let response = response.map(serde_json::to_value).transpose()?;
        write_entry(
            self.sink.as_mut(),
            "batch-failure",
            json!({
                "scope": scope.to_string(),
                "label": label,
                "error": error.to_string(),
                "category": format!("{:?}", error.category()),
                "advice": error.category().advice(),
                "operations": operations,
                "response": response,
            }),
        )
    }
}
