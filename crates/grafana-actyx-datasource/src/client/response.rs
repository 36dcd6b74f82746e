//! Rows returned by the Actyx query endpoint.
use serde::Deserialize;
use serde_json::Value;

use super::ClientError;

/// A single row of an AQL query response.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResponseRow {
    /// An event (or a value computed from events by the query).
    Event(EventRow),
    /// A non-fatal message produced while running the query.
    Diagnostic(Diagnostic),
    /// The offsets up to which the query has read.
    Offsets,
    /// Any row type this plugin doesn't know about.
    #[serde(other)]
    Other,
}

/// An event row.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRow {
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,
    /// The event payload.
    #[serde(default)]
    pub payload: Value,
    /// Lamport timestamp of the event.
    #[serde(default)]
    pub lamport: Option<u64>,
    /// The stream the event was written to.
    #[serde(default)]
    pub stream: Option<String>,
    /// Offset of the event within its stream.
    #[serde(default)]
    pub offset: Option<u64>,
    /// The app which emitted the event.
    #[serde(default)]
    pub app_id: Option<String>,
    /// Tags attached to the event.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A diagnostic row.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Diagnostic {
    /// How severe the problem is.
    #[serde(default)]
    pub severity: DiagnosticSeverity,
    /// The message to show to the user.
    pub message: String,
}

/// Severity of a [`Diagnostic`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticSeverity {
    /// The query ran but something looks wrong.
    #[default]
    Warning,
    /// Part of the query failed.
    Error,
    /// Anything else.
    #[serde(other)]
    Other,
}

/// Parse a newline-delimited JSON response body.
pub fn parse_ndjson(body: &str) -> Result<Vec<ResponseRow>, ClientError> {
    body.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| ClientError::Decode { line: i + 1, source })
        })
        .collect()
}

/// Extract a human readable message from an error response body.
///
/// Actyx reports errors as `{"code": .., "message": ..}`; anything else is
/// returned as-is.
pub fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    let body = body.trim();
    if body.starts_with('{') {
        if let Ok(ErrorBody { message }) = serde_json::from_str(body) {
            return message;
        }
    }
    body.to_string()
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_rows() {
        let body = r#"
{"type":"event","lamport":3,"stream":"abc-0","offset":12,"appId":"com.example","timestamp":1609502400000000,"tags":["a"],"payload":{"x":1}}
{"type":"diagnostic","severity":"error","message":"bad"}

{"type":"offsets","offsets":{"abc-0":12}}
{"type":"somethingNew","foo":1}
"#;
        let rows = parse_ndjson(body).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(
            rows[0],
            ResponseRow::Event(EventRow {
                timestamp: 1_609_502_400_000_000,
                payload: json!({"x": 1}),
                lamport: Some(3),
                stream: Some("abc-0".to_string()),
                offset: Some(12),
                app_id: Some("com.example".to_string()),
                tags: vec!["a".to_string()],
            })
        );
        assert_eq!(
            rows[1],
            ResponseRow::Diagnostic(Diagnostic {
                severity: DiagnosticSeverity::Error,
                message: "bad".to_string(),
            })
        );
        assert_eq!(rows[2], ResponseRow::Offsets);
        assert_eq!(rows[3], ResponseRow::Other);
    }

    #[test]
    fn minimal_event() {
        let rows = parse_ndjson(r#"{"type":"event","timestamp":5}"#).unwrap();
        match &rows[0] {
            ResponseRow::Event(e) => {
                assert_eq!(e.timestamp, 5);
                assert_eq!(e.payload, serde_json::Value::Null);
                assert!(e.tags.is_empty());
            }
            other => panic!("unexpected row {other:?}"),
        }
    }

    #[test]
    fn diagnostic_default_severity() {
        let rows = parse_ndjson(r#"{"type":"diagnostic","message":"hm"}"#).unwrap();
        assert_eq!(
            rows,
            vec![ResponseRow::Diagnostic(Diagnostic {
                severity: DiagnosticSeverity::Warning,
                message: "hm".to_string(),
            })]
        );
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let body = "{\"type\":\"offsets\"}\n\n{\"type\":\"event\"";
        match parse_ndjson(body) {
            Err(ClientError::Decode { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            error_message(r#"{"code":"ERR_BAD_REQUEST","message":"syntax error at 1:5"}"#),
            "syntax error at 1:5"
        );
        assert_eq!(error_message("  plain failure\n"), "plain failure");
        assert_eq!(error_message("{broken"), "{broken");
        assert_eq!(error_message(r#"{"code":"X"}"#), r#"{"code":"X"}"#);
    }
}
