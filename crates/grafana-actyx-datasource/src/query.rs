//! The query model edited by the query editors, and rendering of its AQL text.
use chrono::prelude::*;
use serde::{Deserialize, Serialize};

/// A query as sent by the panel and explore editors.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AqlQuery {
    /// The AQL text entered by the user.
    #[serde(default)]
    pub query_text: Option<String>,
}

impl AqlQuery {
    /// The query text, if it contains anything other than whitespace.
    pub fn text(&self) -> Option<&str> {
        self.query_text.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Substitute the dashboard's time range into an AQL query.
///
/// The first `from()` becomes `from(<from>)` and the first `to()` becomes
/// `to(<to>)`, using millisecond-precision ISO 8601 timestamps in UTC.
pub fn render_aql(text: &str, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> String {
    let mut aql = text.to_string();
    if let Some(from) = from {
        aql = aql.replacen("from()", &format!("from({})", iso(from)), 1);
    }
    if let Some(to) = to {
        aql = aql.replacen("to()", &format!("to({})", iso(to)), 1);
    }
    aql
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
