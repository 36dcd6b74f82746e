//! Reshaping of query response rows into a Grafana [`Frame`].
//!
//! Event payloads are arbitrary JSON, so the columns of the frame are inferred
//! from the payloads themselves:
//!
//! - scalar payloads (booleans, numbers, strings) end up in a single `value` column;
//! - object payloads get one column per property, typed by the JSON type of the
//!   property's value; values which aren't scalars are rendered as JSON text;
//! - array payloads are treated like objects keyed by index, so `[10, 20]` fills
//!   the columns `0` and `1`;
//! - properties are visited in key order, and if several events disagree about
//!   the type of a column the last one wins; cells which don't match the column
//!   type are left empty.
//!
//! Every frame starts with a `time` column taken from the event timestamps.
//! Frames containing any textual column prefer the table visualisation, all
//! others are graphed.
use std::collections::HashMap;

use chrono::prelude::*;
use grafana_plugin_sdk::{
    data::{Field, Frame, Metadata, VisType},
    prelude::*,
};
use serde_json::Value;
use tracing::warn;

use crate::client::{Diagnostic, ResponseRow};

/// The name of the timestamp column.
pub const TIME_FIELD: &str = "time";
/// The name of the column holding scalar payloads.
pub const VALUE_FIELD: &str = "value";

/// The kind of data held in a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    /// Event timestamps.
    Time,
    /// JSON booleans.
    Bool,
    /// JSON numbers.
    Number,
    /// JSON strings.
    Text,
    /// Any other JSON value, serialized to text.
    Json,
}

impl ColumnKind {
    fn of_scalar(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(_) => Some(Self::Bool),
            Value::Number(_) => Some(Self::Number),
            Value::String(_) => Some(Self::Text),
            _ => None,
        }
    }

    fn is_textual(self) -> bool {
        matches!(self, Self::Text | Self::Json)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Source {
    Time,
    Payload,
    /// An object property, or an array element if the key is an index.
    Property(String),
}

#[derive(Debug)]
struct Column {
    name: String,
    kind: ColumnKind,
    source: Source,
}

/// An event reduced to what ends up in the frame.
struct Sample<'a> {
    time: DateTime<Utc>,
    payload: &'a Value,
}

/// The inferred layout of a frame: columns in first-seen order.
#[derive(Debug)]
struct Schema {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
}

impl Schema {
    fn new() -> Self {
        let mut schema = Self {
            columns: vec![],
            index: HashMap::new(),
        };
        schema.declare(TIME_FIELD, ColumnKind::Time, Source::Time);
        schema
    }

    /// Declare a column, replacing the kind and source of an existing one with the same name.
    fn declare(&mut self, name: &str, kind: ColumnKind, source: Source) {
        match self.index.get(name) {
            Some(&i) => {
                let column = &mut self.columns[i];
                column.kind = kind;
                column.source = source;
            }
            None => {
                self.index.insert(name.to_string(), self.columns.len());
                self.columns.push(Column {
                    name: name.to_string(),
                    kind,
                    source,
                });
            }
        }
    }

    fn observe(&mut self, payload: &Value) {
        match payload {
            Value::Object(properties) => {
                for (key, value) in properties {
                    if key == TIME_FIELD {
                        continue;
                    }
                    self.declare_property(key, value);
                }
            }
            Value::Array(items) => {
                for (i, value) in items.iter().enumerate() {
                    self.declare_property(&i.to_string(), value);
                }
            }
            other => {
                if let Some(kind) = ColumnKind::of_scalar(other) {
                    self.declare(VALUE_FIELD, kind, Source::Payload);
                }
            }
        }
    }

    fn declare_property(&mut self, key: &str, value: &Value) {
        let kind = ColumnKind::of_scalar(value).unwrap_or(ColumnKind::Json);
        self.declare(key, kind, Source::Property(key.to_string()));
    }

    fn preferred_visualisation(&self) -> VisType {
        if self.columns.iter().any(|c| c.kind.is_textual()) {
            VisType::Table
        } else {
            VisType::Graph
        }
    }
}

fn lookup<'a>(payload: &'a Value, source: &Source) -> Option<&'a Value> {
    match source {
        Source::Time => None,
        Source::Payload => Some(payload),
        Source::Property(key) => match payload {
            Value::Object(properties) => properties.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        },
    }
}

fn build_field(column: &Column, values: &[Sample<'_>]) -> Field {
    let cells = values.iter().map(|v| lookup(v.payload, &column.source));
    match column.kind {
        ColumnKind::Time => values.iter().map(|v| v.time).into_field(&column.name),
        ColumnKind::Bool => cells
            .map(|c| c.and_then(Value::as_bool))
            .into_opt_field(&column.name),
        ColumnKind::Number => cells
            .map(|c| c.and_then(Value::as_f64))
            .into_opt_field(&column.name),
        ColumnKind::Text => cells
            .map(|c| c.and_then(Value::as_str).map(str::to_string))
            .into_opt_field(&column.name),
        ColumnKind::Json => cells
            .map(|c| c.map(Value::to_string))
            .into_opt_field(&column.name),
    }
}

/// The result of reshaping a query response.
#[derive(Debug)]
pub struct ShapedResponse {
    /// The frame holding all events of the response.
    pub frame: Frame,
    /// Diagnostics returned alongside the events, in order.
    pub diagnostics: Vec<Diagnostic>,
}

/// Reshape the rows of a query response into a single frame called `name`.
///
/// A response without any rows yields a frame without fields or metadata.
pub fn shape_response(name: &str, rows: &[ResponseRow]) -> ShapedResponse {
    if rows.is_empty() {
        return ShapedResponse {
            frame: Frame::new(name),
            diagnostics: vec![],
        };
    }

    let mut diagnostics = vec![];
    let mut values = vec![];
    for row in rows {
        match row {
            ResponseRow::Diagnostic(d) => diagnostics.push(d.clone()),
            ResponseRow::Event(e) => {
                match Utc.timestamp_micros(e.timestamp).single() {
                    Some(time) => values.push(Sample {
                        time,
                        payload: &e.payload,
                    }),
                    None => warn!(
                        timestamp = e.timestamp,
                        "Skipping event with invalid timestamp"
                    ),
                }
            }
            ResponseRow::Offsets | ResponseRow::Other => {}
        }
    }

    let mut schema = Schema::new();
    for value in &values {
        schema.observe(value.payload);
    }

    let mut meta = Metadata::default();
    meta.preferred_visualisation = Some(schema.preferred_visualisation());
    let frame = Frame::new(name)
        .with_fields(schema.columns.iter().map(|c| build_field(c, &values)))
        .with_metadata(meta);

    ShapedResponse { frame, diagnostics }
}
