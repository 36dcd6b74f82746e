//! Query handling.
use std::{sync::Arc, time::Instant};

use chrono::prelude::*;
use futures_util::stream::FuturesOrdered;
use grafana_plugin_sdk::{
    backend::{self, DataQueryStatus},
    data::{self, Frame, Metadata, Notice, Severity},
};
use reqwest::StatusCode;
use serde_json::{json, Map};
use thiserror::Error;
use tracing::{debug, warn};

use super::{ActyxDataSource, InstanceError};
use crate::{
    client::{ClientError, Diagnostic, DiagnosticSeverity, EventStore},
    frame::{shape_response, ShapedResponse},
    metrics::Metrics,
    query::{render_aql, AqlQuery},
};

/// An error that occurred while answering a single query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The request didn't carry datasource instance settings.
    #[error("Missing datasource instance settings")]
    MissingInstanceSettings {
        /// The query's ref ID.
        ref_id: String,
    },

    /// No client could be created for the datasource instance.
    #[error("{source}")]
    Instance {
        /// The query's ref ID.
        ref_id: String,
        /// The underlying error, shared by all queries of the request.
        source: Arc<InstanceError>,
    },

    /// The query text is empty.
    #[error("Empty AQL query")]
    EmptyQuery {
        /// The query's ref ID.
        ref_id: String,
    },

    /// The event store failed to answer the query.
    #[error("{source}")]
    Store {
        /// The query's ref ID.
        ref_id: String,
        /// The error returned by the client.
        source: ClientError,
    },

    /// The response could not be converted into a valid frame.
    #[error("Error building frame: {source}")]
    Frame {
        /// The query's ref ID.
        ref_id: String,
        /// The underlying error.
        source: data::Error,
    },
}

impl backend::DataQueryError for QueryError {
    fn ref_id(self) -> String {
        match self {
            Self::MissingInstanceSettings { ref_id }
            | Self::Instance { ref_id, .. }
            | Self::EmptyQuery { ref_id }
            | Self::Store { ref_id, .. }
            | Self::Frame { ref_id, .. } => ref_id,
        }
    }

    fn status(&self) -> DataQueryStatus {
        match self {
            Self::MissingInstanceSettings { .. } | Self::Frame { .. } => DataQueryStatus::Internal,
            Self::Instance { source, .. } => match source.as_ref() {
                InstanceError::Settings(_) => DataQueryStatus::BadRequest,
                InstanceError::Client(_) => DataQueryStatus::Internal,
            },
            Self::EmptyQuery { .. } => DataQueryStatus::BadRequest,
            Self::Store { source, .. } => match source {
                ClientError::Auth { .. } => DataQueryStatus::Unauthorized,
                ClientError::Status { status, .. } => match *status {
                    StatusCode::BAD_REQUEST => DataQueryStatus::BadRequest,
                    StatusCode::UNAUTHORIZED => DataQueryStatus::Unauthorized,
                    StatusCode::FORBIDDEN => DataQueryStatus::Forbidden,
                    StatusCode::NOT_FOUND => DataQueryStatus::NotFound,
                    _ => DataQueryStatus::BadGateway,
                },
                ClientError::Http(e) if e.is_timeout() => DataQueryStatus::Timeout,
                ClientError::Http(_) | ClientError::Decode { .. } => DataQueryStatus::BadGateway,
            },
        }
    }
}

/// Attach the executed query and any diagnostics to a frame.
///
/// Diagnostics are shown as notices on the panel, and are also listed under
/// `meta.custom.diagnostics` for the explore editor.
pub fn annotate_frame(frame: &mut Frame, aql: &str, diagnostics: &[Diagnostic]) {
    let meta = frame.meta.get_or_insert_with(Metadata::default);
    meta.executed_query_string = Some(aql.to_string());
    if diagnostics.is_empty() {
        return;
    }
    meta.notices = Some(
        diagnostics
            .iter()
            .map(|d| {
                let mut notice = Notice::new(d.message.clone());
                notice.severity = Some(match d.severity {
                    DiagnosticSeverity::Error => Severity::Error,
                    DiagnosticSeverity::Warning | DiagnosticSeverity::Other => Severity::Warning,
                });
                notice
            })
            .collect(),
    );
    let mut custom = meta.custom.take().unwrap_or_else(Map::new);
    custom.insert(
        "diagnostics".to_string(),
        json!(diagnostics.iter().map(|d| &d.message).collect::<Vec<_>>()),
    );
    meta.custom = Some(custom);
}

/// Run a single query against the event store and reshape its result.
///
/// `from` and `to` are substituted into the query's `from()` and `to()` placeholders.
pub async fn run_query(
    store: &dyn EventStore,
    metrics: &Metrics,
    ref_id: &str,
    query: &AqlQuery,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<ShapedResponse, QueryError> {
    let text = query.text().ok_or_else(|| QueryError::EmptyQuery {
        ref_id: ref_id.to_string(),
    })?;
    let aql = render_aql(text, from, to);
    debug!(ref_id, %aql, "Running AQL query");

    let start = Instant::now();
    let result = store.query_aql(&aql).await;
    metrics.observe_query(start.elapsed(), result.is_err());
    let rows = result.map_err(|source| {
        warn!(ref_id, error = %source, "AQL query failed");
        QueryError::Store {
            ref_id: ref_id.to_string(),
            source,
        }
    })?;

    let mut shaped = shape_response(ref_id, &rows);
    annotate_frame(&mut shaped.frame, &aql, &shaped.diagnostics);
    debug!(
        ref_id,
        rows = rows.len(),
        fields = shaped.frame.fields().len(),
        diagnostics = shaped.diagnostics.len(),
        "AQL query complete",
    );
    Ok(shaped)
}

#[backend::async_trait]
impl backend::DataService for ActyxDataSource {
    type Query = AqlQuery;
    type QueryError = QueryError;
    type Stream = backend::BoxDataResponseStream<Self::QueryError>;

    async fn query_data(
        &self,
        request: backend::QueryDataRequest<Self::Query, Self>,
    ) -> Self::Stream {
        let store = match &request.plugin_context.instance_settings {
            Some(settings) => Some(self.client(settings).await.map_err(Arc::new)),
            None => None,
        };
        let metrics = self.metrics.clone();
        Box::pin(
            request
                .queries
                .into_iter()
                .map(move |q: backend::DataQuery<Self::Query>| {
                    let store = store.clone();
                    let metrics = metrics.clone();
                    async move {
                        let ref_id = q.ref_id;
                        let store = match store {
                            Some(Ok(store)) => store,
                            Some(Err(source)) => {
                                return Err(QueryError::Instance { ref_id, source })
                            }
                            None => return Err(QueryError::MissingInstanceSettings { ref_id }),
                        };
                        let shaped = run_query(
                            store.as_ref(),
                            &metrics,
                            &ref_id,
                            &q.query,
                            Some(q.time_range.from),
                            Some(q.time_range.to),
                        )
                        .await?;
                        let frame = shaped.frame.check().map_err(|source| QueryError::Frame {
                            ref_id: ref_id.clone(),
                            source,
                        })?;
                        Ok(backend::DataResponse::new(ref_id.clone(), vec![frame]))
                    }
                })
                .collect::<FuturesOrdered<_>>(),
        )
    }
}
