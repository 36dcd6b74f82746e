//! Resource endpoints used by the query editors.
//!
//! `POST /diagnostics` runs a query and reports only its error and diagnostics,
//! which is what the explore editor displays underneath the query field.
use bytes::Bytes;
use chrono::prelude::*;
use grafana_plugin_sdk::backend;
use http::{header, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::{run_query, ActyxDataSource, InstanceError};
use crate::{client::EventStore, metrics::Metrics, query::AqlQuery};

const DIAGNOSTICS_PATH: &str = "/diagnostics";

/// Errors returned by resource calls.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The response could not be built.
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    /// The request body could not be parsed.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The response body could not be serialized.
    #[error("Error serializing response: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The request didn't carry datasource instance settings.
    #[error("Missing datasource instance settings")]
    MissingInstanceSettings,

    /// No client could be created for the datasource instance.
    #[error(transparent)]
    Instance(#[from] InstanceError),

    /// The path exists but doesn't accept this method.
    #[error("Method {0} not allowed")]
    MethodNotAllowed(Method),

    /// Unknown path.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl backend::ErrIntoHttpResponse for ResourceError {
    fn into_http_response(self) -> Result<Response<Bytes>, Box<dyn std::error::Error>> {
        let status = match &self {
            Self::Http(_) | Self::Serialize(_) | Self::MissingInstanceSettings => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Json(_) | Self::Instance(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        };
        Ok(Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Bytes::from(serde_json::to_vec(
                &serde_json::json!({"error": self.to_string()}),
            )?))?)
    }
}

/// Body of a `POST /diagnostics` request.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsRequest {
    /// The query as edited.
    #[serde(flatten)]
    pub query: AqlQuery,
    /// Start of the time range, substituted for `from()`.
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// End of the time range, substituted for `to()`.
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

/// The error and diagnostics of a query, as displayed by the explore editor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DiagnosticsReport {
    /// The error message, if the query failed.
    pub error: Option<String>,
    /// Diagnostic messages returned by the event store.
    pub diagnostics: Vec<String>,
}

impl DiagnosticsReport {
    /// Run the query of `request` and collect its error and diagnostics.
    pub async fn collect(
        store: &dyn EventStore,
        metrics: &Metrics,
        request: &DiagnosticsRequest,
    ) -> Self {
        match run_query(
            store,
            metrics,
            "diagnostics",
            &request.query,
            request.from,
            request.to,
        )
        .await
        {
            Ok(shaped) => Self {
                error: None,
                diagnostics: shaped.diagnostics.into_iter().map(|d| d.message).collect(),
            },
            Err(e) => Self {
                error: Some(e.to_string()),
                diagnostics: vec![],
            },
        }
    }
}

#[backend::async_trait]
impl backend::ResourceService for ActyxDataSource {
    type Error = ResourceError;
    type InitialResponse = Response<Bytes>;
    type Stream = backend::BoxResourceStream<Self::Error>;

    async fn call_resource(
        &self,
        r: backend::CallResourceRequest<Self>,
    ) -> Result<(Self::InitialResponse, Self::Stream), Self::Error> {
        let path = r.request.uri().path().to_string();
        debug!(%path, method = %r.request.method(), "Resource call");
        if path != DIAGNOSTICS_PATH {
            return Err(ResourceError::NotFound(path));
        }
        if r.request.method() != Method::POST {
            return Err(ResourceError::MethodNotAllowed(r.request.method().clone()));
        }
        let settings = r
            .plugin_context
            .instance_settings
            .ok_or(ResourceError::MissingInstanceSettings)?;
        let request: DiagnosticsRequest = serde_json::from_slice(r.request.body())?;
        let client = self.client(&settings).await?;
        let report = DiagnosticsReport::collect(client.as_ref(), &self.metrics, &request).await;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Bytes::from(
                serde_json::to_vec(&report).map_err(ResourceError::Serialize)?,
            ))?;
        Ok((
            response,
            Box::pin(futures_util::stream::empty()) as Self::Stream,
        ))
    }
}
