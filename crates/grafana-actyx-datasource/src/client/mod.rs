//! A minimal client for the Actyx HTTP API.
//!
//! The plugin only needs two things from the event store: running an AQL query and
//! checking that the node is reachable with the configured manifest. Both are
//! expressed by the [`EventStore`] trait, which is implemented for HTTP by
//! [`ActyxClient`].
use std::{fmt, time::Duration};

use grafana_plugin_sdk::backend::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::settings::ActyxSettings;

mod response;

pub use response::{
    error_message, parse_ndjson, Diagnostic, DiagnosticSeverity, EventRow, ResponseRow,
};

const AUTH_PATH: &str = "api/v2/auth";
const QUERY_PATH: &str = "api/v2/events/query";
const NODE_ID_PATH: &str = "api/v2/node/id";

/// Errors returned when talking to the event store.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be sent or the response could not be read.
    #[error("Error contacting Actyx node: {0}")]
    Http(#[from] reqwest::Error),

    /// The node rejected the app manifest.
    #[error("Authentication with Actyx node failed: {message}")]
    Auth {
        /// The message returned by the node.
        message: String,
    },

    /// The node answered with an error status.
    #[error("{message}")]
    Status {
        /// The HTTP status returned by the node.
        status: StatusCode,
        /// The message returned by the node.
        message: String,
    },

    /// A response row could not be decoded.
    #[error("Invalid response row on line {line}: {source}")]
    Decode {
        /// One-based line number of the offending row.
        line: usize,
        /// The underlying error.
        source: serde_json::Error,
    },
}

/// The operations the plugin performs against an event store.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Run an AQL query, returning all rows of the response.
    async fn query_aql(&self, aql: &str) -> Result<Vec<ResponseRow>, ClientError>;

    /// Return the ID of the node serving requests.
    async fn node_id(&self) -> Result<String, ClientError>;
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    order: &'static str,
}

/// An [`EventStore`] backed by the HTTP API of an Actyx node.
///
/// The bearer token obtained for the manifest is cached and renewed whenever
/// the node rejects it.
pub struct ActyxClient {
    http: reqwest::Client,
    settings: ActyxSettings,
    token: Mutex<Option<String>>,
}

impl ActyxClient {
    /// Create a new client for the given settings.
    ///
    /// No request is made until the client is first used.
    pub fn new(settings: ActyxSettings) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("grafana-actyx-datasource/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            settings,
            token: Mutex::new(None),
        })
    }

    /// The settings this client was created with.
    pub fn settings(&self) -> &ActyxSettings {
        &self.settings
    }

    #[instrument(skip(self), fields(app_id = %self.settings.manifest.app_id))]
    async fn authenticate(&self) -> Result<String, ClientError> {
        let response = self
            .http
            .post(self.settings.endpoint(AUTH_PATH))
            .json(&self.settings.manifest)
            .send()
            .await?;
        if !response.status().is_success() {
            let message = error_message(&response.text().await?);
            warn!(%message, "Authentication rejected");
            return Err(ClientError::Auth { message });
        }
        debug!("Obtained token");
        Ok(response.json::<AuthResponse>().await?.token)
    }

    async fn token(&self) -> Result<String, ClientError> {
        let mut token = self.token.lock().await;
        match token.as_ref() {
            Some(t) => Ok(t.clone()),
            None => {
                let fresh = self.authenticate().await?;
                *token = Some(fresh.clone());
                Ok(fresh)
            }
        }
    }

    async fn forget_token(&self, stale: &str) {
        let mut token = self.token.lock().await;
        if token.as_deref() == Some(stale) {
            *token = None;
        }
    }

    /// Send an authorized request, re-authenticating once if the token was rejected.
    async fn send(
        &self,
        build: impl Fn() -> RequestBuilder + Send + Sync,
    ) -> Result<Response, ClientError> {
        let token = self.token().await?;
        let mut response = build().bearer_auth(&token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("Token rejected, re-authenticating");
            self.forget_token(&token).await;
            let token = self.token().await?;
            response = build().bearer_auth(&token).send().await?;
        }
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let message = error_message(&response.text().await?);
            Err(ClientError::Status { status, message })
        }
    }
}

#[async_trait]
impl EventStore for ActyxClient {
    #[instrument(skip(self), err)]
    async fn query_aql(&self, aql: &str) -> Result<Vec<ResponseRow>, ClientError> {
        let url = self.settings.endpoint(QUERY_PATH);
        let body = QueryRequest { query: aql, order: "asc" };
        let response = self.send(|| self.http.post(&url).json(&body)).await?;
        let rows = parse_ndjson(&response.text().await?)?;
        debug!(rows = rows.len(), "Query complete");
        Ok(rows)
    }

    #[instrument(skip(self), err)]
    async fn node_id(&self) -> Result<String, ClientError> {
        let url = self.settings.endpoint(NODE_ID_PATH);
        let response = self.send(|| self.http.get(&url)).await?;
        Ok(response.text().await?.trim().to_string())
    }
}

impl fmt::Debug for ActyxClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActyxClient")
            .field("base_url", &self.settings.base_url.as_str())
            .field("app_id", &self.settings.manifest.app_id)
            .finish()
    }
}
