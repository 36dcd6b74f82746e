//! The backend plugin service.
//!
//! [`ActyxDataSource`] implements the data, diagnostics and resource services of
//! the Grafana plugin protocol. It keeps one [`ActyxClient`] per datasource
//! instance so that bearer tokens are reused across requests.
use std::{collections::HashMap, sync::Arc};

use chrono::prelude::*;
use grafana_plugin_sdk::{backend, prelude::*};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::{
    client::{ActyxClient, ClientError},
    metrics::Metrics,
    settings::{ActyxJsonData, ActyxSettings, SettingsError},
};

mod data;
mod diagnostics;
mod resource;

pub use data::{annotate_frame, run_query, QueryError};
pub use diagnostics::health_response;
pub use resource::{DiagnosticsReport, DiagnosticsRequest, ResourceError};

type InstanceSettings = backend::DataSourceInstanceSettings<ActyxJsonData, Value>;

/// Errors preventing a client from being created for a datasource instance.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// The instance is misconfigured.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// The HTTP client could not be created.
    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Debug)]
struct CachedClient {
    updated: DateTime<Utc>,
    client: Arc<ActyxClient>,
}

/// The Actyx datasource plugin.
#[derive(Clone, Debug, GrafanaPlugin)]
#[grafana_plugin(plugin_type = "datasource", json_data = "ActyxJsonData")]
pub struct ActyxDataSource {
    clients: Arc<RwLock<HashMap<String, CachedClient>>>,
    metrics: Metrics,
}

impl ActyxDataSource {
    /// Create a new plugin service with no cached clients.
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            metrics: Metrics::new()?,
        })
    }

    /// Return the client for a datasource instance, creating it if the instance is new
    /// or its settings changed since the client was created.
    async fn client(&self, settings: &InstanceSettings) -> Result<Arc<ActyxClient>, InstanceError> {
        if let Some(cached) = self.clients.read().await.get(&settings.uid) {
            if cached.updated == settings.updated {
                return Ok(Arc::clone(&cached.client));
            }
        }
        let client = Arc::new(ActyxClient::new(ActyxSettings::from_json_data(
            &settings.json_data,
        )?)?);
        info!(uid = %settings.uid, name = %settings.name, ?client, "Created Actyx client");
        self.clients.write().await.insert(
            settings.uid.clone(),
            CachedClient {
                updated: settings.updated,
                client: Arc::clone(&client),
            },
        );
        Ok(client)
    }
}
