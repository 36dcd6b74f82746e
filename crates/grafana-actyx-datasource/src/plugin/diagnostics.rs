//! Health checks and metrics.
use std::convert::Infallible;

use grafana_plugin_sdk::backend;
use serde_json::json;
use tracing::warn;

use super::ActyxDataSource;
use crate::client::{ClientError, EventStore};

/// Turn the outcome of a node ID lookup into a health check response.
pub fn health_response(
    app_id: &str,
    node_id: Result<String, ClientError>,
) -> backend::CheckHealthResponse {
    match node_id {
        Ok(node_id) => backend::CheckHealthResponse::ok(format!(
            "Connected to Actyx node {node_id} as {app_id}"
        ))
        .with_json_details(json!({ "nodeId": node_id, "appId": app_id })),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            backend::CheckHealthResponse::error(e.to_string())
        }
    }
}

#[backend::async_trait]
impl backend::DiagnosticsService for ActyxDataSource {
    type CheckHealthError = Infallible;

    async fn check_health(
        &self,
        request: backend::CheckHealthRequest<Self>,
    ) -> Result<backend::CheckHealthResponse, Self::CheckHealthError> {
        let Some(settings) = request.plugin_context.instance_settings else {
            return Ok(backend::CheckHealthResponse::error(
                "Missing datasource instance settings".to_string(),
            ));
        };
        let client = match self.client(&settings).await {
            Ok(client) => client,
            Err(e) => return Ok(backend::CheckHealthResponse::error(e.to_string())),
        };
        let app_id = client.settings().manifest.app_id.clone();
        Ok(health_response(&app_id, client.node_id().await))
    }

    type CollectMetricsError = prometheus::Error;

    async fn collect_metrics(
        &self,
        _request: backend::CollectMetricsRequest<Self>,
    ) -> Result<backend::CollectMetricsResponse, Self::CollectMetricsError> {
        Ok(backend::CollectMetricsResponse::new(Some(
            backend::MetricsPayload::prometheus(self.metrics.encode()?),
        )))
    }
}

#[cfg(test)]
mod test {
    use grafana_plugin_sdk::backend::HealthStatus;
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;

    use super::*;

    #[test]
    fn healthy() {
        let response = health_response("com.example.grafana", Ok("node-1".to_string()));
        assert_eq!(response.status, HealthStatus::Ok);
        assert_eq!(
            response.message,
            "Connected to Actyx node node-1 as com.example.grafana"
        );
        assert_eq!(
            response.json_details,
            json!({"nodeId": "node-1", "appId": "com.example.grafana"})
        );
    }

    #[test]
    fn unhealthy() {
        let response = health_response(
            "com.example.grafana",
            Err(ClientError::Status {
                status: StatusCode::FORBIDDEN,
                message: "app not trusted".to_string(),
            }),
        );
        assert_eq!(response.status, HealthStatus::Error);
        assert_eq!(response.message, "app not trusted");
    }
}
