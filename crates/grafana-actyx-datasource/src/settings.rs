//! Per-instance configuration, as collected by the datasource's config editor.
//!
//! Grafana stores the editor's values in the datasource's `jsonData`; they arrive
//! here as [`ActyxJsonData`] and are validated into [`ActyxSettings`] before any
//! request is made to the event store.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The base URL of a locally running Actyx node.
pub const DEFAULT_URL: &str = "http://localhost:4454";

/// The raw `jsonData` of a datasource instance.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActyxJsonData {
    /// The app manifest, as typed into the config editor.
    #[serde(default)]
    pub manifest: String,
    /// Base URL of the Actyx node. Defaults to [`DEFAULT_URL`].
    #[serde(default)]
    pub url: Option<String>,
}

/// The manifest identifying this plugin instance to the event store.
///
/// It is sent verbatim to the node's auth endpoint in exchange for a bearer token.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppManifest {
    /// The app ID, e.g. `com.example.grafana`.
    pub app_id: String,
    /// Human readable name shown in the node's logs.
    pub display_name: String,
    /// App version.
    pub version: String,
    /// Signature issued for production app IDs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Errors found while validating instance settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// No manifest has been configured.
    #[error("No app manifest configured")]
    MissingManifest,
    /// The manifest could not be parsed.
    #[error("Invalid app manifest: {0}")]
    InvalidManifest(#[source] serde_json::Error),
    /// The configured URL is not an absolute http(s) URL.
    #[error("Invalid Actyx URL {url:?}: {reason}")]
    InvalidUrl {
        /// The URL as configured.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Validated settings for a single datasource instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActyxSettings {
    /// The parsed app manifest.
    pub manifest: AppManifest,
    /// Base URL of the node, without a trailing slash.
    pub base_url: Url,
}

impl ActyxSettings {
    /// Validate the raw `jsonData` of a datasource instance.
    pub fn from_json_data(json_data: &ActyxJsonData) -> Result<Self, SettingsError> {
        let manifest = json_data.manifest.trim();
        if manifest.is_empty() {
            return Err(SettingsError::MissingManifest);
        }
        let manifest = serde_json::from_str(manifest).map_err(SettingsError::InvalidManifest)?;
        let base_url = parse_base_url(json_data.url.as_deref().unwrap_or(DEFAULT_URL))?;
        Ok(Self { manifest, base_url })
    }

    /// Build the URL of an API endpoint below the base URL.
    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn parse_base_url(raw: &str) -> Result<Url, SettingsError> {
    let raw = raw.trim();
    let raw = if raw.is_empty() { DEFAULT_URL } else { raw };
    let invalid = |reason: String| SettingsError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim_end_matches('/')).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {other}"))),
    }
}
