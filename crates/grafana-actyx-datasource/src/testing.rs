//! Test helpers: a stand-in Actyx node and builders for plugin requests.
use std::sync::{Arc, Mutex};

use grafana_plugin_sdk::pluginv2;
use serde_json::{json, Value};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

use crate::settings::{ActyxJsonData, ActyxSettings};

pub(crate) const MANIFEST: &str =
    r#"{"appId":"com.example.grafana","displayName":"Grafana","version":"1.0.0"}"#;

/// A request received by a [`FakeNode`].
#[derive(Clone, Debug)]
pub(crate) struct Recorded {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: String,
}

type Handler = dyn Fn(&Recorded) -> (u16, String) + Send + Sync;

/// An HTTP server on a local port answering every request with the status and
/// body returned by its handler.
pub(crate) struct FakeNode {
    url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    server: JoinHandle<()>,
}

impl FakeNode {
    pub async fn start(
        handler: impl Fn(&Recorded) -> (u16, String) + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(vec![]));
        let handler: Arc<Handler> = Arc::new(handler);
        let recorded = Arc::clone(&requests);
        let server = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&handler), Arc::clone(&recorded)));
            }
        });
        Self {
            url,
            requests,
            server,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn json_data(&self) -> ActyxJsonData {
        ActyxJsonData {
            manifest: MANIFEST.to_string(),
            url: Some(self.url.clone()),
        }
    }

    pub fn settings(&self) -> ActyxSettings {
        ActyxSettings::from_json_data(&self.json_data()).unwrap()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// The number of requests received for `path`.
    pub fn count(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    handler: Arc<Handler>,
    recorded: Arc<Mutex<Vec<Recorded>>>,
) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };
    let (status, body) = handler(&request);
    recorded.lock().unwrap().push(request);
    let reason = http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\n\
         content-type: application/json\r\n\
         content-length: {}\r\n\
         connection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn read_request(stream: &mut TcpStream) -> Option<Recorded> {
    let mut buf = vec![];
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        let Some(end) = text.find("\r\n\r\n") else {
            continue;
        };
        let head = &text[..end];
        let header = |name: &str| {
            head.lines().skip(1).find_map(|line| {
                let (key, value) = line.split_once(':')?;
                key.trim()
                    .eq_ignore_ascii_case(name)
                    .then(|| value.trim().to_string())
            })
        };
        let length = header("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() < end + 4 + length {
            continue;
        }
        let mut request_line = head.lines().next()?.split_whitespace();
        return Some(Recorded {
            method: request_line.next()?.to_string(),
            path: request_line.next()?.to_string(),
            authorization: header("authorization"),
            body: String::from_utf8_lossy(&buf[end + 4..end + 4 + length]).into_owned(),
        });
    }
}

/// Instance settings as Grafana sends them for a datasource.
pub(crate) fn datasource_settings(
    uid: &str,
    updated_ms: i64,
    json_data: &Value,
) -> pluginv2::DataSourceInstanceSettings {
    pluginv2::DataSourceInstanceSettings {
        id: 1,
        uid: uid.to_string(),
        name: "Actyx".to_string(),
        json_data: serde_json::to_vec(json_data).unwrap(),
        last_updated_ms: updated_ms,
        ..Default::default()
    }
}

/// A plugin context carrying `settings`, or no instance settings at all.
pub(crate) fn plugin_context(
    settings: Option<pluginv2::DataSourceInstanceSettings>,
) -> pluginv2::PluginContext {
    pluginv2::PluginContext {
        org_id: 1,
        plugin_id: "actyx-datasource".to_string(),
        data_source_instance_settings: settings,
        ..Default::default()
    }
}

/// `jsonData` pointing at `url` with a valid manifest.
pub(crate) fn json_data_for(url: &str) -> Value {
    json!({ "manifest": MANIFEST, "url": url })
}
