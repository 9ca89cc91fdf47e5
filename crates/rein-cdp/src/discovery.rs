//! Resolve a browser WebSocket URL from a DevTools HTTP endpoint.

use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use rein_core::{ReinError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser", default)]
    pub browser: String,
    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

/// Whether `endpoint` already is a WebSocket URL.
pub fn is_websocket_url(endpoint: &str) -> bool {
    endpoint.starts_with("ws://") || endpoint.starts_with("wss://")
}

/// Fetch `/json/version` from `http://host:port` and return the browser
/// WebSocket URL. WebSocket URLs are returned unchanged.
pub async fn resolve_ws_url(endpoint: &str) -> Result<String> {
    if is_websocket_url(endpoint) {
        return Ok(endpoint.to_string());
    }
    let version = fetch_version(endpoint).await?;
    debug!(browser = %version.browser, protocol = %version.protocol_version, "discovered browser");
    Ok(version.web_socket_debugger_url)
}

pub async fn fetch_version(endpoint: &str) -> Result<BrowserVersion> {
    let url = format!("{}/json/version", endpoint.trim_end_matches('/'));
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| ReinError::WebSocket(format!("http client: {e}")))?;

    http.get(&url)
        .send()
        .await
        .map_err(|e| ReinError::WebSocket(format!("devtools discovery at {url} failed: {e}")))?
        .error_for_status()
        .map_err(|e| ReinError::WebSocket(format!("devtools discovery at {url} failed: {e}")))?
        .json::<BrowserVersion>()
        .await
        .map_err(|e| ReinError::WebSocket(format!("invalid /json/version from {url}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_detection() {
        assert!(is_websocket_url("ws://127.0.0.1:9222/devtools/browser/abc"));
        assert!(!is_websocket_url("http://127.0.0.1:9222"));
    }

    #[test]
    fn test_version_payload() {
        let raw = r#"{
            "Browser": "Chrome/126.0.6478.126",
            "Protocol-Version": "1.3",
            "User-Agent": "Mozilla/5.0",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/0b3c"
        }"#;
        let version: BrowserVersion = serde_json::from_str(raw).unwrap();
        assert_eq!(version.protocol_version, "1.3");
        assert!(version.web_socket_debugger_url.ends_with("/0b3c"));
    }

    #[tokio::test]
    async fn test_ws_url_passthrough() {
        let url = "ws://localhost:9222/devtools/browser/x";
        assert_eq!(resolve_ws_url(url).await.unwrap(), url);
    }
}
