// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// MCP Tool Discovery Adapter
//
// Anti-Corruption Layer for the MCP streamable-HTTP transport. Performs the
// initialize handshake, then pages through tools/list. Servers may answer a
// POST with plain JSON or with a one-shot SSE stream; both are accepted.
// Legacy SSE-only servers are reported as unsupported.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::tool_provider::{
    DiscoveredTool, DiscoveryError, RemoteMcpProtocol, ToolDiscovery, ToolEndpoint,
};

const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "mcp-session-id";
const MAX_PAGES: usize = 32;

#[derive(Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolEntry>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

pub struct HttpToolDiscovery {
    client: reqwest::Client,
}

impl HttpToolDiscovery {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn post(
        &self,
        endpoint: &ToolEndpoint,
        session: Option<&str>,
        payload: &Value,
    ) -> Result<(Option<String>, String, String), DiscoveryError> {
        let mut builder = self
            .client
            .post(&endpoint.url)
            .timeout(endpoint.timeout)
            .header("Accept", "application/json, text/event-stream")
            .header("Content-Type", "application/json")
            .json(payload);
        for (name, value) in &endpoint.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(session) = session {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder.send().await.map_err(|e| DiscoveryError::Unreachable {
            url: endpoint.url.clone(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status {
                url: endpoint.url.clone(),
                status: status.as_u16(),
            });
        }

        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await.map_err(|e| DiscoveryError::Unreachable {
            url: endpoint.url.clone(),
            message: e.to_string(),
        })?;

        Ok((session_id, content_type, body))
    }

    /// Send a request and return the JSON-RPC `result` for `id`.
    async fn call(
        &self,
        endpoint: &ToolEndpoint,
        session: Option<&str>,
        id: u64,
        method: &str,
        params: Value,
    ) -> Result<(Option<String>, Value), DiscoveryError> {
        let payload = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let (session_id, content_type, body) = self.post(endpoint, session, &payload).await?;
        let message =
            extract_response(&content_type, &body, id).ok_or_else(|| DiscoveryError::Protocol {
                url: endpoint.url.clone(),
                message: format!("no JSON-RPC response to {} in reply", method),
            })?;

        if let Some(error) = message.get("error") {
            return Err(DiscoveryError::Protocol {
                url: endpoint.url.clone(),
                message: format!("{} failed: {}", method, error),
            });
        }
        let result = message.get("result").cloned().unwrap_or(Value::Null);
        Ok((session_id, result))
    }
}

impl Default for HttpToolDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolDiscovery for HttpToolDiscovery {
    async fn list_tools(
        &self,
        endpoint: &ToolEndpoint,
    ) -> Result<Vec<DiscoveredTool>, DiscoveryError> {
        if endpoint.protocol == RemoteMcpProtocol::Sse {
            return Err(DiscoveryError::UnsupportedProtocol(RemoteMcpProtocol::Sse));
        }

        let (session, _) = self
            .call(
                endpoint,
                None,
                1,
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "agentmesh-controller", "version": env!("CARGO_PKG_VERSION") },
                }),
            )
            .await?;
        debug!(url = %endpoint.url, session = ?session, "MCP session initialized");

        let notification = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        self.post(endpoint, session.as_deref(), &notification).await?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for page in 0..MAX_PAGES {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let (_, result) = self
                .call(endpoint, session.as_deref(), 2 + page as u64, "tools/list", params)
                .await?;
            let listed: ToolsListResult =
                serde_json::from_value(result).map_err(|e| DiscoveryError::Protocol {
                    url: endpoint.url.clone(),
                    message: format!("malformed tools/list result: {}", e),
                })?;

            tools.extend(listed.tools.into_iter().map(|tool| DiscoveredTool {
                name: tool.name,
                description: tool.description.unwrap_or_default(),
            }));

            match listed.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(tools)
    }
}

/// Find the JSON-RPC message answering `id` in a JSON or SSE body.
fn extract_response(content_type: &str, body: &str, id: u64) -> Option<Value> {
    let matches_id = |message: &Value| message.get("id").and_then(Value::as_u64) == Some(id);

    if content_type.starts_with("text/event-stream") {
        let mut data = String::new();
        for line in body.lines().chain(std::iter::once("")) {
            if let Some(chunk) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(chunk.trim_start());
            } else if line.trim().is_empty() && !data.is_empty() {
                if let Ok(message) = serde_json::from_str::<Value>(&data) {
                    if matches_id(&message) {
                        return Some(message);
                    }
                }
                data.clear();
            }
        }
        return None;
    }

    match serde_json::from_str::<Value>(body).ok()? {
        Value::Array(batch) => batch.into_iter().find(|m| matches_id(m)),
        message if matches_id(&message) => Some(message),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn endpoint(url: String, protocol: RemoteMcpProtocol) -> ToolEndpoint {
        ToolEndpoint {
            url,
            protocol,
            headers: BTreeMap::from([("Authorization".to_string(), "Bearer t".to_string())]),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_extract_from_sse_stream() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":2,\n\
                    data: \"result\":{\"tools\":[]}}\n\n";
        let message = extract_response("text/event-stream", body, 2).unwrap();
        assert!(message["result"]["tools"].is_array());
        assert!(extract_response("text/event-stream", body, 3).is_none());
    }

    #[tokio::test]
    async fn test_sse_protocol_is_unsupported() {
        let discovery = HttpToolDiscovery::new();
        let err = discovery
            .list_tools(&endpoint("http://127.0.0.1:9/sse".into(), RemoteMcpProtocol::Sse))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::UnsupportedProtocol(RemoteMcpProtocol::Sse)));
    }

    #[tokio::test]
    async fn test_handshake_and_tools_list() {
        let mut server = mockito::Server::new_async().await;
        let init = server
            .mock("POST", "/mcp")
            .match_header("authorization", "Bearer t")
            .match_body(mockito::Matcher::PartialJson(json!({ "method": "initialize" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("mcp-session-id", "session-1")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-03-26"}}"#)
            .create_async()
            .await;
        let initialized = server
            .mock("POST", "/mcp")
            .match_header("mcp-session-id", "session-1")
            .match_body(mockito::Matcher::PartialJson(
                json!({ "method": "notifications/initialized" }),
            ))
            .with_status(202)
            .create_async()
            .await;
        let list = server
            .mock("POST", "/mcp")
            .match_header("mcp-session-id", "session-1")
            .match_body(mockito::Matcher::PartialJson(json!({ "method": "tools/list" })))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(
                "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"tools\":[{\"name\":\"search\",\"description\":\"Web search\"},{\"name\":\"fetch\"}]}}\n\n",
            )
            .create_async()
            .await;

        let tools = HttpToolDiscovery::new()
            .list_tools(&endpoint(
                format!("{}/mcp", server.url()),
                RemoteMcpProtocol::StreamableHttp,
            ))
            .await
            .unwrap();

        assert_eq!(
            tools,
            vec![
                DiscoveredTool { name: "search".into(), description: "Web search".into() },
                DiscoveredTool { name: "fetch".into(), description: String::new() },
            ]
        );
        init.assert_async().await;
        initialized.assert_async().await;
        list.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("POST", "/mcp").with_status(503).create_async().await;

        let err = HttpToolDiscovery::new()
            .list_tools(&endpoint(
                format!("{}/mcp", server.url()),
                RemoteMcpProtocol::StreamableHttp,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Status { status: 503, .. }));
    }
}
