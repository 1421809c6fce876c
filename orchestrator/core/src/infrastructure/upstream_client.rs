// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// HTTP Upstream Client
//
// reqwest-backed implementation of the upstream transport used by routing
// table entries. Every forwarded request passes through the AuthHook, which
// copies the caller's credentials onto the outgoing request.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::domain::upstream::{
    AuthHook, Principal, UpstreamClient, UpstreamClientFactory, UpstreamError, UpstreamRequest,
    UpstreamResponse,
};

pub const FORWARDED_USER_HEADER: &str = "X-Forwarded-User";
pub const TENANT_HEADER: &str = "X-AgentMesh-Tenant";

/// Forwards the principal's bearer token and identity headers.
pub struct ForwardingAuthHook {
    require_token: bool,
}

impl ForwardingAuthHook {
    pub fn new(require_token: bool) -> Self {
        Self { require_token }
    }
}

impl Default for ForwardingAuthHook {
    fn default() -> Self {
        Self::new(false)
    }
}

impl AuthHook for ForwardingAuthHook {
    fn authorize(
        &self,
        request: &mut UpstreamRequest,
        principal: &Principal,
    ) -> Result<(), UpstreamError> {
        match principal.bearer_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => {
                request
                    .headers
                    .insert("Authorization".to_string(), format!("Bearer {}", token));
            }
            None if self.require_token => {
                return Err(UpstreamError::Unauthorized(format!(
                    "principal '{}' carries no bearer token",
                    principal.subject
                )));
            }
            None => {}
        }

        if !principal.subject.is_empty() {
            request
                .headers
                .insert(FORWARDED_USER_HEADER.to_string(), principal.subject.clone());
        }
        if let Some(tenant) = &principal.tenant {
            request.headers.insert(TENANT_HEADER.to_string(), tenant.clone());
        }
        Ok(())
    }
}

pub struct HttpUpstreamClient {
    client: reqwest::Client,
    endpoint: Url,
    endpoint_str: String,
    auth_hook: Arc<dyn AuthHook>,
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    fn endpoint(&self) -> &str {
        &self.endpoint_str
    }

    async fn send(
        &self,
        mut request: UpstreamRequest,
        principal: &Principal,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.auth_hook.authorize(&mut request, principal)?;

        let url = self
            .endpoint
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| {
                UpstreamError::InvalidEndpoint(format!("{}{}: {}", self.endpoint, request.path, e))
            })?;

        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };

        Ok(UpstreamResponse { status, body })
    }
}

/// Builds one [`HttpUpstreamClient`] per agent endpoint over a shared
/// connection pool.
pub struct HttpUpstreamClientFactory {
    client: reqwest::Client,
}

impl HttpUpstreamClientFactory {
    pub fn new(timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

impl UpstreamClientFactory for HttpUpstreamClientFactory {
    fn new_client(
        &self,
        endpoint: &str,
        auth_hook: Arc<dyn AuthHook>,
    ) -> Result<Arc<dyn UpstreamClient>, UpstreamError> {
        // Url::join drops the last segment unless the base ends with '/'
        let normalized = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{}/", endpoint)
        };
        let url = Url::parse(&normalized)
            .map_err(|_| UpstreamError::InvalidEndpoint(endpoint.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(UpstreamError::InvalidEndpoint(endpoint.to_string()));
        }

        Ok(Arc::new(HttpUpstreamClient {
            client: self.client.clone(),
            endpoint: url,
            endpoint_str: endpoint.to_string(),
            auth_hook,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(token: Option<&str>) -> Principal {
        Principal {
            subject: "alice@example.com".into(),
            tenant: Some("team-a".into()),
            bearer_token: token.map(str::to_string),
        }
    }

    #[test]
    fn test_hook_requires_token_when_configured() {
        let mut request = UpstreamRequest::default();
        let err = ForwardingAuthHook::new(true)
            .authorize(&mut request, &principal(None))
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Unauthorized(_)));

        ForwardingAuthHook::default()
            .authorize(&mut request, &principal(None))
            .unwrap();
        assert!(!request.headers.contains_key("Authorization"));
        assert_eq!(request.headers[FORWARDED_USER_HEADER], "alice@example.com");
    }

    #[test]
    fn test_factory_rejects_bad_endpoints() {
        let factory = HttpUpstreamClientFactory::new(Duration::from_secs(5)).unwrap();
        let hook: Arc<dyn AuthHook> = Arc::new(ForwardingAuthHook::default());
        assert!(factory.new_client("not a url", hook.clone()).is_err());
        assert!(factory.new_client("ftp://agent:21", hook.clone()).is_err());
        assert_eq!(
            factory.new_client("http://a.ns1:8080", hook).unwrap().endpoint(),
            "http://a.ns1:8080"
        );
    }

    #[tokio::test]
    async fn test_send_forwards_principal_credentials() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/a2a/tasks")
            .match_header("authorization", "Bearer token-123")
            .match_header("x-forwarded-user", "alice@example.com")
            .match_header("x-agentmesh-tenant", "team-a")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let factory = HttpUpstreamClientFactory::new(Duration::from_secs(5)).unwrap();
        let client = factory
            .new_client(&format!("{}/a2a", server.url()), Arc::new(ForwardingAuthHook::new(true)))
            .unwrap();

        let response = client
            .send(
                UpstreamRequest {
                    path: "/tasks".into(),
                    headers: Default::default(),
                    body: serde_json::json!({ "message": "hi" }),
                },
                &principal(Some("token-123")),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body["ok"], true);
        mock.assert_async().await;
    }
}
