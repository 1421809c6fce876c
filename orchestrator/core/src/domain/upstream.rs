// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Upstream transport contract used by routing-table entries.
//!
//! A client is built per agent endpoint with an [`AuthHook`]. Before each
//! forwarded request the hook receives the request and the caller's
//! authenticated principal, and attaches equivalent credentials.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Authenticated caller of a proxied request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub tenant: Option<String>,
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamRequest {
    /// Path relative to the client endpoint
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("request unauthorized: {0}")]
    Unauthorized(String),

    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// Credential forwarding contract.
pub trait AuthHook: Send + Sync {
    fn authorize(
        &self,
        request: &mut UpstreamRequest,
        principal: &Principal,
    ) -> Result<(), UpstreamError>;
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn send(
        &self,
        request: UpstreamRequest,
        principal: &Principal,
    ) -> Result<UpstreamResponse, UpstreamError>;
}

pub trait UpstreamClientFactory: Send + Sync {
    fn new_client(
        &self,
        endpoint: &str,
        auth_hook: Arc<dyn AuthHook>,
    ) -> Result<Arc<dyn UpstreamClient>, UpstreamError>;
}
