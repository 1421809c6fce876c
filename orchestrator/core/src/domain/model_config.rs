// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Model provider credentials and endpoint settings referenced by Agents.
//!
//! A `ModelConfig` is read-only to the orchestrator. It has no cross-namespace
//! policy, so an Agent can only use ModelConfigs from its own namespace.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::resource::{NamespacedName, ObjectMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelProvider {
    OpenAI,
    Anthropic,
    AzureOpenAI,
    Ollama,
    Gemini,
}

impl ModelProvider {
    /// Environment variable the agent runtime reads the API key from.
    /// `None` for providers that run without a key.
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::AzureOpenAI => Some("AZURE_OPENAI_API_KEY"),
            Self::Gemini => Some("GOOGLE_API_KEY"),
            Self::Ollama => None,
        }
    }

    /// Provider identifier understood by the agent runtime.
    pub fn runtime_type(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::AzureOpenAI => "azure_openai",
            Self::Ollama => "ollama",
            Self::Gemini => "gemini",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfigSpec {
    pub provider: ModelProvider,
    pub model: String,

    /// Secret name in the ModelConfig's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_secret: Option<String>,

    /// Key inside `api_key_secret` holding the credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_secret_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub metadata: ObjectMeta,
    pub spec: ModelConfigSpec,
}

impl ModelConfig {
    pub fn api_key_secret_ref(&self) -> Option<NamespacedName> {
        self.spec
            .api_key_secret
            .as_ref()
            .filter(|name| !name.is_empty())
            .map(|name| NamespacedName::new(self.metadata.namespace.clone(), name.clone()))
    }
}
