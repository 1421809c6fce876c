// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Secret Fingerprint
//!
//! Change detection for credential secrets without persisting their values.
//!
//! The fingerprint is a SHA-256 digest over a canonical serialization of a
//! *set* of secrets:
//!
//! ```text
//! for each secret, ordered by (namespace, name):
//!     "{namespace}/{name}\n"
//!     for each (key, value), ordered by key then value bytes:
//!         "{key_len}:{key}={value_len}:" <value bytes> "\n"
//!     0x1E
//! ```
//!
//! Keys and values are length-prefixed so arbitrary bytes cannot forge a
//! boundary. Refs sharing a (namespace, name) are merged into one record:
//! identical pairs collapse, differing ones are all hashed, so input order
//! never changes the digest.
//! The empty set serializes to the empty byte string and therefore hashes to
//! [`EMPTY_FINGERPRINT`].

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

use crate::domain::resource::{NamespacedName, ObjectMeta};

/// SHA-256 of the empty input
pub const EMPTY_FINGERPRINT: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

const RECORD_SEPARATOR: u8 = 0x1e;

/// Cluster Secret object. `data` is base64; `stringData` is plain text and
/// wins on key collisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub string_data: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
#[error("secret {secret} key '{key}' is not valid base64: {source}")]
pub struct SecretDecodeError {
    pub secret: NamespacedName,
    pub key: String,
    #[source]
    pub source: base64::DecodeError,
}

impl Secret {
    pub fn decoded_data(&self) -> Result<BTreeMap<String, Vec<u8>>, SecretDecodeError> {
        let mut decoded = BTreeMap::new();
        for (key, value) in &self.data {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(value.trim())
                .map_err(|source| SecretDecodeError {
                    secret: self.metadata.key(),
                    key: key.clone(),
                    source,
                })?;
            decoded.insert(key.clone(), bytes);
        }
        for (key, value) in &self.string_data {
            decoded.insert(key.clone(), value.as_bytes().to_vec());
        }
        Ok(decoded)
    }

    pub fn to_secret_ref(&self) -> Result<SecretRef, SecretDecodeError> {
        Ok(SecretRef {
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
            data: self.decoded_data()?,
        })
    }
}

/// Decoded secret contents, built per reconciliation and never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl SecretRef {
    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(self.namespace.clone(), self.name.clone())
    }
}

impl fmt::Debug for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRef")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Hex-encoded SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretFingerprint(String);

impl SecretFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn matches(&self, stored: Option<&str>) -> bool {
        stored == Some(self.0.as_str())
    }
}

impl fmt::Display for SecretFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order-independent digest over a set of secrets.
pub fn fingerprint<'a, I>(secrets: I) -> SecretFingerprint
where
    I: IntoIterator<Item = &'a SecretRef>,
{
    let mut merged: BTreeMap<(&str, &str), BTreeSet<(&str, &[u8])>> = BTreeMap::new();
    for secret in secrets {
        merged
            .entry((secret.namespace.as_str(), secret.name.as_str()))
            .or_default()
            .extend(secret.data.iter().map(|(key, value)| (key.as_str(), value.as_slice())));
    }

    let mut hasher = Sha256::new();
    for ((namespace, name), pairs) in merged {
        hasher.update(namespace.as_bytes());
        hasher.update(b"/");
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
        for (key, value) in pairs {
            hasher.update(format!("{}:", key.len()).as_bytes());
            hasher.update(key.as_bytes());
            hasher.update(format!("={}:", value.len()).as_bytes());
            hasher.update(value);
            hasher.update(b"\n");
        }
        hasher.update([RECORD_SEPARATOR]);
    }

    SecretFingerprint(hex::encode(hasher.finalize()))
}
