// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Reconcile Errors
//!
//! Reconciliation failures come in two kinds:
//!
//! | Kind | Examples | Scheduler | Status |
//! |------|----------|-----------|--------|
//! | [`ValidationError`] | policy deny, malformed spec, zero port | no retry | terminal condition |
//! | [`TransientError`] | not found, store outage, timeout | backoff retry | untouched |
//!
//! The kind is carried structurally. [`ReconcileError::context`] wraps an
//! error without losing it, and [`is_validation_error`] walks an `anyhow`
//! chain with `downcast_ref`, so classification never depends on message text.

use thiserror::Error;

use crate::domain::namespace_policy::DenyReason;
use crate::domain::repository::StoreError;
use crate::domain::resource::{NamespacedName, ResourceKind};
use crate::domain::runtime::ApplyError;
use crate::domain::tool_provider::DiscoveryError;
use crate::domain::upstream::UpstreamError;

/// Permanent failure caused by the declared spec itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("reference to {reference} denied: {reason}")]
    ReferenceDenied {
        reference: String,
        reason: DenyReason,
    },

    #[error("{object}: required field '{field}' is missing or zero")]
    MissingField {
        object: NamespacedName,
        field: String,
    },

    #[error("{object}: {message}")]
    InvalidSpec {
        object: NamespacedName,
        message: String,
    },

    #[error("agent {0} cannot reference itself as a tool")]
    SelfReference(NamespacedName),

    #[error("secret {secret} is malformed: {message}")]
    InvalidSecret {
        secret: NamespacedName,
        message: String,
    },
}

/// Retryable failure; the outcome can change without a spec edit.
#[derive(Debug, Error)]
pub enum TransientError {
    #[error("{kind} {key} not found")]
    NotFound { kind: ResourceKind, key: NamespacedName },

    #[error("cluster store error: {0}")]
    Store(#[source] StoreError),

    #[error("downstream apply failed: {0}")]
    Apply(#[from] ApplyError),

    #[error("tool discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("upstream client setup failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("reconcile deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Transient,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transient(#[from] TransientError),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ReconcileError>,
    },
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Context { source, .. } => source.kind(),
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Innermost validation error, through any number of context wraps.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Transient(_) => None,
            Self::Context { source, .. } => source.validation(),
        }
    }

    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn not_found(kind: ResourceKind, key: NamespacedName) -> Self {
        Self::Transient(TransientError::NotFound { kind, key })
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, key } => Self::not_found(kind, key),
            other => Self::Transient(TransientError::Store(other)),
        }
    }
}

impl From<ApplyError> for ReconcileError {
    fn from(err: ApplyError) -> Self {
        Self::Transient(TransientError::Apply(err))
    }
}

impl From<DiscoveryError> for ReconcileError {
    fn from(err: DiscoveryError) -> Self {
        Self::Transient(TransientError::Discovery(err))
    }
}

impl From<UpstreamError> for ReconcileError {
    fn from(err: UpstreamError) -> Self {
        Self::Transient(TransientError::Upstream(err))
    }
}

/// Classify an error that crossed an `anyhow` boundary.
pub fn is_validation_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<ValidationError>().is_some()
            || cause
                .downcast_ref::<ReconcileError>()
                .is_some_and(ReconcileError::is_validation)
    })
}
