// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Namespace Policy Engine
//!
//! Decides whether a resource in one namespace may reference a tool provider
//! or agent living in another namespace. The engine is a pure function of its
//! inputs: it never touches the cluster store, so the reconciler fetches the
//! target and the source namespace labels first and hands them in.
//!
//! ## Rule Order
//!
//! | # | Condition | Decision |
//! |---|-----------|----------|
//! | 1 | target namespace == source namespace | allow |
//! | 2 | target kind is `MCPServer` or `Service` | deny, kind is same-namespace-only |
//! | 3 | target namespace is not watched | deny |
//! | 4 | target has no `allowedNamespaces` | deny, same-namespace-only default |
//! | 5 | `from: All` | allow |
//! | 6 | `from: Selector` | allow iff source namespace labels match |
//!
//! Rules 1-3 need nothing from the target object, which is what
//! [`NamespacePolicyEngine::precheck`] exposes: an unwatched namespace is
//! rejected before anything is fetched from it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::domain::resource::NamespacedName;
use crate::domain::tool_provider::ToolKind;

/// Which namespaces may reference the owning resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FromNamespaces {
    /// Same-namespace references only
    #[default]
    #[serde(alias = "None")]
    Same,
    All,
    Selector,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedNamespaces {
    #[serde(default)]
    pub from: FromNamespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

impl AllowedNamespaces {
    pub fn all() -> Self {
        Self {
            from: FromNamespaces::All,
            selector: None,
        }
    }

    pub fn selector(selector: LabelSelector) -> Self {
        Self {
            from: FromNamespaces::Selector,
            selector: Some(selector),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Label match expression; every clause must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    pub fn match_label(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            match_labels: BTreeMap::from([(key.into(), value.into())]),
            match_expressions: Vec::new(),
        }
    }

    /// Reject operator/value combinations Kubernetes would refuse.
    pub fn validate(&self) -> Result<(), String> {
        for requirement in &self.match_expressions {
            match requirement.operator {
                SelectorOperator::In | SelectorOperator::NotIn if requirement.values.is_empty() => {
                    return Err(format!(
                        "operator {:?} on key '{}' requires at least one value",
                        requirement.operator, requirement.key
                    ));
                }
                SelectorOperator::Exists | SelectorOperator::DoesNotExist
                    if !requirement.values.is_empty() =>
                {
                    return Err(format!(
                        "operator {:?} on key '{}' must not carry values",
                        requirement.operator, requirement.key
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// An empty selector matches every label set.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let labels_match = self
            .match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value));

        labels_match
            && self.match_expressions.iter().all(|requirement| {
                let actual = labels.get(&requirement.key);
                match requirement.operator {
                    SelectorOperator::In => actual.is_some_and(|v| requirement.values.contains(v)),
                    SelectorOperator::NotIn => {
                        !actual.is_some_and(|v| requirement.values.contains(v))
                    }
                    SelectorOperator::Exists => actual.is_some(),
                    SelectorOperator::DoesNotExist => actual.is_none(),
                }
            })
    }
}

/// The set of namespaces the controller observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchedNamespaces {
    All,
    Only(BTreeSet<String>),
}

impl WatchedNamespaces {
    /// An empty list means cluster-wide watching.
    pub fn from_list<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = namespaces
            .into_iter()
            .map(Into::into)
            .filter(|ns: &String| !ns.is_empty())
            .collect();
        if set.is_empty() {
            Self::All
        } else {
            Self::Only(set)
        }
    }

    pub fn contains(&self, namespace: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(namespace),
        }
    }
}

/// The referencing side of a policy check.
#[derive(Debug, Clone, Copy)]
pub struct SourceNamespace<'a> {
    pub name: &'a str,
    pub labels: &'a BTreeMap<String, String>,
}

/// The referenced side of a policy check.
#[derive(Debug, Clone, Copy)]
pub struct PolicyTarget<'a> {
    pub kind: ToolKind,
    pub key: &'a NamespacedName,
    pub policy: Option<&'a AllowedNamespaces>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    KindNotCrossNamespace {
        kind: ToolKind,
        target: NamespacedName,
        source_namespace: String,
    },
    NamespaceNotWatched {
        target: NamespacedName,
        source_namespace: String,
    },
    SameNamespaceOnly {
        kind: ToolKind,
        target: NamespacedName,
        source_namespace: String,
    },
    SelectorMismatch {
        kind: ToolKind,
        target: NamespacedName,
        source_namespace: String,
    },
    InvalidSelector {
        target: NamespacedName,
        source_namespace: String,
        message: String,
    },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KindNotCrossNamespace { kind, target, source_namespace } => write!(
                f,
                "{} {} cannot be referenced from namespace {}: kind does not support cross-namespace references",
                kind, target, source_namespace
            ),
            Self::NamespaceNotWatched { target, source_namespace } => write!(
                f,
                "reference to {} from namespace {} denied: namespace {} is not watched",
                target, source_namespace, target.namespace
            ),
            Self::SameNamespaceOnly { kind, target, source_namespace } => write!(
                f,
                "{} {} does not allow references from namespace {}: no allowedNamespaces policy (same-namespace only)",
                kind, target, source_namespace
            ),
            Self::SelectorMismatch { kind, target, source_namespace } => write!(
                f,
                "{} {} does not allow references from namespace {}: namespace labels do not match allowedNamespaces selector",
                kind, target, source_namespace
            ),
            Self::InvalidSelector { target, source_namespace, message } => write!(
                f,
                "reference to {} from namespace {} denied: allowedNamespaces selector is invalid: {}",
                target, source_namespace, message
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny(DenyReason),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Cross-namespace reference authorizer.
#[derive(Debug, Clone)]
pub struct NamespacePolicyEngine {
    watched: WatchedNamespaces,
}

impl NamespacePolicyEngine {
    pub fn new(watched: WatchedNamespaces) -> Self {
        Self { watched }
    }

    pub fn watched(&self) -> &WatchedNamespaces {
        &self.watched
    }

    /// Apply rules 1-3, which need nothing from the target object.
    ///
    /// Returns `None` when the decision depends on the target's own
    /// `allowedNamespaces` policy.
    pub fn precheck(
        &self,
        source_namespace: &str,
        kind: ToolKind,
        target: &NamespacedName,
    ) -> Option<PolicyDecision> {
        if target.namespace == source_namespace {
            return Some(PolicyDecision::Allow);
        }

        if !kind.supports_cross_namespace() {
            return Some(PolicyDecision::Deny(DenyReason::KindNotCrossNamespace {
                kind,
                target: target.clone(),
                source_namespace: source_namespace.to_string(),
            }));
        }

        if !self.watched.contains(&target.namespace) {
            return Some(PolicyDecision::Deny(DenyReason::NamespaceNotWatched {
                target: target.clone(),
                source_namespace: source_namespace.to_string(),
            }));
        }

        None
    }

    /// Evaluate the full rule chain.
    pub fn check(&self, source: &SourceNamespace<'_>, target: &PolicyTarget<'_>) -> PolicyDecision {
        if let Some(decision) = self.precheck(source.name, target.kind, target.key) {
            return decision;
        }

        let Some(policy) = target.policy else {
            return PolicyDecision::Deny(DenyReason::SameNamespaceOnly {
                kind: target.kind,
                target: target.key.clone(),
                source_namespace: source.name.to_string(),
            });
        };

        match policy.from {
            FromNamespaces::Same => PolicyDecision::Deny(DenyReason::SameNamespaceOnly {
                kind: target.kind,
                target: target.key.clone(),
                source_namespace: source.name.to_string(),
            }),
            FromNamespaces::All => PolicyDecision::Allow,
            FromNamespaces::Selector => {
                let Some(selector) = policy.selector.as_ref() else {
                    return PolicyDecision::Deny(DenyReason::InvalidSelector {
                        target: target.key.clone(),
                        source_namespace: source.name.to_string(),
                        message: "from: Selector requires a selector".to_string(),
                    });
                };
                if let Err(message) = selector.validate() {
                    return PolicyDecision::Deny(DenyReason::InvalidSelector {
                        target: target.key.clone(),
                        source_namespace: source.name.to_string(),
                        message,
                    });
                }
                if selector.matches(source.labels) {
                    PolicyDecision::Allow
                } else {
                    PolicyDecision::Deny(DenyReason::SelectorMismatch {
                        kind: target.kind,
                        target: target.key.clone(),
                        source_namespace: source.name.to_string(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> NamespacePolicyEngine {
        NamespacePolicyEngine::new(WatchedNamespaces::from_list(["ns1", "ns2", "ns3"]))
    }

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_same_namespace_always_allowed() {
        let no_labels = BTreeMap::new();
        let target = NamespacedName::new("ns1", "local");
        for kind in [
            ToolKind::RemoteMcpServer,
            ToolKind::ClusterLocalMcpServer,
            ToolKind::ClusterService,
            ToolKind::Agent,
        ] {
            let decision = engine().check(
                &SourceNamespace { name: "ns1", labels: &no_labels },
                &PolicyTarget { kind, key: &target, policy: None },
            );
            assert_eq!(decision, PolicyDecision::Allow, "{kind:?}");
        }
    }

    #[test]
    fn test_cluster_local_kinds_denied_even_with_all_policy() {
        let no_labels = BTreeMap::new();
        let decoy = AllowedNamespaces::all();
        let target = NamespacedName::new("ns2", "svc");
        for kind in [ToolKind::ClusterLocalMcpServer, ToolKind::ClusterService] {
            let decision = engine().check(
                &SourceNamespace { name: "ns1", labels: &no_labels },
                &PolicyTarget { kind, key: &target, policy: Some(&decoy) },
            );
            assert!(
                matches!(decision, PolicyDecision::Deny(DenyReason::KindNotCrossNamespace { .. })),
                "{kind:?} -> {decision:?}"
            );
        }
    }

    #[test]
    fn test_from_all_allows_watched_namespace() {
        let no_labels = BTreeMap::new();
        let policy = AllowedNamespaces::all();
        let target = NamespacedName::new("ns2", "tools");
        let decision = engine().check(
            &SourceNamespace { name: "ns3", labels: &no_labels },
            &PolicyTarget { kind: ToolKind::RemoteMcpServer, key: &target, policy: Some(&policy) },
        );
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn test_unwatched_namespace_denied_even_with_all_policy() {
        let no_labels = BTreeMap::new();
        let policy = AllowedNamespaces::all();
        let target = NamespacedName::new("elsewhere", "tools");
        let decision = engine().check(
            &SourceNamespace { name: "ns1", labels: &no_labels },
            &PolicyTarget { kind: ToolKind::RemoteMcpServer, key: &target, policy: Some(&policy) },
        );
        assert!(matches!(decision, PolicyDecision::Deny(DenyReason::NamespaceNotWatched { .. })));
    }

    #[test]
    fn test_missing_policy_is_same_namespace_only() {
        let no_labels = BTreeMap::new();
        let target = NamespacedName::new("ns2", "helper");
        let decision = engine().check(
            &SourceNamespace { name: "ns1", labels: &no_labels },
            &PolicyTarget { kind: ToolKind::Agent, key: &target, policy: None },
        );
        assert!(matches!(decision, PolicyDecision::Deny(DenyReason::SameNamespaceOnly { .. })));
    }

    #[test]
    fn test_selector_allows_only_matching_labels() {
        let policy =
            AllowedNamespaces::selector(LabelSelector::match_label("shared-access", "true"));
        let target = NamespacedName::new("ns2", "tools");
        let matching = labels(&[("shared-access", "true"), ("team", "a")]);
        let other = labels(&[("shared-access", "false")]);

        let allowed = engine().check(
            &SourceNamespace { name: "ns1", labels: &matching },
            &PolicyTarget { kind: ToolKind::RemoteMcpServer, key: &target, policy: Some(&policy) },
        );
        assert_eq!(allowed, PolicyDecision::Allow);

        let denied = engine().check(
            &SourceNamespace { name: "ns1", labels: &other },
            &PolicyTarget { kind: ToolKind::RemoteMcpServer, key: &target, policy: Some(&policy) },
        );
        let PolicyDecision::Deny(reason) = denied else {
            panic!("expected deny");
        };
        let message = reason.to_string();
        assert!(message.contains("tools"));
        assert!(message.contains("ns1"));
    }

    #[test]
    fn test_selector_expressions() {
        let selector = LabelSelector {
            match_labels: BTreeMap::new(),
            match_expressions: vec![
                LabelSelectorRequirement {
                    key: "tier".into(),
                    operator: SelectorOperator::In,
                    values: vec!["gold".into(), "silver".into()],
                },
                LabelSelectorRequirement {
                    key: "quarantined".into(),
                    operator: SelectorOperator::DoesNotExist,
                    values: vec![],
                },
            ],
        };
        assert!(selector.matches(&labels(&[("tier", "gold")])));
        assert!(!selector.matches(&labels(&[("tier", "bronze")])));
        assert!(!selector.matches(&labels(&[("tier", "gold"), ("quarantined", "yes")])));
    }

    #[test]
    fn test_invalid_selector_denies() {
        let policy = AllowedNamespaces::selector(LabelSelector {
            match_labels: BTreeMap::new(),
            match_expressions: vec![LabelSelectorRequirement {
                key: "tier".into(),
                operator: SelectorOperator::In,
                values: vec![],
            }],
        });
        let no_labels = BTreeMap::new();
        let target = NamespacedName::new("ns2", "tools");
        let decision = engine().check(
            &SourceNamespace { name: "ns1", labels: &no_labels },
            &PolicyTarget { kind: ToolKind::RemoteMcpServer, key: &target, policy: Some(&policy) },
        );
        let PolicyDecision::Deny(reason) = decision else {
            panic!("invalid selector must deny");
        };
        assert!(matches!(reason, DenyReason::InvalidSelector { .. }));
        let message = reason.to_string();
        assert!(message.contains("ns2/tools"), "{}", message);
        assert!(message.contains("namespace ns1"), "{}", message);
    }

    #[test]
    fn test_precheck_defers_when_policy_needed() {
        let target = NamespacedName::new("ns2", "tools");
        assert_eq!(engine().precheck("ns1", ToolKind::RemoteMcpServer, &target), None);
        assert_eq!(
            engine().precheck("ns2", ToolKind::ClusterService, &target),
            Some(PolicyDecision::Allow)
        );
    }

    #[test]
    fn test_policy_yaml_accepts_none_alias() {
        let policy: AllowedNamespaces = serde_yaml::from_str("from: None").unwrap();
        assert_eq!(policy.from, FromNamespaces::Same);
        let policy: AllowedNamespaces = serde_yaml::from_str(
            "from: Selector\nselector:\n  matchLabels:\n    shared-access: \"true\"",
        )
        .unwrap();
        assert_eq!(policy.from, FromNamespaces::Selector);
        assert!(policy.selector.unwrap().match_labels.contains_key("shared-access"));
    }
}
