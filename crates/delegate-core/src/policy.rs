//! Availability and permission checks applied before a task is created.

use std::collections::HashSet;

use crate::config::PolicyConfig;
use crate::error::{ErrorCode, OperationError};

/// Whether delegation is available at all.
pub trait FeatureGate: Send + Sync {
    fn is_enabled(&self) -> bool;
}

/// Fixed on/off gate.
#[derive(Debug, Clone, Copy)]
pub struct StaticFeatureGate(pub bool);

impl FeatureGate for StaticFeatureGate {
    fn is_enabled(&self) -> bool {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny,
}

pub trait PermissionPolicy: Send + Sync {
    fn decide(&self, subagent_type: &str) -> PermissionDecision;
}

/// Name-based allow/deny rules.
///
/// Legacy `ask` entries have no interactive path and resolve to
/// [`PermissionDecision::Deny`].
#[derive(Debug, Clone, Default)]
pub struct PermissionRules {
    denied: HashSet<String>,
}

impl PermissionRules {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        let denied = config.deny.iter().chain(&config.ask).cloned().collect();
        Self { denied }
    }

    pub fn deny(mut self, subagent_type: impl Into<String>) -> Self {
        self.denied.insert(subagent_type.into());
        self
    }
}

impl PermissionPolicy for PermissionRules {
    fn decide(&self, subagent_type: &str) -> PermissionDecision {
        if self.denied.contains(subagent_type) || self.denied.contains("*") {
            PermissionDecision::Deny
        } else {
            PermissionDecision::Allow
        }
    }
}

/// Gate check followed by the permission check, as one step.
pub fn check_policy(
    gate: &dyn FeatureGate,
    permissions: &dyn PermissionPolicy,
    subagent_type: &str,
) -> Result<(), OperationError> {
    if !gate.is_enabled() {
        return Err(OperationError::new(
            ErrorCode::FeatureDisabled,
            "task delegation is disabled",
        ));
    }
    match permissions.decide(subagent_type) {
        PermissionDecision::Allow => Ok(()),
        PermissionDecision::Deny => Err(OperationError::new(
            ErrorCode::PermissionDenied,
            format!("permission to start subagent {subagent_type:?} was denied"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_gate_wins_over_allow() {
        let err = check_policy(
            &StaticFeatureGate(false),
            &PermissionRules::allow_all(),
            "finder",
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::FeatureDisabled);
    }

    #[test]
    fn deny_list_blocks() {
        let rules = PermissionRules::allow_all().deny("reviewer");
        let err = check_policy(&StaticFeatureGate(true), &rules, "reviewer").unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionDenied);
        assert!(check_policy(&StaticFeatureGate(true), &rules, "finder").is_ok());
    }

    #[test]
    fn ask_entries_resolve_to_deny() {
        let config = PolicyConfig {
            ask: vec!["planner".to_string()],
            ..PolicyConfig::default()
        };
        let rules = PermissionRules::from_config(&config);
        assert_eq!(rules.decide("planner"), PermissionDecision::Deny);
        assert_eq!(rules.decide("finder"), PermissionDecision::Allow);
    }

    #[test]
    fn wildcard_denies_everything() {
        let rules = PermissionRules::allow_all().deny("*");
        assert_eq!(rules.decide("anything"), PermissionDecision::Deny);
    }
}
