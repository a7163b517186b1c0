//! Authorization policy over (role, topic, action).
//!
//! The hub never hard-codes which role may do what.  Instead every publish
//! and every subscribe request is passed to an [`AuthorizationPolicy`]
//! supplied at start-up.  Two implementations ship with the crate:
//!
//! - [`AllowAll`] permits everything (the default for a lab deployment).
//! - [`RulePolicy`] evaluates an ordered rule list loaded from configuration.
//!
//! # How `RulePolicy` evaluates a request
//!
//! Rules are checked top to bottom and the **first** rule that applies wins.
//! A rule applies when its `role` and `action` filters (if set) equal the
//! request's, and its `pattern` selects the request's subject:
//!
//! - For a publish, the subject is a concrete topic and the rule pattern must
//!   match it.
//! - For a subscribe, the subject is itself a pattern.  An `allow` rule
//!   applies only if it covers *every* topic the subscription could receive;
//!   a `deny` rule applies if it overlaps *any* of them.  So denying
//!   `dashboard subscribe secret.*` also refuses a dashboard subscribing `*`.
//!
//! If no rule applies, the policy's `default_effect` is used.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::role::Role;
use crate::domain::topic::TopicPattern;

/// What a participant is trying to do with a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Publish,
    Subscribe,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Publish => f.write_str("publish"),
            Action::Subscribe => f.write_str("subscribe"),
        }
    }
}

/// Outcome of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

/// A request was refused by the policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{role} is not authorized to {action} {subject}")]
pub struct AuthorizationError {
    pub role: Role,
    pub action: Action,
    pub subject: String,
}

/// Decides whether a role may publish to, or subscribe to, a topic.
///
/// For [`Action::Publish`] the `subject` is always an exact pattern built
/// from the envelope's topic.  Implementations must be cheap and must not
/// block: they run on the dispatch path for every inbound message.
#[cfg_attr(test, mockall::automock)]
pub trait AuthorizationPolicy: Send + Sync {
    /// # Errors
    ///
    /// Returns [`AuthorizationError`] if the request is refused.
    fn authorize(
        &self,
        role: Role,
        subject: &TopicPattern,
        action: Action,
    ) -> Result<(), AuthorizationError>;
}

// ── AllowAll ──────────────────────────────────────────────────────────────────

/// Permits every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AuthorizationPolicy for AllowAll {
    fn authorize(&self, _: Role, _: &TopicPattern, _: Action) -> Result<(), AuthorizationError> {
        Ok(())
    }
}

// ── RulePolicy ────────────────────────────────────────────────────────────────

/// One entry of a [`RulePolicy`].
///
/// In TOML:
///
/// ```toml
/// [[authorization.rules]]
/// role = "dashboard"
/// action = "publish"
/// pattern = "machine.*"
/// effect = "deny"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Restricts the rule to one role; `None` means any role.
    #[serde(default)]
    pub role: Option<Role>,
    /// Restricts the rule to one action; `None` means both.
    #[serde(default)]
    pub action: Option<Action>,
    pub pattern: TopicPattern,
    pub effect: Effect,
}

impl PolicyRule {
    fn applies_to(&self, role: Role, subject: &TopicPattern, action: Action) -> bool {
        if self.role.is_some_and(|r| r != role) || self.action.is_some_and(|a| a != action) {
            return false;
        }
        match self.effect {
            Effect::Allow => self.pattern.covers(subject),
            Effect::Deny => self.pattern.overlaps(subject),
        }
    }
}

/// First-match-wins rule list with a fallback effect.
#[derive(Debug, Clone, Default)]
pub struct RulePolicy {
    rules: Vec<PolicyRule>,
    default_effect: Effect,
}

impl RulePolicy {
    pub fn new(rules: Vec<PolicyRule>, default_effect: Effect) -> Self {
        Self {
            rules,
            default_effect,
        }
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Returns the effect for a request without building an error.
    pub fn evaluate(&self, role: Role, subject: &TopicPattern, action: Action) -> Effect {
        self.rules
            .iter()
            .find(|rule| rule.applies_to(role, subject, action))
            .map_or(self.default_effect, |rule| rule.effect)
    }
}

impl AuthorizationPolicy for RulePolicy {
    fn authorize(
        &self,
        role: Role,
        subject: &TopicPattern,
        action: Action,
    ) -> Result<(), AuthorizationError> {
        match self.evaluate(role, subject, action) {
            Effect::Allow => Ok(()),
            Effect::Deny => {
                debug!(%role, %action, %subject, "authorization denied");
                Err(AuthorizationError {
                    role,
                    action,
                    subject: subject.to_string(),
                })
            }
        }
    }
}
