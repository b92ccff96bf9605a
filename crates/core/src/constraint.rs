use serde::{Deserialize, Serialize};

use crate::enforcement::EnforcementAction;
use crate::error::ConformError;

/// An instance of a [`crate::template::Template`].
///
/// A Constraint only exists while its Template exists (enforced by the
/// registry, not this type): the registry refuses `AddConstraint` when no
/// `ConstraintClient` is registered for `kind`, and cascades removal when the
/// owning template is removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// The `Template::kind` this constraint instantiates.
    pub kind: String,
    /// Unique name within `kind`.
    pub name: String,
    /// Target-specific match predicate. Opaque to the core; handed to
    /// [`crate::handler::TargetHandler::to_matcher`] to build an executable
    /// matcher.
    #[serde(default)]
    pub spec: serde_json::Value,
    /// Legacy or scoped enforcement action.
    #[serde(flatten)]
    pub enforcement: EnforcementAction,
}

impl Constraint {
    /// Construct a constraint with the legacy single-action form.
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            spec: serde_json::Value::Null,
            enforcement: EnforcementAction::Legacy(action.into()),
        }
    }

    /// Attach a match predicate spec.
    #[must_use]
    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = spec;
        self
    }

    /// Replace the enforcement action, e.g. with [`EnforcementAction::Scoped`].
    #[must_use]
    pub fn with_enforcement(mut self, enforcement: EnforcementAction) -> Self {
        self.enforcement = enforcement;
        self
    }

    /// Validate non-empty `kind`/`name`. Schema and handler-specific
    /// validation happen separately in the registry (they require access to
    /// the owning `ConstraintClient` and `TargetHandler`).
    pub fn validate_metadata(&self) -> Result<(), ConformError> {
        if self.kind.is_empty() || self.name.is_empty() {
            return Err(ConformError::InvalidConstraint {
                kind: self.kind.clone(),
                name: self.name.clone(),
                reason: "kind and name must not be empty".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_metadata_rejects_empty_name() {
        let c = Constraint::new("Deny", "", "deny");
        assert!(c.validate_metadata().is_err());
    }

    #[test]
    fn validate_metadata_rejects_empty_kind() {
        let c = Constraint::new("", "c1", "deny");
        assert!(c.validate_metadata().is_err());
    }

    #[test]
    fn validate_metadata_accepts_well_formed() {
        let c = Constraint::new("Deny", "c1", "deny");
        assert!(c.validate_metadata().is_ok());
    }

    #[test]
    fn builder_methods_compose() {
        let c = Constraint::new("Deny", "c1", "deny").with_spec(serde_json::json!({"x": 1}));
        assert_eq!(c.spec, serde_json::json!({"x": 1}));
    }
}
