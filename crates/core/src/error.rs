use std::collections::HashMap;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Typed error kinds surfaced by the registry's public operations.
///
/// Every public entry point returns this type (or an `ErrorMap` wrapping it
/// per target) rather than leaking a driver's or handler's native error type.
#[derive(Debug, Error)]
pub enum ConformError {
    /// Client construction failed (e.g. zero targets, duplicate driver names).
    #[error("failed to create client: {0}")]
    CreatingClient(String),

    /// A template failed structural validation.
    #[error("invalid template {name}: {reason}")]
    InvalidTemplate {
        /// Name of the offending template.
        name: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A constraint named a template kind with no matching registered template.
    #[error("no template registered for kind {kind}")]
    MissingTemplate {
        /// The constraint's declared kind.
        kind: String,
    },

    /// A constraint failed structural or schema validation.
    #[error("invalid constraint {kind}/{name}: {reason}")]
    InvalidConstraint {
        /// The constraint's kind.
        kind: String,
        /// The constraint's name.
        name: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A lookup for a specific constraint found nothing.
    #[error("no constraint {name} of kind {kind}")]
    MissingConstraint {
        /// The constraint's kind.
        kind: String,
        /// The constraint's name.
        name: String,
    },

    /// No configured driver holds engine code for the template's declared target.
    #[error("no configured driver matches engine code blocks for template {name}")]
    NoDriver {
        /// Name of the offending template.
        name: String,
    },

    /// Two configured drivers share the same name.
    #[error("duplicate driver name: {0}")]
    DuplicateDriver(String),

    /// A driver or handler failed during review evaluation.
    #[error("review failed: {0}")]
    Review(String),

    /// A scoped-enforcement-action constraint could not be evaluated for the
    /// review's declared (or the client's configured) enforcement points.
    #[error("unsupported enforcement point(s) for constraint {kind}/{name}: {source_point:?}")]
    UnsupportedEnforcementPoints {
        /// The constraint's kind.
        kind: String,
        /// The constraint's name.
        name: String,
        /// The enforcement point the review declared, if any.
        source_point: Option<String>,
    },

    /// An external driver or target handler call failed.
    #[error("{collaborator} {operation} failed: {detail}")]
    Collaborator {
        /// `"driver:<name>"` or `"handler:<name>"`.
        collaborator: String,
        /// The operation being attempted, e.g. `"add_constraint"`.
        operation: String,
        /// The collaborator's error message.
        detail: String,
    },

    /// The caller's cancellation token fired before the operation completed.
    /// Never raised while an external driver or handler call is in flight;
    /// only observed between such calls.
    #[error("operation cancelled")]
    Cancelled,
}

/// Check a cancellation token between external calls.
pub(crate) fn check_cancelled(token: &CancellationToken) -> Result<(), ConformError> {
    if token.is_cancelled() {
        Err(ConformError::Cancelled)
    } else {
        Ok(())
    }
}

impl ConformError {
    pub(crate) fn collaborator(
        kind: &'static str,
        name: &str,
        operation: &'static str,
        detail: impl std::fmt::Display,
    ) -> Self {
        Self::Collaborator {
            collaborator: format!("{kind}:{name}"),
            operation: operation.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Aggregate error keyed by target name, returned alongside a partial
/// [`crate::response::ReviewResponse`] when `Review` fails for some targets
/// but not others.
#[derive(Debug, Default, Error)]
pub struct ErrorMap(pub HashMap<String, ConformError>);

impl std::fmt::Display for ErrorMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "no errors");
        }
        let mut keys: Vec<&String> = self.0.keys().collect();
        keys.sort();
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{key}: {}", self.0[*key])?;
        }
        Ok(())
    }
}

impl ErrorMap {
    /// Returns `true` if no target recorded an error.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn insert(&mut self, target: impl Into<String>, err: ConformError) {
        self.0.insert(target.into(), err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_map_display_sorted() {
        let mut map = ErrorMap::default();
        map.insert("zeta", ConformError::MissingTemplate { kind: "X".into() });
        map.insert("alpha", ConformError::MissingTemplate { kind: "Y".into() });
        let rendered = map.to_string();
        assert!(rendered.find("alpha").unwrap() < rendered.find("zeta").unwrap());
    }

    #[test]
    fn empty_error_map_display() {
        assert_eq!(ErrorMap::default().to_string(), "no errors");
    }

    #[test]
    fn check_cancelled_detects_fired_token() {
        let token = CancellationToken::new();
        assert!(check_cancelled(&token).is_ok());
        token.cancel();
        assert!(matches!(check_cancelled(&token), Err(ConformError::Cancelled)));
    }

    #[test]
    fn collaborator_error_formats_source() {
        let err = ConformError::collaborator("driver", "dA", "add_constraint", "boom");
        assert_eq!(
            err.to_string(),
            "driver:dA add_constraint failed: boom"
        );
    }
}
