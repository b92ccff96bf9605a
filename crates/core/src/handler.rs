use async_trait::async_trait;

use crate::constraint::Constraint;
use crate::matcher::{MatchError, Matcher};

/// Outcome of [`TargetHandler::process_data`]: whether this handler accepted
/// the referential-data object, and if so, the key path it should be
/// addressed by and the processed payload to cache.
#[derive(Debug, Clone)]
pub struct ProcessedData {
    /// Dotted/slashed key path identifying where this data lives, as chosen
    /// by the handler.
    pub key_path: String,
    /// The handler's normalized view of the object.
    pub payload: serde_json::Value,
}

/// Per-target domain adapter. Out of scope for this crate's own behavior
/// (concrete handlers belong to downstream crates); this trait is the seam
/// the core calls through.
///
/// Object-safe via `#[async_trait]` so the registry can hold
/// `Arc<dyn TargetHandler>` for each configured target.
#[async_trait]
pub trait TargetHandler: Send + Sync {
    /// The handler's unique name, matched against [`crate::template::Target::handler`].
    fn name(&self) -> &str;

    /// Accept or reject a referential-data object and extract its cache
    /// representation. Returns `Ok(None)` when this handler does not handle
    /// the object.
    async fn process_data(
        &self,
        object: &serde_json::Value,
    ) -> Result<Option<ProcessedData>, HandlerError>;

    /// Remove a previously-processed referential-data object by key path.
    async fn remove_data(&self, key_path: &str) -> Result<(), HandlerError>;

    /// Accept or reject a review object and extract its review payload.
    /// Returns `Ok(None)` when this handler declines the object (the target
    /// is skipped for this review).
    async fn handle_review(
        &self,
        object: &serde_json::Value,
    ) -> Result<Option<serde_json::Value>, HandlerError>;

    /// Build an executable matcher for a constraint's match predicate.
    async fn to_matcher(&self, constraint: &Constraint) -> Result<Box<dyn Matcher>, HandlerError>;

    /// Validate a constraint's match predicate against this handler's rules
    /// (beyond generic schema validation).
    async fn validate_constraint(&self, constraint: &Constraint) -> Result<(), HandlerError>;

    /// The CRD-like schema this handler expects match predicates to conform to.
    fn match_schema(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Error surfaced by a [`TargetHandler`] call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Construct a handler error from any displayable detail.
    pub fn new(detail: impl std::fmt::Display) -> Self {
        Self(detail.to_string())
    }
}

impl From<MatchError> for HandlerError {
    fn from(e: MatchError) -> Self {
        Self(e.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHandler;

    #[async_trait]
    impl TargetHandler for NullHandler {
        fn name(&self) -> &str {
            "null"
        }

        async fn process_data(
            &self,
            _object: &serde_json::Value,
        ) -> Result<Option<ProcessedData>, HandlerError> {
            Ok(None)
        }

        async fn remove_data(&self, _key_path: &str) -> Result<(), HandlerError> {
            Ok(())
        }

        async fn handle_review(
            &self,
            _object: &serde_json::Value,
        ) -> Result<Option<serde_json::Value>, HandlerError> {
            Ok(None)
        }

        async fn to_matcher(
            &self,
            _constraint: &Constraint,
        ) -> Result<Box<dyn Matcher>, HandlerError> {
            Err(HandlerError::new("no matchers supported"))
        }

        async fn validate_constraint(&self, _constraint: &Constraint) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn default_match_schema_is_null() {
        let handler = NullHandler;
        assert_eq!(handler.match_schema(), serde_json::Value::Null);
        assert_eq!(handler.name(), "null");
        assert!(handler.handle_review(&serde_json::json!({})).await.unwrap().is_none());
    }
}
