/// Error returned when a matcher cannot decide whether a constraint applies,
/// typically because required referential data is not cached. Distinct from
/// "the matcher evaluated to false" -- callers must not conflate the two.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct MatchError(pub String);

impl MatchError {
    /// Construct a match error from any displayable detail.
    pub fn new(detail: impl std::fmt::Display) -> Self {
        Self(detail.to_string())
    }
}

/// A pre-computed, per-constraint, per-target matcher built by
/// [`crate::handler::TargetHandler::to_matcher`].
///
/// Deliberately synchronous: matchers are expected to evaluate cheap,
/// in-memory predicates against the extracted review payload. Calls that need
/// to reach external state belong in the handler, not here.
pub trait Matcher: Send + Sync {
    /// Evaluate the matcher against an extracted review payload.
    fn matches(&self, review_payload: &serde_json::Value) -> Result<bool, MatchError>;
}

/// A matcher that always returns a fixed answer. Useful as a building block
/// in handler implementations and in tests.
pub struct AlwaysMatcher(pub bool);

impl Matcher for AlwaysMatcher {
    fn matches(&self, _review_payload: &serde_json::Value) -> Result<bool, MatchError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_matcher_true() {
        let m = AlwaysMatcher(true);
        assert!(m.matches(&serde_json::json!({})).unwrap());
    }

    #[test]
    fn always_matcher_false() {
        let m = AlwaysMatcher(false);
        assert!(!m.matches(&serde_json::json!({})).unwrap());
    }

    #[test]
    fn match_error_display() {
        let e = MatchError::new("cache miss for pod/ns1/foo");
        assert_eq!(e.to_string(), "cache miss for pod/ns1/foo");
    }
}
