use async_trait::async_trait;

use crate::constraint::Constraint;
use crate::template::Template;

/// Options threaded through to a driver's `query` call, surfaced unchanged on
/// the per-target response.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Ask the driver to return a human-readable evaluation trace.
    pub tracing: bool,
    /// Ask the driver to return evaluation statistics.
    pub stats: bool,
}

/// A single violation reported by a driver for one constraint.
#[derive(Debug, Clone)]
pub struct DriverViolation {
    /// Name of the constraint that produced this violation.
    pub constraint_name: String,
    /// Human-readable violation message.
    pub message: String,
    /// Arbitrary structured metadata from the driver.
    pub metadata: Option<serde_json::Value>,
}

/// The result of [`Driver::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    /// Violations produced by the batch of constraints evaluated.
    pub violations: Vec<DriverViolation>,
    /// Evaluation trace, present only when [`QueryOptions::tracing`] was set.
    pub trace: Option<String>,
    /// Evaluation statistics, present only when [`QueryOptions::stats`] was set.
    pub stats: Option<serde_json::Value>,
}

/// Error surfaced by a [`Driver`] call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    /// Construct a driver error from any displayable detail.
    pub fn new(detail: impl std::fmt::Display) -> Self {
        Self(detail.to_string())
    }
}

/// A pluggable policy-evaluation engine. Out of scope for this crate's own
/// behavior (concrete drivers, e.g. a rules-language evaluator, belong to
/// downstream crates); this trait is the seam the core calls through.
///
/// Object-safe via `#[async_trait]` so the registry can hold configured
/// drivers as `Arc<dyn Driver>`, ordered by priority.
#[async_trait]
pub trait Driver: Send + Sync {
    /// The driver's unique name. Configured drivers must have distinct names
    /// (enforced at [`crate::builder::RegistryBuilder::build`] time).
    fn name(&self) -> &str;

    /// Accept a template's engine code block for this driver.
    ///
    /// Must fully reset any prior state for `template.name` -- the migration
    /// protocol relies on re-adding a template resetting a previously-retired
    /// driver's tenure rather than inheriting stale constraints.
    async fn add_template(&self, template: &Template) -> Result<(), DriverError>;

    /// Remove a template and all of its constraints from this driver.
    /// Idempotent: removing an unknown template succeeds.
    async fn remove_template(&self, template_name: &str) -> Result<(), DriverError>;

    /// Add a constraint under a template already added to this driver.
    async fn add_constraint(
        &self,
        template_name: &str,
        constraint: &Constraint,
    ) -> Result<(), DriverError>;

    /// Remove a constraint. Idempotent: removing an unknown constraint succeeds.
    async fn remove_constraint(
        &self,
        template_name: &str,
        constraint_name: &str,
    ) -> Result<(), DriverError>;

    /// Add referential data at `target_path` for use by matchers/evaluation.
    async fn add_data(
        &self,
        target_path: &str,
        data: &serde_json::Value,
    ) -> Result<(), DriverError>;

    /// Remove referential data at `target_path`.
    async fn remove_data(&self, target_path: &str) -> Result<(), DriverError>;

    /// Evaluate a batch of constraints against a review payload for one
    /// target. The batch may span several templates at once -- this is the
    /// only driver call the review pipeline issues per (target, driver) pair,
    /// regardless of how many templates route to this driver; each
    /// constraint's own `kind` identifies which template it belongs to.
    async fn query(
        &self,
        target: &str,
        constraints: &[Constraint],
        review_payload: &serde_json::Value,
        opts: QueryOptions,
    ) -> Result<QueryResponse, DriverError>;

    /// Human-readable description for a named statistic this driver reports,
    /// used by callers building dashboards. Defaults to the name unchanged.
    fn describe_stat(&self, _source: &str, name: &str) -> String {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopDriver;

    #[async_trait]
    impl Driver for NoopDriver {
        fn name(&self) -> &str {
            "noop"
        }

        async fn add_template(&self, _template: &Template) -> Result<(), DriverError> {
            Ok(())
        }

        async fn remove_template(&self, _template_name: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn add_constraint(
            &self,
            _template_name: &str,
            _constraint: &Constraint,
        ) -> Result<(), DriverError> {
            Ok(())
        }

        async fn remove_constraint(
            &self,
            _template_name: &str,
            _constraint_name: &str,
        ) -> Result<(), DriverError> {
            Ok(())
        }

        async fn add_data(
            &self,
            _target_path: &str,
            _data: &serde_json::Value,
        ) -> Result<(), DriverError> {
            Ok(())
        }

        async fn remove_data(&self, _target_path: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn query(
            &self,
            _target: &str,
            _constraints: &[Constraint],
            _review_payload: &serde_json::Value,
            _opts: QueryOptions,
        ) -> Result<QueryResponse, DriverError> {
            Ok(QueryResponse::default())
        }
    }

    #[tokio::test]
    async fn default_describe_stat_echoes_name() {
        let driver = NoopDriver;
        assert_eq!(driver.describe_stat("engine", "eval_ms"), "eval_ms");
        let resp = driver
            .query("h1", &[], &serde_json::json!({}), QueryOptions::default())
            .await
            .unwrap();
        assert!(resp.violations.is_empty());
    }
}
