//! In-memory [`Driver`] and [`TargetHandler`] fixtures for exercising the
//! registry end to end without a real policy-evaluation engine.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::constraint::Constraint;
use crate::driver::{Driver, DriverError, DriverViolation, QueryOptions, QueryResponse};
use crate::handler::{HandlerError, ProcessedData, TargetHandler};
use crate::matcher::{AlwaysMatcher, MatchError, Matcher};
use crate::template::Template;

/// Matcher that compares one field of the review payload against a fixed value.
struct FieldEqualsMatcher {
    field: String,
    value: serde_json::Value,
}

impl Matcher for FieldEqualsMatcher {
    fn matches(&self, review_payload: &serde_json::Value) -> Result<bool, MatchError> {
        Ok(review_payload.get(&self.field) == Some(&self.value))
    }
}

/// Matcher that always fails to decide, to exercise the auto-rejection path.
struct AutoRejectMatcher(String);

impl Matcher for AutoRejectMatcher {
    fn matches(&self, _review_payload: &serde_json::Value) -> Result<bool, MatchError> {
        Err(MatchError::new(self.0.clone()))
    }
}

#[derive(Default)]
struct HandlerState {
    data: HashMap<String, serde_json::Value>,
}

/// A [`TargetHandler`] fixture keyed by name. Accepts any object shaped
/// `{"handler": <name>, "review": <payload>}` for reviews and
/// `{"handler": <name>, "key": <path>, "data": <payload>}` for referential data.
///
/// Match predicates (`Constraint::spec`) are interpreted as:
/// - `null` or `{}` → matches every review (see [`AlwaysMatcher`])
/// - `{"field": <name>, "value": <v>}` → matches when the payload's `<name>`
///   equals `<v>`
/// - `{"autoReject": <message>}` → always auto-rejects with `<message>`
pub struct MemoryHandler {
    name: String,
    state: Mutex<HandlerState>,
}

impl MemoryHandler {
    /// Construct a handler fixture named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(HandlerState::default()),
        }
    }

    /// Referential data currently cached under `key_path`, if any.
    pub fn cached(&self, key_path: &str) -> Option<serde_json::Value> {
        self.state.lock().unwrap().data.get(key_path).cloned()
    }

    fn owns(&self, object: &serde_json::Value) -> bool {
        object.get("handler").and_then(|v| v.as_str()) == Some(self.name.as_str())
    }
}

#[async_trait]
impl TargetHandler for MemoryHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process_data(
        &self,
        object: &serde_json::Value,
    ) -> Result<Option<ProcessedData>, HandlerError> {
        if !self.owns(object) {
            return Ok(None);
        }
        let key_path = object
            .get("key")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerError::new("missing key path"))?
            .to_string();
        let payload = object.get("data").cloned().unwrap_or(serde_json::Value::Null);
        self.state
            .lock()
            .unwrap()
            .data
            .insert(key_path.clone(), payload.clone());
        Ok(Some(ProcessedData { key_path, payload }))
    }

    async fn remove_data(&self, key_path: &str) -> Result<(), HandlerError> {
        self.state.lock().unwrap().data.remove(key_path);
        Ok(())
    }

    async fn handle_review(
        &self,
        object: &serde_json::Value,
    ) -> Result<Option<serde_json::Value>, HandlerError> {
        if !self.owns(object) {
            return Ok(None);
        }
        Ok(Some(
            object.get("review").cloned().unwrap_or(serde_json::Value::Null),
        ))
    }

    async fn to_matcher(&self, constraint: &Constraint) -> Result<Box<dyn Matcher>, HandlerError> {
        match &constraint.spec {
            serde_json::Value::Object(map) if map.contains_key("autoReject") => {
                let message = map["autoReject"]
                    .as_str()
                    .unwrap_or("auto-rejected")
                    .to_string();
                Ok(Box::new(AutoRejectMatcher(message)))
            }
            serde_json::Value::Object(map) if map.contains_key("field") => {
                let field = map["field"]
                    .as_str()
                    .ok_or_else(|| HandlerError::new("field must be a string"))?
                    .to_string();
                let value = map.get("value").cloned().unwrap_or(serde_json::Value::Null);
                Ok(Box::new(FieldEqualsMatcher { field, value }))
            }
            _ => Ok(Box::new(AlwaysMatcher(true))),
        }
    }

    async fn validate_constraint(&self, _constraint: &Constraint) -> Result<(), HandlerError> {
        Ok(())
    }
}

#[derive(Default)]
struct DriverState {
    templates: HashMap<String, Template>,
    constraints: HashMap<String, HashSet<String>>,
}

/// A [`Driver`] fixture keyed by name. Tracks which templates/constraints it
/// currently holds, and can be configured to fail specific operations so
/// tests can exercise rollback paths.
///
/// A constraint produces a violation when its `spec` object carries a
/// `"message"` field; constraints with no such field never violate.
pub struct MemoryDriver {
    name: String,
    state: Mutex<DriverState>,
    fail_add_template: HashSet<String>,
    fail_add_constraint: HashSet<String>,
    fail_remove_template: HashSet<String>,
    query_calls: std::sync::atomic::AtomicUsize,
}

impl MemoryDriver {
    /// Construct a driver fixture named `name` with no configured failures.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(DriverState::default()),
            fail_add_template: HashSet::new(),
            fail_add_constraint: HashSet::new(),
            fail_remove_template: HashSet::new(),
            query_calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// How many times [`Driver::query`] has been called on this fixture so
    /// far. Lets tests assert that constraints sharing a driver are batched
    /// into a single call instead of one call per template.
    pub fn query_call_count(&self) -> usize {
        self.query_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Make `add_template` fail for this exact template name.
    #[must_use]
    pub fn failing_add_template(mut self, template_name: impl Into<String>) -> Self {
        self.fail_add_template.insert(template_name.into());
        self
    }

    /// Make `add_constraint` fail for this exact constraint name.
    #[must_use]
    pub fn failing_add_constraint(mut self, constraint_name: impl Into<String>) -> Self {
        self.fail_add_constraint.insert(constraint_name.into());
        self
    }

    /// Make `remove_template` fail for this exact template name.
    #[must_use]
    pub fn failing_remove_template(mut self, template_name: impl Into<String>) -> Self {
        self.fail_remove_template.insert(template_name.into());
        self
    }

    /// Whether this driver currently holds `template_name`.
    pub fn holds_template(&self, template_name: &str) -> bool {
        self.state.lock().unwrap().templates.contains_key(template_name)
    }

    /// Whether this driver currently holds `constraint_name` under `template_name`.
    pub fn holds_constraint(&self, template_name: &str, constraint_name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .constraints
            .get(template_name)
            .is_some_and(|c| c.contains(constraint_name))
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add_template(&self, template: &Template) -> Result<(), DriverError> {
        if self.fail_add_template.contains(&template.name) {
            return Err(DriverError::new(format!(
                "configured failure adding template {}",
                template.name
            )));
        }
        let mut state = self.state.lock().unwrap();
        state.templates.insert(template.name.clone(), template.clone());
        state.constraints.entry(template.name.clone()).or_default();
        Ok(())
    }

    async fn remove_template(&self, template_name: &str) -> Result<(), DriverError> {
        if self.fail_remove_template.contains(template_name) {
            return Err(DriverError::new(format!(
                "configured failure removing template {template_name}"
            )));
        }
        let mut state = self.state.lock().unwrap();
        state.templates.remove(template_name);
        state.constraints.remove(template_name);
        Ok(())
    }

    async fn add_constraint(
        &self,
        template_name: &str,
        constraint: &Constraint,
    ) -> Result<(), DriverError> {
        if self.fail_add_constraint.contains(&constraint.name) {
            return Err(DriverError::new(format!(
                "configured failure adding constraint {}",
                constraint.name
            )));
        }
        self.state
            .lock()
            .unwrap()
            .constraints
            .entry(template_name.to_string())
            .or_default()
            .insert(constraint.name.clone());
        Ok(())
    }

    async fn remove_constraint(
        &self,
        template_name: &str,
        constraint_name: &str,
    ) -> Result<(), DriverError> {
        if let Some(set) = self.state.lock().unwrap().constraints.get_mut(template_name) {
            set.remove(constraint_name);
        }
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
        constraints: &[Constraint],
        _review_payload: &serde_json::Value,
        opts: QueryOptions,
    ) -> Result<QueryResponse, DriverError> {
        self.query_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let violations = constraints
            .iter()
            .filter_map(|c| {
                c.spec
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(|message| DriverViolation {
                        constraint_name: c.name.clone(),
                        message: message.to_string(),
                        metadata: None,
                    })
            })
            .collect();
        Ok(QueryResponse {
            violations,
            trace: opts.tracing.then(|| format!("{} evaluated batch", self.name)),
            stats: opts
                .stats
                .then(|| serde_json::json!({"driver": self.name, "evaluated": constraints.len()})),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_handler_ignores_objects_it_does_not_own() {
        let handler = MemoryHandler::new("pods");
        let result = handler
            .handle_review(&serde_json::json!({"handler": "other"}))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn memory_driver_reports_configured_violations() {
        let driver = MemoryDriver::new("dA");
        let constraint =
            Constraint::new("Deny", "c1", "deny").with_spec(serde_json::json!({"message": "nope"}));
        let resp = driver
            .query(
                "h1",
                std::slice::from_ref(&constraint),
                &serde_json::json!({}),
                QueryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(resp.violations.len(), 1);
        assert_eq!(resp.violations[0].message, "nope");
    }

    #[tokio::test]
    async fn memory_driver_configured_failure() {
        let driver = MemoryDriver::new("dA").failing_add_template("deny");
        let tpl = Template::new("deny", "Deny")
            .with_target(crate::template::Target::new("h1").with_code("dA", serde_json::json!({})));
        assert!(driver.add_template(&tpl).await.is_err());
    }
}
