use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConformError;

/// A single declared target for a [`Template`]: the name of the
/// [`crate::handler::TargetHandler`] that processes objects for this target,
/// plus the opaque engine code block for each driver that can evaluate it.
///
/// Engine code blocks are keyed by driver name. The core never inspects their
/// content; they are handed verbatim to [`crate::driver::Driver::add_template`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Name of the `TargetHandler` this target is processed by.
    pub handler: String,
    /// Driver name → opaque engine code payload.
    pub code: HashMap<String, serde_json::Value>,
}

impl Target {
    /// Create a target for `handler` with no engine code blocks yet.
    #[must_use]
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            code: HashMap::new(),
        }
    }

    /// Attach an engine code block for `driver`.
    #[must_use]
    pub fn with_code(mut self, driver: impl Into<String>, code: serde_json::Value) -> Self {
        self.code.insert(driver.into(), code);
        self
    }
}

/// A named declarative policy definition.
///
/// Invariant: `kind.to_lowercase() == name`. Enforced by [`Template::validate`],
/// not by the constructor, so callers can build a `Template` incrementally
/// before validating it (mirroring how the registry validates on ingress).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Unique name, canonically lowercase.
    pub name: String,
    /// Title-case name of the constraint type this template spawns.
    pub kind: String,
    /// Exactly one target is accepted by [`Template::validate`]; a `Vec` is
    /// used rather than an `Option<Target>` so a multi-target payload can be
    /// rejected with a specific error instead of silently truncating.
    pub targets: Vec<Target>,
}

impl Template {
    /// Construct a template. Does not validate; call [`Template::validate`]
    /// before registering it.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            targets: Vec::new(),
        }
    }

    /// Attach a target declaration.
    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    /// Validate structural invariants: non-empty name, `kind` lowercases to
    /// `name`, and exactly one target.
    pub fn validate(&self) -> Result<(), ConformError> {
        if self.name.is_empty() {
            return Err(ConformError::InvalidTemplate {
                name: self.name.clone(),
                reason: "name must not be empty".into(),
            });
        }
        if self.kind.to_lowercase() != self.name {
            return Err(ConformError::InvalidTemplate {
                name: self.name.clone(),
                reason: format!(
                    "kind {:?} does not lowercase to name {:?}",
                    self.kind, self.name
                ),
            });
        }
        match self.targets.len() {
            1 => Ok(()),
            0 => Err(ConformError::InvalidTemplate {
                name: self.name.clone(),
                reason: "exactly one target is required, found none".into(),
            }),
            n => Err(ConformError::InvalidTemplate {
                name: self.name.clone(),
                reason: format!("exactly one target is required, found {n} (multi-target is rejected)"),
            }),
        }
    }

    /// The template's single validated target. Panics if called before
    /// [`Template::validate`] has succeeded -- callers inside the registry
    /// always validate first.
    #[must_use]
    pub fn target(&self) -> &Target {
        &self.targets[0]
    }

    /// Choose the highest-priority driver (by position in `driver_priority`)
    /// whose name appears among this template's engine code blocks for its
    /// declared target.
    #[must_use]
    pub fn preferred_driver<'a>(&self, driver_priority: &'a [String]) -> Option<&'a str> {
        let code = &self.target().code;
        driver_priority
            .iter()
            .find(|name| code.contains_key(name.as_str()))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_template() -> Template {
        Template::new("deny", "Deny").with_target(
            Target::new("h1").with_code("dA", serde_json::json!({"rule": "always"})),
        )
    }

    #[test]
    fn validate_accepts_well_formed_template() {
        assert!(valid_template().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_name() {
        let tpl = Template::new("", "Deny").with_target(Target::new("h1"));
        assert!(matches!(
            tpl.validate(),
            Err(ConformError::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn validate_rejects_kind_name_mismatch() {
        let tpl = Template::new("deny", "Allow").with_target(Target::new("h1"));
        assert!(tpl.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_targets() {
        let tpl = Template::new("deny", "Deny");
        assert!(tpl.validate().is_err());
    }

    #[test]
    fn validate_rejects_multiple_targets() {
        let tpl = Template::new("deny", "Deny")
            .with_target(Target::new("h1"))
            .with_target(Target::new("h2"));
        assert!(tpl.validate().is_err());
    }

    #[test]
    fn preferred_driver_picks_highest_priority_match() {
        let tpl = Template::new("deny", "Deny").with_target(
            Target::new("h1")
                .with_code("dB", serde_json::json!({}))
                .with_code("dC", serde_json::json!({})),
        );
        let priority = vec!["dA".to_string(), "dB".to_string(), "dC".to_string()];
        assert_eq!(tpl.preferred_driver(&priority), Some("dB"));
    }

    #[test]
    fn preferred_driver_none_when_no_match() {
        let tpl = valid_template();
        let priority = vec!["dZ".to_string()];
        assert_eq!(tpl.preferred_driver(&priority), None);
    }
}
