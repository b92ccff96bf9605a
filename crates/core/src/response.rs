use serde::Serialize;

/// Outcome of [`crate::registry::Registry::add_template`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddTemplateResponse {
    /// The driver chosen to evaluate this template going forward.
    pub driver: String,
    /// Drivers that still hold stale state because step 4 of the migration
    /// protocol failed to remove them. Empty on a
    /// clean migration.
    pub stale_drivers: Vec<String>,
}

impl AddTemplateResponse {
    /// `true` when the migration completed without leaving any driver behind.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.stale_drivers.is_empty()
    }
}

/// Outcome of [`crate::registry::Registry::remove_template`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoveTemplateResponse {
    /// Target (handler) names the removed template covered. Empty if the
    /// template did not exist (idempotent removal).
    pub targets: Vec<String>,
}

/// A single produced violation, attributed to one constraint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstraintResult {
    /// Human-readable violation message.
    pub message: String,
    /// Kind of the constraint that produced this result.
    pub constraint_kind: String,
    /// Name of the constraint that produced this result.
    pub constraint_name: String,
    /// Resolved enforcement action, e.g. `"deny"`, `"warn"`, or `"scoped"`.
    pub enforcement_action: String,
    /// Present only for constraints using scoped enforcement actions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoped_actions: Option<Vec<String>>,
    /// Arbitrary metadata, from the driver or synthesized for auto-rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Results for a single target within a [`ReviewResponse`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct TargetResponse {
    /// The target (handler) name these results belong to.
    pub target: String,
    /// Results sorted by constraint kind, then name, then message.
    pub results: Vec<ConstraintResult>,
    /// Merged evaluation trace across all drivers queried for this target,
    /// present only when tracing was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    /// Merged evaluation statistics, present only when stats were requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<Vec<serde_json::Value>>,
}

impl TargetResponse {
    /// Sort `results` in place: by constraint kind, then name, then message.
    pub fn sort(&mut self) {
        self.results.sort_by(|a, b| {
            a.constraint_kind
                .cmp(&b.constraint_kind)
                .then_with(|| a.constraint_name.cmp(&b.constraint_name))
                .then_with(|| a.message.cmp(&b.message))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(kind: &str, name: &str, message: &str) -> ConstraintResult {
        ConstraintResult {
            message: message.into(),
            constraint_kind: kind.into(),
            constraint_name: name.into(),
            enforcement_action: "deny".into(),
            scoped_actions: None,
            metadata: None,
        }
    }

    #[test]
    fn sort_orders_by_kind_then_name_then_message() {
        let mut resp = TargetResponse {
            target: "h1".into(),
            results: vec![
                result("Deny", "c2", "z"),
                result("Allow", "c1", "a"),
                result("Deny", "c1", "b"),
                result("Deny", "c1", "a"),
            ],
            trace: None,
            stats: None,
        };
        resp.sort();
        let names: Vec<(&str, &str, &str)> = resp
            .results
            .iter()
            .map(|r| {
                (
                    r.constraint_kind.as_str(),
                    r.constraint_name.as_str(),
                    r.message.as_str(),
                )
            })
            .collect();
        assert_eq!(
            names,
            vec![
                ("Allow", "c1", "a"),
                ("Deny", "c1", "a"),
                ("Deny", "c1", "b"),
                ("Deny", "c2", "z"),
            ]
        );
    }

    #[test]
    fn add_template_response_is_clean_when_no_stale_drivers() {
        let resp = AddTemplateResponse {
            driver: "dA".into(),
            stale_drivers: vec![],
        };
        assert!(resp.is_clean());
    }

    #[test]
    fn add_template_response_not_clean_with_stale_drivers() {
        let resp = AddTemplateResponse {
            driver: "dB".into(),
            stale_drivers: vec!["dA".into()],
        };
        assert!(!resp.is_clean());
    }
}
