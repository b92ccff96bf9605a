use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// An enforcement action scoped to a set of enforcement-point labels
/// (e.g. `"audit"`, `"webhook"`, or the wildcard `"*"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedEnforcementAction {
    /// The action to take, e.g. `"deny"`, `"dryrun"`, `"warn"`.
    pub action: String,
    /// Enforcement points this action applies to.
    pub points: HashSet<String>,
}

impl ScopedEnforcementAction {
    /// Construct a scoped action from an action name and an iterator of point labels.
    pub fn new(action: impl Into<String>, points: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            action: action.into(),
            points: points.into_iter().map(Into::into).collect(),
        }
    }

    fn matches_point(&self, point: &str) -> bool {
        self.points.contains(point) || self.points.contains("*")
    }

    fn intersects(&self, supported: &HashSet<String>) -> bool {
        self.points.contains("*") || self.points.iter().any(|p| supported.contains(p))
    }
}

/// Sum type for a Constraint's enforcement-action semantics: either a single
/// legacy action, or a list of actions each scoped to a set of enforcement
/// points. Preferred over a `"scoped"` string sentinel.
///
/// On the wire: `enforcementAction: "deny"` for [`EnforcementAction::Legacy`],
/// or `enforcementAction: "scoped"` plus a sibling `scopedEnforcementActions`
/// array for [`EnforcementAction::Scoped`]. Serde's built-in enum
/// representations can't express that shape directly (the tag value for the
/// scoped case is a fixed literal, not a variant name), so (de)serialization
/// is implemented by hand below.
#[derive(Debug, Clone, PartialEq)]
pub enum EnforcementAction {
    /// A single action surfaced for every review regardless of enforcement point.
    Legacy(String),
    /// Scoped actions; see [`ScopedEnforcementAction`].
    Scoped(Vec<ScopedEnforcementAction>),
}

#[derive(Serialize, Deserialize)]
struct EnforcementActionWire {
    #[serde(rename = "enforcementAction")]
    enforcement_action: String,
    #[serde(
        rename = "scopedEnforcementActions",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    scoped_enforcement_actions: Option<Vec<ScopedEnforcementAction>>,
}

impl Serialize for EnforcementAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            EnforcementAction::Legacy(action) => EnforcementActionWire {
                enforcement_action: action.clone(),
                scoped_enforcement_actions: None,
            },
            EnforcementAction::Scoped(actions) => EnforcementActionWire {
                enforcement_action: "scoped".into(),
                scoped_enforcement_actions: Some(actions.clone()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EnforcementAction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = EnforcementActionWire::deserialize(deserializer)?;
        if wire.enforcement_action == "scoped" {
            Ok(EnforcementAction::Scoped(
                wire.scoped_enforcement_actions.unwrap_or_default(),
            ))
        } else {
            Ok(EnforcementAction::Legacy(wire.enforcement_action))
        }
    }
}

/// A single enforcement action to attach to a produced violation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAction {
    /// The action name.
    pub action: String,
    /// `Some` only when the constraint is scoped; lists the action names that
    /// fired, surfaced as the scoped actions list on a produced result.
    pub scoped_actions: Option<Vec<String>>,
}

impl EnforcementAction {
    /// Resolve this enforcement action against a review's source enforcement
    /// point (if any) and the client's configured supported points.
    ///
    /// Returns `Ok(None)` when a scoped constraint produces no violation
    /// (nothing intersects) without that being an error -- that can only
    /// happen when `source_point` is empty and nothing intersects supported
    /// points. Returns `Err(())` when the caller declared an enforcement
    /// point that neither matches any scoped action nor is itself supported
    /// (`UnsupportedEnforcementPoints`, raised by the caller).
    pub fn resolve(
        &self,
        source_point: Option<&str>,
        supported: &HashSet<String>,
    ) -> Result<Option<ResolvedAction>, ()> {
        match self {
            EnforcementAction::Legacy(action) => Ok(Some(ResolvedAction {
                action: action.clone(),
                scoped_actions: None,
            })),
            EnforcementAction::Scoped(actions) => match source_point {
                None => {
                    let fired: Vec<String> = actions
                        .iter()
                        .filter(|a| a.intersects(supported))
                        .map(|a| a.action.clone())
                        .collect();
                    if fired.is_empty() {
                        Ok(None)
                    } else {
                        Ok(Some(ResolvedAction {
                            action: "scoped".into(),
                            scoped_actions: Some(fired),
                        }))
                    }
                }
                Some(point) => {
                    let fired: Vec<String> = actions
                        .iter()
                        .filter(|a| a.matches_point(point))
                        .map(|a| a.action.clone())
                        .collect();
                    if fired.is_empty() {
                        if supported.contains(point) {
                            Ok(None)
                        } else {
                            Err(())
                        }
                    } else {
                        Ok(Some(ResolvedAction {
                            action: "scoped".into(),
                            scoped_actions: Some(fired),
                        }))
                    }
                }
            },
        }
    }
}
