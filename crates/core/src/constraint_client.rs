use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::constraint::Constraint;
use crate::driver::Driver;
use crate::error::{check_cancelled, ConformError};
use crate::matcher::{MatchError, Matcher};
use crate::template::Template;

/// One constraint plus its pre-computed matcher for this template's single
/// target.
pub(crate) struct ConstraintEntry {
    pub constraint: Constraint,
    pub matcher: Box<dyn Matcher>,
}

/// Mutable state owned by one [`ConstraintClient`]. Guarded by
/// [`ConstraintClient::state`]; never accessed without holding that lock.
pub(crate) struct ClientState {
    /// `None` only for the brief window between creating a placeholder entry
    /// and its first successful migration; never observable outside this
    /// module (see [`super::registry::Registry::add_template`]).
    pub template: Option<Template>,
    pub constraints: BTreeMap<String, ConstraintEntry>,
    /// Ordered subset of the registry's configured driver priority list that
    /// currently holds this template's code and constraints.
    pub active_drivers: Vec<String>,
}

/// Per-template entry: owns one [`Template`], its [`Constraint`]s, their
/// matchers, and the set of drivers currently holding its code.
///
/// Guarded by a single `tokio::sync::RwLock` (not `parking_lot`) because
/// `AddConstraint`/`RemoveConstraint`/migration hold the write lock across
/// driver calls, which are `.await` points.
pub struct ConstraintClient {
    pub(crate) state: RwLock<ClientState>,
}

impl ConstraintClient {
    pub(crate) fn empty() -> Self {
        Self {
            state: RwLock::new(ClientState {
                template: None,
                constraints: BTreeMap::new(),
                active_drivers: Vec::new(),
            }),
        }
    }

    /// The template this entry holds, once populated. Returns a defensive
    /// clone so callers can't mutate the core's internal copy.
    pub async fn template(&self) -> Option<Template> {
        self.state.read().await.template.clone()
    }

    /// Snapshot of the currently registered constraints, sorted by name.
    pub async fn constraints(&self) -> Vec<Constraint> {
        self.state
            .read()
            .await
            .constraints
            .values()
            .map(|e| e.constraint.clone())
            .collect()
    }

    /// Snapshot of the active drivers set, in configured priority order.
    pub async fn active_drivers(&self) -> Vec<String> {
        self.state.read().await.active_drivers.clone()
    }
}

/// Outcome of applying one constraint's matcher to a review payload.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// The matcher evaluated to true: this constraint applies.
    Applicable,
    /// The matcher could not decide (e.g. missing cached data). Becomes an
    /// auto-rejection result rather than being silently dropped.
    AutoReject(MatchError),
}

/// One constraint's outcome against a review payload, for one target.
#[derive(Clone)]
pub struct MatchResult {
    pub constraint: Constraint,
    pub outcome: MatchOutcome,
}

impl ConstraintClient {
    /// Apply every constraint's matcher for `target` against `review_payload`.
    ///
    /// Returns only constraints that are applicable or auto-rejected; a
    /// matcher returning `Ok(false)` ("no match") is silently excluded and
    /// never conflated with a matcher that could not decide. Results are
    /// stable-sorted by constraint name because `constraints` is a `BTreeMap`.
    ///
    /// Returns an empty list immediately if this entry's template does not
    /// declare `target` -- a registry may hold templates for several
    /// `TargetHandler`s at once.
    pub async fn matches(
        &self,
        target: &str,
        review_payload: &serde_json::Value,
    ) -> Vec<MatchResult> {
        let state = self.state.read().await;
        let Some(template) = state.template.as_ref() else {
            return Vec::new();
        };
        if template.target().handler != target {
            return Vec::new();
        }
        state
            .constraints
            .values()
            .filter_map(|entry| match entry.matcher.matches(review_payload) {
                Ok(true) => Some(MatchResult {
                    constraint: entry.constraint.clone(),
                    outcome: MatchOutcome::Applicable,
                }),
                Ok(false) => None,
                Err(e) => Some(MatchResult {
                    constraint: entry.constraint.clone(),
                    outcome: MatchOutcome::AutoReject(e),
                }),
            })
            .collect()
    }

    /// The driver that will evaluate this entry's constraints: the first
    /// driver in `driver_priority` order that is in the active drivers set.
    pub async fn preferred_active_driver(&self, driver_priority: &[String]) -> Option<String> {
        let state = self.state.read().await;
        driver_priority
            .iter()
            .find(|name| state.active_drivers.contains(name))
            .cloned()
    }
}

/// Fan out `AddConstraint` to every driver in the active drivers set, rolling
/// back on the first failure by calling `RemoveConstraint` on the drivers
/// that already succeeded.
pub(crate) async fn add_constraint_to_active_drivers(
    drivers: &HashMap<String, Arc<dyn Driver>>,
    active: &[String],
    template_name: &str,
    constraint: &Constraint,
    cancellation: &CancellationToken,
) -> Result<(), ConformError> {
    let mut succeeded = Vec::new();
    for driver_name in active {
        if let Err(e) = check_cancelled(cancellation) {
            for done in &succeeded {
                if let Some(d) = drivers.get(done) {
                    let _ = d.remove_constraint(template_name, &constraint.name).await;
                }
            }
            return Err(e);
        }
        let Some(driver) = drivers.get(driver_name) else {
            continue;
        };
        match driver.add_constraint(template_name, constraint).await {
            Ok(()) => succeeded.push(driver_name.clone()),
            Err(e) => {
                for done in &succeeded {
                    if let Some(d) = drivers.get(done) {
                        let _ = d.remove_constraint(template_name, &constraint.name).await;
                    }
                }
                return Err(ConformError::collaborator(
                    "driver",
                    driver_name,
                    "add_constraint",
                    e,
                ));
            }
        }
    }
    Ok(())
}

/// Fan out `RemoveConstraint` to every driver in the active drivers set.
/// Errors are collected; the caller only drops the constraint from this
/// entry's state if every active driver succeeded.
pub(crate) async fn remove_constraint_from_active_drivers(
    drivers: &HashMap<String, Arc<dyn Driver>>,
    active: &[String],
    template_name: &str,
    constraint_name: &str,
    cancellation: &CancellationToken,
) -> Result<(), ConformError> {
    for driver_name in active {
        check_cancelled(cancellation)?;
        let Some(driver) = drivers.get(driver_name) else {
            continue;
        };
        driver
            .remove_constraint(template_name, constraint_name)
            .await
            .map_err(|e| ConformError::collaborator("driver", driver_name, "remove_constraint", e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryDriver;

    #[tokio::test]
    async fn add_constraint_fans_out_to_every_active_driver() {
        let d_a = Arc::new(MemoryDriver::new("dA"));
        let d_b = Arc::new(MemoryDriver::new("dB"));
        let drivers: HashMap<String, Arc<dyn Driver>> = [
            ("dA".to_string(), Arc::clone(&d_a) as Arc<dyn Driver>),
            ("dB".to_string(), Arc::clone(&d_b) as Arc<dyn Driver>),
        ]
        .into_iter()
        .collect();
        let active = vec!["dA".to_string(), "dB".to_string()];
        let constraint = Constraint::new("Deny", "c1", "deny");
        add_constraint_to_active_drivers(
            &drivers,
            &active,
            "deny",
            &constraint,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(d_a.holds_constraint("deny", "c1"));
        assert!(d_b.holds_constraint("deny", "c1"));
    }

    #[tokio::test]
    async fn add_constraint_respects_cancellation() {
        let d_a: Arc<dyn Driver> = Arc::new(MemoryDriver::new("dA"));
        let drivers: HashMap<String, Arc<dyn Driver>> = [("dA".to_string(), d_a)].into_iter().collect();
        let active = vec!["dA".to_string()];
        let constraint = Constraint::new("Deny", "c1", "deny");
        let token = CancellationToken::new();
        token.cancel();
        let result =
            add_constraint_to_active_drivers(&drivers, &active, "deny", &constraint, &token).await;
        assert!(matches!(result, Err(ConformError::Cancelled)));
    }

    #[tokio::test]
    async fn client_matches_empty_when_target_mismatched() {
        let client = ConstraintClient::empty();
        let tpl = Template::new("deny", "Deny").with_target(crate::template::Target::new("h1"));
        client.state.write().await.template = Some(tpl);
        let results = client.matches("h2", &serde_json::json!({})).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn preferred_active_driver_picks_first_priority_match() {
        let client = ConstraintClient::empty();
        client.state.write().await.active_drivers = vec!["dB".to_string(), "dC".to_string()];
        let priority = vec!["dA".to_string(), "dB".to_string(), "dC".to_string()];
        assert_eq!(
            client.preferred_active_driver(&priority).await,
            Some("dB".to_string())
        );
    }
}
