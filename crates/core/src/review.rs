use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::constraint::Constraint;
use crate::constraint_client::{ConstraintClient, MatchOutcome};
use crate::driver::QueryOptions;
use crate::error::{check_cancelled, ConformError, ErrorMap};
use crate::registry::Registry;
use crate::response::{ConstraintResult, TargetResponse};

/// Options threaded through a [`Registry::review`] call.
#[derive(Debug, Clone, Default)]
pub struct ReviewOptions {
    /// Ask every queried driver for a human-readable evaluation trace.
    pub tracing: bool,
    /// Ask every queried driver for evaluation statistics.
    pub stats: bool,
    /// The caller-declared enforcement point this review originates from, if any.
    pub source_enforcement_point: Option<String>,
}

impl From<ReviewOptions> for QueryOptions {
    fn from(opts: ReviewOptions) -> Self {
        QueryOptions {
            tracing: opts.tracing,
            stats: opts.stats,
        }
    }
}

/// Result of [`Registry::review`]: per-target responses, plus any per-target
/// failures collected along the way.
#[derive(Debug, Default)]
pub struct ReviewOutcome {
    /// Successful per-target results, keyed by target (handler) name.
    pub responses: HashMap<String, TargetResponse>,
    /// Targets that failed during evaluation, keyed the same way.
    pub errors: ErrorMap,
}

struct TargetAccumulator {
    results: Vec<ConstraintResult>,
    trace: Option<String>,
    stats: Vec<serde_json::Value>,
    failed: Option<ConformError>,
}

impl TargetAccumulator {
    fn new() -> Self {
        Self {
            results: Vec::new(),
            trace: None,
            stats: Vec::new(),
            failed: None,
        }
    }

    fn push_trace(&mut self, driver: &str, trace: Option<String>) {
        if let Some(t) = trace {
            let entry = format!("[{driver}] {t}");
            match &mut self.trace {
                Some(existing) => {
                    existing.push_str("\n---\n");
                    existing.push_str(&entry);
                }
                None => self.trace = Some(entry),
            }
        }
    }
}

/// Run the review pipeline against a snapshot of
/// `clients`. Called by [`Registry::review`], which takes the clients-map
/// read lock only long enough to clone the `Arc`s.
#[instrument(skip(registry, clients, object, opts, cancellation))]
pub(crate) async fn review_object(
    registry: &Registry,
    clients: &[Arc<ConstraintClient>],
    object: &serde_json::Value,
    opts: ReviewOptions,
    cancellation: &CancellationToken,
) -> ReviewOutcome {
    // Step 1: fan out to every handler, recording the extracted payload per target.
    let mut payloads: HashMap<String, serde_json::Value> = HashMap::new();
    let mut accumulators: HashMap<String, TargetAccumulator> = HashMap::new();

    let mut handler_names: Vec<&String> = registry.handlers.keys().collect();
    handler_names.sort();
    for target in handler_names {
        if let Err(e) = check_cancelled(cancellation) {
            let mut acc = TargetAccumulator::new();
            acc.failed = Some(e);
            accumulators.insert(target.clone(), acc);
            continue;
        }
        let handler = &registry.handlers[target];
        match handler.handle_review(object).await {
            Ok(Some(payload)) => {
                payloads.insert(target.clone(), payload);
            }
            Ok(None) => continue,
            Err(e) => {
                warn!(target = %target, error = %e, "handler declined review with an error");
                let mut acc = TargetAccumulator::new();
                acc.failed = Some(ConformError::collaborator(
                    "handler",
                    target,
                    "handle_review",
                    e,
                ));
                accumulators.insert(target.clone(), acc);
            }
        }
    }

    // Steps 3-6: match, dispatch, filter by enforcement point, append auto-rejections.
    for (target, payload) in &payloads {
        let acc = accumulators
            .entry(target.clone())
            .or_insert_with(TargetAccumulator::new);
        if acc.failed.is_some() {
            continue;
        }
        if let Err(e) = check_cancelled(cancellation) {
            acc.failed = Some(e);
            continue;
        }

        // Step 3: match every client and bucket the applicable constraints by
        // the driver that will evaluate them, across every template routed to
        // that driver for this target -- not one bucket per client.
        let mut by_driver: HashMap<String, Vec<Constraint>> = HashMap::new();
        for client in clients {
            if acc.failed.is_some() {
                break;
            }
            if let Err(e) = check_cancelled(cancellation) {
                acc.failed = Some(e);
                break;
            }
            let matches = client.matches(target, payload).await;
            if matches.is_empty() {
                continue;
            }

            let mut applicable = Vec::new();
            for m in &matches {
                match &m.outcome {
                    MatchOutcome::Applicable => applicable.push(m.constraint.clone()),
                    MatchOutcome::AutoReject(err) => {
                        resolve_and_push(
                            acc,
                            &m.constraint,
                            format!("constraint matcher could not be evaluated: {err}"),
                            Some(serde_json::json!({"autoRejected": true, "reason": err.to_string()})),
                            opts.source_enforcement_point.as_deref(),
                            &registry.enforcement_points,
                        );
                    }
                }
            }

            if applicable.is_empty() {
                continue;
            }

            let Some(driver_name) = client.preferred_active_driver(&registry.driver_priority).await
            else {
                acc.failed = Some(ConformError::Review(format!(
                    "no active driver for template hosting constraints on target {target}"
                )));
                continue;
            };
            by_driver.entry(driver_name).or_default().extend(applicable);
        }

        if acc.failed.is_some() {
            continue;
        }

        // Step 4: one `query` call per (target, driver) pair.
        for (driver_name, constraints) in by_driver {
            if acc.failed.is_some() {
                break;
            }
            if let Err(e) = check_cancelled(cancellation) {
                acc.failed = Some(e);
                break;
            }
            let driver = &registry.drivers[&driver_name];
            let by_name: HashMap<&str, &Constraint> =
                constraints.iter().map(|c| (c.name.as_str(), c)).collect();

            let query_opts: QueryOptions = opts.clone().into();
            match driver.query(target, &constraints, payload, query_opts).await {
                Ok(resp) => {
                    acc.push_trace(&driver_name, resp.trace);
                    if let Some(stats) = resp.stats {
                        acc.stats.push(stats);
                    }
                    for violation in resp.violations {
                        let Some(constraint) = by_name.get(violation.constraint_name.as_str())
                        else {
                            continue;
                        };
                        resolve_and_push(
                            acc,
                            constraint,
                            violation.message,
                            violation.metadata,
                            opts.source_enforcement_point.as_deref(),
                            &registry.enforcement_points,
                        );
                    }
                }
                Err(e) => {
                    acc.failed = Some(ConformError::collaborator(
                        "driver",
                        &driver_name,
                        "query",
                        e,
                    ));
                }
            }
        }
    }

    // Step 7: sort and assemble the final outcome.
    let mut outcome = ReviewOutcome::default();
    for (target, acc) in accumulators {
        if let Some(err) = acc.failed {
            outcome.errors.insert(target, err);
            continue;
        }
        let mut response = TargetResponse {
            target: target.clone(),
            results: acc.results,
            trace: acc.trace,
            stats: if acc.stats.is_empty() {
                None
            } else {
                Some(acc.stats)
            },
        };
        response.sort();
        outcome.responses.insert(target, response);
    }
    outcome
}

fn resolve_and_push(
    acc: &mut TargetAccumulator,
    constraint: &Constraint,
    message: String,
    metadata: Option<serde_json::Value>,
    source_point: Option<&str>,
    supported: &std::collections::HashSet<String>,
) {
    match constraint.enforcement.resolve(source_point, supported) {
        Ok(Some(resolved)) => acc.results.push(ConstraintResult {
            message,
            constraint_kind: constraint.kind.clone(),
            constraint_name: constraint.name.clone(),
            enforcement_action: resolved.action,
            scoped_actions: resolved.scoped_actions,
            metadata,
        }),
        Ok(None) => {}
        Err(()) => {
            acc.failed = Some(ConformError::UnsupportedEnforcementPoints {
                kind: constraint.kind.clone(),
                name: constraint.name.clone(),
                source_point: source_point.map(str::to_string),
            });
        }
    }
}
