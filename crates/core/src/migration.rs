use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constraint_client::ConstraintClient;
use crate::driver::Driver;
use crate::error::{check_cancelled, ConformError};
use crate::response::AddTemplateResponse;
use crate::template::Template;

/// Run the migration protocol for `new_template` against `client`, whose
/// entry write lock is held for the entire duration -- driver calls are
/// permitted inside the critical section by design: the caller is expected
/// to serialize concurrent updates to the same template name.
///
/// `preferred` is the already-computed highest-priority driver whose name
/// appears in `new_template`'s engine code blocks for its declared target.
#[tracing::instrument(skip(client, drivers, new_template), fields(template = %new_template.name, preferred))]
pub(crate) async fn migrate_template(
    client: &Arc<ConstraintClient>,
    drivers: &HashMap<String, Arc<dyn Driver>>,
    new_template: Template,
    preferred: &str,
    cancellation: &CancellationToken,
) -> Result<AddTemplateResponse, ConformError> {
    let mut state = client.state.write().await;

    // Idempotent update: an identical template requires no driver calls at all.
    if state.template.as_ref() == Some(&new_template) {
        debug!("template unchanged, returning idempotent success");
        return Ok(AddTemplateResponse {
            driver: preferred.to_string(),
            stale_drivers: state
                .active_drivers
                .iter()
                .filter(|d| d.as_str() != preferred)
                .cloned()
                .collect(),
        });
    }

    let driver_new = drivers
        .get(preferred)
        .ok_or_else(|| ConformError::NoDriver {
            name: new_template.name.clone(),
        })?;

    // Step 2: AddTemplate on D_new. On error, abort leaving state unchanged.
    driver_new
        .add_template(&new_template)
        .await
        .map_err(|e| ConformError::collaborator("driver", preferred, "add_template", e))?;

    if let Err(e) = check_cancelled(cancellation) {
        let _ = driver_new.remove_template(&new_template.name).await;
        return Err(e);
    }

    // Step 3: re-add every current constraint on D_new, one at a time so a
    // mid-batch failure can be rolled back to exactly what landed.
    let current_constraints: Vec<_> = state
        .constraints
        .values()
        .map(|e| e.constraint.clone())
        .collect();

    let mut added_so_far = Vec::new();
    let mut step3_err = None;
    for constraint in &current_constraints {
        if let Err(e) = check_cancelled(cancellation) {
            step3_err = Some(e);
            break;
        }
        match driver_new
            .add_constraint(&new_template.name, constraint)
            .await
        {
            Ok(()) => added_so_far.push(constraint.name.clone()),
            Err(e) => {
                step3_err = Some(ConformError::collaborator(
                    "driver",
                    preferred,
                    "add_constraint",
                    e,
                ));
                break;
            }
        }
    }

    if let Some(err) = step3_err {
        for name in &added_so_far {
            let _ = driver_new.remove_constraint(&new_template.name, name).await;
        }
        let _ = driver_new.remove_template(&new_template.name).await;
        warn!(error = %err, "migration aborted during constraint re-add, rolled back new driver");
        return Err(err);
    }

    // Step 4: retire every old driver that isn't the new preferred one.
    let old_drivers: Vec<String> = state
        .active_drivers
        .iter()
        .filter(|d| d.as_str() != preferred)
        .cloned()
        .collect();

    let mut stale_drivers = Vec::new();
    for old_name in &old_drivers {
        if check_cancelled(cancellation).is_err() {
            debug!(driver = %old_name, "cancelled before retiring old driver, leaving it stale");
            stale_drivers.push(old_name.clone());
            continue;
        }
        let Some(old_driver) = drivers.get(old_name) else {
            continue;
        };
        match old_driver.remove_template(&new_template.name).await {
            Ok(()) => debug!(driver = %old_name, "retired old driver"),
            Err(e) => {
                warn!(driver = %old_name, error = %e, "old driver failed to retire, migration half-completed");
                stale_drivers.push(old_name.clone());
            }
        }
    }

    let mut new_active = stale_drivers.clone();
    new_active.push(preferred.to_string());
    state.active_drivers = new_active;
    state.template = Some(new_template);

    Ok(AddTemplateResponse {
        driver: preferred.to_string(),
        stale_drivers,
    })
}
