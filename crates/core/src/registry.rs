use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock as AsyncRwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::constraint::Constraint;
use crate::constraint_client::{
    add_constraint_to_active_drivers, remove_constraint_from_active_drivers, ConstraintClient,
};
use crate::driver::Driver;
use crate::error::{check_cancelled, ConformError};
use crate::handler::TargetHandler;
use crate::migration::migrate_template;
use crate::response::{AddTemplateResponse, RemoveTemplateResponse};
use crate::review::{review_object, ReviewOptions, ReviewOutcome};
use crate::template::Template;

/// The policy-constraint registry: owns every configured [`TargetHandler`]
/// and [`Driver`], and one [`ConstraintClient`] per registered template.
///
/// Constructed via [`crate::builder::RegistryBuilder`].
pub struct Registry {
    pub(crate) handlers: HashMap<String, Arc<dyn TargetHandler>>,
    pub(crate) drivers: HashMap<String, Arc<dyn Driver>>,
    pub(crate) driver_priority: Vec<String>,
    pub(crate) enforcement_points: HashSet<String>,
    clients: AsyncRwLock<HashMap<String, Arc<ConstraintClient>>>,
}

impl Registry {
    pub(crate) fn new(
        handlers: HashMap<String, Arc<dyn TargetHandler>>,
        drivers: HashMap<String, Arc<dyn Driver>>,
        driver_priority: Vec<String>,
        enforcement_points: HashSet<String>,
    ) -> Self {
        Self {
            handlers,
            drivers,
            driver_priority,
            enforcement_points,
            clients: AsyncRwLock::new(HashMap::new()),
        }
    }

    /// Fetch (or idempotently create) the entry for `name`, so that
    /// concurrent calls for the same template serialize on its own lock
    /// rather than the registry-wide clients map.
    async fn client_for(&self, name: &str) -> Arc<ConstraintClient> {
        if let Some(existing) = self.clients.read().await.get(name) {
            return Arc::clone(existing);
        }
        let mut guard = self.clients.write().await;
        Arc::clone(
            guard
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(ConstraintClient::empty())),
        )
    }

    async fn existing_client(&self, name: &str) -> Option<Arc<ConstraintClient>> {
        self.clients.read().await.get(name).cloned()
    }

    /// Register or migrate a template.
    #[instrument(skip(self, template), fields(template = %template.name))]
    pub async fn add_template(
        &self,
        template: Template,
        cancellation: &CancellationToken,
    ) -> Result<AddTemplateResponse, ConformError> {
        template.validate()?;

        let handler_name = &template.target().handler;
        if !self.handlers.contains_key(handler_name) {
            return Err(ConformError::InvalidTemplate {
                name: template.name.clone(),
                reason: format!("no target handler registered named {handler_name:?}"),
            });
        }

        let preferred = template
            .preferred_driver(&self.driver_priority)
            .ok_or_else(|| ConformError::NoDriver {
                name: template.name.clone(),
            })?
            .to_string();

        check_cancelled(cancellation)?;
        let client = self.client_for(&template.name).await;
        migrate_template(&client, &self.drivers, template, &preferred, cancellation).await
    }

    /// Remove a template and every constraint it owns. Idempotent: removing an unknown template succeeds
    /// with an empty response.
    #[instrument(skip(self))]
    pub async fn remove_template(
        &self,
        name: &str,
        cancellation: &CancellationToken,
    ) -> Result<RemoveTemplateResponse, ConformError> {
        let Some(client) = self.existing_client(name).await else {
            return Ok(RemoveTemplateResponse::default());
        };

        let mut state = client.state.write().await;
        let Some(template) = state.template.clone() else {
            return Ok(RemoveTemplateResponse::default());
        };

        for driver_name in &state.active_drivers {
            if check_cancelled(cancellation).is_err() {
                debug!(driver = %driver_name, "cancelled before removing template from remaining drivers");
                break;
            }
            if let Some(driver) = self.drivers.get(driver_name) {
                if let Err(e) = driver.remove_template(name).await {
                    debug!(driver = %driver_name, error = %e, "remove_template on driver failed, continuing cascade");
                }
            }
        }

        state.template = None;
        state.constraints.clear();
        state.active_drivers.clear();
        drop(state);

        self.clients.write().await.remove(name);

        Ok(RemoveTemplateResponse {
            targets: vec![template.target().handler.clone()],
        })
    }

    /// Fetch a registered template's current definition, if any.
    pub async fn get_template(&self, name: &str) -> Option<Template> {
        let client = self.existing_client(name).await?;
        client.template().await
    }

    /// Add (or replace) a constraint under its owning template.
    #[instrument(skip(self, constraint), fields(kind = %constraint.kind, name = %constraint.name))]
    pub async fn add_constraint(
        &self,
        constraint: Constraint,
        cancellation: &CancellationToken,
    ) -> Result<(), ConformError> {
        constraint.validate_metadata()?;
        let template_name = constraint.kind.to_lowercase();

        let client = self
            .existing_client(&template_name)
            .await
            .ok_or_else(|| ConformError::MissingTemplate {
                kind: constraint.kind.clone(),
            })?;

        let mut state = client.state.write().await;
        let template = state
            .template
            .clone()
            .ok_or_else(|| ConformError::MissingTemplate {
                kind: constraint.kind.clone(),
            })?;

        if state
            .constraints
            .get(&constraint.name)
            .is_some_and(|entry| entry.constraint == constraint)
        {
            debug!(kind = %constraint.kind, name = %constraint.name, "constraint unchanged, returning idempotent success");
            return Ok(());
        }

        let handler = self.handler_for(&template.target().handler)?;
        handler
            .validate_constraint(&constraint)
            .await
            .map_err(|e| ConformError::InvalidConstraint {
                kind: constraint.kind.clone(),
                name: constraint.name.clone(),
                reason: e.to_string(),
            })?;
        let matcher = handler
            .to_matcher(&constraint)
            .await
            .map_err(|e| ConformError::InvalidConstraint {
                kind: constraint.kind.clone(),
                name: constraint.name.clone(),
                reason: e.to_string(),
            })?;

        add_constraint_to_active_drivers(
            &self.drivers,
            &state.active_drivers,
            &template.name,
            &constraint,
            cancellation,
        )
        .await?;

        state.constraints.insert(
            constraint.name.clone(),
            crate::constraint_client::ConstraintEntry {
                constraint,
                matcher,
            },
        );
        Ok(())
    }

    /// Remove a constraint. Idempotent: removing an unregistered constraint
    /// succeeds.
    #[instrument(skip(self))]
    pub async fn remove_constraint(
        &self,
        kind: &str,
        name: &str,
        cancellation: &CancellationToken,
    ) -> Result<(), ConformError> {
        let template_name = kind.to_lowercase();
        let Some(client) = self.existing_client(&template_name).await else {
            return Ok(());
        };

        let mut state = client.state.write().await;
        if !state.constraints.contains_key(name) {
            return Ok(());
        }

        remove_constraint_from_active_drivers(
            &self.drivers,
            &state.active_drivers,
            &template_name,
            name,
            cancellation,
        )
        .await?;

        state.constraints.remove(name);
        Ok(())
    }

    /// Fetch a single constraint by kind and name.
    pub async fn get_constraint(&self, kind: &str, name: &str) -> Option<Constraint> {
        let client = self.existing_client(&kind.to_lowercase()).await?;
        client
            .constraints()
            .await
            .into_iter()
            .find(|c| c.name == name)
    }

    /// Validate a constraint's metadata and target-specific schema without
    /// registering it.
    pub async fn validate_constraint(&self, constraint: &Constraint) -> Result<(), ConformError> {
        constraint.validate_metadata()?;
        let template_name = constraint.kind.to_lowercase();
        let client = self
            .existing_client(&template_name)
            .await
            .ok_or_else(|| ConformError::MissingTemplate {
                kind: constraint.kind.clone(),
            })?;
        let template = client
            .template()
            .await
            .ok_or_else(|| ConformError::MissingTemplate {
                kind: constraint.kind.clone(),
            })?;
        let handler = self.handler_for(&template.target().handler)?;
        handler
            .validate_constraint(constraint)
            .await
            .map_err(|e| ConformError::InvalidConstraint {
                kind: constraint.kind.clone(),
                name: constraint.name.clone(),
                reason: e.to_string(),
            })
    }

    /// Forward a referential-data object to every [`TargetHandler`] that
    /// accepts it, then to every configured driver.
    pub async fn add_data(
        &self,
        object: &serde_json::Value,
        cancellation: &CancellationToken,
    ) -> Result<bool, ConformError> {
        let accepted = self.process_with_every_handler(object, cancellation).await?;
        if accepted.is_empty() {
            return Ok(false);
        }

        for (handler_name, processed) in &accepted {
            for (driver_name, driver) in &self.drivers {
                check_cancelled(cancellation)?;
                driver
                    .add_data(&processed.key_path, &processed.payload)
                    .await
                    .map_err(|e| ConformError::collaborator("driver", driver_name, "add_data", e))?;
            }
            debug!(handler = %handler_name, key_path = %processed.key_path, "referential data added");
        }
        Ok(true)
    }

    /// Forward removal of a referential-data object by re-deriving its key
    /// path from every handler that accepts it, then forwarding to every
    /// configured driver.
    pub async fn remove_data(
        &self,
        object: &serde_json::Value,
        cancellation: &CancellationToken,
    ) -> Result<bool, ConformError> {
        let accepted = self.process_with_every_handler(object, cancellation).await?;
        if accepted.is_empty() {
            return Ok(false);
        }

        for (handler_name, processed) in &accepted {
            self.handlers[handler_name]
                .remove_data(&processed.key_path)
                .await
                .map_err(|e| ConformError::collaborator("handler", handler_name, "remove_data", e))?;

            for (driver_name, driver) in &self.drivers {
                check_cancelled(cancellation)?;
                driver
                    .remove_data(&processed.key_path)
                    .await
                    .map_err(|e| ConformError::collaborator("driver", driver_name, "remove_data", e))?;
            }
        }
        Ok(true)
    }

    async fn process_with_every_handler(
        &self,
        object: &serde_json::Value,
        cancellation: &CancellationToken,
    ) -> Result<Vec<(String, crate::handler::ProcessedData)>, ConformError> {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        let mut accepted = Vec::new();
        for name in names {
            check_cancelled(cancellation)?;
            let handler = &self.handlers[name];
            match handler.process_data(object).await {
                Ok(Some(processed)) => accepted.push((name.clone(), processed)),
                Ok(None) => continue,
                Err(e) => {
                    return Err(ConformError::collaborator("handler", name, "process_data", e))
                }
            }
        }
        Ok(accepted)
    }

    fn handler_for(&self, name: &str) -> Result<&Arc<dyn TargetHandler>, ConformError> {
        self.handlers.get(name).ok_or_else(|| ConformError::InvalidTemplate {
            name: name.to_string(),
            reason: format!("no target handler registered named {name:?}"),
        })
    }

    /// Evaluate `object` against every applicable constraint.
    pub async fn review(
        &self,
        object: &serde_json::Value,
        opts: ReviewOptions,
        cancellation: &CancellationToken,
    ) -> ReviewOutcome {
        let clients: Vec<Arc<ConstraintClient>> =
            self.clients.read().await.values().cloned().collect();
        review_object(self, &clients, object, opts, cancellation).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::builder::RegistryBuilder;
    use crate::constraint::Constraint;
    use crate::error::ConformError;
    use crate::template::{Target, Template};
    use crate::test_support::{MemoryDriver, MemoryHandler};
    use tokio_util::sync::CancellationToken;

    fn deny_template() -> Template {
        Template::new("deny", "Deny")
            .with_target(Target::new("h1").with_code("dA", serde_json::json!({"rule": "always"})))
    }

    #[tokio::test]
    async fn add_constraint_without_template_fails_missing_template() {
        let registry = RegistryBuilder::new()
            .target(Arc::new(MemoryHandler::new("h1")))
            .driver(Arc::new(MemoryDriver::new("dA")))
            .build()
            .unwrap();
        let result = registry
            .add_constraint(Constraint::new("Deny", "c1", "deny"), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ConformError::MissingTemplate { .. })));
    }

    #[tokio::test]
    async fn add_constraint_is_idempotent_and_does_not_refan_out() {
        let d_a = Arc::new(MemoryDriver::new("dA"));
        let registry = RegistryBuilder::new()
            .target(Arc::new(MemoryHandler::new("h1")))
            .driver(Arc::clone(&d_a))
            .build()
            .unwrap();
        let token = CancellationToken::new();
        registry.add_template(deny_template(), &token).await.unwrap();

        let constraint = Constraint::new("Deny", "c1", "deny");
        registry.add_constraint(constraint.clone(), &token).await.unwrap();
        registry.add_constraint(constraint, &token).await.unwrap();

        assert!(d_a.holds_constraint("deny", "c1"));
    }

    #[tokio::test]
    async fn get_template_and_get_constraint_round_trip() {
        let registry = RegistryBuilder::new()
            .target(Arc::new(MemoryHandler::new("h1")))
            .driver(Arc::new(MemoryDriver::new("dA")))
            .build()
            .unwrap();
        let token = CancellationToken::new();
        registry.add_template(deny_template(), &token).await.unwrap();
        registry
            .add_constraint(Constraint::new("Deny", "c1", "deny"), &token)
            .await
            .unwrap();

        assert_eq!(registry.get_template("deny").await.unwrap().name, "deny");
        assert_eq!(registry.get_constraint("Deny", "c1").await.unwrap().name, "c1");
        assert!(registry.get_constraint("Deny", "missing").await.is_none());
    }

    #[tokio::test]
    async fn add_template_with_unmatched_engine_code_fails_no_driver() {
        let registry = RegistryBuilder::new()
            .target(Arc::new(MemoryHandler::new("h1")))
            .driver(Arc::new(MemoryDriver::new("dA")))
            .build()
            .unwrap();
        let tpl = Template::new("deny", "Deny")
            .with_target(Target::new("h1").with_code("dZ", serde_json::json!({})));
        let result = registry.add_template(tpl, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ConformError::NoDriver { .. })));
    }

    #[tokio::test]
    async fn add_data_and_remove_data_round_trip_through_handler_and_drivers() {
        let registry = RegistryBuilder::new()
            .target(Arc::new(MemoryHandler::new("h1")))
            .driver(Arc::new(MemoryDriver::new("dA")))
            .build()
            .unwrap();
        let token = CancellationToken::new();
        let object = serde_json::json!({"handler": "h1", "key": "ns1/foo", "data": {"x": 1}});
        assert!(registry.add_data(&object, &token).await.unwrap());
        assert!(registry.remove_data(&object, &token).await.unwrap());
    }
}
