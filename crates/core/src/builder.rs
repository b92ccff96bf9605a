use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::driver::Driver;
use crate::error::ConformError;
use crate::handler::TargetHandler;
use crate::registry::Registry;

/// Fluent builder for constructing a [`Registry`].
///
/// At minimum, one [`TargetHandler`] and one [`Driver`] must be registered.
/// Driver priority is the order `driver` is called in; the first configured
/// driver is preferred whenever a template's engine code blocks name it.
pub struct RegistryBuilder {
    handlers: HashMap<String, Arc<dyn TargetHandler>>,
    drivers: Vec<Arc<dyn Driver>>,
    enforcement_points: HashSet<String>,
}

impl RegistryBuilder {
    /// Create a new builder with no handlers, drivers, or enforcement points.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            drivers: Vec::new(),
            enforcement_points: HashSet::new(),
        }
    }

    /// Register a target handler, keyed by [`TargetHandler::name`].
    #[must_use]
    pub fn target(mut self, handler: Arc<dyn TargetHandler>) -> Self {
        self.handlers.insert(handler.name().to_string(), handler);
        self
    }

    /// Register a driver. Priority is the order drivers are added in.
    #[must_use]
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.drivers.push(driver);
        self
    }

    /// Declare the set of enforcement points this registry's caller supports,
    /// used to resolve [`crate::enforcement::EnforcementAction::Scoped`]
    /// constraints that don't name a source enforcement point.
    #[must_use]
    pub fn enforcement_points(
        mut self,
        points: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.enforcement_points = points.into_iter().map(Into::into).collect();
        self
    }

    /// Consume the builder and produce a configured [`Registry`].
    ///
    /// Returns [`ConformError::CreatingClient`] if no target handler was
    /// registered, or [`ConformError::DuplicateDriver`] if two drivers share a
    /// name.
    pub fn build(self) -> Result<Registry, ConformError> {
        if self.handlers.is_empty() {
            return Err(ConformError::CreatingClient(
                "at least one target handler is required".into(),
            ));
        }
        if self.drivers.is_empty() {
            return Err(ConformError::CreatingClient(
                "at least one driver is required".into(),
            ));
        }

        let mut driver_priority = Vec::with_capacity(self.drivers.len());
        let mut drivers = HashMap::with_capacity(self.drivers.len());
        for driver in self.drivers {
            let name = driver.name().to_string();
            if drivers.insert(name.clone(), driver).is_some() {
                return Err(ConformError::DuplicateDriver(name));
            }
            driver_priority.push(name);
        }

        Ok(Registry::new(
            self.handlers,
            drivers,
            driver_priority,
            self.enforcement_points,
        ))
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
