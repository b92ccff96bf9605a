pub mod builder;
pub mod constraint;
pub mod constraint_client;
pub mod driver;
pub mod enforcement;
pub mod error;
pub mod handler;
pub mod matcher;
mod migration;
pub mod registry;
pub mod response;
pub mod review;
pub mod template;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use builder::RegistryBuilder;
pub use constraint::Constraint;
pub use constraint_client::{ConstraintClient, MatchOutcome, MatchResult};
pub use driver::{Driver, DriverError, DriverViolation, QueryOptions, QueryResponse};
pub use enforcement::{EnforcementAction, ResolvedAction, ScopedEnforcementAction};
pub use error::{ConformError, ErrorMap};
pub use handler::{HandlerError, ProcessedData, TargetHandler};
pub use matcher::{AlwaysMatcher, MatchError, Matcher};
pub use registry::Registry;
pub use response::{AddTemplateResponse, ConstraintResult, RemoveTemplateResponse, TargetResponse};
pub use review::{ReviewOptions, ReviewOutcome};
pub use template::{Target, Template};
