//! The interception engine: manifest, request classification, strategy
//! execution and the install/activate lifecycle.

mod classifier;
mod error;
mod lifecycle;
mod manifest;
mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use classifier::{
  Classifier, Strategy, DEFAULT_API_PREFIX, DEFAULT_BYPASS, DEFAULT_STATIC_EXTENSIONS,
};
pub use error::{FetchError, LifecycleError};
pub use lifecycle::{
  namespace_name, ActivationReport, InstallOutcome, Phase, Registration, RegistrationState,
  SessionId, WorkerVersion,
};
pub use manifest::Manifest;
pub use strategy::{passthrough, StrategyExecutor};
