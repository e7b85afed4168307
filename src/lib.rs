//! Ember: a declarative API scenario engine.
//!
//! Scenarios are YAML or JSON documents describing HTTP steps, grouped
//! into named tests. The [`Engine`] runs them against a [`Transport`],
//! threading captured values through a layered [`VariableContext`], and
//! hands each [`ScenarioResult`] to a [`Reporter`].

pub mod assertion;
pub mod config;
pub mod context;
pub mod data;
pub mod engine;
pub mod error;
pub mod extract;
pub mod loader;
pub mod model;
pub mod report;
pub mod template;
pub mod transport;
pub mod validator;

pub use assertion::{AssertionEngine, AssertionResult};
pub use config::EngineConfig;
pub use context::{Scope, VariableContext};
pub use engine::Engine;
pub use error::{EngineError, ExtractionError, TransportError, ValidationError};
pub use loader::{LoadedScenario, ScenarioLoader};
pub use model::*;
pub use report::{ConsoleReporter, MemoryReporter, Report, ReportFormat, Reporter};
pub use transport::{HttpTransport, Response, Transport};
pub use validator::validate_scenario;

/// Crate version, as reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
