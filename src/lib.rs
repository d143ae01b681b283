//! Concurrent batch DNS lookups against one or more resolvers.
//!
//! Names flow from a [`NameFeeder`] into a ramped pool of workers. Each name
//! is expanded into queries by the [`planner`], run through the
//! [`executor`], and counted by a shared [`ResultAggregator`].

pub mod dns;
pub mod domains;
pub mod engine;
pub mod error;
pub mod executor;
pub mod experiment;
pub mod limits;
pub mod metrics;
pub mod output;
pub mod planner;
pub mod resolver;
pub mod selector;
pub mod stats;
pub mod store;
pub mod transport;

pub use dns::{NetworkResolver, Resolution, Resolve, ResolveError};
pub use engine::{Engine, EngineState, NameFeeder, RunHandle, RunReport};
pub use error::{ConfigError, EngineError, SelectorError, StoreError};
pub use executor::{Execution, QueryOutcome};
pub use experiment::{Experiment, RecordChecks};
pub use selector::ServerSelector;
pub use stats::ResultAggregator;
pub use transport::{Answer, AnswerRecord, Protocol, Query, QuerySettings, Rcode, RecordKind, Server};
