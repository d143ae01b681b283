use thiserror::Error;

/// Reasons an Experiment is rejected before any query is dispatched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
	#[error("experiment must have a non-empty metrics address")]
	MissingMetricsAddr,
	#[error("experiment must have a non-empty command line")]
	MissingCommandLine,
	#[error("experiment must have at least one DNS server")]
	NoServers,
	#[error("experiment protocol must be \"tcp\" or \"udp\", got \"{0}\"")]
	InvalidProtocol(String),
	#[error("experiment timeout must be at least 1 second, got {0:?}")]
	TimeoutTooShort(std::time::Duration),
	#[error("experiment parallel must be at least 1")]
	ParallelTooLow,
	#[error("experiment spawn rate must be at least 1")]
	SpawnRateTooLow,
	#[error("experiment count must be at least 1")]
	CountTooLow,
	#[error("experiment must enable at least one of the A, AAAA, TXT or CAA checks")]
	NoChecks,
}

/// A selector pick produced no servers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
	#[error("selector returned zero DNS server addresses")]
	NoServers,
}

/// Failures raised by a result store
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error("{0}")]
	Other(String),
}

/// Fatal conditions that end a run
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("invalid experiment: {0}")]
	Config(#[from] ConfigError),
	#[error("failed to persist result after {attempts} attempts: {source}")]
	Persistence {
		attempts: u32,
		#[source]
		source: StoreError,
	},
	#[error("no DNS resolution client available")]
	MissingResolver,
	#[error("worker task failed: {0}")]
	WorkerPanicked(String),
	#[error("engine has stopped and no longer accepts names")]
	Stopped,
}
