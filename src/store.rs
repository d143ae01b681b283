use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{info, warn};

use crate::error::{EngineError, StoreError};
use crate::transport::RecordKind;

const SCHEMA: [&str; 3] = [
	"CREATE TABLE IF NOT EXISTS experiments (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		start TEXT NOT NULL,
		\"end\" TEXT,
		commandline TEXT NOT NULL
	)",
	"CREATE TABLE IF NOT EXISTS servers (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		address TEXT NOT NULL,
		experimentID INTEGER NOT NULL REFERENCES experiments(id)
	)",
	"CREATE TABLE IF NOT EXISTS results (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		name TEXT NOT NULL,
		type TEXT NOT NULL,
		error TEXT,
		serverID INTEGER REFERENCES servers(id),
		experimentID INTEGER NOT NULL REFERENCES experiments(id)
	)",
];

/// One persisted query result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
	pub name: String,
	pub kind: RecordKind,
	/// `None` when the query succeeded
	pub error: Option<String>,
	pub server_id: Option<i64>,
	pub experiment_id: i64,
}

/// Durable sink for per-query results
#[async_trait]
pub trait ResultStore: Send + Sync {
	async fn insert_result(&self, row: &ResultRow) -> Result<(), StoreError>;
}

/// How hard to try before giving up on an insert
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub attempts: u32,
	pub delay: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		RetryPolicy { attempts: 3, delay: Duration::from_millis(100) }
	}
}

/// Insert a row, retrying transient failures.
///
/// Running out of attempts is fatal for the whole run.
pub async fn insert_with_retry(
	store: &dyn ResultStore,
	row: &ResultRow,
	policy: RetryPolicy,
) -> Result<(), EngineError> {
	let mut attempt = 1;
	loop {
		match store.insert_result(row).await {
			Ok(()) => return Ok(()),
			Err(e) if attempt < policy.attempts => {
				warn!(name = %row.name, attempt, error = %e, "result insert failed, retrying");
				attempt += 1;
				if !policy.delay.is_zero() {
					tokio::time::sleep(policy.delay).await;
				}
			}
			Err(e) => {
				return Err(EngineError::Persistence { attempts: attempt, source: e });
			}
		}
	}
}

/// SQLite-backed result store
#[derive(Debug, Clone)]
pub struct SqliteStore {
	pool: SqlitePool,
}

impl SqliteStore {
	pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
		let options = SqliteConnectOptions::from_str(database_url)?
			.create_if_missing(true)
			.foreign_keys(true)
			.busy_timeout(Duration::from_secs(5));

		let pool = SqlitePoolOptions::new()
			.max_connections(max_connections.max(1))
			.connect_with(options)
			.await?;

		let store = SqliteStore { pool };
		store.create_schema().await?;
		info!(url = %database_url, "result store ready");
		Ok(store)
	}

	/// Private in-memory database. A single connection keeps every statement
	/// on the same database.
	pub async fn in_memory() -> Result<Self, StoreError> {
		let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.idle_timeout(None)
			.max_lifetime(None)
			.connect_with(options)
			.await?;

		let store = SqliteStore { pool };
		store.create_schema().await?;
		Ok(store)
	}

	async fn create_schema(&self) -> Result<(), StoreError> {
		for statement in SCHEMA {
			sqlx::query(statement).execute(&self.pool).await?;
		}
		Ok(())
	}

	pub async fn register_experiment(&self, command_line: &str) -> Result<i64, StoreError> {
		let result = sqlx::query("INSERT INTO experiments (start, commandline) VALUES (?, ?)")
			.bind(Utc::now().to_rfc3339())
			.bind(command_line)
			.execute(&self.pool)
			.await?;
		Ok(result.last_insert_rowid())
	}

	pub async fn register_server(&self, address: &str, experiment_id: i64) -> Result<i64, StoreError> {
		let result = sqlx::query("INSERT INTO servers (address, experimentID) VALUES (?, ?)")
			.bind(address)
			.bind(experiment_id)
			.execute(&self.pool)
			.await?;
		Ok(result.last_insert_rowid())
	}

	/// Stamp the experiment's end time
	pub async fn finish_experiment(&self, experiment_id: i64) -> Result<(), StoreError> {
		sqlx::query("UPDATE experiments SET \"end\" = ? WHERE id = ?")
			.bind(Utc::now().to_rfc3339())
			.bind(experiment_id)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	pub async fn close(&self) {
		self.pool.close().await;
	}

	#[cfg(test)]
	pub(crate) fn pool(&self) -> &SqlitePool {
		&self.pool
	}
}

#[async_trait]
impl ResultStore for SqliteStore {
	async fn insert_result(&self, row: &ResultRow) -> Result<(), StoreError> {
		sqlx::query(
			"INSERT INTO results (name, type, error, serverID, experimentID) VALUES (?, ?, ?, ?, ?)",
		)
		.bind(&row.name)
		.bind(row.kind.as_str())
		.bind(row.error.as_deref())
		.bind(row.server_id)
		.bind(row.experiment_id)
		.execute(&self.pool)
		.await?;
		Ok(())
	}
}
