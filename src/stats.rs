use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::EngineError;
use crate::executor::Execution;
use crate::store::{insert_with_retry, ResultRow, ResultStore, RetryPolicy};
use crate::transport::{Query, RecordKind};

/// Number of recent latency samples kept per (server, type) for quantiles
pub const LATENCY_WINDOW: usize = 1024;

/// Calculate the p-th percentile from a sorted slice using nearest-rank method.
///
/// Args:
///   sorted_values: Pre-sorted slice of f64 values.
///   p: Percentile between 0.0 and 100.0 (e.g. 50.0 for median).
///
/// Returns:
///   None if the slice is empty, otherwise the percentile value.
pub fn percentile(sorted_values: &[f64], p: f64) -> Option<f64> {
	if sorted_values.is_empty() {
		return None;
	}
	if sorted_values.len() == 1 {
		return Some(sorted_values[0]);
	}
	// Nearest-rank: rank = ceil(p/100 * N)
	let n = sorted_values.len();
	let rank = ((p / 100.0) * n as f64).ceil() as usize;
	// Clamp rank to valid index range [1, n]
	let rank = rank.clamp(1, n);
	Some(sorted_values[rank - 1])
}

/// Calculate the arithmetic mean of a slice of values.
pub fn mean(values: &[f64]) -> Option<f64> {
	if values.is_empty() {
		return None;
	}
	let sum: f64 = values.iter().sum();
	Some(sum / values.len() as f64)
}

fn sorted(mut values: Vec<f64>) -> Vec<f64> {
	values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
	values
}

/// Latency distribution for one (server, type) pair.
///
/// `count` and `sum_secs` cover every observation; quantiles come from the
/// most recent `LATENCY_WINDOW` samples.
#[derive(Debug, Clone, Default)]
pub struct LatencySummary {
	pub count: u64,
	pub sum_secs: f64,
	window: VecDeque<f64>,
}

impl LatencySummary {
	pub fn observe(&mut self, secs: f64) {
		self.count += 1;
		self.sum_secs += secs;
		if self.window.len() == LATENCY_WINDOW {
			self.window.pop_front();
		}
		self.window.push_back(secs);
	}

	/// Quantile in seconds, `q` between 0.0 and 1.0
	pub fn quantile(&self, q: f64) -> Option<f64> {
		let values = sorted(self.window.iter().copied().collect());
		percentile(&values, q * 100.0)
	}

	pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
		self.window.iter().copied()
	}
}

/// Per-server view used by the end-of-run report
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSnapshot {
	pub server: String,
	pub attempts: u64,
	pub successes: u64,
	pub success_rate: f64,
	pub p50_ms: f64,
	pub p95_ms: f64,
	pub mean_ms: f64,
	/// Result labels, most frequent first
	pub results: Vec<(String, u64)>,
}

struct StoreBinding {
	store: Arc<dyn ResultStore>,
	experiment_id: i64,
	policy: RetryPolicy,
}

/// Counters shared by every worker for the lifetime of a run.
///
/// All updates are per-key atomic, so concurrent `record` calls never lose
/// an increment.
pub struct ResultAggregator {
	command_line: String,
	total_attempts: AtomicU64,
	total_successes: AtomicU64,
	names_completed: AtomicU64,
	attempts: DashMap<String, u64>,
	successes: DashMap<String, u64>,
	results: DashMap<(String, String), u64>,
	query_times: DashMap<(String, RecordKind), LatencySummary>,
	printer: Option<Mutex<Box<dyn Write + Send>>>,
	store: Option<StoreBinding>,
}

impl ResultAggregator {
	pub fn new(command_line: impl Into<String>) -> Self {
		ResultAggregator {
			command_line: command_line.into(),
			total_attempts: AtomicU64::new(0),
			total_successes: AtomicU64::new(0),
			names_completed: AtomicU64::new(0),
			attempts: DashMap::new(),
			successes: DashMap::new(),
			results: DashMap::new(),
			query_times: DashMap::new(),
			printer: None,
			store: None,
		}
	}

	/// Write one line per query result to `sink`
	pub fn with_printer(mut self, sink: Box<dyn Write + Send>) -> Self {
		self.printer = Some(Mutex::new(sink));
		self
	}

	/// Persist every result under `experiment_id`
	pub fn with_store(mut self, store: Arc<dyn ResultStore>, experiment_id: i64, policy: RetryPolicy) -> Self {
		self.store = Some(StoreBinding { store, experiment_id, policy });
		self
	}

	pub fn command_line(&self) -> &str {
		&self.command_line
	}

	/// Count, print and persist one executed query.
	///
	/// Only a persistence failure returns an error, and that error is fatal.
	pub async fn record(&self, query: &Query, execution: &Execution) -> Result<(), EngineError> {
		self.count(query, execution);
		self.print(query, execution);

		if let Some(binding) = &self.store {
			let row = ResultRow {
				name: query.name.clone(),
				kind: query.kind,
				error: execution.outcome.error(),
				server_id: query.server.id,
				experiment_id: binding.experiment_id,
			};
			insert_with_retry(binding.store.as_ref(), &row, binding.policy).await?;
		}
		Ok(())
	}

	fn count(&self, query: &Query, execution: &Execution) {
		let server = &query.server.address;

		self.total_attempts.fetch_add(1, Ordering::Relaxed);
		*self.attempts.entry(server.clone()).or_insert(0) += 1;

		if execution.outcome.is_success() {
			self.total_successes.fetch_add(1, Ordering::Relaxed);
			*self.successes.entry(server.clone()).or_insert(0) += 1;
		}

		*self.results
			.entry((server.clone(), execution.outcome.label()))
			.or_insert(0) += 1;

		self.query_times
			.entry((server.clone(), query.kind))
			.or_default()
			.observe(execution.latency.as_secs_f64());
	}

	fn print(&self, query: &Query, execution: &Execution) {
		let Some(printer) = &self.printer else {
			return;
		};
		let mut sink = printer.lock();
		let written = writeln!(
			sink,
			"{} {} {} {}",
			query.server, query.name, query.kind, execution.outcome,
		);
		if let Err(e) = written {
			warn!(error = %e, "failed to write result line");
		}
	}

	pub fn name_completed(&self) {
		self.names_completed.fetch_add(1, Ordering::Relaxed);
	}

	pub fn total_attempts(&self) -> u64 {
		self.total_attempts.load(Ordering::Relaxed)
	}

	pub fn total_successes(&self) -> u64 {
		self.total_successes.load(Ordering::Relaxed)
	}

	pub fn names_completed(&self) -> u64 {
		self.names_completed.load(Ordering::Relaxed)
	}

	pub fn attempts(&self, server: &str) -> u64 {
		self.attempts.get(server).map(|v| *v).unwrap_or(0)
	}

	pub fn successes(&self, server: &str) -> u64 {
		self.successes.get(server).map(|v| *v).unwrap_or(0)
	}

	pub fn result_count(&self, server: &str, label: &str) -> u64 {
		self.results
			.get(&(server.to_string(), label.to_string()))
			.map(|v| *v)
			.unwrap_or(0)
	}

	pub fn latency(&self, server: &str, kind: RecordKind) -> Option<LatencySummary> {
		self.query_times
			.get(&(server.to_string(), kind))
			.map(|s| s.clone())
	}

	/// `(server, count)` pairs sorted by server
	pub fn attempts_by_server(&self) -> Vec<(String, u64)> {
		sorted_pairs(self.attempts.iter().map(|e| (e.key().clone(), *e.value())).collect())
	}

	pub fn successes_by_server(&self) -> Vec<(String, u64)> {
		sorted_pairs(self.successes.iter().map(|e| (e.key().clone(), *e.value())).collect())
	}

	/// `((server, result), count)` sorted by labels
	pub fn results_by_label(&self) -> Vec<((String, String), u64)> {
		sorted_pairs(self.results.iter().map(|e| (e.key().clone(), *e.value())).collect())
	}

	pub fn query_times(&self) -> Vec<((String, RecordKind), LatencySummary)> {
		sorted_pairs(self.query_times.iter().map(|e| (e.key().clone(), e.value().clone())).collect())
	}

	/// Per-server summary, sorted by server address
	pub fn snapshot(&self) -> Vec<ServerSnapshot> {
		self.attempts_by_server()
			.into_iter()
			.map(|(server, attempts)| {
				let successes = self.successes(&server);

				let samples_ms = sorted(
					self.query_times.iter()
						.filter(|e| e.key().0 == server)
						.flat_map(|e| e.value().samples().map(|s| s * 1000.0).collect::<Vec<_>>())
						.collect(),
				);

				let mut results: Vec<(String, u64)> = self.results.iter()
					.filter(|e| e.key().0 == server)
					.map(|e| (e.key().1.clone(), *e.value()))
					.collect();
				results.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

				let success_rate = if attempts > 0 {
					(successes as f64 / attempts as f64) * 100.0
				} else {
					0.0
				};

				ServerSnapshot {
					p50_ms: percentile(&samples_ms, 50.0).unwrap_or(0.0),
					p95_ms: percentile(&samples_ms, 95.0).unwrap_or(0.0),
					mean_ms: mean(&samples_ms).unwrap_or(0.0),
					server,
					attempts,
					successes,
					success_rate,
					results,
				}
			})
			.collect()
	}
}

fn sorted_pairs<K: Ord, V>(mut pairs: Vec<(K, V)>) -> Vec<(K, V)> {
	pairs.sort_by(|a, b| a.0.cmp(&b.0));
	pairs
}
