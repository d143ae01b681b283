use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex, Notify};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::dns::Resolve;
use crate::error::EngineError;
use crate::executor;
use crate::experiment::Experiment;
use crate::planner;
use crate::stats::ResultAggregator;
use crate::transport::{Query, QuerySettings};

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
	Unstarted,
	Validating,
	/// Ramping and steady state are not told apart
	Running,
	Draining,
	Stopped,
}

impl EngineState {
	fn from_u8(value: u8) -> Self {
		match value {
			0 => EngineState::Unstarted,
			1 => EngineState::Validating,
			2 => EngineState::Running,
			3 => EngineState::Draining,
			_ => EngineState::Stopped,
		}
	}
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
	fn new(state: EngineState) -> Self {
		StateCell(AtomicU8::new(state as u8))
	}

	fn get(&self) -> EngineState {
		EngineState::from_u8(self.0.load(Ordering::SeqCst))
	}

	fn set(&self, state: EngineState) {
		self.0.store(state as u8, Ordering::SeqCst);
	}

	/// Move from `from` to `to` only if still in `from`
	fn advance(&self, from: EngineState, to: EngineState) {
		let _ = self.0.compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst);
	}
}

#[derive(Debug, Default)]
struct TrackerInner {
	pending: AtomicUsize,
	notify: Notify,
}

/// Counts names handed to the engine that are not finished yet
#[derive(Debug, Clone, Default)]
pub struct CompletionTracker {
	inner: Arc<TrackerInner>,
}

impl CompletionTracker {
	pub fn add(&self) {
		self.inner.pending.fetch_add(1, Ordering::SeqCst);
	}

	pub fn done(&self) {
		if self.inner.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
			self.inner.notify.notify_waiters();
		}
	}

	pub fn pending(&self) -> usize {
		self.inner.pending.load(Ordering::SeqCst)
	}

	/// Wait until every added name has been marked done
	pub async fn wait(&self) {
		loop {
			let notified = self.inner.notify.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();
			if self.pending() == 0 {
				return;
			}
			notified.await;
		}
	}
}

/// A name in flight. Dropping it marks the name done with the tracker, so a
/// name lost to a stopped engine is never left pending.
struct Ticket {
	name: String,
	accepted: Option<oneshot::Sender<()>>,
	tracker: CompletionTracker,
}

impl Ticket {
	fn accept(&mut self) {
		if let Some(accepted) = self.accepted.take() {
			let _ = accepted.send(());
		}
	}
}

impl std::fmt::Debug for Ticket {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Ticket").field("name", &self.name).finish()
	}
}

impl Drop for Ticket {
	fn drop(&mut self) {
		self.tracker.done();
	}
}

/// Producer side of the name source.
///
/// `send` returns only after a worker has taken the name, so the producer
/// never runs ahead of the workers.
#[derive(Debug)]
pub struct NameFeeder {
	tx: mpsc::Sender<Ticket>,
	tracker: CompletionTracker,
}

impl NameFeeder {
	pub async fn send(&self, name: impl Into<String>) -> Result<(), EngineError> {
		let (accepted, taken) = oneshot::channel();
		self.tracker.add();
		let ticket = Ticket {
			name: name.into(),
			accepted: Some(accepted),
			tracker: self.tracker.clone(),
		};
		self.tx.send(ticket).await.map_err(|_| EngineError::Stopped)?;
		taken.await.map_err(|_| EngineError::Stopped)
	}
}

/// Per-name work: plan, execute and record every query for one name
pub struct Dispatcher {
	experiment: Arc<Experiment>,
	resolver: Option<Arc<dyn Resolve>>,
	aggregator: Arc<ResultAggregator>,
}

async fn run_query(
	resolver: &dyn Resolve,
	aggregator: &ResultAggregator,
	query: &Query,
	settings: QuerySettings,
) -> Result<(), EngineError> {
	let execution = executor::execute(resolver, query, settings).await;
	aggregator.record(query, &execution).await
}

fn joined<T>(result: Result<Result<T, EngineError>, JoinError>) -> Result<T, EngineError> {
	match result {
		Ok(inner) => inner,
		Err(e) => Err(EngineError::WorkerPanicked(e.to_string())),
	}
}

impl Dispatcher {
	pub fn new(
		experiment: Arc<Experiment>,
		resolver: Option<Arc<dyn Resolve>>,
		aggregator: Arc<ResultAggregator>,
	) -> Self {
		Dispatcher { experiment, resolver, aggregator }
	}

	/// Process one name. Errors returned here are fatal for the run.
	pub async fn process_name(&self, name: &str) -> Result<(), EngineError> {
		let resolver = self.resolver.clone().ok_or(EngineError::MissingResolver)?;
		let exp = &self.experiment;

		let queries = match planner::plan(name, &exp.checks, &exp.selector, exp.count) {
			Ok(queries) => queries,
			Err(e) => {
				error!(name = %name, error = %e, "skipping name");
				self.aggregator.name_completed();
				return Ok(());
			}
		};
		let settings = exp.query_settings();

		if exp.fan_out && queries.len() > 1 {
			// One task per query, all joined before the name counts as done.
			// Returning early drops the set, which aborts the rest.
			let mut tasks = JoinSet::new();
			for query in queries {
				let resolver = resolver.clone();
				let aggregator = self.aggregator.clone();
				tasks.spawn(async move {
					run_query(resolver.as_ref(), aggregator.as_ref(), &query, settings).await
				});
			}
			while let Some(result) = tasks.join_next().await {
				joined(result)?;
			}
		} else {
			for query in &queries {
				run_query(resolver.as_ref(), self.aggregator.as_ref(), query, settings).await?;
			}
		}

		self.aggregator.name_completed();
		Ok(())
	}
}

type Source = Arc<AsyncMutex<mpsc::Receiver<Ticket>>>;

async fn worker(id: usize, source: Source, dispatcher: Arc<Dispatcher>) -> Result<(), EngineError> {
	loop {
		let next = {
			let mut rx = source.lock().await;
			rx.recv().await
		};
		let Some(mut ticket) = next else {
			debug!(worker = id, "name source closed");
			return Ok(());
		};
		ticket.accept();
		let result = dispatcher.process_name(&ticket.name).await;
		drop(ticket);
		result?;
	}
}

struct Ramp {
	experiment: Arc<Experiment>,
	dispatcher: Arc<Dispatcher>,
	source: Source,
	closed: watch::Receiver<bool>,
	spawned: Arc<AtomicUsize>,
}

impl Ramp {
	/// Grow the pool to `parallel` workers in batches of `spawn_rate`, then
	/// wait for every worker to finish. Stops growing once the source closes.
	async fn run(mut self) -> Result<usize, EngineError> {
		let parallel = self.experiment.parallel;
		let spawn_rate = self.experiment.spawn_rate;
		let interval = self.experiment.spawn_interval;
		let mut workers = JoinSet::new();
		let mut spawned = 0;

		'ramp: while spawned < parallel {
			let batch = spawn_rate.min(parallel - spawned);
			for _ in 0..batch {
				spawned += 1;
				workers.spawn(worker(spawned, self.source.clone(), self.dispatcher.clone()));
			}
			self.spawned.store(spawned, Ordering::SeqCst);
			info!(spawned, target = parallel, "started worker batch");

			if spawned >= parallel {
				break;
			}

			let pause = tokio::time::sleep(interval);
			tokio::pin!(pause);
			loop {
				tokio::select! {
					_ = &mut pause => break,
					changed = self.closed.changed() => {
						if changed.is_err() || *self.closed.borrow() {
							debug!(spawned, "name source closed during ramp");
							break 'ramp;
						}
					}
					Some(result) = workers.join_next() => joined(result)?,
				}
			}
		}

		drop(self.source);
		while let Some(result) = workers.join_next().await {
			joined(result)?;
		}
		Ok(spawned)
	}
}

/// Summary returned once a run has drained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
	pub workers_spawned: usize,
	pub names_completed: u64,
}

/// Control side of a started run
pub struct RunHandle {
	task: JoinHandle<Result<usize, EngineError>>,
	closed: watch::Sender<bool>,
	tracker: CompletionTracker,
	state: Arc<StateCell>,
	spawned: Arc<AtomicUsize>,
	aggregator: Arc<ResultAggregator>,
}

impl std::fmt::Debug for RunHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RunHandle")
			.field("state", &self.state())
			.field("workers_spawned", &self.workers_spawned())
			.field("pending", &self.pending())
			.finish()
	}
}

impl RunHandle {
	pub fn state(&self) -> EngineState {
		self.state.get()
	}

	pub fn workers_spawned(&self) -> usize {
		self.spawned.load(Ordering::SeqCst)
	}

	/// Names accepted but not yet finished
	pub fn pending(&self) -> usize {
		self.tracker.pending()
	}

	/// Close the name source, wait for in-flight names and join the workers.
	///
	/// Returns the first fatal error raised during the run, if any.
	pub async fn finish(self, feeder: NameFeeder) -> Result<RunReport, EngineError> {
		drop(feeder);
		self.state.advance(EngineState::Running, EngineState::Draining);
		let _ = self.closed.send(true);

		self.tracker.wait().await;
		let result = match self.task.await {
			Ok(result) => result,
			Err(e) => Err(EngineError::WorkerPanicked(e.to_string())),
		};
		self.state.set(EngineState::Stopped);

		let workers_spawned = result?;
		Ok(RunReport {
			workers_spawned,
			names_completed: self.aggregator.names_completed(),
		})
	}
}

/// Owns everything needed to start a run
pub struct Engine {
	experiment: Arc<Experiment>,
	resolver: Option<Arc<dyn Resolve>>,
	aggregator: Arc<ResultAggregator>,
	state: Arc<StateCell>,
}

impl Engine {
	pub fn new(
		experiment: Experiment,
		resolver: Option<Arc<dyn Resolve>>,
		aggregator: Arc<ResultAggregator>,
	) -> Self {
		Engine {
			experiment: Arc::new(experiment),
			resolver,
			aggregator,
			state: Arc::new(StateCell::new(EngineState::Unstarted)),
		}
	}

	pub fn state(&self) -> EngineState {
		self.state.get()
	}

	/// Validate the experiment and start ramping workers.
	///
	/// An invalid experiment stops here without dispatching anything.
	pub fn start(self) -> Result<(NameFeeder, RunHandle), EngineError> {
		self.state.set(EngineState::Validating);
		if let Err(e) = self.experiment.validate() {
			self.state.set(EngineState::Stopped);
			error!(error = %e, "experiment rejected");
			return Err(e.into());
		}

		let (tx, rx) = mpsc::channel(1);
		let (closed_tx, closed_rx) = watch::channel(false);
		let tracker = CompletionTracker::default();
		let spawned = Arc::new(AtomicUsize::new(0));

		let dispatcher = Arc::new(Dispatcher::new(
			self.experiment.clone(),
			self.resolver.clone(),
			self.aggregator.clone(),
		));
		let ramp = Ramp {
			experiment: self.experiment.clone(),
			dispatcher,
			source: Arc::new(AsyncMutex::new(rx)),
			closed: closed_rx,
			spawned: spawned.clone(),
		};

		info!(
			servers = self.experiment.selector.servers().len(),
			mode = self.experiment.selector.mode(),
			parallel = self.experiment.parallel,
			spawn_rate = self.experiment.spawn_rate,
			"starting experiment"
		);

		self.state.set(EngineState::Running);
		let state = self.state.clone();
		let task = tokio::spawn(async move {
			let result = ramp.run().await;
			if let Err(e) = &result {
				error!(error = %e, "run aborted");
			}
			state.set(EngineState::Stopped);
			result
		});

		let feeder = NameFeeder { tx, tracker: tracker.clone() };
		let handle = RunHandle {
			task,
			closed: closed_tx,
			tracker,
			state: self.state,
			spawned,
			aggregator: self.aggregator,
		};
		Ok((feeder, handle))
	}
}
