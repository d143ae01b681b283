mod cli;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dns_batch::domains::NameReader;
use dns_batch::experiment::{self, Experiment, RecordChecks};
use dns_batch::store::{ResultStore, RetryPolicy, SqliteStore};
use dns_batch::{limits, metrics, output, resolver};
use dns_batch::{Engine, NetworkResolver, ResultAggregator, ServerSelector};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dns_batch=info")),
		)
		.with_writer(io::stderr)
		.init();

	let command_line = std::env::args().collect::<Vec<_>>().join(" ");
	let cli = Cli::parse();

	if cli.skip_ulimit_check {
		warn!("skipping ulimit check");
	} else {
		limits::check_ulimit(cli.parallel)?;
	}

	// Collect servers from all sources
	let mut servers = resolver::parse_server_list(&cli.servers)?;
	if let Some(path) = &cli.server_file {
		servers.extend(resolver::read_server_file(path)?);
	}
	let servers = resolver::dedup_servers(servers);

	let store = match &cli.db {
		Some(url) => Some(SqliteStore::connect(url, cli.db_max_conns).await?),
		None => None,
	};

	// Servers carry their row ids so results can reference them
	let mut experiment_id = None;
	let servers = match &store {
		Some(store) => {
			let id = store.register_experiment(&command_line).await?;
			experiment_id = Some(id);
			let mut registered = Vec::with_capacity(servers.len());
			for server in servers {
				let server_id = store.register_server(&server.address, id).await?;
				registered.push(server.with_id(server_id));
			}
			registered
		}
		None => servers,
	};

	let selector = if cli.round_robin {
		ServerSelector::round_robin(servers)?
	} else {
		ServerSelector::comparison(servers)?
	};

	let exp = Experiment {
		metrics_addr: cli.metrics_addr.clone(),
		command_line: command_line.clone(),
		selector,
		protocol: experiment::parse_protocol(&cli.proto)?,
		timeout: Duration::from_secs(cli.timeout),
		parallel: cli.parallel,
		spawn_rate: cli.spawn_rate,
		spawn_interval: Duration::from_secs(cli.spawn_interval),
		checks: RecordChecks {
			a: cli.check_a_enabled(),
			aaaa: cli.check_aaaa,
			txt: cli.check_txt,
			caa: cli.check_caa,
		},
		count: cli.count,
		print_results: !cli.no_print,
		persist_results: store.is_some(),
		fan_out: !cli.sequential,
	};
	exp.validate()?;
	output::print_config_summary(&exp);

	let mut aggregator = ResultAggregator::new(command_line);
	if exp.print_results {
		aggregator = aggregator.with_printer(Box::new(io::stdout()));
	}
	if let (Some(store), Some(id)) = (&store, experiment_id) {
		let sink: Arc<dyn ResultStore> = Arc::new(store.clone());
		aggregator = aggregator.with_store(sink, id, RetryPolicy::default());
	}
	let aggregator = Arc::new(aggregator);

	let metrics_task = metrics::serve(&metrics::normalize_addr(&exp.metrics_addr), aggregator.clone()).await?;

	let engine = Engine::new(exp, Some(Arc::new(NetworkResolver::new())), aggregator.clone());
	let (feeder, handle) = engine.start()?;

	let mut names = NameReader::new(tokio::io::BufReader::new(tokio::io::stdin()), cli.reverse);
	let mut fed = 0u64;
	let feed_result: anyhow::Result<()> = async {
		while let Some(name) = names.next_name().await? {
			feeder.send(name).await?;
			fed += 1;
		}
		Ok(())
	}.await;
	info!(names = fed, "input exhausted");

	// A failed send means the run already stopped; finish reports why
	let run_result = handle.finish(feeder).await;

	if let (Some(store), Some(id)) = (&store, experiment_id) {
		if let Err(e) = store.finish_experiment(id).await {
			warn!(error = %e, "failed to stamp experiment end");
		}
		store.close().await;
	}
	metrics_task.abort();

	let report = run_result.context("run aborted")?;
	feed_result?;

	let results = aggregator.snapshot();
	output::print_results_table(&results, &report);
	if let Some(path) = &cli.output {
		output::write_csv(path, &results)?;
	}

	Ok(())
}
