//! Prometheus text exposition of the result counters.
//!
//! Endpoint: GET /metrics on the experiment's metrics address.

use std::fmt::Write;
use std::sync::Arc;

use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::stats::ResultAggregator;

const QUANTILES: [f64; 3] = [0.5, 0.9, 0.99];

fn write_help_type(out: &mut String, name: &str, help: &str, metric_type: &str) {
	writeln!(out, "# HELP {} {}", name, help).ok();
	writeln!(out, "# TYPE {} {}", name, metric_type).ok();
}

/// Escape a label value per the exposition format
fn escape(value: &str) -> String {
	value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// Generate Prometheus-format metrics text
pub fn render_metrics(agg: &ResultAggregator) -> String {
	let mut out = String::with_capacity(4096);

	write_help_type(&mut out, "attempts", "number of lookup attempts", "counter");
	for (server, count) in agg.attempts_by_server() {
		writeln!(out, "attempts{{server=\"{}\"}} {}", escape(&server), count).ok();
	}

	write_help_type(&mut out, "successes", "number of lookup successes", "counter");
	for (server, count) in agg.successes_by_server() {
		writeln!(out, "successes{{server=\"{}\"}} {}", escape(&server), count).ok();
	}

	write_help_type(&mut out, "results", "lookup results", "counter");
	for ((server, result), count) in agg.results_by_label() {
		writeln!(
			out,
			"results{{server=\"{}\",result=\"{}\"}} {}",
			escape(&server), escape(&result), count,
		).ok();
	}

	write_help_type(&mut out, "queryTime", "amount of time queries take (seconds)", "summary");
	for ((server, kind), summary) in agg.query_times() {
		let labels = format!("server=\"{}\",type=\"{}\"", escape(&server), kind);
		for q in QUANTILES {
			if let Some(value) = summary.quantile(q) {
				writeln!(out, "queryTime{{{},quantile=\"{}\"}} {}", labels, q, value).ok();
			}
		}
		writeln!(out, "queryTime_sum{{{}}} {}", labels, summary.sum_secs).ok();
		writeln!(out, "queryTime_count{{{}}} {}", labels, summary.count).ok();
	}

	write_help_type(&mut out, "commandLine", "command line", "gauge");
	writeln!(out, "commandLine{{line=\"{}\"}} 1", escape(agg.command_line())).ok();

	out
}

async fn metrics_handler(State(agg): State<Arc<ResultAggregator>>) -> impl IntoResponse {
	(
		[(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
		render_metrics(&agg),
	)
}

pub fn router(agg: Arc<ResultAggregator>) -> Router {
	Router::new()
		.route("/metrics", get(metrics_handler))
		.with_state(agg)
}

/// Bind the metrics listener and serve it in the background.
///
/// Binding happens before returning so a bad address fails the run early.
pub async fn serve(addr: &str, agg: Arc<ResultAggregator>) -> anyhow::Result<tokio::task::JoinHandle<()>> {
	let listener = TcpListener::bind(addr).await
		.map_err(|e| anyhow::anyhow!("failed to bind metrics address '{}': {}", addr, e))?;
	info!(addr = %listener.local_addr()?, "metrics server listening on /metrics");

	let app = router(agg);
	Ok(tokio::spawn(async move {
		if let Err(e) = axum::serve(listener, app).await {
			error!(error = %e, "metrics server failed");
		}
	}))
}

/// Turn a Go-style ":6363" bind address into one tokio can bind
pub fn normalize_addr(addr: &str) -> String {
	if addr.starts_with(':') {
		format!("0.0.0.0{}", addr)
	} else {
		addr.to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	use crate::executor::{Execution, QueryOutcome};
	use crate::transport::{Query, Rcode, RecordKind, Server};

	#[tokio::test]
	async fn test_render_contains_families() {
		let agg = ResultAggregator::new("dns-batch --servers \"a\"");
		let query = Query { name: "example.com".to_string(), kind: RecordKind::A, server: Server::new("1.1.1.1:53") };
		agg.record(&query, &Execution {
			outcome: QueryOutcome::Success { rcode: Rcode::NOERROR },
			latency: Duration::from_millis(250),
		}).await.unwrap();

		let text = render_metrics(&agg);
		assert!(text.contains("# TYPE attempts counter"));
		assert!(text.contains("attempts{server=\"1.1.1.1:53\"} 1"));
		assert!(text.contains("successes{server=\"1.1.1.1:53\"} 1"));
		assert!(text.contains("results{server=\"1.1.1.1:53\",result=\"NOERROR\"} 1"));
		assert!(text.contains("queryTime{server=\"1.1.1.1:53\",type=\"A\",quantile=\"0.5\"} 0.25"));
		assert!(text.contains("queryTime_count{server=\"1.1.1.1:53\",type=\"A\"} 1"));
		assert!(text.contains("commandLine{line=\"dns-batch --servers \\\"a\\\"\"} 1"));
	}

	#[test]
	fn test_normalize_addr() {
		assert_eq!(normalize_addr(":6363"), "0.0.0.0:6363");
		assert_eq!(normalize_addr("127.0.0.1:9000"), "127.0.0.1:9000");
	}
}
