use comfy_table::{Table, ContentArrangement, presets::UTF8_FULL};

use anyhow::Result;

use crate::engine::RunReport;
use crate::experiment::Experiment;
use crate::stats::ServerSnapshot;

/// How many result labels to show per server in the table
const TOP_RESULTS: usize = 3;

fn yes_no(flag: bool) -> &'static str {
	if flag { "yes" } else { "no" }
}

/// Print a summary of the experiment configuration before running.
///
/// Goes to stderr so stdout carries only result lines and the final report.
pub fn print_config_summary(exp: &Experiment) {
	eprintln!("DNS Batch Configuration");
	eprintln!("=======================");
	eprintln!("Servers:        {} ({})", exp.selector.servers().len(), exp.selector.mode());
	for s in exp.selector.servers() {
		eprintln!("  - {}", s);
	}
	eprintln!("Protocol:       {}", exp.protocol);
	eprintln!("Timeout:        {} ms", exp.timeout.as_millis());
	eprintln!("Parallel:       {}", exp.parallel);
	eprintln!("Spawn rate:     {} every {} ms", exp.spawn_rate, exp.spawn_interval.as_millis());
	eprintln!(
		"Checks:         A={} AAAA={} TXT={} CAA={}",
		yes_no(exp.checks.a), yes_no(exp.checks.aaaa),
		yes_no(exp.checks.txt), yes_no(exp.checks.caa),
	);
	eprintln!("Count:          {}", exp.count);
	eprintln!("Fan-out:        {}", yes_no(exp.fan_out));
	eprintln!("Persist:        {}", yes_no(exp.persist_results));
	eprintln!("Metrics:        {}", exp.metrics_addr);
	eprintln!();
}

fn top_results(s: &ServerSnapshot) -> String {
	s.results.iter()
		.take(TOP_RESULTS)
		.map(|(label, n)| format!("{}={}", label, n))
		.collect::<Vec<_>>()
		.join(", ")
}

/// Build the per-server results table.
pub fn results_table(results: &[ServerSnapshot]) -> Table {
	let mut table = Table::new();
	table.load_preset(UTF8_FULL);
	table.set_content_arrangement(ContentArrangement::Dynamic);
	table.set_header(vec![
		"Server", "Attempts", "Successes", "Success %",
		"p50", "p95", "Results",
	]);

	for s in results {
		table.add_row(vec![
			s.server.clone(),
			s.attempts.to_string(),
			s.successes.to_string(),
			format!("{:.1}%", s.success_rate),
			format!("{:.1} ms", s.p50_ms),
			format!("{:.1} ms", s.p95_ms),
			top_results(s),
		]);
	}
	table
}

/// Print the end-of-run report.
pub fn print_results_table(results: &[ServerSnapshot], report: &RunReport) {
	println!("\nLookup Results");
	println!("==============\n");
	println!(
		"{} names processed by {} workers\n",
		report.names_completed, report.workers_spawned,
	);
	println!("{}", results_table(results));
}

/// Write per-server results to a CSV file.
pub fn write_csv(path: &str, results: &[ServerSnapshot]) -> Result<()> {
	let writer = csv::Writer::from_path(path)?;
	write_csv_to(writer, results)?;
	eprintln!("\nResults written to: {}", path);
	Ok(())
}

fn write_csv_to<W: std::io::Write>(mut writer: csv::Writer<W>, results: &[ServerSnapshot]) -> Result<()> {
	writer.write_record([
		"server", "attempts", "successes", "success_rate",
		"p50_ms", "p95_ms", "mean_ms", "results",
	])?;

	for s in results {
		let labels = s.results.iter()
			.map(|(label, n)| format!("{}={}", label, n))
			.collect::<Vec<_>>()
			.join(";");
		writer.write_record([
			s.server.clone(),
			s.attempts.to_string(),
			s.successes.to_string(),
			format!("{:.1}", s.success_rate),
			format!("{:.2}", s.p50_ms),
			format!("{:.2}", s.p95_ms),
			format!("{:.2}", s.mean_ms),
			labels,
		])?;
	}

	writer.flush()?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn snapshot() -> ServerSnapshot {
		ServerSnapshot {
			server: "1.1.1.1:53".to_string(),
			attempts: 10,
			successes: 8,
			success_rate: 80.0,
			p50_ms: 12.5,
			p95_ms: 40.0,
			mean_ms: 15.25,
			results: vec![
				("NOERROR".to_string(), 8),
				("timeout".to_string(), 1),
				("SERVFAIL".to_string(), 1),
			],
		}
	}

	#[test]
	fn test_table_rows() {
		let rendered = results_table(&[snapshot()]).to_string();
		assert!(rendered.contains("1.1.1.1:53"));
		assert!(rendered.contains("80.0%"));
		assert!(rendered.contains("NOERROR=8"));
	}

	#[test]
	fn test_csv_output() {
		let mut buf = Vec::new();
		write_csv_to(csv::Writer::from_writer(&mut buf), &[snapshot()]).unwrap();
		let text = String::from_utf8(buf).unwrap();
		let mut lines = text.lines();
		assert_eq!(
			lines.next(),
			Some("server,attempts,successes,success_rate,p50_ms,p95_ms,mean_ms,results")
		);
		assert_eq!(
			lines.next(),
			Some("1.1.1.1:53,10,8,80.0,12.50,40.00,15.25,NOERROR=8;timeout=1;SERVFAIL=1")
		);
	}
}
