use crate::error::SelectorError;
use crate::experiment::RecordChecks;
use crate::selector::ServerSelector;
use crate::transport::{Query, RecordKind, Server};

/// Every ancestor of `name`, starting with the name itself.
///
/// "www.example.com" gives ["www.example.com", "example.com", "com"].
pub fn caa_climb(name: &str) -> Vec<String> {
	let labels: Vec<&str> = name.split('.').collect();
	(0..labels.len()).map(|i| labels[i..].join(".")).collect()
}

fn push_queries(queries: &mut Vec<Query>, name: &str, kind: RecordKind, servers: &[Server], count: usize) {
	for server in servers {
		for _ in 0..count {
			queries.push(Query {
				name: name.to_string(),
				kind,
				server: server.clone(),
			});
		}
	}
}

/// Expand one input name into the full list of queries to run.
///
/// Queries are emitted A, AAAA, TXT, then the CAA climb. The selector is
/// consulted once per (name, type) pair, so a round-robin selector spreads
/// successive pairs across servers.
pub fn plan(
	name: &str,
	checks: &RecordChecks,
	selector: &ServerSelector,
	count: usize,
) -> Result<Vec<Query>, SelectorError> {
	let mut queries = Vec::new();

	for kind in checks.direct_kinds() {
		let servers = selector.pick()?;
		push_queries(&mut queries, name, kind, &servers, count);
	}

	if checks.caa {
		for suffix in caa_climb(name) {
			let servers = selector.pick()?;
			push_queries(&mut queries, &suffix, RecordKind::CAA, &servers, count);
		}
	}

	Ok(queries)
}
