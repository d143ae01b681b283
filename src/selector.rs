use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::SelectorError;
use crate::transport::Server;

/// Strategy for choosing which servers receive a query.
///
/// Both variants share the same server list; the variant is fixed when the
/// selector is built.
#[derive(Debug)]
pub enum ServerSelector {
	/// Every pick returns the full server list, for side-by-side comparison
	Comparison { servers: Vec<Server> },
	/// Every pick returns one server, cycling through the list
	RoundRobin { servers: Vec<Server>, cursor: AtomicUsize },
}

impl ServerSelector {
	pub fn comparison(servers: Vec<Server>) -> Result<Self, SelectorError> {
		if servers.is_empty() {
			return Err(SelectorError::NoServers);
		}
		Ok(ServerSelector::Comparison { servers })
	}

	pub fn round_robin(servers: Vec<Server>) -> Result<Self, SelectorError> {
		if servers.is_empty() {
			return Err(SelectorError::NoServers);
		}
		Ok(ServerSelector::RoundRobin { servers, cursor: AtomicUsize::new(0) })
	}

	/// All configured servers, regardless of strategy
	pub fn servers(&self) -> &[Server] {
		match self {
			ServerSelector::Comparison { servers } => servers,
			ServerSelector::RoundRobin { servers, .. } => servers,
		}
	}

	pub fn mode(&self) -> &'static str {
		match self {
			ServerSelector::Comparison { .. } => "comparison",
			ServerSelector::RoundRobin { .. } => "round-robin",
		}
	}

	/// Pick the servers for the next query. Safe to call from any number of tasks.
	pub fn pick(&self) -> Result<Vec<Server>, SelectorError> {
		match self {
			ServerSelector::Comparison { servers } => {
				if servers.is_empty() {
					return Err(SelectorError::NoServers);
				}
				Ok(servers.clone())
			}
			ServerSelector::RoundRobin { servers, cursor } => {
				if servers.is_empty() {
					return Err(SelectorError::NoServers);
				}
				let which = cursor.fetch_add(1, Ordering::Relaxed);
				Ok(vec![servers[which % servers.len()].clone()])
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;
	use std::sync::Arc;

	fn servers(addrs: &[&str]) -> Vec<Server> {
		addrs.iter().map(|a| Server::new(*a)).collect()
	}

	#[test]
	fn test_empty_server_list_rejected() {
		assert_eq!(ServerSelector::comparison(Vec::new()).unwrap_err(), SelectorError::NoServers);
		assert_eq!(ServerSelector::round_robin(Vec::new()).unwrap_err(), SelectorError::NoServers);
	}

	#[test]
	fn test_comparison_returns_all() {
		let selector = ServerSelector::comparison(servers(&["s1:53", "s2:53", "s3:53"])).unwrap();
		for _ in 0..5 {
			let picked = selector.pick().unwrap();
			let addrs: Vec<&str> = picked.iter().map(|s| s.address.as_str()).collect();
			assert_eq!(addrs, vec!["s1:53", "s2:53", "s3:53"]);
		}
	}

	#[test]
	fn test_round_robin_order() {
		let selector = ServerSelector::round_robin(servers(&["s1:53", "s2:53", "s3:53"])).unwrap();
		let picked: Vec<String> = (0..4)
			.map(|_| {
				let p = selector.pick().unwrap();
				assert_eq!(p.len(), 1);
				p[0].address.clone()
			})
			.collect();
		assert_eq!(picked, vec!["s1:53", "s2:53", "s3:53", "s1:53"]);
	}

	#[test]
	fn test_round_robin_concurrent_is_even() {
		let selector = Arc::new(
			ServerSelector::round_robin(servers(&["a:53", "b:53", "c:53", "d:53"])).unwrap(),
		);
		let handles: Vec<_> = (0..8)
			.map(|_| {
				let selector = selector.clone();
				std::thread::spawn(move || {
					(0..1000)
						.map(|_| selector.pick().unwrap()[0].address.clone())
						.collect::<Vec<_>>()
				})
			})
			.collect();

		let mut counts: HashMap<String, usize> = HashMap::new();
		for handle in handles {
			for addr in handle.join().unwrap() {
				*counts.entry(addr).or_default() += 1;
			}
		}
		// 8000 picks over 4 servers, no lost cursor increments
		assert_eq!(counts.len(), 4);
		assert!(counts.values().all(|&c| c == 2000));
	}
}
