use std::net::{IpAddr, SocketAddr};

use anyhow::{anyhow, Result};

use crate::transport::Server;

const DEFAULT_PORT: u16 = 53;

/// Parse a server address string into a Server.
///
/// Supports formats:
///   "1.1.1.1"              -- IPv4, default port 53
///   "1.1.1.1:53"           -- IPv4 with explicit port
///   "2606:4700::1111"      -- bare IPv6, default port 53
///   "[2606:4700::1111]:53" -- bracketed IPv6 with port
///   "dns.example"          -- hostname, default port 53
///   "dns.example:5353"     -- hostname with explicit port
pub fn parse_server(input: &str) -> Result<Server> {
	let trimmed = input.trim();
	if trimmed.is_empty() {
		return Err(anyhow!("empty server address"));
	}

	if trimmed.starts_with('[') {
		// Bracketed IPv6 with port: [::1]:53
		let addr: SocketAddr = trimmed.parse()
			.map_err(|e| anyhow!("invalid bracketed IPv6 address '{}': {}", trimmed, e))?;
		return Ok(Server::new(addr.to_string()));
	}

	if trimmed.matches(':').count() > 1 {
		// Bare IPv6 address without port
		let ip: IpAddr = trimmed.parse()
			.map_err(|e| anyhow!("invalid IPv6 address '{}': {}", trimmed, e))?;
		return Ok(Server::new(SocketAddr::new(ip, DEFAULT_PORT).to_string()));
	}

	let (host, port) = match trimmed.rsplit_once(':') {
		Some((host, port)) => {
			let port: u16 = port.parse()
				.map_err(|e| anyhow!("invalid port in server address '{}': {}", trimmed, e))?;
			(host, port)
		}
		None => (trimmed, DEFAULT_PORT),
	};
	if host.is_empty() || host.contains(char::is_whitespace) {
		return Err(anyhow!("invalid server host in '{}'", trimmed));
	}
	Ok(Server::new(format!("{}:{}", host, port)))
}

/// Parse a comma-separated list of server addresses
pub fn parse_server_list(raw: &str) -> Result<Vec<Server>> {
	raw.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(parse_server)
		.collect()
}

/// Read server addresses from a file, one per line.
///
/// Blank lines and lines starting with '#' are skipped.
pub fn read_server_file(path: &str) -> Result<Vec<Server>> {
	let content = std::fs::read_to_string(path)
		.map_err(|e| anyhow!("failed to read server file '{}': {}", path, e))?;
	let mut servers = Vec::new();
	for line in content.lines() {
		let trimmed = line.trim();
		if trimmed.is_empty() || trimmed.starts_with('#') {
			continue;
		}
		servers.push(parse_server(trimmed)?);
	}
	Ok(servers)
}

/// Drop repeated addresses, keeping first-seen order
pub fn dedup_servers(servers: Vec<Server>) -> Vec<Server> {
	let mut seen = std::collections::HashSet::new();
	servers.into_iter()
		.filter(|s| seen.insert(s.address.clone()))
		.collect()
}
