use std::time::Duration;

use crate::error::ConfigError;
use crate::selector::ServerSelector;
use crate::transport::{Protocol, QuerySettings, RecordKind};

/// Which record types are looked up for every input name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordChecks {
	pub a: bool,
	pub aaaa: bool,
	pub txt: bool,
	pub caa: bool,
}

impl RecordChecks {
	pub fn any(&self) -> bool {
		self.a || self.aaaa || self.txt || self.caa
	}

	/// Enabled non-CAA types in planning order
	pub fn direct_kinds(&self) -> Vec<RecordKind> {
		let mut kinds = Vec::with_capacity(3);
		if self.a {
			kinds.push(RecordKind::A);
		}
		if self.aaaa {
			kinds.push(RecordKind::AAAA);
		}
		if self.txt {
			kinds.push(RecordKind::TXT);
		}
		kinds
	}
}

/// Everything a run needs, fixed once built
#[derive(Debug)]
pub struct Experiment {
	pub metrics_addr: String,
	pub command_line: String,
	pub selector: ServerSelector,
	pub protocol: Protocol,
	pub timeout: Duration,
	/// Steady-state number of workers
	pub parallel: usize,
	/// Workers started per ramp batch
	pub spawn_rate: usize,
	pub spawn_interval: Duration,
	pub checks: RecordChecks,
	/// Repeats of each query against each picked server
	pub count: usize,
	pub print_results: bool,
	pub persist_results: bool,
	/// Run a name's queries concurrently rather than one after another
	pub fan_out: bool,
}

impl Experiment {
	/// Check every invariant; an experiment that fails here must never dispatch.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.metrics_addr.trim().is_empty() {
			return Err(ConfigError::MissingMetricsAddr);
		}
		if self.command_line.trim().is_empty() {
			return Err(ConfigError::MissingCommandLine);
		}
		if self.selector.servers().is_empty() {
			return Err(ConfigError::NoServers);
		}
		if self.timeout < Duration::from_secs(1) {
			return Err(ConfigError::TimeoutTooShort(self.timeout));
		}
		if self.parallel < 1 {
			return Err(ConfigError::ParallelTooLow);
		}
		if self.spawn_rate < 1 {
			return Err(ConfigError::SpawnRateTooLow);
		}
		if self.count < 1 {
			return Err(ConfigError::CountTooLow);
		}
		if !self.checks.any() {
			return Err(ConfigError::NoChecks);
		}
		Ok(())
	}

	pub fn query_settings(&self) -> QuerySettings {
		QuerySettings { protocol: self.protocol, timeout: self.timeout }
	}
}

/// Parse a protocol flag value into a `Protocol`
pub fn parse_protocol(value: &str) -> Result<Protocol, ConfigError> {
	value.parse().map_err(|_| ConfigError::InvalidProtocol(value.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::transport::Server;

	/// A valid experiment against one server with only A checks
	pub(crate) fn experiment() -> Experiment {
		Experiment {
			metrics_addr: "127.0.0.1:6363".to_string(),
			command_line: "dns-batch --check-a".to_string(),
			selector: ServerSelector::comparison(vec![Server::new("127.0.0.1:53")]).unwrap(),
			protocol: Protocol::Udp,
			timeout: Duration::from_secs(2),
			parallel: 2,
			spawn_rate: 2,
			spawn_interval: Duration::from_millis(10),
			checks: RecordChecks { a: true, ..Default::default() },
			count: 1,
			print_results: false,
			persist_results: false,
			fan_out: true,
		}
	}

	#[test]
	fn test_valid_experiment() {
		assert_eq!(experiment().validate(), Ok(()));
	}

	#[test]
	fn test_each_invariant_is_checked() {
		let mut e = experiment();
		e.metrics_addr = String::new();
		assert_eq!(e.validate(), Err(ConfigError::MissingMetricsAddr));

		let mut e = experiment();
		e.command_line = " ".to_string();
		assert_eq!(e.validate(), Err(ConfigError::MissingCommandLine));

		let mut e = experiment();
		e.timeout = Duration::from_millis(999);
		assert_eq!(e.validate(), Err(ConfigError::TimeoutTooShort(Duration::from_millis(999))));

		let mut e = experiment();
		e.parallel = 0;
		assert_eq!(e.validate(), Err(ConfigError::ParallelTooLow));

		let mut e = experiment();
		e.spawn_rate = 0;
		assert_eq!(e.validate(), Err(ConfigError::SpawnRateTooLow));

		let mut e = experiment();
		e.count = 0;
		assert_eq!(e.validate(), Err(ConfigError::CountTooLow));

		let mut e = experiment();
		e.checks = RecordChecks::default();
		assert_eq!(e.validate(), Err(ConfigError::NoChecks));
	}

	#[test]
	fn test_timeout_of_exactly_one_second_is_valid() {
		let mut e = experiment();
		e.timeout = Duration::from_secs(1);
		assert!(e.validate().is_ok());
	}

	#[test]
	fn test_parse_protocol() {
		assert_eq!(parse_protocol("tcp"), Ok(Protocol::Tcp));
		assert_eq!(
			parse_protocol("doh"),
			Err(ConfigError::InvalidProtocol("doh".to_string()))
		);
	}

	#[test]
	fn test_direct_kinds_order() {
		let checks = RecordChecks { a: true, aaaa: true, txt: true, caa: true };
		assert_eq!(
			checks.direct_kinds(),
			vec![RecordKind::A, RecordKind::AAAA, RecordKind::TXT]
		);
	}
}
