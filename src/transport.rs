use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Transport protocol used to reach a DNS server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
	Udp,
	Tcp,
}

impl Protocol {
	pub fn as_str(&self) -> &'static str {
		match self {
			Protocol::Udp => "udp",
			Protocol::Tcp => "tcp",
		}
	}
}

impl FromStr for Protocol {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"udp" => Ok(Protocol::Udp),
			"tcp" => Ok(Protocol::Tcp),
			other => Err(format!("unsupported protocol '{}'", other)),
		}
	}
}

impl fmt::Display for Protocol {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// DNS record types the engine knows how to check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
	A,
	AAAA,
	TXT,
	CAA,
}

impl RecordKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			RecordKind::A => "A",
			RecordKind::AAAA => "AAAA",
			RecordKind::TXT => "TXT",
			RecordKind::CAA => "CAA",
		}
	}
}

impl fmt::Display for RecordKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A DNS server to send queries to.
///
/// `id` is assigned by the result store when persistence is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Server {
	pub address: String,
	pub id: Option<i64>,
}

impl Server {
	pub fn new(address: impl Into<String>) -> Self {
		Server { address: address.into(), id: None }
	}

	pub fn with_id(mut self, id: i64) -> Self {
		self.id = Some(id);
		self
	}
}

impl fmt::Display for Server {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.address)
	}
}

/// A single lookup: one name, one record type, one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
	pub name: String,
	pub kind: RecordKind,
	pub server: Server,
}

/// DNS response code, kept numeric so labels stay independent of the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rcode(pub u16);

impl Rcode {
	pub const NOERROR: Rcode = Rcode(0);
	pub const SERVFAIL: Rcode = Rcode(2);
	pub const NXDOMAIN: Rcode = Rcode(3);
	pub const REFUSED: Rcode = Rcode(5);

	pub fn is_success(&self) -> bool {
		*self == Rcode::NOERROR
	}

	/// Mnemonic name used in result labels
	pub fn name(&self) -> String {
		let name = match self.0 {
			0 => "NOERROR",
			1 => "FORMERR",
			2 => "SERVFAIL",
			3 => "NXDOMAIN",
			4 => "NOTIMP",
			5 => "REFUSED",
			6 => "YXDOMAIN",
			7 => "YXRRSET",
			8 => "NXRRSET",
			9 => "NOTAUTH",
			10 => "NOTZONE",
			16 => "BADVERS",
			other => return format!("RCODE{}", other),
		};
		name.to_string()
	}
}

impl fmt::Display for Rcode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.name())
	}
}

/// One record from the answer section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
	pub kind: String,
	/// Property tag as received, only set for CAA records
	pub caa_tag: Option<String>,
}

/// Decoded response handed back by the resolution collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
	pub rcode: Rcode,
	pub records: Vec<AnswerRecord>,
}

/// Per-run query settings shared by every worker
#[derive(Debug, Clone, Copy)]
pub struct QuerySettings {
	pub protocol: Protocol,
	pub timeout: Duration,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_protocol_parse() {
		assert_eq!("udp".parse::<Protocol>(), Ok(Protocol::Udp));
		assert_eq!("tcp".parse::<Protocol>(), Ok(Protocol::Tcp));
		assert!("quic".parse::<Protocol>().is_err());
	}

	#[test]
	fn test_rcode_names() {
		assert_eq!(Rcode::NOERROR.name(), "NOERROR");
		assert_eq!(Rcode::NXDOMAIN.name(), "NXDOMAIN");
		assert_eq!(Rcode(23).name(), "RCODE23");
		assert!(Rcode::NOERROR.is_success());
		assert!(!Rcode::SERVFAIL.is_success());
	}

	#[test]
	fn test_server_display() {
		let server = Server::new("9.9.9.9:53").with_id(7);
		assert_eq!(server.to_string(), "9.9.9.9:53");
		assert_eq!(server.id, Some(7));
	}
}
