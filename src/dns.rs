use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, Query as DnsQuery};
use hickory_proto::rr::{Name, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

use crate::transport::{Answer, AnswerRecord, Protocol, Query, QuerySettings, Rcode, RecordKind};

/// Use 4096-byte buffer to handle EDNS-extended responses
const MAX_UDP_RESPONSE_SIZE: usize = 4096;

const HEADER_LEN: usize = 12;

/// Why a resolution attempt produced no answer
#[derive(Debug, Error)]
pub enum ResolveError {
	#[error("timeout")]
	Timeout,
	#[error("network error: {0}")]
	Network(io::Error),
	#[error("malformed message: {0}")]
	Malformed(String),
}

impl From<io::Error> for ResolveError {
	fn from(e: io::Error) -> Self {
		match e.kind() {
			io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ResolveError::Timeout,
			_ => ResolveError::Network(e),
		}
	}
}

/// Outcome of one exchange. `rtt` is measured on every path, failures included.
#[derive(Debug)]
pub struct Resolution {
	pub rtt: Duration,
	pub result: Result<Answer, ResolveError>,
}

/// The network side of a lookup: send `query` and report what came back.
#[async_trait]
pub trait Resolve: Send + Sync {
	async fn resolve(&self, query: &Query, settings: QuerySettings) -> Resolution;
}

fn record_type(kind: RecordKind) -> RecordType {
	match kind {
		RecordKind::A => RecordType::A,
		RecordKind::AAAA => RecordType::AAAA,
		RecordKind::TXT => RecordType::TXT,
		RecordKind::CAA => RecordType::CAA,
	}
}

/// Build a DNS query message for the given domain and record type.
///
/// Returns the serialized query bytes with the RD bit set.
pub fn build_query(domain: &str, kind: RecordKind, txid: u16) -> Result<Vec<u8>, ResolveError> {
	let name = Name::from_ascii(domain)
		.map_err(|e| ResolveError::Malformed(format!("invalid domain name '{}': {}", domain, e)))?;

	let mut message = Message::new();
	message.set_id(txid);
	message.set_recursion_desired(true);
	message.add_query(DnsQuery::query(name, record_type(kind)));

	message.to_vec()
		.map_err(|e| ResolveError::Malformed(format!("failed to serialize DNS query: {}", e)))
}

/// Decode a DNS response, validating the transaction ID.
///
/// Returns `Ok(None)` when the message is a well-formed reply to some other
/// query, so UDP callers can keep waiting for theirs.
pub fn parse_response(bytes: &[u8], expected_txid: u16) -> Result<Option<Answer>, ResolveError> {
	let message = Message::from_vec(bytes)
		.map_err(|e| ResolveError::Malformed(format!("failed to parse DNS response: {}", e)))?;

	if message.id() != expected_txid {
		return Ok(None);
	}
	if message.message_type() != MessageType::Response {
		return Err(ResolveError::Malformed("received a query instead of a response".to_string()));
	}

	Ok(Some(Answer {
		rcode: Rcode(u16::from(message.response_code())),
		records: wire_answers(bytes)?,
	}))
}

fn malformed<E: std::fmt::Display>(e: E) -> ResolveError {
	ResolveError::Malformed(e.to_string())
}

/// Answer records read straight off the wire.
///
/// CAA tags come from the raw RDATA. The decoded `CAA` folds the well-known
/// tags to lowercase.
fn wire_answers(bytes: &[u8]) -> Result<Vec<AnswerRecord>, ResolveError> {
	let mut decoder = BinDecoder::new(bytes);
	let header = decoder.read_slice(HEADER_LEN).map_err(malformed)?.unverified();
	let questions = u16::from_be_bytes([header[4], header[5]]);
	let answers = u16::from_be_bytes([header[6], header[7]]);

	for _ in 0..questions {
		Name::read(&mut decoder).map_err(malformed)?;
		// qtype and qclass
		decoder.read_slice(4).map_err(malformed)?;
	}

	let mut records = Vec::with_capacity(answers as usize);
	for _ in 0..answers {
		Name::read(&mut decoder).map_err(malformed)?;
		let record_type = RecordType::from(decoder.read_u16().map_err(malformed)?.unverified());
		// class and ttl
		decoder.read_slice(6).map_err(malformed)?;
		let rdlength = decoder.read_u16().map_err(malformed)?.unverified();
		let rdata = decoder.read_slice(rdlength as usize).map_err(malformed)?.unverified();

		let caa_tag = if record_type == RecordType::CAA {
			Some(raw_caa_tag(rdata)?)
		} else {
			None
		};
		records.push(AnswerRecord { kind: record_type.to_string(), caa_tag });
	}
	Ok(records)
}

/// CAA RDATA is flags (1 byte), tag length (1 byte), tag, value
fn raw_caa_tag(rdata: &[u8]) -> Result<String, ResolveError> {
	let tag_len = *rdata.get(1)
		.ok_or_else(|| ResolveError::Malformed("CAA record too short".to_string()))? as usize;
	let tag = rdata.get(2..2 + tag_len)
		.ok_or_else(|| ResolveError::Malformed("CAA tag runs past the record".to_string()))?;
	Ok(String::from_utf8_lossy(tag).into_owned())
}

async fn server_addr(address: &str) -> Result<SocketAddr, ResolveError> {
	if let Ok(addr) = address.parse::<SocketAddr>() {
		return Ok(addr);
	}
	tokio::net::lookup_host(address).await?
		.next()
		.ok_or_else(|| ResolveError::Network(io::Error::new(
			io::ErrorKind::NotFound,
			format!("no address found for server '{}'", address),
		)))
}

/// Send one query over UDP and wait for the matching reply.
///
/// Creates a dedicated socket per query to avoid response stealing between
/// concurrent tasks sharing the same resolver socket.
async fn exchange_udp(addr: SocketAddr, query_bytes: &[u8], txid: u16) -> Result<Answer, ResolveError> {
	let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
	let socket = UdpSocket::bind(bind_addr).await?;
	socket.connect(addr).await?;
	socket.send(query_bytes).await?;

	let mut buf = vec![0u8; MAX_UDP_RESPONSE_SIZE];
	loop {
		let len = socket.recv(&mut buf).await?;
		match parse_response(&buf[..len], txid)? {
			Some(answer) => return Ok(answer),
			None => debug!(server = %addr, "ignoring reply with mismatched txid"),
		}
	}
}

/// Send one query over TCP using two-byte length framing.
async fn exchange_tcp(addr: SocketAddr, query_bytes: &[u8], txid: u16) -> Result<Answer, ResolveError> {
	let mut stream = TcpStream::connect(addr).await?;
	let len = u16::try_from(query_bytes.len())
		.map_err(|_| ResolveError::Malformed("query too large for TCP framing".to_string()))?;

	let mut framed = Vec::with_capacity(query_bytes.len() + 2);
	framed.extend_from_slice(&len.to_be_bytes());
	framed.extend_from_slice(query_bytes);
	stream.write_all(&framed).await?;

	let mut len_buf = [0u8; 2];
	stream.read_exact(&mut len_buf).await?;
	let mut buf = vec![0u8; u16::from_be_bytes(len_buf) as usize];
	stream.read_exact(&mut buf).await?;

	parse_response(&buf, txid)?
		.ok_or_else(|| ResolveError::Malformed("txid mismatch on TCP reply".to_string()))
}

/// Resolver that talks to real DNS servers over UDP or TCP
#[derive(Debug, Default, Clone)]
pub struct NetworkResolver;

impl NetworkResolver {
	pub fn new() -> Self {
		NetworkResolver
	}

	async fn exchange(&self, query: &Query, protocol: Protocol) -> Result<Answer, ResolveError> {
		let txid: u16 = rand::random();
		let query_bytes = build_query(&query.name, query.kind, txid)?;
		let addr = server_addr(&query.server.address).await?;

		match protocol {
			Protocol::Udp => exchange_udp(addr, &query_bytes, txid).await,
			Protocol::Tcp => exchange_tcp(addr, &query_bytes, txid).await,
		}
	}
}

#[async_trait]
impl Resolve for NetworkResolver {
	async fn resolve(&self, query: &Query, settings: QuerySettings) -> Resolution {
		let start = Instant::now();
		let result = match tokio::time::timeout(settings.timeout, self.exchange(query, settings.protocol)).await {
			Ok(result) => result,
			Err(_) => Err(ResolveError::Timeout),
		};
		Resolution { rtt: start.elapsed(), result }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use hickory_proto::op::ResponseCode;
	use hickory_proto::rr::rdata::CAA;
	use hickory_proto::rr::{RData, Record};

	use crate::executor::{classify, QueryOutcome, TAG_CASE_MISMATCH};

	use crate::transport::Server;

	fn response_for(query_bytes: &[u8]) -> Message {
		let mut response = Message::from_vec(query_bytes).unwrap();
		response.set_message_type(MessageType::Response);
		response
	}

	#[test]
	fn test_build_a_query() {
		let bytes = build_query("example.com", RecordKind::A, 1234).unwrap();
		// DNS header is 12 bytes minimum
		assert!(bytes.len() >= 12);
		// Verify txid in first two bytes (big-endian)
		assert_eq!(bytes[0], (1234 >> 8) as u8);
		assert_eq!(bytes[1], (1234 & 0xff) as u8);
	}

	#[test]
	fn test_build_caa_query_type() {
		let bytes = build_query("example.com", RecordKind::CAA, 77).unwrap();
		let message = Message::from_vec(&bytes).unwrap();
		assert_eq!(message.queries()[0].query_type(), RecordType::CAA);
		assert!(message.recursion_desired());
	}

	#[test]
	fn test_build_rejects_bad_name() {
		let long_label = "a".repeat(64);
		let result = build_query(&format!("{}.com", long_label), RecordKind::A, 1);
		assert!(matches!(result, Err(ResolveError::Malformed(_))));
	}

	#[test]
	fn test_parse_valid_response() {
		let query_bytes = build_query("example.com", RecordKind::A, 9999).unwrap();
		let response_bytes = response_for(&query_bytes).to_vec().unwrap();

		let answer = parse_response(&response_bytes, 9999).unwrap().unwrap();
		assert_eq!(answer.rcode, Rcode::NOERROR);
		assert!(answer.records.is_empty());
	}

	#[test]
	fn test_parse_rcode() {
		let query_bytes = build_query("nope.example", RecordKind::A, 42).unwrap();
		let mut response = response_for(&query_bytes);
		response.set_response_code(ResponseCode::NXDomain);
		let answer = parse_response(&response.to_vec().unwrap(), 42).unwrap().unwrap();
		assert_eq!(answer.rcode, Rcode::NXDOMAIN);
	}

	fn caa_response(txid: u16) -> Vec<u8> {
		let query_bytes = build_query("example.com", RecordKind::CAA, txid).unwrap();
		let mut response = response_for(&query_bytes);
		let name = Name::from_ascii("example.com.").unwrap();
		let caa = CAA::new_issue(false, Some(Name::from_ascii("ca.example.net").unwrap()), Vec::new());
		response.add_answer(Record::from_rdata(name, 300, RData::CAA(caa)));
		response.to_vec().unwrap()
	}

	#[test]
	fn test_parse_caa_tag() {
		let answer = parse_response(&caa_response(5), 5).unwrap().unwrap();
		assert_eq!(answer.records.len(), 1);
		assert_eq!(answer.records[0].kind, "CAA");
		assert_eq!(answer.records[0].caa_tag.as_deref(), Some("issue"));
		assert_eq!(classify(&Ok(answer)), QueryOutcome::Success { rcode: Rcode::NOERROR });
	}

	#[test]
	fn test_caa_tag_case_is_kept_from_the_wire() {
		let mut bytes = caa_response(6);
		let at = bytes.windows(5).position(|w| w == b"issue").unwrap();
		bytes[at..at + 5].copy_from_slice(b"Issue");

		let answer = parse_response(&bytes, 6).unwrap().unwrap();
		assert_eq!(answer.records[0].caa_tag.as_deref(), Some("Issue"));
		assert_eq!(
			classify(&Ok(answer)),
			QueryOutcome::ValidationError { detail: TAG_CASE_MISMATCH.to_string() }
		);
	}

	#[test]
	fn test_raw_caa_tag_bounds() {
		assert_eq!(raw_caa_tag(&[0, 5, b'i', b's', b's', b'u', b'e', b'x']).unwrap(), "issue");
		assert!(matches!(raw_caa_tag(&[0]), Err(ResolveError::Malformed(_))));
		assert!(matches!(raw_caa_tag(&[0, 9, b'i']), Err(ResolveError::Malformed(_))));
	}

	#[test]
	fn test_txid_mismatch_is_skipped() {
		let query_bytes = build_query("example.com", RecordKind::A, 1111).unwrap();
		let response_bytes = response_for(&query_bytes).to_vec().unwrap();
		assert!(parse_response(&response_bytes, 2222).unwrap().is_none());
	}

	#[test]
	fn test_truncated_buffer() {
		// Only 5 bytes -- too short for a valid DNS message
		let bytes = vec![0u8; 5];
		assert!(matches!(parse_response(&bytes, 0), Err(ResolveError::Malformed(_))));
	}

	#[test]
	fn test_io_error_mapping() {
		let timed_out = ResolveError::from(io::Error::new(io::ErrorKind::TimedOut, "slow"));
		assert!(matches!(timed_out, ResolveError::Timeout));
		let refused = ResolveError::from(io::Error::new(io::ErrorKind::ConnectionRefused, "no"));
		assert!(matches!(refused, ResolveError::Network(_)));
	}

	#[tokio::test]
	async fn test_udp_round_trip_against_local_socket() {
		let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let addr = server.local_addr().unwrap();

		tokio::spawn(async move {
			let mut buf = vec![0u8; 512];
			let (len, peer) = server.recv_from(&mut buf).await.unwrap();
			let mut response = Message::from_vec(&buf[..len]).unwrap();
			response.set_message_type(MessageType::Response);
			response.set_response_code(ResponseCode::Refused);
			server.send_to(&response.to_vec().unwrap(), peer).await.unwrap();
		});

		let query = Query {
			name: "example.com".to_string(),
			kind: RecordKind::A,
			server: Server::new(addr.to_string()),
		};
		let settings = QuerySettings { protocol: Protocol::Udp, timeout: Duration::from_secs(2) };
		let resolution = NetworkResolver::new().resolve(&query, settings).await;
		assert_eq!(resolution.result.unwrap().rcode, Rcode::REFUSED);
	}

	#[tokio::test]
	async fn test_undecodable_udp_reply_is_malformed() {
		let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let addr = server.local_addr().unwrap();

		tokio::spawn(async move {
			let mut buf = vec![0u8; 512];
			let (_, peer) = server.recv_from(&mut buf).await.unwrap();
			server.send_to(&[0xde, 0xad, 0xbe], peer).await.unwrap();
		});

		let query = Query {
			name: "example.com".to_string(),
			kind: RecordKind::A,
			server: Server::new(addr.to_string()),
		};
		let settings = QuerySettings { protocol: Protocol::Udp, timeout: Duration::from_secs(5) };
		let resolution = NetworkResolver::new().resolve(&query, settings).await;
		assert!(matches!(resolution.result, Err(ResolveError::Malformed(_))));
		assert!(resolution.rtt < Duration::from_secs(5));
		assert_eq!(classify(&resolution.result), QueryOutcome::NetworkError);
	}

	#[tokio::test]
	async fn test_udp_timeout_reports_rtt() {
		// Bound but silent socket
		let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let query = Query {
			name: "example.com".to_string(),
			kind: RecordKind::A,
			server: Server::new(silent.local_addr().unwrap().to_string()),
		};
		let settings = QuerySettings { protocol: Protocol::Udp, timeout: Duration::from_millis(100) };
		let resolution = NetworkResolver::new().resolve(&query, settings).await;
		assert!(matches!(resolution.result, Err(ResolveError::Timeout)));
		assert!(resolution.rtt >= Duration::from_millis(100));
	}
}
