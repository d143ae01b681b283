use std::fmt;
use std::time::Duration;

use crate::dns::{Resolution, Resolve, ResolveError};
use crate::transport::{Answer, Query, QuerySettings, Rcode};

pub const TIMEOUT_LABEL: &str = "timeout";
pub const NETWORK_ERROR_LABEL: &str = "net err";
pub const TAG_CASE_MISMATCH: &str = "tag case mismatch";

/// Classified result of a single query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
	Success { rcode: Rcode },
	ProtocolFailure { rcode: Rcode },
	TimeoutError,
	NetworkError,
	ValidationError { detail: String },
}

impl QueryOutcome {
	pub fn is_success(&self) -> bool {
		matches!(self, QueryOutcome::Success { .. })
	}

	/// Label used for the `results` counter. Always drawn from a bounded set.
	pub fn label(&self) -> String {
		match self {
			QueryOutcome::Success { rcode } | QueryOutcome::ProtocolFailure { rcode } => rcode.name(),
			QueryOutcome::TimeoutError => TIMEOUT_LABEL.to_string(),
			QueryOutcome::NetworkError => NETWORK_ERROR_LABEL.to_string(),
			QueryOutcome::ValidationError { detail } => detail.clone(),
		}
	}

	/// Error text stored with a persisted result, `None` on success
	pub fn error(&self) -> Option<String> {
		if self.is_success() {
			None
		} else {
			Some(self.label())
		}
	}
}

impl fmt::Display for QueryOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			QueryOutcome::Success { .. } => f.write_str("ok"),
			other => f.write_str(&other.label()),
		}
	}
}

/// A classified outcome plus the time the exchange took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
	pub outcome: QueryOutcome,
	pub latency: Duration,
}

/// True when a CAA property tag is not already lowercase.
///
/// Resolvers must pass record casing through untouched.
fn has_tag_case_mismatch(answer: &Answer) -> bool {
	answer.records.iter()
		.filter_map(|r| r.caa_tag.as_deref())
		.any(|tag| tag.to_lowercase() != tag)
}

/// Map a raw resolution result onto exactly one outcome.
///
/// Timeouts first, then other transport failures, then non-success rcodes,
/// then CAA tag validation.
pub fn classify(result: &Result<Answer, ResolveError>) -> QueryOutcome {
	match result {
		Err(ResolveError::Timeout) => QueryOutcome::TimeoutError,
		Err(_) => QueryOutcome::NetworkError,
		Ok(answer) if !answer.rcode.is_success() => QueryOutcome::ProtocolFailure { rcode: answer.rcode },
		Ok(answer) if has_tag_case_mismatch(answer) => QueryOutcome::ValidationError {
			detail: TAG_CASE_MISMATCH.to_string(),
		},
		Ok(answer) => QueryOutcome::Success { rcode: answer.rcode },
	}
}

/// Run one query through the resolver and classify what came back.
pub async fn execute(resolver: &dyn Resolve, query: &Query, settings: QuerySettings) -> Execution {
	let Resolution { rtt, result } = resolver.resolve(query, settings).await;
	Execution {
		outcome: classify(&result),
		latency: rtt,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io;

	use crate::transport::AnswerRecord;

	fn caa_answer(tags: &[&str]) -> Answer {
		Answer {
			rcode: Rcode::NOERROR,
			records: tags.iter()
				.map(|t| AnswerRecord { kind: "CAA".to_string(), caa_tag: Some(t.to_string()) })
				.collect(),
		}
	}

	#[test]
	fn test_timeout_wins() {
		assert_eq!(classify(&Err(ResolveError::Timeout)), QueryOutcome::TimeoutError);
	}

	#[test]
	fn test_network_error_is_normalized() {
		let err = ResolveError::Network(io::Error::new(io::ErrorKind::ConnectionRefused, "refused by 10.0.0.1"));
		let outcome = classify(&Err(err));
		assert_eq!(outcome, QueryOutcome::NetworkError);
		assert_eq!(outcome.label(), "net err");

		let malformed = classify(&Err(ResolveError::Malformed("garbage".to_string())));
		assert_eq!(malformed, QueryOutcome::NetworkError);
	}

	#[test]
	fn test_protocol_failure_carries_rcode() {
		let answer = Answer { rcode: Rcode::SERVFAIL, records: Vec::new() };
		let outcome = classify(&Ok(answer));
		assert_eq!(outcome, QueryOutcome::ProtocolFailure { rcode: Rcode::SERVFAIL });
		assert_eq!(outcome.label(), "SERVFAIL");
	}

	#[test]
	fn test_uppercase_caa_tag_is_validation_error() {
		let outcome = classify(&Ok(caa_answer(&["issue", "Issue"])));
		assert_eq!(outcome, QueryOutcome::ValidationError { detail: TAG_CASE_MISMATCH.to_string() });
		assert!(!outcome.is_success());
		assert_eq!(outcome.label(), "tag case mismatch");
	}

	#[test]
	fn test_rcode_checked_before_tags() {
		let mut answer = caa_answer(&["ISSUE"]);
		answer.rcode = Rcode::REFUSED;
		assert_eq!(classify(&Ok(answer)), QueryOutcome::ProtocolFailure { rcode: Rcode::REFUSED });
	}

	#[test]
	fn test_lowercase_tags_succeed() {
		let outcome = classify(&Ok(caa_answer(&["issue", "iodef"])));
		assert_eq!(outcome, QueryOutcome::Success { rcode: Rcode::NOERROR });
		assert_eq!(outcome.label(), "NOERROR");
		assert_eq!(outcome.error(), None);
		assert_eq!(outcome.to_string(), "ok");
	}
}
