use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Label-wise reversal of a domain name.
///
/// "com.example.www" -> "www.example.com"
pub fn reverse_name(domain: &str) -> String {
	let mut labels: Vec<&str> = domain.split('.').collect();
	labels.reverse();
	labels.join(".")
}

/// Turn one input line into a name to query.
///
/// Blank lines and lines starting with '#' yield `None`. Whitespace and a
/// trailing root dot are stripped.
pub fn normalize_line(line: &str, reverse: bool) -> Option<String> {
	let trimmed = line.trim();
	if trimmed.is_empty() || trimmed.starts_with('#') {
		return None;
	}
	let name = trimmed.strip_suffix('.').unwrap_or(trimmed);
	if name.is_empty() {
		return None;
	}
	if reverse {
		Some(reverse_name(name))
	} else {
		Some(name.to_string())
	}
}

/// Streams names from a line-oriented reader without buffering the whole input
pub struct NameReader<R> {
	lines: tokio::io::Lines<R>,
	reverse: bool,
}

impl<R: AsyncBufRead + Unpin> NameReader<R> {
	pub fn new(reader: R, reverse: bool) -> Self {
		NameReader { lines: reader.lines(), reverse }
	}

	/// Next usable name, or `None` at end of input
	pub async fn next_name(&mut self) -> Result<Option<String>> {
		loop {
			let line = self.lines.next_line().await
				.map_err(|e| anyhow!("failed to read domain names: {}", e))?;
			match line {
				Some(line) => {
					if let Some(name) = normalize_line(&line, self.reverse) {
						return Ok(Some(name));
					}
				}
				None => return Ok(None),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_reverse_name() {
		assert_eq!(reverse_name("com.google.www"), "www.google.com");
		assert_eq!(reverse_name("com"), "com");
	}

	#[test]
	fn test_normalize_line() {
		assert_eq!(normalize_line("  example.com.  ", false), Some("example.com".to_string()));
		assert_eq!(normalize_line("", false), None);
		assert_eq!(normalize_line("# comment", false), None);
		assert_eq!(normalize_line(".", false), None);
		assert_eq!(normalize_line("org.example", true), Some("example.org".to_string()));
	}

	#[tokio::test]
	async fn test_name_reader_skips_blanks() {
		let input: &[u8] = b"a.com\n\n  \nb.com\r\n# skip\nc.com";
		let mut reader = NameReader::new(tokio::io::BufReader::new(input), false);
		let mut names = Vec::new();
		while let Some(name) = reader.next_name().await.unwrap() {
			names.push(name);
		}
		assert_eq!(names, vec!["a.com", "b.com", "c.com"]);
	}
}
