use clap::Parser;

/// Run lots of DNS lookups against one or more resolvers
#[derive(Parser, Debug)]
#[command(name = "dns-batch")]
#[command(about = "Run large batches of DNS lookups read from stdin against one or more resolvers")]
pub struct Cli {
	/// Bind address for the HTTP metrics server
	#[arg(long = "metrics-addr", default_value = ":6363")]
	pub metrics_addr: String,

	/// Comma-separated DNS servers (port defaults to 53)
	#[arg(short = 's', long = "servers", default_value = "127.0.0.1:53")]
	pub servers: String,

	/// File containing extra server addresses (one per line)
	#[arg(short = 'f', long = "server-file")]
	pub server_file: Option<String>,

	/// Send each query to one server, round-robin, instead of to every server
	#[arg(long = "round-robin")]
	pub round_robin: bool,

	/// DNS protocol (tcp or udp)
	#[arg(long = "proto", default_value = "udp")]
	pub proto: String,

	/// Query timeout in seconds
	#[arg(short = 't', long = "timeout", default_value = "30")]
	pub timeout: u64,

	/// Number of parallel workers
	#[arg(short = 'p', long = "parallel", default_value = "5")]
	pub parallel: usize,

	/// Number of workers to start per spawn interval
	#[arg(long = "spawn-rate", default_value = "100")]
	pub spawn_rate: usize,

	/// Seconds between worker batches
	#[arg(long = "spawn-interval", default_value = "60")]
	pub spawn_interval: u64,

	/// Look up A records (on by default; undoes an earlier --no-check-a)
	#[arg(long = "check-a", overrides_with = "no_check_a")]
	pub check_a: bool,

	/// Skip A record lookups
	#[arg(long = "no-check-a", overrides_with = "check_a")]
	pub no_check_a: bool,

	/// Look up AAAA records
	#[arg(long = "check-aaaa")]
	pub check_aaaa: bool,

	/// Look up TXT records
	#[arg(long = "check-txt")]
	pub check_txt: bool,

	/// Look up CAA records for the name and every parent domain
	#[arg(long = "check-caa")]
	pub check_caa: bool,

	/// How many times to repeat the same query against each server
	#[arg(short = 'c', long = "count", default_value = "1")]
	pub count: usize,

	/// Label-wise reverse input names (e.g. `com.google.www` -> `www.google.com`)
	#[arg(long = "reverse")]
	pub reverse: bool,

	/// Do not print a line per query result
	#[arg(long = "no-print")]
	pub no_print: bool,

	/// Run a name's queries one after another instead of concurrently
	#[arg(long = "sequential")]
	pub sequential: bool,

	/// SQLite database URL for persisting every result (e.g. sqlite://results.db)
	#[arg(long = "db")]
	pub db: Option<String>,

	/// Maximum database connections
	#[arg(long = "db-max-conns", default_value = "16")]
	pub db_max_conns: u32,

	/// Output CSV file path for the per-server summary
	#[arg(short = 'o', long = "output")]
	pub output: Option<String>,

	/// Do not compare --parallel against the open file limit
	#[arg(long = "skip-ulimit-check")]
	pub skip_ulimit_check: bool,
}

impl Cli {
	/// A lookups are on unless the last of --check-a / --no-check-a turned them off
	pub fn check_a_enabled(&self) -> bool {
		self.check_a || !self.no_check_a
	}
}
